//! Shared helpers for vamp-engine integration tests
//!
//! - audio_generator: WAV fixtures written with hound
//! - scenario: controller + software deck driven by manual rendering

#![allow(dead_code)]

pub mod audio_generator;
pub mod scenario;

pub use audio_generator::{generate_ramp_wav, generate_sine_wav};
pub use scenario::Scenario;
