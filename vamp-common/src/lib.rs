//! # Vamp Common Library
//!
//! Shared code for the vamp workspace:
//! - Error type
//! - Tick-based timing conversions
//! - Fade curve definitions and calculations
//! - Event types (VampEvent enum) and the EventBus
//! - Configuration loading (TOML + environment + defaults)

pub mod config;
pub mod error;
pub mod events;
pub mod fade_curves;
pub mod timing;

pub use error::{Error, Result};
pub use fade_curves::FadeCurve;
