//! # Vamp Engine
//!
//! Seamless loop ("vamp") playback for a single track.
//!
//! A selected region of the song is pre-built into a closed, crossfaded
//! [`LoopBuffer`](loop_sound::LoopBuffer) that the loop backend repeats on
//! its own, so no application code runs at the loop boundary. Leaving the
//! loop splices back into the song through an
//! [`ExitPatch`](exit_patch::ExitPatch) that covers the streaming
//! transport's startup latency.
//!
//! **Architecture:**
//! - [`audio`]: decoded tracks (symphonia) and device output (cpal)
//! - [`loop_sound`] / [`exit_patch`]: pure buffer builders
//! - [`playback`]: backends, the mode controller and the position monitor
//! - [`persistence`]: saved vamps per song
//! - [`session`]: song opening and region bookkeeping on top of a player

pub mod audio;
pub mod error;
pub mod exit_patch;
pub mod loop_sound;
pub mod persistence;
pub mod playback;
pub mod region;
pub mod session;

pub use error::{Error, Result};
