//! Playback-related type definitions
//!
//! Supporting types carried in event payloads: the engine mode and the
//! track/region snapshots published on load and edit.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Engine playback mode
///
/// `paused` is tracked separately and never changes the mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    /// Nothing playing (initial state)
    #[default]
    Stopped,
    /// Linear playback from the streaming backend
    TransportPlaying,
    /// Pre-built loop buffer repeating on the closed-loop backend
    LoopPlaying,
    /// Exit patch bridging the loop end to the resumed transport
    ExitingLoop,
}

impl PlaybackMode {
    /// True for every mode that produces audio
    pub fn is_playing(&self) -> bool {
        !matches!(self, PlaybackMode::Stopped)
    }

    /// True while the loop backend owns the output
    pub fn is_loop(&self) -> bool {
        matches!(self, PlaybackMode::LoopPlaying | PlaybackMode::ExitingLoop)
    }
}

impl std::fmt::Display for PlaybackMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackMode::Stopped => write!(f, "Stopped"),
            PlaybackMode::TransportPlaying => write!(f, "TransportPlaying"),
            PlaybackMode::LoopPlaying => write!(f, "LoopPlaying"),
            PlaybackMode::ExitingLoop => write!(f, "ExitingLoop"),
        }
    }
}

/// Snapshot of a loaded track, published with `song_loaded`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    /// Content fingerprint identifying the song across renames
    pub song_id: String,
    /// Source file path
    pub path: String,
    /// Duration in ticks
    pub duration_ticks: i64,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Snapshot of the armed loop region, published with `loop_points_changed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionInfo {
    pub id: Uuid,
    pub name: String,
    pub loop_in_ticks: i64,
    pub loop_out_ticks: i64,
    pub crossfade_ms: u32,
    pub entry_fade_ms: u32,
    pub exit_fade_ms: u32,
    /// Region version after the edit; loop buffers built for older
    /// versions are stale
    pub version: u64,
}
