//! Error types for vamp-engine
//!
//! Region and build errors are returned to the caller that requested the
//! edit; backend and decode failures on the playback path are surfaced as
//! `error_notice` events instead of propagating.

use thiserror::Error;

/// Main error type for vamp-engine
#[derive(Error, Debug)]
pub enum Error {
    /// Loop points or fade widths violate the region invariants
    #[error("Invalid loop region: {0}")]
    InvalidRegion(String),

    /// Loop out lies beyond the decoded audio
    #[error("Insufficient samples: need {needed} frames, track has {available}")]
    InsufficientSamples { needed: usize, available: usize },

    /// No decoder for this container or codec
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Audio decoding errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// A playback backend refused to start
    #[error("Backend start failed: {0}")]
    BackendStart(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Loop entry requested before the buffer for this region version exists
    #[error("Loop buffer for region version {0} is not ready")]
    BuildNotReady(u64),

    /// Build abandoned because the region or song changed
    #[error("Loop build for region version {0} was cancelled")]
    BuildCancelled(u64),

    /// Operation needs a loaded track
    #[error("No track loaded")]
    NotLoaded,

    /// Saved loop data could not be read or written
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Position monitor task is gone
    #[error("Position monitor stopped")]
    MonitorStopped,

    /// File I/O error
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the shared library (config, serialization)
    #[error(transparent)]
    Common(#[from] vamp_common::Error),
}

/// Convenience Result type using vamp-engine Error
pub type Result<T> = std::result::Result<T, Error>;
