//! Audio data, decoding and device output

pub mod decoder;
pub mod output;
pub mod types;

pub use decoder::{load_track, DecodedAudio, PcmSource, SymphoniaSource};
pub use output::{AudioOutput, StreamHealth};
pub use types::Track;
