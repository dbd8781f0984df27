//! Core audio data types
//!
//! A [`Track`] is the whole decoded song held in RAM. Loop buffers and exit
//! patches are sliced out of it, and the software transport streams from
//! it, so every component sees the same samples.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use vamp_common::events::TrackInfo;
use vamp_common::timing::{samples_to_ticks, ticks_to_samples};

/// Fully decoded song, shared read-only as `Arc<Track>`
///
/// **Format:**
/// - Samples are f32 (floating point -1.0 to 1.0)
/// - Interleaved by channel: [L, R, L, R, ...] for stereo
/// - Native sample rate of the source file
#[derive(Debug, Clone)]
pub struct Track {
    song_id: String,
    path: PathBuf,
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl Track {
    /// Wrap decoded PCM
    ///
    /// # Errors
    /// `Decode` if the sample layout is inconsistent (zero rate, zero
    /// channels, or a trailing partial frame)
    pub fn new(
        song_id: impl Into<String>,
        path: impl Into<PathBuf>,
        samples: Vec<f32>,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::Decode("sample rate is 0".to_string()));
        }
        if channels == 0 {
            return Err(Error::Decode("channel count is 0".to_string()));
        }
        if samples.len() % channels as usize != 0 {
            return Err(Error::Decode(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                channels
            )));
        }

        Ok(Self {
            song_id: song_id.into(),
            path: path.into(),
            samples,
            sample_rate,
            channels,
        })
    }

    pub fn song_id(&self) -> &str {
        &self.song_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Interleaved samples
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Duration in ticks
    pub fn duration_ticks(&self) -> i64 {
        samples_to_ticks(self.frames(), self.sample_rate)
    }

    /// Duration in seconds, for display
    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Frame index of a timeline position, clamped to the track end
    pub fn frame_at(&self, ticks: i64) -> usize {
        ticks_to_samples(ticks, self.sample_rate).min(self.frames())
    }

    /// Timeline position of a frame index
    pub fn ticks_at(&self, frame: usize) -> i64 {
        samples_to_ticks(frame, self.sample_rate)
    }

    /// Interleaved samples of frames `[start, end)`
    ///
    /// # Panics
    /// Panics if the range exceeds the track
    pub fn frame_range(&self, start: usize, end: usize) -> &[f32] {
        let ch = self.channels as usize;
        &self.samples[start * ch..end * ch]
    }

    /// Snapshot published with `song_loaded`
    pub fn info(&self) -> TrackInfo {
        TrackInfo {
            song_id: self.song_id.clone(),
            path: self.path.display().to_string(),
            duration_ticks: self.duration_ticks(),
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vamp_common::timing::seconds_to_ticks;

    #[test]
    fn test_track_geometry() {
        let track = Track::new("id", "/music/a.wav", vec![0.0; 44100 * 2 * 3], 44100, 2).unwrap();

        assert_eq!(track.frames(), 132_300);
        assert_eq!(track.duration_ticks(), seconds_to_ticks(3.0));
        assert_eq!(track.frame_at(seconds_to_ticks(1.0)), 44100);
        assert_eq!(track.frame_at(seconds_to_ticks(10.0)), 132_300);
        assert_eq!(track.frame_range(1, 3).len(), 4);
        assert_eq!(track.info().channels, 2);
    }

    #[test]
    fn test_track_rejects_bad_layout() {
        assert!(Track::new("id", "x", vec![0.0; 3], 44100, 2).is_err());
        assert!(Track::new("id", "x", vec![0.0; 4], 0, 2).is_err());
        assert!(Track::new("id", "x", vec![0.0; 4], 44100, 0).is_err());
    }
}
