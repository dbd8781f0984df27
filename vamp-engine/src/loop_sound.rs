//! Seamless loop buffer construction
//!
//! A loop is never scheduled sample-by-sample at runtime. Instead the region
//! is sliced out of the track and closed into a buffer whose last frame
//! flows into its first, so the loop backend can repeat it blindly.
//!
//! # Seam construction
//!
//! Over the last `crossfade` frames of the slice, the tail fades out while
//! the audio leading into `loop_in` (the pre-roll) fades in. The last output
//! frame is therefore the track frame just before `loop_in`, and wrapping to
//! frame 0 continues the recording exactly as it was played.
//!
//! When less than one crossfade window of audio precedes `loop_in`, the
//! tail fades to silence and the head fades in from silence over the same
//! width instead.

use crate::audio::Track;
use crate::error::{Error, Result};
use crate::region::LoopRegion;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use vamp_common::config::EngineConfig;
use vamp_common::timing::samples_to_ticks;
use vamp_common::FadeCurve;

/// How the seam of a loop buffer was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeamKind {
    /// No crossfade configured; the raw slice wraps as-is
    Hard,
    /// Tail blended with the audio preceding loop in
    PreRoll,
    /// Tail and head dipped through silence
    Dip,
}

/// Closed, crossfaded loop audio for one region version
///
/// Shared as `Arc<LoopBuffer>` and never mutated.
#[derive(Debug, Clone)]
pub struct LoopBuffer {
    samples: Arc<[f32]>,
    channels: u16,
    sample_rate: u32,
    region: LoopRegion,
    version: u64,
    crossfade_frames: usize,
    seam: SeamKind,
}

impl LoopBuffer {
    /// Interleaved samples, exactly `loop_out - loop_in` frames long
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Cycle length in ticks
    pub fn duration_ticks(&self) -> i64 {
        samples_to_ticks(self.frames(), self.sample_rate)
    }

    /// Region snapshot this buffer was built from
    pub fn region(&self) -> &LoopRegion {
        &self.region
    }

    /// Region version this buffer was built for
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn crossfade_frames(&self) -> usize {
        self.crossfade_frames
    }

    pub fn seam(&self) -> SeamKind {
        self.seam
    }

    /// Interleaved samples of one frame; `index` wraps around the cycle
    pub fn frame(&self, index: usize) -> &[f32] {
        let ch = self.channels as usize;
        let i = (index % self.frames()) * ch;
        &self.samples[i..i + ch]
    }
}

/// Builds [`LoopBuffer`]s
///
/// Pure and blocking: callers on the async side run it through
/// `spawn_blocking`.
#[derive(Debug, Clone, Copy)]
pub struct LoopSoundBuilder {
    curve: FadeCurve,
    min_loop_duration_ms: u32,
}

impl LoopSoundBuilder {
    pub fn new(curve: FadeCurve, min_loop_duration_ms: u32) -> Self {
        Self {
            curve,
            min_loop_duration_ms,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.crossfade_curve, config.min_loop_duration_ms)
    }

    pub fn curve(&self) -> FadeCurve {
        self.curve
    }

    /// Build the loop buffer for `region` at `version`
    ///
    /// # Errors
    /// `InvalidRegion` or `InsufficientSamples` when the region does not fit
    /// the track.
    pub fn build(&self, track: &Track, region: &LoopRegion, version: u64) -> Result<LoopBuffer> {
        self.build_cancellable(track, region, version, &AtomicBool::new(false))
    }

    /// Like [`build`](Self::build), returning `BuildCancelled` once `cancel`
    /// is raised
    pub fn build_cancellable(
        &self,
        track: &Track,
        region: &LoopRegion,
        version: u64,
        cancel: &AtomicBool,
    ) -> Result<LoopBuffer> {
        let frames = region.frames(track, self.min_loop_duration_ms)?;
        let ch = track.channels() as usize;
        let len = frames.len();
        let n = frames.crossfade;

        let mut out = track.frame_range(frames.start, frames.end).to_vec();

        if cancel.load(Ordering::Acquire) {
            return Err(Error::BuildCancelled(version));
        }

        let seam = if n == 0 {
            SeamKind::Hard
        } else if frames.start >= n {
            // Tail frame j blends towards the pre-roll frame that sits the
            // same distance before loop_in; the final frame is pure pre-roll
            let pre_roll = track.frame_range(frames.start - n, frames.start);
            let tail = &mut out[(len - n) * ch..];
            for j in 0..n {
                let (gain_out, gain_in) = self.curve.window_gains(j, n);
                for c in 0..ch {
                    let k = j * ch + c;
                    tail[k] = tail[k] * gain_out + pre_roll[k] * gain_in;
                }
            }
            SeamKind::PreRoll
        } else {
            for j in 0..n {
                // Tail reaches exactly 0.0 on its last frame
                let (gain_out, _) = self.curve.window_gains(j, n);
                // Head starts exactly at 0.0 on frame 0
                let gain_in = self.curve.calculate_fade_in(j as f32 / n as f32);
                for c in 0..ch {
                    out[(len - n + j) * ch + c] *= gain_out;
                    out[j * ch + c] *= gain_in;
                }
            }
            SeamKind::Dip
        };

        debug!(
            "Built loop buffer v{}: {} frames, {} frame {:?} seam",
            version, len, n, seam
        );

        Ok(LoopBuffer {
            samples: out.into(),
            channels: track.channels(),
            sample_rate: track.sample_rate(),
            region: region.clone(),
            version,
            crossfade_frames: n,
            seam,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vamp_common::timing::seconds_to_ticks;

    const RATE: u32 = 8000;

    /// Stereo track whose left channel is a slow sine and right channel a
    /// ramp, so every frame is distinguishable
    fn test_track(seconds: usize) -> Track {
        let frames = RATE as usize * seconds;
        let mut samples = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let t = i as f32 / RATE as f32;
            samples.push((2.0 * std::f32::consts::PI * 110.0 * t).sin() * 0.8);
            samples.push(i as f32 / frames as f32);
        }
        Track::new("song", "song.wav", samples, RATE, 2).unwrap()
    }

    fn region(loop_in: f64, loop_out: f64, crossfade_ms: u32) -> LoopRegion {
        let mut r = LoopRegion::new(
            "Vamp",
            seconds_to_ticks(loop_in),
            seconds_to_ticks(loop_out),
            &EngineConfig::default(),
        );
        r.crossfade_ms = crossfade_ms;
        r
    }

    fn builder() -> LoopSoundBuilder {
        LoopSoundBuilder::new(FadeCurve::Linear, 500)
    }

    /// Largest step between adjacent frames of the track (left channel)
    fn max_natural_step(track: &Track) -> f32 {
        track
            .samples()
            .chunks(2)
            .zip(track.samples().chunks(2).skip(1))
            .map(|(a, b)| (a[0] - b[0]).abs())
            .fold(0.0, f32::max)
    }

    #[test]
    fn test_length_is_exact() {
        let track = test_track(10);
        let buffer = builder().build(&track, &region(2.0, 5.0, 20), 1).unwrap();

        assert_eq!(buffer.frames(), 3 * RATE as usize);
        assert_eq!(buffer.duration_ticks(), seconds_to_ticks(3.0));
        assert_eq!(buffer.version(), 1);
        assert_eq!(buffer.seam(), SeamKind::PreRoll);
        assert_eq!(buffer.crossfade_frames(), 160);
    }

    #[test]
    fn test_pre_roll_seam_is_natural_continuation() {
        let track = test_track(10);
        let r = region(2.0, 5.0, 20);
        let buffer = builder().build(&track, &r, 1).unwrap();
        let start = 2 * RATE as usize;

        // Last frame is the frame just before loop_in, first frame is loop_in
        let last = buffer.frame(buffer.frames() - 1);
        let before_loop_in = track.frame_range(start - 1, start);
        assert!((last[0] - before_loop_in[0]).abs() < 1e-6);
        assert!((last[1] - before_loop_in[1]).abs() < 1e-6);
        assert_eq!(buffer.frame(0), track.frame_range(start, start + 1));

        // The wrap step is no larger than the track's own steps
        let wrap_step = (buffer.frame(0)[0] - last[0]).abs();
        assert!(wrap_step <= max_natural_step(&track) + 1e-6);
    }

    #[test]
    fn test_body_untouched_outside_crossfade() {
        let track = test_track(10);
        let buffer = builder().build(&track, &region(2.0, 5.0, 20), 1).unwrap();
        let start = 2 * RATE as usize;
        let body_end = buffer.frames() - buffer.crossfade_frames();

        assert_eq!(
            &buffer.samples()[..body_end * 2],
            track.frame_range(start, start + body_end)
        );
    }

    #[test]
    fn test_crossfade_region_has_no_jumps() {
        let track = test_track(10);
        let buffer = builder().build(&track, &region(2.0, 5.0, 50), 1).unwrap();
        let limit = max_natural_step(&track) * 2.0 + 1e-4;

        for i in 0..buffer.frames() {
            let a = buffer.frame(i)[0];
            let b = buffer.frame(i + 1)[0];
            assert!((a - b).abs() <= limit, "jump of {} at frame {}", (a - b).abs(), i);
        }
    }

    #[test]
    fn test_seam_holds_level_for_every_configurable_curve() {
        let samples = vec![0.5; RATE as usize * 10];
        let track = Track::new("dc", "dc.wav", samples, RATE, 1).unwrap();

        for curve in [FadeCurve::Linear, FadeCurve::SCurve, FadeCurve::EqualPower] {
            let buffer = LoopSoundBuilder::new(curve, 500)
                .build(&track, &region(2.0, 5.0, 50), 1)
                .unwrap();
            let tail = &buffer.samples()[buffer.frames() - buffer.crossfade_frames()..];
            for (j, v) in tail.iter().enumerate() {
                if curve.is_amplitude_complementary() {
                    assert!((v - 0.5).abs() < 1e-5, "{:?} frame {}: {}", curve, j, v);
                } else {
                    assert!(*v >= 0.5 - 1e-5, "{:?} dips to {} at frame {}", curve, v, j);
                    assert!(*v <= 0.5 * std::f32::consts::SQRT_2 + 1e-5);
                }
            }
        }
    }

    #[test]
    fn test_dip_seam_when_loop_starts_at_zero() {
        let track = test_track(10);
        let buffer = builder().build(&track, &region(0.0, 3.0, 20), 2).unwrap();

        assert_eq!(buffer.seam(), SeamKind::Dip);
        assert_eq!(buffer.frame(0), &[0.0, 0.0]);
        let last = buffer.frame(buffer.frames() - 1);
        assert_eq!(last, &[0.0, 0.0]);
    }

    #[test]
    fn test_zero_crossfade_is_hard_wrap() {
        let track = test_track(10);
        let buffer = builder().build(&track, &region(1.0, 2.0, 0), 1).unwrap();

        assert_eq!(buffer.seam(), SeamKind::Hard);
        assert_eq!(buffer.samples(), track.frame_range(8000, 16000));
    }

    #[test]
    fn test_invalid_regions_rejected() {
        let track = test_track(10);

        assert!(matches!(
            builder().build(&track, &region(5.0, 2.0, 20), 1),
            Err(Error::InvalidRegion(_))
        ));
        assert!(matches!(
            builder().build(&track, &region(2.0, 2.6, 600), 1),
            Err(Error::InvalidRegion(_))
        ));
        assert!(matches!(
            builder().build(&track, &region(8.0, 11.0, 20), 1),
            Err(Error::InsufficientSamples { .. })
        ));
    }

    #[test]
    fn test_cancelled_build_returns_cancelled() {
        let track = test_track(10);
        let cancel = AtomicBool::new(true);

        assert!(matches!(
            builder().build_cancellable(&track, &region(2.0, 5.0, 20), 7, &cancel),
            Err(Error::BuildCancelled(7))
        ));
    }
}
