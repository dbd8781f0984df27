//! Exit patch: the bridge from a loop back to linear playback
//!
//! The streaming transport needs time before it produces audio. The patch
//! covers that gap from RAM: it is the track audio starting at the region's
//! loop out, crossfaded at its head against what the loop would have played
//! next and faded out at its tail, where the resumed transport takes over.

use crate::audio::Track;
use crate::error::{Error, Result};
use crate::loop_sound::LoopBuffer;
use crate::region::ExitSettings;
use tracing::debug;
use vamp_common::timing::{ms_to_samples, ms_to_ticks, samples_to_ticks};
use vamp_common::FadeCurve;

/// One-shot bridge audio, consumed by a single exit
#[derive(Debug, Clone)]
pub struct ExitPatch {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
    start_ticks: i64,
    resume_ticks: i64,
    continuation_frame: usize,
    fade_start: usize,
    fade_frames: usize,
    curve: FadeCurve,
}

impl ExitPatch {
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Track position of the first patch frame (the region's loop out)
    pub fn start_ticks(&self) -> i64 {
        self.start_ticks
    }

    /// Track position just past the last patch frame
    pub fn end_ticks(&self) -> i64 {
        self.start_ticks + samples_to_ticks(self.frames(), self.sample_rate)
    }

    /// Where the transport resumes
    pub fn resume_ticks(&self) -> i64 {
        self.resume_ticks
    }

    /// Loop cycle frame the patch replaces (0 for a boundary exit)
    pub fn continuation_frame(&self) -> usize {
        self.continuation_frame
    }

    /// Track position of patch frame `index`
    pub fn ticks_at(&self, index: usize) -> i64 {
        self.start_ticks + samples_to_ticks(index.min(self.frames()), self.sample_rate)
    }

    /// Tail envelope gain at patch frame `index`
    ///
    /// 1.0 until the fade-out starts, then falling to exactly 0.0 on the last
    /// frame. Already applied to [`samples`](Self::samples); the mixer uses
    /// its complement to bring the resumed transport in.
    pub fn tail_gain(&self, index: usize) -> f32 {
        if index < self.fade_start {
            1.0
        } else if index >= self.frames() {
            0.0
        } else {
            self.curve
                .window_gains(index - self.fade_start, self.fade_frames)
                .0
        }
    }
}

/// Builds [`ExitPatch`]es
#[derive(Debug, Clone, Copy)]
pub struct ExitPatchBuilder {
    curve: FadeCurve,
}

impl ExitPatchBuilder {
    pub fn new(curve: FadeCurve) -> Self {
        Self { curve }
    }

    /// Patch for an exit at the loop boundary
    ///
    /// The head is blended against the start of the loop buffer, which is
    /// what the loop would play after its last frame.
    pub fn build(
        &self,
        loop_buffer: &LoopBuffer,
        track: &Track,
        settings: &ExitSettings,
    ) -> Result<ExitPatch> {
        self.build_at(loop_buffer, track, settings, 0)
    }

    /// Patch that takes over from the loop at cycle frame `continuation`
    pub fn build_at(
        &self,
        loop_buffer: &LoopBuffer,
        track: &Track,
        settings: &ExitSettings,
        continuation: usize,
    ) -> Result<ExitPatch> {
        if loop_buffer.channels() != track.channels()
            || loop_buffer.sample_rate() != track.sample_rate()
        {
            return Err(Error::InvalidRegion(
                "loop buffer was built from a different track".to_string(),
            ));
        }

        let region = loop_buffer.region();
        let rate = track.sample_rate();
        let ch = track.channels() as usize;
        let start = track.frame_at(region.loop_out);

        let patch_len = ms_to_samples(settings.patch_duration_ms, rate).min(track.frames() - start);
        let mut samples = track.frame_range(start, start + patch_len).to_vec();

        let continuation = continuation % loop_buffer.frames();
        let n = loop_buffer.crossfade_frames().min(patch_len);
        for j in 0..n {
            let (gain_loop, gain_patch) = self.curve.window_gains(j, n);
            let looped = loop_buffer.frame(continuation + j);
            for c in 0..ch {
                let k = j * ch + c;
                samples[k] = looped[c] * gain_loop + samples[k] * gain_patch;
            }
        }

        let fade_frames = ms_to_samples(settings.patch_fade_out_ms, rate).min(patch_len);
        let fade_start = patch_len - fade_frames;
        for j in 0..fade_frames {
            let (gain, _) = self.curve.window_gains(j, fade_frames);
            for c in 0..ch {
                samples[(fade_start + j) * ch + c] *= gain;
            }
        }

        let mut resume_ticks = region.loop_out + ms_to_ticks(settings.resume_offset_ms as i64);
        if resume_ticks >= track.duration_ticks() {
            resume_ticks = region.loop_out;
        }

        debug!(
            "Built exit patch: {} frames from frame {}, resume at {} ticks",
            patch_len, start, resume_ticks
        );

        Ok(ExitPatch {
            samples,
            channels: track.channels(),
            sample_rate: rate,
            start_ticks: region.loop_out,
            resume_ticks,
            continuation_frame: continuation,
            fade_start,
            fade_frames,
            curve: self.curve,
        })
    }
}
