//! Loop regions (vamps)
//!
//! A region is a pair of loop points on the track timeline plus the fade
//! widths used when building and leaving its loop. Loop points are stored in
//! ticks so a saved region reloads bit-identically.

use crate::audio::Track;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vamp_common::config::EngineConfig;
use vamp_common::events::RegionInfo;
use vamp_common::timing::{format_ticks, ms_to_samples, snap_to_frame, ticks_to_samples};

/// A named loop region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopRegion {
    pub id: Uuid,
    pub name: String,
    /// First frame of the loop (ticks, inclusive)
    pub loop_in: i64,
    /// End of the loop (ticks, exclusive)
    pub loop_out: i64,
    /// Seam crossfade width
    pub crossfade_ms: u32,
    /// Fade-in when the loop takes over from the transport
    pub entry_fade_ms: u32,
    /// Fade used by the fade-out exit style
    pub exit_fade_ms: u32,
    /// Inactive regions are kept but never engage
    pub active: bool,
    #[serde(default)]
    pub overrides: RegionOverrides,
}

/// Per-region replacements for process-wide exit settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_patch_duration_ms: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_resume_offset_ms: Option<u32>,
}

/// Exit settings after applying region overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitSettings {
    pub patch_duration_ms: u32,
    pub patch_fade_out_ms: u32,
    pub resume_offset_ms: u32,
}

/// Region geometry in frames for one track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionFrames {
    /// First frame of the loop
    pub start: usize,
    /// One past the last frame of the loop
    pub end: usize,
    /// Seam crossfade width
    pub crossfade: usize,
}

impl RegionFrames {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

impl LoopRegion {
    /// New active region with fade widths taken from the configuration
    pub fn new(name: impl Into<String>, loop_in: i64, loop_out: i64, config: &EngineConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            loop_in,
            loop_out,
            crossfade_ms: config.crossfade_ms,
            entry_fade_ms: config.entry_fade_ms,
            exit_fade_ms: config.exit_fade_ms,
            active: true,
            overrides: RegionOverrides::default(),
        }
    }

    pub fn duration_ticks(&self) -> i64 {
        self.loop_out - self.loop_in
    }

    /// True when `ticks` lies in `[loop_in, loop_out)`
    pub fn contains(&self, ticks: i64) -> bool {
        ticks >= self.loop_in && ticks < self.loop_out
    }

    /// Move both loop points onto frame boundaries of `sample_rate`
    pub fn snap_to_frames(&mut self, sample_rate: u32) {
        self.loop_in = snap_to_frame(self.loop_in, sample_rate);
        self.loop_out = snap_to_frame(self.loop_out, sample_rate);
    }

    /// Check the loop points as given, before any snapping
    ///
    /// Snapping clamps negative ticks to frame 0, so this must run first for
    /// a negative loop in to be reported rather than silently moved.
    pub fn check_points(&self) -> Result<()> {
        if self.loop_in < 0 {
            return Err(Error::InvalidRegion(format!(
                "loop in {} is before the track start",
                self.loop_in
            )));
        }
        if self.loop_in >= self.loop_out {
            return Err(Error::InvalidRegion(format!(
                "loop in {} must precede loop out {}",
                format_ticks(self.loop_in),
                format_ticks(self.loop_out)
            )));
        }
        Ok(())
    }

    /// Check the raw points, snap them to `track` frames and validate
    pub fn fit_to(&mut self, track: &Track, config: &EngineConfig) -> Result<()> {
        self.check_points()?;
        self.snap_to_frames(track.sample_rate());
        self.validate(track, config)
    }

    /// Resolve the region against a track
    ///
    /// # Errors
    /// - `InvalidRegion`: negative or inverted loop points, a region shorter
    ///   than `min_loop_duration_ms`, or a crossfade at least as long as
    ///   the region
    /// - `InsufficientSamples`: loop out beyond the decoded audio
    pub fn frames(&self, track: &Track, min_loop_duration_ms: u32) -> Result<RegionFrames> {
        self.check_points()?;

        let rate = track.sample_rate();
        let start = ticks_to_samples(self.loop_in, rate);
        let end = ticks_to_samples(self.loop_out, rate);
        if end > track.frames() {
            return Err(Error::InsufficientSamples {
                needed: end,
                available: track.frames(),
            });
        }

        let len = end - start;
        let min_frames = ms_to_samples(min_loop_duration_ms, rate).max(1);
        if len < min_frames {
            return Err(Error::InvalidRegion(format!(
                "loop of {} frames is shorter than the {} ms minimum",
                len, min_loop_duration_ms
            )));
        }

        let crossfade = ms_to_samples(self.crossfade_ms, rate);
        if crossfade >= len {
            return Err(Error::InvalidRegion(format!(
                "crossfade of {} ms does not fit in a {} frame loop",
                self.crossfade_ms, len
            )));
        }

        Ok(RegionFrames {
            start,
            end,
            crossfade,
        })
    }

    /// Validate the region against a track and configuration
    pub fn validate(&self, track: &Track, config: &EngineConfig) -> Result<()> {
        self.frames(track, config.min_loop_duration_ms).map(|_| ())
    }

    /// Exit settings with this region's overrides applied
    pub fn exit_settings(&self, config: &EngineConfig) -> ExitSettings {
        let patch_duration_ms = self
            .overrides
            .exit_patch_duration_ms
            .unwrap_or(config.exit_patch_duration_ms);

        ExitSettings {
            patch_duration_ms,
            patch_fade_out_ms: config.exit_patch_fade_out_ms.min(patch_duration_ms),
            resume_offset_ms: self
                .overrides
                .transport_resume_offset_ms
                .unwrap_or(config.transport_resume_offset_ms),
        }
    }

    /// Snapshot for `loop_points_changed`
    pub fn info(&self, version: u64) -> RegionInfo {
        RegionInfo {
            id: self.id,
            name: self.name.clone(),
            loop_in_ticks: self.loop_in,
            loop_out_ticks: self.loop_out,
            crossfade_ms: self.crossfade_ms,
            entry_fade_ms: self.entry_fade_ms,
            exit_fade_ms: self.exit_fade_ms,
            version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vamp_common::timing::seconds_to_ticks;

    fn silent_track(seconds: usize) -> Track {
        Track::new("t", "t.wav", vec![0.0; 44100 * seconds], 44100, 1).unwrap()
    }

    fn region(loop_in: f64, loop_out: f64) -> LoopRegion {
        LoopRegion::new(
            "Vamp",
            seconds_to_ticks(loop_in),
            seconds_to_ticks(loop_out),
            &EngineConfig::default(),
        )
    }

    #[test]
    fn test_valid_region_frames() {
        let track = silent_track(10);
        let frames = region(2.0, 4.0).frames(&track, 500).unwrap();

        assert_eq!(frames.start, 88_200);
        assert_eq!(frames.end, 176_400);
        assert_eq!(frames.len(), 88_200);
        assert_eq!(frames.crossfade, 882);
    }

    #[test]
    fn test_inverted_and_empty_regions_rejected() {
        let track = silent_track(10);
        let config = EngineConfig::default();

        assert!(matches!(
            region(4.0, 2.0).validate(&track, &config),
            Err(Error::InvalidRegion(_))
        ));
        assert!(matches!(
            region(3.0, 3.0).validate(&track, &config),
            Err(Error::InvalidRegion(_))
        ));
    }

    #[test]
    fn test_crossfade_wider_than_region_rejected() {
        let track = silent_track(10);
        let mut r = region(2.0, 2.6);
        r.crossfade_ms = 600;

        assert!(matches!(r.frames(&track, 0), Err(Error::InvalidRegion(_))));

        r.crossfade_ms = 599;
        assert!(r.frames(&track, 0).is_ok());
    }

    #[test]
    fn test_minimum_duration_enforced() {
        let track = silent_track(10);
        let config = EngineConfig::default();

        assert!(region(2.0, 2.4).validate(&track, &config).is_err());
        assert!(region(2.0, 2.5).validate(&track, &config).is_ok());
    }

    #[test]
    fn test_loop_out_past_track_is_insufficient() {
        let track = silent_track(10);
        let err = region(8.0, 12.0).validate(&track, &EngineConfig::default());

        assert!(matches!(
            err,
            Err(Error::InsufficientSamples {
                needed: 529_200,
                available: 441_000
            })
        ));
    }

    #[test]
    fn test_contains_is_half_open() {
        let r = region(60.0, 120.0);

        assert!(r.contains(seconds_to_ticks(60.0)));
        assert!(r.contains(seconds_to_ticks(119.999)));
        assert!(!r.contains(seconds_to_ticks(120.0)));
        assert!(!r.contains(seconds_to_ticks(59.999)));
    }

    #[test]
    fn test_exit_settings_overrides() {
        let config = EngineConfig::default();
        let mut r = region(60.0, 120.0);

        assert_eq!(
            r.exit_settings(&config),
            ExitSettings {
                patch_duration_ms: 250,
                patch_fade_out_ms: 200,
                resume_offset_ms: 30
            }
        );

        r.overrides.exit_patch_duration_ms = Some(100);
        r.overrides.transport_resume_offset_ms = Some(80);
        let settings = r.exit_settings(&config);
        assert_eq!(settings.patch_duration_ms, 100);
        assert_eq!(settings.patch_fade_out_ms, 100);
        assert_eq!(settings.resume_offset_ms, 80);
    }

    #[test]
    fn test_snap_to_frames() {
        let mut r = region(1.0, 2.0);
        r.loop_in += 100;
        r.snap_to_frames(44100);

        assert_eq!(r.loop_in, seconds_to_ticks(1.0));
        assert_eq!(r.loop_out, seconds_to_ticks(2.0));
    }

    #[test]
    fn test_fit_rejects_negative_loop_in_before_snapping() {
        let track = silent_track(10);
        let config = EngineConfig::default();

        let mut r = region(-1.0, 2.0);
        assert!(matches!(r.fit_to(&track, &config), Err(Error::InvalidRegion(_))));
        assert_eq!(r.loop_in, seconds_to_ticks(-1.0));

        // A point inside the first frame is still before the track start
        let mut r = region(0.0, 2.0);
        r.loop_in = -1;
        assert!(matches!(r.fit_to(&track, &config), Err(Error::InvalidRegion(_))));

        let mut r = region(1.0, 2.0);
        r.loop_in += 100;
        r.fit_to(&track, &config).unwrap();
        assert_eq!(r.loop_in, seconds_to_ticks(1.0));
    }
}
