//! Tick-based timing for sample-accurate loop points
//!
//! Every timestamp on the logical timeline (loop in/out points, playback
//! position, persisted region settings) is an `i64` tick count at
//! 28,224,000 Hz. That rate is the LCM of the common audio sample rates, so
//! a tick value converts to a frame index with zero rounding error and loop
//! points survive save/reload bit-for-bit.
//!
//! # Time Representations
//!
//! 1. **Ticks (internal)**: i64 at 28,224,000 Hz - region storage, positions
//! 2. **Milliseconds (settings)**: fade and patch widths in configuration
//! 3. **Frames (playback)**: usize indices into the decoded track
//! 4. **Seconds (display)**: f64, event payloads and log lines only
//!
//! # Examples
//!
//! ```rust
//! use vamp_common::timing::*;
//!
//! // A loop starting one minute into the track
//! let loop_in = seconds_to_ticks(60.0);
//! assert_eq!(loop_in, 1_693_440_000);
//!
//! // ...lands exactly on frame 2,646,000 of a 44.1 kHz track
//! assert_eq!(ticks_to_samples(loop_in, 44100), 2_646_000);
//!
//! // A 15 ms crossfade is 661 frames at 44.1 kHz
//! assert_eq!(ms_to_samples(15, 44100), 661);
//! ```

/// Tick rate: 28,224,000 Hz
pub const TICK_RATE: i64 = 28_224_000;

/// Ticks per millisecond: 28,224
pub const TICKS_PER_MS: i64 = 28_224;

/// Lookup table for ticks per sample at common sample rates
///
/// | Rate (Hz) | Ticks/Sample |
/// |-----------|--------------|
/// | 8,000     | 3,528        |
/// | 11,025    | 2,560        |
/// | 16,000    | 1,764        |
/// | 22,050    | 1,280        |
/// | 32,000    | 882          |
/// | 44,100    | 640          |
/// | 48,000    | 588          |
/// | 88,200    | 320          |
/// | 96,000    | 294          |
/// | 176,400   | 160          |
/// | 192,000   | 147          |
pub const TICKS_PER_SAMPLE_TABLE: [(u32, i64); 11] = [
    (8000, 3528),
    (11025, 2560),
    (16000, 1764),
    (22050, 1280),
    (32000, 882),
    (44100, 640),
    (48000, 588),
    (88200, 320),
    (96000, 294),
    (176400, 160),
    (192000, 147),
];

/// Convert milliseconds to ticks
///
/// Lossless: every millisecond value lands on a tick boundary.
///
/// ```rust
/// use vamp_common::timing::ms_to_ticks;
///
/// assert_eq!(ms_to_ticks(1), 28_224);
/// assert_eq!(ms_to_ticks(-1000), -28_224_000);
/// ```
pub fn ms_to_ticks(milliseconds: i64) -> i64 {
    milliseconds * TICKS_PER_MS
}

/// Convert ticks to milliseconds using truncating division
///
/// ```rust
/// use vamp_common::timing::ticks_to_ms;
///
/// assert_eq!(ticks_to_ms(28_224), 1);
/// assert_eq!(ticks_to_ms(28_223), 0);
/// ```
pub fn ticks_to_ms(ticks: i64) -> i64 {
    ticks / TICKS_PER_MS
}

/// Convert ticks to a frame count at a given sample rate
///
/// Exact for every rate in [`TICKS_PER_SAMPLE_TABLE`]. Negative tick values
/// clamp to frame 0.
///
/// # Panics
///
/// Panics if `sample_rate` is 0
pub fn ticks_to_samples(ticks: i64, sample_rate: u32) -> usize {
    assert!(sample_rate > 0, "sample_rate must be > 0");

    // Formula: (ticks × sample_rate) ÷ TICK_RATE
    let samples = (ticks.max(0) as i128 * sample_rate as i128) / TICK_RATE as i128;
    samples as usize
}

/// Convert a frame count to ticks at a given sample rate
///
/// ```rust
/// use vamp_common::timing::samples_to_ticks;
///
/// assert_eq!(samples_to_ticks(1, 44100), 640);
/// assert_eq!(samples_to_ticks(44100, 44100), 28_224_000);
/// ```
///
/// # Panics
///
/// Panics if `sample_rate` is 0
pub fn samples_to_ticks(samples: usize, sample_rate: u32) -> i64 {
    assert!(sample_rate > 0, "sample_rate must be > 0");

    (samples as i128 * TICK_RATE as i128 / sample_rate as i128) as i64
}

/// Convert a millisecond window (fade width, patch length) to a frame count
pub fn ms_to_samples(milliseconds: u32, sample_rate: u32) -> usize {
    ticks_to_samples(ms_to_ticks(milliseconds as i64), sample_rate)
}

/// Convert ticks to seconds (f64) for display and event payloads
///
/// ```rust
/// use vamp_common::timing::ticks_to_seconds;
///
/// assert_eq!(ticks_to_seconds(28_224_000), 1.0);
/// ```
pub fn ticks_to_seconds(ticks: i64) -> f64 {
    ticks as f64 / TICK_RATE as f64
}

/// Convert seconds to ticks (rounded to nearest tick)
///
/// ```rust
/// use vamp_common::timing::seconds_to_ticks;
///
/// assert_eq!(seconds_to_ticks(0.5), 14_112_000);
/// assert_eq!(seconds_to_ticks(120.0), 3_386_880_000);
/// ```
pub fn seconds_to_ticks(seconds: f64) -> i64 {
    (seconds * TICK_RATE as f64).round() as i64
}

/// Get ticks per sample for a given sample rate
///
/// Checks the lookup table first, then falls back to division for
/// non-standard rates.
///
/// # Panics
///
/// Panics if `sample_rate` is 0
pub fn ticks_per_sample(sample_rate: u32) -> i64 {
    assert!(sample_rate > 0, "sample_rate must be > 0");

    if let Some(&(_, ticks)) = TICKS_PER_SAMPLE_TABLE
        .iter()
        .find(|(rate, _)| *rate == sample_rate)
    {
        return ticks;
    }

    TICK_RATE / sample_rate as i64
}

/// Snap a tick value down to the nearest frame boundary
///
/// Loop points edited in seconds are snapped before they are stored so
/// the slice boundaries and the stored region agree exactly.
pub fn snap_to_frame(ticks: i64, sample_rate: u32) -> i64 {
    samples_to_ticks(ticks_to_samples(ticks, sample_rate), sample_rate)
}

/// Format ticks as `M:SS.mmm` for log lines
pub fn format_ticks(ticks: i64) -> String {
    let total_ms = ticks_to_ms(ticks.max(0));
    let minutes = total_ms / 60_000;
    let seconds = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{}:{:02}.{:03}", minutes, seconds, millis)
}

#[cfg(test)]
#[path = "timing_tests.rs"]
mod tests;
