//! Playback backend interfaces
//!
//! Two backends share the output: a streaming transport for linear playback
//! and a closed-loop player that repeats a pre-built [`LoopBuffer`] without
//! any help from application code. The controller owns one of each and
//! never touches samples itself.
//!
//! All positions are ticks. Position getters must be cheap (atomic loads):
//! the monitor calls them every few milliseconds.

use crate::audio::Track;
use crate::error::Result;
use crate::exit_patch::ExitPatch;
use crate::loop_sound::LoopBuffer;
use std::sync::Arc;

/// Linear playback of the loaded track
pub trait StreamingBackend: Send {
    /// Replace the track; stops playback
    fn load_track(&mut self, track: Arc<Track>);

    /// Start producing audio from `position`
    ///
    /// Audio may only appear after a startup delay; see
    /// [`is_producing`](Self::is_producing).
    ///
    /// # Errors
    /// `BackendStart` when nothing is loaded or the device refuses
    fn start(&mut self, position: i64) -> Result<()>;

    fn pause(&mut self);

    fn resume(&mut self);

    fn stop(&mut self);

    /// Move the read position; keeps the running/paused state
    fn seek(&mut self, position: i64);

    /// Track position of the next frame to be played
    fn current_position(&self) -> i64;

    /// True once started audio is actually reaching the output
    fn is_producing(&self) -> bool;

    /// True after the last frame of the track was played
    fn is_finished(&self) -> bool;
}

/// What the loop plays once it is told to finish
#[derive(Debug, Clone)]
pub enum LoopTail {
    /// Hand over to an exit patch
    Patch(ExitPatch),
    /// Keep cycling while fading to silence over this many ticks
    FadeOut { duration: i64 },
}

/// Externally visible state of the closed-loop backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    /// Nothing started, or stopped
    Idle,
    /// Cycling (possibly with a finish queued)
    Looping,
    /// Playing an exit patch
    Patch,
    /// Cycling with a fade to silence
    FadingOut,
    /// Tail finished; silent
    Finished,
}

/// Gapless repetition of a pre-built loop buffer
pub trait LoopBackend: Send {
    /// Make `buffer` the buffer used by the next `play_infinite`
    fn load_buffer(&mut self, buffer: Arc<LoopBuffer>);

    /// Start cycling at `offset` ticks into the buffer, fading in over
    /// `fade_in_ms`
    ///
    /// # Errors
    /// `BackendStart` when no buffer is loaded
    fn play_infinite(&mut self, offset: i64, fade_in_ms: u32) -> Result<()>;

    fn pause(&mut self);

    fn resume(&mut self);

    fn stop(&mut self);

    /// Position inside the current cycle
    fn current_cycle_position(&self) -> i64;

    /// Number of completed wraps since `play_infinite`
    fn completed_cycles(&self) -> u64;

    /// Switch to `patch` when the cycle reaches the patch's continuation
    /// frame (immediately if that frame was just passed)
    fn play_patch(&mut self, patch: ExitPatch);

    /// Finish after the current cycle completes, sample-accurately
    fn finish_at_boundary(&mut self, tail: LoopTail);

    /// Start fading to silence right away
    fn fade_out(&mut self, duration: i64);

    fn phase(&self) -> LoopPhase;

    /// Track position of the exit patch while it plays
    fn patch_position(&self) -> Option<i64>;

    /// True while the backend produces audio (cycling or playing a tail)
    fn is_active(&self) -> bool {
        matches!(
            self.phase(),
            LoopPhase::Looping | LoopPhase::Patch | LoopPhase::FadingOut
        )
    }
}
