//! Playback mode state machine
//!
//! [`PlaybackModeController`] decides when playback moves between the
//! streaming transport and the closed loop. It never touches samples: it
//! starts and stops backends, asks them for positions, and publishes events
//! once each transition has taken effect.
//!
//! The controller is synchronous and owned by exactly one task (the
//! position monitor). Loop builds are requested through
//! [`take_build_request`](PlaybackModeController::take_build_request) and
//! delivered back through
//! [`on_build_finished`](PlaybackModeController::on_build_finished); a
//! result for an outdated region version is dropped.
//!
//! # Modes
//!
//! ```text
//! Stopped ──play──> TransportPlaying ──enters region──> LoopPlaying
//!    ^                  ^       ^                           │ exit
//!    │                  │       └──transport producing── ExitingLoop
//!    └──stop/song end───┴───────────fade finished────────────┘
//! ```

use super::backend::{LoopBackend, LoopPhase, LoopTail, StreamingBackend};
use crate::audio::Track;
use crate::error::{Error, Result};
use crate::exit_patch::ExitPatchBuilder;
use crate::loop_sound::LoopBuffer;
use crate::region::LoopRegion;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use vamp_common::config::EngineConfig;
use vamp_common::events::{EventBus, PlaybackMode, VampEvent};
use vamp_common::timing::{format_ticks, ms_to_samples, ms_to_ticks, ticks_to_samples};

/// When an exit from loop mode takes effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitTiming {
    /// Leave from the current cycle position
    Immediate,
    /// Finish the current cycle first
    AtBoundary,
}

/// How the loop is left
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStyle {
    /// Splice back into the song through an exit patch
    Patch,
    /// Fade the loop out over the region's exit fade and stop
    Fade,
}

/// Result of an exit request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exit scheduled on the loop backend
    Scheduled,
    /// An exit is already under way; nothing changed
    AlreadyExiting,
    /// Transport playback: the armed region will be skipped this pass
    SkipQueued,
    /// Nothing to exit from
    Ignored,
}

/// A loop build the owner should run off the monitor path
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub track: Arc<Track>,
    pub region: LoopRegion,
    pub version: u64,
}

#[derive(Debug, Clone, Copy)]
struct ExitPlan {
    style: ExitStyle,
    resume_ticks: i64,
    loop_out: i64,
}

/// Per-song state
struct Song {
    track: Arc<Track>,
    region: Option<LoopRegion>,
    /// Buffer for the current region version, once built
    ready: Option<Arc<LoopBuffer>>,
    build_needed: bool,
    /// Armed region skipped for the current pass
    skip: bool,
    /// `loop_not_ready` already sent for the current pass
    not_ready_sent: bool,
}

/// Transport/loop mode switching
pub struct PlaybackModeController {
    config: EngineConfig,
    events: EventBus,
    transport: Box<dyn StreamingBackend>,
    looper: Box<dyn LoopBackend>,
    patch_builder: ExitPatchBuilder,
    song: Option<Song>,
    region_version: u64,
    mode: PlaybackMode,
    paused: bool,
    /// Logical position while stopped
    cursor: i64,
    /// Buffer the loop backend is cycling
    active: Option<Arc<LoopBuffer>>,
    exit: Option<ExitPlan>,
    cycles_seen: u64,
}

impl PlaybackModeController {
    pub fn new(
        config: EngineConfig,
        events: EventBus,
        transport: Box<dyn StreamingBackend>,
        looper: Box<dyn LoopBackend>,
    ) -> Self {
        Self {
            patch_builder: ExitPatchBuilder::new(config.crossfade_curve),
            config,
            events,
            transport,
            looper,
            song: None,
            region_version: 0,
            mode: PlaybackMode::Stopped,
            paused: false,
            cursor: 0,
            active: None,
            exit: None,
            cycles_seen: 0,
        }
    }

    // ========================================
    // Queries
    // ========================================

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn track(&self) -> Option<&Arc<Track>> {
        self.song.as_ref().map(|song| &song.track)
    }

    /// The armed region
    pub fn region(&self) -> Option<&LoopRegion> {
        self.song.as_ref().and_then(|song| song.region.as_ref())
    }

    /// Bumped on every accepted region edit and song load
    pub fn region_version(&self) -> u64 {
        self.region_version
    }

    /// True when a loop buffer for the current region version exists
    pub fn is_loop_ready(&self) -> bool {
        self.song.as_ref().map_or(false, |song| song.ready.is_some())
    }

    pub fn is_skip_queued(&self) -> bool {
        self.song.as_ref().map_or(false, |song| song.skip)
    }

    /// Completed loop cycles since the last loop entry
    pub fn completed_cycles(&self) -> u64 {
        self.looper.completed_cycles()
    }

    /// Logical timeline position
    pub fn position(&self) -> i64 {
        match self.mode {
            PlaybackMode::Stopped => self.cursor,
            PlaybackMode::TransportPlaying => self.transport.current_position(),
            PlaybackMode::LoopPlaying => self.loop_position(),
            PlaybackMode::ExitingLoop => self
                .looper
                .patch_position()
                .unwrap_or_else(|| self.loop_position()),
        }
    }

    /// True while the reported position comes from the loop cycle
    pub fn in_loop(&self) -> bool {
        match self.mode {
            PlaybackMode::LoopPlaying => true,
            PlaybackMode::ExitingLoop => self.looper.patch_position().is_none(),
            _ => false,
        }
    }

    fn loop_position(&self) -> i64 {
        let loop_in = self
            .active
            .as_ref()
            .map_or(0, |buffer| buffer.region().loop_in);
        loop_in + self.looper.current_cycle_position()
    }

    // ========================================
    // Song and region management
    // ========================================

    /// Replace the loaded song, arming `region` when it fits the track
    ///
    /// Starts a new event scope, so subscribers drop anything still queued
    /// from the previous song.
    pub fn load_song(&mut self, track: Arc<Track>, region: Option<LoopRegion>) {
        self.halt_backends();
        self.paused = false;
        self.cursor = 0;
        self.region_version += 1;
        self.events.begin_song_scope();
        self.set_mode(PlaybackMode::Stopped);

        self.transport.load_track(Arc::clone(&track));

        let region = region.and_then(|mut region| {
            match region.fit_to(&track, &self.config) {
                Ok(()) => Some(region),
                Err(e) => {
                    warn!("Saved region '{}' does not fit {}: {}", region.name, track.song_id(), e);
                    self.events.emit_lossy(VampEvent::ErrorNotice {
                        message: format!("Region '{}' dropped: {}", region.name, e),
                    });
                    None
                }
            }
        });

        info!(
            "Loaded song {} ({}, {} Hz, {} ch)",
            track.song_id(),
            format_ticks(track.duration_ticks()),
            track.sample_rate(),
            track.channels()
        );
        self.events.emit_lossy(VampEvent::SongLoaded { track: track.info() });

        let build_needed = region.as_ref().map_or(false, |r| r.active);
        if let Some(region) = &region {
            self.events.emit_lossy(VampEvent::LoopPointsChanged {
                region: region.info(self.region_version),
            });
        }

        self.song = Some(Song {
            track,
            region,
            ready: None,
            build_needed,
            skip: false,
            not_ready_sent: false,
        });
    }

    /// Arm `region`, replacing the current one
    ///
    /// Loop points are checked as given, then snapped to frame boundaries
    /// and validated against the track. A rejected region leaves the armed
    /// region untouched. A loop that is
    /// already cycling keeps its buffer; the next entry uses the new one.
    ///
    /// # Errors
    /// `NotLoaded`, `InvalidRegion`, `InsufficientSamples`
    pub fn set_region(&mut self, mut region: LoopRegion) -> Result<u64> {
        let song = self.song.as_ref().ok_or(Error::NotLoaded)?;
        region.fit_to(&song.track, &self.config)?;

        self.region_version += 1;
        let version = self.region_version;
        self.clear_skip();

        if let Some(song) = self.song.as_mut() {
            info!(
                "Region '{}' set to {} - {} (v{})",
                region.name,
                format_ticks(region.loop_in),
                format_ticks(region.loop_out),
                version
            );
            song.ready = None;
            song.build_needed = region.active;
            song.not_ready_sent = false;
            self.events.emit_lossy(VampEvent::LoopPointsChanged {
                region: region.info(version),
            });
            song.region = Some(region);
        }
        Ok(version)
    }

    /// Move the loop points of the armed region (or create one)
    pub fn set_loop_points(&mut self, loop_in: i64, loop_out: i64) -> Result<u64> {
        let region = match self.region() {
            Some(current) => LoopRegion {
                loop_in,
                loop_out,
                ..current.clone()
            },
            None => LoopRegion::new("Vamp", loop_in, loop_out, &self.config),
        };
        self.set_region(region)
    }

    /// Disarm looping for the loaded song
    pub fn clear_region(&mut self) {
        self.region_version += 1;
        self.clear_skip();
        if let Some(song) = self.song.as_mut() {
            if song.region.take().is_some() {
                info!("Region cleared (v{})", self.region_version);
            }
            song.ready = None;
            song.build_needed = false;
            song.not_ready_sent = false;
        }
    }

    /// Hand out the pending loop build, if any
    pub fn take_build_request(&mut self) -> Option<BuildRequest> {
        let version = self.region_version;
        let song = self.song.as_mut()?;
        if !song.build_needed {
            return None;
        }
        song.build_needed = false;
        let region = song.region.clone()?;
        Some(BuildRequest {
            track: Arc::clone(&song.track),
            region,
            version,
        })
    }

    /// Accept a finished loop build
    pub fn on_build_finished(&mut self, version: u64, result: Result<LoopBuffer>) {
        if version != self.region_version {
            debug!(
                "Discarding loop build v{} (current v{})",
                version, self.region_version
            );
            return;
        }
        let Some(song) = self.song.as_mut() else {
            return;
        };

        match result {
            Ok(buffer) => {
                info!(
                    "Loop v{} ready: {} frames, {:?} seam",
                    version,
                    buffer.frames(),
                    buffer.seam()
                );
                song.ready = Some(Arc::new(buffer));
                self.events.emit_lossy(VampEvent::LoopReady { version });
            }
            Err(Error::BuildCancelled(_)) => {
                debug!("Loop build v{} cancelled", version);
            }
            Err(e) => {
                error!("Loop build v{} failed: {}", version, e);
                self.events.emit_lossy(VampEvent::ErrorNotice {
                    message: format!("Loop build failed: {}", e),
                });
            }
        }
    }

    // ========================================
    // Transport controls
    // ========================================

    /// Start (or resume) playback from the current position
    pub fn play(&mut self) -> Result<()> {
        if self.song.is_none() {
            return Err(Error::NotLoaded);
        }
        if self.paused {
            self.resume();
            return Ok(());
        }
        if self.mode != PlaybackMode::Stopped {
            return Ok(());
        }

        let position = self.cursor;
        match retry_once("transport start", || self.transport.start(position)) {
            Ok(()) => {
                info!("Playing from {}", format_ticks(position));
                self.set_mode(PlaybackMode::TransportPlaying);
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    pub fn pause(&mut self) {
        if self.paused || self.mode == PlaybackMode::Stopped {
            return;
        }
        self.transport.pause();
        self.looper.pause();
        self.paused = true;
        info!("Paused at {}", format_ticks(self.position()));
        self.events.emit_lossy(VampEvent::PlaybackPaused { paused: true });
    }

    pub fn resume(&mut self) {
        if !self.paused {
            return;
        }
        self.transport.resume();
        self.looper.resume();
        self.paused = false;
        info!("Resumed at {}", format_ticks(self.position()));
        self.events.emit_lossy(VampEvent::PlaybackPaused { paused: false });
    }

    /// Stop both backends and rewind to the start
    pub fn stop(&mut self) {
        self.halt_backends();
        self.clear_skip();
        if let Some(song) = self.song.as_mut() {
            song.not_ready_sent = false;
        }
        if self.paused {
            self.paused = false;
            self.events.emit_lossy(VampEvent::PlaybackPaused { paused: false });
        }
        self.cursor = 0;
        self.set_mode(PlaybackMode::Stopped);
    }

    /// Move the logical position
    ///
    /// While playing this always lands in transport mode (dropping a loop
    /// in progress); the region is re-evaluated on the next poll. While
    /// stopped only the cursor moves.
    pub fn seek(&mut self, position: i64) -> Result<()> {
        let duration = self
            .track()
            .map(|track| track.duration_ticks())
            .ok_or(Error::NotLoaded)?;
        let position = position.clamp(0, duration);

        self.clear_skip();
        if let Some(song) = self.song.as_mut() {
            song.not_ready_sent = false;
        }

        match self.mode {
            PlaybackMode::Stopped => {
                self.cursor = position;
                debug!("Cursor moved to {}", format_ticks(position));
                return Ok(());
            }
            PlaybackMode::TransportPlaying => {
                self.transport.seek(position);
            }
            PlaybackMode::LoopPlaying | PlaybackMode::ExitingLoop => {
                let left_at = self.position();
                let was_loop = self.mode == PlaybackMode::LoopPlaying;
                self.looper.stop();
                self.active = None;
                self.exit = None;

                if let Err(e) = retry_once("transport start", || self.transport.start(position)) {
                    self.fail(&e);
                    return Err(e);
                }
                if self.paused {
                    self.transport.pause();
                }
                self.set_mode(PlaybackMode::TransportPlaying);
                if was_loop {
                    self.events.emit_lossy(VampEvent::LoopModeExit {
                        exit_position_ticks: left_at,
                    });
                }
            }
        }
        info!("Seek to {}", format_ticks(position));
        Ok(())
    }

    /// Leave loop mode, or skip the armed region when not looping
    ///
    /// Repeated requests while an exit is under way change nothing.
    pub fn request_exit(&mut self, timing: ExitTiming, style: ExitStyle) -> Result<ExitOutcome> {
        match self.mode {
            PlaybackMode::Stopped => Ok(ExitOutcome::Ignored),
            PlaybackMode::ExitingLoop => Ok(ExitOutcome::AlreadyExiting),
            PlaybackMode::TransportPlaying => Ok(self.queue_skip()),
            PlaybackMode::LoopPlaying => {
                if self.exit.is_some() {
                    debug!("Exit already scheduled");
                    return Ok(ExitOutcome::AlreadyExiting);
                }
                self.schedule_exit(timing, style)?;
                Ok(ExitOutcome::Scheduled)
            }
        }
    }

    fn queue_skip(&mut self) -> ExitOutcome {
        let position = self.transport.current_position();
        let Some(song) = self.song.as_mut() else {
            return ExitOutcome::Ignored;
        };
        let name = match &song.region {
            Some(region) if region.active && position < region.loop_out => region.name.clone(),
            _ => return ExitOutcome::Ignored,
        };
        if !song.skip {
            song.skip = true;
            info!("Skipping vamp '{}' this pass", name);
            self.events
                .emit_lossy(VampEvent::LoopSkipQueued { region_name: name });
        }
        ExitOutcome::SkipQueued
    }

    fn schedule_exit(&mut self, timing: ExitTiming, style: ExitStyle) -> Result<()> {
        let buffer = self.active.clone().ok_or(Error::NotLoaded)?;
        let track = self.track().cloned().ok_or(Error::NotLoaded)?;
        let region = buffer.region();

        let plan = match style {
            ExitStyle::Patch => {
                let settings = region.exit_settings(&self.config);
                let patch = match timing {
                    ExitTiming::AtBoundary => self.patch_builder.build(&buffer, &track, &settings)?,
                    ExitTiming::Immediate => {
                        let rate = track.sample_rate();
                        let lead = ms_to_samples(self.config.exit_boundary_threshold_ms, rate);
                        let now = ticks_to_samples(self.looper.current_cycle_position(), rate);
                        self.patch_builder
                            .build_at(&buffer, &track, &settings, now + lead)?
                    }
                };
                let plan = ExitPlan {
                    style,
                    resume_ticks: patch.resume_ticks(),
                    loop_out: region.loop_out,
                };
                match timing {
                    ExitTiming::AtBoundary => self.looper.finish_at_boundary(LoopTail::Patch(patch)),
                    ExitTiming::Immediate => self.looper.play_patch(patch),
                }
                plan
            }
            ExitStyle::Fade => {
                let duration = ms_to_ticks(region.exit_fade_ms as i64);
                match timing {
                    ExitTiming::AtBoundary => {
                        self.looper.finish_at_boundary(LoopTail::FadeOut { duration })
                    }
                    ExitTiming::Immediate => self.looper.fade_out(duration),
                }
                ExitPlan {
                    style,
                    resume_ticks: region.loop_out,
                    loop_out: region.loop_out,
                }
            }
        };

        info!(
            "Exit from '{}' scheduled ({:?}, {:?}) at cycle position {}",
            region.name,
            timing,
            style,
            format_ticks(self.looper.current_cycle_position())
        );
        self.exit = Some(plan);
        Ok(())
    }

    // ========================================
    // Monitor pass
    // ========================================

    /// One monitor pass: observe the backends and take due transitions
    pub fn poll(&mut self) {
        match self.mode {
            PlaybackMode::Stopped => {}
            PlaybackMode::TransportPlaying => self.poll_transport(),
            PlaybackMode::LoopPlaying => self.poll_loop(),
            PlaybackMode::ExitingLoop => self.poll_exit(),
        }
    }

    fn poll_transport(&mut self) {
        if self.transport.is_finished() {
            self.end_of_song();
            return;
        }
        if self.paused {
            return;
        }

        let position = self.transport.current_position();
        let version = self.region_version;
        let Some(song) = self.song.as_mut() else {
            return;
        };
        let Some(region) = song.region.as_ref().filter(|r| r.active) else {
            return;
        };

        if song.skip {
            if position >= region.loop_out {
                song.skip = false;
                info!("Vamp '{}' passed, re-armed", region.name);
                self.events.emit_lossy(VampEvent::LoopSkipCleared);
            }
            return;
        }

        if !region.contains(position) {
            song.not_ready_sent = false;
            return;
        }

        match song.ready.clone() {
            Some(buffer) => self.enter_loop(buffer, position),
            None => {
                if !song.not_ready_sent {
                    song.not_ready_sent = true;
                    warn!(
                        "Inside vamp '{}' at {} but loop v{} is not built; staying in transport",
                        region.name,
                        format_ticks(position),
                        version
                    );
                    self.events.emit_lossy(VampEvent::LoopNotReady { version });
                }
            }
        }
    }

    fn enter_loop(&mut self, buffer: Arc<LoopBuffer>, position: i64) {
        let region = buffer.region().clone();
        let offset = position - region.loop_in;

        self.transport.stop();
        self.looper.load_buffer(Arc::clone(&buffer));
        let fade_in = region.entry_fade_ms;
        if let Err(e) = retry_once("loop start", || self.looper.play_infinite(offset, fade_in)) {
            self.fail(&e);
            return;
        }

        self.active = Some(buffer);
        self.exit = None;
        self.cycles_seen = 0;
        info!(
            "Entered vamp '{}' at {} (cycle offset {})",
            region.name,
            format_ticks(position),
            format_ticks(offset)
        );
        self.set_mode(PlaybackMode::LoopPlaying);
        self.events.emit_lossy(VampEvent::LoopModeEnter {
            region_id: region.id,
            cycle_offset_ticks: offset,
        });
    }

    fn poll_loop(&mut self) {
        let cycles = self.looper.completed_cycles();
        if cycles != self.cycles_seen {
            debug!("Loop wrapped ({} cycles)", cycles);
            self.cycles_seen = cycles;
        }

        let Some(plan) = self.exit else {
            if !self.looper.is_active() && !self.paused {
                // Backend dropped the loop on its own
                self.fail(&Error::BackendStart("loop backend stopped unexpectedly".to_string()));
            }
            return;
        };

        match (plan.style, self.looper.phase()) {
            (ExitStyle::Patch, LoopPhase::Patch | LoopPhase::Finished) => {
                self.set_mode(PlaybackMode::ExitingLoop);
                self.events.emit_lossy(VampEvent::LoopModeExit {
                    exit_position_ticks: plan.loop_out,
                });
                info!(
                    "Exit patch playing, priming transport at {}",
                    format_ticks(plan.resume_ticks)
                );
                let resume = plan.resume_ticks;
                if let Err(e) = retry_once("transport start", || self.transport.start(resume)) {
                    self.fail(&e);
                }
            }
            (ExitStyle::Fade, LoopPhase::FadingOut) => {
                let position = self.position();
                self.set_mode(PlaybackMode::ExitingLoop);
                self.events.emit_lossy(VampEvent::LoopModeExit {
                    exit_position_ticks: position,
                });
                info!("Vamp fading out from {}", format_ticks(position));
            }
            (ExitStyle::Fade, LoopPhase::Finished) => {
                // Fade shorter than a poll period: the fading phase was never seen
                if self.mode == PlaybackMode::LoopPlaying {
                    let position = self.position();
                    self.set_mode(PlaybackMode::ExitingLoop);
                    self.events.emit_lossy(VampEvent::LoopModeExit {
                        exit_position_ticks: position,
                    });
                }
                self.finish_fade(plan);
            }
            _ => {}
        }
    }

    fn poll_exit(&mut self) {
        let Some(plan) = self.exit else {
            return;
        };
        match plan.style {
            ExitStyle::Patch => {
                if self.transport.is_producing() {
                    self.exit = None;
                    self.active = None;
                    info!(
                        "Transport producing at {}, exit complete",
                        format_ticks(self.transport.current_position())
                    );
                    self.set_mode(PlaybackMode::TransportPlaying);
                } else if self.transport.is_finished() {
                    self.end_of_song();
                }
            }
            ExitStyle::Fade => {
                if self.looper.phase() == LoopPhase::Finished {
                    self.finish_fade(plan);
                }
            }
        }
    }

    fn finish_fade(&mut self, plan: ExitPlan) {
        self.looper.stop();
        self.active = None;
        self.exit = None;
        self.cursor = plan.loop_out;
        info!("Vamp faded out");
        self.set_mode(PlaybackMode::Stopped);
    }

    fn end_of_song(&mut self) {
        self.halt_backends();
        self.clear_skip();
        self.paused = false;
        self.cursor = 0;
        info!("Song ended");
        self.set_mode(PlaybackMode::Stopped);
        self.events.emit_lossy(VampEvent::SongEnded);
    }

    // ========================================
    // Helpers
    // ========================================

    fn set_mode(&mut self, new_mode: PlaybackMode) {
        if self.mode == new_mode {
            return;
        }
        let old_mode = std::mem::replace(&mut self.mode, new_mode);
        info!("Mode {} -> {}", old_mode, new_mode);
        self.events
            .emit_lossy(VampEvent::state_change(old_mode, new_mode));
    }

    fn halt_backends(&mut self) {
        self.transport.stop();
        self.looper.stop();
        self.active = None;
        self.exit = None;
    }

    fn clear_skip(&mut self) {
        if let Some(song) = self.song.as_mut() {
            if song.skip {
                song.skip = false;
                self.events.emit_lossy(VampEvent::LoopSkipCleared);
            }
        }
    }

    /// Backend failure on the playback path: stop and surface a notice
    fn fail(&mut self, err: &Error) {
        error!("Playback failure: {}", err);
        let position = self.position();
        self.halt_backends();
        self.paused = false;
        self.cursor = position;
        self.set_mode(PlaybackMode::Stopped);
        self.events.emit_lossy(VampEvent::ErrorNotice {
            message: err.to_string(),
        });
    }
}

/// Run a backend start, retrying once on failure
fn retry_once(what: &str, mut op: impl FnMut() -> Result<()>) -> Result<()> {
    match op() {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!("{} failed ({}), retrying once", what, e);
            op()
        }
    }
}
