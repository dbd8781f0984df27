//! Software implementation of both playback backends
//!
//! [`SoftwareDeck`] mixes a streaming transport voice and a closed-loop
//! voice into one interleaved output. The audio callback (or a test) pulls
//! frames through [`DeckRenderer::render`]; the controller drives the voices
//! through [`SoftwareTransport`] and [`SoftwareLooper`].
//!
//! Voice state lives behind one mutex that the render path holds for a
//! whole block. Positions are republished to atomics after every block and
//! every control call, so position reads never take the lock.
//!
//! The transport models a real streaming device: after `start` or `seek`
//! it stays silent for a configurable startup latency before producing
//! audio, and a stopped transport releases over a short ramp instead of
//! cutting.

use super::backend::{LoopBackend, LoopPhase, LoopTail, StreamingBackend};
use crate::audio::Track;
use crate::error::{Error, Result};
use crate::exit_patch::ExitPatch;
use crate::loop_sound::LoopBuffer;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};
use vamp_common::timing::{ms_to_samples, samples_to_ticks, ticks_to_samples};

/// Startup behaviour of the simulated streaming device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeckSettings {
    /// Silence between `start`/`seek` and the first transport frame
    pub startup_latency_ms: u32,
    /// Fade applied to transport audio cut off by `stop`/`seek`/`start`
    pub release_ms: u32,
}

impl Default for DeckSettings {
    fn default() -> Self {
        Self {
            startup_latency_ms: 30,
            release_ms: 5,
        }
    }
}

const PHASE_IDLE: u8 = 0;
const PHASE_LOOPING: u8 = 1;
const PHASE_PATCH: u8 = 2;
const PHASE_FADING: u8 = 3;
const PHASE_FINISHED: u8 = 4;

/// Software mixer owning both voices
#[derive(Clone)]
pub struct SoftwareDeck {
    shared: Arc<DeckShared>,
}

/// Streaming backend handle
pub struct SoftwareTransport {
    shared: Arc<DeckShared>,
}

/// Closed-loop backend handle
pub struct SoftwareLooper {
    shared: Arc<DeckShared>,
}

/// Pull side of the deck, moved into the audio callback
#[derive(Clone)]
pub struct DeckRenderer {
    shared: Arc<DeckShared>,
}

struct DeckShared {
    state: Mutex<DeckState>,
    sample_rate: AtomicU32,
    transport_frame: AtomicU64,
    transport_producing: AtomicBool,
    transport_finished: AtomicBool,
    cycle_frame: AtomicU64,
    cycles: AtomicU64,
    phase: AtomicU8,
    /// Track position of the playing exit patch, -1 when none
    patch_ticks: AtomicI64,
}

struct DeckState {
    settings: DeckSettings,
    sample_rate: u32,
    channels: u16,
    transport: TransportVoice,
    looper: LoopVoice,
    release: Option<Release>,
}

#[derive(Default)]
struct TransportVoice {
    track: Option<Arc<Track>>,
    cursor: usize,
    running: bool,
    paused: bool,
    warmup: usize,
    finished: bool,
}

impl TransportVoice {
    fn is_producing(&self) -> bool {
        self.running && !self.paused && !self.finished && self.warmup == 0
    }
}

/// Transport audio fading out after being cut off
struct Release {
    track: Arc<Track>,
    cursor: usize,
    remaining: usize,
    total: usize,
}

enum PendingFinish {
    Boundary(LoopTail),
    AtFrame(ExitPatch),
}

enum ActiveTail {
    None,
    Patch { patch: ExitPatch, pos: usize },
    Fade { pos: usize, total: usize },
}

struct LoopVoice {
    loaded: Option<Arc<LoopBuffer>>,
    buffer: Option<Arc<LoopBuffer>>,
    running: bool,
    paused: bool,
    finished: bool,
    cursor: usize,
    cycles: u64,
    fade_in_pos: usize,
    fade_in_total: usize,
    pending: Option<PendingFinish>,
    tail: ActiveTail,
}

impl Default for LoopVoice {
    fn default() -> Self {
        Self {
            loaded: None,
            buffer: None,
            running: false,
            paused: false,
            finished: false,
            cursor: 0,
            cycles: 0,
            fade_in_pos: 0,
            fade_in_total: 0,
            pending: None,
            tail: ActiveTail::None,
        }
    }
}

impl LoopVoice {
    fn phase(&self) -> u8 {
        if !self.running {
            if self.finished {
                PHASE_FINISHED
            } else {
                PHASE_IDLE
            }
        } else {
            match self.tail {
                ActiveTail::None => PHASE_LOOPING,
                ActiveTail::Patch { .. } => PHASE_PATCH,
                ActiveTail::Fade { .. } => PHASE_FADING,
            }
        }
    }

    fn start_tail(&mut self, tail: LoopTail, sample_rate: u32) {
        match tail {
            LoopTail::Patch(patch) => self.start_patch(patch),
            LoopTail::FadeOut { duration } => {
                let total = ticks_to_samples(duration, sample_rate).max(1);
                self.tail = ActiveTail::Fade { pos: 0, total };
            }
        }
    }

    fn start_patch(&mut self, patch: ExitPatch) {
        if patch.is_empty() {
            self.finish();
        } else {
            self.tail = ActiveTail::Patch { patch, pos: 0 };
        }
    }

    fn finish(&mut self) {
        self.running = false;
        self.finished = true;
        self.pending = None;
        self.tail = ActiveTail::None;
    }

    /// Mix one loop frame into `frame`; returns the gain left for the
    /// transport
    fn render(&mut self, frame: &mut [f32], sample_rate: u32) -> f32 {
        if !self.running || self.paused {
            return 1.0;
        }

        if let Some(PendingFinish::AtFrame(patch)) = &self.pending {
            if patch.continuation_frame() == self.cursor {
                if let Some(PendingFinish::AtFrame(patch)) = self.pending.take() {
                    self.start_patch(patch);
                }
                if !self.running {
                    return 1.0;
                }
            }
        }

        if let ActiveTail::Patch { patch, pos } = &mut self.tail {
            let ch = frame.len();
            let gain = patch.tail_gain(*pos);
            let src = &patch.samples()[*pos * ch..(*pos + 1) * ch];
            for (out, s) in frame.iter_mut().zip(src) {
                *out += *s;
            }
            *pos += 1;
            if *pos >= patch.frames() {
                self.finish();
            }
            return 1.0 - gain;
        }

        let buffer = match &self.buffer {
            Some(buffer) => buffer,
            None => return 1.0,
        };

        let mut gain = 1.0;
        if self.fade_in_pos < self.fade_in_total {
            self.fade_in_pos += 1;
            gain = self.fade_in_pos as f32 / self.fade_in_total as f32;
        }

        let mut fade_done = false;
        if let ActiveTail::Fade { pos, total } = &mut self.tail {
            *pos += 1;
            gain *= 1.0 - (*pos as f32 / *total as f32).min(1.0);
            fade_done = *pos >= *total;
        }

        for (out, s) in frame.iter_mut().zip(buffer.frame(self.cursor)) {
            *out += *s * gain;
        }

        self.cursor += 1;
        if self.cursor >= buffer.frames() {
            self.cursor = 0;
            self.cycles += 1;
            if let Some(PendingFinish::Boundary(_)) = &self.pending {
                if let Some(PendingFinish::Boundary(tail)) = self.pending.take() {
                    self.start_tail(tail, sample_rate);
                }
            }
        }

        if fade_done {
            self.finish();
        }
        1.0
    }
}

impl DeckState {
    fn new(settings: DeckSettings, sample_rate: u32, channels: u16) -> Self {
        Self {
            settings,
            sample_rate,
            channels,
            transport: TransportVoice::default(),
            looper: LoopVoice::default(),
            release: None,
        }
    }

    fn latency_frames(&self) -> usize {
        ms_to_samples(self.settings.startup_latency_ms, self.sample_rate)
    }

    /// Keep the audio that is being cut off audible for a short ramp
    fn release_transport(&mut self) {
        if !self.transport.is_producing() {
            return;
        }
        let total = ms_to_samples(self.settings.release_ms, self.sample_rate);
        if total == 0 {
            return;
        }
        if let Some(track) = &self.transport.track {
            self.release = Some(Release {
                track: Arc::clone(track),
                cursor: self.transport.cursor,
                remaining: total,
                total,
            });
        }
    }

    fn render_frame(&mut self, frame: &mut [f32]) {
        let transport_gain = self.looper.render(frame, self.sample_rate);

        let tv = &mut self.transport;
        if tv.running && !tv.paused && !tv.finished {
            if let Some(track) = &tv.track {
                if tv.warmup > 0 {
                    tv.warmup -= 1;
                } else if tv.cursor < track.frames() {
                    let src = track.frame_range(tv.cursor, tv.cursor + 1);
                    for (out, s) in frame.iter_mut().zip(src) {
                        *out += *s * transport_gain;
                    }
                    tv.cursor += 1;
                    if tv.cursor >= track.frames() {
                        tv.finished = true;
                    }
                } else {
                    tv.finished = true;
                }
            }
        }

        let mut release_done = false;
        if let Some(release) = &mut self.release {
            if release.cursor < release.track.frames() && release.remaining > 0 {
                let gain = release.remaining as f32 / (release.total + 1) as f32;
                let src = release.track.frame_range(release.cursor, release.cursor + 1);
                for (out, s) in frame.iter_mut().zip(src) {
                    *out += *s * gain;
                }
                release.cursor += 1;
                release.remaining -= 1;
            }
            release_done = release.remaining == 0 || release.cursor >= release.track.frames();
        }
        if release_done {
            self.release = None;
        }
    }
}

impl DeckShared {
    fn lock(&self) -> MutexGuard<'_, DeckState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Republish voice positions for lock-free readers
    fn publish(&self, state: &DeckState) {
        self.sample_rate.store(state.sample_rate, Ordering::Release);
        self.transport_frame
            .store(state.transport.cursor as u64, Ordering::Release);
        self.transport_producing
            .store(state.transport.is_producing(), Ordering::Release);
        self.transport_finished
            .store(state.transport.finished, Ordering::Release);
        self.cycle_frame
            .store(state.looper.cursor as u64, Ordering::Release);
        self.cycles.store(state.looper.cycles, Ordering::Release);
        self.phase.store(state.looper.phase(), Ordering::Release);
        let patch_ticks = match &state.looper.tail {
            ActiveTail::Patch { patch, pos } => patch.ticks_at(*pos),
            _ => -1,
        };
        self.patch_ticks.store(patch_ticks, Ordering::Release);
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut DeckState) -> R) -> R {
        let mut state = self.lock();
        let result = f(&mut state);
        self.publish(&state);
        result
    }

    fn ticks(&self, frames: u64) -> i64 {
        samples_to_ticks(frames as usize, self.sample_rate.load(Ordering::Acquire).max(1))
    }
}

impl SoftwareDeck {
    /// Create a deck for the given output format
    ///
    /// Loading a track switches the deck to the track's format.
    pub fn new(settings: DeckSettings, sample_rate: u32, channels: u16) -> Self {
        let state = DeckState::new(settings, sample_rate.max(1), channels.max(1));
        let shared = Arc::new(DeckShared {
            state: Mutex::new(state),
            sample_rate: AtomicU32::new(sample_rate.max(1)),
            transport_frame: AtomicU64::new(0),
            transport_producing: AtomicBool::new(false),
            transport_finished: AtomicBool::new(false),
            cycle_frame: AtomicU64::new(0),
            cycles: AtomicU64::new(0),
            phase: AtomicU8::new(PHASE_IDLE),
            patch_ticks: AtomicI64::new(-1),
        });
        Self { shared }
    }

    pub fn transport(&self) -> SoftwareTransport {
        SoftwareTransport {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn looper(&self) -> SoftwareLooper {
        SoftwareLooper {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn renderer(&self) -> DeckRenderer {
        DeckRenderer {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn channels(&self) -> u16 {
        self.shared.lock().channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.shared.sample_rate.load(Ordering::Acquire)
    }
}

impl DeckRenderer {
    /// Fill `out` (interleaved, deck channel count) with the next frames
    pub fn render(&self, out: &mut [f32]) {
        let mut state = self.shared.lock();
        let ch = state.channels as usize;
        out.fill(0.0);
        for frame in out.chunks_exact_mut(ch) {
            state.render_frame(frame);
        }
        self.shared.publish(&state);
    }

    /// Render `frames` frames into a new vector
    pub fn render_frames(&self, frames: usize) -> Vec<f32> {
        let ch = self.channels() as usize;
        let mut out = vec![0.0; frames * ch];
        self.render(&mut out);
        out
    }

    pub fn channels(&self) -> u16 {
        self.shared.lock().channels
    }
}

impl StreamingBackend for SoftwareTransport {
    fn load_track(&mut self, track: Arc<Track>) {
        self.shared.with_state(|state| {
            state.sample_rate = track.sample_rate();
            state.channels = track.channels();
            state.release = None;
            state.looper = LoopVoice::default();
            state.transport = TransportVoice {
                track: Some(track),
                ..TransportVoice::default()
            };
        });
    }

    fn start(&mut self, position: i64) -> Result<()> {
        self.shared.with_state(|state| {
            let frames = match &state.transport.track {
                Some(track) => track.frames(),
                None => return Err(Error::BackendStart("no track loaded".to_string())),
            };
            state.release_transport();
            let latency = state.latency_frames();
            let tv = &mut state.transport;
            tv.cursor = ticks_to_samples(position, state.sample_rate).min(frames);
            tv.running = true;
            tv.paused = false;
            tv.finished = tv.cursor >= frames;
            tv.warmup = latency;
            debug!("Transport start at frame {} ({} frame warmup)", tv.cursor, latency);
            Ok(())
        })
    }

    fn pause(&mut self) {
        self.shared.with_state(|state| {
            if state.transport.running {
                state.transport.paused = true;
            }
        });
    }

    fn resume(&mut self) {
        self.shared.with_state(|state| state.transport.paused = false);
    }

    fn stop(&mut self) {
        self.shared.with_state(|state| {
            state.release_transport();
            let tv = &mut state.transport;
            tv.running = false;
            tv.paused = false;
            tv.finished = false;
            tv.warmup = 0;
        });
    }

    fn seek(&mut self, position: i64) {
        self.shared.with_state(|state| {
            state.release_transport();
            let latency = state.latency_frames();
            let frames = state.transport.track.as_ref().map_or(0, |t| t.frames());
            let tv = &mut state.transport;
            tv.cursor = ticks_to_samples(position, state.sample_rate).min(frames);
            tv.finished = tv.running && tv.cursor >= frames;
            if tv.running {
                tv.warmup = latency;
            }
        });
    }

    fn current_position(&self) -> i64 {
        self.shared
            .ticks(self.shared.transport_frame.load(Ordering::Acquire))
    }

    fn is_producing(&self) -> bool {
        self.shared.transport_producing.load(Ordering::Acquire)
    }

    fn is_finished(&self) -> bool {
        self.shared.transport_finished.load(Ordering::Acquire)
    }
}

impl LoopBackend for SoftwareLooper {
    fn load_buffer(&mut self, buffer: Arc<LoopBuffer>) {
        self.shared
            .with_state(|state| state.looper.loaded = Some(buffer));
    }

    fn play_infinite(&mut self, offset: i64, fade_in_ms: u32) -> Result<()> {
        self.shared.with_state(|state| {
            let buffer = state
                .looper
                .loaded
                .clone()
                .ok_or_else(|| Error::BackendStart("no loop buffer loaded".to_string()))?;
            let fade_in_total = ms_to_samples(fade_in_ms, state.sample_rate);
            let lv = &mut state.looper;
            lv.cursor = ticks_to_samples(offset, state.sample_rate) % buffer.frames();
            lv.buffer = Some(buffer);
            lv.running = true;
            lv.paused = false;
            lv.finished = false;
            lv.cycles = 0;
            lv.fade_in_pos = 0;
            lv.fade_in_total = fade_in_total;
            lv.pending = None;
            lv.tail = ActiveTail::None;
            debug!("Loop start at cycle frame {}", lv.cursor);
            Ok(())
        })
    }

    fn pause(&mut self) {
        self.shared.with_state(|state| {
            if state.looper.running {
                state.looper.paused = true;
            }
        });
    }

    fn resume(&mut self) {
        self.shared.with_state(|state| state.looper.paused = false);
    }

    fn stop(&mut self) {
        self.shared.with_state(|state| {
            let lv = &mut state.looper;
            lv.running = false;
            lv.paused = false;
            lv.finished = false;
            lv.pending = None;
            lv.tail = ActiveTail::None;
        });
    }

    fn current_cycle_position(&self) -> i64 {
        self.shared.ticks(self.shared.cycle_frame.load(Ordering::Acquire))
    }

    fn completed_cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::Acquire)
    }

    fn play_patch(&mut self, patch: ExitPatch) {
        self.shared.with_state(|state| {
            let lv = &mut state.looper;
            let len = match (&lv.buffer, lv.running) {
                (Some(buffer), true) => buffer.frames(),
                _ => {
                    warn!("Exit patch requested while the loop is not running");
                    return;
                }
            };
            let target = patch.continuation_frame() % len;
            let distance = (target + len - lv.cursor) % len;
            if distance > len / 2 {
                // Takeover frame already passed; switch now
                lv.start_patch(patch);
            } else {
                lv.pending = Some(PendingFinish::AtFrame(patch));
            }
        });
    }

    fn finish_at_boundary(&mut self, tail: LoopTail) {
        self.shared.with_state(|state| {
            if state.looper.running {
                state.looper.pending = Some(PendingFinish::Boundary(tail));
            }
        });
    }

    fn fade_out(&mut self, duration: i64) {
        self.shared.with_state(|state| {
            let rate = state.sample_rate;
            let lv = &mut state.looper;
            if lv.running {
                lv.pending = None;
                lv.start_tail(LoopTail::FadeOut { duration }, rate);
            }
        });
    }

    fn phase(&self) -> LoopPhase {
        match self.shared.phase.load(Ordering::Acquire) {
            PHASE_LOOPING => LoopPhase::Looping,
            PHASE_PATCH => LoopPhase::Patch,
            PHASE_FADING => LoopPhase::FadingOut,
            PHASE_FINISHED => LoopPhase::Finished,
            _ => LoopPhase::Idle,
        }
    }

    fn patch_position(&self) -> Option<i64> {
        let ticks = self.shared.patch_ticks.load(Ordering::Acquire);
        (ticks >= 0).then_some(ticks)
    }
}
