//! Deterministic playback scenarios
//!
//! Drives a [`PlaybackModeController`] over a [`SoftwareDeck`] by rendering
//! fixed 10 ms blocks and polling after each one, the way the monitor does
//! in real time. Position updates are emitted every block.

use std::sync::Arc;
use vamp_common::config::EngineConfig;
use vamp_common::events::{EventBus, EventName, EventSubscription, PlaybackMode, VampEvent};
use vamp_common::timing::{seconds_to_ticks, ticks_to_seconds};
use vamp_engine::audio::Track;
use vamp_engine::loop_sound::LoopSoundBuilder;
use vamp_engine::playback::{DeckRenderer, DeckSettings, PlaybackModeController, SoftwareDeck};
use vamp_engine::region::LoopRegion;

pub struct Scenario {
    pub controller: PlaybackModeController,
    pub renderer: DeckRenderer,
    events: EventSubscription,
    /// Every event seen so far, in publish order
    pub log: Vec<VampEvent>,
    /// Rendered output while capture is on
    pub captured: Vec<f32>,
    capture: bool,
    block_frames: usize,
}

/// Mono 220 Hz tone, long enough for minute-scale scenarios at low rates
pub fn tone_track(seconds: f64, sample_rate: u32) -> Arc<Track> {
    let frames = (seconds * sample_rate as f64) as usize;
    let step = 2.0 * std::f64::consts::PI * 220.0 / sample_rate as f64;
    let samples = (0..frames)
        .map(|i| ((i as f64 * step).sin() * 0.5) as f32)
        .collect();
    Arc::new(Track::new("tone", "tone.wav", samples, sample_rate, 1).unwrap())
}

impl Scenario {
    pub fn new(track: Arc<Track>, config: EngineConfig) -> Self {
        let deck = SoftwareDeck::new(
            DeckSettings {
                startup_latency_ms: 20,
                release_ms: 5,
            },
            track.sample_rate(),
            track.channels(),
        );
        let bus = EventBus::new(4096);
        let events = bus.subscribe_all();
        let block_frames = (track.sample_rate() / 100) as usize;

        let mut controller = PlaybackModeController::new(
            config,
            bus,
            Box::new(deck.transport()),
            Box::new(deck.looper()),
        );
        controller.load_song(track, None);

        let mut scenario = Self {
            controller,
            renderer: deck.renderer(),
            events,
            log: Vec::new(),
            captured: Vec::new(),
            capture: false,
            block_frames,
        };
        scenario.collect();
        scenario
    }

    /// Arm `loop_in..loop_out` (seconds) and run its build to completion
    pub fn arm(&mut self, loop_in: f64, loop_out: f64, crossfade_ms: u32) -> u64 {
        let mut region = LoopRegion::new(
            "Vamp",
            seconds_to_ticks(loop_in),
            seconds_to_ticks(loop_out),
            self.controller.config(),
        );
        region.crossfade_ms = crossfade_ms;
        let version = self.controller.set_region(region).unwrap();
        self.build();
        version
    }

    /// Run the pending loop build synchronously
    pub fn build(&mut self) {
        if let Some(request) = self.controller.take_build_request() {
            let result = LoopSoundBuilder::from_config(self.controller.config()).build(
                &request.track,
                &request.region,
                request.version,
            );
            self.controller.on_build_finished(request.version, result);
        }
        self.collect();
    }

    pub fn set_capture(&mut self, on: bool) {
        self.capture = on;
    }

    /// Render one 10 ms block, poll and publish the position
    pub fn step(&mut self) {
        let block = self.renderer.render_frames(self.block_frames);
        if self.capture {
            self.captured.extend_from_slice(&block);
        }
        self.controller.poll();
        self.controller.events().emit_lossy(VampEvent::PositionUpdate {
            position_ticks: self.controller.position(),
            in_loop: self.controller.in_loop(),
        });
        self.collect();
    }

    pub fn run_ms(&mut self, ms: u64) {
        for _ in 0..ms / 10 {
            self.step();
        }
    }

    /// Step until `done` holds, for at most `max_ms`; true if it held
    pub fn run_until(&mut self, max_ms: u64, mut done: impl FnMut(&Self) -> bool) -> bool {
        for _ in 0..max_ms / 10 {
            if done(self) {
                return true;
            }
            self.step();
        }
        done(self)
    }

    pub fn mode(&self) -> PlaybackMode {
        self.controller.mode()
    }

    pub fn position_secs(&self) -> f64 {
        ticks_to_seconds(self.controller.position())
    }

    /// Pull queued events into the log
    pub fn collect(&mut self) {
        let drained = self.events.drain();
        self.log.extend(drained);
    }

    /// Logged event names excluding position updates
    pub fn transitions(&self) -> Vec<EventName> {
        self.log
            .iter()
            .map(VampEvent::name)
            .filter(|name| *name != EventName::PositionUpdate)
            .collect()
    }

    pub fn count(&self, name: EventName) -> usize {
        self.log.iter().filter(|e| e.name() == name).count()
    }

    /// Index of the first logged event with `name`
    pub fn first_index(&self, name: EventName) -> Option<usize> {
        self.log.iter().position(|e| e.name() == name)
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }
}
