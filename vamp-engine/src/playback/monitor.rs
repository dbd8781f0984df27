//! Position monitor task
//!
//! The monitor is the single writer of playback state. It owns the
//! [`PlaybackModeController`] and runs two things on one task:
//!
//! - a fixed-rate tick (`monitor_interval_ms`) that polls the backends,
//!   takes due transitions and publishes throttled position updates
//! - a command channel carrying requests from [`PlayerHandle`]s and results
//!   from background loop builds
//!
//! Observers never share a lock with it; they read state through events or
//! a [`PlayerSnapshot`] request.

use super::build_worker::{spawn_build, BuildJob};
use super::controller::{ExitOutcome, ExitStyle, ExitTiming, PlaybackModeController};
use crate::audio::Track;
use crate::error::{Error, Result};
use crate::loop_sound::{LoopBuffer, LoopSoundBuilder};
use crate::region::LoopRegion;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};
use vamp_common::events::{EventBus, EventName, EventSubscription, PlaybackMode, TrackInfo, VampEvent};

const COMMAND_CAPACITY: usize = 64;

/// Requests handled by the monitor task
#[derive(Debug)]
pub enum PlayerCommand {
    Play {
        reply: oneshot::Sender<Result<()>>,
    },
    Pause,
    Resume,
    Stop,
    Seek {
        position: i64,
        reply: oneshot::Sender<Result<()>>,
    },
    LoadSong {
        track: Arc<Track>,
        region: Option<LoopRegion>,
    },
    SetRegion {
        region: LoopRegion,
        reply: oneshot::Sender<Result<u64>>,
    },
    SetLoopPoints {
        loop_in: i64,
        loop_out: i64,
        reply: oneshot::Sender<Result<u64>>,
    },
    ClearRegion,
    RequestExit {
        timing: ExitTiming,
        style: ExitStyle,
        reply: oneshot::Sender<Result<ExitOutcome>>,
    },
    Snapshot {
        reply: oneshot::Sender<PlayerSnapshot>,
    },
    /// Result of a background loop build
    BuildFinished {
        version: u64,
        result: Result<LoopBuffer>,
    },
    Shutdown,
}

/// Point-in-time view of the player
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub mode: PlaybackMode,
    pub paused: bool,
    pub position_ticks: i64,
    pub in_loop: bool,
    pub region: Option<LoopRegion>,
    pub region_version: u64,
    pub loop_ready: bool,
    pub skip_queued: bool,
    pub completed_cycles: u64,
    pub track: Option<TrackInfo>,
}

/// Cloneable front end to the monitor task
#[derive(Clone)]
pub struct PlayerHandle {
    tx: mpsc::Sender<PlayerCommand>,
    events: EventBus,
}

impl PlayerHandle {
    async fn send(&self, command: PlayerCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| Error::MonitorStopped)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> PlayerCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| Error::MonitorStopped)
    }

    pub async fn play(&self) -> Result<()> {
        self.request(|reply| PlayerCommand::Play { reply }).await?
    }

    pub async fn pause(&self) -> Result<()> {
        self.send(PlayerCommand::Pause).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.send(PlayerCommand::Resume).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(PlayerCommand::Stop).await
    }

    pub async fn seek(&self, position: i64) -> Result<()> {
        self.request(|reply| PlayerCommand::Seek { position, reply })
            .await?
    }

    pub async fn load_song(&self, track: Arc<Track>, region: Option<LoopRegion>) -> Result<()> {
        self.send(PlayerCommand::LoadSong { track, region }).await
    }

    /// Arm `region`; returns the new region version
    pub async fn set_region(&self, region: LoopRegion) -> Result<u64> {
        self.request(|reply| PlayerCommand::SetRegion { region, reply })
            .await?
    }

    pub async fn set_loop_points(&self, loop_in: i64, loop_out: i64) -> Result<u64> {
        self.request(|reply| PlayerCommand::SetLoopPoints {
            loop_in,
            loop_out,
            reply,
        })
        .await?
    }

    pub async fn clear_region(&self) -> Result<()> {
        self.send(PlayerCommand::ClearRegion).await
    }

    pub async fn request_exit(&self, timing: ExitTiming, style: ExitStyle) -> Result<ExitOutcome> {
        self.request(|reply| PlayerCommand::RequestExit {
            timing,
            style,
            reply,
        })
        .await?
    }

    pub async fn snapshot(&self) -> Result<PlayerSnapshot> {
        self.request(|reply| PlayerCommand::Snapshot { reply }).await
    }

    /// Stop playback and end the monitor task
    pub async fn shutdown(&self) -> Result<()> {
        self.send(PlayerCommand::Shutdown).await
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self, name: EventName) -> EventSubscription {
        self.events.subscribe(name)
    }
}

/// The monitor task state
pub struct PositionMonitor {
    controller: PlaybackModeController,
    rx: mpsc::Receiver<PlayerCommand>,
    /// Lets build workers report back without keeping the task alive
    results: mpsc::WeakSender<PlayerCommand>,
    builder: LoopSoundBuilder,
    build: Option<BuildJob>,
    interval: Duration,
    position_interval: Duration,
    last_position: Option<(Instant, i64)>,
}

impl PositionMonitor {
    /// Spawn the monitor on the current runtime
    ///
    /// The task ends on [`PlayerHandle::shutdown`] or once every handle is
    /// dropped.
    pub fn spawn(controller: PlaybackModeController) -> (PlayerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let config = controller.config();
        let monitor = Self {
            builder: LoopSoundBuilder::from_config(config),
            interval: Duration::from_millis(config.monitor_interval_ms.max(1)),
            position_interval: Duration::from_millis(config.position_update_interval_ms),
            results: tx.downgrade(),
            rx,
            build: None,
            last_position: None,
            controller,
        };
        let handle = PlayerHandle {
            events: monitor.controller.events().clone(),
            tx,
        };
        let task = tokio::spawn(monitor.run());
        (handle, task)
    }

    async fn run(mut self) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Position monitor started ({:?} interval)", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.on_tick(),
                command = self.rx.recv() => match command {
                    Some(PlayerCommand::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
            }
            self.dispatch_builds();
        }

        if let Some(job) = self.build.take() {
            job.cancel();
        }
        self.controller.stop();
        info!("Position monitor stopped");
    }

    fn on_tick(&mut self) {
        self.controller.poll();

        let now = Instant::now();
        let position = self.controller.position();
        let due = match self.last_position {
            None => true,
            Some((at, last)) => {
                now.duration_since(at) >= self.position_interval
                    && (last != position || self.controller.mode().is_playing())
            }
        };
        if due {
            self.last_position = Some((now, position));
            self.controller.events().emit_lossy(VampEvent::PositionUpdate {
                position_ticks: position,
                in_loop: self.controller.in_loop(),
            });
        }
    }

    fn handle(&mut self, command: PlayerCommand) {
        let controller = &mut self.controller;
        match command {
            PlayerCommand::Play { reply } => {
                let _ = reply.send(controller.play());
            }
            PlayerCommand::Pause => controller.pause(),
            PlayerCommand::Resume => controller.resume(),
            PlayerCommand::Stop => controller.stop(),
            PlayerCommand::Seek { position, reply } => {
                let _ = reply.send(controller.seek(position));
            }
            PlayerCommand::LoadSong { track, region } => {
                controller.load_song(track, region);
                self.last_position = None;
            }
            PlayerCommand::SetRegion { region, reply } => {
                let _ = reply.send(controller.set_region(region));
            }
            PlayerCommand::SetLoopPoints {
                loop_in,
                loop_out,
                reply,
            } => {
                let _ = reply.send(controller.set_loop_points(loop_in, loop_out));
            }
            PlayerCommand::ClearRegion => controller.clear_region(),
            PlayerCommand::RequestExit {
                timing,
                style,
                reply,
            } => {
                let _ = reply.send(controller.request_exit(timing, style));
            }
            PlayerCommand::Snapshot { reply } => {
                let _ = reply.send(PlayerSnapshot {
                    mode: controller.mode(),
                    paused: controller.is_paused(),
                    position_ticks: controller.position(),
                    in_loop: controller.in_loop(),
                    region: controller.region().cloned(),
                    region_version: controller.region_version(),
                    loop_ready: controller.is_loop_ready(),
                    skip_queued: controller.is_skip_queued(),
                    completed_cycles: controller.completed_cycles(),
                    track: controller.track().map(|track| track.info()),
                });
            }
            PlayerCommand::BuildFinished { version, result } => {
                if self.build.as_ref().map(BuildJob::version) == Some(version) {
                    self.build = None;
                }
                controller.on_build_finished(version, result);
            }
            PlayerCommand::Shutdown => {}
        }
    }

    /// Cancel an outdated build and start the pending one
    fn dispatch_builds(&mut self) {
        let version = self.controller.region_version();
        if let Some(job) = &self.build {
            if job.version() != version {
                debug!("Cancelling loop build v{} (now v{})", job.version(), version);
                job.cancel();
                self.build = None;
            }
        }

        if let Some(request) = self.controller.take_build_request() {
            if let Some(results) = self.results.upgrade() {
                self.build = Some(spawn_build(self.builder, request, results));
            }
        }
    }
}
