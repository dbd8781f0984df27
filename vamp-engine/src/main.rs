//! vamp-engine - play a song with a seamless vamp
//!
//! Opens a file, arms its saved vamp (or one given on the command line),
//! plays through the default audio device and logs every engine event.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vamp_common::config::{load_config, resolve_data_dir};
use vamp_common::events::{EventBus, PlaybackMode, VampEvent};
use vamp_common::timing::{format_ticks, seconds_to_ticks};
use vamp_engine::audio::{AudioOutput, SymphoniaSource};
use vamp_engine::persistence::SongStore;
use vamp_engine::playback::{
    DeckSettings, ExitStyle, ExitTiming, PlaybackModeController, PositionMonitor, SoftwareDeck,
};
use vamp_engine::session::Session;

/// Command-line arguments for vamp-engine
#[derive(Parser, Debug)]
#[command(name = "vamp-engine")]
#[command(about = "Seamless loop playback for a single track")]
#[command(version)]
struct Args {
    /// Audio file to play
    #[arg(required_unless_present = "list_devices")]
    file: Option<PathBuf>,

    /// Loop in point (seconds); needs --loop-out
    #[arg(long, requires = "loop_out")]
    loop_in: Option<f64>,

    /// Loop out point (seconds); needs --loop-in
    #[arg(long, requires = "loop_in")]
    loop_out: Option<f64>,

    /// Configuration file (overrides VAMP_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory for saved vamps
    #[arg(long, env = "VAMP_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Leave the vamp at the boundary after this many cycles
    #[arg(long)]
    exit_after: Option<u64>,

    /// Fade the vamp out instead of continuing the song
    #[arg(long)]
    fade_exit: bool,

    /// Output device name (default device when omitted)
    #[arg(short, long)]
    device: Option<String>,

    /// Print the available output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Output volume, 0.0 to 1.0
    #[arg(long, default_value_t = 1.0)]
    volume: f32,

    /// Save the song's vamps when playback ends
    #[arg(long)]
    save: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;

    let level = &config.logging.level;
    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("vamp_engine={},vamp_common={}", level, level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    info!("Starting vamp-engine v{}", env!("CARGO_PKG_VERSION"));

    if args.list_devices {
        for name in AudioOutput::list_devices().context("Failed to list output devices")? {
            println!("{}", name);
        }
        return Ok(());
    }
    let file = args.file.context("No audio file given")?;

    let data_dir = resolve_data_dir(args.data_dir.as_deref(), &config);
    let store = SongStore::open(&data_dir).context("Failed to open song store")?;

    let deck = SoftwareDeck::new(DeckSettings::default(), 44_100, 2);
    let events = EventBus::new(config.event_capacity);
    let controller = PlaybackModeController::new(
        config.clone(),
        events.clone(),
        Box::new(deck.transport()),
        Box::new(deck.looper()),
    );
    let (player, monitor) = PositionMonitor::spawn(controller);
    let mut subscription = events.subscribe_all();

    let mut session = Session::new(player.clone(), Arc::new(SymphoniaSource), store);
    let track = session
        .open(&file)
        .await
        .with_context(|| format!("Failed to open {}", file.display()))?;

    if let (Some(loop_in), Some(loop_out)) = (args.loop_in, args.loop_out) {
        session
            .set_loop_points(seconds_to_ticks(loop_in), seconds_to_ticks(loop_out))
            .await
            .context("Invalid loop points")?;
    }

    let mut output = AudioOutput::open(args.device.as_deref(), track.sample_rate(), track.channels())
        .context("Failed to open audio output")?;
    output.set_volume(args.volume);
    output
        .start(deck.renderer())
        .context("Failed to start audio output")?;
    info!(
        "Output: {} at {} Hz, volume {:.2}",
        output.device_name(),
        output.sample_rate(),
        output.volume()
    );
    let health = output.health();
    let mut health_check = interval(Duration::from_millis(500));
    health_check.set_missed_tick_behavior(MissedTickBehavior::Skip);

    player.play().await.context("Failed to start playback")?;

    let exit_style = if args.fade_exit {
        ExitStyle::Fade
    } else {
        ExitStyle::Patch
    };
    let mut exit_requested = false;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = health_check.tick() => {
                if let Some(count) = health.take_errors() {
                    warn!("Audio output failed ({} stream errors), stopping", count);
                    player.stop().await.ok();
                    events.emit_lossy(VampEvent::ErrorNotice {
                        message: format!("Audio output failed ({} stream errors)", count),
                    });
                    break;
                }
            }
            event = subscription.recv() => {
                let Some(event) = event else { break };
                match &event {
                    VampEvent::PositionUpdate { .. } => {}
                    other => info!("event: {}", serde_json::to_string(other)?),
                }
                match event {
                    VampEvent::PositionUpdate { position_ticks, in_loop: true } => {
                        if let Some(cycles) = args.exit_after {
                            if !exit_requested && player.snapshot().await?.completed_cycles >= cycles {
                                exit_requested = true;
                                info!("Leaving vamp at {}", format_ticks(position_ticks));
                                player.request_exit(ExitTiming::AtBoundary, exit_style).await?;
                            }
                        }
                    }
                    VampEvent::SongEnded => break,
                    VampEvent::StateChange { new_mode: PlaybackMode::Stopped, .. } if exit_requested => break,
                    VampEvent::ErrorNotice { message } => warn!("Engine notice: {}", message),
                    _ => {}
                }
            }
        }
    }

    if args.save {
        session.save().context("Failed to save vamps")?;
    }

    player.shutdown().await.ok();
    monitor.await.context("Monitor task panicked")?;
    output.stop().context("Failed to stop audio output")?;

    info!("vamp-engine stopped");
    Ok(())
}
