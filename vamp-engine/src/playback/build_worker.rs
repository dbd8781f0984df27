//! Loop builds on the blocking thread pool
//!
//! Building a loop buffer copies and crossfades the whole region, which
//! can take milliseconds for long vamps. The monitor must keep its cadence,
//! so builds run under `spawn_blocking` and report back through the
//! monitor's command channel.

use super::controller::BuildRequest;
use super::monitor::PlayerCommand;
use crate::loop_sound::LoopSoundBuilder;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Handle on a build in flight
#[derive(Debug)]
pub struct BuildJob {
    version: u64,
    cancel: Arc<AtomicBool>,
}

impl BuildJob {
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Ask the build to stop; its result will be `BuildCancelled`
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }
}

/// Start building `request`; the result arrives as
/// [`PlayerCommand::BuildFinished`] on `results`
pub fn spawn_build(
    builder: LoopSoundBuilder,
    request: BuildRequest,
    results: mpsc::Sender<PlayerCommand>,
) -> BuildJob {
    let cancel = Arc::new(AtomicBool::new(false));
    let job = BuildJob {
        version: request.version,
        cancel: Arc::clone(&cancel),
    };

    debug!(
        "Building loop v{} for '{}'",
        request.version, request.region.name
    );

    tokio::task::spawn_blocking(move || {
        let result =
            builder.build_cancellable(&request.track, &request.region, request.version, &cancel);
        let finished = PlayerCommand::BuildFinished {
            version: request.version,
            result,
        };
        if results.blocking_send(finished).is_err() {
            debug!("Monitor gone, dropping loop v{}", request.version);
        }
    });

    job
}
