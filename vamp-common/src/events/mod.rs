//! Event types and the EventBus
//!
//! Every observable engine change is published as a [`VampEvent`] after it
//! took effect. Observers subscribe by [`EventName`] (or to everything) and
//! receive events through an [`EventSubscription`].

mod playback_types;

pub use playback_types::{PlaybackMode, RegionInfo, TrackInfo};

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

/// Vamp event types
///
/// Serialized with an internal `type` tag so UI layers can forward them as
/// JSON without a wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VampEvent {
    /// Logical playback position (throttled by the monitor)
    PositionUpdate {
        /// Position on the track timeline in ticks
        position_ticks: i64,
        /// True while the loop backend is producing the audio
        in_loop: bool,
    },

    /// Playback mode changed
    StateChange {
        old_mode: PlaybackMode,
        new_mode: PlaybackMode,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Loop backend took over from the transport
    LoopModeEnter {
        region_id: Uuid,
        /// Offset into the loop buffer where playback started
        cycle_offset_ticks: i64,
    },

    /// Loop left; the exit patch is bridging to the transport
    LoopModeExit {
        /// Track position where the patch starts (the region's loop out)
        exit_position_ticks: i64,
    },

    /// A new track is loaded and the event scope was reset
    SongLoaded { track: TrackInfo },

    /// Transport reached the end of the track
    SongEnded,

    /// The armed region was edited (or a different region was armed)
    LoopPointsChanged { region: RegionInfo },

    /// A loop buffer for this region version finished building
    LoopReady { version: u64 },

    /// Playback entered the region before its buffer was ready
    LoopNotReady { version: u64 },

    /// The next pass through the region will play straight through
    LoopSkipQueued { region_name: String },

    /// The skipped region is armed again
    LoopSkipCleared,

    /// Pause flag toggled
    PlaybackPaused { paused: bool },

    /// Recoverable failure surfaced to the user
    ErrorNotice { message: String },
}

/// Subscription key: one name per [`VampEvent`] variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    PositionUpdate,
    StateChange,
    LoopModeEnter,
    LoopModeExit,
    SongLoaded,
    SongEnded,
    LoopPointsChanged,
    LoopReady,
    LoopNotReady,
    LoopSkipQueued,
    LoopSkipCleared,
    PlaybackPaused,
    ErrorNotice,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::PositionUpdate => "position_update",
            EventName::StateChange => "state_change",
            EventName::LoopModeEnter => "loop_mode_enter",
            EventName::LoopModeExit => "loop_mode_exit",
            EventName::SongLoaded => "song_loaded",
            EventName::SongEnded => "song_ended",
            EventName::LoopPointsChanged => "loop_points_changed",
            EventName::LoopReady => "loop_ready",
            EventName::LoopNotReady => "loop_not_ready",
            EventName::LoopSkipQueued => "loop_skip_queued",
            EventName::LoopSkipCleared => "loop_skip_cleared",
            EventName::PlaybackPaused => "playback_paused",
            EventName::ErrorNotice => "error_notice",
        }
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl VampEvent {
    /// Subscription name of this event
    pub fn name(&self) -> EventName {
        match self {
            VampEvent::PositionUpdate { .. } => EventName::PositionUpdate,
            VampEvent::StateChange { .. } => EventName::StateChange,
            VampEvent::LoopModeEnter { .. } => EventName::LoopModeEnter,
            VampEvent::LoopModeExit { .. } => EventName::LoopModeExit,
            VampEvent::SongLoaded { .. } => EventName::SongLoaded,
            VampEvent::SongEnded => EventName::SongEnded,
            VampEvent::LoopPointsChanged { .. } => EventName::LoopPointsChanged,
            VampEvent::LoopReady { .. } => EventName::LoopReady,
            VampEvent::LoopNotReady { .. } => EventName::LoopNotReady,
            VampEvent::LoopSkipQueued { .. } => EventName::LoopSkipQueued,
            VampEvent::LoopSkipCleared => EventName::LoopSkipCleared,
            VampEvent::PlaybackPaused { .. } => EventName::PlaybackPaused,
            VampEvent::ErrorNotice { .. } => EventName::ErrorNotice,
        }
    }

    /// Convenience constructor stamping the current time
    pub fn state_change(old_mode: PlaybackMode, new_mode: PlaybackMode) -> Self {
        VampEvent::StateChange {
            old_mode,
            new_mode,
            timestamp: chrono::Utc::now(),
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// An event tagged with the song scope it was published in
#[derive(Debug, Clone)]
struct ScopedEvent {
    scope: u64,
    event: VampEvent,
}

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers, each seeing publish order
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
///
/// Events are scoped to the loaded song: [`EventBus::begin_song_scope`]
/// makes every subscription discard events that were published before it,
/// even those still queued in the channel.
///
/// # Examples
///
/// ```
/// use vamp_common::events::{EventBus, EventName, VampEvent};
///
/// let bus = EventBus::new(100);
/// let mut endings = bus.subscribe(EventName::SongEnded);
///
/// bus.emit_lossy(VampEvent::LoopSkipCleared);
/// bus.emit_lossy(VampEvent::SongEnded);
///
/// assert_eq!(endings.try_recv(), Some(VampEvent::SongEnded));
/// assert_eq!(endings.try_recv(), None);
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ScopedEvent>,
    scope: Arc<AtomicU64>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// * `capacity` - Number of events to buffer before the slowest
    ///   subscriber starts losing the oldest ones
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            scope: Arc::new(AtomicU64::new(0)),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to one event name
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self, name: EventName) -> EventSubscription {
        self.subscribe_to(&[name])
    }

    /// Subscribe to several event names through one receiver
    ///
    /// Relative order between the names is preserved.
    pub fn subscribe_to(&self, names: &[EventName]) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
            names: Some(names.to_vec()),
            scope: Arc::clone(&self.scope),
        }
    }

    /// Subscribe to every event
    pub fn subscribe_all(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
            names: None,
            scope: Arc::clone(&self.scope),
        }
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(receiver_count)` if at least one subscriber exists.
    /// Returns `Err` with the event if nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: VampEvent) -> Result<usize, VampEvent> {
        let scoped = ScopedEvent {
            scope: self.scope.load(Ordering::Acquire),
            event,
        };
        self.tx.send(scoped).map_err(|err| err.0.event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Used for every engine notification: publishing must never block or
    /// fail the monitor.
    pub fn emit_lossy(&self, event: VampEvent) {
        let _ = self.emit(event);
    }

    /// Start a new song scope
    ///
    /// Events published before this call are dropped by every subscription
    /// instead of being delivered late. Returns the new scope id.
    pub fn begin_song_scope(&self) -> u64 {
        self.scope.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Current song scope id
    pub fn current_scope(&self) -> u64 {
        self.scope.load(Ordering::Acquire)
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Receiving half of a named subscription
///
/// Dropping it unsubscribes.
pub struct EventSubscription {
    rx: broadcast::Receiver<ScopedEvent>,
    names: Option<Vec<EventName>>,
    scope: Arc<AtomicU64>,
}

impl EventSubscription {
    fn accepts(&self, scoped: &ScopedEvent) -> bool {
        if scoped.scope != self.scope.load(Ordering::Acquire) {
            return false;
        }
        match &self.names {
            Some(names) => names.contains(&scoped.event.name()),
            None => true,
        }
    }

    /// Wait for the next matching event
    ///
    /// Returns `None` once the bus is dropped. A subscriber that fell more
    /// than `capacity` events behind loses the oldest ones and keeps going.
    pub async fn recv(&mut self) -> Option<VampEvent> {
        loop {
            match self.rx.recv().await {
                Ok(scoped) => {
                    if self.accepts(&scoped) {
                        return Some(scoped.event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event subscriber lagged, {} events dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next matching event if one is already queued
    pub fn try_recv(&mut self) -> Option<VampEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(scoped) => {
                    if self.accepts(&scoped) {
                        return Some(scoped.event);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("Event subscriber lagged, {} events dropped", skipped);
                }
                Err(_) => return None,
            }
        }
    }

    /// Drain every matching event that is already queued
    pub fn drain(&mut self) -> Vec<VampEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
