//! Playback: backends, mode controller and the position monitor

pub mod backend;
pub mod build_worker;
pub mod controller;
pub mod monitor;
pub mod software;

pub use backend::{LoopBackend, LoopPhase, LoopTail, StreamingBackend};
pub use controller::{BuildRequest, ExitOutcome, ExitStyle, ExitTiming, PlaybackModeController};
pub use monitor::{PlayerCommand, PlayerHandle, PlayerSnapshot, PositionMonitor};
pub use software::{DeckRenderer, DeckSettings, SoftwareDeck, SoftwareLooper, SoftwareTransport};
