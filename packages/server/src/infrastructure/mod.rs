//! Infrastructure layer: store backends, the room repository and the
//! per-process connection plumbing (registry, change notifier, grace timers).

pub mod dto;
pub mod grace_period;
pub mod notifier;
pub mod repository;
pub mod session_registry;
pub mod store;

pub use grace_period::DisconnectGracePeriod;
pub use notifier::{ChangeNotifier, WatcherState};
pub use repository::{LeaveOutcome, RoomRepository};
pub use session_registry::{ConnectionHandle, OutboundFrame, PushError, SessionRegistry};
