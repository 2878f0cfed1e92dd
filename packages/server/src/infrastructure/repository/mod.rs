//! Repository implementations.

pub mod room;

pub use room::{LeaveOutcome, RoomRepository};
