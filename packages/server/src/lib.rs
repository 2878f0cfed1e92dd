//! Zashiki room state synchronizer.
//!
//! Participants join a shared room, submit private values and receive a
//! per-recipient snapshot of the room whenever it changes. Room state lives in
//! a shared key-value store guarded by compare-and-swap, so several server
//! processes can serve the same room.

// layers
pub mod domain;
pub mod infrastructure;
pub mod ui;
pub mod usecase;

pub mod config;
