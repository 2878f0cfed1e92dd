//! Utilities shared by the Zashiki server binary and library.

pub mod logger;
pub mod time;
