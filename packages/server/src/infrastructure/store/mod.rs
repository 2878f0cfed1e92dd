//! KeyValueStore backends.
//!
//! - `inmemory`: single-process store, used for development and tests
//! - `sqlite`: file-backed store shareable by several server processes

pub mod inmemory;
pub mod sqlite;

pub use inmemory::InMemoryStore;
pub use sqlite::{DEFAULT_POLL_INTERVAL, SqliteStore};
