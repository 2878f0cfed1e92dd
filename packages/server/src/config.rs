//! Tunables of the synchronizer.
//!
//! None of these values are load-tested optima; they are the defaults the
//! server starts with and can be overridden from the command line.

use std::time::Duration;

/// Process-wide tuning knobs, constructed once at startup.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Read/compare-and-swap attempts per room mutation before giving up with `Busy`.
    pub max_cas_attempts: u32,
    /// Delay between a transport disconnect and the resulting `leave`.
    pub grace_period: Duration,
    /// Delay before a failed room watcher is restarted.
    pub watch_restart_backoff: Duration,
    /// Age after which a session token is treated as absent.
    pub session_ttl: Duration,
    /// Rooms untouched for longer than this are closed by the janitor.
    pub idle_room_threshold: Duration,
    /// How often the janitor runs.
    pub janitor_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_cas_attempts: 3,
            grace_period: Duration::from_secs(2),
            watch_restart_backoff: Duration::from_secs(3),
            session_ttl: Duration::from_secs(24 * 60 * 60),
            idle_room_threshold: Duration::from_secs(30 * 60),
            janitor_interval: Duration::from_secs(5 * 60),
        }
    }
}
