//! Zashiki room state synchronizer server.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin zashiki-server
//! cargo run --bin zashiki-server -- --store sqlite --sqlite-path zashiki.db --port 3000
//! ```

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, ValueEnum};
use zashiki_server::{
    config::SyncConfig,
    domain::{InstanceId, KeyValueStore},
    infrastructure::store::{DEFAULT_POLL_INTERVAL, InMemoryStore, SqliteStore},
    ui::Server,
    usecase::{JanitorUseCase, ProcessContext},
};
use zashiki_shared::{logger::setup_logger, time::SystemClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    /// Process-local store; rooms are not shared with other processes
    Memory,
    /// SQLite database file, shareable by several server processes
    Sqlite,
}

#[derive(Parser, Debug)]
#[command(name = "zashiki-server")]
#[command(about = "Room state synchronizer over HTTP and WebSocket", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, env = "ZASHIKI_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, env = "ZASHIKI_PORT", default_value = "8080")]
    port: u16,

    /// Key-value store backend
    #[arg(long, env = "ZASHIKI_STORE", value_enum, default_value = "memory")]
    store: StoreKind,

    /// Database file used by the sqlite backend
    #[arg(long, env = "ZASHIKI_SQLITE_PATH", default_value = "zashiki.db")]
    sqlite_path: PathBuf,

    /// Compare-and-swap attempts per room mutation before answering busy
    #[arg(long, env = "ZASHIKI_JOIN_MAX_ATTEMPTS", default_value = "3")]
    join_max_attempts: u32,

    /// Delay between a disconnect and the resulting leave
    #[arg(long, env = "ZASHIKI_GRACE_PERIOD_MS", default_value = "2000")]
    grace_period_ms: u64,

    /// Delay before a failed room watcher restarts
    #[arg(long, env = "ZASHIKI_WATCH_BACKOFF_MS", default_value = "3000")]
    watch_backoff_ms: u64,

    /// Lifetime of a session token since its last use
    #[arg(long, env = "ZASHIKI_SESSION_TTL_SECS", default_value = "86400")]
    session_ttl_secs: u64,

    /// Rooms untouched for this long are closed by the janitor
    #[arg(long, env = "ZASHIKI_IDLE_ROOM_THRESHOLD_SECS", default_value = "1800")]
    idle_room_threshold_secs: u64,

    /// Interval between janitor runs
    #[arg(long, env = "ZASHIKI_JANITOR_INTERVAL_SECS", default_value = "300")]
    janitor_interval_secs: u64,

    /// Poll interval of the sqlite change feed (0 selects the default)
    #[arg(long, env = "ZASHIKI_WATCH_POLL_MS", default_value = "100")]
    watch_poll_ms: u64,
}

impl Args {
    fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            max_cas_attempts: self.join_max_attempts.max(1),
            grace_period: Duration::from_millis(self.grace_period_ms),
            watch_restart_backoff: Duration::from_millis(self.watch_backoff_ms),
            session_ttl: Duration::from_secs(self.session_ttl_secs),
            idle_room_threshold: Duration::from_secs(self.idle_room_threshold_secs),
            janitor_interval: Duration::from_secs(self.janitor_interval_secs.max(1)),
        }
    }
}

/// Run the janitor every `config.janitor_interval` for the life of the process.
fn spawn_janitor(context: &Arc<ProcessContext>) -> tokio::task::JoinHandle<()> {
    let janitor = JanitorUseCase::new(
        context.repository.clone(),
        context.registry.clone(),
        context.config.idle_room_threshold,
    );
    let period = context.config.janitor_interval;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            match janitor.execute().await {
                Ok(report) => tracing::info!(
                    "Janitor closed {} idle room(s), removed {} orphaned marker(s)",
                    report.closed_rooms.len(),
                    report.removed_markers
                ),
                Err(e) => tracing::error!("Janitor run failed: {}", e),
            }
        }
    })
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();
    let config = args.sync_config();

    // Initialize dependencies in order:
    // 1. Store
    // 2. ProcessContext (repository, registry, notifier, grace timers)
    // 3. Janitor
    // 4. Server
    let store: Arc<dyn KeyValueStore> = match args.store {
        StoreKind::Memory => {
            tracing::info!("Using in-memory store");
            Arc::new(InMemoryStore::new())
        }
        StoreKind::Sqlite => {
            let poll = match args.watch_poll_ms {
                0 => DEFAULT_POLL_INTERVAL,
                ms => Duration::from_millis(ms),
            };
            match SqliteStore::open(&args.sqlite_path, poll) {
                Ok(store) => {
                    tracing::info!("Using sqlite store at {}", args.sqlite_path.display());
                    Arc::new(store)
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to open sqlite store at {}: {}",
                        args.sqlite_path.display(),
                        e
                    );
                    std::process::exit(1);
                }
            }
        }
    };

    let context = ProcessContext::new(
        store,
        Arc::new(SystemClock),
        config,
        InstanceId::generate(),
    );

    let janitor = spawn_janitor(&context);

    let server = Server::new(context);
    let result = server.run(args.host, args.port).await;
    janitor.abort();

    if let Err(e) = result {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
