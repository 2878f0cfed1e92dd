//! SQLite key-value store 実装
//!
//! 複数のサーバープロセスが同じデータベースファイルを共有することで、
//! Room の状態をプロセス間で共有します。変更通知はキーのバージョンを一定間隔で
//! ポーリングして生成するため、他プロセスの書き込みも検知できます。

use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use crate::domain::{
    AtomicWrite, CommitOutcome, Entry, KeyValueStore, Mutation, StoreError, Version, WatchEvent,
    WatchStream,
};

/// Default interval between two version polls of a watched key.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key      TEXT PRIMARY KEY,
    value    BLOB NOT NULL,
    version  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS kv_sequence (
    id            INTEGER PRIMARY KEY CHECK (id = 0),
    last_version  INTEGER NOT NULL
);

INSERT OR IGNORE INTO kv_sequence (id, last_version) VALUES (0, 0);
"#;

/// SQLite-backed KeyValueStore.
///
/// Thread-safe via internal `Mutex<Connection>`; every statement runs on the
/// blocking thread pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    poll_interval: Duration,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path, poll_interval: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn, poll_interval)
    }

    /// Open a private in-memory database (for testing).
    pub fn open_in_memory(poll_interval: Duration) -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, poll_interval)
    }

    fn init(conn: Connection, poll_interval: Duration) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            poll_interval,
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("sqlite task failed: {e}")))?
    }

    async fn read_version(&self, key: String) -> Result<Option<Version>, StoreError> {
        self.run(move |conn| select_version(conn, &key)).await
    }
}

fn to_version(raw: i64) -> Version {
    Version::new(u64::try_from(raw).unwrap_or_default())
}

fn select_version(conn: &Connection, key: &str) -> Result<Option<Version>, StoreError> {
    let raw = conn
        .query_row("SELECT version FROM kv WHERE key = ?1", params![key], |row| {
            row.get::<_, i64>(0)
        })
        .optional()?;
    Ok(raw.map(to_version))
}

fn apply(conn: &mut Connection, write: AtomicWrite) -> Result<CommitOutcome, StoreError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    for check in &write.checks {
        if select_version(&tx, &check.key)? != check.expected {
            // Dropping the transaction rolls it back.
            return Ok(CommitOutcome::Conflict);
        }
    }

    let raw: i64 = tx.query_row(
        "UPDATE kv_sequence SET last_version = last_version + 1 WHERE id = 0 RETURNING last_version",
        [],
        |row| row.get(0),
    )?;

    for mutation in &write.mutations {
        match mutation {
            Mutation::Set { key, value } => {
                tx.execute(
                    "INSERT INTO kv (key, value, version) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, version = excluded.version",
                    params![key, value, raw],
                )?;
            }
            Mutation::Delete { key } => {
                tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
            }
        }
    }

    tx.commit()?;
    Ok(CommitOutcome::Committed(to_version(raw)))
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Entry>, StoreError> {
        let key = key.to_string();
        self.run(move |conn| {
            let row = conn
                .query_row(
                    "SELECT value, version FROM kv WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)?)),
                )
                .optional()?;
            Ok(row.map(|(value, version)| Entry {
                key,
                value,
                version: to_version(version),
            }))
        })
        .await
    }

    async fn commit(&self, write: AtomicWrite) -> Result<CommitOutcome, StoreError> {
        self.run(move |conn| apply(conn, write)).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Entry>, StoreError> {
        let prefix = prefix.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value, version FROM kv
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key",
            )?;
            let rows = stmt.query_map(params![prefix], |row| {
                Ok(Entry {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    version: to_version(row.get(2)?),
                })
            })?;
            let entries = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(entries)
        })
        .await
    }

    async fn watch(&self, key: &str) -> Result<WatchStream, StoreError> {
        let store = self.clone();
        let key = key.to_string();
        let initial = store.read_version(key.clone()).await?;
        let first = WatchEvent {
            key: key.clone(),
            version: initial,
        };

        let changes = stream::unfold((store, key, initial), |(store, key, last_seen)| async move {
            let mut last_seen = last_seen;
            loop {
                tokio::time::sleep(store.poll_interval).await;
                match store.read_version(key.clone()).await {
                    Ok(version) if version == last_seen => continue,
                    Ok(version) => {
                        last_seen = version;
                        let event = WatchEvent {
                            key: key.clone(),
                            version,
                        };
                        return Some((Ok(event), (store, key, last_seen)));
                    }
                    Err(e) => return Some((Err(e), (store, key, last_seen))),
                }
            }
        });

        Ok(stream::once(async move { Ok(first) }).chain(changes).boxed())
    }
}
