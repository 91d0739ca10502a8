//! A small durable, namespaced, keyed byte-blob store.
//!
//! Grounded on `harmonia-store-db::connection`'s `rusqlite`-backed
//! `StoreDb`: a single SQLite file, WAL journal mode, opened once and
//! shared behind a mutex, with blocking calls pushed onto
//! `tokio::task::spawn_blocking` the way
//! `harmonia-daemon::handler::LocalStoreHandler` does around its
//! `Arc<Mutex<StoreDb>>`.

pub mod error;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::Mutex;
use tokio::task;
use tracing::debug;

pub use error::{KvError, Result};

const SCHEMA_SQL: &str = r#"
create table if not exists blob_store (
    space text not null,
    key   text not null,
    value blob not null,
    primary key (space, key)
);
"#;

/// A durable keyed byte-blob store with namespaced key spaces.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn put(&self, space: &str, key: &str, value: Vec<u8>) -> Result<()>;
    async fn remove(&self, space: &str, key: &str) -> Result<()>;
    async fn get(&self, space: &str, key: &str) -> Result<Option<Vec<u8>>>;
}

/// SQLite-backed [`KvStore`].
pub struct SqliteKvStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKvStore {
    /// Open (creating if necessary) a durable store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| KvError::Open {
            path: path.to_owned(),
            source: e,
        })?;
        configure(&conn)?;
        debug!(path = %path.display(), "opened KV store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for tests).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        configure(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn put(&self, space: &str, key: &str, value: Vec<u8>) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let space = space.to_string();
        let key = key.to_string();
        task::spawn_blocking(move || -> rusqlite::Result<()> {
            let conn = conn.blocking_lock();
            conn.execute(
                "insert into blob_store (space, key, value) values (?1, ?2, ?3)
                 on conflict(space, key) do update set value = excluded.value",
                params![space, key, value],
            )?;
            Ok(())
        })
        .await??;
        Ok(())
    }

    async fn remove(&self, space: &str, key: &str) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let space = space.to_string();
        let key = key.to_string();
        task::spawn_blocking(move || -> rusqlite::Result<()> {
            let conn = conn.blocking_lock();
            conn.execute(
                "delete from blob_store where space = ?1 and key = ?2",
                params![space, key],
            )?;
            Ok(())
        })
        .await??;
        Ok(())
    }

    async fn get(&self, space: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = Arc::clone(&self.conn);
        let space = space.to_string();
        let key = key.to_string();
        let value = task::spawn_blocking(move || -> rusqlite::Result<Option<Vec<u8>>> {
            let conn = conn.blocking_lock();
            conn.query_row(
                "select value from blob_store where space = ?1 and key = ?2",
                params![space, key],
                |row| row.get(0),
            )
            .optional()
        })
        .await??;
        Ok(value)
    }
}
