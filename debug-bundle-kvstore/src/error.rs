use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, KvError>;

/// Errors from the namespaced KV store.
#[derive(Error, Debug)]
pub enum KvError {
    #[error("failed to open KV store at '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("KV store worker task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}
