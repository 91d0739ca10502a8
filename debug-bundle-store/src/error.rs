use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors from the metadata store adapter.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("KV store error: {0}")]
    Kv(#[from] debug_bundle_kvstore::KvError),

    #[error("IO error: {message}: {source}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("metadata serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub(crate) trait IoContext<T> {
    fn io_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| StoreError::Io {
            message: f(),
            source: e,
        })
    }
}
