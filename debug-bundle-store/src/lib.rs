//! Serializes/deserializes debug-bundle run metadata and persists it via
//! the KV store, with a paired on-disk sidecar file holding captured
//! process output.
//!
//! Grounded on `harmonia-daemon::build`'s single-pass hashing
//! (`hash_and_scan`) for the SHA-256 step, and on the
//! `Arc<Mutex<StoreDb>>` + `spawn_blocking` discipline of
//! `harmonia-daemon::handler` for the underlying KV access.

pub mod error;

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::warn;

use debug_bundle_kvstore::KvStore;
use debug_bundle_process::{JobId, ProcessHandle, WaitStatus};

pub use error::{IoContext, Result, StoreError};

/// Namespace all debug-bundle metadata lives under in the KV store.
pub const KV_NAMESPACE: &str = "debug-bundle";

/// The single well-known key a run's [`RunMetadata`] is stored under.
pub const RUN_METADATA_KEY: &str = "run-metadata";

const METADATA_FORMAT_VERSION: u32 = 1;

/// Mirror of [`WaitStatus`] with a stable serialized shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitStatusRecord {
    Exited(i32),
    Signaled(i32),
}

impl From<WaitStatus> for WaitStatusRecord {
    fn from(status: WaitStatus) -> Self {
        match status {
            WaitStatus::Exited(code) => Self::Exited(code),
            WaitStatus::Signaled(sig) => Self::Signaled(sig),
        }
    }
}

/// Durable record of one collector run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub version: u32,
    pub created_at_unix_secs: u64,
    pub job_id: JobId,
    pub bundle_file_path: PathBuf,
    pub process_output_file_path: PathBuf,
    /// Hex-encoded SHA-256 of the bundle file, or empty if the run
    /// failed (or the bundle file is missing despite a successful exit).
    pub sha256_of_bundle: String,
    pub wait_status: Option<WaitStatusRecord>,
}

/// Sidecar payload written to the process-output file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessOutput {
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
}

/// Persist the metadata and sidecar for a just-finished (or still
/// finishing, for defensive callers) [`ProcessHandle`].
///
/// 1. Computes the bundle checksum if the run succeeded and the bundle
///    file exists; otherwise records an empty checksum.
/// 2. Puts the serialized [`RunMetadata`] under [`RUN_METADATA_KEY`].
/// 3. Writes the serialized [`ProcessOutput`] sidecar to
///    `handle.process_output_file_path()`.
/// 4. If step 3 fails, best-effort removes the KV entry written in step
///    2 so metadata and sidecar stay consistent.
pub async fn write(kv: &dyn KvStore, handle: &ProcessHandle) -> Result<()> {
    let sha256_of_bundle = if handle.status() == debug_bundle_process::Status::Success {
        match tokio::fs::metadata(handle.bundle_file_path()).await {
            Ok(_) => hash_file(handle.bundle_file_path()).await?,
            Err(_) => String::new(),
        }
    } else {
        String::new()
    };

    let metadata = RunMetadata {
        version: METADATA_FORMAT_VERSION,
        created_at_unix_secs: handle
            .created_at()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
        job_id: handle.job_id(),
        bundle_file_path: handle.bundle_file_path().to_path_buf(),
        process_output_file_path: handle.process_output_file_path().to_path_buf(),
        sha256_of_bundle,
        wait_status: handle.wait_status().map(WaitStatusRecord::from),
    };
    let encoded = serde_json::to_vec(&metadata)?;
    kv.put(KV_NAMESPACE, RUN_METADATA_KEY, encoded).await?;

    let output = ProcessOutput {
        stdout_lines: handle.stdout_lines().await,
        stderr_lines: handle.stderr_lines().await,
    };
    let sidecar = match serde_json::to_vec(&output) {
        Ok(bytes) => bytes,
        Err(e) => {
            rollback_metadata(kv).await;
            return Err(e.into());
        }
    };

    if let Err(e) = tokio::fs::write(handle.process_output_file_path(), sidecar)
        .await
        .io_context(|| {
            format!(
                "writing process-output sidecar to {}",
                handle.process_output_file_path().display()
            )
        })
    {
        rollback_metadata(kv).await;
        return Err(e);
    }

    Ok(())
}

async fn rollback_metadata(kv: &dyn KvStore) {
    if let Err(e) = kv.remove(KV_NAMESPACE, RUN_METADATA_KEY).await {
        warn!(error = %e, "failed to roll back KV metadata after sidecar write failure");
    }
}

/// Delete the run's KV metadata entry. Callers additionally delete the
/// on-disk bundle and sidecar files.
pub async fn remove(kv: &dyn KvStore) -> Result<()> {
    kv.remove(KV_NAMESPACE, RUN_METADATA_KEY).await?;
    Ok(())
}

/// Read back the persisted [`RunMetadata`], if any.
pub async fn read(kv: &dyn KvStore) -> Result<Option<RunMetadata>> {
    let Some(bytes) = kv.get(KV_NAMESPACE, RUN_METADATA_KEY).await? else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Read back the persisted [`ProcessOutput`] sidecar at `path`.
pub async fn read_process_output(path: &Path) -> Result<ProcessOutput> {
    let bytes = tokio::fs::read(path)
        .await
        .io_context(|| format!("reading process-output sidecar at {}", path.display()))?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn hash_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .io_context(|| format!("opening bundle file {} for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .io_context(|| format!("reading bundle file {} for hashing", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
