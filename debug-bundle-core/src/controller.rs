//! The coordinator: gate, control mutex, state transitions, cleanup of
//! prior runs, spawning, background wait, cancellation.
//!
//! Grounded on `harmonia-daemon::handler::LocalStoreHandler`'s
//! `Arc<Mutex<_>>`-guarded mutable state plus background `tokio::spawn`
//! completion tasks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use debug_bundle_argv::{DebugBundleParameters, build_argv, redacted_argv};
use debug_bundle_kvstore::KvStore;
use debug_bundle_process::{JobId, ProcessError, ProcessHandle, Status};

use crate::config::ConfigHandle;
use crate::error::{ControllerError, Result};
use crate::router::Gate;

const CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Read-only snapshot of the current run, returned by `status()`.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub job_id: JobId,
    pub status: Status,
    pub created_at: SystemTime,
    pub file_name: String,
    pub file_size: Option<u64>,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
}

struct State {
    handle: Option<ProcessHandle>,
}

/// Owns the single [`ProcessHandle`] slot and mediates every lifecycle
/// transition on it. One `Controller` lives on the service-shard actor
/// task spawned by [`crate::router::Router::spawn`]; its background
/// completion tasks hold their own gate ticket independent of the
/// initiating call's.
pub struct Controller {
    config: ConfigHandle,
    kv: Arc<dyn KvStore>,
    state: Arc<Mutex<State>>,
    gate: Gate,
}

impl Controller {
    pub fn new(config: ConfigHandle, kv: Arc<dyn KvStore>) -> Self {
        Self {
            config,
            kv,
            state: Arc::new(Mutex::new(State { handle: None })),
            gate: Gate::new(),
        }
    }

    /// The gate the [`crate::router::Router`] admits every public
    /// operation through, including this controller's own background
    /// completion tasks.
    pub fn gate(&self) -> Gate {
        self.gate.clone()
    }

    pub async fn initiate(&self, job_id: JobId, params: DebugBundleParameters) -> Result<()> {
        let _ticket = self.enter_gate()?;
        let config = self.config.snapshot();

        if !binary_exists(&config.collector_binary_path).await {
            return Err(ControllerError::RpkBinaryNotPresent);
        }

        let mut state = self.state.lock().await;

        if let Some(handle) = state.handle.as_ref() {
            if handle.status() == Status::Running {
                return Err(ControllerError::ProcessRunning);
            }
        }

        if let Some(previous) = state.handle.take() {
            cleanup_run(self.kv.as_ref(), &previous).await?;
        }

        let storage_dir = config.effective_storage_dir();
        tokio::fs::create_dir_all(&storage_dir).await?;

        let bundle_file_path = storage_dir.join(format!("{job_id}.zip"));
        let process_output_file_path = storage_dir.join(format!("{job_id}.out"));

        let argv = build_argv(&config.collector_binary_path, &bundle_file_path, &params)?;
        debug!(argv = %redacted_argv(&argv), %job_id, "spawning debug bundle collector");

        let handle = ProcessHandle::spawn(
            job_id,
            &argv,
            bundle_file_path,
            process_output_file_path,
        )
        .map_err(|e| ControllerError::internal(e.to_string()))?;

        state.handle = Some(handle);
        drop(state);

        // Acquired while `_ticket` (this call's own admission) is still
        // held, so the drain barrier never sees `inflight` reach zero
        // between this call returning and the completion task starting.
        let completion_ticket = self.gate.enter();
        self.spawn_completion_task(job_id, completion_ticket);
        Ok(())
    }

    /// Awaits the run's exit (outside the control mutex, so `cancel` can
    /// still interrupt it) then re-acquires the mutex to persist
    /// metadata. Never propagates an error past itself.
    fn spawn_completion_task(&self, job_id: JobId, ticket: Option<crate::router::GateTicket>) {
        let state = Arc::clone(&self.state);
        let kv = Arc::clone(&self.kv);

        tokio::spawn(async move {
            let _ticket = ticket;

            let mut status_rx = {
                let guard = state.lock().await;
                match guard.handle.as_ref() {
                    Some(handle) if handle.job_id() == job_id => handle.status_receiver(),
                    _ => return,
                }
            };
            // Polled without holding the control mutex, so `cancel` can
            // still acquire it and signal this same run while we wait.
            while status_rx.borrow().is_none() {
                if status_rx.changed().await.is_err() {
                    break;
                }
            }

            let guard = state.lock().await;
            let Some(handle) = guard.handle.as_ref() else {
                return;
            };
            if handle.job_id() != job_id {
                return;
            }
            if let Err(e) = debug_bundle_store::write(kv.as_ref(), handle).await {
                warn!(%job_id, error = %e, "failed to persist debug bundle run metadata");
            }
        });
    }

    pub async fn cancel(&self, job_id: JobId) -> Result<()> {
        let _ticket = self.enter_gate()?;
        let state = self.state.lock().await;

        let Some(handle) = state.handle.as_ref() else {
            return Err(ControllerError::ProcessNeverStarted);
        };
        if handle.status() != Status::Running {
            return Err(ControllerError::ProcessNotRunning);
        }
        if handle.job_id() != job_id {
            return Err(ControllerError::JobIdNotRecognized(job_id));
        }

        match handle.terminate(CANCEL_GRACE_PERIOD).await {
            Ok(()) => Ok(()),
            Err(ProcessError::AlreadyExited) => Err(ControllerError::ProcessNotRunning),
            Err(e) => Err(ControllerError::internal(e.to_string())),
        }
    }

    pub async fn status(&self) -> Result<StatusSnapshot> {
        let _ticket = self.enter_gate()?;
        let state = self.state.lock().await;

        let Some(handle) = state.handle.as_ref() else {
            return Err(ControllerError::ProcessNeverStarted);
        };

        let status = handle.status();
        let file_size = if status == Status::Success {
            Some(
                tokio::fs::metadata(handle.bundle_file_path())
                    .await
                    .map_err(|e| ControllerError::internal(e.to_string()))?
                    .len(),
            )
        } else {
            None
        };

        Ok(StatusSnapshot {
            job_id: handle.job_id(),
            status,
            created_at: handle.created_at(),
            file_name: file_name_of(handle.bundle_file_path()),
            file_size,
            stdout_lines: handle.stdout_lines().await,
            stderr_lines: handle.stderr_lines().await,
        })
    }

    pub async fn path(&self, job_id: JobId) -> Result<PathBuf> {
        let _ticket = self.enter_gate()?;
        let state = self.state.lock().await;

        let Some(handle) = state.handle.as_ref() else {
            return Err(ControllerError::ProcessNeverStarted);
        };

        match handle.status() {
            Status::Running => return Err(ControllerError::ProcessRunning),
            Status::Error => return Err(ControllerError::ProcessFailed),
            Status::Success => {}
        }
        if handle.job_id() != job_id {
            return Err(ControllerError::JobIdNotRecognized(job_id));
        }
        if !binary_exists(handle.bundle_file_path()).await {
            return Err(ControllerError::internal("bundle file missing"));
        }
        Ok(handle.bundle_file_path().to_path_buf())
    }

    pub async fn delete(&self, job_id: JobId) -> Result<()> {
        let _ticket = self.enter_gate()?;
        let state = self.state.lock().await;

        let Some(handle) = state.handle.as_ref() else {
            return Err(ControllerError::ProcessNeverStarted);
        };

        if handle.status() == Status::Running {
            return Err(ControllerError::ProcessRunning);
        }
        if handle.job_id() != job_id {
            return Err(ControllerError::JobIdNotRecognized(job_id));
        }

        if binary_exists(handle.bundle_file_path()).await {
            tokio::fs::remove_file(handle.bundle_file_path())
                .await
                .map_err(|e| ControllerError::internal(e.to_string()))?;
        }
        Ok(())
    }

    /// If a process is running on the service shard, attempt a graceful
    /// terminate (warn and swallow failures), then return — the gate
    /// itself is drained by [`crate::router::Router::shutdown`].
    pub async fn shutdown(&self) {
        let state = self.state.lock().await;
        if let Some(handle) = state.handle.as_ref() {
            if handle.status() == Status::Running {
                if let Err(e) = handle.terminate(CANCEL_GRACE_PERIOD).await {
                    warn!(error = %e, "failed to terminate debug bundle process during shutdown");
                }
            }
        }
    }

    fn enter_gate(&self) -> Result<crate::router::GateTicket> {
        self.gate
            .enter()
            .ok_or_else(|| ControllerError::internal("service is shutting down"))
    }
}

async fn binary_exists(path: &std::path::Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

fn file_name_of(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Remove a previous run's bundle file, process-output file, and KV
/// metadata entry. Each step is attempted best-effort; the first
/// genuine I/O failure (not "file didn't exist") surfaces as an error.
async fn cleanup_run(kv: &dyn KvStore, handle: &ProcessHandle) -> Result<()> {
    remove_if_exists(handle.bundle_file_path()).await?;
    remove_if_exists(handle.process_output_file_path()).await?;
    debug_bundle_store::remove(kv)
        .await
        .map_err(|e| ControllerError::internal(e.to_string()))?;
    Ok(())
}

async fn remove_if_exists(path: &std::path::Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ControllerError::internal(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DebugBundleConfig, observable};
    use debug_bundle_kvstore::SqliteKvStore;
    use uuid::Uuid;

    fn job_id() -> JobId {
        JobId::new(Uuid::new_v4())
    }

    fn test_controller(data_dir: &std::path::Path, collector: &std::path::Path) -> Controller {
        let (config_handle, _writer) = observable(DebugBundleConfig {
            collector_binary_path: collector.to_path_buf(),
            data_dir: data_dir.to_path_buf(),
            debug_bundle_storage_dir: None,
        });
        let kv: Arc<dyn KvStore> = Arc::new(SqliteKvStore::open_memory().unwrap());
        Controller::new(config_handle, kv)
    }

    fn fake_collector_script(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("fake-collector.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    #[tokio::test]
    async fn binary_missing_yields_rpk_binary_not_present() {
        let dir = tempfile::tempdir().unwrap();
        let controller = test_controller(dir.path(), &dir.path().join("nonexistent"));

        let result = controller.initiate(job_id(), DebugBundleParameters::default()).await;
        assert!(matches!(result, Err(ControllerError::RpkBinaryNotPresent)));

        let status = controller.status().await;
        assert!(matches!(status, Err(ControllerError::ProcessNeverStarted)));
    }

    #[tokio::test]
    async fn successful_run_reaches_success_status() {
        let dir = tempfile::tempdir().unwrap();
        let collector = fake_collector_script(
            dir.path(),
            r#"for a in "$@"; do case "$a" in --output) shift; printf hello > "$1";; esac; done
exit 0"#,
        );
        let controller = test_controller(dir.path(), &collector);
        let job = job_id();

        controller.initiate(job, DebugBundleParameters::default()).await.unwrap();

        let status = wait_for_terminal(&controller).await.unwrap();
        assert_eq!(status.status, Status::Success);
        assert_eq!(status.file_size, Some(5));
    }

    #[tokio::test]
    async fn non_zero_exit_fails_path_but_allows_delete() {
        let dir = tempfile::tempdir().unwrap();
        let collector = fake_collector_script(dir.path(), "exit 2");
        let controller = test_controller(dir.path(), &collector);
        let job = job_id();

        controller.initiate(job, DebugBundleParameters::default()).await.unwrap();
        let status = wait_for_terminal(&controller).await.unwrap();
        assert_eq!(status.status, Status::Error);

        assert!(matches!(controller.path(job).await, Err(ControllerError::ProcessFailed)));
        controller.delete(job).await.unwrap();
    }

    #[tokio::test]
    async fn cancel_while_running_transitions_to_error() {
        let dir = tempfile::tempdir().unwrap();
        let collector = fake_collector_script(dir.path(), "sleep 60");
        let controller = test_controller(dir.path(), &collector);
        let job = job_id();

        controller.initiate(job, DebugBundleParameters::default()).await.unwrap();
        controller.cancel(job).await.unwrap();

        let status = wait_for_terminal(&controller).await.unwrap();
        assert_eq!(status.status, Status::Error);

        assert!(matches!(
            controller.cancel(job).await,
            Err(ControllerError::ProcessNotRunning)
        ));
    }

    #[tokio::test]
    async fn sequential_runs_clean_up_the_previous_job() {
        let dir = tempfile::tempdir().unwrap();
        let collector = fake_collector_script(
            dir.path(),
            r#"for a in "$@"; do case "$a" in --output) shift; printf hi > "$1";; esac; done
exit 0"#,
        );
        let controller = test_controller(dir.path(), &collector);
        let job1 = job_id();
        let job2 = job_id();

        controller.initiate(job1, DebugBundleParameters::default()).await.unwrap();
        wait_for_terminal(&controller).await.unwrap();

        controller.initiate(job2, DebugBundleParameters::default()).await.unwrap();
        wait_for_terminal(&controller).await.unwrap();

        assert!(matches!(
            controller.path(job1).await,
            Err(ControllerError::JobIdNotRecognized(_))
        ));
        controller.path(job2).await.unwrap();
    }

    async fn wait_for_terminal(controller: &Controller) -> Result<StatusSnapshot> {
        for _ in 0..200 {
            let snapshot = controller.status().await?;
            if snapshot.status != Status::Running {
                return Ok(snapshot);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("process never reached a terminal state");
    }
}
