//! Routes every public operation to the single service-shard actor task
//! and back, with a process-wide gate that shutdown drains.
//!
//! The host platform this spec describes runs a share-nothing,
//! shard-per-core executor where "the service shard" names one specific
//! OS thread's reactor. Tokio has no equivalent concept of addressable
//! per-task reactors, so this translation collapses the service shard
//! into a single actor task that owns the [`Controller`][crate::controller::Controller]
//! exclusively and drains a command channel; [`ShardId`] survives only
//! as caller provenance for logging, carried via a task-local so call
//! sites don't have to thread it through explicitly.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use debug_bundle_argv::DebugBundleParameters;
use debug_bundle_process::JobId;

use crate::controller::{Controller, StatusSnapshot};
use crate::error::Result;

/// Identifies the shard an operation was issued from. Purely
/// informational in this translation; see the module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardId(pub u16);

tokio::task_local! {
    static CURRENT_SHARD: ShardId;
}

/// Run `fut` with `shard` bound as the calling shard for its duration.
pub async fn on_shard<F: std::future::Future>(shard: ShardId, fut: F) -> F::Output {
    CURRENT_SHARD.scope(shard, fut).await
}

/// The shard the currently-running task is bound to, if any.
pub fn current_shard() -> Option<ShardId> {
    CURRENT_SHARD.try_with(|s| *s).ok()
}

/// A counting barrier admitting in-flight public operations; shutdown
/// closes the gate to new entries, then separately waits for the count
/// to reach zero so a caller can act (e.g. terminate a running process)
/// in between the two steps.
#[derive(Clone)]
pub struct Gate {
    inflight: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Admit one operation, or `None` if the gate is already closed.
    pub fn enter(&self) -> Option<GateTicket> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.inflight.fetch_add(1, Ordering::AcqRel);
        Some(GateTicket {
            inflight: Arc::clone(&self.inflight),
        })
    }

    /// Close the gate to new entries. Already-admitted operations keep
    /// running.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Wait for every admitted operation to finish. Only meaningful
    /// after [`Gate::close`], otherwise it may never return.
    pub async fn drain(&self) {
        while self.inflight.load(Ordering::Acquire) > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Close the gate to new entries and wait for admitted operations
    /// to finish.
    pub async fn close_and_drain(&self) {
        self.close();
        self.drain().await;
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII admission ticket; dropping it releases the gate slot.
pub struct GateTicket {
    inflight: Arc<AtomicUsize>,
}

impl Drop for GateTicket {
    fn drop(&mut self) {
        self.inflight.fetch_sub(1, Ordering::AcqRel);
    }
}

enum Command {
    Initiate {
        job_id: JobId,
        params: DebugBundleParameters,
        reply: oneshot::Sender<Result<()>>,
    },
    Cancel {
        job_id: JobId,
        reply: oneshot::Sender<Result<()>>,
    },
    Status {
        reply: oneshot::Sender<Result<StatusSnapshot>>,
    },
    Path {
        job_id: JobId,
        reply: oneshot::Sender<Result<PathBuf>>,
    },
    Delete {
        job_id: JobId,
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle shared by every caller, on every shard, to dispatch to the
/// single service-shard actor task.
#[derive(Clone)]
pub struct Router {
    tx: mpsc::Sender<Command>,
    gate: Gate,
}

impl Router {
    /// Spawn the service-shard actor task owning `controller` and
    /// return a [`Router`] handle to it.
    pub fn spawn(controller: Controller) -> Self {
        let (tx, mut rx) = mpsc::channel::<Command>(32);
        let gate = controller.gate();

        tokio::spawn(async move {
            let controller = controller;
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    Command::Initiate {
                        job_id,
                        params,
                        reply,
                    } => {
                        let result = controller.initiate(job_id, params).await;
                        let _ = reply.send(result);
                    }
                    Command::Cancel { job_id, reply } => {
                        let result = controller.cancel(job_id).await;
                        let _ = reply.send(result);
                    }
                    Command::Status { reply } => {
                        let result = controller.status().await;
                        let _ = reply.send(result);
                    }
                    Command::Path { job_id, reply } => {
                        let result = controller.path(job_id).await;
                        let _ = reply.send(result);
                    }
                    Command::Delete { job_id, reply } => {
                        let result = controller.delete(job_id).await;
                        let _ = reply.send(result);
                    }
                    Command::Shutdown { reply } => {
                        controller.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                }
            }
        });

        Self { tx, gate }
    }

    pub async fn initiate(&self, job_id: JobId, params: DebugBundleParameters) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.dispatch(Command::Initiate {
            job_id,
            params,
            reply: reply_tx,
        })
        .await;
        self.await_reply(reply_rx).await
    }

    pub async fn cancel(&self, job_id: JobId) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.dispatch(Command::Cancel {
            job_id,
            reply: reply_tx,
        })
        .await;
        self.await_reply(reply_rx).await
    }

    pub async fn status(&self) -> Result<StatusSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.dispatch(Command::Status { reply: reply_tx }).await;
        self.await_reply(reply_rx).await
    }

    pub async fn path(&self, job_id: JobId) -> Result<PathBuf> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.dispatch(Command::Path {
            job_id,
            reply: reply_tx,
        })
        .await;
        self.await_reply(reply_rx).await
    }

    pub async fn delete(&self, job_id: JobId) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.dispatch(Command::Delete {
            job_id,
            reply: reply_tx,
        })
        .await;
        self.await_reply(reply_rx).await
    }

    /// Close the gate to new entries, terminate any running process,
    /// then drain: closing first means nothing new can be admitted
    /// while the terminate is in flight, and terminating before the
    /// drain bounds how long admitted operations (in particular the
    /// background completion task awaiting the run's exit) take to
    /// finish, instead of waiting on a long-running process to exit on
    /// its own.
    pub async fn shutdown(&self) {
        self.gate.close();

        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown { reply: reply_tx }).await.is_ok() {
            let _ = reply_rx.await;
        }

        self.gate.drain().await;
    }

    async fn dispatch(&self, cmd: Command) {
        if self.tx.send(cmd).await.is_err() {
            warn!("debug-bundle service-shard actor task is gone; operation dropped");
        }
    }

    async fn await_reply<T>(&self, reply_rx: oneshot::Receiver<Result<T>>) -> Result<T>
    where
        T: Send,
    {
        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(crate::error::ControllerError::internal(
                "service-shard actor task dropped the reply channel",
            )),
        }
    }
}
