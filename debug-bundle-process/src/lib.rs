//! Owns one in-flight debug-bundle collector child process: its output
//! buffers, paths, timestamps, and terminal status.
//!
//! Grounded on `harmonia-daemon`'s `sandbox::SandboxChild` /
//! `NoSandbox::spawn`, generalized from a sandboxed builder process to an
//! unsandboxed collector process. The child itself is driven by a single
//! supervisor task spawned at [`ProcessHandle::spawn`]; `wait`/`terminate`
//! on the handle are just requests sent to that task, so a concurrent
//! `terminate` and the run's own completion wait never contend for the
//! same `&mut Child`.

mod job_id;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use job_id::JobId;

/// Terminal outcome of a collector run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The process exited on its own with the given code.
    Exited(i32),
    /// The process was terminated by a signal.
    Signaled(i32),
}

/// Coarse status derived from [`WaitStatus`]: absent → running, exit
/// code 0 → success, anything else → error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    Success,
    Error,
}

/// Errors from spawning, waiting on, or terminating a collector process.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to spawn collector process: {0}")]
    Spawn(#[source] io::Error),
    #[error("process has already exited")]
    AlreadyExited,
    #[error("failed to signal process: {0}")]
    Signal(#[source] Errno),
    #[error("I/O error waiting for process: {0}")]
    Wait(#[source] io::Error),
}

type TerminateRequest = (Duration, oneshot::Sender<Result<(), ProcessError>>);

/// One in-flight (or just-finished) invocation of the collector binary.
///
/// The controller exclusively owns this; it is swapped atomically under
/// the control mutex and destroyed only once its child has reached a
/// terminal state.
pub struct ProcessHandle {
    job_id: JobId,
    bundle_file_path: PathBuf,
    process_output_file_path: PathBuf,
    created_at: SystemTime,
    stdout_lines: Arc<Mutex<Vec<String>>>,
    stderr_lines: Arc<Mutex<Vec<String>>>,
    status_rx: watch::Receiver<Option<WaitStatus>>,
    terminate_tx: mpsc::Sender<TerminateRequest>,
    supervisor: JoinHandle<()>,
}

impl ProcessHandle {
    /// Spawn the collector binary, install line-buffered stdout/stderr
    /// consumers, and start the supervisor task that owns the child for
    /// its whole lifetime.
    ///
    /// `argv[0]` is the collector binary path (as produced by
    /// `debug_bundle_argv::build_argv`); the remainder are its arguments.
    pub fn spawn(
        job_id: JobId,
        argv: &[String],
        bundle_file_path: PathBuf,
        process_output_file_path: PathBuf,
    ) -> Result<Self, ProcessError> {
        let (program, args) = argv.split_first().expect("argv always has a leading path");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn().map_err(ProcessError::Spawn)?;

        let stdout_lines = Arc::new(Mutex::new(Vec::new()));
        let stderr_lines = Arc::new(Mutex::new(Vec::new()));

        let stdout_task = child.stdout.take().map(|stdout| {
            let lines = Arc::clone(&stdout_lines);
            tokio::spawn(drain_lines(stdout, lines))
        });
        let stderr_task = child.stderr.take().map(|stderr| {
            let lines = Arc::clone(&stderr_lines);
            tokio::spawn(drain_lines(stderr, lines))
        });

        let (status_tx, status_rx) = watch::channel(None);
        let (terminate_tx, terminate_rx) = mpsc::channel(4);

        let supervisor = tokio::spawn(supervise(
            child,
            job_id,
            status_tx,
            terminate_rx,
            stdout_task,
            stderr_task,
        ));

        Ok(Self {
            job_id,
            bundle_file_path,
            process_output_file_path,
            created_at: SystemTime::now(),
            stdout_lines,
            stderr_lines,
            status_rx,
            terminate_tx,
            supervisor,
        })
    }

    /// Ask the supervisor to send `SIGTERM`, wait up to `timeout` for
    /// exit, then `SIGKILL`.
    ///
    /// Returns [`ProcessError::AlreadyExited`] if the process had already
    /// reached a terminal state before this call.
    pub async fn terminate(&self, timeout: Duration) -> Result<(), ProcessError> {
        if self.status_rx.borrow().is_some() {
            return Err(ProcessError::AlreadyExited);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.terminate_tx.send((timeout, reply_tx)).await.is_err() {
            return Err(ProcessError::AlreadyExited);
        }
        reply_rx.await.unwrap_or(Err(ProcessError::AlreadyExited))
    }

    /// Await the terminal status, set exactly once by the supervisor
    /// task. Safe to call repeatedly and concurrently from multiple
    /// callers (each call clones its own receiver).
    pub async fn wait(&self) -> io::Result<WaitStatus> {
        let mut rx = self.status_rx.clone();
        loop {
            if let Some(status) = *rx.borrow() {
                return Ok(status);
            }
            if rx.changed().await.is_err() {
                return Ok(WaitStatus::Exited(1));
            }
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn status(&self) -> Status {
        match *self.status_rx.borrow() {
            None => Status::Running,
            Some(WaitStatus::Exited(0)) => Status::Success,
            Some(_) => Status::Error,
        }
    }

    pub fn wait_status(&self) -> Option<WaitStatus> {
        *self.status_rx.borrow()
    }

    /// A cheap, independently-pollable clone of the terminal-status
    /// channel, for callers (like a background completion task) that
    /// need to await exit without holding a lock on the handle itself.
    pub fn status_receiver(&self) -> watch::Receiver<Option<WaitStatus>> {
        self.status_rx.clone()
    }

    pub fn bundle_file_path(&self) -> &Path {
        &self.bundle_file_path
    }

    pub fn process_output_file_path(&self) -> &Path {
        &self.process_output_file_path
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub async fn stdout_lines(&self) -> Vec<String> {
        self.stdout_lines.lock().await.clone()
    }

    pub async fn stderr_lines(&self) -> Vec<String> {
        self.stderr_lines.lock().await.clone()
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        assert!(
            self.status_rx.borrow().is_some(),
            "ProcessHandle for job {} dropped while its process is still running",
            self.job_id
        );
        self.supervisor.abort();
    }
}

fn exit_status_to_wait_status(status: std::process::ExitStatus) -> WaitStatus {
    if let Some(code) = status.code() {
        return WaitStatus::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        WaitStatus::Signaled(status.signal().unwrap_or(-1))
    }
    #[cfg(not(unix))]
    {
        WaitStatus::Exited(-1)
    }
}

/// Owns `child` for its entire lifetime: races its natural exit against
/// incoming terminate requests, and is the sole task that ever calls
/// `child.wait()`.
async fn supervise(
    mut child: Child,
    job_id: JobId,
    status_tx: watch::Sender<Option<WaitStatus>>,
    mut terminate_rx: mpsc::Receiver<TerminateRequest>,
    stdout_task: Option<JoinHandle<()>>,
    stderr_task: Option<JoinHandle<()>>,
) {
    loop {
        tokio::select! {
            exit = child.wait() => {
                let status = match exit {
                    Ok(exit_status) => exit_status_to_wait_status(exit_status),
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "error waiting for collector process");
                        WaitStatus::Exited(1)
                    }
                };
                let _ = status_tx.send(Some(status));
                while let Ok((_, reply)) = terminate_rx.try_recv() {
                    let _ = reply.send(Err(ProcessError::AlreadyExited));
                }
                break;
            }
            Some((timeout, reply)) = terminate_rx.recv() => {
                if !send_terminate_signal(&child, job_id, Signal::SIGTERM, &reply) {
                    continue;
                }
                match tokio::time::timeout(timeout, child.wait()).await {
                    Ok(Ok(exit_status)) => {
                        let status = exit_status_to_wait_status(exit_status);
                        let _ = status_tx.send(Some(status));
                        let _ = reply.send(Ok(()));
                        break;
                    }
                    Ok(Err(e)) => {
                        let _ = reply.send(Err(ProcessError::Wait(e)));
                    }
                    Err(_elapsed) => {
                        debug!(job_id = %job_id, "grace period elapsed, sending SIGKILL");
                        if let Some(pid) = child.id() {
                            let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
                        }
                        match child.wait().await {
                            Ok(exit_status) => {
                                let status = exit_status_to_wait_status(exit_status);
                                let _ = status_tx.send(Some(status));
                                let _ = reply.send(Ok(()));
                            }
                            Err(e) => {
                                let _ = reply.send(Err(ProcessError::Wait(e)));
                            }
                        }
                        break;
                    }
                }
            }
        }
    }

    if let Some(task) = stdout_task {
        let _ = task.await;
    }
    if let Some(task) = stderr_task {
        let _ = task.await;
    }
}

/// Send `signal` to `child` by pid, replying with the terminal error on
/// `reply` and returning `false` when the caller's loop should `continue`
/// rather than proceed to waiting for exit.
fn send_terminate_signal(
    child: &Child,
    job_id: JobId,
    signal: Signal,
    reply: &oneshot::Sender<Result<(), ProcessError>>,
) -> bool {
    let Some(pid) = child.id() else {
        let _ = reply.send(Err(ProcessError::AlreadyExited));
        return false;
    };
    match signal::kill(Pid::from_raw(pid as i32), signal) {
        Ok(()) => true,
        Err(Errno::ESRCH) => {
            let _ = reply.send(Err(ProcessError::AlreadyExited));
            false
        }
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "failed to signal collector process");
            false
        }
    }
}

async fn drain_lines<R>(reader: R, lines: Arc<Mutex<Vec<String>>>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader).lines();
    loop {
        match reader.next_line().await {
            Ok(Some(line)) => lines.lock().await.push(line),
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "error reading collector process output");
                break;
            }
        }
    }
}
