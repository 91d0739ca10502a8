use debug_bundle_process::JobId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ControllerError>;

/// Error taxonomy for the five public operations.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("collector binary is not present on disk")]
    RpkBinaryNotPresent,

    #[error("a debug bundle process is already running")]
    ProcessRunning,

    #[error("no debug bundle process is currently running")]
    ProcessNotRunning,

    #[error("no debug bundle process has ever been started")]
    ProcessNeverStarted,

    #[error("job id '{0}' is not recognized")]
    JobIdNotRecognized(JobId),

    #[error("the debug bundle process failed")]
    ProcessFailed,

    #[error("invalid debug bundle parameters: {0}")]
    InvalidParameters(#[from] debug_bundle_argv::ArgvError),

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ControllerError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<debug_bundle_kvstore::KvError> for ControllerError {
    fn from(e: debug_bundle_kvstore::KvError) -> Self {
        Self::internal(e.to_string())
    }
}

impl From<debug_bundle_store::StoreError> for ControllerError {
    fn from(e: debug_bundle_store::StoreError) -> Self {
        Self::internal(e.to_string())
    }
}

impl From<debug_bundle_process::ProcessError> for ControllerError {
    fn from(e: debug_bundle_process::ProcessError) -> Self {
        match e {
            debug_bundle_process::ProcessError::AlreadyExited => Self::ProcessNotRunning,
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ControllerError {
    fn from(e: std::io::Error) -> Self {
        Self::internal(e.to_string())
    }
}
