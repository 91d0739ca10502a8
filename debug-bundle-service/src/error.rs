use actix_web::{HttpResponse, http::StatusCode};
use debug_bundle_core::ControllerError;
use serde::Serialize;

/// Wraps [`ControllerError`] so it can be returned directly from an
/// actix-web handler; maps each tag onto the HTTP status the tag
/// implies.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub ControllerError);

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl actix_web::ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            ControllerError::RpkBinaryNotPresent => StatusCode::SERVICE_UNAVAILABLE,
            ControllerError::ProcessRunning => StatusCode::CONFLICT,
            ControllerError::ProcessNotRunning => StatusCode::CONFLICT,
            ControllerError::ProcessNeverStarted => StatusCode::NOT_FOUND,
            ControllerError::JobIdNotRecognized(_) => StatusCode::NOT_FOUND,
            ControllerError::ProcessFailed => StatusCode::UNPROCESSABLE_ENTITY,
            ControllerError::InvalidParameters(_) => StatusCode::BAD_REQUEST,
            ControllerError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: error_tag(&self.0).to_string(),
            message: self.0.to_string(),
        })
    }
}

fn error_tag(err: &ControllerError) -> &'static str {
    match err {
        ControllerError::RpkBinaryNotPresent => "rpk_binary_not_present",
        ControllerError::ProcessRunning => "debug_bundle_process_running",
        ControllerError::ProcessNotRunning => "debug_bundle_process_not_running",
        ControllerError::ProcessNeverStarted => "debug_bundle_process_never_started",
        ControllerError::JobIdNotRecognized(_) => "job_id_not_recognized",
        ControllerError::ProcessFailed => "process_failed",
        ControllerError::InvalidParameters(_) => "invalid_parameters",
        ControllerError::Internal { .. } => "internal_error",
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
