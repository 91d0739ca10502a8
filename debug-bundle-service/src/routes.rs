//! HTTP handlers for the five public operations, grounded on
//! `harmonia-cache`'s `web::Data<Config>`-plus-plain-async-fn handler
//! style (see e.g. `root::get`).

use actix_files::NamedFile;
use actix_web::{HttpResponse, web};
use debug_bundle_argv::DebugBundleParameters;
use debug_bundle_core::Router;
use debug_bundle_process::{JobId, Status};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct InitiateRequest {
    pub job_id: Uuid,
    #[serde(default)]
    pub params: DebugBundleParameters,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub job_id: Uuid,
    pub status: &'static str,
    pub created_at_unix_secs: u64,
    pub file_name: String,
    pub file_size: Option<u64>,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
}

fn status_tag(status: Status) -> &'static str {
    match status {
        Status::Running => "running",
        Status::Success => "success",
        Status::Error => "error",
    }
}

pub async fn initiate(
    router: web::Data<Router>,
    body: web::Json<InitiateRequest>,
) -> ApiResult<HttpResponse> {
    let body = body.into_inner();
    router
        .initiate(JobId::new(body.job_id), body.params)
        .await
        .map_err(ApiError)?;
    Ok(HttpResponse::Accepted().finish())
}

pub async fn cancel(
    router: web::Data<Router>,
    job_id: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    router
        .cancel(JobId::new(job_id.into_inner()))
        .await
        .map_err(ApiError)?;
    Ok(HttpResponse::Ok().finish())
}

pub async fn status(router: web::Data<Router>) -> ApiResult<HttpResponse> {
    let snapshot = router.status().await.map_err(ApiError)?;
    Ok(HttpResponse::Ok().json(StatusResponse {
        job_id: snapshot.job_id.as_uuid(),
        status: status_tag(snapshot.status),
        created_at_unix_secs: snapshot
            .created_at
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
        file_name: snapshot.file_name,
        file_size: snapshot.file_size,
        stdout_lines: snapshot.stdout_lines,
        stderr_lines: snapshot.stderr_lines,
    }))
}

pub async fn fetch_file(
    router: web::Data<Router>,
    job_id: web::Path<Uuid>,
) -> ApiResult<NamedFile> {
    let path = router
        .path(JobId::new(job_id.into_inner()))
        .await
        .map_err(ApiError)?;
    NamedFile::open(path).map_err(|e| ApiError(debug_bundle_core::ControllerError::internal(e.to_string())))
}

pub async fn delete(
    router: web::Data<Router>,
    job_id: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    router
        .delete(JobId::new(job_id.into_inner()))
        .await
        .map_err(ApiError)?;
    Ok(HttpResponse::NoContent().finish())
}
