//! HTTP boundary — thin axum layer over the core services.
//!
//! Routes:
//! - `POST /jobs?model=…`          submit audio (raw body) → job ID
//! - `GET  /jobs/{id}`             status document
//! - `GET  /jobs/{id}/input`       stored input (fetched by workers)
//! - `GET  /jobs/{id}/stems`       stem index with download URLs
//! - `GET  /jobs/{id}/stems/{n}`   one stem as a file download
//! - `DELETE /jobs/{id}`           purge job + artifacts
//! - `POST /jobs/{id}/results`     worker completion callback (multipart)
//! - `POST /workers/register`      worker self-registration
//! - `GET  /workers`               registry listing
//! - `GET  /healthz`

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::dispatch::Dispatcher;
use crate::error::{
    DispatchError, IntakeError, JobError, RegistryError, RetrievalError, SubmissionError,
};
use crate::intake::ResultIntake;
use crate::model::ModelId;
use crate::registry::{WorkerDescriptor, WorkerRegistry};
use crate::retrieval::{JobStatus, RetrievalFacade};
use crate::submit::SubmissionService;

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub submission: Arc<SubmissionService>,
    pub dispatcher: Arc<Dispatcher>,
    pub intake: Arc<ResultIntake>,
    pub retrieval: Arc<RetrievalFacade>,
    pub registry: Arc<WorkerRegistry>,
}

/// Build the service router.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/jobs", post(submit_job))
        .route("/jobs/{id}", get(job_status).delete(purge_job))
        .route("/jobs/{id}/dispatch", post(dispatch_job))
        .route("/jobs/{id}/input", get(download_input))
        .route("/jobs/{id}/stems", get(stem_index))
        .route("/jobs/{id}/stems/{name}", get(download_stem))
        .route("/jobs/{id}/results", post(report_result))
        .route("/workers/register", post(register_worker))
        .route("/workers", get(list_workers))
        .route("/healthz", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Client-facing error with a JSON body.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

fn job_error_status(e: &JobError) -> StatusCode {
    match e {
        JobError::NotFound { .. } => StatusCode::NOT_FOUND,
        JobError::InvalidTransition { .. } => StatusCode::CONFLICT,
    }
}

impl From<SubmissionError> for ApiError {
    fn from(e: SubmissionError) -> Self {
        let status = match &e {
            SubmissionError::UnknownModel(_) | SubmissionError::InvalidAudio { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            SubmissionError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<RetrievalError> for ApiError {
    fn from(e: RetrievalError) -> Self {
        let status = match &e {
            RetrievalError::NotFound { .. } => StatusCode::NOT_FOUND,
            RetrievalError::NotReady { .. } => StatusCode::CONFLICT,
            RetrievalError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        let status = match &e {
            DispatchError::NoCapacity { .. } | DispatchError::WorkerUnreachable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DispatchError::Job(job) => job_error_status(job),
        };
        Self::new(status, e.to_string())
    }
}

impl From<IntakeError> for ApiError {
    fn from(e: IntakeError) -> Self {
        let status = match &e {
            IntakeError::DuplicateArtifact { .. } => StatusCode::CONFLICT,
            IntakeError::StemSetMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            IntakeError::Job(job) => job_error_status(job),
            IntakeError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        let status = match &e {
            RegistryError::DuplicateWorker { .. } => StatusCode::CONFLICT,
            RegistryError::UnknownWorker { .. } => StatusCode::NOT_FOUND,
        };
        Self::new(status, e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct SubmitQuery {
    model: String,
    filename: Option<String>,
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    job_id: Uuid,
    state: crate::job::JobState,
}

async fn submit_job(
    State(state): State<AppState>,
    Query(query): Query<SubmitQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let model: ModelId = query
        .model
        .parse()
        .map_err(|_| ApiError::from(SubmissionError::UnknownModel(query.model.clone())))?;
    let filename = query.filename.as_deref().unwrap_or("upload.wav");

    let job = state
        .submission
        .submit(model, filename, body.to_vec())
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: job.id,
            state: job.state,
        }),
    ))
}

/// Stem download link, included in the status document once ready.
#[derive(Debug, Serialize)]
struct StemLink {
    stem: String,
    download_url: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    status: JobStatus,
    downloads: Vec<StemLink>,
}

fn with_downloads(status: JobStatus) -> StatusResponse {
    let downloads = status
        .stems
        .iter()
        .map(|stem| StemLink {
            stem: stem.clone(),
            download_url: format!("/jobs/{}/stems/{stem}", status.job_id),
        })
        .collect();
    StatusResponse { status, downloads }
}

async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>, ApiError> {
    let status = state.retrieval.status(id).await?;
    Ok(Json(with_downloads(status)))
}

/// Manually retry dispatch for a queued job.
async fn dispatch_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let worker_id = state.dispatcher.dispatch(id).await?;
    Ok(Json(
        serde_json::json!({ "job_id": id, "worker_id": worker_id }),
    ))
}

/// Frame size for streamed artifact downloads.
const DOWNLOAD_CHUNK_BYTES: usize = 256 * 1024;

fn chunk_bytes(bytes: Vec<u8>) -> Vec<Bytes> {
    bytes
        .chunks(DOWNLOAD_CHUNK_BYTES)
        .map(Bytes::copy_from_slice)
        .collect()
}

/// Stream an artifact payload in fixed-size frames instead of a single
/// body write; stems can run to hundreds of megabytes.
fn download_body(bytes: Vec<u8>) -> Body {
    let frames = chunk_bytes(bytes)
        .into_iter()
        .map(Ok::<_, std::convert::Infallible>);
    Body::from_stream(tokio_stream::iter(frames))
}

async fn download_input(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let artifact = state.retrieval.fetch_input(id).await?;
    Ok((
        [(header::CONTENT_TYPE, artifact.media_type.clone())],
        download_body(artifact.bytes),
    )
        .into_response())
}

#[derive(Debug, Serialize)]
struct StemIndexEntry {
    stem: String,
    size: usize,
    download_url: String,
}

async fn stem_index(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<StemIndexEntry>>, ApiError> {
    let stems = state.retrieval.fetch_stems(id).await?;
    Ok(Json(
        stems
            .into_iter()
            .map(|(stem, artifact)| StemIndexEntry {
                size: artifact.len(),
                download_url: format!("/jobs/{id}/stems/{stem}"),
                stem,
            })
            .collect(),
    ))
}

async fn download_stem(
    State(state): State<AppState>,
    Path((id, name)): Path<(Uuid, String)>,
) -> Result<Response, ApiError> {
    let artifact = state.retrieval.fetch_stem(id, &name).await?;
    Ok((
        [
            (header::CONTENT_TYPE, artifact.media_type.clone()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{name}.wav\""),
            ),
        ],
        download_body(artifact.bytes),
    )
        .into_response())
}

async fn purge_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.retrieval.purge(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Worker completion callback. Multipart body: text fields `worker_id`,
/// `status` ("success" | "failure") and optional `reason`; one file
/// part per stem, named after the stem.
async fn report_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut worker_id: Option<String> = None;
    let mut status: Option<String> = None;
    let mut reason: Option<String> = None;
    let mut stems: HashMap<String, Vec<u8>> = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "worker_id" => {
                worker_id = Some(text_field(field).await?);
            }
            "status" => {
                status = Some(text_field(field).await?);
            }
            "reason" => {
                reason = Some(text_field(field).await?);
            }
            "" => return Err(ApiError::bad_request("unnamed multipart field")),
            stem => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("unreadable stem {stem:?}: {e}")))?;
                stems.insert(stem.to_string(), bytes.to_vec());
            }
        }
    }

    let worker_id =
        worker_id.ok_or_else(|| ApiError::bad_request("missing field: worker_id"))?;
    let status = status.ok_or_else(|| ApiError::bad_request("missing field: status"))?;

    match status.as_str() {
        "success" => {
            state.intake.report_success(id, &worker_id, stems).await?;
        }
        "failure" => {
            let reason = reason.as_deref().unwrap_or("unspecified worker failure");
            state.intake.report_failure(id, &worker_id, reason).await?;
        }
        other => {
            return Err(ApiError::bad_request(format!(
                "status must be \"success\" or \"failure\", got {other:?}"
            )));
        }
    }

    Ok(Json(serde_json::json!({ "job_id": id, "accepted": true })))
}

async fn text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    let name = field.name().unwrap_or_default().to_string();
    field
        .text()
        .await
        .map_err(|e| ApiError::bad_request(format!("unreadable field {name:?}: {e}")))
}

async fn register_worker(
    State(state): State<AppState>,
    Json(descriptor): Json<WorkerDescriptor>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let worker_id = descriptor.worker_id.clone();
    state.registry.register(descriptor).await?;
    Ok(Json(serde_json::json!({ "worker_id": worker_id })))
}

async fn list_workers(
    State(state): State<AppState>,
) -> Json<Vec<WorkerDescriptor>> {
    Json(state.registry.list().await)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    #[test]
    fn download_chunking_splits_large_payloads() {
        let payload = vec![7u8; DOWNLOAD_CHUNK_BYTES * 2 + 10];
        let chunks = chunk_bytes(payload);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), DOWNLOAD_CHUNK_BYTES);
        assert_eq!(chunks[2].len(), 10);
        let total: usize = chunks.iter().map(Bytes::len).sum();
        assert_eq!(total, DOWNLOAD_CHUNK_BYTES * 2 + 10);

        assert!(chunk_bytes(Vec::new()).is_empty());
    }

    #[test]
    fn error_status_mapping() {
        let id = Uuid::new_v4();

        let e: ApiError = RetrievalError::NotFound { id }.into();
        assert_eq!(e.status, StatusCode::NOT_FOUND);

        let e: ApiError = RetrievalError::NotReady {
            id,
            state: crate::job::JobState::Queued,
        }
        .into();
        assert_eq!(e.status, StatusCode::CONFLICT);

        let e: ApiError = DispatchError::NoCapacity {
            model: "scnet".to_string(),
        }
        .into();
        assert_eq!(e.status, StatusCode::SERVICE_UNAVAILABLE);

        let e: ApiError = DispatchError::Job(JobError::InvalidTransition {
            id,
            state: crate::job::JobState::Dispatched,
            target: crate::job::JobState::Dispatched,
        })
        .into();
        assert_eq!(e.status, StatusCode::CONFLICT);

        let e: ApiError = IntakeError::DuplicateArtifact {
            job_id: id,
            key: "k".to_string(),
        }
        .into();
        assert_eq!(e.status, StatusCode::CONFLICT);

        let e: ApiError = SubmissionError::UnknownModel("demucs".to_string()).into();
        assert_eq!(e.status, StatusCode::UNPROCESSABLE_ENTITY);

        let e: ApiError = SubmissionError::Storage(StorageError::AlreadyExists {
            key: "k".to_string(),
        })
        .into();
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
