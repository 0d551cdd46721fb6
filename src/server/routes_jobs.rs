use std::collections::BTreeMap;

use axum::{
    body::Body,
    extract::{multipart::MultipartError, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use mediaforge_av::Operation;
use mediaforge_common::{Error, JobError, JobId, JobStatus, MediaKind};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::io::ReaderStream;

use crate::publisher::JobResult;
use crate::server::error::AppError;
use crate::server::AppContext;
use crate::state::Job;

/// Multipart field carrying the upload. Parameter fields must precede it.
const FILE_FIELD: &str = "file";
const OPERATION_FIELD: &str = "operation";

pub fn job_routes() -> Router<AppContext> {
    Router::new()
        .route("/jobs", get(list_jobs).post(submit_job))
        .route("/jobs/:id", get(get_job).delete(cancel_job))
        .route("/jobs/:id/result", get(get_result))
        .route("/jobs/:id/release", post(release_job))
}

/// Client-facing view of a job.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobView {
    pub id: JobId,
    pub status: JobStatus,
    pub operation: Operation,
    pub file_name: String,
    pub media_kind: Option<MediaKind>,
    pub output_size: Option<u64>,
    pub error: Option<JobError>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub released: bool,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            status: job.status,
            operation: job.operation(),
            media_kind: job.media_kind,
            output_size: job.output_size,
            released: job.released_at.is_some(),
            file_name: job.file_name,
            error: job.error,
            submitted_at: job.submitted_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

#[derive(Deserialize)]
struct ListJobsQuery {
    status: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_jobs(
    State(ctx): State<AppContext>,
    Query(params): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobView>>, AppError> {
    let status: Option<JobStatus> = params
        .status
        .as_deref()
        .map(str::parse)
        .transpose()
        .map_err(Error::Validation)?;

    let offset = params.offset.unwrap_or(0);
    let limit = params.limit.unwrap_or(100);
    let jobs = ctx
        .pipeline
        .list()
        .into_iter()
        .filter(|job| status.map_or(true, |s| job.status == s))
        .skip(offset)
        .take(limit)
        .map(JobView::from)
        .collect();

    Ok(Json(jobs))
}

fn multipart_error(e: MultipartError) -> Error {
    Error::validation(format!("malformed multipart body: {}", e.body_text()))
}

/// Accept a multipart upload: parameter fields first, then `file`.
///
/// Parameters are validated before the file body is read, so a bad request
/// never touches the upload directory.
async fn submit_job(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitJobResponse>), AppError> {
    let mut operation: Option<String> = None;
    let mut params = BTreeMap::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        if name == FILE_FIELD {
            let file_name = field
                .file_name()
                .map(str::to_string)
                .ok_or_else(|| Error::validation("the 'file' field has no filename"))?;
            let operation = operation.ok_or_else(|| {
                Error::validation("missing 'operation' field (it must come before 'file')")
            })?;

            let prepared = ctx.pipeline.prepare(&file_name, &operation, &params)?;
            let job_id = ctx.pipeline.submit(prepared, field).await?;
            tracing::info!("Accepted {} upload '{}' as job {}", operation, file_name, job_id);

            return Ok((
                StatusCode::ACCEPTED,
                Json(SubmitJobResponse {
                    job_id,
                    status: JobStatus::Queued,
                }),
            ));
        }

        let value = field.text().await.map_err(multipart_error)?;
        let duplicate = if name == OPERATION_FIELD {
            operation.replace(value).is_some()
        } else {
            params.insert(name.clone(), value).is_some()
        };
        if duplicate {
            return Err(Error::validation(format!("duplicate field '{name}'")).into());
        }
    }

    Err(Error::validation("missing 'file' field").into())
}

async fn get_job(
    State(ctx): State<AppContext>,
    Path(id): Path<JobId>,
) -> Result<Json<JobView>, AppError> {
    Ok(Json(ctx.pipeline.status(id)?.into()))
}

async fn cancel_job(
    State(ctx): State<AppContext>,
    Path(id): Path<JobId>,
) -> Result<(StatusCode, Json<JobView>), AppError> {
    ctx.pipeline.cancel(id)?;
    Ok((StatusCode::ACCEPTED, Json(ctx.pipeline.status(id)?.into())))
}

async fn get_result(
    State(ctx): State<AppContext>,
    Path(id): Path<JobId>,
) -> Result<Response, AppError> {
    match ctx.pipeline.fetch(id)? {
        JobResult::Pending(status) => Err(Error::NotFound {
            entity: "result".to_string(),
            id: format!("{id} (job is {status})"),
        }
        .into()),
        JobResult::Failed(error) => Ok((
            StatusCode::CONFLICT,
            Json(json!({
                "error": error.message,
                "code": "job_failed",
                "kind": error.kind,
            })),
        )
            .into_response()),
        JobResult::Ready(file) => {
            let (handle, size) = ctx.pipeline.open(&file).await?;
            let disposition = format!(
                "attachment; filename=\"{}\"",
                file.file_name.replace('"', "_")
            );
            Ok((
                [
                    (header::CONTENT_TYPE, file.content_type.to_string()),
                    (header::CONTENT_LENGTH, size.to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                Body::from_stream(ReaderStream::new(handle)),
            )
                .into_response())
        }
    }
}

async fn release_job(
    State(ctx): State<AppContext>,
    Path(id): Path<JobId>,
) -> Result<StatusCode, AppError> {
    ctx.pipeline.release(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
