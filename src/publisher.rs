//! Exposes finished jobs to callers and releases their artifacts.

use std::path::PathBuf;
use std::sync::Arc;

use mediaforge_common::paths::content_type_for;
use mediaforge_common::{Error, JobError, JobId, JobStatus, Result};
use serde::Serialize;
use tokio::fs::File;

use crate::state::JobTable;
use crate::storage::StorageManager;

/// A servable output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultFile {
    pub path: PathBuf,
    /// Name offered to the client for download.
    pub file_name: String,
    pub size: u64,
    pub content_type: &'static str,
}

/// What a caller gets when asking for a job's result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    /// Still queued or running.
    Pending(JobStatus),
    Ready(ResultFile),
    Failed(JobError),
}

pub struct ResultPublisher {
    table: Arc<JobTable>,
    storage: Arc<StorageManager>,
}

impl ResultPublisher {
    pub fn new(table: Arc<JobTable>, storage: Arc<StorageManager>) -> Self {
        Self { table, storage }
    }

    /// Look up a job's result without changing anything.
    pub fn fetch(&self, id: JobId) -> Result<JobResult> {
        let job = self.table.get(id).ok_or_else(|| Error::not_found("job", id))?;

        match job.status {
            JobStatus::Queued | JobStatus::Running => Ok(JobResult::Pending(job.status)),
            JobStatus::Failed => Ok(JobResult::Failed(job.error.unwrap_or_else(|| {
                JobError::new(
                    mediaforge_common::ErrorKind::EngineFailure,
                    "job failed without a recorded cause",
                )
            }))),
            JobStatus::Succeeded => {
                let path = match (&job.output_path, job.released_at) {
                    (Some(path), None) => path.clone(),
                    _ => return Err(Error::not_found("result", id)),
                };
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| format!("{id}"));
                Ok(JobResult::Ready(ResultFile {
                    content_type: content_type_for(&path),
                    size: job.output_size.unwrap_or_default(),
                    file_name,
                    path,
                }))
            }
        }
    }

    /// Open a ready result for streaming. The size is read from disk.
    pub async fn open(&self, result: &ResultFile) -> Result<(File, u64)> {
        self.storage.retrieve(&result.path).await
    }

    /// Purge a terminal job's input and output. Safe to repeat.
    pub async fn release(&self, id: JobId) -> Result<()> {
        let job = self.table.get(id).ok_or_else(|| Error::not_found("job", id))?;
        if !job.is_terminal() {
            return Err(Error::Conflict(format!(
                "job {} is still {}; cancel it first",
                id, job.status
            )));
        }

        self.storage.purge(&job.input_path).await?;
        if let Some(output) = &job.output_path {
            self.storage.purge(output).await?;
        }

        if self.table.mark_released(id)? {
            tracing::info!("Released artifacts of job {}", id);
        }
        Ok(())
    }
}
