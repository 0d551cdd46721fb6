use chrono::{DateTime, Utc};
use mediaforge_av::{Operation, Transformation};
use mediaforge_common::{Error, ErrorKind, JobError, JobId, JobStatus, MediaKind, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// One transformation request and its lifecycle.
///
/// Exactly one of `output_path` / `error` is set once the status is
/// terminal, and neither before.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Name the client uploaded the file under.
    pub file_name: String,
    pub input_path: PathBuf,
    pub input_size: u64,
    pub transformation: Transformation,
    pub status: JobStatus,
    pub media_kind: Option<MediaKind>,
    pub output_path: Option<PathBuf>,
    pub output_size: Option<u64>,
    pub error: Option<JobError>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Set once the client released the result and artifacts were purged.
    pub released_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        id: JobId,
        file_name: impl Into<String>,
        input_path: PathBuf,
        input_size: u64,
        transformation: Transformation,
    ) -> Self {
        Self {
            id,
            file_name: file_name.into(),
            input_path,
            input_size,
            transformation,
            status: JobStatus::Queued,
            media_kind: None,
            output_path: None,
            output_size: None,
            error: None,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            released_at: None,
        }
    }

    pub fn operation(&self) -> Operation {
        self.transformation.operation()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::already_terminal(self.id, self.status));
        }
        if !self.status.can_transition_to(next) {
            return Err(Error::Conflict(format!(
                "job {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn succeed(&mut self, output_path: PathBuf, output_size: u64) -> Result<()> {
        self.transition(JobStatus::Succeeded)?;
        self.output_path = Some(output_path);
        self.output_size = Some(output_size);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, error: JobError) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}

/// Counters over finished jobs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobStats {
    pub total_processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub total_bytes_produced: u64,
    pub failures_by_kind: HashMap<ErrorKind, u64>,
}

impl JobStats {
    pub fn success_rate(&self) -> f32 {
        if self.total_processed == 0 {
            return 0.0;
        }
        (self.successful as f32 / self.total_processed as f32) * 100.0
    }

    pub fn record_success(&mut self, bytes: u64) {
        self.total_processed += 1;
        self.successful += 1;
        self.total_bytes_produced += bytes;
    }

    pub fn record_failure(&mut self, kind: ErrorKind) {
        self.total_processed += 1;
        self.failed += 1;
        *self.failures_by_kind.entry(kind).or_insert(0) += 1;
    }
}

/// Snapshot of how many jobs sit in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}
