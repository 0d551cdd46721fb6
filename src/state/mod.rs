mod types;

pub use types::*;

use chrono::{DateTime, Utc};
use mediaforge_av::Operation;
use mediaforge_common::{Error, JobError, JobId, JobStatus, MediaKind, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Job lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum JobEvent {
    /// A job was accepted and is waiting for a slot.
    JobQueued { job_id: JobId, operation: Operation },
    /// A job was handed to the media engine.
    JobStarted { job_id: JobId },
    /// A job produced its output.
    JobSucceeded { job_id: JobId, output_size: u64 },
    /// A job finished with an error.
    JobFailed { job_id: JobId, error: JobError },
    /// A job's artifacts were released by the client.
    JobReleased { job_id: JobId },
    /// A job's artifacts expired and its record was dropped.
    JobExpired { job_id: JobId },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::JobQueued { job_id, .. }
            | JobEvent::JobStarted { job_id }
            | JobEvent::JobSucceeded { job_id, .. }
            | JobEvent::JobFailed { job_id, .. }
            | JobEvent::JobReleased { job_id }
            | JobEvent::JobExpired { job_id } => *job_id,
        }
    }

    /// Whether this event reports a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::JobSucceeded { .. } | JobEvent::JobFailed { .. })
    }
}

/// In-memory job store.
///
/// Reads are open to everyone; mutating methods are crate-private and only
/// the executor (plus the publisher's release bookkeeping) call them. Every
/// status change goes through [`Job`]'s transition methods, so an illegal
/// transition is refused and leaves the stored job untouched.
pub struct JobTable {
    jobs: RwLock<HashMap<JobId, Job>>,
    stats: RwLock<JobStats>,
    event_tx: broadcast::Sender<JobEvent>,
}

impl JobTable {
    pub fn new() -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            jobs: RwLock::new(HashMap::new()),
            stats: RwLock::new(JobStats::default()),
            event_tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    fn broadcast(&self, event: JobEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::trace!("No subscribers for job event");
        }
    }

    /// Get a job by ID
    pub fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.read().get(&id).cloned()
    }

    /// All jobs, newest first
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().values().cloned().collect();
        jobs.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        jobs
    }

    pub fn counts(&self) -> StatusCounts {
        let jobs = self.jobs.read();
        let mut counts = StatusCounts::default();
        for job in jobs.values() {
            match job.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Succeeded => counts.succeeded += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn stats(&self) -> JobStats {
        self.stats.read().clone()
    }

    pub(crate) fn insert(&self, job: Job) {
        let event = JobEvent::JobQueued {
            job_id: job.id,
            operation: job.operation(),
        };
        self.jobs.write().insert(job.id, job);
        self.broadcast(event);
    }

    /// Apply `f` to a stored job, keeping the previous state if it fails.
    fn update<F>(&self, id: JobId, f: F) -> Result<Job>
    where
        F: FnOnce(&mut Job) -> Result<()>,
    {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or_else(|| Error::not_found("job", id))?;
        let mut next = job.clone();
        f(&mut next)?;
        *job = next.clone();
        Ok(next)
    }

    pub(crate) fn mark_running(&self, id: JobId) -> Result<Job> {
        let job = self.update(id, Job::start)?;
        self.broadcast(JobEvent::JobStarted { job_id: id });
        Ok(job)
    }

    pub(crate) fn record_media_kind(&self, id: JobId, kind: MediaKind) -> Result<()> {
        self.update(id, |job| {
            job.media_kind = Some(kind);
            Ok(())
        })
        .map(|_| ())
    }

    pub(crate) fn mark_succeeded(&self, id: JobId, output_path: PathBuf, output_size: u64) -> Result<Job> {
        let job = self.update(id, |job| job.succeed(output_path, output_size))?;
        self.stats.write().record_success(output_size);
        self.broadcast(JobEvent::JobSucceeded {
            job_id: id,
            output_size,
        });
        Ok(job)
    }

    pub(crate) fn mark_failed(&self, id: JobId, error: JobError) -> Result<Job> {
        let kind = error.kind;
        let job = self.update(id, |job| job.fail(error.clone()))?;
        self.stats.write().record_failure(kind);
        self.broadcast(JobEvent::JobFailed { job_id: id, error });
        Ok(job)
    }

    /// Record that the client released the job's artifacts.
    ///
    /// Returns `true` the first time, `false` when already released.
    pub(crate) fn mark_released(&self, id: JobId) -> Result<bool> {
        let mut first = false;
        self.update(id, |job| {
            if !job.is_terminal() {
                return Err(Error::Conflict(format!(
                    "job {} is still {}",
                    job.id, job.status
                )));
            }
            if job.released_at.is_none() {
                job.released_at = Some(Utc::now());
                first = true;
            }
            Ok(())
        })?;
        if first {
            self.broadcast(JobEvent::JobReleased { job_id: id });
        }
        Ok(first)
    }

    /// Terminal jobs that finished before `cutoff`.
    pub(crate) fn finished_before(&self, cutoff: DateTime<Utc>) -> Vec<Job> {
        self.jobs
            .read()
            .values()
            .filter(|job| job.is_terminal() && job.finished_at.is_some_and(|t| t < cutoff))
            .cloned()
            .collect()
    }

    /// Drop a terminal job's record.
    pub(crate) fn forget(&self, id: JobId) -> Option<Job> {
        let mut jobs = self.jobs.write();
        if !jobs.get(&id).is_some_and(Job::is_terminal) {
            return None;
        }
        let job = jobs.remove(&id);
        drop(jobs);
        self.broadcast(JobEvent::JobExpired { job_id: id });
        job
    }
}
