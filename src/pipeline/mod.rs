//! Submission front door tying storage, executor and publisher together.
//!
//! Submission is two steps so the HTTP layer can reject bad parameters
//! before it starts reading the upload body: [`MediaPipeline::prepare`]
//! validates everything that does not need the file, and
//! [`MediaPipeline::submit`] stores the body and queues the job.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use mediaforge_av::{MediaEngine, TransformKind, Transformation};
use mediaforge_common::paths::{require_media_extension, validate_upload_name};
use mediaforge_common::{Error, JobId, Result};
use tokio::fs::File;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::executor::{ExecutorSettings, ExecutorStats, JobExecutor};
use crate::publisher::{JobResult, ResultFile, ResultPublisher};
use crate::state::{Job, JobEvent, JobTable};
use crate::storage::{BoxError, StorageManager};

/// A validated request waiting for its upload body.
#[derive(Debug, Clone)]
pub struct PreparedJob {
    pub id: JobId,
    pub file_name: String,
    pub transformation: Transformation,
}

pub struct MediaPipeline {
    storage: Arc<StorageManager>,
    executor: Arc<JobExecutor>,
    publisher: ResultPublisher,
    retention: Duration,
    sweep_interval: Duration,
}

impl MediaPipeline {
    pub fn new(config: &Config, engine: Arc<dyn MediaEngine>) -> Self {
        let table = JobTable::new();
        let storage = Arc::new(StorageManager::new(&config.storage));
        let executor = JobExecutor::new(
            Arc::clone(&table),
            Arc::clone(&storage),
            engine,
            ExecutorSettings::from_config(config),
        );
        let publisher = ResultPublisher::new(table, Arc::clone(&storage));

        Self {
            storage,
            executor,
            publisher,
            retention: config.storage.retention(),
            sweep_interval: config.storage.sweep_interval(),
        }
    }

    /// Create storage directories and spawn the dispatcher and sweeper.
    pub async fn start(&self) -> Result<Vec<JoinHandle<()>>> {
        self.storage.ensure_dirs().await?;
        let dispatcher = self.executor.start();
        let sweeper = self
            .executor
            .start_retention_sweeper(self.sweep_interval, self.retention);
        tracing::info!(
            upload_dir = %self.storage.upload_dir().display(),
            output_dir = %self.storage.output_dir().display(),
            "Media pipeline started"
        );
        Ok(vec![dispatcher, sweeper])
    }

    pub fn shutdown(&self) {
        self.executor.shutdown();
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub fn executor(&self) -> &Arc<JobExecutor> {
        &self.executor
    }

    /// Validate a request before any byte is written.
    pub fn prepare(
        &self,
        file_name: &str,
        operation: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<PreparedJob> {
        let file_name = validate_upload_name(file_name)?.to_string();
        require_media_extension(&file_name)?;
        let transformation = Transformation::from_params(operation, params)?;

        if let TransformKind::OverlayText(style) = &transformation.kind {
            if self.executor.fonts().resolve(style.font.as_deref()).is_none() {
                return Err(Error::validation(format!(
                    "unknown font '{}'",
                    style.font.as_deref().unwrap_or_default()
                )));
            }
        }

        if !self.executor.has_capacity() {
            return Err(Error::Backpressure {
                capacity: self.executor.stats().queue_capacity,
            });
        }

        Ok(PreparedJob {
            id: JobId::new(),
            file_name,
            transformation,
        })
    }

    /// Store the upload and queue the job.
    ///
    /// On any failure the stored input is removed and no job is recorded.
    pub async fn submit<S, E>(&self, prepared: PreparedJob, body: S) -> Result<JobId>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Into<BoxError>,
    {
        let PreparedJob {
            id,
            file_name,
            transformation,
        } = prepared;

        let stored = self.storage.store(id, &file_name, body).await?;
        if stored.size == 0 {
            self.storage.purge(&stored.path).await?;
            return Err(Error::validation("uploaded file is empty"));
        }

        let input_path = stored.path.clone();
        let job = Job::new(id, file_name, stored.path, stored.size, transformation);
        match self.executor.submit(job) {
            Ok(id) => Ok(id),
            Err(e) => {
                if let Err(purge_err) = self.storage.purge(&input_path).await {
                    tracing::warn!("Failed to remove input of rejected job {}: {}", id, purge_err);
                }
                Err(e)
            }
        }
    }

    pub fn status(&self, id: JobId) -> Result<Job> {
        self.executor.status(id)
    }

    pub fn list(&self) -> Vec<Job> {
        self.executor.table().list()
    }

    pub fn cancel(&self, id: JobId) -> Result<()> {
        self.executor.cancel(id)
    }

    pub async fn wait(&self, id: JobId, timeout: Duration) -> Result<Job> {
        self.executor.wait(id, timeout).await
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<JobEvent> {
        self.executor.table().subscribe()
    }

    pub fn fetch(&self, id: JobId) -> Result<JobResult> {
        self.publisher.fetch(id)
    }

    pub async fn open(&self, result: &ResultFile) -> Result<(File, u64)> {
        self.publisher.open(result).await
    }

    pub async fn release(&self, id: JobId) -> Result<()> {
        self.publisher.release(id).await
    }

    pub fn stats(&self) -> ExecutorStats {
        self.executor.stats()
    }
}
