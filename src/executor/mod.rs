//! Job execution with a bounded slot pool.
//!
//! Submitted jobs wait in a FIFO queue of fixed capacity. A dispatcher task
//! takes one semaphore permit per job, so at most `workers` jobs run at once;
//! the permit travels with the job task and is released however that task
//! ends. Each running job owns a cancellation token that reaches the engine
//! subprocess.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mediaforge_av::{MediaEngine, Termination, TransformKind};
use mediaforge_common::paths::extension_of;
use mediaforge_common::{Error, JobError, JobId, JobStatus, Result};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, FontsConfig};
use crate::state::{Job, JobStats, JobTable, StatusCounts};
use crate::storage::StorageManager;

/// Executor tunables.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub job_timeout: Duration,
    pub fonts: FontsConfig,
}

impl ExecutorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.executor.workers,
            queue_capacity: config.executor.queue_capacity,
            job_timeout: config.executor.job_timeout(),
            fonts: config.fonts.clone(),
        }
    }
}

/// Point-in-time executor counters.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorStats {
    pub workers: usize,
    pub queue_capacity: usize,
    pub pending: usize,
    pub running: usize,
    pub available_slots: usize,
    /// Percentage of finished jobs that succeeded.
    pub success_rate: f32,
    pub jobs: StatusCounts,
    pub totals: JobStats,
}

#[derive(Default)]
struct Dispatch {
    pending: VecDeque<JobId>,
    running: HashMap<JobId, CancellationToken>,
}

pub struct JobExecutor {
    table: Arc<JobTable>,
    storage: Arc<StorageManager>,
    engine: Arc<dyn MediaEngine>,
    settings: ExecutorSettings,
    dispatch: Mutex<Dispatch>,
    wakeup: Notify,
    slots: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl JobExecutor {
    pub fn new(
        table: Arc<JobTable>,
        storage: Arc<StorageManager>,
        engine: Arc<dyn MediaEngine>,
        settings: ExecutorSettings,
    ) -> Arc<Self> {
        let workers = settings.workers.max(1);
        Arc::new(Self {
            table,
            storage,
            engine,
            settings,
            dispatch: Mutex::new(Dispatch::default()),
            wakeup: Notify::new(),
            slots: Arc::new(Semaphore::new(workers)),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn table(&self) -> &Arc<JobTable> {
        &self.table
    }

    pub fn fonts(&self) -> &FontsConfig {
        &self.settings.fonts
    }

    /// Whether another job would currently be accepted.
    pub fn has_capacity(&self) -> bool {
        self.dispatch.lock().pending.len() < self.settings.queue_capacity
    }

    /// Queue a job. Refused with [`Error::Backpressure`] when the queue is full.
    pub fn submit(&self, job: Job) -> Result<JobId> {
        if job.status != JobStatus::Queued {
            return Err(Error::Conflict(format!(
                "job {} is {}, only queued jobs can be submitted",
                job.id, job.status
            )));
        }

        let id = job.id;
        let operation = job.operation();
        {
            let mut dispatch = self.dispatch.lock();
            if dispatch.pending.len() >= self.settings.queue_capacity {
                tracing::warn!(
                    "Rejecting job {}: queue full ({} pending)",
                    id,
                    dispatch.pending.len()
                );
                return Err(Error::Backpressure {
                    capacity: self.settings.queue_capacity,
                });
            }
            self.table.insert(job);
            dispatch.pending.push_back(id);
        }
        self.wakeup.notify_one();

        tracing::info!(job_id = %id, %operation, "Job queued");
        Ok(id)
    }

    /// Current snapshot of a job.
    pub fn status(&self, id: JobId) -> Result<Job> {
        self.table.get(id).ok_or_else(|| Error::not_found("job", id))
    }

    /// Cancel a queued or running job.
    ///
    /// A queued job is failed with `Cancelled` immediately. A running job has
    /// its engine process terminated and is finalized by its task shortly
    /// after; use [`JobExecutor::wait`] to observe that.
    pub fn cancel(&self, id: JobId) -> Result<()> {
        let mut dispatch = self.dispatch.lock();

        if let Some(pos) = dispatch.pending.iter().position(|queued| *queued == id) {
            dispatch.pending.remove(pos);
            drop(dispatch);
            self.table.mark_failed(id, JobError::cancelled())?;
            tracing::info!("Cancelled queued job {}", id);
            return Ok(());
        }

        // A job leaves `running` under this lock before it turns terminal.
        if let Some(token) = dispatch.running.get(&id) {
            token.cancel();
            tracing::info!("Cancelling running job {}", id);
            return Ok(());
        }
        drop(dispatch);

        match self.table.get(id) {
            None => Err(Error::not_found("job", id)),
            Some(job) if job.is_terminal() => Err(Error::already_terminal(id, job.status)),
            Some(job) => Err(Error::Conflict(format!(
                "job {} is {} but not tracked by the executor",
                id, job.status
            ))),
        }
    }

    /// Block until the job is terminal or `timeout` passes.
    pub async fn wait(&self, id: JobId, timeout: Duration) -> Result<Job> {
        let mut events = self.table.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let job = self.status(id)?;
            if job.is_terminal() {
                return Ok(job);
            }
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Err(_) => return Err(Error::Timeout { after: timeout }),
                Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(Error::Internal("job event channel closed".to_string()))
                }
            }
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        let (pending, running) = {
            let dispatch = self.dispatch.lock();
            (dispatch.pending.len(), dispatch.running.len())
        };
        let totals = self.table.stats();
        ExecutorStats {
            workers: self.settings.workers,
            queue_capacity: self.settings.queue_capacity,
            pending,
            running,
            available_slots: self.slots.available_permits(),
            success_rate: totals.success_rate(),
            jobs: self.table.counts(),
            totals,
        }
    }

    /// Spawn the dispatcher loop.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run())
    }

    /// Stop dispatching and cancel running jobs.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn run(self: Arc<Self>) {
        tracing::info!(workers = self.settings.workers, "Job executor started");

        // A permit is only taken once work is queued, so idle slots stay visible.
        while self.work_available().await {
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // The queue may have emptied through a cancel while we waited.
            let Some((id, token)) = self.take_next() else {
                drop(permit);
                continue;
            };

            let this = Arc::clone(&self);
            tokio::spawn(async move {
                this.run_job(id, token, permit).await;
            });
        }

        tracing::info!("Job executor stopped");
    }

    /// Wait until a job is queued. Returns `false` on shutdown.
    async fn work_available(&self) -> bool {
        loop {
            if !self.dispatch.lock().pending.is_empty() {
                return true;
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                _ = self.wakeup.notified() => {}
            }
        }
    }

    /// Pop the oldest queued job and register its cancellation token.
    fn take_next(&self) -> Option<(JobId, CancellationToken)> {
        let mut dispatch = self.dispatch.lock();
        let id = dispatch.pending.pop_front()?;
        let token = self.shutdown.child_token();
        dispatch.running.insert(id, token.clone());
        Some((id, token))
    }

    async fn run_job(self: Arc<Self>, id: JobId, token: CancellationToken, permit: OwnedSemaphorePermit) {
        match self.table.mark_running(id) {
            Ok(job) => {
                tracing::info!(job_id = %id, operation = %job.operation(), "Processing job");
                let outcome = if token.is_cancelled() {
                    Err(Error::Cancelled)
                } else {
                    let this = Arc::clone(&self);
                    let task_token = token.clone();
                    let task = tokio::spawn(async move { this.execute(&job, &task_token).await });
                    match task.await {
                        Ok(outcome) => outcome,
                        Err(e) if e.is_panic() => {
                            tracing::error!(job_id = %id, "Job task panicked");
                            Err(Error::Internal("job task panicked".to_string()))
                        }
                        Err(_) => Err(Error::Cancelled),
                    }
                };
                self.finalize(id, outcome, permit).await;
            }
            Err(e) => {
                tracing::error!("Job {} could not start: {}", id, e);
                self.dispatch.lock().running.remove(&id);
            }
        }
    }

    /// Inspect, allocate, build arguments, invoke and verify.
    async fn execute(&self, job: &Job, token: &CancellationToken) -> Result<(PathBuf, u64)> {
        let media = self.engine.inspect(&job.input_path, token).await?;
        self.table.record_media_kind(job.id, media)?;
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let input_ext = extension_of(&job.input_path);
        let format = job.transformation.output_format(media, input_ext.as_deref());
        let stem = job
            .input_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| job.id.short());
        let output = self
            .storage
            .allocate_output_path(job.id, &stem, format.extension())
            .await?;

        let font = match &job.transformation.kind {
            TransformKind::OverlayText(style) => Some(
                self.settings
                    .fonts
                    .resolve(style.font.as_deref())
                    .ok_or_else(|| Error::validation("overlay font is not configured"))?,
            ),
            _ => None,
        };
        let args = job.transformation.build_args(
            &job.input_path,
            &output,
            media,
            format,
            font.map(PathBuf::as_path),
        )?;

        tracing::debug!(job_id = %job.id, %media, %format, "Invoking media engine");
        let result = self
            .engine
            .invoke(&args, self.settings.job_timeout, token)
            .await?;

        match result.termination {
            Termination::TimedOut => {
                return Err(Error::Timeout {
                    after: self.settings.job_timeout,
                })
            }
            Termination::Cancelled => return Err(Error::Cancelled),
            Termination::Exited if !result.success() => {
                let code = result
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                let detail = result.last_stderr_line().unwrap_or("no diagnostic output");
                return Err(Error::tool(
                    "ffmpeg",
                    format!("exited with status {code}: {detail}"),
                ));
            }
            Termination::Exited => {}
        }

        match self.storage.size_of(&output).await? {
            Some(size) if size > 0 => {
                tracing::debug!(job_id = %job.id, duration_ms = result.duration_ms, size, "Engine finished");
                Ok((output, size))
            }
            _ => Err(Error::tool("ffmpeg", "exited successfully but produced no output")),
        }
    }

    /// Record the outcome. The slot is freed before the job turns terminal,
    /// so anyone observing the terminal state also sees the slot released.
    async fn finalize(&self, id: JobId, outcome: Result<(PathBuf, u64)>, permit: OwnedSemaphorePermit) {
        if let Err(e) = &outcome {
            if let Err(purge_err) = self.storage.purge_job_outputs(id).await {
                tracing::warn!("Failed to remove outputs of job {}: {}", id, purge_err);
            }
            if matches!(e, Error::Cancelled) {
                tracing::info!("Job {} cancelled", id);
            } else {
                tracing::error!("Job {} failed: {}", id, e);
            }
        }

        let mut dispatch = self.dispatch.lock();
        dispatch.running.remove(&id);
        drop(permit);

        match outcome {
            Ok((path, size)) => match self.table.mark_succeeded(id, path, size) {
                Ok(_) => tracing::info!("Job {} completed successfully", id),
                Err(e) => tracing::error!("Job {} finished but could not be recorded: {}", id, e),
            },
            Err(e) => {
                let job_error = match e {
                    Error::Cancelled => JobError::cancelled(),
                    ref other => other.to_job_error(),
                };
                if let Err(record_err) = self.table.mark_failed(id, job_error) {
                    tracing::error!("Job {} failed but could not be recorded: {}", id, record_err);
                }
            }
        }
    }

    /// Purge artifacts of terminal jobs older than `retention` and forget them.
    ///
    /// Returns how many jobs were removed.
    pub async fn sweep_expired(&self, retention: Duration) -> usize {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now().checked_sub_signed(retention).unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let mut removed = 0;
        for job in self.table.finished_before(cutoff) {
            let mut paths = vec![job.input_path.clone()];
            paths.extend(job.output_path.clone());
            let mut purged = true;
            for path in &paths {
                if let Err(e) = self.storage.purge(path).await {
                    tracing::warn!("Failed to purge {:?} for expired job {}: {}", path, job.id, e);
                    purged = false;
                }
            }
            if purged && self.table.forget(job.id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!("Retention sweep removed {} expired jobs", removed);
        }
        removed
    }

    /// Spawn the periodic retention sweeper.
    pub fn start_retention_sweeper(self: &Arc<Self>, interval: Duration, retention: Duration) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = this.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        this.sweep_expired(retention).await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use mediaforge_av::{ExecutionResult, Transformation};
    use mediaforge_common::{ErrorKind, MediaKind};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    use crate::config::StorageConfig;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Succeed,
        Fail,
        Hang,
        Panic,
        Empty,
    }

    struct FakeEngine {
        behaviour: Behaviour,
        running: AtomicUsize,
        peak: AtomicUsize,
        inputs: Mutex<Vec<String>>,
    }

    impl FakeEngine {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                inputs: Mutex::new(Vec::new()),
            })
        }
    }

    fn exited(code: i32, stderr: &str) -> ExecutionResult {
        ExecutionResult {
            exit_code: Some(code),
            truncated_stdout: String::new(),
            truncated_stderr: stderr.to_string(),
            duration_ms: 1,
            termination: Termination::Exited,
        }
    }

    #[async_trait]
    impl MediaEngine for FakeEngine {
        async fn inspect(&self, _input: &Path, _cancel: &CancellationToken) -> Result<MediaKind> {
            Ok(MediaKind::Video)
        }

        async fn invoke(
            &self,
            args: &[String],
            timeout: Duration,
            cancel: &CancellationToken,
        ) -> Result<ExecutionResult> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Some(pos) = args.iter().position(|a| a == "-i") {
                self.inputs.lock().push(args[pos + 1].clone());
            }
            let output = args.last().cloned().unwrap_or_default();

            let result = match self.behaviour {
                Behaviour::Succeed => {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    std::fs::write(&output, b"processed").unwrap();
                    exited(0, "")
                }
                Behaviour::Fail => exited(1, "frame=0\nInvalid data found when processing input\n"),
                Behaviour::Empty => {
                    std::fs::write(&output, b"").unwrap();
                    exited(0, "")
                }
                Behaviour::Panic => panic!("engine exploded"),
                Behaviour::Hang => {
                    let termination = tokio::select! {
                        _ = cancel.cancelled() => Termination::Cancelled,
                        _ = tokio::time::sleep(timeout) => Termination::TimedOut,
                    };
                    ExecutionResult {
                        exit_code: None,
                        termination,
                        ..exited(0, "")
                    }
                }
            };
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(result)
        }
    }

    struct Fixture {
        _dir: TempDir,
        storage: Arc<StorageManager>,
        executor: Arc<JobExecutor>,
    }

    async fn fixture(engine: Arc<FakeEngine>, workers: usize, queue_capacity: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(StorageManager::new(&StorageConfig {
            upload_dir: dir.path().join("uploads"),
            output_dir: dir.path().join("outputs"),
            ..StorageConfig::default()
        }));
        storage.ensure_dirs().await.unwrap();
        let executor = JobExecutor::new(
            JobTable::new(),
            Arc::clone(&storage),
            engine,
            ExecutorSettings {
                workers,
                queue_capacity,
                job_timeout: Duration::from_millis(200),
                fonts: FontsConfig::default(),
            },
        );
        Fixture {
            _dir: dir,
            storage,
            executor,
        }
    }

    impl Fixture {
        fn job(&self, name: &str) -> Job {
            let id = JobId::new();
            let input = self.storage.upload_dir().join(format!("{}_{name}", id.short()));
            std::fs::write(&input, b"input").unwrap();
            Job::new(id, name, input, 5, Transformation::transcode(None))
        }

        async fn finish(&self, id: JobId) -> Job {
            self.executor.wait(id, Duration::from_secs(5)).await.unwrap()
        }
    }

    #[tokio::test]
    async fn successful_job_has_output_and_no_error() {
        let fx = fixture(FakeEngine::new(Behaviour::Succeed), 1, 4).await;
        fx.executor.start();

        let id = fx.executor.submit(fx.job("clip.mp4")).unwrap();
        let job = fx.finish(id).await;

        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(job.error.is_none());
        assert_eq!(job.media_kind, Some(MediaKind::Video));
        let output = job.output_path.unwrap();
        assert!(output.to_string_lossy().ends_with("_clip_processed.mp4"));
        assert_eq!(std::fs::read(output).unwrap(), b"processed");
        assert!(job.input_path.exists());
    }

    #[tokio::test]
    async fn pool_bound_and_fifo_order() {
        let engine = FakeEngine::new(Behaviour::Succeed);
        let fx = fixture(Arc::clone(&engine), 2, 8).await;

        let mut ids = Vec::new();
        let mut names = Vec::new();
        for i in 0..6 {
            let job = fx.job(&format!("c{i}.mp4"));
            names.push(job.input_path.to_string_lossy().into_owned());
            ids.push(fx.executor.submit(job).unwrap());
        }
        fx.executor.start();
        for id in ids {
            assert_eq!(fx.finish(id).await.status, JobStatus::Succeeded);
        }

        assert!(engine.peak.load(Ordering::SeqCst) <= 2);
        let started = engine.inputs.lock().clone();
        // Dispatch order is FIFO; with two slots adjacent jobs may swap.
        assert_eq!(started.len(), 6);
        assert_eq!(started[0..2].iter().filter(|s| names[0..2].contains(s)).count(), 2);
        assert_eq!(fx.executor.stats().available_slots, 2);
    }

    #[tokio::test]
    async fn single_slot_runs_jobs_in_submission_order() {
        let engine = FakeEngine::new(Behaviour::Succeed);
        let fx = fixture(Arc::clone(&engine), 1, 8).await;

        let mut ids = Vec::new();
        let mut names = Vec::new();
        for i in 0..5 {
            let job = fx.job(&format!("c{i}.mp4"));
            names.push(job.input_path.to_string_lossy().into_owned());
            ids.push(fx.executor.submit(job).unwrap());
        }
        fx.executor.start();
        for id in ids {
            fx.finish(id).await;
        }

        assert_eq!(*engine.inputs.lock(), names);
    }

    #[tokio::test]
    async fn idle_executor_reports_every_slot_free() {
        let fx = fixture(FakeEngine::new(Behaviour::Succeed), 3, 4).await;
        fx.executor.start();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = fx.executor.stats();
        assert_eq!(stats.available_slots, 3);
        assert_eq!(stats.running, 0);

        let id = fx.executor.submit(fx.job("a.mp4")).unwrap();
        fx.finish(id).await;
        let stats = fx.executor.stats();
        assert_eq!(stats.available_slots, 3);
        assert_eq!(stats.running, 0);
        assert_eq!(stats.success_rate, 100.0);
    }

    #[tokio::test]
    async fn full_queue_rejects_without_touching_queued_jobs() {
        let fx = fixture(FakeEngine::new(Behaviour::Succeed), 1, 2).await;
        let a = fx.executor.submit(fx.job("a.mp4")).unwrap();
        let b = fx.executor.submit(fx.job("b.mp4")).unwrap();
        assert!(!fx.executor.has_capacity());

        let rejected = fx.job("c.mp4");
        let rejected_id = rejected.id;
        let err = fx.executor.submit(rejected).unwrap_err();
        assert_matches!(err, Error::Backpressure { capacity: 2 });
        assert_eq!(err.kind(), ErrorKind::BackpressureError);
        assert!(fx.executor.table().get(rejected_id).is_none());

        fx.executor.start();
        assert_eq!(fx.finish(a).await.status, JobStatus::Succeeded);
        assert_eq!(fx.finish(b).await.status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn nonzero_exit_is_engine_failure_with_stderr_tail() {
        let fx = fixture(FakeEngine::new(Behaviour::Fail), 1, 4).await;
        fx.executor.start();
        let id = fx.executor.submit(fx.job("clip.mp4")).unwrap();

        let job = fx.finish(id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.output_path.is_none());
        let error = job.error.unwrap();
        assert_eq!(error.kind, ErrorKind::EngineFailure);
        assert!(error.message.contains("Invalid data found"));
        assert!(!fx.storage.output_dir().join(id.to_string()).exists());
    }

    #[tokio::test]
    async fn empty_output_is_failure() {
        let fx = fixture(FakeEngine::new(Behaviour::Empty), 1, 4).await;
        fx.executor.start();
        let id = fx.executor.submit(fx.job("clip.mp4")).unwrap();

        let job = fx.finish(id).await;
        assert_eq!(job.error.unwrap().kind, ErrorKind::EngineFailure);
        assert!(!fx.storage.output_dir().join(id.to_string()).exists());
    }

    #[tokio::test]
    async fn timeout_fails_and_frees_the_slot() {
        let fx = fixture(FakeEngine::new(Behaviour::Hang), 1, 4).await;
        fx.executor.start();
        let id = fx.executor.submit(fx.job("clip.mp4")).unwrap();

        let job = fx.finish(id).await;
        assert_eq!(job.error.unwrap().kind, ErrorKind::Timeout);

        let next = fx.executor.submit(fx.job("next.mp4")).unwrap();
        assert_eq!(fx.finish(next).await.error.unwrap().kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn panicking_job_is_engine_failure_and_executor_survives() {
        let fx = fixture(FakeEngine::new(Behaviour::Panic), 1, 4).await;
        fx.executor.start();

        let first = fx.executor.submit(fx.job("a.mp4")).unwrap();
        let second = fx.executor.submit(fx.job("b.mp4")).unwrap();
        assert_eq!(fx.finish(first).await.error.unwrap().kind, ErrorKind::EngineFailure);
        assert_eq!(fx.finish(second).await.error.unwrap().kind, ErrorKind::EngineFailure);
        assert_eq!(fx.executor.stats().available_slots, 1);
    }

    #[tokio::test]
    async fn cancel_running_and_queued_jobs() {
        let fx = fixture(FakeEngine::new(Behaviour::Hang), 1, 4).await;
        let running = fx.executor.submit(fx.job("a.mp4")).unwrap();
        let queued = fx.executor.submit(fx.job("b.mp4")).unwrap();
        fx.executor.start();

        let mut events = fx.executor.table().subscribe();
        while fx.executor.status(running).unwrap().status != JobStatus::Running {
            let _ = events.recv().await;
        }

        fx.executor.cancel(queued).unwrap();
        let job = fx.executor.status(queued).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.started_at.is_none());

        fx.executor.cancel(running).unwrap();
        let job = fx.finish(running).await;
        assert_eq!(job.error.unwrap().kind, ErrorKind::Cancelled);

        assert_matches!(fx.executor.cancel(running), Err(Error::AlreadyTerminal { .. }));
        assert_matches!(fx.executor.cancel(JobId::new()), Err(Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn wait_times_out_while_job_is_pending() {
        let fx = fixture(FakeEngine::new(Behaviour::Succeed), 1, 4).await;
        let id = fx.executor.submit(fx.job("a.mp4")).unwrap();
        let err = fx
            .executor
            .wait(id, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_matches!(err, Error::Timeout { .. });
        assert_matches!(
            fx.executor.wait(JobId::new(), Duration::from_millis(10)).await,
            Err(Error::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn sweep_removes_expired_artifacts() {
        let fx = fixture(FakeEngine::new(Behaviour::Succeed), 1, 4).await;
        fx.executor.start();
        let id = fx.executor.submit(fx.job("a.mp4")).unwrap();
        let job = fx.finish(id).await;
        let output = job.output_path.clone().unwrap();

        assert_eq!(fx.executor.sweep_expired(Duration::from_secs(3600)).await, 0);
        assert!(output.exists());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fx.executor.sweep_expired(Duration::ZERO).await, 1);
        assert!(!output.exists());
        assert!(!job.input_path.exists());
        assert!(fx.executor.table().get(id).is_none());
    }
}
