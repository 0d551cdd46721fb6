//! Shared test harness for integration tests.
//!
//! [`TestHarness`] builds a full [`AppContext`] over temporary upload and
//! output directories, with either a scripted in-process [`FakeEngine`] or
//! the real ffmpeg engine pointed at shell-script stand-ins.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use mediaforge::config::Config;
use mediaforge::pipeline::MediaPipeline;
use mediaforge::server::{create_router, AppContext};
use mediaforge_av::{
    EngineSettings, ExecutionResult, FfmpegEngine, MediaEngine, Termination, ToolRegistry,
};
use mediaforge_common::{Error, JobId, MediaKind, Result};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

pub const BOUNDARY: &str = "mediaforge-test-boundary";

/// What the fake engine does when invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Write a small file at the output path and exit 0.
    Succeed,
    /// Exit 1 with a diagnostic on stderr.
    Fail,
    /// Block until cancelled or timed out.
    Hang,
    /// Wait for [`FakeEngine::release`] before succeeding.
    Gated,
}

/// In-process [`MediaEngine`] double.
pub struct FakeEngine {
    pub behaviour: Behaviour,
    pub media: MediaKind,
    pub invocations: AtomicUsize,
    pub last_args: parking_lot::Mutex<Vec<String>>,
    gate: Semaphore,
}

impl FakeEngine {
    pub fn new(behaviour: Behaviour, media: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            media,
            invocations: AtomicUsize::new(0),
            last_args: parking_lot::Mutex::new(Vec::new()),
            gate: Semaphore::new(0),
        })
    }

    /// Let `n` gated invocations finish.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

fn finished(code: Option<i32>, stderr: &str, termination: Termination) -> ExecutionResult {
    ExecutionResult {
        exit_code: code,
        truncated_stdout: String::new(),
        truncated_stderr: stderr.to_string(),
        duration_ms: 1,
        termination,
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn inspect(&self, _input: &Path, _cancel: &CancellationToken) -> Result<MediaKind> {
        Ok(self.media)
    }

    async fn invoke(
        &self,
        args: &[String],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        *self.last_args.lock() = args.to_vec();
        let output = PathBuf::from(args.last().cloned().unwrap_or_default());

        match self.behaviour {
            Behaviour::Succeed => {}
            Behaviour::Fail => {
                return Ok(finished(
                    Some(1),
                    "Error while decoding stream #0:0: Invalid data found when processing input",
                    Termination::Exited,
                ))
            }
            Behaviour::Hang => {
                let termination = tokio::select! {
                    _ = cancel.cancelled() => Termination::Cancelled,
                    _ = tokio::time::sleep(timeout) => Termination::TimedOut,
                };
                return Ok(finished(None, "", termination));
            }
            Behaviour::Gated => {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(finished(None, "", Termination::Cancelled)),
                    permit = self.gate.acquire() => {
                        permit.map_err(|_| Error::Internal("gate closed".into()))?.forget();
                    }
                }
            }
        }

        tokio::fs::write(&output, b"processed media").await?;
        Ok(finished(Some(0), "", Termination::Exited))
    }
}

/// Write an executable shell script.
pub fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Test harness wrapping a started pipeline and its [`AppContext`].
pub struct TestHarness {
    pub dir: TempDir,
    pub ctx: AppContext,
}

impl TestHarness {
    pub fn config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.storage.upload_dir = dir.join("uploads");
        config.storage.output_dir = dir.join("outputs");
        config.storage.max_upload_mb = 1;
        config.executor.job_timeout_secs = 2;
        config.executor.grace_period_secs = 1;
        config
    }

    /// Harness over a fake engine with default limits.
    pub async fn new(engine: Arc<FakeEngine>) -> Self {
        Self::with_engine(engine, |_| {}).await
    }

    /// Harness over any engine, with config tweaks applied before startup.
    pub async fn with_engine(
        engine: Arc<dyn MediaEngine>,
        tweak: impl FnOnce(&mut Config),
    ) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut config = Self::config(dir.path());
        tweak(&mut config);

        let pipeline = Arc::new(MediaPipeline::new(&config, engine));
        pipeline.start().await.expect("pipeline failed to start");

        let ctx = AppContext {
            config: Arc::new(config),
            pipeline,
            tools: Arc::new(ToolRegistry::default()),
        };
        Self { dir, ctx }
    }

    /// Harness over the real ffmpeg engine backed by shell scripts.
    pub async fn with_scripts(
        ffmpeg_body: &str,
        ffprobe_body: &str,
        tweak: impl FnOnce(&mut Config),
    ) -> (Self, TempDir) {
        let bin = tempfile::tempdir().expect("failed to create bin dir");
        let ffmpeg = script(bin.path(), "ffmpeg", ffmpeg_body);
        let ffprobe = script(bin.path(), "ffprobe", ffprobe_body);
        let engine = FfmpegEngine::new(
            ToolRegistry::with_paths(ffmpeg, ffprobe),
            EngineSettings {
                grace_period: Duration::from_millis(300),
                probe_timeout: Duration::from_secs(5),
                output_limit: 4096,
            },
        );
        let harness = Self::with_engine(Arc::new(engine), tweak).await;
        (harness, bin)
    }

    pub fn router(&self) -> Router {
        create_router(self.ctx.clone())
    }

    pub fn pipeline(&self) -> &MediaPipeline {
        &self.ctx.pipeline
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.ctx.config.storage.upload_dir.clone()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.ctx.config.storage.output_dir.clone()
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router().oneshot(request).await.unwrap()
    }

    /// POST /jobs with text fields followed by the file.
    pub async fn submit(
        &self,
        fields: &[(&str, &str)],
        file_name: &str,
        content: &[u8],
    ) -> Response<Body> {
        self.send(multipart_request("/jobs", fields, Some((file_name, content))))
            .await
    }

    /// Submit and return the job id, asserting 202.
    pub async fn submit_ok(&self, fields: &[(&str, &str)], file_name: &str) -> JobId {
        let response = self.submit(fields, file_name, b"fake media bytes").await;
        let status = response.status();
        let json = body_json(response).await;
        assert_eq!(status, StatusCode::ACCEPTED, "unexpected response: {json}");
        json["job_id"].as_str().unwrap().parse().unwrap()
    }

    pub async fn wait(&self, id: JobId) -> mediaforge::state::Job {
        self.pipeline()
            .wait(id, Duration::from_secs(10))
            .await
            .expect("job did not finish")
    }

    pub fn count_files(dir: &Path) -> usize {
        walk(dir)
    }
}

fn walk(dir: &Path) -> usize {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| {
                let path = e.path();
                if path.is_dir() {
                    walk(&path)
                } else {
                    1
                }
            })
            .sum(),
        Err(_) => 0,
    }
}

/// Build a multipart/form-data request by hand.
pub fn multipart_request(
    uri: &str,
    fields: &[(&str, &str)],
    file: Option<(&str, &[u8])>,
) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, content)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::post(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
}
