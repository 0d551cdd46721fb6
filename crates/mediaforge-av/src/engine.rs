//! The media engine seam used by the job executor.
//!
//! [`MediaEngine`] is the narrow interface the executor drives: inspect an
//! input, then run one argument vector under a deadline. [`FfmpegEngine`]
//! implements it with the discovered ffmpeg/ffprobe binaries; tests swap in
//! fakes or shell scripts.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use mediaforge_common::{Error, MediaKind, Result};
use tokio_util::sync::CancellationToken;

use crate::command::{ExecutionResult, Termination, ToolCommand};
use crate::probe;
use crate::tools::ToolRegistry;

/// Runs media inspection and transformation.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Detect whether `input` carries a video stream.
    ///
    /// Returns [`Error::Timeout`] or [`Error::Cancelled`] when interrupted.
    async fn inspect(&self, input: &Path, cancel: &CancellationToken) -> Result<MediaKind>;

    /// Run the engine with `args`, stopping it at `timeout` or on `cancel`.
    async fn invoke(
        &self,
        args: &[String],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult>;
}

/// Process settings shared by every engine invocation.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Delay between SIGTERM and SIGKILL.
    pub grace_period: Duration,
    /// Deadline for ffprobe.
    pub probe_timeout: Duration,
    /// Bytes kept from the tail of stdout/stderr.
    pub output_limit: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(30),
            output_limit: 16 * 1024,
        }
    }
}

/// [`MediaEngine`] backed by the ffmpeg and ffprobe executables.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    tools: ToolRegistry,
    settings: EngineSettings,
}

impl FfmpegEngine {
    pub fn new(tools: ToolRegistry, settings: EngineSettings) -> Self {
        Self { tools, settings }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }
}

#[async_trait]
impl MediaEngine for FfmpegEngine {
    async fn inspect(&self, input: &Path, cancel: &CancellationToken) -> Result<MediaKind> {
        let ffprobe = self.tools.require("ffprobe")?;
        let result = ToolCommand::new(ffprobe.to_path_buf())
            .args(probe::video_stream_args(input))
            .timeout(self.settings.probe_timeout)
            .grace_period(self.settings.grace_period)
            .output_limit(self.settings.output_limit)
            .execute(cancel)
            .await?;

        match result.termination {
            Termination::TimedOut => Err(Error::Timeout {
                after: self.settings.probe_timeout,
            }),
            Termination::Cancelled => Err(Error::Cancelled),
            Termination::Exited if result.success() => {
                Ok(probe::media_kind_from_output(&result.truncated_stdout))
            }
            Termination::Exited => {
                tracing::warn!(
                    input = %input.display(),
                    exit_code = ?result.exit_code,
                    stderr = result.last_stderr_line().unwrap_or_default(),
                    "ffprobe failed, treating input as audio-only"
                );
                Ok(MediaKind::Audio)
            }
        }
    }

    async fn invoke(
        &self,
        args: &[String],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult> {
        let ffmpeg = self.tools.require("ffmpeg")?;
        ToolCommand::new(ffmpeg.to_path_buf())
            .args(args.iter().cloned())
            .timeout(timeout)
            .grace_period(self.settings.grace_period)
            .output_limit(self.settings.output_limit)
            .execute(cancel)
            .await
    }
}
