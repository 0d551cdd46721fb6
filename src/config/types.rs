use mediaforge_av::{EngineSettings, ToolsConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub fonts: FontsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Where uploaded inputs are written
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Where per-job output directories are created
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Maximum accepted upload size in megabytes
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u64,

    /// How long artifacts of finished jobs are kept (seconds)
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// How often the retention sweeper runs (seconds)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}
fn default_max_upload_mb() -> u64 {
    512
}
fn default_retention_secs() -> u64 {
    3600
}
fn default_sweep_interval_secs() -> u64 {
    60
}

impl StorageConfig {
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            output_dir: default_output_dir(),
            max_upload_mb: default_max_upload_mb(),
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorConfig {
    /// Number of jobs that may run at once
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Jobs allowed to wait for a slot before submissions are refused
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Wall-clock limit for one ffmpeg run (seconds)
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Wall-clock limit for input inspection (seconds)
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Delay between SIGTERM and SIGKILL (seconds)
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,

    /// Bytes of engine stderr kept for diagnostics
    #[serde(default = "default_stderr_limit_bytes")]
    pub stderr_limit_bytes: usize,
}

fn default_workers() -> usize {
    1
}
fn default_queue_capacity() -> usize {
    16
}
fn default_job_timeout_secs() -> u64 {
    600
}
fn default_probe_timeout_secs() -> u64 {
    30
}
fn default_grace_period_secs() -> u64 {
    5
}
fn default_stderr_limit_bytes() -> usize {
    16 * 1024
}

impl ExecutorConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Process settings for the ffmpeg-backed engine.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            grace_period: self.grace_period(),
            probe_timeout: self.probe_timeout(),
            output_limit: self.stderr_limit_bytes,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            job_timeout_secs: default_job_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            grace_period_secs: default_grace_period_secs(),
            stderr_limit_bytes: default_stderr_limit_bytes(),
        }
    }
}

/// Fonts available to `overlay_text`, by name
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FontsConfig {
    #[serde(default = "default_font_name")]
    pub default: String,

    #[serde(default = "default_font_files")]
    pub files: BTreeMap<String, PathBuf>,
}

fn default_font_name() -> String {
    "dejavu-sans-bold".to_string()
}

fn default_font_files() -> BTreeMap<String, PathBuf> {
    BTreeMap::from([
        (
            "dejavu-sans-bold".to_string(),
            PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf"),
        ),
        (
            "dejavu-sans".to_string(),
            PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf"),
        ),
    ])
}

impl FontsConfig {
    /// Resolve a font name (or the default when `None`) to its file.
    pub fn resolve(&self, name: Option<&str>) -> Option<&PathBuf> {
        self.files.get(name.unwrap_or(&self.default))
    }
}

impl Default for FontsConfig {
    fn default() -> Self {
        Self {
            default: default_font_name(),
            files: default_font_files(),
        }
    }
}
