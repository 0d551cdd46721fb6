//! # mediaforge-av
//!
//! External media engine integration for the mediaforge job pipeline.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to ffmpeg
//!   and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder running a
//!   process in its own group with a mandatory timeout, cooperative
//!   cancellation, SIGTERM/grace/SIGKILL termination and bounded output capture.
//! - **Transformations** ([`transform`]) -- validated operation parameters
//!   and the allow-listed ffmpeg argument vectors built from them.
//! - **Input inspection** ([`probe`]) -- ffprobe-based video stream detection.
//! - **Engine seam** ([`MediaEngine`], [`FfmpegEngine`]) -- the trait the
//!   executor drives, with the real ffmpeg-backed implementation.

pub mod command;
pub mod engine;
pub mod probe;
pub mod tools;
pub mod transform;

// ---- Re-exports for convenience ----

pub use command::{ExecutionResult, Termination, ToolCommand};
pub use engine::{EngineSettings, FfmpegEngine, MediaEngine};
pub use tools::{ToolInfo, ToolRegistry, ToolsConfig};
pub use transform::{
    FontColor, MetadataKey, Operation, OutputFormat, OverlayStyle, Timestamp, TransformKind,
    Transformation,
};
