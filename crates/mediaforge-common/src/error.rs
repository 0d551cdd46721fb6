//! Unified error type for mediaforge.
//!
//! Every crate funnels its failures into [`Error`]. Each variant maps to a
//! job-level [`ErrorKind`] via [`Error::kind`] and to an HTTP status code via
//! [`Error::http_status`].

use std::fmt;
use std::time::Duration;

use crate::types::{ErrorKind, JobError, JobStatus};

/// ENOSPC on Linux and macOS.
const NO_SPACE_LEFT: i32 = 28;

/// Unified error type covering all failure modes in mediaforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A storage operation failed for a reason other than raw I/O.
    #[error("Storage error: {0}")]
    Storage(String),

    /// An upload exceeded the configured size limit.
    #[error("Upload exceeds the maximum size of {limit} bytes")]
    PayloadTooLarge {
        /// The configured limit in bytes.
        limit: u64,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "job", "result").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The pending queue is full.
    #[error("Queue is full ({capacity} pending jobs); retry later")]
    Backpressure {
        /// The configured queue capacity.
        capacity: usize,
    },

    /// An external invocation ran past its deadline.
    #[error("Timed out after {}s", after.as_secs_f64())]
    Timeout {
        /// The deadline that was exceeded.
        after: Duration,
    },

    /// An external tool (ffmpeg, ffprobe) failed.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// The job was cancelled.
    #[error("Cancelled")]
    Cancelled,

    /// The job already reached a terminal status.
    #[error("Job {id} is already {status}")]
    AlreadyTerminal {
        /// The job identifier.
        id: String,
        /// The terminal status it holds.
        status: JobStatus,
    },

    /// A state transition that the job lifecycle does not allow.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The job-level failure kind this error records as.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::ValidationError,
            Error::Storage(_) | Error::PayloadTooLarge { .. } | Error::Io { .. } => {
                ErrorKind::StorageError
            }
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Backpressure { .. } => ErrorKind::BackpressureError,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Tool { .. }
            | Error::AlreadyTerminal { .. }
            | Error::Conflict(_)
            | Error::Internal(_) => ErrorKind::EngineFailure,
        }
    }

    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Storage(_) => 500,
            Error::PayloadTooLarge { .. } => 413,
            Error::Io { source } if is_out_of_space(source) => 507,
            Error::Io { .. } => 500,
            Error::NotFound { .. } => 404,
            Error::Backpressure { .. } => 429,
            Error::Timeout { .. } => 504,
            Error::Tool { .. } => 502,
            Error::Cancelled => 409,
            Error::AlreadyTerminal { .. } => 409,
            Error::Conflict(_) => 409,
            Error::Internal(_) => 500,
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::AlreadyTerminal`].
    pub fn already_terminal(id: impl fmt::Display, status: JobStatus) -> Self {
        Error::AlreadyTerminal {
            id: id.to_string(),
            status,
        }
    }

    /// Convert into the failure record stored on a job.
    pub fn to_job_error(&self) -> JobError {
        JobError::new(self.kind(), self.to_string())
    }
}

fn is_out_of_space(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(NO_SPACE_LEFT)
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
