//! Mediaforge-Common: Shared types, constants, and utilities.
//!
//! This crate provides the vocabulary shared by the job pipeline:
//!
//! - **Typed IDs**: [`JobId`], a UUID wrapper identifying one transformation request
//! - **Core Types**: job status, failure kinds, and media kinds
//! - **Path Utilities**: upload name validation and extension allow-lists
//! - **Error Handling**: the unified [`Error`] type and its HTTP mapping
//!
//! # Examples
//!
//! ```
//! use mediaforge_common::{JobId, JobStatus, Error, Result};
//! use mediaforge_common::paths::validate_upload_name;
//!
//! let job_id = JobId::new();
//! assert_eq!(job_id.short().len(), 8);
//!
//! assert!(JobStatus::Succeeded.is_terminal());
//! assert!(validate_upload_name("../../etc/passwd").is_err());
//!
//! fn example() -> Result<()> {
//!     Err(Error::not_found("job", "abc"))
//! }
//! assert!(example().is_err());
//! ```

pub mod error;
pub mod ids;
pub mod paths;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use types::*;
