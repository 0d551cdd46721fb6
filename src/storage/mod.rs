//! Upload and output directory management.
//!
//! The [`StorageManager`] is the only component that creates or deletes files.
//! Inputs land in the upload directory as `<job-id-short>_<name>`; outputs go
//! to a per-job directory under the output root. Every path it hands out or
//! accepts back stays inside those two roots.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use mediaforge_common::paths::validate_upload_name;
use mediaforge_common::{Error, JobId, Result};
use serde::Serialize;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::config::StorageConfig;

/// Boxed error produced by an upload body stream.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A file written by the storage manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredFile {
    /// Absolute or config-relative path on disk.
    pub path: PathBuf,
    /// File name component of `path`.
    pub file_name: String,
    /// Size in bytes.
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct StorageManager {
    upload_dir: PathBuf,
    output_dir: PathBuf,
    max_upload_bytes: u64,
}

impl StorageManager {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            upload_dir: config.upload_dir.clone(),
            output_dir: config.output_dir.clone(),
            max_upload_bytes: config.max_upload_bytes(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Create both managed directories if they are missing.
    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.upload_dir, &self.output_dir] {
            fs::create_dir_all(dir).await.map_err(|e| {
                storage_error(format!("cannot create directory {}", dir.display()), e)
            })?;
        }
        Ok(())
    }

    /// Stream an upload to `<upload_dir>/<job-id>_<name>`.
    ///
    /// The name is validated before anything touches the filesystem. A file
    /// that grows past the size limit, or whose body stream fails, is removed
    /// before the error is returned.
    pub async fn store<S, E>(&self, job_id: JobId, suggested_name: &str, body: S) -> Result<StoredFile>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Into<BoxError>,
    {
        let name = validate_upload_name(suggested_name)?;
        let file_name = format!("{}_{}", job_id.simple(), name);
        let path = self.upload_dir.join(&file_name);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| storage_error(format!("cannot create {}", path.display()), e))?;

        match self.write_body(file, body).await {
            Ok(size) => {
                tracing::debug!(job_id = %job_id, path = %path.display(), size, "stored upload");
                Ok(StoredFile {
                    path,
                    file_name,
                    size,
                })
            }
            Err(e) => {
                self.remove_quietly(&path).await;
                Err(e)
            }
        }
    }

    async fn write_body<S, E>(&self, file: File, body: S) -> Result<u64>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Into<BoxError>,
    {
        futures::pin_mut!(body);
        let mut writer = BufWriter::new(file);
        let mut written: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                let e: BoxError = e.into();
                Error::Storage(format!("upload interrupted: {e}"))
            })?;
            written += chunk.len() as u64;
            if written > self.max_upload_bytes {
                return Err(Error::PayloadTooLarge {
                    limit: self.max_upload_bytes,
                });
            }
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| storage_error("write failed", e))?;
        }

        writer
            .flush()
            .await
            .map_err(|e| storage_error("flush failed", e))?;
        Ok(written)
    }

    /// Reserve `<output_dir>/<job-id>/<stem>_processed.<ext>`.
    ///
    /// Creates the per-job directory; the file itself is left to the engine.
    pub async fn allocate_output_path(&self, job_id: JobId, stem: &str, ext: &str) -> Result<PathBuf> {
        let job_dir = self.output_dir.join(job_id.to_string());
        fs::create_dir_all(&job_dir)
            .await
            .map_err(|e| storage_error(format!("cannot create {}", job_dir.display()), e))?;
        Ok(job_dir.join(format!("{stem}_processed.{ext}")))
    }

    /// Open a managed file for reading.
    pub async fn retrieve(&self, path: &Path) -> Result<(File, u64)> {
        self.ensure_managed(path)?;
        let file = File::open(path).await.map_err(|e| match e.kind() {
            IoErrorKind::NotFound => Error::not_found("file", path.display()),
            _ => storage_error(format!("cannot open {}", path.display()), e),
        })?;
        let size = file
            .metadata()
            .await
            .map_err(|e| storage_error("cannot stat file", e))?
            .len();
        Ok((file, size))
    }

    /// Size of a managed file, or `None` if it does not exist.
    pub async fn size_of(&self, path: &Path) -> Result<Option<u64>> {
        self.ensure_managed(path)?;
        match fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error("cannot stat file", e)),
        }
    }

    /// Delete a managed file. Missing files are not an error.
    ///
    /// When the file sat in a per-job output directory that is now empty,
    /// that directory is removed too.
    pub async fn purge(&self, path: &Path) -> Result<()> {
        self.ensure_managed(path)?;
        match fs::remove_file(path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "purged"),
            Err(e) if e.kind() == IoErrorKind::NotFound => {}
            Err(e) => return Err(storage_error(format!("cannot remove {}", path.display()), e)),
        }

        if let Some(parent) = path.parent() {
            if parent != self.output_dir && parent.starts_with(&self.output_dir) {
                // Fails harmlessly while the directory still has entries.
                let _ = fs::remove_dir(parent).await;
            }
        }
        Ok(())
    }

    /// Remove a job's whole output directory, including partial files.
    pub async fn purge_job_outputs(&self, job_id: JobId) -> Result<()> {
        let job_dir = self.output_dir.join(job_id.to_string());
        match fs::remove_dir_all(&job_dir).await {
            Ok(()) => {
                tracing::debug!(job_id = %job_id, "removed output directory");
                Ok(())
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error(format!("cannot remove {}", job_dir.display()), e)),
        }
    }

    async fn remove_quietly(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path).await {
            if e.kind() != IoErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove partial upload");
            }
        }
    }

    /// Refuse paths outside the managed roots or containing `..`.
    fn ensure_managed(&self, path: &Path) -> Result<()> {
        let escapes = path
            .components()
            .any(|c| matches!(c, Component::ParentDir));
        let inside = path.starts_with(&self.upload_dir) || path.starts_with(&self.output_dir);
        if escapes || !inside {
            return Err(Error::validation(format!(
                "path {} is outside managed storage",
                path.display()
            )));
        }
        Ok(())
    }
}

/// Wrap an I/O failure, keeping the raw error when the disk is full so it
/// still maps to 507.
fn storage_error(context: impl Into<String>, err: std::io::Error) -> Error {
    let context = context.into();
    tracing::error!(error = %err, "{context}");
    let io = Error::from(err);
    if io.http_status() == 507 {
        io
    } else {
        Error::Storage(format!("{context}: {io}"))
    }
}
