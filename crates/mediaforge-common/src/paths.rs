//! Path utilities for upload names and media extensions.
//!
//! Client-supplied file names are untrusted. [`validate_upload_name`] is the
//! single gate they pass through before any part of them reaches a path on
//! disk; extension helpers decide which inputs the pipeline accepts.

use std::path::{Component, Path};

use crate::error::{Error, Result};

/// Video container extensions accepted as input.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "webm"];

/// Audio-only extensions accepted as input.
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "aac", "m4a", "flac"];

/// Longest upload name accepted, in bytes.
pub const MAX_UPLOAD_NAME_LEN: usize = 255;

/// Lowercased extension of a file name or path, if any.
///
/// ```
/// use std::path::Path;
/// use mediaforge_common::paths::extension_of;
///
/// assert_eq!(extension_of(Path::new("clip.MP4")).as_deref(), Some("mp4"));
/// assert_eq!(extension_of(Path::new("README")), None);
/// ```
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Check if a path has a video container extension.
///
/// ```
/// use std::path::Path;
/// use mediaforge_common::paths::is_video_file;
///
/// assert!(is_video_file(Path::new("clip.mkv")));
/// assert!(!is_video_file(Path::new("song.mp3")));
/// ```
pub fn is_video_file(path: &Path) -> bool {
    extension_of(path)
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Check if a path has an audio-only extension.
pub fn is_audio_file(path: &Path) -> bool {
    extension_of(path)
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Check if a path has any accepted media extension.
pub fn is_allowed_media_file(path: &Path) -> bool {
    is_video_file(path) || is_audio_file(path)
}

/// Get the list of accepted video extensions.
pub fn video_extensions() -> &'static [&'static str] {
    VIDEO_EXTENSIONS
}

/// Get the list of accepted audio extensions.
pub fn audio_extensions() -> &'static [&'static str] {
    AUDIO_EXTENSIONS
}

/// Validate a client-supplied file name.
///
/// The name must be a single plain path segment: no separators, no `..`,
/// no drive or root prefix, no NUL or control characters, no leading dot.
/// Returns the name unchanged when it is safe to embed in a stored file name.
///
/// ```
/// use mediaforge_common::paths::validate_upload_name;
///
/// assert_eq!(validate_upload_name("holiday clip.mp4").unwrap(), "holiday clip.mp4");
/// assert!(validate_upload_name("../../etc/passwd").is_err());
/// assert!(validate_upload_name("/etc/passwd").is_err());
/// ```
pub fn validate_upload_name(name: &str) -> Result<&str> {
    if name.trim().is_empty() {
        return Err(Error::validation("file name is empty"));
    }
    if name.len() > MAX_UPLOAD_NAME_LEN {
        return Err(Error::validation(format!(
            "file name is longer than {MAX_UPLOAD_NAME_LEN} bytes"
        )));
    }
    if name.chars().any(|c| c == '\0' || c.is_control()) {
        return Err(Error::validation(
            "file name contains control characters",
        ));
    }
    if name.contains(['/', '\\', ':']) {
        return Err(Error::validation(
            "file name contains path separators",
        ));
    }
    if name.contains("..") {
        return Err(Error::validation(
            "file name contains a traversal sequence",
        ));
    }
    if name.starts_with('.') {
        return Err(Error::validation("file name starts with a dot"));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(Error::validation("file name must be a single path segment")),
    }
}

/// Require an accepted media extension, returning it lowercased.
pub fn require_media_extension(name: &str) -> Result<String> {
    let path = Path::new(name);
    match extension_of(path) {
        Some(ext) if is_allowed_media_file(path) => Ok(ext),
        Some(ext) => Err(Error::validation(format!(
            "unsupported file type '.{ext}' (allowed: {})",
            allowed_extensions_list()
        ))),
        None => Err(Error::validation(format!(
            "file has no extension (allowed: {})",
            allowed_extensions_list()
        ))),
    }
}

fn allowed_extensions_list() -> String {
    video_extensions()
        .iter()
        .chain(audio_extensions())
        .copied()
        .collect::<Vec<_>>()
        .join(", ")
}

/// MIME type served for a stored artifact, chosen by extension.
pub fn content_type_for(path: &Path) -> &'static str {
    match extension_of(path).as_deref() {
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("aac") => "audio/aac",
        Some("m4a") => "audio/mp4",
        Some("flac") => "audio/flac",
        _ => "application/octet-stream",
    }
}
