//! Input validation and staging.
//!
//! An upload is accepted only if its extension is in [`ALLOWED_EXTENSIONS`].
//! Accepted bytes are written to the upload directory under a fresh UUID
//! name so concurrent requests never collide, and the returned
//! [`StagedUpload`] deletes that file when dropped. Cleanup therefore runs on
//! every exit path of a request, including early returns through `?`.

use crate::error::ExtractError;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Extensions (without dot, lower-case) the service accepts.
pub const ALLOWED_EXTENSIONS: [&str; 6] = ["pdf", "jpg", "jpeg", "png", "tiff", "bmp"];

/// What kind of document an upload is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Page-oriented; needs rasterising before inference.
    Pdf,
    /// Already a raster image.
    Image,
}

/// A validated upload: its original name and normalised extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedName {
    pub filename: String,
    /// Lower-case, without the leading dot.
    pub extension: String,
    pub kind: InputKind,
}

impl ValidatedName {
    /// Extension with a leading dot, as reported in response metadata.
    pub fn file_type(&self) -> String {
        format!(".{}", self.extension)
    }
}

/// Check a client-supplied file name against the allow-set.
pub fn validate_filename(filename: &str) -> Result<ValidatedName, ExtractError> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .filter(|e| ALLOWED_EXTENSIONS.contains(&e.as_str()))
        .ok_or_else(|| ExtractError::UnsupportedFileType {
            filename: filename.to_string(),
        })?;

    let kind = if extension == "pdf" {
        InputKind::Pdf
    } else {
        InputKind::Image
    };

    Ok(ValidatedName {
        filename: filename.to_string(),
        extension,
        kind,
    })
}

/// An upload written to the staging directory.
///
/// The file is removed on drop. Removal failures are logged and otherwise
/// ignored. Drop unlinks inline on the current thread, which is what the
/// early-return error paths get; [`StagedUpload::discard`] does the same
/// work on the blocking pool.
#[derive(Debug)]
pub struct StagedUpload {
    path: PathBuf,
}

impl StagedUpload {
    /// Write `bytes` to `<upload_dir>/<uuid>.<ext>`.
    pub async fn write(
        upload_dir: &Path,
        name: &ValidatedName,
        bytes: &[u8],
    ) -> Result<Self, ExtractError> {
        let path = upload_dir.join(format!("{}.{}", Uuid::new_v4(), name.extension));

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| ExtractError::StagingFailed {
                path: path.clone(),
                source,
            })?;

        info!("File uploaded: {} ({} bytes)", path.display(), bytes.len());
        Ok(Self { path })
    }

    /// Path of the staged file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the staged file on the blocking pool and wait for it.
    pub async fn discard(self) {
        let path = self.path.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || drop(self)).await {
            warn!("Removal of {} did not finish: {}", path.display(), e);
        }
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed staged upload {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Error cleaning up {}: {}", self.path.display(), e),
        }
    }
}

/// Delete every regular file directly inside `upload_dir`.
///
/// Subdirectories (notably `extracted/`) and their contents are left alone.
/// Returns the number of files removed.
pub async fn clear_staging_dir(upload_dir: &Path) -> Result<usize, ExtractError> {
    let cleanup_err = |source| ExtractError::CleanupFailed {
        path: upload_dir.to_path_buf(),
        source,
    };

    let mut entries = match tokio::fs::read_dir(upload_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(cleanup_err(e)),
    };

    let mut count = 0;
    while let Some(entry) = entries.next_entry().await.map_err(cleanup_err)? {
        let file_type = entry.file_type().await.map_err(cleanup_err)?;
        if !file_type.is_file() {
            continue;
        }
        tokio::fs::remove_file(entry.path())
            .await
            .map_err(cleanup_err)?;
        count += 1;
    }

    info!("Cleaned up {} files from {}", count, upload_dir.display());
    Ok(count)
}
