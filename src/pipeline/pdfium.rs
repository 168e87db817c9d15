//! Locating and binding the pdfium shared library.
//!
//! Lookup order, first hit wins:
//!
//! 1. the configured path (`--pdfium-lib-path`), either the library file
//!    itself or the directory holding it
//! 2. `PDFIUM_LIB_PATH`, same rules
//! 3. the per-user cache, e.g. `~/.cache/docfields/pdfium/`
//! 4. the current working directory
//! 5. the system library search path
//!
//! Candidates that do not exist on disk are skipped without trying to bind.

use crate::error::ExtractError;
use pdfium_render::prelude::Pdfium;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Cache subdirectory, below the platform cache dir.
const CACHE_SUBDIR: &str = "docfields/pdfium";

/// Per-user directory searched for the pdfium library.
///
/// `~/.cache/docfields/pdfium` on Linux, `~/Library/Caches/docfields/pdfium`
/// on macOS, `%LOCALAPPDATA%\docfields\pdfium` on Windows.
pub fn pdfium_cache_dir() -> PathBuf {
    let base = dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir);
    base.join(CACHE_SUBDIR)
}

/// Turn a user-supplied path into the library file path.
///
/// Directories get the platform library name appended
/// (`libpdfium.so`, `libpdfium.dylib`, `pdfium.dll`).
fn library_file(path: &Path) -> PathBuf {
    if path.is_dir() {
        Pdfium::pdfium_platform_library_name_at_path(&path.to_path_buf())
    } else {
        path.to_path_buf()
    }
}

/// Existing library files to try, in lookup order.
pub fn candidate_paths(configured: Option<&Path>) -> Vec<PathBuf> {
    let env = std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from);

    let mut candidates: Vec<PathBuf> = configured
        .map(Path::to_path_buf)
        .into_iter()
        .chain(env)
        .map(|p| library_file(&p))
        .collect();
    candidates.push(library_file(&pdfium_cache_dir()));
    candidates.push(library_file(Path::new("./")));

    candidates.retain(|p| p.is_file());
    candidates.dedup();
    candidates
}

/// Bind to pdfium, trying each candidate before the system library.
pub fn bind_pdfium(configured: Option<&Path>) -> Result<Pdfium, ExtractError> {
    let mut failures = Vec::new();

    for path in candidate_paths(configured) {
        match Pdfium::bind_to_library(&path) {
            Ok(bindings) => {
                debug!("Bound pdfium from {}", path.display());
                return Ok(Pdfium::new(bindings));
            }
            Err(e) => failures.push(format!("{}: {e:?}", path.display())),
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => {
            debug!("Bound pdfium from system library path");
            Ok(Pdfium::new(bindings))
        }
        Err(e) => {
            failures.push(format!("system library: {e:?}"));
            Err(ExtractError::PdfiumBindingFailed(failures.join("; ")))
        }
    }
}
