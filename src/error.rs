//! Error types for the docfields library.
//!
//! Every failure a request can hit is an [`ExtractError`]. The HTTP layer
//! does not match on individual variants; it asks [`ExtractError::kind`]
//! which of four classes the error belongs to and picks the status code and
//! body shape from that:
//!
//! | Kind | Status | Body |
//! |------|--------|------|
//! | [`ErrorKind::Validation`] | 400 | `{"detail": …}` |
//! | [`ErrorKind::Conversion`] | 500 | `{"detail": "PDF conversion failed: …"}` |
//! | [`ErrorKind::Inference`]  | 500 | `{"success": false, "error": …, "fields": {}}` |
//! | [`ErrorKind::Internal`]   | 500 | `{"detail": …}` |
//!
//! Failures while removing transient files are never surfaced as errors;
//! they are logged where they happen.

use crate::pipeline::input::ALLOWED_EXTENSIONS;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of an [`ExtractError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The client sent something we refuse to process.
    Validation,
    /// The PDF could not be turned into a raster image.
    Conversion,
    /// The model is missing or failed, or the image could not be loaded.
    Inference,
    /// Anything else (staging I/O, join errors).
    Internal,
}

/// All errors returned by the docfields library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// The upload's extension is not in the allow-set.
    #[error("File type not allowed. Supported: {}", allowed_list())]
    UnsupportedFileType { filename: String },

    /// The multipart body had no `file` part.
    #[error("No file uploaded: expected a multipart field named 'file'")]
    MissingFile,

    /// Pages are 1-indexed.
    #[error("Invalid page number {0}: pages are 1-indexed")]
    InvalidPageNumber(u32),

    /// The multipart body could not be parsed.
    #[error("Malformed upload: {0}")]
    MalformedUpload(String),

    /// A local input file (CLI mode) does not exist.
    #[error("Input file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// The requested page does not exist in the document.
    #[error("No images found in PDF page {page} (document has {total} pages)")]
    PageOutOfRange { page: u32, total: usize },

    /// pdfium could not open the document.
    #[error("PDF '{path}' could not be opened: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// pdfium returned an error while rendering a page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: u32, detail: String },

    /// No pdfium library could be bound.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or pass --pdfium-lib-path."
    )]
    PdfiumBindingFailed(String),

    // ── Inference errors ──────────────────────────────────────────────────
    /// The detector was not constructed at startup.
    #[error("Model not loaded: {0}")]
    ModelNotLoaded(String),

    /// Loading the model file failed.
    #[error("Failed to load model '{path}': {detail}")]
    ModelLoad { path: PathBuf, detail: String },

    /// The uploaded (or rasterised) image could not be decoded.
    #[error("Failed to load image '{filename}': {detail}")]
    ImageDecode { filename: String, detail: String },

    /// ONNX Runtime returned an error or an unexpected output.
    #[error("Inference failed: {0}")]
    Inference(String),

    /// A crop could not be written to the output directory.
    #[error("Failed to save crop '{path}': {detail}")]
    CropWriteFailed { path: PathBuf, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// The upload could not be written to the staging directory.
    #[error("Failed to stage upload at '{path}': {source}")]
    StagingFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A local input file exists but could not be read.
    #[error("Failed to read '{path}': {source}")]
    InputRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Listing or deleting the staging directory failed.
    #[error("Cleanup of '{path}' failed: {source}")]
    CleanupFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// Which class of failure this is.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::UnsupportedFileType { .. }
            | ExtractError::MissingFile
            | ExtractError::InvalidPageNumber(_)
            | ExtractError::MalformedUpload(_)
            | ExtractError::FileNotFound { .. } => ErrorKind::Validation,

            ExtractError::PageOutOfRange { .. }
            | ExtractError::CorruptPdf { .. }
            | ExtractError::RasterisationFailed { .. }
            | ExtractError::PdfiumBindingFailed(_) => ErrorKind::Conversion,

            ExtractError::ModelNotLoaded(_)
            | ExtractError::ModelLoad { .. }
            | ExtractError::ImageDecode { .. }
            | ExtractError::Inference(_)
            | ExtractError::CropWriteFailed { .. } => ErrorKind::Inference,

            ExtractError::StagingFailed { .. }
            | ExtractError::InputRead { .. }
            | ExtractError::CleanupFailed { .. }
            | ExtractError::InvalidConfig(_)
            | ExtractError::Internal(_) => ErrorKind::Internal,
        }
    }
}

fn allowed_list() -> String {
    ALLOWED_EXTENSIONS
        .iter()
        .map(|ext| format!(".{ext}"))
        .collect::<Vec<_>>()
        .join(", ")
}
