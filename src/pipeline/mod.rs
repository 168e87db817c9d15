//! Pipeline stages for field extraction.
//!
//! Each submodule implements exactly one transformation step, so each is
//! testable on its own and the orchestration in [`crate::extract`] stays a
//! straight line.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ detect ──▶ crop
//! (stage)   (pdfium)   (ONNX)     (PNG files)
//! ```
//!
//! 1. [`input`]: validate the extension and stage the bytes on disk;
//!    the staged file deletes itself when the request ends
//! 2. [`render`]: PDF only: rasterise one page at the configured DPI;
//!    runs in `spawn_blocking` because pdfium is not async-safe
//! 3. [`detect`]: run the detector chosen at startup
//! 4. [`crop`]: map classes to field names and write one crop per
//!    detection
//!
//! [`pdfium`] locates the pdfium shared library for [`render`].

pub mod crop;
pub mod detect;
pub mod input;
pub mod pdfium;
pub mod render;
