//! # docfields
//!
//! Extract the portrait photo and signature from passports and ID documents.
//!
//! An upload (PDF or raster image) is validated, staged on disk, rasterised
//! when it is a PDF, run through an object detector and every detection is
//! cropped out of the original image into its own PNG. The crops are served
//! back over HTTP.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Input   check the extension, stage the bytes under a random name
//!  ├─ 2. Render  PDF only: rasterise one page via pdfium (spawn_blocking)
//!  ├─ 3. Detect  YOLO ONNX model (or the generic placeholder)
//!  ├─ 4. Crop    class id → field name, one PNG per detection
//!  └─ 5. Output  ExtractionResult, staged file removed
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docfields::{Extractor, ServiceConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder()
//!         .model_path("passport_layout.onnx")
//!         .build()?;
//!     config.ensure_dirs()?;
//!     let extractor = Arc::new(Extractor::from_config(config));
//!     let result = extractor
//!         .extract_file("passport.pdf".as_ref(), Some(1))
//!         .await?;
//!     println!("{}", result.message);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docfields` binary (clap + anyhow + tracing-subscriber) |
//! | `cuda`  | off     | CUDA execution provider for ONNX Runtime |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{Device, ModelKind, ServiceConfig, ServiceConfigBuilder};
pub use error::{ErrorKind, ExtractError};
pub use extract::{DetectorState, Extractor, Upload};
pub use output::{
    BoundingBox, CleanupReport, Detection, DetectionRecord, ExtractedField, ExtractionResult,
    HealthReport, HealthStatus, RequestMetadata,
};
pub use pipeline::detect::{Detector, SharedDetector};
pub use pipeline::render::{PageRasterizer, PdfiumRasterizer, RenderedPage, SharedRasterizer};
pub use server::{create_app, serve};
