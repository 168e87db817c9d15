//! Per-request orchestration.
//!
//! [`Extractor`] owns the configuration, the detector constructed at
//! startup, the PDF page rasterizer and the field map. One call to
//! [`Extractor::extract`] walks a request through
//!
//! ```text
//! Received ─▶ Validated ─▶ (Converted, PDF only) ─▶ Inferred ─▶ Responded
//!                                                              └▶ CleanedUp
//! ```
//!
//! Any failure short-circuits with an [`ExtractError`]. The staged upload is
//! a drop guard, so cleanup runs on the error paths too.

use crate::config::{Device, ServiceConfig};
use crate::error::ExtractError;
use crate::output::{
    CleanupReport, ExtractionResult, HealthReport, HealthStatus, RequestMetadata,
};
use crate::pipeline::crop::{crop_detections, CropOutput, CropTarget, FieldMap};
use crate::pipeline::detect::{load_detector, SharedDetector};
use crate::pipeline::input::{clear_staging_dir, validate_filename, InputKind, StagedUpload};
use crate::pipeline::render::{PdfiumRasterizer, RenderSettings, SharedRasterizer};
use image::{DynamicImage, ImageReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// URL prefix the crop directory is served under.
pub const EXTRACTED_URL_PREFIX: &str = "/extracted";

/// Page rendered when the client does not ask for one.
pub const DEFAULT_PAGE: u32 = 1;

/// One uploaded document.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Client-supplied file name; only its extension is trusted.
    pub filename: String,
    pub bytes: Vec<u8>,
    /// 1-indexed page for PDFs. Ignored for images.
    pub page_number: Option<u32>,
}

/// The detector as constructed at startup.
#[derive(Clone)]
pub enum DetectorState {
    Ready(SharedDetector),
    /// Loading failed; the message is reported on `/health` and returned
    /// by every extraction.
    Failed(String),
}

/// Request-handling component shared by all requests.
pub struct Extractor {
    config: ServiceConfig,
    detector: DetectorState,
    rasterizer: SharedRasterizer,
    fields: FieldMap,
}

impl Extractor {
    fn with_state(config: ServiceConfig, detector: DetectorState) -> Self {
        let rasterizer = Arc::new(PdfiumRasterizer::new(RenderSettings::from(&config)));
        Self {
            config,
            detector,
            rasterizer,
            fields: FieldMap::default(),
        }
    }

    /// Use an already constructed detector.
    pub fn new(config: ServiceConfig, detector: SharedDetector) -> Self {
        Self::with_state(config, DetectorState::Ready(detector))
    }

    /// Replace the pdfium rasterizer used for PDF uploads.
    pub fn with_rasterizer(mut self, rasterizer: SharedRasterizer) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    /// Load the detector described by `config`.
    ///
    /// A load failure does not fail construction: the service still starts
    /// and reports itself unhealthy.
    pub fn from_config(config: ServiceConfig) -> Self {
        let detector = match load_detector(&config) {
            Ok(detector) => DetectorState::Ready(detector),
            Err(e) => {
                error!("Error loading model: {}", e);
                DetectorState::Failed(e.to_string())
            }
        };
        Self::with_state(config, detector)
    }

    /// An extractor whose model failed to load with `reason`.
    pub fn without_detector(config: ServiceConfig, reason: impl Into<String>) -> Self {
        Self::with_state(config, DetectorState::Failed(reason.into()))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Current detector state as reported by `GET /health`.
    pub fn health(&self) -> HealthReport {
        match &self.detector {
            DetectorState::Ready(detector) => HealthReport {
                status: HealthStatus::Healthy,
                model_loaded: true,
                model_type: Some(detector.kind()),
                device: detector.device(),
                error: None,
            },
            DetectorState::Failed(reason) => HealthReport {
                status: HealthStatus::Unhealthy,
                model_loaded: false,
                model_type: None,
                device: effective_device(self.config.device),
                error: Some(reason.clone()),
            },
        }
    }

    fn detector(&self) -> Result<&SharedDetector, ExtractError> {
        match &self.detector {
            DetectorState::Ready(detector) => Ok(detector),
            DetectorState::Failed(reason) => Err(ExtractError::ModelNotLoaded(reason.clone())),
        }
    }

    /// Run one upload through the pipeline.
    pub async fn extract(&self, upload: Upload) -> Result<ExtractionResult, ExtractError> {
        let started = Instant::now();

        // ── Validated ────────────────────────────────────────────────────
        let name = validate_filename(&upload.filename)?;
        let page_number = upload.page_number.unwrap_or(DEFAULT_PAGE);
        if page_number == 0 {
            return Err(ExtractError::InvalidPageNumber(page_number));
        }
        let detector = Arc::clone(self.detector()?);

        let staged = StagedUpload::write(&self.config.upload_dir, &name, &upload.bytes).await?;

        let source = match name.kind {
            InputKind::Pdf => ImageSource::PdfPage {
                path: staged.path().to_path_buf(),
                page_number,
                rasterizer: Arc::clone(&self.rasterizer),
            },
            InputKind::Image => ImageSource::File {
                path: staged.path().to_path_buf(),
                filename: name.filename.clone(),
            },
        };

        // ── Converted (PDF only) and Inferred, on the blocking pool ─────────
        let fields = self.fields.clone();
        let out_dir = self.config.extracted_dir();
        let inference_detector = Arc::clone(&detector);
        let crops = tokio::task::spawn_blocking(move || -> Result<CropOutput, ExtractError> {
            let image = source.load()?;
            debug!("Running inference on {}x{} image", image.width(), image.height());
            let detections = inference_detector.detect(&image)?;
            let target = CropTarget {
                dir: &out_dir,
                url_prefix: EXTRACTED_URL_PREFIX,
            };
            crop_detections(&image, &detections, &fields, &target)
        })
        .await
        .map_err(|e| ExtractError::Internal(format!("Inference task panicked: {}", e)))??;

        // ── Responded ────────────────────────────────────────────────────
        let result = ExtractionResult {
            success: true,
            message: ExtractionResult::summary(crops.extracted.len()),
            extracted_images: crops.extracted,
            detections: crops.records,
            model_type: detector.kind(),
            note: detector.note().map(str::to_string),
            error: None,
            metadata: Some(RequestMetadata {
                filename: name.filename.clone(),
                file_type: name.file_type(),
                page_number: (name.kind == InputKind::Pdf).then_some(page_number),
            }),
        };

        // ── CleanedUp ────────────────────────────────────────────────────
        staged.discard().await;

        info!(
            "Extraction of '{}' complete: {} fields, {} detections, {}ms",
            name.filename,
            result.extracted_images.len(),
            result.detections.len(),
            started.elapsed().as_millis()
        );
        Ok(result)
    }

    /// Extract from a local file (CLI mode).
    pub async fn extract_file(
        &self,
        path: &Path,
        page_number: Option<u32>,
    ) -> Result<ExtractionResult, ExtractError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ExtractError::FileNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ExtractError::InputRead {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.extract(Upload {
            filename,
            bytes,
            page_number,
        })
        .await
    }

    /// Delete every file directly in the staging directory.
    pub async fn cleanup(&self) -> Result<CleanupReport, ExtractError> {
        let count = clear_staging_dir(&self.config.upload_dir).await?;
        Ok(CleanupReport::new(count))
    }
}

/// Device a failed load would have used, for health reporting.
fn effective_device(requested: Device) -> Device {
    if cfg!(feature = "cuda") {
        requested
    } else {
        Device::Cpu
    }
}

/// The image handed to the detector.
enum ImageSource {
    /// One page of a staged PDF, rasterised on the blocking pool.
    PdfPage {
        path: PathBuf,
        page_number: u32,
        rasterizer: SharedRasterizer,
    },
    /// A staged image upload, decoded on the blocking pool.
    File { path: PathBuf, filename: String },
}

impl ImageSource {
    fn load(self) -> Result<DynamicImage, ExtractError> {
        match self {
            ImageSource::PdfPage {
                path,
                page_number,
                rasterizer,
            } => Ok(rasterizer.rasterize(&path, page_number)?.image),
            ImageSource::File { path, filename } => {
                let decode_err = |detail: String| ExtractError::ImageDecode {
                    filename: filename.clone(),
                    detail,
                };
                ImageReader::open(&path)
                    .map_err(|e| decode_err(e.to_string()))?
                    .with_guessed_format()
                    .map_err(|e| decode_err(e.to_string()))?
                    .decode()
                    .map_err(|e| decode_err(e.to_string()))
            }
        }
    }
}
