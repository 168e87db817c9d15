//! Service configuration.
//!
//! Everything the service needs at startup lives in [`ServiceConfig`], built
//! via [`ServiceConfigBuilder`]. The binary maps its CLI flags onto the
//! builder; tests build configs pointing at temporary directories.

use crate::error::ExtractError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Name of the crop output directory inside the upload directory.
pub const EXTRACTED_SUBDIR: &str = "extracted";

/// Configuration for the extraction service.
///
/// # Example
/// ```rust
/// use docfields::{ModelKind, ServiceConfig};
///
/// let config = ServiceConfig::builder()
///     .model_path("models/passport_layout.onnx")
///     .model_kind(ModelKind::Yolo)
///     .dpi(300)
///     .build()
///     .unwrap();
/// assert!(config.extracted_dir().ends_with("extracted"));
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Socket address the HTTP server binds to. Default: `0.0.0.0:8000`.
    pub bind_addr: SocketAddr,

    /// Staging directory for uploads. Default: `uploads`.
    ///
    /// Originals are written here for the duration of one request; crops go
    /// to the `extracted/` subdirectory and are kept.
    pub upload_dir: PathBuf,

    /// Path to the ONNX detection model.
    pub model_path: PathBuf,

    /// Which model family `model_path` holds. Default: [`ModelKind::Yolo`].
    pub model_kind: ModelKind,

    /// Execution device for inference. Default: [`Device::Cpu`].
    pub device: Device,

    /// Minimum detection confidence. Default: 0.1.
    ///
    /// Intentionally low: a missed signature is worse than a spurious crop.
    pub confidence_threshold: f32,

    /// IoU above which overlapping same-class boxes are suppressed. Default: 0.7.
    pub iou_threshold: f32,

    /// Side length of the square model input in pixels. Default: 640.
    pub input_size: u32,

    /// Maximum detections kept per image after NMS. Default: 300.
    pub max_detections: usize,

    /// Number of classes the model predicts. If None, the output layout is
    /// assumed to be the standard `[1, 4+nc, N]` export.
    pub num_classes: Option<usize>,

    /// Rendering DPI for PDF pages. Range: 72–600. Default: 300.
    pub dpi: u32,

    /// Cap on the longest rendered edge in pixels. Default: 6000.
    ///
    /// An A4 page at 300 DPI is 2480 × 3508; the cap only bites on posters
    /// and other oversized pages.
    pub max_rendered_pixels: u32,

    /// Maximum accepted request body in bytes. Default: 50 MiB.
    pub max_upload_bytes: usize,

    /// Explicit pdfium library (file or directory). If None, see
    /// [`crate::pipeline::pdfium`] for the lookup order.
    pub pdfium_lib_path: Option<PathBuf>,

    /// ONNX Runtime intra-op threads. Default: 4.
    pub intra_threads: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            upload_dir: PathBuf::from("uploads"),
            model_path: PathBuf::from("passport_layout.onnx"),
            model_kind: ModelKind::default(),
            device: Device::default(),
            confidence_threshold: 0.1,
            iou_threshold: 0.7,
            input_size: 640,
            max_detections: 300,
            num_classes: None,
            dpi: 300,
            max_rendered_pixels: 6000,
            max_upload_bytes: 50 * 1024 * 1024,
            pdfium_lib_path: None,
            intra_threads: 4,
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("bind_addr", &self.bind_addr)
            .field("upload_dir", &self.upload_dir)
            .field("model_path", &self.model_path)
            .field("model_kind", &self.model_kind)
            .field("device", &self.device)
            .field("confidence_threshold", &self.confidence_threshold)
            .field("dpi", &self.dpi)
            .finish_non_exhaustive()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Directory crops are written to and served from.
    pub fn extracted_dir(&self) -> PathBuf {
        self.upload_dir.join(EXTRACTED_SUBDIR)
    }

    /// Create the upload and crop directories if they are missing.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.upload_dir)?;
        std::fs::create_dir_all(self.extracted_dir())
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    pub fn upload_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.upload_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn model_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config.model_path = path.as_ref().to_path_buf();
        self
    }

    pub fn model_kind(mut self, kind: ModelKind) -> Self {
        self.config.model_kind = kind;
        self
    }

    pub fn device(mut self, device: Device) -> Self {
        self.config.device = device;
        self
    }

    pub fn confidence_threshold(mut self, t: f32) -> Self {
        self.config.confidence_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn iou_threshold(mut self, t: f32) -> Self {
        self.config.iou_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn input_size(mut self, px: u32) -> Self {
        self.config.input_size = px;
        self
    }

    pub fn max_detections(mut self, n: usize) -> Self {
        self.config.max_detections = n.max(1);
        self
    }

    pub fn num_classes(mut self, n: usize) -> Self {
        self.config.num_classes = Some(n.max(1));
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config.pdfium_lib_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn intra_threads(mut self, n: usize) -> Self {
        self.config.intra_threads = n.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, ExtractError> {
        let c = &self.config;
        if c.input_size < 32 || c.input_size % 32 != 0 {
            return Err(ExtractError::InvalidConfig(format!(
                "model input size must be a positive multiple of 32, got {}",
                c.input_size
            )));
        }
        if c.max_upload_bytes == 0 {
            return Err(ExtractError::InvalidConfig(
                "max upload size must be > 0".into(),
            ));
        }
        if c.upload_dir.as_os_str().is_empty() {
            return Err(ExtractError::InvalidConfig(
                "upload directory must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Model family, chosen explicitly at startup.
///
/// | Kind | Inference |
/// |------|-----------|
/// | `yolo` | Real detections from a YOLO-style ONNX export |
/// | `generic` | Session is loaded but produces no detections (placeholder) |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    #[default]
    Yolo,
    Generic,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Yolo => "yolo",
            ModelKind::Generic => "generic",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where inference runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    /// Requires the `cuda` cargo feature; otherwise falls back to CPU.
    Cuda,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Cuda => f.write_str("cuda"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_contract() {
        let c = ServiceConfig::default();
        assert_eq!(c.confidence_threshold, 0.1);
        assert_eq!(c.dpi, 300);
        assert_eq!(c.model_kind, ModelKind::Yolo);
        assert_eq!(c.extracted_dir(), PathBuf::from("uploads").join("extracted"));
    }

    #[test]
    fn builder_clamps_thresholds() {
        let c = ServiceConfig::builder()
            .confidence_threshold(1.7)
            .iou_threshold(-0.2)
            .dpi(10)
            .build()
            .unwrap();
        assert_eq!(c.confidence_threshold, 1.0);
        assert_eq!(c.iou_threshold, 0.0);
        assert_eq!(c.dpi, 72);
    }

    #[test]
    fn builder_rejects_odd_input_size() {
        let err = ServiceConfig::builder().input_size(500).build().unwrap_err();
        assert!(matches!(err, ExtractError::InvalidConfig(_)));
    }

    #[test]
    fn model_kind_serialises_lowercase() {
        assert_eq!(serde_json::to_string(&ModelKind::Generic).unwrap(), "\"generic\"");
        assert_eq!(ModelKind::Yolo.to_string(), "yolo");
        assert_eq!(Device::Cuda.to_string(), "cuda");
    }
}
