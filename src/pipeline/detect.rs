//! Detector adapter: one image in, one set of detections out.
//!
//! The model family is chosen explicitly by [`ModelKind`] in the config;
//! nothing is inferred from the model file. [`load_detector`] is called once
//! at startup and the resulting [`SharedDetector`] is handed to the
//! [`crate::extract::Extractor`].
//!
//! ## YOLO path
//!
//! ```text
//! DynamicImage ─▶ letterbox (640², gray 114) ─▶ NCHW f32 /255
//!              ─▶ ONNX Runtime
//!              ─▶ [1, 4+nc, N] or [1, N, 4+nc]
//!              ─▶ best class ≥ threshold ─▶ undo letterbox ─▶ NMS
//! ```
//!
//! The ONNX session needs `&mut` to run, so it lives behind a `Mutex`;
//! concurrent requests queue on the lock rather than racing.

use crate::config::{Device, ModelKind, ServiceConfig};
use crate::error::ExtractError;
use crate::output::{BoundingBox, Detection};
use image::{imageops::FilterType, DynamicImage, GenericImageView, Rgb, RgbImage};
use ndarray::{Array4, ArrayViewD};
use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use std::cmp::Ordering;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Letterbox padding value used by YOLO exports.
const PAD_VALUE: u8 = 114;

/// Note attached to results produced by the placeholder generic path.
pub const GENERIC_NOTE: &str = "Generic inference - please configure model-specific extraction";

/// A loaded detection model.
pub trait Detector: Send + Sync {
    /// Model family, reported on `/health` and in every result.
    fn kind(&self) -> ModelKind;

    /// Device inference actually runs on.
    fn device(&self) -> Device;

    /// Run inference on `image`. Boxes are in `image` pixel coordinates.
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>, ExtractError>;

    /// Optional remark copied into results.
    fn note(&self) -> Option<&str> {
        None
    }
}

/// Detector shared by all requests.
pub type SharedDetector = Arc<dyn Detector>;

/// Load the detector named by `config.model_kind`.
pub fn load_detector(config: &ServiceConfig) -> Result<SharedDetector, ExtractError> {
    match config.model_kind {
        ModelKind::Yolo => Ok(Arc::new(YoloDetector::load(config)?)),
        ModelKind::Generic => Ok(Arc::new(GenericDetector::load(config)?)),
    }
}

// ── Session construction ─────────────────────────────────────────────────

fn execution_providers(requested: Device) -> (Vec<ExecutionProviderDispatch>, Device) {
    match requested {
        #[cfg(feature = "cuda")]
        Device::Cuda => (
            vec![
                ort::execution_providers::CUDAExecutionProvider::default().build(),
                CPUExecutionProvider::default().build(),
            ],
            Device::Cuda,
        ),
        #[cfg(not(feature = "cuda"))]
        Device::Cuda => {
            warn!("CUDA requested but docfields was built without the `cuda` feature; using CPU");
            (vec![CPUExecutionProvider::default().build()], Device::Cpu)
        }
        Device::Cpu => (vec![CPUExecutionProvider::default().build()], Device::Cpu),
    }
}

fn build_session(
    model_path: &Path,
    config: &ServiceConfig,
) -> Result<(Session, Device), ExtractError> {
    let load_err = |detail: String| ExtractError::ModelLoad {
        path: model_path.to_path_buf(),
        detail,
    };

    if !model_path.exists() {
        return Err(load_err("file not found".into()));
    }

    info!("Loading model from {}", model_path.display());

    let (providers, device) = execution_providers(config.device);
    let session = Session::builder()
        .map_err(|e| load_err(format!("session builder: {e}")))?
        .with_execution_providers(providers)
        .map_err(|e| load_err(format!("execution providers: {e}")))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| load_err(format!("optimization level: {e}")))?
        .with_intra_threads(config.intra_threads)
        .map_err(|e| load_err(format!("intra threads: {e}")))?
        .commit_from_file(model_path)
        .map_err(|e| load_err(e.to_string()))?;

    Ok((session, device))
}

// ── YOLO ─────────────────────────────────────────────────────────────────

/// YOLO-style detector exported to ONNX.
pub struct YoloDetector {
    session: Mutex<Session>,
    input_name: String,
    device: Device,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
    max_detections: usize,
    num_classes: Option<usize>,
}

impl std::fmt::Debug for YoloDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YoloDetector")
            .field("input_name", &self.input_name)
            .field("device", &self.device)
            .field("input_size", &self.input_size)
            .field("confidence_threshold", &self.confidence_threshold)
            .finish_non_exhaustive()
    }
}

impl YoloDetector {
    pub fn load(config: &ServiceConfig) -> Result<Self, ExtractError> {
        let (session, device) = build_session(&config.model_path, config)?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "images".to_string());

        info!(
            "Model loaded as YOLO (input '{}', {}px, device {})",
            input_name, config.input_size, device
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            device,
            input_size: config.input_size,
            confidence_threshold: config.confidence_threshold,
            iou_threshold: config.iou_threshold,
            max_detections: config.max_detections,
            num_classes: config.num_classes,
        })
    }
}

impl Detector for YoloDetector {
    fn kind(&self) -> ModelKind {
        ModelKind::Yolo
    }

    fn device(&self) -> Device {
        self.device
    }

    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>, ExtractError> {
        let (tensor, letterbox) = letterbox(image, self.input_size);

        let input_value = Value::from_array(tensor)
            .map_err(|e| ExtractError::Inference(format!("input tensor: {e}")))?;

        let raw = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| ExtractError::Inference("model session lock poisoned".into()))?;
            let outputs = session
                .run(ort::inputs![self.input_name.as_str() => input_value])
                .map_err(|e| ExtractError::Inference(e.to_string()))?;
            outputs[0]
                .try_extract_array::<f32>()
                .map_err(|e| ExtractError::Inference(format!("output tensor: {e}")))?
                .to_owned()
        };
        debug!("Model output shape: {:?}", raw.shape());

        let candidates =
            decode_predictions(raw.view(), self.confidence_threshold, self.num_classes)?;
        let (width, height) = image.dimensions();
        let mapped: Vec<Detection> = candidates
            .into_iter()
            .map(|d| Detection {
                bbox: letterbox.to_source(&d.bbox).clamp_to(width, height),
                ..d
            })
            .collect();

        let detections = non_max_suppression(mapped, self.iou_threshold, self.max_detections);
        info!("Number of boxes detected: {}", detections.len());
        if detections.is_empty() {
            warn!(
                "No objects detected at confidence ≥ {}; check the model classes and input quality",
                self.confidence_threshold
            );
        }
        Ok(detections)
    }
}

// ── Generic ──────────────────────────────────────────────────────────────

/// Any other ONNX model. The session is loaded so a bad file fails at
/// startup, but no output decoding exists: every call yields no detections.
pub struct GenericDetector {
    _session: Session,
    device: Device,
}

impl GenericDetector {
    pub fn load(config: &ServiceConfig) -> Result<Self, ExtractError> {
        let (session, device) = build_session(&config.model_path, config)?;
        info!(
            "Loaded generic ONNX model ({} inputs, {} outputs); inference is a placeholder",
            session.inputs.len(),
            session.outputs.len()
        );
        Ok(Self {
            _session: session,
            device,
        })
    }
}

impl Detector for GenericDetector {
    fn kind(&self) -> ModelKind {
        ModelKind::Generic
    }

    fn device(&self) -> Device {
        self.device
    }

    fn detect(&self, _image: &DynamicImage) -> Result<Vec<Detection>, ExtractError> {
        Ok(Vec::new())
    }

    fn note(&self) -> Option<&str> {
        Some(GENERIC_NOTE)
    }
}

// ── Pre/post-processing ──────────────────────────────────────────────────

/// Geometry of a letterbox transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    /// Map a box from model-input space back to the source image.
    pub fn to_source(&self, b: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            (b.x1 - self.pad_x) / self.scale,
            (b.y1 - self.pad_y) / self.scale,
            (b.x2 - self.pad_x) / self.scale,
            (b.y2 - self.pad_y) / self.scale,
        )
    }
}

/// Resize preserving aspect ratio, centre on a `size`² gray canvas, and
/// convert to a `[1, 3, size, size]` tensor scaled to `[0, 1]`.
pub fn letterbox(image: &DynamicImage, size: u32) -> (Array4<f32>, Letterbox) {
    let (w, h) = image.dimensions();
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));

    let geometry = if w == 0 || h == 0 {
        Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        }
    } else {
        let scale = (size as f32 / w as f32).min(size as f32 / h as f32);
        let new_w = ((w as f32 * scale).round() as u32).clamp(1, size);
        let new_h = ((h as f32 * scale).round() as u32).clamp(1, size);
        let pad_x = (size - new_w) / 2;
        let pad_y = (size - new_h) / 2;

        let resized = image
            .resize_exact(new_w, new_h, FilterType::Triangle)
            .to_rgb8();
        image::imageops::overlay(&mut canvas, &resized, pad_x as i64, pad_y as i64);

        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        }
    };

    let side = size as usize;
    let mut tensor = Array4::zeros((1, 3, side, side));
    for (x, y, pixel) in canvas.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }

    (tensor, geometry)
}

/// Decode a raw YOLO output into candidate detections in model-input space.
///
/// The usual export is `[1, 4+nc, N]`. The transposed `[1, N, 4+nc]` is
/// recognised when `num_classes` says which axis holds `4+nc`, or, with no
/// class count, when the middle axis is too short to hold a class. Each
/// candidate keeps its best class if that score is at least `threshold`.
pub fn decode_predictions(
    output: ArrayViewD<'_, f32>,
    threshold: f32,
    num_classes: Option<usize>,
) -> Result<Vec<Detection>, ExtractError> {
    let shape = output.shape();
    if shape.len() != 3 || shape[0] != 1 {
        return Err(ExtractError::Inference(format!(
            "unexpected output shape {:?}, expected [1, 4+classes, boxes]",
            shape
        )));
    }

    let channels_first = match num_classes {
        Some(nc) if shape[1] == 4 + nc => true,
        Some(nc) if shape[2] == 4 + nc => false,
        Some(nc) => {
            return Err(ExtractError::Inference(format!(
                "output shape {:?} has no axis of 4 box coordinates + {} classes",
                shape, nc
            )))
        }
        None => shape[1] >= 5 || shape[2] < 5,
    };
    let (channels, count) = if channels_first {
        (shape[1], shape[2])
    } else {
        (shape[2], shape[1])
    };
    if channels < 5 {
        return Err(ExtractError::Inference(format!(
            "output has {} channels; need 4 box coordinates plus at least one class",
            channels
        )));
    }

    let at = |i: usize, c: usize| -> f32 {
        if channels_first {
            output[[0, c, i]]
        } else {
            output[[0, i, c]]
        }
    };

    let mut detections = Vec::new();
    for i in 0..count {
        let (class_id, confidence) = (4..channels)
            .map(|c| (c - 4, at(i, c)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        if confidence < threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(i, 0), at(i, 1), at(i, 2), at(i, 3));
        detections.push(Detection {
            class_id,
            confidence,
            bbox: BoundingBox::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0),
        });
    }

    Ok(detections)
}

/// Class-aware greedy NMS. Output is sorted by descending confidence and
/// truncated to `max_detections`.
pub fn non_max_suppression(
    mut detections: Vec<Detection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept: Vec<Detection> = Vec::new();
    for det in detections {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == det.class_id && k.bbox.iou(&det.bbox) > iou_threshold);
        if !suppressed {
            kept.push(det);
        }
    }
    kept
}
