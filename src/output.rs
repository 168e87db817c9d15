//! Result and report types returned by the service.
//!
//! All of these serialise to the JSON bodies of the HTTP API; field names are
//! part of the wire contract.

use crate::config::{Device, ModelKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Axis-aligned box in pixel coordinates of the source image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union; 0.0 when either box is empty.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Clamp all corners into `[0, width] × [0, height]`.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        Self {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
        }
    }
}

/// One model output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    /// In `[0, 1]`.
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// A detection as reported in the response, with its mapped field name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub class_id: usize,
    pub field: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// A saved crop for one named field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField {
    /// Location of the crop on disk, relative to the working directory when
    /// the upload directory is relative.
    pub path: String,
    /// Public URL under the static `/extracted` mount.
    pub url: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Information about the uploaded file echoed back to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMetadata {
    pub filename: String,
    /// Lower-cased extension with leading dot, e.g. `.pdf`.
    pub file_type: String,
    /// Rendered page; only set for PDF uploads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
}

/// Response body of `POST /extract`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub success: bool,
    /// One entry per field name; a later detection of the same class replaces
    /// an earlier one.
    pub extracted_images: BTreeMap<String, ExtractedField>,
    /// Every detection in model output order.
    pub detections: Vec<DetectionRecord>,
    pub model_type: ModelKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RequestMetadata>,
}

impl ExtractionResult {
    /// Human summary line used in the `message` field.
    pub fn summary(extracted: usize) -> String {
        if extracted == 0 {
            "No photo or signature detected".to_string()
        } else {
            format!("Extracted {extracted} items")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Response body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub model_loaded: bool,
    pub model_type: Option<ModelKind>,
    pub device: Device,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response body of `DELETE /cleanup`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub message: String,
    pub count: usize,
}

impl CleanupReport {
    pub fn new(count: usize) -> Self {
        Self {
            message: format!("Cleaned up {count} files"),
            count,
        }
    }
}
