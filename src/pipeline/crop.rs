//! Field mapping and cropping.
//!
//! Every detection is cropped out of the decoded source image (never the
//! letterboxed model input) and written as a PNG named
//! `{field}_{8 hex}.png`. The `extracted_images` map keeps one entry per
//! field name and a later detection of the same class replaces an earlier
//! one, but the earlier crop file stays on disk. That leak is known and kept
//! as-is; see DESIGN.md.

use crate::error::ExtractError;
use crate::output::{Detection, DetectionRecord, ExtractedField};
use image::{DynamicImage, ImageFormat};
use std::collections::BTreeMap;
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// Static mapping from model class id to field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMap {
    names: BTreeMap<usize, String>,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            names: BTreeMap::from([(0, "photo".to_string()), (1, "signature".to_string())]),
        }
    }
}

impl FieldMap {
    /// Field name for `class_id`; unknown ids become `field_{id}`.
    pub fn name_for(&self, class_id: usize) -> String {
        self.names
            .get(&class_id)
            .cloned()
            .unwrap_or_else(|| format!("field_{class_id}"))
    }
}

/// Crops and detection records for one image.
#[derive(Debug, Default)]
pub struct CropOutput {
    pub extracted: BTreeMap<String, ExtractedField>,
    pub records: Vec<DetectionRecord>,
    /// Every file written, including those later shadowed in `extracted`.
    pub written: Vec<PathBuf>,
}

/// Where crops go and how they are addressed publicly.
#[derive(Debug, Clone)]
pub struct CropTarget<'a> {
    pub dir: &'a Path,
    /// URL prefix the directory is served under, without trailing slash.
    pub url_prefix: &'a str,
}

/// Crop every detection out of `image` and persist it under `target.dir`.
pub fn crop_detections(
    image: &DynamicImage,
    detections: &[Detection],
    fields: &FieldMap,
    target: &CropTarget<'_>,
) -> Result<CropOutput, ExtractError> {
    let mut out = CropOutput::default();

    for det in detections {
        let field = fields.name_for(det.class_id);
        info!(
            "Detected: class_id={}, field={}, confidence={:.2}",
            det.class_id, field, det.confidence
        );

        out.records.push(DetectionRecord {
            class_id: det.class_id,
            field: field.clone(),
            confidence: det.confidence,
            bbox: det.bbox,
        });

        let Some((x, y, w, h)) = pixel_rect(det, image.width(), image.height()) else {
            warn!(
                "Skipping crop for {}: box {:?} has no area inside the image",
                field, det.bbox
            );
            continue;
        };

        let filename = format!("{}_{}.png", field, short_id());
        let path = target.dir.join(&filename);
        write_png(&image.crop_imm(x, y, w, h), target.dir, &path)?;
        info!("Saved extracted {} to: {}", field, path.display());

        out.written.push(path.clone());
        out.extracted.insert(
            field,
            ExtractedField {
                path: path.display().to_string(),
                url: format!("{}/{}", target.url_prefix, filename),
                confidence: det.confidence,
                bbox: det.bbox,
            },
        );
    }

    info!("Total extracted images: {}", out.extracted.len());
    Ok(out)
}

/// Integer crop rectangle `(x, y, w, h)`: corners clamped to the image and
/// truncated toward zero. `None` when nothing is left.
fn pixel_rect(det: &Detection, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let b = det.bbox.clamp_to(width, height);
    let (x1, y1, x2, y2) = (b.x1 as u32, b.y1 as u32, b.x2 as u32, b.y2 as u32);
    let (w, h) = (x2.saturating_sub(x1), y2.saturating_sub(y1));
    (w > 0 && h > 0).then_some((x1, y1, w, h))
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Atomic write: encode into a temp file in `dir`, then rename into place.
fn write_png(crop: &DynamicImage, dir: &Path, path: &Path) -> Result<(), ExtractError> {
    let write_err = |detail: String| ExtractError::CropWriteFailed {
        path: path.to_path_buf(),
        detail,
    };

    // PNG has no float encoding.
    let encodable = match crop {
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            DynamicImage::ImageRgba8(crop.to_rgba8())
        }
        _ => crop.clone(),
    };

    let tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| write_err(e.to_string()))?;
    encode_png(&encodable, tmp.as_file()).map_err(write_err)?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| write_err(e.to_string()))?;
    tmp.persist(path).map_err(|e| write_err(e.error.to_string()))?;
    Ok(())
}

/// Encode `image` as PNG into `sink`. The buffered tail is flushed
/// explicitly so a failed final write is an error, not a short file.
fn encode_png<W: Write + Seek>(image: &DynamicImage, sink: W) -> Result<(), String> {
    let mut writer = BufWriter::new(sink);
    image
        .write_to(&mut writer, ImageFormat::Png)
        .map_err(|e| e.to_string())?;
    writer.flush().map_err(|e| e.to_string())
}
