//! PDF rasterisation: render one page to a `DynamicImage` via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto the blocking pool so
//! the Tokio worker threads keep serving other requests while a page renders.
//!
//! Pages are scaled by `dpi / 72` (PDF user space is 72 units per inch) and
//! then capped so the longest edge never exceeds `max_rendered_pixels`.

use crate::config::ServiceConfig;
use crate::error::ExtractError;
use crate::pipeline::pdfium::bind_pdfium;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// PDF user-space units per inch.
const POINTS_PER_INCH: f32 = 72.0;

/// A rasterised page.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// 1-indexed page number.
    pub page_number: u32,
    pub image: DynamicImage,
}

/// Render settings extracted from [`ServiceConfig`] so they can move into
/// the blocking task.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub dpi: u32,
    pub max_rendered_pixels: u32,
    pub pdfium_lib_path: Option<PathBuf>,
}

impl From<&ServiceConfig> for RenderSettings {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            dpi: config.dpi,
            max_rendered_pixels: config.max_rendered_pixels,
            pdfium_lib_path: config.pdfium_lib_path.clone(),
        }
    }
}

/// Rasterise page `page_number` (1-indexed) of the PDF at `pdf_path`.
pub async fn render_page(
    pdf_path: &Path,
    page_number: u32,
    settings: &RenderSettings,
) -> Result<RenderedPage, ExtractError> {
    let path = pdf_path.to_path_buf();
    let settings = settings.clone();

    tokio::task::spawn_blocking(move || render_page_blocking(&path, page_number, &settings))
        .await
        .map_err(|e| ExtractError::Internal(format!("Render task panicked: {}", e)))?
}

/// Turns one page of a staged PDF into an image. Runs on the blocking pool.
pub trait PageRasterizer: Send + Sync {
    fn rasterize(&self, pdf_path: &Path, page_number: u32) -> Result<RenderedPage, ExtractError>;
}

/// Rasterizer shared by all requests.
pub type SharedRasterizer = Arc<dyn PageRasterizer>;

/// [`PageRasterizer`] backed by pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    settings: RenderSettings,
}

impl PdfiumRasterizer {
    pub fn new(settings: RenderSettings) -> Self {
        Self { settings }
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn rasterize(&self, pdf_path: &Path, page_number: u32) -> Result<RenderedPage, ExtractError> {
        render_page_blocking(pdf_path, page_number, &self.settings)
    }
}

/// Blocking implementation of page rendering.
fn render_page_blocking(
    pdf_path: &Path,
    page_number: u32,
    settings: &RenderSettings,
) -> Result<RenderedPage, ExtractError> {
    if page_number == 0 {
        return Err(ExtractError::InvalidPageNumber(page_number));
    }

    let pdfium = bind_pdfium(settings.pdfium_lib_path.as_deref())?;

    let document =
        pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| ExtractError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: format!("{:?}", e),
            })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    debug!("PDF loaded: {} pages", total_pages);

    let idx = (page_number - 1) as usize;
    if idx >= total_pages {
        return Err(ExtractError::PageOutOfRange {
            page: page_number,
            total: total_pages,
        });
    }

    let page = pages
        .get(idx as u16)
        .map_err(|e| ExtractError::RasterisationFailed {
            page: page_number,
            detail: format!("{:?}", e),
        })?;

    let max_px = settings.max_rendered_pixels as i32;
    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(settings.dpi as f32 / POINTS_PER_INCH)
        .set_maximum_width(max_px)
        .set_maximum_height(max_px);

    let bitmap = page.render_with_config(&render_config).map_err(|e| {
        ExtractError::RasterisationFailed {
            page: page_number,
            detail: format!("{:?}", e),
        }
    })?;

    let image = bitmap.as_image();
    if image.width() == 0 || image.height() == 0 {
        return Err(ExtractError::RasterisationFailed {
            page: page_number,
            detail: "rendered bitmap is empty".into(),
        });
    }

    info!(
        "Converted PDF page {} → {}x{} px at {} DPI",
        page_number,
        image.width(),
        image.height(),
        settings.dpi
    );

    Ok(RenderedPage { page_number, image })
}
