//! HTTP-level tests for the extraction service.
//!
//! A fixed-output detector stands in for the ONNX model so these run
//! without model weights or pdfium.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use docfields::{
    create_app, BoundingBox, Detection, Detector, Device, ExtractError, Extractor, ModelKind,
    PageRasterizer, RenderedPage, ServiceConfig,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::Value;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

// ── Test helpers ─────────────────────────────────────────────────────────────

const BOUNDARY: &str = "docfields-test-boundary";

enum Behaviour {
    Detect(Vec<Detection>),
    Fail(&'static str),
}

struct StubDetector(Behaviour);

impl Detector for StubDetector {
    fn kind(&self) -> ModelKind {
        ModelKind::Yolo
    }

    fn device(&self) -> Device {
        Device::Cpu
    }

    fn detect(&self, _image: &DynamicImage) -> Result<Vec<Detection>, ExtractError> {
        match &self.0 {
            Behaviour::Detect(d) => Ok(d.clone()),
            Behaviour::Fail(msg) => Err(ExtractError::Inference(msg.to_string())),
        }
    }
}

/// Records the size of every image it is asked to look at.
#[derive(Default)]
struct RecordingDetector {
    seen: Mutex<Vec<(u32, u32)>>,
}

impl Detector for RecordingDetector {
    fn kind(&self) -> ModelKind {
        ModelKind::Yolo
    }

    fn device(&self) -> Device {
        Device::Cpu
    }

    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>, ExtractError> {
        self.seen
            .lock()
            .unwrap()
            .push((image.width(), image.height()));
        Ok(vec![det(1, 0.7, (10.0, 10.0, 40.0, 30.0))])
    }
}

/// Renders a fixed-size page for a one-page document.
#[derive(Default)]
struct SinglePageRasterizer {
    calls: Mutex<Vec<u32>>,
}

impl PageRasterizer for SinglePageRasterizer {
    fn rasterize(&self, pdf_path: &Path, page_number: u32) -> Result<RenderedPage, ExtractError> {
        assert!(pdf_path.exists(), "staged PDF must exist while rendering");
        self.calls.lock().unwrap().push(page_number);
        if page_number > 1 {
            return Err(ExtractError::PageOutOfRange {
                page: page_number,
                total: 1,
            });
        }
        Ok(RenderedPage {
            page_number,
            image: DynamicImage::ImageRgb8(RgbImage::from_pixel(120, 160, Rgb([250, 250, 250]))),
        })
    }
}

fn det(class_id: usize, confidence: f32, b: (f32, f32, f32, f32)) -> Detection {
    Detection {
        class_id,
        confidence,
        bbox: BoundingBox::new(b.0, b.1, b.2, b.3),
    }
}

fn config(dir: &Path) -> ServiceConfig {
    let config = ServiceConfig::builder().upload_dir(dir).build().unwrap();
    config.ensure_dirs().unwrap();
    config
}

fn app_with(dir: &TempDir, behaviour: Behaviour) -> Router {
    let extractor = Extractor::new(config(dir.path()), Arc::new(StubDetector(behaviour)));
    create_app(Arc::new(extractor))
}

fn png_bytes(w: u32, h: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 90])
    }));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

/// Hand-built multipart body with a `file` part and optional extra fields.
fn multipart_body(filename: &str, bytes: &[u8], fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; \
             filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn extract_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/extract")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn staged_file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .count()
}

// ── /extract ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rejects_unsupported_extension() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(&dir, Behaviour::Detect(vec![]));

    let (status, body) = send(
        app,
        extract_request(multipart_body("notes.txt", b"hello", &[])),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.starts_with("File type not allowed. Supported:"));
    for ext in [".pdf", ".jpg", ".jpeg", ".png", ".tiff", ".bmp"] {
        assert!(detail.contains(ext), "missing {ext} in {detail}");
    }
    assert_eq!(staged_file_count(dir.path()), 0);
}

#[tokio::test]
async fn extracts_photo_and_serves_crop() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(
        &dir,
        Behaviour::Detect(vec![det(0, 0.42, (10.0, 10.0, 50.0, 60.0))]),
    );

    let (status, body) = send(
        app.clone(),
        extract_request(multipart_body("passport.png", &png_bytes(120, 90), &[])),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["model_type"], "yolo");
    assert_eq!(body["message"], "Extracted 1 items");

    let photo = &body["extracted_images"]["photo"];
    assert!((photo["confidence"].as_f64().unwrap() - 0.42).abs() < 1e-6);
    assert_eq!(photo["bbox"]["x1"], 10.0);
    assert_eq!(photo["bbox"]["y2"], 60.0);

    let url = photo["url"].as_str().unwrap();
    assert!(url.starts_with("/extracted/photo_"));
    let filename = url.trim_start_matches("/extracted/");
    let on_disk = dir.path().join("extracted").join(filename);
    assert!(on_disk.exists());
    let crop = image::open(&on_disk).unwrap();
    assert_eq!((crop.width(), crop.height()), (40, 50));

    assert_eq!(body["detections"].as_array().unwrap().len(), 1);
    assert_eq!(body["detections"][0]["field"], "photo");
    assert_eq!(body["metadata"]["filename"], "passport.png");
    assert_eq!(body["metadata"]["file_type"], ".png");
    assert!(body["metadata"].get("page_number").is_none());

    // Upload staged under a random name was removed after the response.
    assert_eq!(staged_file_count(dir.path()), 0);

    // The crop is reachable at the advertised URL.
    let resp = app
        .oneshot(Request::get(url).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let served = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(served.as_ref(), std::fs::read(&on_disk).unwrap().as_slice());
}

#[tokio::test]
async fn duplicate_class_keeps_one_entry_but_writes_both_crops() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(
        &dir,
        Behaviour::Detect(vec![
            det(1, 0.8, (0.0, 0.0, 30.0, 20.0)),
            det(1, 0.6, (40.0, 40.0, 80.0, 70.0)),
            det(5, 0.5, (5.0, 5.0, 15.0, 15.0)),
        ]),
    );

    let (status, body) = send(
        app,
        extract_request(multipart_body("id.jpeg", &png_bytes(100, 100), &[])),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "body: {body}");
    let extracted = body["extracted_images"].as_object().unwrap();
    assert_eq!(extracted.len(), 2);
    assert!(extracted.contains_key("signature"));
    assert!(extracted.contains_key("field_5"));
    assert!((extracted["signature"]["confidence"].as_f64().unwrap() - 0.6).abs() < 1e-6);
    assert_eq!(body["detections"].as_array().unwrap().len(), 3);

    let crops = std::fs::read_dir(dir.path().join("extracted")).unwrap().count();
    assert_eq!(crops, 3);
}

#[tokio::test]
async fn no_detections_is_still_success() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(&dir, Behaviour::Detect(vec![]));

    let (status, body) = send(
        app,
        extract_request(multipart_body("blank.bmp", &png_bytes(32, 32), &[])),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "No photo or signature detected");
    assert!(body["extracted_images"].as_object().unwrap().is_empty());
}

#[tokio::test]
async fn inference_failure_returns_structured_error() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(&dir, Behaviour::Fail("tensor shape mismatch"));

    let (status, body) = send(
        app,
        extract_request(multipart_body("scan.tiff", &png_bytes(16, 16), &[])),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("tensor shape mismatch"));
    assert!(body["fields"].as_object().unwrap().is_empty());
    assert_eq!(staged_file_count(dir.path()), 0);
}

#[tokio::test]
async fn missing_file_part_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(&dir, Behaviour::Detect(vec![]));

    let body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"page_number\"\r\n\r\n\
         2\r\n--{BOUNDARY}--\r\n"
    );
    let (status, json) = send(app, extract_request(body.into_bytes())).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["detail"].as_str().unwrap().contains("No file uploaded"));
}

#[tokio::test]
async fn pdf_upload_renders_one_page_before_inference() {
    let dir = tempfile::tempdir().unwrap();
    let detector = Arc::new(RecordingDetector::default());
    let rasterizer = Arc::new(SinglePageRasterizer::default());
    let extractor = Extractor::new(config(dir.path()), detector.clone())
        .with_rasterizer(rasterizer.clone());
    let app = create_app(Arc::new(extractor));

    let (status, body) = send(
        app,
        extract_request(multipart_body(
            "passport.PDF",
            b"%PDF-1.4 stub",
            &[("page_number", "1")],
        )),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(*rasterizer.calls.lock().unwrap(), vec![1]);
    assert_eq!(*detector.seen.lock().unwrap(), vec![(120, 160)]);
    assert_eq!(body["metadata"]["page_number"], 1);
    assert_eq!(body["metadata"]["file_type"], ".pdf");
    assert!(body["extracted_images"].get("signature").is_some());
    assert_eq!(staged_file_count(dir.path()), 0);
}

#[tokio::test]
async fn pdf_page_out_of_range_is_conversion_error() {
    let dir = tempfile::tempdir().unwrap();
    let detector = Arc::new(RecordingDetector::default());
    let extractor = Extractor::new(config(dir.path()), detector.clone())
        .with_rasterizer(Arc::new(SinglePageRasterizer::default()));
    let app = create_app(Arc::new(extractor));

    let (status, body) = send(
        app,
        Request::builder()
            .method("POST")
            .uri("/extract?page_number=3")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body("doc.pdf", b"%PDF-1.4", &[])))
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.starts_with("PDF conversion failed:"), "got {detail}");
    assert!(detector.seen.lock().unwrap().is_empty());
    assert_eq!(staged_file_count(dir.path()), 0);
}

#[tokio::test]
async fn non_multipart_body_is_json_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(&dir, Behaviour::Detect(vec![]));

    let (status, body) = send(
        app,
        Request::builder()
            .method("POST")
            .uri("/extract")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"file": "passport.png"}"#))
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().starts_with("Malformed upload"));
}

#[tokio::test]
async fn non_numeric_query_page_is_json_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(&dir, Behaviour::Detect(vec![]));

    let req = Request::builder()
        .method("POST")
        .uri("/extract?page_number=abc")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body("a.png", &png_bytes(8, 8), &[])))
        .unwrap();
    let (status, body) = send(app, req).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().starts_with("Malformed upload"));
}

#[tokio::test]
async fn page_zero_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(&dir, Behaviour::Detect(vec![]));

    let (status, body) = send(
        app,
        extract_request(multipart_body(
            "passport.pdf",
            b"%PDF-1.4",
            &[("page_number", "0")],
        )),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("1-indexed"));
}

#[tokio::test]
async fn non_numeric_page_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(&dir, Behaviour::Detect(vec![]));

    let (status, _) = send(
        app,
        extract_request(multipart_body(
            "passport.pdf",
            b"%PDF-1.4",
            &[("page_number", "two")],
        )),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ── /health ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_loaded_model() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(&dir, Behaviour::Detect(vec![]));

    let (status, body) = send(
        app,
        Request::get("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["model_loaded"], true);
    assert_eq!(body["model_type"], "yolo");
    assert_eq!(body["device"], "cpu");
}

#[tokio::test]
async fn health_reports_failed_model_and_extract_refuses() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = Extractor::without_detector(config(dir.path()), "model file not found");
    let app = create_app(Arc::new(extractor));

    let (status, body) = send(
        app.clone(),
        Request::get("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["model_loaded"], false);
    assert_eq!(body["error"], "model file not found");

    let (status, body) = send(
        app,
        extract_request(multipart_body("a.png", &png_bytes(8, 8), &[])),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
}

// ── /cleanup and / ───────────────────────────────────────────────────────────

#[tokio::test]
async fn cleanup_removes_staged_files_only() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(&dir, Behaviour::Detect(vec![]));

    for name in ["a.png", "b.pdf", "c.jpg"] {
        std::fs::write(dir.path().join(name), b"x").unwrap();
    }
    std::fs::write(dir.path().join("extracted").join("photo_1234abcd.png"), b"x").unwrap();

    let (status, body) = send(
        app.clone(),
        Request::delete("/cleanup").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 3);
    assert_eq!(body["message"], "Cleaned up 3 files");
    assert_eq!(staged_file_count(dir.path()), 0);
    assert!(dir.path().join("extracted/photo_1234abcd.png").exists());

    let (_, body) = send(
        app,
        Request::delete("/cleanup").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn root_lists_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(&dir, Behaviour::Detect(vec![]));

    let (status, body) = send(app, Request::get("/").body(Body::empty()).unwrap()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["endpoints"].get("/extract").is_some());
}

#[test]
fn cleanup_via_extractor_counts_files() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = Extractor::new(
        config(dir.path()),
        Arc::new(StubDetector(Behaviour::Detect(vec![]))),
    );
    std::fs::write(dir.path().join("left.bmp"), b"x").unwrap();

    let report = tokio_test::block_on(extractor.cleanup());
    tokio_test::assert_ok!(&report);
    assert_eq!(report.unwrap().count, 1);
}
