//! CLI binary for docfields.
//!
//! `docfields serve` runs the HTTP service; `docfields extract FILE` runs
//! one document through the same pipeline and prints the JSON result.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use docfields::{Device, Extractor, ModelKind, ServiceConfig};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Start the service on 0.0.0.0:8000
  docfields serve --model models/passport_layout.onnx

  # Extract from page 2 of a PDF without starting a server
  docfields extract scans/passport.pdf --page 2

  # Query a running service
  curl -F file=@passport.jpg http://localhost:8000/extract
  curl -F file=@passport.pdf -F page_number=1 http://localhost:8000/extract

ENVIRONMENT VARIABLES:
  DOCFIELDS_BIND           Listen address (default 0.0.0.0:8000)
  DOCFIELDS_UPLOAD_DIR     Staging directory; crops go to <dir>/extracted
  DOCFIELDS_MODEL          ONNX model file
  DOCFIELDS_MODEL_KIND     yolo | generic
  DOCFIELDS_DEVICE         cpu | cuda
  DOCFIELDS_CONFIDENCE     Minimum detection confidence (default 0.1)
  DOCFIELDS_IOU            NMS IoU threshold (default 0.7)
  DOCFIELDS_INPUT_SIZE     Square model input size (default 640)
  DOCFIELDS_NUM_CLASSES    Model class count (pins the output layout)
  DOCFIELDS_DPI            PDF rendering DPI (default 300)
  DOCFIELDS_MAX_UPLOAD_MB  Request body limit in MiB (default 50)
  PDFIUM_LIB_PATH          Path to libpdfium (file or directory)
  RUST_LOG                 Log filter, overrides --verbose
"#;

/// Extract photos and signatures from passport and ID scans.
#[derive(Parser, Debug)]
#[command(
    name = "docfields",
    version,
    about = "Extract photos and signatures from passport and ID scans",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    service: ServiceArgs,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCFIELDS_VERBOSE")]
    verbose: bool,

    /// Only log errors.
    #[arg(short, long, global = true, env = "DOCFIELDS_QUIET", conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default).
    Serve,
    /// Extract fields from one local file and print the result as JSON.
    Extract {
        /// PDF or image file.
        file: PathBuf,

        /// 1-indexed PDF page.
        #[arg(long, short)]
        page: Option<u32>,
    },
}

#[derive(Args, Debug)]
struct ServiceArgs {
    /// Address to listen on.
    #[arg(long, global = true, env = "DOCFIELDS_BIND", default_value = "0.0.0.0:8000")]
    bind: SocketAddr,

    /// Request body limit in MiB.
    #[arg(long, global = true, env = "DOCFIELDS_MAX_UPLOAD_MB", default_value_t = 50)]
    max_upload_mb: usize,

    /// Staging directory for uploads.
    #[arg(long, global = true, env = "DOCFIELDS_UPLOAD_DIR", default_value = "uploads")]
    upload_dir: PathBuf,

    /// ONNX detection model.
    #[arg(long, global = true, env = "DOCFIELDS_MODEL", default_value = "passport_layout.onnx")]
    model: PathBuf,

    /// Model family.
    #[arg(long, global = true, env = "DOCFIELDS_MODEL_KIND", value_enum, default_value = "yolo")]
    model_kind: ModelKindArg,

    /// Inference device.
    #[arg(long, global = true, env = "DOCFIELDS_DEVICE", value_enum, default_value = "cpu")]
    device: DeviceArg,

    /// Minimum detection confidence (0.0–1.0).
    #[arg(long, global = true, env = "DOCFIELDS_CONFIDENCE", default_value_t = 0.1)]
    confidence: f32,

    /// IoU threshold for non-maximum suppression.
    #[arg(long, global = true, env = "DOCFIELDS_IOU", default_value_t = 0.7)]
    iou: f32,

    /// Square model input size in pixels (multiple of 32).
    #[arg(long, global = true, env = "DOCFIELDS_INPUT_SIZE", default_value_t = 640)]
    input_size: u32,

    /// Classes the model predicts; pins the output tensor layout.
    #[arg(long, global = true, env = "DOCFIELDS_NUM_CLASSES")]
    num_classes: Option<usize>,

    /// PDF rendering DPI (72–600).
    #[arg(long, global = true, env = "DOCFIELDS_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Path to libpdfium (file or directory).
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModelKindArg {
    Yolo,
    Generic,
}

impl From<ModelKindArg> for ModelKind {
    fn from(v: ModelKindArg) -> Self {
        match v {
            ModelKindArg::Yolo => ModelKind::Yolo,
            ModelKindArg::Generic => ModelKind::Generic,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum DeviceArg {
    Cpu,
    Cuda,
}

impl From<DeviceArg> for Device {
    fn from(v: DeviceArg) -> Self {
        match v {
            DeviceArg::Cpu => Device::Cpu,
            DeviceArg::Cuda => Device::Cuda,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let command = cli.command.unwrap_or(Command::Serve);

    let mut builder = ServiceConfig::builder()
        .upload_dir(&cli.service.upload_dir)
        .model_path(&cli.service.model)
        .model_kind(cli.service.model_kind.into())
        .device(cli.service.device.into())
        .confidence_threshold(cli.service.confidence)
        .iou_threshold(cli.service.iou)
        .input_size(cli.service.input_size)
        .dpi(cli.service.dpi)
        .bind_addr(cli.service.bind)
        .max_upload_bytes(cli.service.max_upload_mb.saturating_mul(1024 * 1024));
    if let Some(n) = cli.service.num_classes {
        builder = builder.num_classes(n);
    }
    if let Some(ref lib) = cli.service.pdfium_lib_path {
        builder = builder.pdfium_lib_path(lib);
    }

    match command {
        Command::Serve => {
            let config = builder.build().context("Invalid configuration")?;
            config
                .ensure_dirs()
                .with_context(|| format!("Failed to create {}", config.upload_dir.display()))?;

            let addr = config.bind_addr;
            let extractor = Arc::new(Extractor::from_config(config));
            docfields::serve(extractor, addr)
                .await
                .with_context(|| format!("Server on {addr} failed"))?;
        }
        Command::Extract { file, page } => {
            let config = builder.build().context("Invalid configuration")?;
            config
                .ensure_dirs()
                .with_context(|| format!("Failed to create {}", config.upload_dir.display()))?;

            let extractor = Extractor::from_config(config);
            let result = extractor
                .extract_file(&file, page)
                .await
                .with_context(|| format!("Extraction from {} failed", file.display()))?;
            println!(
                "{}",
                serde_json::to_string_pretty(&result).context("Failed to serialize result")?
            );
        }
    }

    Ok(())
}
