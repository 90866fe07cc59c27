//! # chart-exporter
//!
//! An HTTP export service for client-side charts: the browser posts the
//! chart's SVG markup, the server converts it with Inkscape (and ImageMagick
//! for JPEG) and either sends the file back or saves it for later download.
//!
//! ## Pipeline Overview
//!
//! ```text
//! POST / (form body)
//!  │
//!  ├─ 1. Normalise  decode `parameters`, validate format / size / name
//!  ├─ 2. Scratch    private temp dir, SVG written to input.svg
//!  ├─ 3. Rasterise  inkscape → png | pdf | plain svg
//!  ├─ 4. Transcode  png → jpeg (jpeg/jpg only; ImageMagick or in-process)
//!  └─ 5. Deliver    download: bytes + Content-Disposition
//!                   save:     collision-safe name in the save dir + status
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chart_exporter::{server, ExportConfig, Exporter};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExportConfig::builder().save_dir("./exports").build()?;
//!     let exporter = Arc::new(Exporter::new(config));
//!     exporter.prepare().await?;
//!
//!     let app = server::router(exporter, 10 * 1024 * 1024);
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//!     server::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `chart-exporter` binary (clap + anyhow + tracing-subscriber) |
//!
//! ## External Tools
//!
//! | Tool | Needed for | Located via |
//! |------|------------|-------------|
//! | Inkscape (0.92 or 1.x) | every export | `inkscape_path`, `INKSCAPE_PATH`, `PATH` |
//! | ImageMagick | jpeg/jpg, unless `transcoder = "native"` | `imagemagick_path`, `IMAGEMAGICK_PATH`, `PATH` |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod export;
pub mod output;
pub mod pipeline;
pub mod request;
pub mod server;
pub mod settings;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExportConfig, ExportConfigBuilder, InkscapeDialect, TranscoderKind};
pub use error::ExportError;
pub use export::Exporter;
pub use output::{DownloadFile, ExportResult, SaveStatus};
pub use request::{
    decode_parameters, normalize, ExportAction, ExportForm, ExportFormat, ExportParameters,
    ExportRequest,
};
pub use settings::ServerSettings;
