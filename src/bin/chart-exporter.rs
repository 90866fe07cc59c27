//! CLI binary for chart-exporter.
//!
//! Loads settings, locates the converters and runs the HTTP server.

use anyhow::{Context, Result};
use chart_exporter::{server, Exporter, ServerSettings, TranscoderKind};
use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"CONFIGURATION:
  Settings are read from --config (TOML or JSON), else ./chart-exporter.toml,
  then overridden by CHART_EXPORTER__<KEY> environment variables, then by
  the flags below. Example:

    port = 8080
    file_save_path = "exports"        # relative to the config file
    static_path_prefix = "/exports"
    inkscape_dialect = "modern"       # "legacy" for Inkscape 0.92
    transcoder = "imagemagick"        # or "native"

EXTERNAL TOOLS:
  inkscape        INKSCAPE_PATH or PATH
  magick/convert  IMAGEMAGICK_PATH or PATH (jpeg exports, imagemagick transcoder)
"#;

/// SVG export server for client-side charts.
#[derive(Parser, Debug)]
#[command(
    name = "chart-exporter",
    version,
    about = "SVG export server: PNG, JPEG, PDF and SVG via Inkscape",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Config file (TOML or JSON).
    #[arg(short, long, env = "CHART_EXPORTER_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (overrides the config file).
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides the config file).
    #[arg(short, long)]
    port: Option<u16>,

    /// Print converter versions and exit.
    #[arg(long)]
    check_tools: bool,

    /// Debug logging.
    #[arg(short, long, env = "CHART_EXPORTER_VERBOSE")]
    verbose: bool,

    /// Errors only.
    #[arg(short, long, env = "CHART_EXPORTER_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Settings ─────────────────────────────────────────────────────────
    let mut settings =
        ServerSettings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(host) = cli.host {
        settings.host = host;
    }
    if let Some(port) = cli.port {
        settings.port = port;
    }

    let config = settings
        .to_export_config()
        .context("Cannot start the export pipeline")?;

    // ── Converters ───────────────────────────────────────────────────────
    report_tool("inkscape", &config.inkscape_path);
    if config.transcoder == TranscoderKind::ImageMagick {
        report_tool("imagemagick", &config.imagemagick_path);
    } else {
        info!("JPEG transcoding: in-process");
    }
    if cli.check_tools {
        return Ok(());
    }

    // ── Server ───────────────────────────────────────────────────────────
    let exporter = Arc::new(Exporter::new(config));
    exporter
        .prepare()
        .await
        .context("Failed to create the save directory")?;

    let prefix = exporter.config().static_path_prefix.clone();
    let app = server::router(exporter, settings.max_body_bytes());

    let addr = settings.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("chart-exporter listening on {}", addr);
    info!("  - POST /          export");
    info!("  - GET  {}/<file>  saved exports", prefix.trim_end_matches('/'));
    info!("  - GET  /health");

    server::serve(listener, app).await.context("Server error")?;
    Ok(())
}

fn report_tool(name: &str, path: &std::path::Path) {
    match tool_locate::tool_version(path) {
        Some(version) => info!("{}: {} ({})", name, path.display(), version),
        None => warn!("{}: {} did not report a version", name, path.display()),
    }
}
