//! Vector rasterisation: SVG file → PNG / PDF / plain SVG.
//!
//! The [`Rasterizer`] trait is the seam between the pipeline and the external
//! converter. [`Inkscape`] is the production backend; tests substitute a fake
//! that records each [`RasterJob`].
//!
//! Inkscape changed its command line in 1.0, so the argument list is built
//! for a configured [`InkscapeDialect`]:
//!
//! ```text
//! legacy:  inkscape --without-gui --export-png=out.png --export-width=W --export-height=H in.svg
//! modern:  inkscape --export-type=png --export-filename=out.png --export-width=W --export-height=H in.svg
//! ```

use crate::config::InkscapeDialect;
use crate::error::ExportError;
use crate::pipeline::process::{expect_output, run_tool};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

/// What the rasterizer should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTarget {
    Png,
    Pdf,
    /// SVG with editor-specific metadata stripped.
    PlainSvg,
}

impl RenderTarget {
    pub fn extension(self) -> &'static str {
        match self {
            RenderTarget::Png => "png",
            RenderTarget::Pdf => "pdf",
            RenderTarget::PlainSvg => "svg",
        }
    }
}

/// One rasterisation request.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub target: RenderTarget,
    pub width: u32,
    pub height: u32,
    /// Page background; only honoured for PNG output.
    pub background: Option<String>,
    pub background_opacity: Option<f64>,
}

/// Converts an SVG file on disk into the job's target format.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Name used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Write `job.output`. Must fail rather than leave it missing or empty.
    async fn rasterize(&self, job: &RasterJob) -> Result<(), ExportError>;
}

/// Inkscape subprocess backend.
#[derive(Debug, Clone)]
pub struct Inkscape {
    binary: PathBuf,
    dialect: InkscapeDialect,
    timeout_secs: u64,
}

impl Inkscape {
    pub fn new(binary: impl Into<PathBuf>, dialect: InkscapeDialect, timeout_secs: u64) -> Self {
        Self {
            binary: binary.into(),
            dialect,
            timeout_secs,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Full argument list (excluding the program) for `job`.
    pub fn args(&self, job: &RasterJob) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::with_capacity(8);

        match self.dialect {
            InkscapeDialect::Legacy => {
                args.push("--without-gui".into());
                let flag = match job.target {
                    RenderTarget::Png => "--export-png=",
                    RenderTarget::Pdf => "--export-pdf=",
                    RenderTarget::PlainSvg => "--export-plain-svg=",
                };
                args.push(flag_with_path(flag, &job.output));
            }
            InkscapeDialect::Modern => {
                args.push(format!("--export-type={}", job.target.extension()).into());
                if job.target == RenderTarget::PlainSvg {
                    args.push("--export-plain-svg".into());
                }
                args.push(flag_with_path("--export-filename=", &job.output));
            }
        }

        args.push(format!("--export-width={}", job.width).into());
        args.push(format!("--export-height={}", job.height).into());

        if job.target == RenderTarget::Png {
            if let Some(ref color) = job.background {
                args.push(format!("--export-background={color}").into());
            }
            if let Some(opacity) = job.background_opacity {
                args.push(format!("--export-background-opacity={opacity}").into());
            }
        }

        args.push(job.input.clone().into_os_string());
        args
    }
}

fn flag_with_path(flag: &str, path: &Path) -> OsString {
    let mut s = OsString::from(flag);
    s.push(path.as_os_str());
    s
}

#[async_trait]
impl Rasterizer for Inkscape {
    fn name(&self) -> &'static str {
        "inkscape"
    }

    async fn rasterize(&self, job: &RasterJob) -> Result<(), ExportError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.args(job));

        run_tool(self.name(), cmd, self.timeout_secs).await?;
        let bytes = expect_output(self.name(), &job.output).await?;

        info!(
            "Rasterised {}x{} → {} ({} bytes)",
            job.width,
            job.height,
            job.target.extension(),
            bytes
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(target: RenderTarget) -> RasterJob {
        RasterJob {
            input: PathBuf::from("/tmp/s/input.svg"),
            output: PathBuf::from(format!("/tmp/s/output.{}", target.extension())),
            target,
            width: 640,
            height: 480,
            background: Some("#ffffff".into()),
            background_opacity: Some(1.0),
        }
    }

    fn args_of(dialect: InkscapeDialect, target: RenderTarget) -> Vec<String> {
        Inkscape::new("inkscape", dialect, 60)
            .args(&job(target))
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn legacy_png_args() {
        assert_eq!(
            args_of(InkscapeDialect::Legacy, RenderTarget::Png),
            vec![
                "--without-gui",
                "--export-png=/tmp/s/output.png",
                "--export-width=640",
                "--export-height=480",
                "--export-background=#ffffff",
                "--export-background-opacity=1",
                "/tmp/s/input.svg",
            ]
        );
    }

    #[test]
    fn legacy_pdf_and_svg_flags() {
        let pdf = args_of(InkscapeDialect::Legacy, RenderTarget::Pdf);
        assert!(pdf.contains(&"--export-pdf=/tmp/s/output.pdf".to_string()));
        let svg = args_of(InkscapeDialect::Legacy, RenderTarget::PlainSvg);
        assert!(svg.contains(&"--export-plain-svg=/tmp/s/output.svg".to_string()));
    }

    #[test]
    fn modern_png_args() {
        let args = args_of(InkscapeDialect::Modern, RenderTarget::Png);
        assert_eq!(args[0], "--export-type=png");
        assert_eq!(args[1], "--export-filename=/tmp/s/output.png");
        assert!(args.contains(&"--export-width=640".to_string()));
        assert!(args.contains(&"--export-height=480".to_string()));
        assert_eq!(args.last().unwrap(), "/tmp/s/input.svg");
    }

    #[test]
    fn modern_plain_svg_args() {
        let args = args_of(InkscapeDialect::Modern, RenderTarget::PlainSvg);
        assert_eq!(args[0], "--export-type=svg");
        assert_eq!(args[1], "--export-plain-svg");
    }

    #[test]
    fn background_only_applies_to_png() {
        let args = args_of(InkscapeDialect::Modern, RenderTarget::Pdf);
        assert!(!args.iter().any(|a| a.starts_with("--export-background")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_zero_without_output_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut j = job(RenderTarget::Png);
        j.output = dir.path().join("never-written.png");

        // `true` accepts any arguments and writes nothing.
        let inkscape = Inkscape::new("true", InkscapeDialect::Modern, 5);
        let err = inkscape.rasterize(&j).await.unwrap_err();
        assert!(matches!(err, ExportError::ConversionFailure { tool: "inkscape", .. }), "got {err:?}");
    }
}
