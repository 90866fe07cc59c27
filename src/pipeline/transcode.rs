//! Raster transcoding: PNG → JPEG.
//!
//! Inkscape cannot write JPEG, so jpeg/jpg exports are rasterised to PNG first
//! and then handed to a [`Transcoder`]. JPEG has no alpha channel; both
//! backends flatten transparent pixels onto the request's background colour
//! (white when none was given) instead of letting them turn black.

use crate::error::ExportError;
use crate::pipeline::process::{expect_output, run_tool};
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

/// JPEG quality used by both backends.
pub const JPEG_QUALITY: u8 = 90;

/// Converts a PNG on disk into a JPEG on disk.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Name used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Read the PNG at `src`, write a JPEG to `dst`.
    async fn transcode(
        &self,
        src: &Path,
        dst: &Path,
        background: Option<&str>,
    ) -> Result<(), ExportError>;
}

// ── ImageMagick ──────────────────────────────────────────────────────────

/// ImageMagick subprocess backend (`convert` on v6, `magick` on v7).
#[derive(Debug, Clone)]
pub struct ImageMagick {
    binary: PathBuf,
    timeout_secs: u64,
}

impl ImageMagick {
    pub fn new(binary: impl Into<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            binary: binary.into(),
            timeout_secs,
        }
    }

    /// `<src> -background <colour> -flatten -quality 90 <dst>`
    pub fn args(&self, src: &Path, dst: &Path, background: Option<&str>) -> Vec<String> {
        vec![
            src.to_string_lossy().into_owned(),
            "-background".into(),
            background.unwrap_or("white").to_string(),
            "-flatten".into(),
            "-quality".into(),
            JPEG_QUALITY.to_string(),
            dst.to_string_lossy().into_owned(),
        ]
    }
}

#[async_trait]
impl Transcoder for ImageMagick {
    fn name(&self) -> &'static str {
        "imagemagick"
    }

    async fn transcode(
        &self,
        src: &Path,
        dst: &Path,
        background: Option<&str>,
    ) -> Result<(), ExportError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.args(src, dst, background));

        run_tool(self.name(), cmd, self.timeout_secs).await?;
        let bytes = expect_output(self.name(), dst).await?;
        info!("Transcoded PNG → JPEG via ImageMagick ({} bytes)", bytes);
        Ok(())
    }
}

// ── Native ───────────────────────────────────────────────────────────────

/// In-process backend built on the `image` crate.
///
/// Decoding and encoding are CPU-bound, so the work runs on tokio's blocking
/// pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeTranscoder;

#[async_trait]
impl Transcoder for NativeTranscoder {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn transcode(
        &self,
        src: &Path,
        dst: &Path,
        background: Option<&str>,
    ) -> Result<(), ExportError> {
        let src = src.to_path_buf();
        let out = dst.to_path_buf();
        let bg = background.and_then(parse_hex_rgb).unwrap_or([255, 255, 255]);

        tokio::task::spawn_blocking(move || transcode_blocking(&src, &out, bg))
            .await
            .map_err(|e| ExportError::Internal(format!("Transcode task panicked: {}", e)))??;

        expect_output(self.name(), dst).await?;
        Ok(())
    }
}

fn transcode_blocking(src: &Path, dst: &Path, bg: [u8; 3]) -> Result<(), ExportError> {
    let failure = |detail: String| ExportError::ConversionFailure {
        tool: "native",
        detail,
    };

    let rgba = image::open(src)
        .map_err(|e| failure(format!("cannot decode '{}': {}", src.display(), e)))?
        .to_rgba8();

    let flat = flatten(&rgba, bg);

    let file = File::create(dst).map_err(|e| ExportError::fs(dst, e))?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY)
        .encode_image(&flat)
        .map_err(|e| failure(format!("JPEG encoding failed: {}", e)))?;
    writer.flush().map_err(|e| ExportError::fs(dst, e))?;

    info!("Transcoded PNG → JPEG in-process ({}x{})", flat.width(), flat.height());
    Ok(())
}

/// Alpha-composite every pixel over an opaque background.
fn flatten(rgba: &image::RgbaImage, bg: [u8; 3]) -> RgbImage {
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let p = rgba.get_pixel(x, y).0;
        let a = p[3] as u32;
        let mix = |c: u8, b: u8| ((c as u32 * a + b as u32 * (255 - a) + 127) / 255) as u8;
        Rgb([mix(p[0], bg[0]), mix(p[1], bg[1]), mix(p[2], bg[2])])
    })
}

/// Parse `#rgb`, `#rrggbb` or `#rrggbbaa` (alpha ignored).
pub fn parse_hex_rgb(color: &str) -> Option<[u8; 3]> {
    let hex = color.trim().trim_start_matches('#');
    let channel = |s: &str| u8::from_str_radix(s, 16).ok();
    match hex.len() {
        3 => {
            let mut out = [0u8; 3];
            for (i, c) in hex.chars().enumerate() {
                let v = c.to_digit(16)? as u8;
                out[i] = v * 17;
            }
            Some(out)
        }
        6 | 8 => Some([
            channel(hex.get(0..2)?)?,
            channel(hex.get(2..4)?)?,
            channel(hex.get(4..6)?)?,
        ]),
        _ => None,
    }
}
