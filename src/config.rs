//! Runtime configuration for the export pipeline.
//!
//! [`ExportConfig`] is the explicit context every export runs against: where
//! saved files go, where scratch directories are created, which converter
//! binaries to call and how long to wait for them. It is built once at
//! startup (usually from [`crate::settings::ServerSettings`]) and shared
//! read-only between requests.
//!
//! Use [`ExportConfig::builder()`] rather than filling the struct by hand;
//! `build()` rejects values the pipeline cannot work with.

use crate::error::ExportError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the export pipeline.
///
/// # Example
/// ```rust
/// use chart_exporter::{ExportConfig, InkscapeDialect};
///
/// let config = ExportConfig::builder()
///     .save_dir("/srv/exports")
///     .inkscape_dialect(InkscapeDialect::Legacy)
///     .converter_timeout_secs(30)
///     .build()
///     .unwrap();
/// assert_eq!(config.converter_timeout_secs, 30);
/// ```
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Directory that `save` exports are written to. Default: `./exports`.
    pub save_dir: PathBuf,

    /// Parent directory for per-request scratch directories.
    /// `None` uses the system temp directory.
    pub scratch_root: Option<PathBuf>,

    /// URL path prefix under which the save directory is served. Default: `/exports`.
    pub static_path_prefix: String,

    /// Inkscape executable. Default: `inkscape` (resolved via `PATH`).
    pub inkscape_path: PathBuf,

    /// Which Inkscape command-line syntax to emit. Default: [`InkscapeDialect::Modern`].
    pub inkscape_dialect: InkscapeDialect,

    /// ImageMagick executable (`magick` or `convert`). Default: `convert`.
    pub imagemagick_path: PathBuf,

    /// Backend used for the PNG → JPEG stage. Default: [`TranscoderKind::ImageMagick`].
    pub transcoder: TranscoderKind,

    /// Per-subprocess timeout in seconds. Default: 60.
    ///
    /// A hung converter would otherwise hold the request (and a concurrency
    /// permit) forever.
    pub converter_timeout_secs: u64,

    /// Maximum number of exports converting at once. Default: 4.
    ///
    /// Inkscape is memory-hungry; requests beyond this limit wait for a permit.
    pub max_concurrent_exports: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("exports"),
            scratch_root: None,
            static_path_prefix: "/exports".to_string(),
            inkscape_path: PathBuf::from("inkscape"),
            inkscape_dialect: InkscapeDialect::default(),
            imagemagick_path: PathBuf::from("convert"),
            transcoder: TranscoderKind::default(),
            converter_timeout_secs: 60,
            max_concurrent_exports: 4,
        }
    }
}

impl ExportConfig {
    /// Create a new builder for `ExportConfig`.
    pub fn builder() -> ExportConfigBuilder {
        ExportConfigBuilder {
            config: Self::default(),
        }
    }

    /// Public URL of a file saved under `file_name`.
    pub fn public_url(&self, file_name: &str) -> String {
        format!(
            "{}/{}",
            self.static_path_prefix.trim_end_matches('/'),
            urlencoding::encode(file_name)
        )
    }
}

/// Builder for [`ExportConfig`].
#[derive(Debug)]
pub struct ExportConfigBuilder {
    config: ExportConfig,
}

impl ExportConfigBuilder {
    pub fn save_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.save_dir = dir.into();
        self
    }

    pub fn scratch_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_root = Some(dir.into());
        self
    }

    pub fn static_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.static_path_prefix = prefix.into();
        self
    }

    pub fn inkscape_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.inkscape_path = path.into();
        self
    }

    pub fn inkscape_dialect(mut self, dialect: InkscapeDialect) -> Self {
        self.config.inkscape_dialect = dialect;
        self
    }

    pub fn imagemagick_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.imagemagick_path = path.into();
        self
    }

    pub fn transcoder(mut self, kind: TranscoderKind) -> Self {
        self.config.transcoder = kind;
        self
    }

    pub fn converter_timeout_secs(mut self, secs: u64) -> Self {
        self.config.converter_timeout_secs = secs;
        self
    }

    pub fn max_concurrent_exports(mut self, n: usize) -> Self {
        self.config.max_concurrent_exports = n.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExportConfig, ExportError> {
        let c = &self.config;
        if c.converter_timeout_secs == 0 {
            return Err(ExportError::InvalidConfig(
                "converter timeout must be at least 1 second".into(),
            ));
        }
        validate_prefix(&c.static_path_prefix)?;
        if c.save_dir.as_os_str().is_empty() {
            return Err(ExportError::InvalidConfig("save directory must not be empty".into()));
        }
        Ok(self.config)
    }
}

/// The static prefix must be a non-root absolute URL path so it cannot
/// shadow `POST /`.
fn validate_prefix(prefix: &str) -> Result<(), ExportError> {
    let trimmed = prefix.trim_end_matches('/');
    if !prefix.starts_with('/') || trimmed.is_empty() {
        return Err(ExportError::InvalidConfig(format!(
            "static path prefix must start with '/' and not be the root, got '{prefix}'"
        )));
    }
    if trimmed.contains("//") || Path::new(trimmed).components().any(|c| c.as_os_str() == "..") {
        return Err(ExportError::InvalidConfig(format!(
            "static path prefix '{prefix}' is not a clean path"
        )));
    }
    Ok(())
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Inkscape command-line syntax.
///
/// | Dialect | Inkscape | Output flags |
/// |---------|----------|--------------|
/// | `Legacy` | 0.92.x | `--export-png=<out>`, `--export-pdf=<out>`, `--export-plain-svg=<out>` |
/// | `Modern` | 1.x | `--export-type=<ext> --export-filename=<out>` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InkscapeDialect {
    Legacy,
    #[default]
    Modern,
}

/// Backend for the PNG → JPEG stage of jpeg exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscoderKind {
    /// Shell out to ImageMagick. (default)
    #[default]
    ImageMagick,
    /// Transcode in-process with the `image` crate.
    Native,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        let config = ExportConfig::builder().build().unwrap();
        assert_eq!(config.static_path_prefix, "/exports");
        assert_eq!(config.converter_timeout_secs, 60);
        assert_eq!(config.max_concurrent_exports, 4);
        assert_eq!(config.inkscape_dialect, InkscapeDialect::Modern);
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = ExportConfig::builder()
            .converter_timeout_secs(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ExportError::InvalidConfig(_)));
    }

    #[test]
    fn concurrency_clamped_to_one() {
        let config = ExportConfig::builder()
            .max_concurrent_exports(0)
            .build()
            .unwrap();
        assert_eq!(config.max_concurrent_exports, 1);
    }

    #[test]
    fn root_prefix_rejected() {
        for bad in ["/", "", "exports", "/a//b", "/exports/../etc"] {
            let result = ExportConfig::builder().static_path_prefix(bad).build();
            assert!(result.is_err(), "prefix {bad:?} should be rejected");
        }
    }

    #[test]
    fn public_url_joins_prefix() {
        let config = ExportConfig::builder()
            .static_path_prefix("/files/")
            .build()
            .unwrap();
        assert_eq!(config.public_url("chart.png"), "/files/chart.png");
        assert_eq!(config.public_url("my chart.png"), "/files/my%20chart.png");
    }

    #[test]
    fn dialect_deserialises_lowercase() {
        let d: InkscapeDialect = serde_json::from_str("\"legacy\"").unwrap();
        assert_eq!(d, InkscapeDialect::Legacy);
        let t: TranscoderKind = serde_json::from_str("\"native\"").unwrap();
        assert_eq!(t, TranscoderKind::Native);
        let t: TranscoderKind = serde_json::from_str("\"imagemagick\"").unwrap();
        assert_eq!(t, TranscoderKind::ImageMagick);
    }
}
