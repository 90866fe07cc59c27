//! Server settings loaded from a config file and the environment.
//!
//! Sources, lowest precedence first:
//!
//! 1. built-in defaults ([`ServerSettings::default`])
//! 2. the config file (`--config`, TOML or JSON by extension), or
//!    `chart-exporter.toml` in the working directory if present
//! 3. environment variables `CHART_EXPORTER__<KEY>`, e.g.
//!    `CHART_EXPORTER__PORT=9000`
//!
//! CLI flags are applied on top by the binary. Relative paths in the file are
//! resolved against the file's directory, not the working directory.

use crate::config::{ExportConfig, InkscapeDialect, TranscoderKind};
use crate::error::ExportError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "CHART_EXPORTER";

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "chart-exporter.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Directory saved exports are written to and served from.
    #[serde(alias = "fileSavePath", alias = "filesavepath")]
    pub file_save_path: PathBuf,
    pub static_path_prefix: String,
    /// Parent of the per-request scratch directories.
    pub scratch_dir: Option<PathBuf>,
    pub max_request_size_mb: usize,
    pub max_concurrent_exports: usize,
    pub converter_timeout_secs: u64,
    /// Unset: located via `INKSCAPE_PATH` or `PATH`.
    pub inkscape_path: Option<PathBuf>,
    pub inkscape_dialect: InkscapeDialect,
    /// Unset: located via `IMAGEMAGICK_PATH` or `PATH`.
    pub imagemagick_path: Option<PathBuf>,
    pub transcoder: TranscoderKind,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let export = ExportConfig::default();
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            file_save_path: export.save_dir,
            static_path_prefix: export.static_path_prefix,
            scratch_dir: None,
            max_request_size_mb: 10,
            max_concurrent_exports: export.max_concurrent_exports,
            converter_timeout_secs: export.converter_timeout_secs,
            inkscape_path: None,
            inkscape_dialect: export.inkscape_dialect,
            imagemagick_path: None,
            transcoder: export.transcoder,
        }
    }
}

impl ServerSettings {
    /// Load settings from `path` (or the default file) plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ExportError> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// As [`load`](Self::load), reading environment variables under `prefix`.
    pub fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self, ExportError> {
        let mut builder = config::Config::builder();
        let mut base_path: Option<PathBuf> = None;

        match path {
            Some(path) => {
                if !path.is_file() {
                    return Err(ExportError::InvalidConfig(format!(
                        "config file '{}' does not exist",
                        path.display()
                    )));
                }
                info!("Loading settings from {}", path.display());
                builder = builder.add_source(config::File::from(path));
                base_path = path.parent().map(Path::to_path_buf);
            }
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    info!("Loading settings from {}", default.display());
                    builder = builder.add_source(config::File::from(default));
                    base_path = Some(PathBuf::from("."));
                }
            }
        }

        // Environment always wins over the file.
        builder = builder.add_source(
            config::Environment::with_prefix(prefix)
                .separator("__")
                .try_parsing(true),
        );

        let mut settings: ServerSettings = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ExportError::InvalidConfig(e.to_string()))?;

        if let Some(base) = base_path {
            settings.resolve_paths(&base);
        }
        debug!("Settings: {:?}", settings);
        Ok(settings)
    }

    /// Make relative paths relative to `base`.
    fn resolve_paths(&mut self, base: &Path) {
        if base.as_os_str().is_empty() {
            return;
        }
        if self.file_save_path.is_relative() {
            self.file_save_path = base.join(&self.file_save_path);
        }
        if let Some(ref scratch) = self.scratch_dir {
            if scratch.is_relative() {
                self.scratch_dir = Some(base.join(scratch));
            }
        }
    }

    /// `host:port` for the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Request body limit in bytes.
    pub fn max_body_bytes(&self) -> usize {
        self.max_request_size_mb.saturating_mul(1024 * 1024)
    }

    /// Build the pipeline configuration, locating converters that were not
    /// given explicitly.
    ///
    /// ImageMagick is only required when it is the configured transcoder.
    ///
    /// # Errors
    /// [`ExportError::ToolNotFound`] when a required converter cannot be
    /// located, [`ExportError::InvalidConfig`] when validation fails.
    pub fn to_export_config(&self) -> Result<ExportConfig, ExportError> {
        let inkscape = match self.inkscape_path {
            Some(ref path) => path.clone(),
            None => locate(&tool_locate::INKSCAPE)?,
        };

        let mut builder = ExportConfig::builder()
            .save_dir(self.file_save_path.clone())
            .static_path_prefix(self.static_path_prefix.clone())
            .inkscape_path(inkscape)
            .inkscape_dialect(self.inkscape_dialect)
            .transcoder(self.transcoder)
            .converter_timeout_secs(self.converter_timeout_secs)
            .max_concurrent_exports(self.max_concurrent_exports);

        if self.transcoder == TranscoderKind::ImageMagick {
            let imagemagick = match self.imagemagick_path {
                Some(ref path) => path.clone(),
                None => locate(&tool_locate::IMAGEMAGICK)?,
            };
            builder = builder.imagemagick_path(imagemagick);
        }
        if let Some(ref scratch) = self.scratch_dir {
            builder = builder.scratch_root(scratch.clone());
        }

        builder.build()
    }
}

fn locate(tool: &tool_locate::Tool) -> Result<PathBuf, ExportError> {
    tool_locate::locate(tool).map_err(|e| ExportError::ToolNotFound(e.to_string()))
}
