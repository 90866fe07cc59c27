//! The export pipeline entry point.
//!
//! [`Exporter`] owns everything a request needs: the validated
//! [`ExportConfig`], the converter backends, and the semaphore that bounds
//! how many conversions run at once. It is built once at startup, wrapped in
//! an `Arc` and shared by every handler. Nothing in the pipeline keeps
//! module-level state.

use crate::config::{ExportConfig, TranscoderKind};
use crate::error::ExportError;
use crate::output::{DownloadFile, ExportResult, SaveStatus};
use crate::pipeline::persist::persist_unique;
use crate::pipeline::rasterize::{Inkscape, RasterJob, RenderTarget, Rasterizer};
use crate::pipeline::scratch::{ScratchDir, INTERMEDIATE_PNG};
use crate::pipeline::transcode::{ImageMagick, NativeTranscoder, Transcoder};
use crate::request::{ExportAction, ExportFormat, ExportRequest};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Status message of a successful save.
pub const SAVE_SUCCESS_MESSAGE: &str = "successful";

/// Runs exports against a fixed configuration.
pub struct Exporter {
    config: Arc<ExportConfig>,
    rasterizer: Arc<dyn Rasterizer>,
    transcoder: Arc<dyn Transcoder>,
    permits: Semaphore,
    clock: fn() -> u64,
}

impl std::fmt::Debug for Exporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exporter")
            .field("config", &self.config)
            .field("rasterizer", &self.rasterizer.name())
            .field("transcoder", &self.transcoder.name())
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}

impl Exporter {
    /// Build an exporter with the converters named in `config`.
    pub fn new(config: ExportConfig) -> Self {
        let timeout = config.converter_timeout_secs;
        let rasterizer: Arc<dyn Rasterizer> = Arc::new(Inkscape::new(
            config.inkscape_path.clone(),
            config.inkscape_dialect,
            timeout,
        ));
        let transcoder: Arc<dyn Transcoder> = match config.transcoder {
            TranscoderKind::ImageMagick => {
                Arc::new(ImageMagick::new(config.imagemagick_path.clone(), timeout))
            }
            TranscoderKind::Native => Arc::new(NativeTranscoder),
        };
        Self::with_converters(config, rasterizer, transcoder)
    }

    /// Build an exporter around caller-supplied converter backends.
    pub fn with_converters(
        config: ExportConfig,
        rasterizer: Arc<dyn Rasterizer>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        let permits = Semaphore::new(config.max_concurrent_exports.max(1));
        Self {
            config: Arc::new(config),
            rasterizer,
            transcoder,
            permits,
            clock: unix_millis,
        }
    }

    /// Replace the millisecond clock used for rename suffixes.
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Create the save directory if it does not exist yet.
    pub async fn prepare(&self) -> Result<(), ExportError> {
        let dir = &self.config.save_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ExportError::fs(dir, e))?;
        info!("Save directory: {}", dir.display());
        Ok(())
    }

    /// Convert `request` and either return the bytes or save them.
    ///
    /// # Errors
    /// Only the download action returns `Err`. A save that fails is reported
    /// as `Ok(ExportResult::Saved(status))` with `status.status == false`, so
    /// the client always receives a status record.
    pub async fn export(&self, request: &ExportRequest) -> Result<ExportResult, ExportError> {
        let start = Instant::now();
        let params = &request.parameters;
        info!(
            "Starting export: {} ({}x{}, action={:?})",
            request.file_name(),
            request.width,
            request.height,
            params.action
        );

        let produced = self.convert(request).await;

        let result = match params.action {
            ExportAction::Download => {
                let bytes = produced?;
                ExportResult::Download(DownloadFile {
                    bytes,
                    format: params.format,
                    file_name: request.file_name(),
                })
            }
            ExportAction::Save => {
                let outcome = match produced {
                    Ok(bytes) => self.save(request, &bytes).await,
                    Err(e) => Err(e),
                };
                let status = outcome.unwrap_or_else(|e| {
                    warn!("Save of '{}' failed: {}", request.file_name(), e);
                    SaveStatus::failed(e.to_string(), &request.dom_id, request.width, request.height)
                });
                ExportResult::Saved(status)
            }
        };

        info!(
            "Export of '{}' finished in {}ms",
            request.file_name(),
            start.elapsed().as_millis()
        );
        Ok(result)
    }

    /// Run the converters and return the produced bytes.
    ///
    /// The scratch directory lives until this returns, on every path.
    async fn convert(&self, request: &ExportRequest) -> Result<Vec<u8>, ExportError> {
        let format = request.parameters.format;

        // ── Step 1: Resolve the render target ────────────────────────────────
        let target = render_target(format);

        // ── Step 2: Wait for a conversion slot ───────────────────────────────
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ExportError::Internal("export semaphore closed".into()))?;

        // ── Step 3: Private scratch directory + input file ───────────────────
        let scratch = ScratchDir::create(self.config.scratch_root.as_deref()).await?;
        let input = scratch.write_input(&request.svg).await?;
        let output = scratch.file(&format!("output.{}", format.extension()));

        // ── Step 4: Rasterise (to an intermediate PNG for JPEG) ─────────────
        let raster_output = if format.is_jpeg() {
            scratch.file(INTERMEDIATE_PNG)
        } else {
            output.clone()
        };
        let job = RasterJob {
            input,
            output: raster_output,
            target,
            width: request.width,
            height: request.height,
            background: request.background_color.clone(),
            background_opacity: request.background_alpha,
        };
        debug!("Rasterising with {}", self.rasterizer.name());
        self.rasterizer.rasterize(&job).await?;

        // ── Step 5: Transcode PNG → JPEG ─────────────────────────────────────
        if format.is_jpeg() {
            debug!("Transcoding with {}", self.transcoder.name());
            self.transcoder
                .transcode(&job.output, &output, request.background_color.as_deref())
                .await?;
        }

        // ── Step 6: Collect the result ───────────────────────────────────────
        let bytes = tokio::fs::read(&output)
            .await
            .map_err(|e| ExportError::fs(&output, e))?;
        if bytes.is_empty() {
            return Err(ExportError::ConversionFailure {
                tool: self.rasterizer.name(),
                detail: format!("'{}' is empty", output.display()),
            });
        }
        Ok(bytes)
    }

    async fn save(&self, request: &ExportRequest, bytes: &[u8]) -> Result<SaveStatus, ExportError> {
        let params = &request.parameters;
        let persisted = persist_unique(
            &self.config.save_dir,
            &params.file_stem,
            params.format.extension(),
            bytes,
            (self.clock)(),
        )
        .await?;

        Ok(SaveStatus {
            status: true,
            status_message: SAVE_SUCCESS_MESSAGE.to_string(),
            url: self.config.public_url(&persisted.file_name),
            notice: persisted.notice(),
            file_name: persisted.file_name,
            dom_id: request.dom_id.clone(),
            width: request.width,
            height: request.height,
        })
    }
}

/// What the rasterizer is asked for. JPEG goes through PNG.
pub fn render_target(format: ExportFormat) -> RenderTarget {
    match format {
        ExportFormat::Png | ExportFormat::Jpeg | ExportFormat::Jpg => RenderTarget::Png,
        ExportFormat::Pdf => RenderTarget::Pdf,
        ExportFormat::Svg => RenderTarget::PlainSvg,
    }
}

fn unix_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
