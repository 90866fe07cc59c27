//! Pipeline stages for SVG export.
//!
//! Each submodule implements exactly one step, so each can be tested with the
//! external converters faked out.
//!
//! ## Data Flow
//!
//! ```text
//! scratch ──▶ rasterize ──▶ [transcode] ──▶ persist (save only)
//! (input.svg)  (inkscape)   (png → jpeg)    (collision-safe name)
//! ```
//!
//! 1. [`scratch`]   — a fresh temp directory per request; the SVG is written
//!    there, never to a shared path
//! 2. [`rasterize`] — the [`Rasterizer`](rasterize::Rasterizer) trait and its
//!    Inkscape backend
//! 3. [`transcode`] — the [`Transcoder`](transcode::Transcoder) trait for the
//!    PNG → JPEG stage (ImageMagick or in-process)
//! 4. [`persist`]   — exclusive-create into the save directory with the
//!    timestamp-suffix rename policy
//!
//! [`process`] holds the subprocess runner shared by the external backends.

pub mod persist;
pub mod process;
pub mod rasterize;
pub mod scratch;
pub mod transcode;
