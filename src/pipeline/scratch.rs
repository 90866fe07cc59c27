//! Per-request scratch space.
//!
//! Each export gets its own [`tempfile::TempDir`], so concurrent requests
//! never read each other's input and the directory (SVG, intermediate PNG,
//! converter output) is removed when the [`ScratchDir`] is dropped, on both
//! the success and the error path.

use crate::error::ExportError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// File name of the SVG handed to the rasterizer.
pub const INPUT_FILE: &str = "input.svg";

/// File name of the PNG produced before JPEG transcoding.
pub const INTERMEDIATE_PNG: &str = "intermediate.png";

/// A request-private temporary directory.
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    /// Create a fresh directory under `root`, or the system temp dir.
    ///
    /// The filesystem calls run off the async worker threads.
    pub async fn create(root: Option<&Path>) -> Result<Self, ExportError> {
        if let Some(root) = root {
            tokio::fs::create_dir_all(root)
                .await
                .map_err(|e| ExportError::fs(root, e))?;
        }

        let parent = root.map(Path::to_path_buf);
        let dir = tokio::task::spawn_blocking(move || {
            let mut builder = tempfile::Builder::new();
            builder.prefix("export-");
            let created = match parent.as_deref() {
                Some(root) => builder.tempdir_in(root),
                None => builder.tempdir(),
            };
            created.map_err(|e| ExportError::fs(parent.unwrap_or_else(std::env::temp_dir), e))
        })
        .await
        .map_err(|e| ExportError::Internal(format!("Scratch task panicked: {}", e)))??;

        debug!("Scratch directory: {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of a file inside the scratch directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Where the inbound SVG lives.
    pub fn input_path(&self) -> PathBuf {
        self.file(INPUT_FILE)
    }

    /// Write the SVG markup to [`INPUT_FILE`] and return its path.
    pub async fn write_input(&self, svg: &str) -> Result<PathBuf, ExportError> {
        let path = self.input_path();
        tokio::fs::write(&path, svg.as_bytes())
            .await
            .map_err(|e| ExportError::fs(&path, e))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn each_request_gets_a_distinct_directory() {
        let root = tempfile::tempdir().unwrap();
        let a = ScratchDir::create(Some(root.path())).await.unwrap();
        let b = ScratchDir::create(Some(root.path())).await.unwrap();
        assert_ne!(a.path(), b.path());

        tokio_test::assert_ok!(a.write_input("<svg id=\"a\"/>").await);
        tokio_test::assert_ok!(b.write_input("<svg id=\"b\"/>").await);
        assert_eq!(std::fs::read_to_string(a.input_path()).unwrap(), "<svg id=\"a\"/>");
        assert_eq!(std::fs::read_to_string(b.input_path()).unwrap(), "<svg id=\"b\"/>");
    }

    #[tokio::test]
    async fn directory_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let path = {
            let scratch = ScratchDir::create(Some(root.path())).await.unwrap();
            std::fs::write(scratch.file(INTERMEDIATE_PNG), b"png").unwrap();
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_root_is_created() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a/b");
        let scratch = ScratchDir::create(Some(&nested)).await.unwrap();
        assert!(scratch.path().starts_with(&nested));
    }

    #[tokio::test]
    async fn unusable_root_is_a_filesystem_error() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        let err = ScratchDir::create(Some(&file)).await.unwrap_err();
        assert_eq!(err.kind(), "FilesystemError", "got {err:?}");
    }
}
