//! Saving exports under a collision-free name.
//!
//! ## Naming policy
//!
//! The first choice is `<stem>.<ext>`. If that name is taken, the file is
//! saved as `<stem>_<suffix>.<ext>`, where `suffix` is the current Unix time
//! in milliseconds written in base 32 (`0-9a-v`). Should that name also be
//! taken (two saves in the same millisecond), the timestamp is bumped by one
//! and re-encoded, up to [`MAX_RENAME_ATTEMPTS`] times. The resulting name is
//! a pure function of the existing files and the timestamp.
//!
//! Every candidate is opened with `create_new`, which fails atomically if the
//! name exists. There is no window between checking and writing in which
//! another request could claim the same name, and an existing file is never
//! overwritten.

use crate::error::ExportError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Renamed candidates tried before giving up.
pub const MAX_RENAME_ATTEMPTS: u64 = 16;

const BASE32_DIGITS: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

/// Where a saved export ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persisted {
    /// Final file name inside the save directory.
    pub file_name: String,
    pub path: PathBuf,
    /// The name that was requested, when the file had to be renamed.
    pub renamed_from: Option<String>,
}

impl Persisted {
    /// Human-readable explanation of a rename, if one happened.
    pub fn notice(&self) -> Option<String> {
        self.renamed_from.as_ref().map(|original| {
            format!(
                "A file named '{}' already exists; the export was saved as '{}' instead.",
                original, self.file_name
            )
        })
    }
}

/// Lower-case base-32 encoding of `n` (`0` → `"0"`).
pub fn encode_base32(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::with_capacity(13);
    while n > 0 {
        digits.push(BASE32_DIGITS[(n % 32) as usize]);
        n /= 32;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

/// The name tried on `attempt` (0 = the requested name).
pub fn candidate_name(stem: &str, ext: &str, timestamp_ms: u64, attempt: u64) -> String {
    if attempt == 0 {
        format!("{stem}.{ext}")
    } else {
        let suffix = encode_base32(timestamp_ms.saturating_add(attempt - 1));
        format!("{stem}_{suffix}.{ext}")
    }
}

/// Write `bytes` into `dir` under the first free candidate name.
///
/// # Errors
/// [`ExportError::Filesystem`] if the directory is unwritable or every
/// candidate name is taken.
pub async fn persist_unique(
    dir: &Path,
    stem: &str,
    ext: &str,
    bytes: &[u8],
    timestamp_ms: u64,
) -> Result<Persisted, ExportError> {
    let requested = candidate_name(stem, ext, timestamp_ms, 0);

    for attempt in 0..=MAX_RENAME_ATTEMPTS {
        let file_name = candidate_name(stem, ext, timestamp_ms, attempt);
        let path = dir.join(&file_name);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("'{}' exists, trying next candidate", file_name);
                continue;
            }
            Err(e) => return Err(ExportError::fs(&path, e)),
        };

        if let Err(e) = write_all(&mut file, bytes).await {
            // Do not leave a truncated file holding the name.
            drop(file);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(ExportError::fs(&path, e));
        }

        let renamed_from = (attempt > 0).then(|| requested.clone());
        if renamed_from.is_some() {
            info!("Saved as '{}' ('{}' already existed)", file_name, requested);
        } else {
            info!("Saved '{}' ({} bytes)", file_name, bytes.len());
        }

        return Ok(Persisted {
            file_name,
            path,
            renamed_from,
        });
    }

    Err(ExportError::fs(
        dir.join(&requested),
        std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free name after {MAX_RENAME_ATTEMPTS} renames"),
        ),
    ))
}

async fn write_all(file: &mut tokio::fs::File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}
