//! # tool-locate
//!
//! Find the external command-line converters the exporter shells out to, so
//! that operators only need them installed somewhere on `PATH`.
//!
//! ## How it works
//!
//! On the first call to [`locate`] for a given [`Tool`]:
//!
//! 1. If the tool's override variable (e.g. `INKSCAPE_PATH`) is set, that path
//!    is used, and it must point to an existing file.
//! 2. Otherwise each candidate executable name is searched on `PATH` in order
//!    (ImageMagick 7 ships `magick`, ImageMagick 6 ships `convert`).
//!
//! The resolved path is cached for the life of the process.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tool_locate::{locate, tool_version, INKSCAPE};
//!
//! let inkscape = locate(&INKSCAPE).expect("inkscape not installed");
//! if let Some(v) = tool_version(&inkscape) {
//!     eprintln!("using {v}");
//! }
//! ```
//!
//! ## Environment variable overrides
//!
//! - `INKSCAPE_PATH` — path to the inkscape executable.
//! - `IMAGEMAGICK_PATH` — path to `magick` or `convert`.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use thiserror::Error;

// ── Known tools ──────────────────────────────────────────────────────────────

/// An external executable the exporter depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tool {
    /// Human-readable name used in logs and errors.
    pub name: &'static str,
    /// Environment variable that overrides the `PATH` search.
    pub env_var: &'static str,
    /// Executable names tried on `PATH`, first match wins.
    pub candidates: &'static [&'static str],
}

/// The Inkscape vector converter.
pub const INKSCAPE: Tool = Tool {
    name: "inkscape",
    env_var: "INKSCAPE_PATH",
    candidates: &["inkscape"],
};

/// ImageMagick's converter (`magick` on v7, `convert` on v6).
pub const IMAGEMAGICK: Tool = Tool {
    name: "imagemagick",
    env_var: "IMAGEMAGICK_PATH",
    candidates: &["magick", "convert"],
};

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by tool-locate operations.
#[derive(Error, Debug)]
pub enum LocateError {
    /// The override variable points at something that does not exist.
    #[error("{var} is set to '{path}', but no such file exists")]
    OverrideMissing { var: &'static str, path: PathBuf },

    /// None of the candidate names were found on `PATH`.
    #[error("{tool} not found on PATH (tried: {tried}). Install it or set {var}.")]
    NotFound {
        tool: &'static str,
        tried: String,
        var: &'static str,
    },
}

// ── Process-wide cache ───────────────────────────────────────────────────────

static RESOLVED: OnceLock<Mutex<HashMap<&'static str, PathBuf>>> = OnceLock::new();

fn cache() -> &'static Mutex<HashMap<&'static str, PathBuf>> {
    RESOLVED.get_or_init(|| Mutex::new(HashMap::new()))
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Resolve `tool` to an executable path, honouring its override variable.
///
/// Successful lookups are cached; failures are not, so installing the tool
/// while the process runs is picked up on the next call.
pub fn locate(tool: &Tool) -> Result<PathBuf, LocateError> {
    if let Some(path) = cache().lock().ok().and_then(|c| c.get(tool.name).cloned()) {
        return Ok(path);
    }

    let path = match std::env::var_os(tool.env_var) {
        Some(value) if !value.is_empty() => {
            let path = PathBuf::from(value);
            if !path.exists() {
                return Err(LocateError::OverrideMissing {
                    var: tool.env_var,
                    path,
                });
            }
            path
        }
        _ => locate_in(tool, std::env::var_os("PATH"))?,
    };

    if let Ok(mut c) = cache().lock() {
        c.insert(tool.name, path.clone());
    }
    Ok(path)
}

/// Search `search_path` (a `PATH`-style list) for the tool's candidates.
///
/// Ignores the override variable and the cache.
pub fn locate_in<P: AsRef<OsStr>>(
    tool: &Tool,
    search_path: Option<P>,
) -> Result<PathBuf, LocateError> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let search_path = search_path.map(|p| p.as_ref().to_os_string());

    tool.candidates
        .iter()
        .find_map(|name| which::which_in(name, search_path.as_ref(), &cwd).ok())
        .ok_or_else(|| LocateError::NotFound {
            tool: tool.name,
            tried: tool.candidates.join(", "),
            var: tool.env_var,
        })
}

/// How long [`tool_version`] waits for `--version` before giving up.
pub const VERSION_TIMEOUT: Duration = Duration::from_secs(5);

/// Run `<path> --version` and return the first non-empty line of its output.
///
/// Returns `None` if the tool cannot be spawned, prints nothing, or has not
/// exited after [`VERSION_TIMEOUT`] (the child is killed in that case).
pub fn tool_version(path: &Path) -> Option<String> {
    tool_version_within(path, VERSION_TIMEOUT)
}

/// [`tool_version`] with an explicit time limit.
pub fn tool_version_within(path: &Path, limit: Duration) -> Option<String> {
    let mut child = Command::new(path)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .ok()?;

    let deadline = Instant::now() + limit;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(20)),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return None;
            }
        }
    }

    let output = child.wait_with_output().ok()?;
    let text = if output.stdout.is_empty() {
        output.stderr
    } else {
        output.stdout
    };
    String::from_utf8_lossy(&text)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn fake_executable(dir: &Path, name: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\necho \"Fake 1.2.3\"\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn finds_first_candidate_in_search_path() {
        let dir = tempfile::tempdir().unwrap();
        let expected = fake_executable(dir.path(), "convert");

        let found = locate_in(&IMAGEMAGICK, Some(dir.path())).unwrap();
        assert_eq!(found, expected);
    }

    #[cfg(unix)]
    #[test]
    fn prefers_earlier_candidate() {
        let dir = tempfile::tempdir().unwrap();
        fake_executable(dir.path(), "convert");
        let magick = fake_executable(dir.path(), "magick");

        let found = locate_in(&IMAGEMAGICK, Some(dir.path())).unwrap();
        assert_eq!(found, magick);
    }

    #[test]
    fn missing_tool_reports_all_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let err = locate_in(&IMAGEMAGICK, Some(dir.path())).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("magick, convert"), "got: {msg}");
        assert!(msg.contains("IMAGEMAGICK_PATH"), "got: {msg}");
    }

    #[cfg(unix)]
    #[test]
    fn version_is_first_output_line() {
        let dir = tempfile::tempdir().unwrap();
        let exe = fake_executable(dir.path(), "inkscape");
        assert_eq!(tool_version(&exe).as_deref(), Some("Fake 1.2.3"));
    }

    #[test]
    fn version_of_missing_binary_is_none() {
        assert!(tool_version(Path::new("/nonexistent/definitely-not-here")).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn hung_tool_times_out() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("inkscape");
        std::fs::write(&exe, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let started = Instant::now();
        assert!(tool_version_within(&exe, Duration::from_millis(200)).is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
