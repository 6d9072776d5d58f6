//! Filesystem-level helpers.
//!
//! This module provides the non-audio half of the engine's contact with
//! disk:
//! - Expanding raw input arguments into the list of source files
//! - The freshness check that makes reruns idempotent
//! - Output directory creation and artifact cleanup

use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

use crate::error::EngineError;
use crate::model::INPUT_EXT;

/// True if the path carries the recognized lossless input extension.
fn is_input_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case(INPUT_EXT))
        .unwrap_or(false)
}

/// True for dot-prefixed directory entries below the walk root.
fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}

/// Expand the raw input arguments into the sorted list of source files.
///
/// Files with the recognized extension are taken as given; directories are
/// walked recursively, skipping hidden entries. Anything else is ignored
/// with a warning, not an error.
pub fn gather_inputs(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            if is_input_file(path) {
                files.push(path.clone());
            } else {
                warn!(path = %path.display(), "ignoring file without .{INPUT_EXT} extension");
            }
        } else if path.is_dir() {
            for entry in WalkDir::new(path).into_iter().filter_entry(|e| !is_hidden(e)) {
                match entry {
                    Ok(entry) => {
                        if entry.file_type().is_file() && is_input_file(entry.path()) {
                            files.push(entry.into_path());
                        }
                    }
                    Err(err) => warn!("skipping unreadable entry: {err}"),
                }
            }
        } else {
            warn!(path = %path.display(), "ignoring input that is neither file nor directory");
        }
    }
    files.sort_by_key(|path| path_sort_key(path));
    files
}

/// Case-insensitive ordering key used for job lists and final reports.
pub(crate) fn path_sort_key(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

/// Best-effort absolute form of `path`; returned unchanged if the current
/// directory cannot be resolved.
pub(crate) fn absolutize(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// True when `destination` exists and is at least as recently modified as
/// `source`.
///
/// Any failure to stat either side counts as stale, so a legitimate
/// conversion is never blocked by an I/O hiccup. The comparison is exactly
/// `dst mtime >= src mtime`; filesystems with coarse timestamps may
/// produce false skips.
pub fn is_up_to_date(source: &Path, destination: &Path) -> bool {
    let (Ok(src), Ok(dst)) = (fs::metadata(source), fs::metadata(destination)) else {
        return false;
    };
    match (src.modified(), dst.modified()) {
        (Ok(src_mtime), Ok(dst_mtime)) => dst_mtime >= src_mtime,
        _ => false,
    }
}

/// Create the parent directory of `path` (and intermediates) if missing.
pub fn ensure_parent_dir(path: &Path) -> Result<(), EngineError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    fs::create_dir_all(parent).map_err(|source| EngineError::CreateDir {
        path: parent.to_path_buf(),
        source,
    })
}

/// Remove a zero-byte destination left behind by a failed transcode.
/// Non-empty files are left alone.
pub fn discard_empty_artifact(path: &Path) {
    if let Ok(meta) = fs::metadata(path) {
        if meta.is_file() && meta.len() == 0 {
            if let Err(err) = fs::remove_file(path) {
                warn!(path = %path.display(), "could not remove empty artifact: {err}");
            }
        }
    }
}
