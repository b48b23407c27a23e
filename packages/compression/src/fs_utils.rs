//! Filesystem utilities for snapshot staging
//!
//! Streaming tree copies, wholesale directory replacement, and the path
//! safety check shared with the extractor.

use crate::exclusion::ExclusionSet;
use crate::{CompressionError, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Counters reported by a tree copy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    /// Files copied
    pub files: u64,
    /// Directories created
    pub directories: u64,
    /// Bytes copied
    pub bytes: u64,
}

/// Recursively copy `source` into `destination`
///
/// `destination` is created if needed. Symlinks and excluded entries are
/// skipped. File contents are streamed by the OS copy routine.
///
/// # Errors
/// Returns `MissingSource` when `source` is not a directory and `IoError`
/// on any filesystem failure
pub fn copy_tree(
    source: &Path,
    destination: &Path,
    exclusions: &ExclusionSet,
) -> Result<CopyStats> {
    if !source.is_dir() {
        return Err(CompressionError::MissingSource(source.to_path_buf()));
    }

    std::fs::create_dir_all(destination)?;
    let mut stats = CopyStats::default();

    let walker = WalkDir::new(source)
        .follow_links(false)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| {
            let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
            !exclusions.is_excluded(entry.path(), relative)
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            CompressionError::internal(format!("Failed to walk {}: {e}", source.display()))
        })?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| CompressionError::internal(format!("Failed to get relative path: {e}")))?;
        let target = destination.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
            stats.directories += 1;
        } else if file_type.is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            stats.bytes += std::fs::copy(entry.path(), &target)?;
            stats.files += 1;
        }
    }

    Ok(stats)
}

/// Replace `target` wholesale with a copy of `source`
///
/// The copy lands in a hidden sibling first; only once it is complete is the
/// old tree removed and the copy renamed into place. A failed copy leaves
/// `target` untouched.
///
/// # Errors
/// Returns `MissingSource` when `source` is absent and `IoError` on any
/// filesystem failure
pub async fn replace_dir(source: PathBuf, target: PathBuf) -> Result<CopyStats> {
    tokio::task::spawn_blocking(move || replace_dir_sync(&source, &target)).await?
}

fn replace_dir_sync(source: &Path, target: &Path) -> Result<CopyStats> {
    let parent = target
        .parent()
        .ok_or_else(|| CompressionError::internal(format!("{} has no parent", target.display())))?;
    std::fs::create_dir_all(parent)?;

    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "media".to_string());
    let staging = parent.join(format!(".{name}.incoming-{}", uuid::Uuid::new_v4().simple()));

    let stats = match copy_tree(source, &staging, &ExclusionSet::new()) {
        Ok(stats) => stats,
        Err(e) => {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }
    };

    if target.exists() {
        if let Err(e) = std::fs::remove_dir_all(target) {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e.into());
        }
    }
    std::fs::rename(&staging, target)?;

    Ok(stats)
}

/// Validate that an archive entry name is a safe relative path
///
/// # Errors
/// Returns `UnsafePath` if the name contains:
/// - a `..` path component
/// - an absolute path marker or a drive prefix such as `C:`
/// - a null byte
pub fn validate_path_safety(path: &str) -> Result<()> {
    if path.contains('\0') {
        return Err(CompressionError::unsafe_path("path contains null byte"));
    }

    if path.starts_with('/') || path.starts_with('\\') || has_drive_prefix(path) {
        return Err(CompressionError::unsafe_path(format!("path must be relative: {path}")));
    }

    if path.split(['/', '\\']).any(|component| component == "..") {
        return Err(CompressionError::unsafe_path(format!(
            "path contains parent directory reference: {path}"
        )));
    }

    Ok(())
}

/// `C:` style prefix on the first component. Colons elsewhere are ordinary
/// file name characters on Unix.
fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
