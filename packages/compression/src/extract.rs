//! Path-safe zip extraction

use crate::fs_utils::validate_path_safety;
use crate::{CompressionError, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// Counters reported by a finished extraction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    /// Regular files written
    pub files: u64,
    /// Directories created from explicit entries
    pub directories: u64,
    /// Uncompressed bytes written
    pub bytes: u64,
}

/// Inflates a zip container into a target directory
///
/// Entry names are checked independently of any validation the archive
/// went through upstream: a single entry that would land outside the target
/// rejects the whole extraction.
#[derive(Debug, Clone, Copy, Default)]
pub struct Extractor;

impl Extractor {
    /// Extract on the blocking thread pool
    ///
    /// # Errors
    /// See [`Extractor::extract_sync`]
    pub async fn extract(archive: PathBuf, target: PathBuf) -> Result<ExtractStats> {
        tokio::task::spawn_blocking(move || Self::extract_sync(&archive, &target)).await?
    }

    /// Extract every entry of `archive` below `target`
    ///
    /// # Errors
    /// Returns `UnsafePath` for traversal, absolute or symlink entries,
    /// `DecompressionFailed` for unreadable archives and `IoError` on write
    /// failure
    pub fn extract_sync(archive: &Path, target: &Path) -> Result<ExtractStats> {
        let reader = BufReader::new(File::open(archive)?);
        let mut zip = ZipArchive::new(reader).map_err(|e| {
            CompressionError::decompression_failed(format!("Failed to read ZIP archive: {e}"))
        })?;

        std::fs::create_dir_all(target)?;
        let target = std::fs::canonicalize(target)?;
        let mut stats = ExtractStats::default();

        for i in 0..zip.len() {
            let mut entry = zip.by_index(i).map_err(|e| {
                CompressionError::decompression_failed(format!(
                    "Failed to access ZIP entry {i}: {e}"
                ))
            })?;

            let raw_name = entry.name().to_string();
            validate_path_safety(&raw_name)?;
            let relative = entry
                .enclosed_name()
                .ok_or_else(|| CompressionError::unsafe_path(&raw_name))?;
            let output = target.join(&relative);
            if !output.starts_with(&target) {
                return Err(CompressionError::unsafe_path(&raw_name));
            }
            if entry.is_symlink() {
                return Err(CompressionError::unsafe_path(format!(
                    "symbolic link entry: {raw_name}"
                )));
            }

            if entry.is_dir() {
                std::fs::create_dir_all(&output)?;
                stats.directories += 1;
                continue;
            }

            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut writer = BufWriter::new(File::create(&output)?);
            stats.bytes += std::io::copy(&mut entry, &mut writer).map_err(|e| {
                CompressionError::decompression_failed(format!(
                    "Failed to read ZIP file '{raw_name}': {e}"
                ))
            })?;
            writer.flush()?;
            stats.files += 1;
        }

        log::debug!(
            "Extracted {} files, {} directories, {} bytes into {}",
            stats.files,
            stats.directories,
            stats.bytes,
            target.display()
        );
        Ok(stats)
    }
}
