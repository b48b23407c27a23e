//! Streaming zip archiver over one or more directory trees

use crate::exclusion::ExclusionSet;
use crate::{CompressionError, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// First four bytes of every zip produced by [`Archiver`]
///
/// Every non-empty archive starts with a local file header. Sources with a
/// prefix always write their root directory entry, so such archives are
/// never empty.
pub const ZIP_LOCAL_HEADER_MAGIC: [u8; 4] = *b"PK\x03\x04";

/// A directory tree placed under a prefix inside the container
#[derive(Debug, Clone)]
pub struct ArchiveSource {
    /// Directory on disk to walk
    pub root: PathBuf,
    /// Entry name prefix inside the container, `/`-separated, no trailing slash
    pub prefix: String,
    /// Entries skipped during the walk
    pub exclusions: ExclusionSet,
    /// Skip with a warning instead of failing when `root` is missing
    pub optional: bool,
}

impl ArchiveSource {
    /// Archive `root` under `prefix`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into().trim_matches('/').to_string(),
            exclusions: ExclusionSet::new(),
            optional: false,
        }
    }

    /// Apply an exclusion set to this source
    #[must_use]
    pub fn with_exclusions(mut self, exclusions: ExclusionSet) -> Self {
        self.exclusions = exclusions;
        self
    }

    /// Mark the source as optional
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Counters reported by a finished archive run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    /// Regular files written
    pub files: u64,
    /// Directory entries written
    pub directories: u64,
    /// Uncompressed bytes written
    pub bytes: u64,
    /// Symlinks, special files and entries whose names are not valid UTF-8
    pub skipped: u64,
}

/// Packs directory trees into a single zip container
#[derive(Debug, Clone)]
pub struct Archiver {
    method: CompressionMethod,
}

impl Default for Archiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Archiver {
    /// Archiver using deflate compression
    #[must_use]
    pub fn new() -> Self {
        Self {
            method: CompressionMethod::Deflated,
        }
    }

    /// Archiver that stores entries without compression
    #[must_use]
    pub fn stored() -> Self {
        Self {
            method: CompressionMethod::Stored,
        }
    }

    /// Archive `sources` into `destination` on the blocking thread pool
    ///
    /// # Errors
    /// See [`Archiver::archive_sync`]
    pub async fn archive(
        &self,
        sources: Vec<ArchiveSource>,
        destination: PathBuf,
    ) -> Result<ArchiveStats> {
        let archiver = self.clone();
        tokio::task::spawn_blocking(move || archiver.archive_sync(&sources, &destination)).await?
    }

    /// Archive `sources` into a new zip file at `destination`
    ///
    /// The destination itself is never archived, even when it lives inside
    /// one of the source trees.
    ///
    /// # Errors
    /// Returns `MissingSource` for an absent non-optional root,
    /// `CompressionFailed` on zip errors and `IoError` on read/write failure
    pub fn archive_sync(
        &self,
        sources: &[ArchiveSource],
        destination: &Path,
    ) -> Result<ArchiveStats> {
        let file = File::create(destination)?;
        let destination = std::fs::canonicalize(destination)?;
        let mut zip = ZipWriter::new(BufWriter::new(file));
        let mut stats = ArchiveStats::default();

        for source in sources {
            if !source.root.is_dir() {
                if source.optional {
                    log::warn!(
                        "Optional archive source {} is missing, skipping",
                        source.root.display()
                    );
                    continue;
                }
                return Err(CompressionError::MissingSource(source.root.clone()));
            }
            self.add_source(&mut zip, source, &destination, &mut stats)?;
        }

        let mut inner = zip.finish().map_err(|e| {
            CompressionError::compression_failed(format!("Failed to finish ZIP archive: {e}"))
        })?;
        inner.flush()?;

        log::debug!(
            "Archived {} files, {} directories, {} bytes ({} skipped)",
            stats.files,
            stats.directories,
            stats.bytes,
            stats.skipped
        );
        Ok(stats)
    }

    fn add_source<W: Write + std::io::Seek>(
        &self,
        zip: &mut ZipWriter<W>,
        source: &ArchiveSource,
        destination: &Path,
        stats: &mut ArchiveStats,
    ) -> Result<()> {
        let root = std::fs::canonicalize(&source.root)?;
        let dir_options = SimpleFileOptions::default();

        if !source.prefix.is_empty() {
            zip.add_directory(format!("{}/", source.prefix), dir_options)
                .map_err(|e| {
                    CompressionError::compression_failed(format!(
                        "Failed to add directory '{}': {e}",
                        source.prefix
                    ))
                })?;
            stats.directories += 1;
        }

        let mut walker = WalkDir::new(&root)
            .follow_links(false)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let relative = entry.path().strip_prefix(&root).unwrap_or(entry.path());
                let excluded = source.exclusions.is_excluded(entry.path(), relative)
                    || entry.path() == destination;
                if excluded {
                    log::trace!("Excluded from archive: {}", relative.display());
                }
                !excluded
            });

        while let Some(entry) = walker.next() {
            let entry = entry.map_err(|e| {
                CompressionError::compression_failed(format!("Failed to walk directory: {e}"))
            })?;
            let relative = entry.path().strip_prefix(&root).map_err(|e| {
                CompressionError::internal(format!("Failed to get relative path: {e}"))
            })?;
            let file_type = entry.file_type();
            let Some(name) = entry_name(&source.prefix, relative) else {
                log::warn!("Skipping {}: name is not valid UTF-8", entry.path().display());
                stats.skipped += 1;
                if file_type.is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            };

            if file_type.is_symlink() {
                log::debug!("Skipping symlink {}", entry.path().display());
                stats.skipped += 1;
            } else if file_type.is_dir() {
                zip.add_directory(format!("{name}/"), dir_options)
                    .map_err(|e| {
                        CompressionError::compression_failed(format!(
                            "Failed to add directory '{name}': {e}"
                        ))
                    })?;
                stats.directories += 1;
            } else if file_type.is_file() {
                let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
                let options = SimpleFileOptions::default()
                    .compression_method(self.method)
                    .large_file(len >= u64::from(u32::MAX));
                zip.start_file(name.as_str(), options).map_err(|e| {
                    CompressionError::compression_failed(format!(
                        "Failed to start ZIP file '{name}': {e}"
                    ))
                })?;
                let mut input = File::open(entry.path())?;
                stats.bytes += std::io::copy(&mut input, zip)?;
                stats.files += 1;
            } else {
                stats.skipped += 1;
            }
        }

        Ok(())
    }
}

/// Build a portable `/`-separated entry name, or `None` when a component
/// is not valid UTF-8 and could not be stored faithfully
fn entry_name(prefix: &str, relative: &Path) -> Option<String> {
    let mut name = String::from(prefix);
    for component in relative.components() {
        if let Component::Normal(part) = component {
            if !name.is_empty() {
                name.push('/');
            }
            name.push_str(part.to_str()?);
        }
    }
    Some(name)
}
