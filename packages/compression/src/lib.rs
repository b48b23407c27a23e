//! Directory archiving for strongbox snapshots
//!
//! Packs one or more directory trees into a single zip container and
//! unpacks it again. Files are streamed entry by entry, so memory use does
//! not depend on the size of the tree.

pub mod archive;
pub mod error;
pub mod exclusion;
pub mod extract;
pub mod fs_utils;

// Re-export error types
pub use error::{CompressionError, Result};

pub use archive::{ArchiveSource, ArchiveStats, Archiver, ZIP_LOCAL_HEADER_MAGIC};
pub use exclusion::ExclusionSet;
pub use extract::{ExtractStats, Extractor};
pub use fs_utils::{CopyStats, copy_tree, replace_dir, validate_path_safety};
