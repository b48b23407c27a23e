//! Exclusion rules applied while walking a source tree

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

/// Directory or file names, plus absolute paths, skipped during a walk
///
/// A name matches any path component, so `node_modules` excludes every
/// `node_modules` directory at any depth.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionSet {
    #[serde(default)]
    names: BTreeSet<String>,
    #[serde(default)]
    paths: Vec<PathBuf>,
}

impl ExclusionSet {
    /// Empty set: nothing is excluded
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusions for an application source tree
    ///
    /// Covers dependency caches, VCS metadata, build output and scratch trees
    /// left behind by earlier snapshot runs.
    #[must_use]
    pub fn source_tree_defaults() -> Self {
        [
            "node_modules",
            ".git",
            ".svn",
            ".hg",
            "target",
            "dist",
            "build",
            ".next",
            ".cache",
            "__pycache__",
            ".venv",
            "tmp",
            "temp",
            "backups",
            ".strongbox-tmp",
        ]
        .into_iter()
        .fold(Self::new(), Self::with_name)
    }

    /// Exclude every path component with this name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.names.insert(name.into());
        self
    }

    /// Exclude a path and everything below it
    ///
    /// Existing paths are canonicalized so they compare equal to walked paths.
    #[must_use]
    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
        self
    }

    /// Merge another set into this one
    #[must_use]
    pub fn union(mut self, other: &ExclusionSet) -> Self {
        self.names.extend(other.names.iter().cloned());
        for path in &other.paths {
            if !self.paths.contains(path) {
                self.paths.push(path.clone());
            }
        }
        self
    }

    /// Excluded names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Whether a walked entry is excluded
    ///
    /// `path` is the absolute walked path, `relative` the same path relative
    /// to the walk root.
    #[must_use]
    pub fn is_excluded(&self, path: &Path, relative: &Path) -> bool {
        let name_match = relative.components().any(|component| match component {
            Component::Normal(name) => self.names.contains(name.to_string_lossy().as_ref()),
            _ => false,
        });
        name_match || self.paths.iter().any(|excluded| path.starts_with(excluded))
    }
}
