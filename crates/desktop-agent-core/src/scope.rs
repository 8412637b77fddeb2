//! Authorized-directory allow-list.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Scope error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("Folder path must be absolute: {0}")]
    NotAbsolute(String),
    #[error("Folder path is empty")]
    Empty,
}

/// Ordered, de-duplicated set of absolute directory paths.
///
/// Insertion order is kept for display. Paths are stored in lexically
/// normalized form (no `.`/`..` components, no trailing separator), so
/// uniqueness is string equality on the normalized path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopedFolderSet {
    folders: Vec<String>,
}

impl ScopedFolderSet {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            folders: Vec::new(),
        }
    }

    /// Build a set from a list, dropping duplicates.
    ///
    /// # Errors
    /// Fails on the first path that is empty or relative; nothing is kept.
    pub fn from_paths<I, S>(paths: I) -> Result<Self, ScopeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for path in paths {
            set.add(path.as_ref())?;
        }
        Ok(set)
    }

    /// Append `path` unless an equal normalized path is already present.
    ///
    /// Returns `true` if the set changed.
    ///
    /// # Errors
    /// Returns an error if the path is empty or relative.
    pub fn add(&mut self, path: &str) -> Result<bool, ScopeError> {
        let normalized = normalize(path)?;
        if self.folders.iter().any(|f| *f == normalized) {
            return Ok(false);
        }
        self.folders.push(normalized);
        Ok(true)
    }

    /// Remove the folder at `index` (display order).
    pub fn remove(&mut self, index: usize) -> Option<String> {
        (index < self.folders.len()).then(|| self.folders.remove(index))
    }

    #[must_use]
    pub fn paths(&self) -> &[String] {
        &self.folders
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        self.folders.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.folders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    /// Whether `path` lies inside one of the folders.
    ///
    /// Purely lexical: no filesystem access, symlinks are not resolved.
    /// Executors must canonicalize before asking if they follow links.
    #[must_use]
    pub fn is_authorized(&self, path: &str) -> bool {
        let Ok(target) = normalize(path) else {
            return false;
        };
        let target = Path::new(&target);
        self.folders
            .iter()
            .any(|folder| target.starts_with(Path::new(folder)))
    }
}

/// Lexically normalize an absolute path.
///
/// # Errors
/// Returns an error if the path is empty or relative.
pub fn normalize(path: &str) -> Result<String, ScopeError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(ScopeError::Empty);
    }
    let raw = Path::new(trimmed);
    if !raw.is_absolute() {
        return Err(ScopeError::NotAbsolute(trimmed.to_string()));
    }

    let mut out = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // `pop` refuses to go above the root.
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out.to_string_lossy().into_owned())
}
