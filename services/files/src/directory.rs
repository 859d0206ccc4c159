//! Storage directory abstraction.
//!
//! The service state is two plain directories: the permanent store and the
//! staging area. A [`Directory`] enumerates one of them and resolves names
//! inside it; [`validate_name`] keeps every resolved path inside its root.

use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Result, StorageError};

/// Longest file name accepted, in bytes
pub const MAX_NAME_BYTES: usize = 255;

/// Which of the two directories an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageArea {
    /// Permanent, externally listable store
    Store,
    /// Temporary staging area
    Staging,
}

impl StorageArea {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageArea::Store => "store",
            StorageArea::Staging => "staging",
        }
    }
}

impl fmt::Display for StorageArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageArea::Store => f.write_str("permanent store"),
            StorageArea::Staging => f.write_str("staging area"),
        }
    }
}

/// One storage directory on local disk
#[derive(Debug, Clone)]
pub struct Directory {
    area: StorageArea,
    root: PathBuf,
}

impl Directory {
    pub fn new(area: StorageArea, root: impl Into<PathBuf>) -> Self {
        Self {
            area,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join `name` onto the directory root. No existence check.
    pub fn resolve_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Names of the regular files currently in the directory, in
    /// enumeration order.
    pub async fn list_names(&self) -> Result<Vec<String>> {
        let io_err = |source| StorageError::Io {
            path: self.root.clone(),
            source,
        };

        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(io_err)?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let file_type = match entry.file_type().await {
                Ok(file_type) => file_type,
                // Entry removed between enumeration and stat
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_err(e)),
            };
            if !file_type.is_file() {
                continue;
            }

            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => {
                    warn!(area = %self.area, name = ?raw, "Skipping non UTF-8 file name");
                }
            }
        }

        debug!(area = %self.area, count = names.len(), "Listed directory");
        Ok(names)
    }

    /// Create the directory (and parents) if it does not exist
    pub async fn ensure_exists(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| StorageError::Io {
                path: self.root.clone(),
                source,
            })
    }

    /// Replace the root with its canonical absolute form
    pub async fn canonicalize(self) -> Result<Self> {
        let root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|source| StorageError::Io {
                path: self.root.clone(),
                source,
            })?;
        Ok(Self { root, ..self })
    }
}

/// Reject names that are empty, too long, or could escape the directory
/// root.
pub fn validate_name(name: &str) -> Result<&str> {
    let invalid = |reason| StorageError::InvalidName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > MAX_NAME_BYTES {
        return Err(invalid("name is longer than 255 bytes"));
    }
    if name == "." || name == ".." {
        return Err(invalid("name refers to a directory"));
    }
    if name.contains(['/', '\\']) {
        return Err(invalid("name contains a path separator"));
    }
    if name.contains('\0') {
        return Err(invalid("name contains a NUL byte"));
    }

    Ok(name)
}
