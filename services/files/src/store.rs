use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

use crate::config::StorageConfig;
use crate::directory::{validate_name, Directory, StorageArea};
use crate::error::{Result, StorageError};

/// A file newly written by [`FileStore::write_new`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Result of a removal that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    /// Nothing to remove
    Absent,
}

/// Removes a newly created file when dropped, unless committed. Covers
/// both write errors and the write future being dropped mid-copy.
struct PartialFile {
    path: PathBuf,
    committed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Drop cannot await
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                metrics::counter!("files.partial_writes_removed").increment(1);
                debug!(path = %self.path.display(), "Removed partial file");
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "Failed to remove partial file");
            }
        }
    }
}

/// The permanent store and the staging area, addressed by [`StorageArea`]
#[derive(Debug, Clone)]
pub struct FileStore {
    store: Directory,
    staging: Directory,
}

impl FileStore {
    pub fn new(store_dir: impl Into<PathBuf>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            store: Directory::new(StorageArea::Store, store_dir),
            staging: Directory::new(StorageArea::Staging, staging_dir),
        }
    }

    /// Build the store from configuration, creating the directories when
    /// configured to and resolving both roots to absolute paths.
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        let store = Directory::new(StorageArea::Store, &config.store_dir);
        let staging = Directory::new(StorageArea::Staging, &config.staging_dir);

        if config.create_dirs {
            store.ensure_exists().await?;
            staging.ensure_exists().await?;
        }

        let store = store.canonicalize().await?;
        let staging = staging.canonicalize().await?;

        info!(
            store_dir = %store.root().display(),
            staging_dir = %staging.root().display(),
            "File store initialized"
        );

        Ok(Self { store, staging })
    }

    pub fn directory(&self, area: StorageArea) -> &Directory {
        match area {
            StorageArea::Store => &self.store,
            StorageArea::Staging => &self.staging,
        }
    }

    pub async fn list_names(&self, area: StorageArea) -> Result<Vec<String>> {
        self.directory(area).list_names().await
    }

    /// Write `data` under `name`, refusing to replace an existing file.
    ///
    /// The target is opened with `create_new`, so the collision check and the
    /// creation are one filesystem operation: of several concurrent writers
    /// for one name exactly one gets the file, the rest get
    /// [`StorageError::NameCollision`]. A failed or cancelled write removes
    /// the partial file.
    #[instrument(skip(self, area, data), fields(area = %area))]
    pub async fn write_new<R>(
        &self,
        area: StorageArea,
        name: &str,
        mut data: R,
    ) -> Result<WrittenFile>
    where
        R: AsyncRead + Unpin,
    {
        let name = validate_name(name)?;
        let path = self.directory(area).resolve_path(name);

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                metrics::counter!("files.upload_collisions", "area" => area.as_str())
                    .increment(1);
                debug!(name = %name, "Rejected upload, name already taken");
                return Err(StorageError::NameCollision {
                    area,
                    name: name.to_string(),
                });
            }
            Err(source) => return Err(StorageError::Write { path, source }),
        };
        let partial = PartialFile::new(path.clone());

        let written = async {
            let size = tokio::io::copy(&mut data, &mut file).await?;
            file.flush().await?;
            Ok::<_, std::io::Error>(size)
        }
        .await;

        match written {
            Ok(size_bytes) => {
                partial.commit();
                metrics::counter!("files.uploads", "area" => area.as_str()).increment(1);
                info!(name = %name, size_bytes, "File written");
                Ok(WrittenFile { path, size_bytes })
            }
            Err(source) => Err(StorageError::Write { path, source }),
        }
    }

    /// Open an existing regular file for reading, returning it with its
    /// length in bytes.
    #[instrument(skip(self, area), fields(area = %area))]
    pub async fn open(&self, area: StorageArea, name: &str) -> Result<(File, u64)> {
        let name = validate_name(name)?;
        let path = self.directory(area).resolve_path(name);
        let not_found = || StorageError::NotFound {
            area,
            name: name.to_string(),
        };

        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found()),
            Err(source) => return Err(StorageError::Io { path, source }),
        };

        let metadata = file
            .metadata()
            .await
            .map_err(|source| StorageError::Io {
                path: path.clone(),
                source,
            })?;
        if !metadata.is_file() {
            return Err(not_found());
        }

        Ok((file, metadata.len()))
    }

    /// Delete `name`. A missing file is reported as
    /// [`RemoveOutcome::Absent`], not as an error.
    #[instrument(skip(self, area), fields(area = %area))]
    pub async fn remove(&self, area: StorageArea, name: &str) -> Result<RemoveOutcome> {
        let name = validate_name(name)?;
        let path = self.directory(area).resolve_path(name);

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(name = %name, "File removed");
                Ok(RemoveOutcome::Removed)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(RemoveOutcome::Absent),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }
}
