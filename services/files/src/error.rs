use axum::http::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

use crate::directory::StorageArea;

/// Errors raised by the storage core
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{area} already contains a file named {name:?}")]
    NameCollision { area: StorageArea, name: String },

    #[error("{name:?} not found in {area}")]
    NotFound { area: StorageArea, name: String },

    #[error("Invalid file name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Relay of {name:?} failed: {message}")]
    Relay { name: String, message: String },
}

impl StorageError {
    /// HTTP status the error is reported with
    pub fn status_code(&self) -> StatusCode {
        match self {
            StorageError::NameCollision { .. } => StatusCode::CONFLICT,
            StorageError::NotFound { .. } => StatusCode::NOT_FOUND,
            StorageError::InvalidName { .. } => StatusCode::BAD_REQUEST,
            StorageError::Write { .. } | StorageError::Io { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            StorageError::Relay { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Message placed in the JSON error body.
    ///
    /// Disk errors are reported without the server-side path.
    pub fn client_message(&self) -> String {
        match self {
            StorageError::NameCollision { area, name } => match area {
                StorageArea::Store => {
                    format!("a file with the same name already exists: {name}")
                }
                StorageArea::Staging => format!("duplicate image: {name}"),
            },
            StorageError::NotFound { name, .. } => format!("file not found: {name}"),
            StorageError::InvalidName { .. } | StorageError::Relay { .. } => self.to_string(),
            StorageError::Write { .. } => "failed to write file".to_string(),
            StorageError::Io { source, .. } => format!("storage I/O error: {source}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
