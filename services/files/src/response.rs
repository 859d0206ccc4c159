//! JSON envelope shared by every endpoint: `{code, message, data}`.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::store::WrittenFile;

/// Response envelope. `code` mirrors the HTTP status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            message: message.into(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code: status.as_u16(),
            message: message.into(),
            data: None,
        }
    }
}

/// Payload of a successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadData {
    pub path: String,
}

/// Payload of a staging delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveData {
    pub removed: bool,
}

pub fn upload_success(written: &WrittenFile) -> ApiResponse<UploadData> {
    ApiResponse::success(
        "success",
        UploadData {
            path: written.path.display().to_string(),
        },
    )
}

/// Status and serialized body of an upload outcome, exactly as the
/// `saveFile` endpoint renders it.
pub fn render_upload(
    result: &Result<WrittenFile, StorageError>,
) -> Result<(StatusCode, Vec<u8>), serde_json::Error> {
    match result {
        Ok(written) => Ok((StatusCode::OK, serde_json::to_vec(&upload_success(written))?)),
        Err(e) => {
            let status = e.status_code();
            let body = serde_json::to_vec(&ApiResponse::error(status, e.client_message()))?;
            Ok((status, body))
        }
    }
}
