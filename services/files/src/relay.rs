//! Staging-to-store relay.
//!
//! A relay opens a staged file, submits it to the permanent-store upload
//! operation through a [`RelaySubmitter`], always deletes the staging copy
//! afterwards and hands the upload response back unchanged. The upload
//! operation owns the collision check, so a relay into a taken name is
//! answered with the same 409 body `/saveFile` would produce.

use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, instrument, warn};

use crate::directory::StorageArea;
use crate::error::{Result, StorageError};
use crate::response::render_upload;
use crate::store::{FileStore, RemoveOutcome};

/// How a staged file reaches the permanent-store upload operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayTransport {
    /// Call the upload operation in process
    #[default]
    Direct,
    /// POST to the upload endpoint with a streamed multipart body
    Fetch,
    /// POST to the upload endpoint with the file read into memory first
    #[serde(alias = "axios")]
    Buffered,
}

impl RelayTransport {
    /// Parse the `type` query parameter; unknown or missing values fall back
    /// to `default`.
    pub fn from_query(value: Option<&str>, default: RelayTransport) -> Self {
        match value {
            Some("direct") => RelayTransport::Direct,
            Some("fetch") => RelayTransport::Fetch,
            Some("buffered") | Some("axios") => RelayTransport::Buffered,
            _ => default,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelayTransport::Direct => "direct",
            RelayTransport::Fetch => "fetch",
            RelayTransport::Buffered => "buffered",
        }
    }
}

impl fmt::Display for RelayTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open staging file handed to a submitter. The handle is closed when the
/// value is dropped.
#[derive(Debug)]
pub struct StagedFile {
    pub name: String,
    pub path: PathBuf,
    pub file: File,
    pub size_bytes: u64,
}

/// Upload response forwarded to the relay caller as-is
#[derive(Debug, Clone, PartialEq)]
pub struct RelayResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Submits a staged file to the permanent-store upload operation.
///
/// `Err` means the submission itself failed (transport error). Rejections
/// by the upload operation are `Ok` responses with a non-2xx status.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RelaySubmitter: Send + Sync {
    async fn submit(&self, staged: StagedFile) -> Result<RelayResponse>;
}

/// Writes into the permanent store through [`FileStore::write_new`]
pub struct InProcessSubmitter {
    store: Arc<FileStore>,
}

impl InProcessSubmitter {
    pub fn new(store: Arc<FileStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RelaySubmitter for InProcessSubmitter {
    async fn submit(&self, staged: StagedFile) -> Result<RelayResponse> {
        let result = self
            .store
            .write_new(StorageArea::Store, &staged.name, staged.file)
            .await;

        let (status, body) = render_upload(&result).map_err(|e| StorageError::Relay {
            name: staged.name.clone(),
            message: format!("failed to encode upload response: {e}"),
        })?;

        Ok(RelayResponse {
            status,
            content_type: Some("application/json".to_string()),
            body: Bytes::from(body),
        })
    }
}

/// Multipart body construction for [`HttpSubmitter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    Streamed,
    Buffered,
}

/// Posts the staged file as multipart field `file` to an upload endpoint
pub struct HttpSubmitter {
    client: reqwest::Client,
    endpoint: String,
    mode: BodyMode,
}

impl HttpSubmitter {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, mode: BodyMode) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            mode,
        }
    }

    async fn build_part(&self, staged: StagedFile) -> Result<Part> {
        let StagedFile {
            name,
            path,
            mut file,
            size_bytes,
        } = staged;

        let part = match self.mode {
            BodyMode::Streamed => {
                let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
                Part::stream_with_length(body, size_bytes)
            }
            BodyMode::Buffered => {
                let mut buf = Vec::with_capacity(usize::try_from(size_bytes).unwrap_or(0));
                file.read_to_end(&mut buf)
                    .await
                    .map_err(|source| StorageError::Io { path, source })?;
                Part::bytes(buf)
            }
        };

        Ok(part.file_name(name))
    }
}

#[async_trait]
impl RelaySubmitter for HttpSubmitter {
    async fn submit(&self, staged: StagedFile) -> Result<RelayResponse> {
        let name = staged.name.clone();
        let relay_err = |message: String| StorageError::Relay {
            name: name.clone(),
            message,
        };

        let form = Form::new().part("file", self.build_part(staged).await?);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| relay_err(format!("request to {} failed: {e}", self.endpoint)))?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .map_err(|e| relay_err(format!("invalid upstream status: {e}")))?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| relay_err(format!("failed to read upstream response: {e}")))?;

        debug!(status = %status, endpoint = %self.endpoint, "Upstream upload answered");

        Ok(RelayResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Moves staged files into the permanent store
pub struct Relay {
    store: Arc<FileStore>,
    direct: Arc<dyn RelaySubmitter>,
    streamed: Arc<dyn RelaySubmitter>,
    buffered: Arc<dyn RelaySubmitter>,
    timeout: Duration,
}

impl Relay {
    /// Relay with the in-process transport plus both HTTP transports posting
    /// to `endpoint`.
    pub fn new(
        store: Arc<FileStore>,
        client: reqwest::Client,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let endpoint = endpoint.into();
        Self::with_submitters(
            store.clone(),
            Arc::new(InProcessSubmitter::new(store)),
            Arc::new(HttpSubmitter::new(
                client.clone(),
                endpoint.clone(),
                BodyMode::Streamed,
            )),
            Arc::new(HttpSubmitter::new(client, endpoint, BodyMode::Buffered)),
            timeout,
        )
    }

    pub fn with_submitters(
        store: Arc<FileStore>,
        direct: Arc<dyn RelaySubmitter>,
        streamed: Arc<dyn RelaySubmitter>,
        buffered: Arc<dyn RelaySubmitter>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            direct,
            streamed,
            buffered,
            timeout,
        }
    }

    fn submitter(&self, transport: RelayTransport) -> &dyn RelaySubmitter {
        match transport {
            RelayTransport::Direct => self.direct.as_ref(),
            RelayTransport::Fetch => self.streamed.as_ref(),
            RelayTransport::Buffered => self.buffered.as_ref(),
        }
    }

    /// Relay staged `name` into the permanent store.
    ///
    /// Fails with [`StorageError::NotFound`] when nothing is staged under
    /// `name`; in that case nothing is submitted. Once the file is open the
    /// staging copy is deleted whatever the submission outcome, and a
    /// cleanup failure is only logged.
    #[instrument(skip(self, transport), fields(transport = %transport))]
    pub async fn relay(&self, name: &str, transport: RelayTransport) -> Result<RelayResponse> {
        let (file, size_bytes) = self.store.open(StorageArea::Staging, name).await?;
        let staged = StagedFile {
            name: name.to_string(),
            path: self.store.directory(StorageArea::Staging).resolve_path(name),
            file,
            size_bytes,
        };

        // The staged handle is owned by the submission future and closed
        // before cleanup, including on timeout.
        let outcome =
            match tokio::time::timeout(self.timeout, self.submitter(transport).submit(staged))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(StorageError::Relay {
                    name: name.to_string(),
                    message: format!("timed out after {:?}", self.timeout),
                }),
            };

        self.cleanup(name).await;

        match &outcome {
            Ok(response) => {
                metrics::counter!("files.relays", "transport" => transport.as_str()).increment(1);
                info!(
                    name = %name,
                    size_bytes,
                    status = %response.status,
                    "Relayed staged file"
                );
            }
            Err(e) => {
                metrics::counter!("files.relay_failures", "transport" => transport.as_str())
                    .increment(1);
                warn!(name = %name, error = %e, "Relay failed");
            }
        }

        outcome
    }

    async fn cleanup(&self, name: &str) {
        match self.store.remove(StorageArea::Staging, name).await {
            Ok(RemoveOutcome::Removed) => debug!(name = %name, "Staging copy removed"),
            Ok(RemoveOutcome::Absent) => {
                warn!(name = %name, "Staging copy already gone at cleanup")
            }
            Err(e) => {
                metrics::counter!("files.cleanup_failures").increment(1);
                warn!(name = %name, error = %e, "Failed to remove staging copy");
            }
        }
    }
}
