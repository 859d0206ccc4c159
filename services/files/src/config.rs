use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::relay::RelayTransport;

/// Errors raised while validating a loaded configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Main configuration for the file service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Storage directories
    #[serde(default)]
    pub storage: StorageConfig,
    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Staging-to-store relay configuration
    #[serde(default)]
    pub relay: RelayConfig,
    /// Download streaming configuration
    #[serde(default)]
    pub download: DownloadConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port, 0 disables the Prometheus exporter
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// The two on-disk directories that make up the service state
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Permanent store, also served read-only under `api.public_prefix`
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
    /// Staging area for files awaiting relay
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    /// Create both directories on startup if missing
    #[serde(default = "default_true")]
    pub create_dirs: bool,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Request body limit for uploads in bytes (20MB default)
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Path prefix the permanent store is served under
    #[serde(default = "default_public_prefix")]
    pub public_prefix: String,
    /// Externally visible base URL, used for links in the spreadsheet export
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

/// Relay configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Permanent-store upload endpoint for the HTTP transports.
    /// Defaults to the service's own `/saveFile` over loopback.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Upper bound on a single relay submission, in seconds
    #[serde(default = "default_relay_timeout_secs")]
    pub timeout_secs: u64,
    /// Transport used when the caller does not pick one
    #[serde(default)]
    pub default_transport: RelayTransport,
}

/// Download streaming configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadConfig {
    /// Upper bound on a single chunk read while streaming, in seconds
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

// Default value functions
fn default_service_name() -> String {
    "file-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("static/files")
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    3008
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024 // 20MB
}

fn default_public_prefix() -> String {
    "/files".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:3008".to_string()
}

fn default_relay_timeout_secs() -> u64 {
    30
}

fn default_read_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "file-service")?
            .set_default("service.log_level", "info")?
            // Add config file if present
            .add_source(config::File::with_name("config/files").required(false))
            .add_source(config::File::with_name("/etc/files/files").required(false))
            // Override with environment variables
            // FILES__STORAGE__STORE_DIR -> storage.store_dir
            .add_source(
                config::Environment::with_prefix("FILES")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("api.cors_origins")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.store_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired("storage.store_dir".to_string()));
        }

        if self.storage.staging_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired(
                "storage.staging_dir".to_string(),
            ));
        }

        if self.storage.store_dir == self.storage.staging_dir {
            return Err(ConfigError::InvalidValue {
                key: "storage.staging_dir".to_string(),
                message: "must differ from storage.store_dir".to_string(),
            });
        }

        if self.api.max_upload_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "api.max_upload_bytes".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if !self.api.public_prefix.starts_with('/') || self.api.public_prefix.len() < 2 {
            return Err(ConfigError::InvalidValue {
                key: "api.public_prefix".to_string(),
                message: "must start with '/' and name a path".to_string(),
            });
        }

        Ok(())
    }

    /// Permanent-store upload URL the HTTP relay transports post to
    pub fn relay_endpoint(&self) -> String {
        self.relay
            .endpoint_url
            .clone()
            .unwrap_or_else(|| format!("http://127.0.0.1:{}/saveFile", self.api.port))
    }

    /// Get relay submission timeout as Duration
    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay.timeout_secs)
    }

    /// Get per-chunk download read timeout as Duration
    pub fn download_read_timeout(&self) -> Duration {
        Duration::from_secs(self.download.read_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            staging_dir: default_staging_dir(),
            create_dirs: default_true(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
            max_upload_bytes: default_max_upload_bytes(),
            public_prefix: default_public_prefix(),
            public_base_url: default_public_base_url(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            timeout_secs: default_relay_timeout_secs(),
            default_transport: RelayTransport::default(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: default_read_timeout_secs(),
        }
    }
}
