//! Nier File Service
//!
//! Small HTTP service that keeps uploaded files in two local directories: a
//! staging area for files awaiting review and a permanent store that is
//! listed, downloaded, exported as a spreadsheet and served statically.
//!
//! ## Features
//!
//! - **Collision-safe uploads**: names are unique per directory; the check and
//!   the write are a single exclusive-create open
//! - **Relay**: moves a staged file into the permanent store through the same
//!   upload operation `/saveFile` uses, in process or over loopback HTTP, and
//!   always cleans up the staging copy
//! - **Inventory**: permanent-store listing with image/file classification and
//!   an xlsx export
//!
//! ## Architecture
//!
//! ```text
//!  /uploadFile          /nodeUploadFile             /saveFile
//! ┌──────────────┐     ┌──────────────┐          ┌──────────────┐
//! │ Staging      │────▶│ Relay        │─────────▶│ Permanent    │
//! │ (uploads/)   │     │ direct|fetch │          │ store        │
//! └──────────────┘     │ |buffered    │          │ (static/     │
//!        ▲             └──────────────┘          │  files/)     │
//!        │                    │                  └──────────────┘
//!   /deleteFile               │ cleanup                 │
//!                             ▼                         ▼
//!                      staging copy removed     /list /downloadFile
//!                                               /downloadExcel /files/*
//! ```

pub mod api;
pub mod config;
pub mod directory;
pub mod encoding;
pub mod error;
pub mod export;
pub mod inventory;
pub mod relay;
pub mod response;
pub mod store;

pub use api::{create_router, start_api_server, ApiError, ApiSettings, AppState};
pub use config::Config;
pub use directory::{validate_name, Directory, StorageArea};
pub use error::StorageError;
pub use inventory::{list_inventory, FileKind, InventoryEntry};
pub use relay::{Relay, RelayResponse, RelaySubmitter, RelayTransport};
pub use response::{ApiResponse, RemoveData, UploadData};
pub use store::{FileStore, RemoveOutcome, WrittenFile};
