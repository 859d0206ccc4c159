use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::directory::StorageArea;
use crate::error::Result;
use crate::store::FileStore;

/// Extensions classified as images. Matching is case-sensitive.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "png", "jpeg"];

/// Derived kind of a stored file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    File,
}

impl FileKind {
    /// Classify by the text after the last `.` of the name
    pub fn classify(name: &str) -> Self {
        match name.rsplit_once('.') {
            Some((_, ext)) if IMAGE_EXTENSIONS.contains(&ext) => FileKind::Image,
            _ => FileKind::File,
        }
    }

    /// Human-readable label used in the spreadsheet export
    pub fn label(&self) -> &'static str {
        match self {
            FileKind::Image => "Image",
            FileKind::File => "File",
        }
    }
}

/// One permanent-store file as reported by `/list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub filename: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
}

impl InventoryEntry {
    pub fn new(filename: String) -> Self {
        let kind = FileKind::classify(&filename);
        Self { filename, kind }
    }
}

/// Every file currently in the permanent store, in enumeration order
#[instrument(skip(store))]
pub async fn list_inventory(store: &FileStore) -> Result<Vec<InventoryEntry>> {
    let names = store.list_names(StorageArea::Store).await?;
    Ok(names.into_iter().map(InventoryEntry::new).collect())
}
