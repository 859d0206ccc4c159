use rust_xlsxwriter::{Format, Workbook, XlsxError};
use thiserror::Error;
use tracing::debug;

use crate::encoding::encode_component;
use crate::inventory::InventoryEntry;

/// File name offered for the downloaded workbook
pub const EXPORT_FILE_NAME: &str = "inventory.xlsx";

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const SHEET_NAMES: [&str; 2] = ["Sheet1", "Sheet2"];
const HEADER: [&str; 3] = ["File name", "File type", "File URL"];

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to build workbook: {0}")]
    Workbook(#[from] XlsxError),

    #[error("Inventory of {0} files does not fit in a worksheet")]
    TooManyRows(usize),
}

/// Public URL of a permanent-store file as served by the static route
pub fn public_url(base_url: &str, prefix: &str, name: &str) -> String {
    format!(
        "{}/{}/{}",
        base_url.trim_end_matches('/'),
        prefix.trim_matches('/'),
        encode_component(name)
    )
}

/// Build the inventory workbook: two identical sheets with a header row and
/// one row per file (name, kind label, public URL).
pub fn build_workbook(
    entries: &[InventoryEntry],
    base_url: &str,
    prefix: &str,
) -> Result<Vec<u8>, ExportError> {
    // Header plus one row per entry must fit in u32 row numbers
    let last_row =
        u32::try_from(entries.len()).map_err(|_| ExportError::TooManyRows(entries.len()))?;

    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();

    for sheet_name in SHEET_NAMES {
        let sheet = workbook.add_worksheet();
        sheet.set_name(sheet_name)?;

        for (col, title) in (0u16..).zip(HEADER) {
            sheet.write_string_with_format(0, col, title, &bold)?;
        }

        for (row, entry) in (1..=last_row).zip(entries) {
            sheet.write_string(row, 0, entry.filename.as_str())?;
            sheet.write_string(row, 1, entry.kind.label())?;
            sheet.write_string(row, 2, &public_url(base_url, prefix, &entry.filename))?;
        }

        sheet.set_column_width(0, 32.0)?;
        sheet.set_column_width(2, 64.0)?;
    }

    let buffer = workbook.save_to_buffer()?;
    debug!(rows = entries.len(), bytes = buffer.len(), "Built inventory workbook");
    Ok(buffer)
}
