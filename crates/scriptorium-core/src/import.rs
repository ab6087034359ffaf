//! Bulk manuscript import from a tabular sheet.
//!
//! The sheet's header row names the columns. Headers are checked once up
//! front; after that every data row is validated and persisted on its own,
//! strictly in order, and each produces a [`RowOutcome`]. A bad row never
//! stops the rows after it.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::error::Error as AccessError;
use crate::models::{Availability, Completeness, Legibility, ManuscriptFields};
use crate::normalize::{split_list, split_ordered};

/// Columns every import sheet must carry.
pub const REQUIRED_COLUMNS: [&str; 8] = [
    "kodeInventarisasi",
    "judul",
    "pengarang",
    "deskripsi",
    "statusKetersediaan",
    "kelengkapan",
    "keterbacaan",
    "jumlahHalaman",
];

/// Columns read when present.
pub const OPTIONAL_COLUMNS: [&str; 13] = [
    "kodeDigital",
    "penyalin",
    "tahunPenyalinan",
    "kategori",
    "bahasa",
    "aksara",
    "tinta",
    "kondisiNaskah",
    "kolofon",
    "catatan",
    "thumbnailUrl",
    "imageUrls",
    "googleDriveFolderUrl",
];

/// Separator for multi-value cells.
pub const MULTI_VALUE_DELIMITER: char = ';';

/// Spreadsheet row number of the first data row (row 1 is the header).
pub const FIRST_DATA_ROW: u32 = 2;

/// A decoded sheet: header names plus one map per data row, in sheet order.
///
/// Blank rows between data rows are kept (as empty maps) so row numbers
/// line up with the spreadsheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    pub headers: Vec<String>,
    pub rows: Vec<BTreeMap<String, String>>,
}

/// Batch-level failures. Everything else is reported per row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImportError {
    #[error("the sheet has no data rows")]
    EmptySheet,

    #[error("missing required column(s): {}", .0.join(", "))]
    MissingHeaders(Vec<String>),
}

/// Fails when any required column is absent from the header row.
pub fn check_headers(headers: &[String]) -> Result<(), ImportError> {
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|col| !headers.iter().any(|h| h.trim() == **col))
        .map(|col| col.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ImportError::MissingHeaders(missing))
    }
}

/// Parses a page-count cell.
///
/// Accepts a non-negative whole number, including spreadsheet numerics
/// such as `"12.0"`. Zero is a valid count.
pub fn parse_page_count(raw: &str) -> Result<u32, String> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<u32>() {
        return Ok(n);
    }
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&f) => {
            Ok(f as u32)
        }
        _ => Err(format!(
            "'jumlahHalaman' must be a non-negative whole number, got {raw:?}"
        )),
    }
}

fn cell<'a>(row: &'a BTreeMap<String, String>, column: &str) -> &'a str {
    row.get(column).map(|s| s.trim()).unwrap_or("")
}

fn optional(row: &BTreeMap<String, String>, column: &str) -> Option<String> {
    let value = cell(row, column);
    (!value.is_empty()).then(|| value.to_string())
}

fn row_error(field: &str, message: impl Into<String>) -> AccessError {
    AccessError::validation(field, message)
}

/// True when every cell of the row is blank.
pub fn is_blank(row: &BTreeMap<String, String>) -> bool {
    row.values().all(|v| v.trim().is_empty())
}

/// Turns one sheet row into a manuscript payload, or explains why not.
pub fn validate_row(row: &BTreeMap<String, String>) -> Result<ManuscriptFields, AccessError> {
    fields_from_cells(row, MULTI_VALUE_DELIMITER)
}

/// Builds a manuscript payload from text cells keyed by stored column name,
/// splitting multi-value cells on `delimiter`.
pub fn fields_from_cells(
    row: &BTreeMap<String, String>,
    delimiter: char,
) -> Result<ManuscriptFields, AccessError> {
    for column in REQUIRED_COLUMNS {
        if cell(row, column).is_empty() {
            return Err(row_error(column, format!("required column '{column}' is empty")));
        }
    }

    let page_count =
        parse_page_count(cell(row, "jumlahHalaman")).map_err(|m| row_error("jumlahHalaman", m))?;
    let availability: Availability = cell(row, Availability::FIELD)
        .parse()
        .map_err(|e| row_error(Availability::FIELD, format!("{e}")))?;
    let completeness: Completeness = cell(row, Completeness::FIELD)
        .parse()
        .map_err(|e| row_error(Completeness::FIELD, format!("{e}")))?;
    let legibility: Legibility = cell(row, Legibility::FIELD)
        .parse()
        .map_err(|e| row_error(Legibility::FIELD, format!("{e}")))?;

    let list = |column: &str| split_list(cell(row, column), delimiter);

    Ok(ManuscriptFields {
        inventory_code: cell(row, "kodeInventarisasi").to_string(),
        digital_code: optional(row, "kodeDigital"),
        title: cell(row, "judul").to_string(),
        author: cell(row, "pengarang").to_string(),
        transcriber: optional(row, "penyalin"),
        year_copied: optional(row, "tahunPenyalinan"),
        availability,
        completeness,
        legibility,
        categories: list("kategori"),
        languages: list("bahasa"),
        scripts: list("aksara"),
        page_count,
        ink: optional(row, "tinta"),
        condition: optional(row, "kondisiNaskah"),
        description: cell(row, "deskripsi").to_string(),
        colophon: optional(row, "kolofon"),
        notes: optional(row, "catatan"),
        thumbnail_url: optional(row, "thumbnailUrl"),
        image_urls: split_ordered(cell(row, "imageUrls"), delimiter),
        drive_folder_url: optional(row, "googleDriveFolderUrl"),
    })
}

/// The inverse of [`fields_from_cells`]: every known column as text.
pub fn cells_from_fields(fields: &ManuscriptFields, delimiter: char) -> BTreeMap<String, String> {
    let joiner = format!("{delimiter} ");
    let text = |v: &Option<String>| v.clone().unwrap_or_default();
    [
        ("kodeInventarisasi", fields.inventory_code.clone()),
        ("kodeDigital", text(&fields.digital_code)),
        ("judul", fields.title.clone()),
        ("pengarang", fields.author.clone()),
        ("penyalin", text(&fields.transcriber)),
        ("tahunPenyalinan", text(&fields.year_copied)),
        ("statusKetersediaan", fields.availability.to_string()),
        ("kelengkapan", fields.completeness.to_string()),
        ("keterbacaan", fields.legibility.to_string()),
        ("kategori", fields.categories.join(&joiner)),
        ("bahasa", fields.languages.join(&joiner)),
        ("aksara", fields.scripts.join(&joiner)),
        ("jumlahHalaman", fields.page_count.to_string()),
        ("tinta", text(&fields.ink)),
        ("kondisiNaskah", text(&fields.condition)),
        ("deskripsi", fields.description.clone()),
        ("kolofon", text(&fields.colophon)),
        ("catatan", text(&fields.notes)),
        ("thumbnailUrl", text(&fields.thumbnail_url)),
        ("imageUrls", fields.image_urls.join(&joiner)),
        ("googleDriveFolderUrl", text(&fields.drive_folder_url)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// True for any column an import sheet or the manuscript form may carry.
pub fn is_known_column(name: &str) -> bool {
    REQUIRED_COLUMNS
        .iter()
        .chain(OPTIONAL_COLUMNS.iter())
        .any(|c| *c == name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    Success,
    Error,
    Skipped,
}

/// What happened to one sheet row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowOutcome {
    /// Spreadsheet row number (the header is row 1).
    pub row_number: u32,
    pub original_data: BTreeMap<String, String>,
    pub status: RowStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manuscript_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub rows: Vec<RowOutcome>,
}

impl ImportReport {
    fn count(&self, status: RowStatus) -> usize {
        self.rows.iter().filter(|r| r.status == status).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(RowStatus::Success)
    }

    pub fn failed(&self) -> usize {
        self.count(RowStatus::Error)
    }

    pub fn skipped(&self) -> usize {
        self.count(RowStatus::Skipped)
    }

    pub fn errors(&self) -> impl Iterator<Item = &RowOutcome> {
        self.rows.iter().filter(|r| r.status == RowStatus::Error)
    }
}

/// Imports every row of `sheet` into the catalog.
pub async fn import_sheet(catalog: &Catalog, sheet: &Sheet) -> Result<ImportReport, ImportError> {
    import_sheet_with(catalog, sheet, |_| {}).await
}

/// Like [`import_sheet`], calling `on_row` as each row finishes.
pub async fn import_sheet_with<F>(
    catalog: &Catalog,
    sheet: &Sheet,
    mut on_row: F,
) -> Result<ImportReport, ImportError>
where
    F: FnMut(&RowOutcome),
{
    if sheet.rows.iter().all(is_blank) {
        return Err(ImportError::EmptySheet);
    }
    check_headers(&sheet.headers)?;
    for header in &sheet.headers {
        if !is_known_column(header.trim()) {
            debug!(column = %header, "ignoring unknown column");
        }
    }

    let mut report = ImportReport::default();
    for (index, row) in sheet.rows.iter().enumerate() {
        let row_number = FIRST_DATA_ROW + index as u32;
        let outcome = import_row(catalog, row_number, row).await;
        on_row(&outcome);
        report.rows.push(outcome);
    }

    info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        skipped = report.skipped(),
        "bulk import finished"
    );
    Ok(report)
}

async fn import_row(
    catalog: &Catalog,
    row_number: u32,
    row: &BTreeMap<String, String>,
) -> RowOutcome {
    let outcome = |status: RowStatus, message: String, manuscript_id: Option<String>| RowOutcome {
        row_number,
        original_data: row.clone(),
        status,
        message,
        manuscript_id,
    };

    if is_blank(row) {
        debug!(row_number, "blank row skipped");
        return outcome(RowStatus::Skipped, "blank row".to_string(), None);
    }

    let fields = match validate_row(row) {
        Ok(fields) => fields,
        Err(e) => {
            warn!(row_number, error = %e, "row rejected");
            return outcome(RowStatus::Error, validation_message(e), None);
        }
    };

    match catalog.create(&fields).await {
        Ok(created) => outcome(RowStatus::Success, "imported".to_string(), Some(created.id)),
        Err(e) => {
            warn!(row_number, error = %e, "row could not be saved");
            outcome(RowStatus::Error, format!("could not save: {e}"), None)
        }
    }
}

fn validation_message(e: AccessError) -> String {
    match e {
        AccessError::Validation { message, .. } => message,
        other => other.to_string(),
    }
}
