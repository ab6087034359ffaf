//! `scriptorium import`: loads an xlsx workbook into the catalog.

use std::path::Path;

use anyhow::Result;

use scriptorium_core::import::{import_sheet_with, RowOutcome, RowStatus};
use scriptorium_core::Library;

use crate::backend::open_backend;
use crate::config::Config;
use crate::xlsx;

fn print_outcome(outcome: &RowOutcome) {
    let status = match outcome.status {
        RowStatus::Success => "ok     ",
        RowStatus::Error => "error  ",
        RowStatus::Skipped => "skipped",
    };
    match &outcome.manuscript_id {
        Some(id) => println!("  row {:>4}  {}  {} ({})", outcome.row_number, status, outcome.message, id),
        None => println!("  row {:>4}  {}  {}", outcome.row_number, status, outcome.message),
    }
}

/// Imports every row of the first worksheet. Row failures are reported and
/// do not stop the batch; a missing header or an empty sheet fails it.
pub async fn run_import(config: &Config, path: &Path) -> Result<()> {
    let sheet = xlsx::read_sheet_file(path)?;
    let library = Library::new(open_backend(config).await?, config.pagination.page_sizes());

    println!("Importing {} ({} rows)", path.display(), sheet.rows.len());
    let report = import_sheet_with(&library.catalog, &sheet, print_outcome).await?;

    println!();
    println!(
        "Imported {} of {} rows ({} failed, {} skipped).",
        report.succeeded(),
        report.rows.len(),
        report.failed(),
        report.skipped()
    );
    Ok(())
}
