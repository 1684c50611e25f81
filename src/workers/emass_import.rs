// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! eMASS Test Result Import workbook ingestion

use async_trait::async_trait;
use calamine::{open_workbook_auto, Data, DataType, Reader};
use std::path::{Path, PathBuf};
use tracing::info;

use super::{Progress, Worker};
use crate::db::Database;
use crate::model::{cci_number, format_cci, Cci};
use crate::{Result, StigqterError};

const SHEET: &str = "Test Result Import";

const COL_CCI: usize = 3;
const COL_COMPLIANCE: usize = 11;
const COL_DATE_TESTED: usize = 12;
const COL_TESTED_BY: usize = 13;
const COL_TEST_RESULTS: usize = 14;

/// Variable recording that an import has been loaded
pub const EMASS_IMPORT_VARIABLE: &str = "emassImport";

fn cell_text(cell: &Data, date_format: &str) -> String {
    match cell {
        Data::DateTime(_) => cell
            .as_date()
            .map(|d| d.format(date_format).to_string())
            .unwrap_or_else(|| cell.to_string()),
        other => other.to_string().trim().to_string(),
    }
}

/// Rows of the Test Result Import sheet (or the first sheet) as text
pub fn read_rows(path: &Path, date_format: &str) -> Result<Vec<Vec<String>>> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| StigqterError::Spreadsheet(format!("Failed to open {}: {}", path.display(), e)))?;

    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    let sheet = sheet_names
        .iter()
        .find(|s| s.as_str() == SHEET)
        .or_else(|| sheet_names.first())
        .cloned()
        .ok_or_else(|| StigqterError::Spreadsheet(format!("{} has no worksheets", path.display())))?;

    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| StigqterError::Spreadsheet(format!("Failed to read {}: {}", sheet, e)))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(|c| cell_text(c, date_format)).collect())
        .collect())
}

/// The import columns of a row, or `None` when column D is not a CCI
pub fn import_row(cells: &[String]) -> Option<Cci> {
    let column = |idx: usize| cells.get(idx).map(|c| c.trim().to_string()).unwrap_or_default();
    let cci = column(COL_CCI);
    if !cci.to_uppercase().starts_with("CCI") && !cci.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(Cci {
        cci: cci_number(&cci)?,
        is_import: true,
        import_compliance: column(COL_COMPLIANCE),
        import_date_tested: column(COL_DATE_TESTED),
        import_tested_by: column(COL_TESTED_BY),
        import_test_results: column(COL_TEST_RESULTS),
        ..Cci::default()
    })
}

/// Load the "Latest Test Result" columns of an eMASS TR export
pub struct WorkerEmassImport {
    path: PathBuf,
    date_format: String,
    imported: usize,
}

impl WorkerEmassImport {
    pub fn new(path: impl AsRef<Path>, date_format: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            date_format: date_format.into(),
            imported: 0,
        }
    }

    pub fn imported(&self) -> usize {
        self.imported
    }

    fn store(db: &Database, progress: &Progress, rows: &[Vec<String>]) -> Result<usize> {
        db.clear_emass_import()?;
        let mut imported = 0;
        for row in rows {
            if let Some(cci) = import_row(row) {
                if db.import_cci(&cci)? {
                    imported += 1;
                } else {
                    progress.warning("Unknown CCI", format!("{} is not in the CCI list", format_cci(cci.cci)));
                }
            }
            progress.advance();
        }
        db.update_variable(EMASS_IMPORT_VARIABLE, "true")?;
        Ok(imported)
    }
}

#[async_trait]
impl Worker for WorkerEmassImport {
    fn name(&self) -> &'static str {
        "emass-import"
    }

    async fn process(&mut self, db: &Database, progress: &Progress) -> Result<()> {
        progress.initialize(1, 0);
        progress.status(format!("Reading {}…", self.path.display()));
        let path = self.path.clone();
        let date_format = self.date_format.clone();
        let rows = tokio::task::spawn_blocking(move || read_rows(&path, &date_format))
            .await
            .map_err(|e| StigqterError::Worker(e.to_string()))??;

        progress.initialize(rows.len() as u64, 0);
        progress.status("Importing test results…");
        self.imported = db.bulk(|db| Self::store(db, progress, &rows))?;
        info!("Imported {} eMASS test result(s)", self.imported);
        Ok(())
    }
}
