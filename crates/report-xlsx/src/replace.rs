//! Clear-then-load replacement of a sheet's data region.
//!
//! The whole used range of the target sheet is cleared (values and formulas;
//! formatting stays), then the table is written from [`DATA_ANCHOR`]: a header
//! row of column names followed by one row per table row. Clearing follows the
//! sheet's used range rather than the new table's footprint, so rows left over
//! from a larger previous dataset cannot survive.

use report_model::{CellRef, CellValue, Range, Table, EXCEL_MAX_COLS, EXCEL_MAX_ROWS};

use crate::document::{Document, DocumentError};
use crate::XlsxError;

/// Top-left cell of the header row.
pub const DATA_ANCHOR: CellRef = CellRef::new(0, 0);

/// What a replacement did to the target sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceSummary {
    pub sheet: String,
    /// Used range that was cleared, `None` when the sheet was empty.
    pub cleared: Option<Range>,
    /// Data rows written below the header.
    pub rows_written: usize,
    pub columns_written: usize,
}

impl ReplaceSummary {
    /// `true` when the table had no rows and nothing was loaded.
    pub fn no_data(&self) -> bool {
        self.rows_written == 0
    }
}

/// Serialized workbook produced by [`replace_sheet_data_in_bytes`].
#[derive(Debug, Clone)]
pub struct ReplacedWorkbook {
    pub bytes: Vec<u8>,
    pub summary: ReplaceSummary,
}

/// Replace the data region of `sheet_name` with `table` and request recalculation.
///
/// The document is left with the edits committed; call [`Document::serialize`]
/// to obtain the output bytes.
pub fn replace_sheet_data(
    doc: &mut Document,
    sheet_name: &str,
    table: &Table,
) -> Result<ReplaceSummary, DocumentError> {
    let sheet = doc.find_sheet(sheet_name)?;
    check_footprint(table)?;

    let cleared = doc.used_range(&sheet)?;
    if let Some(range) = cleared {
        let cells = doc.committed_cells_in(&sheet, range)?;
        tracing::debug!(sheet = sheet_name, range = %range, cells = cells.len(), "clearing used range");
        for cell in cells {
            doc.clear_cell(&sheet, cell)?;
        }
    }

    let mut summary = ReplaceSummary {
        sheet: sheet_name.to_string(),
        cleared,
        rows_written: 0,
        columns_written: 0,
    };

    if table.is_empty() {
        tracing::warn!(sheet = sheet_name, "no data loaded: query returned zero rows");
    } else {
        for (offset, name) in table.column_names().enumerate() {
            let cell = CellRef::new(DATA_ANCHOR.row, DATA_ANCHOR.col + offset as u32);
            doc.set_cell_value(&sheet, cell, CellValue::String(name.to_string()))?;
        }
        for (row_offset, row) in table.rows().iter().enumerate() {
            let row_index = DATA_ANCHOR.row + 1 + row_offset as u32;
            for (col_offset, value) in row.iter().enumerate() {
                let cell = CellRef::new(row_index, DATA_ANCHOR.col + col_offset as u32);
                doc.set_cell_value(&sheet, cell, value.clone())?;
            }
        }
        summary.rows_written = table.row_count();
        summary.columns_written = table.columns().len();
        tracing::debug!(
            sheet = sheet_name,
            rows = summary.rows_written,
            columns = summary.columns_written,
            "loaded table"
        );
    }

    doc.recalculate()?;
    Ok(summary)
}

/// Open `template`, replace the data region of `sheet_name` and serialize.
///
/// `template` is only read; on error no output is produced.
pub fn replace_sheet_data_in_bytes(
    template: &[u8],
    sheet_name: &str,
    table: &Table,
) -> Result<ReplacedWorkbook, DocumentError> {
    let mut doc = Document::open(template)?;
    let summary = replace_sheet_data(&mut doc, sheet_name, table)?;
    let bytes = doc.serialize()?;
    Ok(ReplacedWorkbook { bytes, summary })
}

fn check_footprint(table: &Table) -> Result<(), XlsxError> {
    let rows = table.row_count() as u64 + 1 + u64::from(DATA_ANCHOR.row);
    let cols = table.columns().len() as u64 + u64::from(DATA_ANCHOR.col);
    if rows > u64::from(EXCEL_MAX_ROWS) || cols > u64::from(EXCEL_MAX_COLS) {
        return Err(XlsxError::Invalid(format!(
            "table of {} rows x {} columns does not fit in a worksheet",
            table.row_count(),
            table.columns().len()
        )));
    }
    Ok(())
}
