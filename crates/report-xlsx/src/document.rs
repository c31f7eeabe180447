//! In-memory spreadsheet document with staged cell edits.
//!
//! [`Document`] is the adapter surface used by the replacement engine: sheet lookup
//! by name, cell reads and writes, used-range introspection, recalculation and
//! serialization. Edits are staged and only written into the package on
//! [`Document::recalculate`] or [`Document::serialize`], so reads in between see a
//! consistent merged view.

use std::collections::HashMap;

use report_model::{CellRef, CellValue, Range, EXCEL_MAX_COLS, EXCEL_MAX_ROWS};
use thiserror::Error;

use crate::dates::{date_to_serial, datetime_to_serial};
use crate::package::WORKBOOK_PART;
use crate::patch::{
    apply_cell_patches_to_package, resolve_worksheet_part, CellPatch, WorkbookCellPatches,
};
use crate::recalc::{apply_recalc_policy, RecalcPolicy};
use crate::shared_strings::{parse_shared_strings, SHARED_STRINGS_PART};
use crate::sheet_metadata::{parse_workbook_date_system, DateSystem};
use crate::worksheet::{parse_worksheet_cells, CellContent, SheetValue, WorksheetCells};
use crate::{WorkbookSheetInfo, XlsxError, XlsxPackage};

#[derive(Debug, Error)]
pub enum DocumentError {
    /// The bytes are not a readable spreadsheet container.
    #[error("malformed spreadsheet container: {0}")]
    MalformedContainer(#[source] XlsxError),
    #[error("sheet not found: {sheet:?}")]
    SheetNotFound { sheet: String },
    #[error(transparent)]
    Adapter(#[from] XlsxError),
}

/// A resolved worksheet: tab name plus the package part holding its cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetHandle {
    name: String,
    part: String,
}

impl SheetHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn part_name(&self) -> &str {
        &self.part
    }
}

#[derive(Debug)]
pub struct Document {
    package: XlsxPackage,
    sheets: Vec<WorkbookSheetInfo>,
    date_system: DateSystem,
    /// Parsed `xl/sharedStrings.xml`, loaded on first cell read.
    shared_strings: Option<Vec<String>>,
    /// Parsed worksheet cells keyed by part name.
    worksheets: HashMap<String, WorksheetCells>,
    patches: WorkbookCellPatches,
}

impl Document {
    /// Open a document from the raw bytes of an `.xlsx`/`.xlsm` file.
    ///
    /// The input is copied; it is never modified.
    pub fn open(bytes: &[u8]) -> Result<Self, DocumentError> {
        let package = XlsxPackage::from_bytes(bytes).map_err(DocumentError::MalformedContainer)?;
        let sheets = package
            .workbook_sheets()
            .map_err(DocumentError::MalformedContainer)?;
        let date_system = package
            .part(WORKBOOK_PART)
            .map(parse_workbook_date_system)
            .transpose()
            .map_err(DocumentError::MalformedContainer)?
            .unwrap_or_default();

        tracing::debug!(
            sheets = sheets.len(),
            parts = package.part_names().count(),
            ?date_system,
            "opened workbook"
        );

        Ok(Self {
            package,
            sheets,
            date_system,
            shared_strings: None,
            worksheets: HashMap::new(),
            patches: WorkbookCellPatches::default(),
        })
    }

    /// Sheet tab names in workbook order.
    pub fn sheet_names(&self) -> impl Iterator<Item = &str> {
        self.sheets.iter().map(|s| s.name.as_str())
    }

    pub fn date_system(&self) -> DateSystem {
        self.date_system
    }

    /// Raw bytes of a package part as currently committed.
    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.package.part(name)
    }

    /// Look up a sheet by its exact (case-sensitive) tab name.
    pub fn find_sheet(&self, name: &str) -> Result<SheetHandle, DocumentError> {
        let sheet = self
            .sheets
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| DocumentError::SheetNotFound {
                sheet: name.to_string(),
            })?;
        let part = resolve_worksheet_part(&self.package, sheet)?;
        if self.package.part(&part).is_none() {
            return Err(XlsxError::MissingPart(part).into());
        }
        Ok(SheetHandle {
            name: sheet.name.clone(),
            part,
        })
    }

    /// Bounding box of every cell the sheet will contain once staged edits are
    /// committed; `None` for an empty sheet.
    pub fn used_range(&mut self, sheet: &SheetHandle) -> Result<Option<Range>, DocumentError> {
        self.ensure_loaded(sheet)?;
        let cells = &self.worksheets[&sheet.part];
        let staged = self.patches.sheet(&sheet.name);

        let mut range: Option<Range> = None;
        let mut extend = |cell: CellRef| match range.as_mut() {
            Some(r) => r.extend_to(cell),
            None => range = Some(Range::single(cell)),
        };

        for (cell, content) in cells.iter() {
            let dropped = staged
                .and_then(|p| p.get(cell))
                .is_some_and(|patch| patch.value().is_none() && !has_style(content.style_index));
            if !dropped {
                extend(cell);
            }
        }
        if let Some(staged) = staged {
            for (cell, patch) in staged.iter() {
                if patch.value().is_some() {
                    extend(cell);
                }
            }
        }

        Ok(range)
    }

    /// Existing cells inside `range`, row-major, ignoring staged edits.
    pub fn committed_cells_in(
        &mut self,
        sheet: &SheetHandle,
        range: Range,
    ) -> Result<Vec<CellRef>, DocumentError> {
        self.ensure_loaded(sheet)?;
        Ok(self.worksheets[&sheet.part].cells_in(range).collect())
    }

    /// Current content of a cell, staged edits included. `None` when the cell
    /// does not exist.
    pub fn cell(
        &mut self,
        sheet: &SheetHandle,
        cell: CellRef,
    ) -> Result<Option<CellContent>, DocumentError> {
        self.ensure_loaded(sheet)?;
        let committed = self.worksheets[&sheet.part].get(cell);
        let style_index = committed.and_then(|c| c.style_index);

        let staged = self.patches.sheet(&sheet.name).and_then(|p| p.get(cell));
        let Some(patch) = staged else {
            return Ok(committed.cloned());
        };

        Ok(match patch.value() {
            Some(value) => Some(CellContent {
                value: sheet_value(value, self.date_system),
                formula: None,
                style_index,
            }),
            None if has_style(style_index) => Some(CellContent {
                style_index,
                ..CellContent::default()
            }),
            None => None,
        })
    }

    /// Stage a literal value for `cell`. The cell keeps its style; any formula is
    /// replaced. [`CellValue::Empty`] clears the cell.
    ///
    /// Dates and date-times written to an unstyled cell get a built-in date format
    /// when the edits are committed.
    pub fn set_cell_value(
        &mut self,
        sheet: &SheetHandle,
        cell: CellRef,
        value: CellValue,
    ) -> Result<(), DocumentError> {
        check_bounds(cell)?;
        let patch = if value.is_empty() {
            CellPatch::Clear
        } else {
            CellPatch::Set { value }
        };
        self.patches.set_cell(sheet.name.clone(), cell, patch);
        Ok(())
    }

    /// Stage removal of the value and formula of `cell`; formatting is kept.
    pub fn clear_cell(&mut self, sheet: &SheetHandle, cell: CellRef) -> Result<(), DocumentError> {
        check_bounds(cell)?;
        self.patches.set_cell(sheet.name.clone(), cell, CellPatch::Clear);
        Ok(())
    }

    /// Commit staged edits and request a full recalculation when the workbook is
    /// next opened (calc chain dropped, `fullCalcOnLoad`, pivot `refreshOnLoad`).
    pub fn recalculate(&mut self) -> Result<(), DocumentError> {
        self.recalculate_with(RecalcPolicy::default())
    }

    /// [`Document::recalculate`] with an explicit choice of hints.
    pub fn recalculate_with(&mut self, policy: RecalcPolicy) -> Result<(), DocumentError> {
        self.commit()?;
        apply_recalc_policy(&mut self.package, policy)?;
        Ok(())
    }

    /// Commit staged edits and write the container.
    pub fn serialize(&mut self) -> Result<Vec<u8>, DocumentError> {
        self.commit()?;
        Ok(self.package.write_to_bytes()?)
    }

    fn commit(&mut self) -> Result<(), DocumentError> {
        if self.patches.is_empty() {
            return Ok(());
        }

        let applied =
            apply_cell_patches_to_package(&mut self.package, &self.patches, self.date_system)?;
        self.patches.clear();
        self.shared_strings = None;
        self.worksheets.extend(applied.worksheets);

        if applied.formula_removed {
            // Cached results of dependents of the removed formulas are now stale.
            apply_recalc_policy(&mut self.package, RecalcPolicy::FORMULA_EDIT)?;
        }
        Ok(())
    }

    fn ensure_loaded(&mut self, sheet: &SheetHandle) -> Result<(), DocumentError> {
        if self.worksheets.contains_key(&sheet.part) {
            return Ok(());
        }

        if self.shared_strings.is_none() {
            let strings = match self.package.part(SHARED_STRINGS_PART) {
                Some(bytes) => parse_shared_strings(bytes)?,
                None => Vec::new(),
            };
            self.shared_strings = Some(strings);
        }
        let strings = self.shared_strings.as_deref().unwrap_or_default();

        let xml = self
            .package
            .part(&sheet.part)
            .ok_or_else(|| XlsxError::MissingPart(sheet.part.clone()))?;
        let cells = parse_worksheet_cells(xml, strings)?;
        tracing::trace!(sheet = %sheet.name, cells = cells.len(), "loaded worksheet cells");
        self.worksheets.insert(sheet.part.clone(), cells);
        Ok(())
    }
}

fn has_style(style_index: Option<u32>) -> bool {
    style_index.is_some_and(|s| s != 0)
}

fn check_bounds(cell: CellRef) -> Result<(), XlsxError> {
    if cell.row >= EXCEL_MAX_ROWS || cell.col >= EXCEL_MAX_COLS {
        return Err(XlsxError::Invalid(format!(
            "cell {cell} is outside the worksheet grid"
        )));
    }
    Ok(())
}

/// How a staged value reads back once written.
fn sheet_value(value: &CellValue, date_system: DateSystem) -> SheetValue {
    let number = |n: f64| {
        if n.is_finite() {
            SheetValue::Number(n)
        } else {
            SheetValue::Error("#NUM!".to_string())
        }
    };
    match value {
        CellValue::Empty => SheetValue::Empty,
        CellValue::Number(n) => number(*n),
        CellValue::Boolean(b) => SheetValue::Boolean(*b),
        CellValue::String(s) => SheetValue::Text(s.clone()),
        CellValue::Date(d) => date_to_serial(*d, date_system)
            .map_or_else(|| SheetValue::Text(value.to_string()), number),
        CellValue::DateTime(dt) => datetime_to_serial(*dt, date_system)
            .map_or_else(|| SheetValue::Text(value.to_string()), number),
    }
}
