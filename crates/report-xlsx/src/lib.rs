//! Part-preserving XLSX template editing.
//!
//! The crate replaces the data region of one worksheet in an existing workbook
//! while leaving everything else in the package intact:
//!
//! - [`XlsxPackage`]: Open Packaging Convention (OPC) ZIP handling that inflates
//!   the package into memory (part name -> bytes) and writes untouched parts back
//!   byte-for-byte, in the original entry order.
//! - [`Document`]: sheet lookup, cell reads and staged writes, used-range
//!   introspection, recalculation requests and serialization.
//! - [`replace_sheet_data`]/[`replace_sheet_data_in_bytes`]: clear the sheet's
//!   used range, load a [`report_model::Table`] from [`DATA_ANCHOR`] and flag the
//!   workbook for recalculation so charts and pivots follow the new data.
//!
//! Worksheets are rewritten by streaming their XML (see [`patch`]). Shared strings
//! and cell formats are append-only so indices used elsewhere never move.

mod dates;
mod document;
pub mod openxml;
mod package;
pub mod patch;
mod recalc;
mod replace;
pub mod shared_strings;
mod sheet_metadata;
mod styles;
mod worksheet;
mod zip_util;

pub use dates::{date_to_serial, datetime_to_serial};
pub use document::{Document, DocumentError, SheetHandle};
pub use package::{XlsxError, XlsxPackage, XlsxPackageLimits};
pub use patch::{CellPatch, WorkbookCellPatches, WorksheetCellPatches};
pub use recalc::RecalcPolicy;
pub use replace::{
    replace_sheet_data, replace_sheet_data_in_bytes, ReplaceSummary, ReplacedWorkbook,
    DATA_ANCHOR,
};
pub use sheet_metadata::{
    parse_workbook_date_system, parse_workbook_sheets, DateSystem, WorkbookSheetInfo,
};
pub use worksheet::{CellContent, SheetValue};
pub use zip_util::{MAX_XLSX_PACKAGE_PART_BYTES, MAX_XLSX_PACKAGE_TOTAL_BYTES};
