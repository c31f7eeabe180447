//! Data model shared by the report crates.
//!
//! - [`Table`]: the tabular result produced by a query collaborator and consumed
//!   by the spreadsheet replacement engine.
//! - [`CellRef`] / [`Range`]: 0-indexed worksheet addressing with A1 conversion.

mod address;
mod table;
mod value;

pub use address::{
    column_name, A1ParseError, CellRef, Range, RangeIter, RangeParseError, EXCEL_MAX_COLS,
    EXCEL_MAX_ROWS,
};
pub use table::{Column, ColumnType, Table, TableError};
pub use value::CellValue;
