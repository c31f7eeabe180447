use core::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of rows in an Excel worksheet (1,048,576).
pub const EXCEL_MAX_ROWS: u32 = 1_048_576;
/// Maximum number of columns in an Excel worksheet (16,384, column `XFD`).
pub const EXCEL_MAX_COLS: u32 = 16_384;

/// A reference to a single cell within a worksheet.
///
/// Rows and columns are **0-indexed**:
/// - `row = 0` is Excel row `1`
/// - `col = 0` is Excel column `A`
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellRef {
    /// 0-indexed row.
    pub row: u32,
    /// 0-indexed column.
    pub col: u32,
}

impl CellRef {
    #[inline]
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Convert to Excel A1 notation (e.g. `A1`, `BC32`).
    pub fn to_a1(self) -> String {
        let mut out = column_name(self.col);
        out.push_str(&(self.row + 1).to_string());
        out
    }

    /// Parse an Excel A1-style reference (e.g. `A1`, `$B$2`).
    pub fn from_a1(a1: &str) -> Result<Self, A1ParseError> {
        let s = a1.trim();
        if s.is_empty() {
            return Err(A1ParseError::Empty);
        }

        let bytes = s.as_bytes();
        let mut idx = usize::from(bytes[0] == b'$');

        let col_start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_alphabetic() {
            idx += 1;
        }
        if idx == col_start {
            return Err(A1ParseError::MissingColumn);
        }
        let col = column_index(&s[col_start..idx])?;

        if bytes.get(idx) == Some(&b'$') {
            idx += 1;
        }

        let row_start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_digit() {
            idx += 1;
        }
        if idx == row_start {
            return Err(A1ParseError::MissingRow);
        }
        if idx != bytes.len() {
            return Err(A1ParseError::TrailingCharacters);
        }

        let row: u32 = s[row_start..idx]
            .parse()
            .map_err(|_| A1ParseError::InvalidRow)?;
        if row == 0 || row > EXCEL_MAX_ROWS {
            return Err(A1ParseError::InvalidRow);
        }

        Ok(Self { row: row - 1, col })
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

/// A rectangular, inclusive region within a worksheet.
///
/// Always normalized so that `start.row <= end.row` and `start.col <= end.col`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: CellRef,
    pub end: CellRef,
}

impl Range {
    /// Construct a new range, normalizing coordinates if needed.
    pub const fn new(a: CellRef, b: CellRef) -> Self {
        let (start_row, end_row) = if a.row <= b.row { (a.row, b.row) } else { (b.row, a.row) };
        let (start_col, end_col) = if a.col <= b.col { (a.col, b.col) } else { (b.col, a.col) };
        Self {
            start: CellRef::new(start_row, start_col),
            end: CellRef::new(end_row, end_col),
        }
    }

    #[inline]
    pub const fn single(cell: CellRef) -> Self {
        Self {
            start: cell,
            end: cell,
        }
    }

    #[inline]
    pub const fn contains(&self, cell: CellRef) -> bool {
        cell.row >= self.start.row
            && cell.row <= self.end.row
            && cell.col >= self.start.col
            && cell.col <= self.end.col
    }

    #[inline]
    pub const fn width(&self) -> u32 {
        self.end.col - self.start.col + 1
    }

    #[inline]
    pub const fn height(&self) -> u32 {
        self.end.row - self.start.row + 1
    }

    #[inline]
    pub const fn is_single_cell(&self) -> bool {
        self.start.row == self.end.row && self.start.col == self.end.col
    }

    /// Smallest range covering both `self` and `other`.
    pub fn union(&self, other: &Range) -> Range {
        Range {
            start: CellRef::new(
                self.start.row.min(other.start.row),
                self.start.col.min(other.start.col),
            ),
            end: CellRef::new(
                self.end.row.max(other.end.row),
                self.end.col.max(other.end.col),
            ),
        }
    }

    /// Grow the range (if needed) so it covers `cell`.
    pub fn extend_to(&mut self, cell: CellRef) {
        *self = self.union(&Range::single(cell));
    }

    /// Iterate every cell in the range in row-major order.
    pub fn cells(&self) -> RangeIter {
        RangeIter {
            range: *self,
            next: Some(self.start),
        }
    }

    /// Parse an Excel A1-style range like `A1:B2` or a single-cell reference like `C3`.
    pub fn from_a1(a1: &str) -> Result<Self, RangeParseError> {
        let s = a1.trim();
        if s.is_empty() {
            return Err(RangeParseError::Empty);
        }

        match s.split_once(':') {
            None => Ok(Range::single(CellRef::from_a1(s)?)),
            Some((a, b)) => Ok(Range::new(CellRef::from_a1(a)?, CellRef::from_a1(b)?)),
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single_cell() {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

/// Row-major iterator over the cells of a [`Range`].
#[derive(Debug, Clone)]
pub struct RangeIter {
    range: Range,
    next: Option<CellRef>,
}

impl Iterator for RangeIter {
    type Item = CellRef;

    fn next(&mut self) -> Option<CellRef> {
        let current = self.next?;
        self.next = if current.col < self.range.end.col {
            Some(CellRef::new(current.row, current.col + 1))
        } else if current.row < self.range.end.row {
            Some(CellRef::new(current.row + 1, self.range.start.col))
        } else {
            None
        };
        Some(current)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum A1ParseError {
    #[error("empty A1 reference")]
    Empty,
    #[error("missing column in A1 reference")]
    MissingColumn,
    #[error("missing row in A1 reference")]
    MissingRow,
    #[error("invalid column in A1 reference")]
    InvalidColumn,
    #[error("invalid row in A1 reference")]
    InvalidRow,
    #[error("trailing characters in A1 reference")]
    TrailingCharacters,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum RangeParseError {
    #[error("empty A1 range")]
    Empty,
    #[error("invalid cell reference in range: {0}")]
    Cell(#[from] A1ParseError),
}

/// Column letters for a 0-based column index (`0` -> `A`, `27` -> `AB`).
pub fn column_name(col: u32) -> String {
    let mut n = col + 1;
    let mut out = Vec::<u8>::with_capacity(3);
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    out.iter().rev().map(|b| *b as char).collect()
}

fn column_index(letters: &str) -> Result<u32, A1ParseError> {
    let mut col: u32 = 0;
    for b in letters.bytes() {
        let v = u32::from(b.to_ascii_uppercase() - b'A') + 1;
        col = col
            .checked_mul(26)
            .and_then(|c| c.checked_add(v))
            .ok_or(A1ParseError::InvalidColumn)?;
    }
    if col == 0 || col > EXCEL_MAX_COLS {
        return Err(A1ParseError::InvalidColumn);
    }
    Ok(col - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a1_roundtrip() {
        let c = CellRef::new(0, 0);
        assert_eq!(c.to_a1(), "A1");
        assert_eq!(CellRef::from_a1("A1").unwrap(), c);
        assert_eq!(CellRef::from_a1("$A$1").unwrap(), c);

        let c2 = CellRef::new(31, 54); // BC32
        assert_eq!(c2.to_a1(), "BC32");
        assert_eq!(CellRef::from_a1("bc32").unwrap(), c2);
    }

    #[test]
    fn a1_rejects_garbage() {
        assert_eq!(CellRef::from_a1(""), Err(A1ParseError::Empty));
        assert_eq!(CellRef::from_a1("12"), Err(A1ParseError::MissingColumn));
        assert_eq!(CellRef::from_a1("AB"), Err(A1ParseError::MissingRow));
        assert_eq!(CellRef::from_a1("A0"), Err(A1ParseError::InvalidRow));
        assert_eq!(CellRef::from_a1("A1x"), Err(A1ParseError::TrailingCharacters));
    }

    #[test]
    fn a1_bounds_are_excel_compatible() {
        assert!(CellRef::from_a1("XFD1048576").is_ok());
        assert!(CellRef::from_a1("XFE1").is_err());
        assert!(CellRef::from_a1("A1048577").is_err());
    }

    #[test]
    fn range_parsing_normalizes() {
        let r = Range::from_a1("D50:A1").unwrap();
        assert_eq!(r.start, CellRef::new(0, 0));
        assert_eq!(r.end, CellRef::new(49, 3));
        assert_eq!(r.to_string(), "A1:D50");

        let single = Range::from_a1("C3").unwrap();
        assert!(single.is_single_cell());
        assert_eq!(single.to_string(), "C3");
    }

    #[test]
    fn range_cells_are_row_major() {
        let r = Range::from_a1("B2:C3").unwrap();
        let cells: Vec<String> = r.cells().map(CellRef::to_a1).collect();
        assert_eq!(cells, vec!["B2", "C2", "B3", "C3"]);
        assert_eq!(r.cells().count() as u32, r.width() * r.height());
    }

    #[test]
    fn union_and_extend() {
        let mut r = Range::single(CellRef::new(4, 4));
        r.extend_to(CellRef::new(0, 2));
        r.extend_to(CellRef::new(9, 1));
        assert_eq!(r.to_string(), "B1:E10");
    }
}
