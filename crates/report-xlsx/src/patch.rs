//! Part-preserving cell edit model + patch application.
//!
//! Edits are staged in a [`WorkbookCellPatches`] and applied by streaming each
//! affected worksheet part through quick-xml: untouched rows and cells are copied
//! event-for-event, patched cells are re-rendered, and every other package part is
//! left alone (charts, drawings, pivots, styles, defined names...).

use std::collections::{btree_map, BTreeMap};
use std::io::BufRead;
use std::iter::Peekable;

use quick_xml::escape::escape;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use report_model::{CellRef, CellValue};

use crate::dates::{date_to_serial, datetime_to_serial};
use crate::openxml::{local_name, name_prefix, resolve_relationship_target};
use crate::package::WORKBOOK_PART;
use crate::shared_strings::{
    encode_escapes, needs_space_preserve, parse_shared_strings, SharedStringsState,
    SHARED_STRINGS_PART,
};
use crate::sheet_metadata::DateSystem;
use crate::styles::{CellFormatsState, NUM_FMT_DATE, NUM_FMT_DATE_TIME, STYLES_PART};
use crate::worksheet::{
    parse_row_r, parse_worksheet_cells, rewrite_dimension, CellAttrs, WorksheetCells,
};
use crate::{WorkbookSheetInfo, XlsxError, XlsxPackage};

/// Error literal written for values Excel cannot store (NaN, infinities).
const NUM_ERROR: &str = "#NUM!";

/// An owned set of cell edits to apply to an existing workbook package.
///
/// Patches are keyed by **worksheet (tab) name**, then by cell address.
#[derive(Debug, Clone, Default)]
pub struct WorkbookCellPatches {
    sheets: BTreeMap<String, WorksheetCellPatches>,
}

impl WorkbookCellPatches {
    /// Returns `true` if there are no pending edits.
    pub fn is_empty(&self) -> bool {
        self.sheets.values().all(WorksheetCellPatches::is_empty)
    }

    /// Get (or create) the patch set for a worksheet by name.
    pub fn sheet_mut(&mut self, sheet_name: impl Into<String>) -> &mut WorksheetCellPatches {
        self.sheets.entry(sheet_name.into()).or_default()
    }

    pub fn sheet(&self, sheet_name: &str) -> Option<&WorksheetCellPatches> {
        self.sheets.get(sheet_name)
    }

    /// Insert/replace a patch for a single cell.
    pub fn set_cell(&mut self, sheet_name: impl Into<String>, cell: CellRef, patch: CellPatch) {
        self.sheet_mut(sheet_name).set_cell(cell, patch);
    }

    pub(crate) fn sheets(&self) -> impl Iterator<Item = (&str, &WorksheetCellPatches)> {
        self.sheets
            .iter()
            .map(|(name, patches)| (name.as_str(), patches))
    }

    pub(crate) fn clear(&mut self) {
        self.sheets.clear();
    }
}

/// A set of cell edits within a single worksheet.
#[derive(Debug, Clone, Default)]
pub struct WorksheetCellPatches {
    // Row-major ordering keeps patch application deterministic.
    cells: BTreeMap<CellRef, CellPatch>,
}

impl WorksheetCellPatches {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Insert/replace a patch for a single cell.
    pub fn set_cell(&mut self, cell: CellRef, patch: CellPatch) {
        self.cells.insert(cell, patch);
    }

    pub fn get(&self, cell: CellRef) -> Option<&CellPatch> {
        self.cells.get(&cell)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellRef, &CellPatch)> {
        self.cells.iter().map(|(cell, patch)| (*cell, patch))
    }

    /// Patches grouped by 1-based row number, columns ascending.
    fn by_row(&self) -> BTreeMap<u32, Vec<(u32, &CellPatch)>> {
        let mut out: BTreeMap<u32, Vec<(u32, &CellPatch)>> = BTreeMap::new();
        for (cell, patch) in &self.cells {
            out.entry(cell.row + 1).or_default().push((cell.col, patch));
        }
        out
    }
}

/// A single cell edit.
#[derive(Debug, Clone, PartialEq)]
pub enum CellPatch {
    /// Remove value and formula. The cell's style survives; a cell left with
    /// neither style nor content is dropped from the sheet.
    Clear,
    /// Replace the cell content with a literal value, keeping the cell's style.
    /// `CellValue::Empty` behaves like [`CellPatch::Clear`].
    Set { value: CellValue },
}

impl CellPatch {
    pub fn set_value(value: impl Into<CellValue>) -> Self {
        Self::Set {
            value: value.into(),
        }
    }

    /// The value that will be stored, `None` for a clear.
    pub fn value(&self) -> Option<&CellValue> {
        match self {
            CellPatch::Set { value } if !value.is_empty() => Some(value),
            _ => None,
        }
    }
}

/// Result of applying a patch set to a package.
#[derive(Debug, Default)]
pub(crate) struct AppliedPatches {
    /// Re-parsed cells of every rewritten worksheet, keyed by part name.
    pub(crate) worksheets: BTreeMap<String, WorksheetCells>,
    /// At least one existing formula was overwritten or cleared.
    pub(crate) formula_removed: bool,
}

/// Rewrite the patched worksheets in place, plus `xl/sharedStrings.xml` when strings
/// are appended and `xl/styles.xml` when a date format has to be added.
pub(crate) fn apply_cell_patches_to_package(
    pkg: &mut XlsxPackage,
    patches: &WorkbookCellPatches,
    date_system: DateSystem,
) -> Result<AppliedPatches, XlsxError> {
    let mut applied = AppliedPatches::default();
    if patches.is_empty() {
        return Ok(applied);
    }

    let workbook_sheets = pkg.workbook_sheets()?;

    let mut shared_strings = pkg
        .part(SHARED_STRINGS_PART)
        .map(SharedStringsState::from_part)
        .transpose()?;
    let mut cell_formats = pkg
        .part(STYLES_PART)
        .map(CellFormatsState::from_part)
        .transpose()?;

    let mut rewritten = Vec::new();
    for (sheet_name, sheet_patches) in patches.sheets() {
        if sheet_patches.is_empty() {
            continue;
        }

        let sheet = workbook_sheets
            .iter()
            .find(|s| s.name == sheet_name)
            .ok_or_else(|| XlsxError::Invalid(format!("unknown sheet name: {sheet_name}")))?;

        let worksheet_part = resolve_worksheet_part(pkg, sheet)?;
        let original = pkg
            .part(&worksheet_part)
            .ok_or_else(|| XlsxError::MissingPart(worksheet_part.clone()))?;

        let mut cells = CellRenderer {
            date_system,
            shared_strings: shared_strings.as_mut(),
            cell_formats: cell_formats.as_mut(),
            prefix: None,
        };
        let (updated, formula_removed) = patch_worksheet_xml(original, sheet_patches, &mut cells)?;
        applied.formula_removed |= formula_removed;

        tracing::debug!(
            sheet = sheet_name,
            part = %worksheet_part,
            cells = sheet_patches.len(),
            "patched worksheet"
        );
        rewritten.push((worksheet_part, updated));
    }

    if let Some(ss) = shared_strings.as_ref() {
        if let Some(updated) = ss.write_if_dirty()? {
            pkg.set_part(SHARED_STRINGS_PART, updated);
        }
    }
    if let Some(formats) = cell_formats.as_ref() {
        if let Some(updated) = formats.write_if_dirty()? {
            pkg.set_part(STYLES_PART, updated);
        }
    }

    // Dimensions are derived from the patched cells, which may reference
    // newly appended shared strings.
    let strings = match pkg.part(SHARED_STRINGS_PART) {
        Some(bytes) => parse_shared_strings(bytes)?,
        None => Vec::new(),
    };
    for (part, xml) in rewritten {
        let cells = parse_worksheet_cells(&xml, &strings)?;
        let xml = rewrite_dimension(&xml, cells.used_range())?;
        pkg.set_part(part.clone(), xml);
        applied.worksheets.insert(part, cells);
    }

    Ok(applied)
}

pub(crate) fn resolve_worksheet_part(
    pkg: &XlsxPackage,
    sheet: &WorkbookSheetInfo,
) -> Result<String, XlsxError> {
    let target = resolve_relationship_target(pkg, WORKBOOK_PART, &sheet.rel_id)?.ok_or_else(|| {
        XlsxError::Invalid(format!("missing worksheet relationship for {}", sheet.name))
    })?;
    // Keep the stored spelling so later writes replace the same ZIP entry.
    Ok(pkg
        .resolve_part_name(&target)
        .map(str::to_string)
        .unwrap_or(target))
}

/// Renders patched `<c>` elements into raw worksheet XML.
struct CellRenderer<'a> {
    date_system: DateSystem,
    shared_strings: Option<&'a mut SharedStringsState>,
    cell_formats: Option<&'a mut CellFormatsState>,
    /// Namespace prefix of the worksheet root, reused for emitted elements.
    prefix: Option<String>,
}

impl CellRenderer<'_> {
    fn tag(&self, local: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{local}"),
            None => local.to_string(),
        }
    }

    /// Append the XML for `patch` at `cell`; `existing` describes the cell being replaced.
    /// Writes nothing for a clear of an unstyled (or absent) cell.
    fn write_cell(
        &mut self,
        out: &mut Vec<u8>,
        cell: CellRef,
        patch: &CellPatch,
        existing: Option<&CellAttrs>,
    ) -> Result<(), XlsxError> {
        let mut style_index = existing
            .and_then(|attrs| attrs.style_index)
            .filter(|s| *s != 0);
        if style_index.is_none() {
            // A serial without a date format would display as a plain number.
            style_index = patch.value().and_then(|value| self.date_style(value));
        }
        let c = self.tag("c");

        let mut xml = format!(r#"<{c} r="{cell}""#);
        if let Some(s) = style_index {
            xml.push_str(&format!(r#" s="{s}""#));
        }

        let Some(value) = patch.value() else {
            if style_index.is_some() {
                xml.push_str("/>");
                out.extend_from_slice(xml.as_bytes());
            }
            return Ok(());
        };

        let existing_t = existing.and_then(|attrs| attrs.cell_type.as_deref());
        let (ty, body) = self.render_value(value, existing_t);
        if let Some(t) = ty {
            xml.push_str(&format!(r#" t="{t}""#));
        }
        xml.push('>');
        xml.push_str(&body);
        xml.push_str(&format!("</{c}>"));
        out.extend_from_slice(xml.as_bytes());
        Ok(())
    }

    fn render_value(
        &mut self,
        value: &CellValue,
        existing_t: Option<&str>,
    ) -> (Option<&'static str>, String) {
        let v = self.tag("v");
        match value {
            CellValue::Empty => (None, String::new()),
            CellValue::Number(n) => self.render_number(*n),
            CellValue::Boolean(b) => (Some("b"), format!("<{v}>{}</{v}>", u8::from(*b))),
            CellValue::String(s) => self.render_string(s, existing_t),
            CellValue::Date(d) => match date_to_serial(*d, self.date_system) {
                Some(serial) => self.render_number(serial),
                None => self.render_string(&value.to_string(), existing_t),
            },
            CellValue::DateTime(dt) => match datetime_to_serial(*dt, self.date_system) {
                Some(serial) => self.render_number(serial),
                None => self.render_string(&value.to_string(), existing_t),
            },
        }
    }

    /// Style applying the built-in date format for `value`, when it renders as a serial.
    fn date_style(&mut self, value: &CellValue) -> Option<u32> {
        let num_fmt = match value {
            CellValue::Date(d) if date_to_serial(*d, self.date_system).is_some() => NUM_FMT_DATE,
            CellValue::DateTime(dt) if datetime_to_serial(*dt, self.date_system).is_some() => {
                NUM_FMT_DATE_TIME
            }
            _ => return None,
        };
        self.cell_formats.as_deref_mut()?.style_for_number_format(num_fmt)
    }

    fn render_number(&self, n: f64) -> (Option<&'static str>, String) {
        let v = self.tag("v");
        if n.is_finite() {
            (None, format!("<{v}>{n}</{v}>"))
        } else {
            (Some("e"), format!("<{v}>{NUM_ERROR}</{v}>"))
        }
    }

    fn render_string(
        &mut self,
        s: &str,
        existing_t: Option<&str>,
    ) -> (Option<&'static str>, String) {
        // Keep inline storage when the template used it; otherwise prefer the
        // shared strings table when the package has one.
        match self.shared_strings.as_deref_mut() {
            Some(ss) if existing_t != Some("inlineStr") => {
                let idx = ss.get_or_insert_plain(s);
                let v = self.tag("v");
                (Some("s"), format!("<{v}>{idx}</{v}>"))
            }
            _ => {
                let is = self.tag("is");
                let t = self.tag("t");
                let s = encode_escapes(s);
                let space = if needs_space_preserve(&s) {
                    r#" xml:space="preserve""#
                } else {
                    ""
                };
                (
                    Some("inlineStr"),
                    format!("<{is}><{t}{space}>{}</{t}></{is}>", escape(&*s)),
                )
            }
        }
    }

    /// Append a brand-new `<row>`; rows that would end up without cells are skipped.
    fn write_new_row(
        &mut self,
        out: &mut Vec<u8>,
        row_num: u32,
        patches: &[(u32, &CellPatch)],
    ) -> Result<(), XlsxError> {
        let mut body = Vec::new();
        for (col, patch) in patches {
            self.write_cell(&mut body, CellRef::new(row_num - 1, *col), patch, None)?;
        }
        if body.is_empty() {
            return Ok(());
        }
        let row = self.tag("row");
        out.extend_from_slice(format!(r#"<{row} r="{row_num}">"#).as_bytes());
        out.extend_from_slice(&body);
        out.extend_from_slice(format!("</{row}>").as_bytes());
        Ok(())
    }
}

/// Patch rows not yet written, in ascending row order.
type PendingRows<'a, 'p> = Peekable<btree_map::Iter<'a, u32, Vec<(u32, &'p CellPatch)>>>;

fn patch_worksheet_xml(
    original: &[u8],
    patches: &WorksheetCellPatches,
    cells: &mut CellRenderer<'_>,
) -> Result<(Vec<u8>, bool), XlsxError> {
    let row_patches = patches.by_row();
    let mut pending = row_patches.iter().peekable();

    let mut reader = Reader::from_reader(original);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(original.len() + patches.len() * 64));

    let mut buf = Vec::new();
    let mut saw_sheet_data = false;
    let mut formula_removed = false;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if local_name(e.name().as_ref()) == b"worksheet" => {
                cells.prefix = name_prefix(e.name().as_ref()).map(str::to_string);
                writer.write_event(Event::Start(e.into_owned()))?;
            }
            Event::Start(e) if local_name(e.name().as_ref()) == b"sheetData" => {
                saw_sheet_data = true;
                writer.write_event(Event::Start(e.into_owned()))?;
                formula_removed |=
                    patch_sheet_data(&mut reader, &mut writer, &mut pending, cells)?;
            }
            Event::Empty(e) if local_name(e.name().as_ref()) == b"sheetData" => {
                saw_sheet_data = true;
                let mut rows = Vec::new();
                for (row, row_cells) in pending.by_ref() {
                    cells.write_new_row(&mut rows, *row, row_cells)?;
                }
                if rows.is_empty() {
                    writer.write_event(Event::Empty(e.into_owned()))?;
                } else {
                    // Convert `<sheetData/>` into `<sheetData>...</sheetData>`.
                    let end = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    writer.write_event(Event::Start(e.into_owned()))?;
                    writer.get_mut().extend_from_slice(&rows);
                    writer.write_event(Event::End(BytesEnd::new(end)))?;
                }
            }
            Event::End(e) if local_name(e.name().as_ref()) == b"worksheet" => {
                if !saw_sheet_data {
                    let mut rows = Vec::new();
                    for (row, row_cells) in pending.by_ref() {
                        cells.write_new_row(&mut rows, *row, row_cells)?;
                    }
                    if !rows.is_empty() {
                        // Insert missing <sheetData> just before </worksheet>.
                        let sheet_data = cells.tag("sheetData");
                        writer.get_mut().extend_from_slice(format!("<{sheet_data}>").as_bytes());
                        writer.get_mut().extend_from_slice(&rows);
                        writer.get_mut().extend_from_slice(format!("</{sheet_data}>").as_bytes());
                    }
                }
                writer.write_event(Event::End(e.into_owned()))?;
            }
            Event::Eof => break,
            ev => writer.write_event(ev.into_owned())?,
        }
        buf.clear();
    }

    Ok((writer.into_inner(), formula_removed))
}

fn patch_sheet_data<R: BufRead>(
    reader: &mut Reader<R>,
    writer: &mut Writer<Vec<u8>>,
    pending: &mut PendingRows<'_, '_>,
    cells: &mut CellRenderer<'_>,
) -> Result<bool, XlsxError> {
    let mut buf = Vec::new();
    let mut formula_removed = false;
    let mut last_row = 0u32;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if local_name(e.name().as_ref()) == b"row" => {
                let row_start = e.into_owned();
                let row_num = parse_row_r(&row_start)?.unwrap_or(last_row + 1);
                last_row = row_num;

                while let Some((row, row_cells)) = pending.next_if(|(row, _)| **row < row_num) {
                    cells.write_new_row(writer.get_mut(), *row, row_cells)?;
                }

                writer.write_event(Event::Start(with_row_ref(row_start, row_num)?))?;
                if let Some((_, row_cells)) = pending.next_if(|(row, _)| **row == row_num) {
                    // patch_row writes the row end.
                    formula_removed |= patch_row(reader, writer, row_num, row_cells, cells)?;
                }
            }
            Event::Empty(e) if local_name(e.name().as_ref()) == b"row" => {
                let row_empty = e.into_owned();
                let row_num = parse_row_r(&row_empty)?.unwrap_or(last_row + 1);
                last_row = row_num;

                while let Some((row, row_cells)) = pending.next_if(|(row, _)| **row < row_num) {
                    cells.write_new_row(writer.get_mut(), *row, row_cells)?;
                }

                let row_empty = with_row_ref(row_empty, row_num)?;
                let mut body = Vec::new();
                if let Some((_, row_cells)) = pending.next_if(|(row, _)| **row == row_num) {
                    for (col, patch) in row_cells {
                        let cell = CellRef::new(row_num - 1, *col);
                        cells.write_cell(&mut body, cell, patch, None)?;
                    }
                }
                if body.is_empty() {
                    writer.write_event(Event::Empty(row_empty))?;
                } else {
                    // Convert `<row/>` into `<row>...</row>`.
                    let end = String::from_utf8_lossy(row_empty.name().as_ref()).into_owned();
                    writer.write_event(Event::Start(row_empty))?;
                    writer.get_mut().extend_from_slice(&body);
                    writer.write_event(Event::End(BytesEnd::new(end)))?;
                }
            }
            Event::End(e) if local_name(e.name().as_ref()) == b"sheetData" => {
                // Insert remaining patch rows before closing </sheetData>.
                for (row, row_cells) in pending.by_ref() {
                    cells.write_new_row(writer.get_mut(), *row, row_cells)?;
                }
                writer.write_event(Event::End(e.into_owned()))?;
                break;
            }
            Event::Eof => {
                return Err(XlsxError::Invalid(
                    "unexpected EOF while patching sheetData".to_string(),
                ))
            }
            ev => writer.write_event(ev.into_owned())?,
        }
        buf.clear();
    }

    Ok(formula_removed)
}

fn patch_row<R: BufRead>(
    reader: &mut Reader<R>,
    writer: &mut Writer<Vec<u8>>,
    row_num: u32,
    patches: &[(u32, &CellPatch)],
    cells: &mut CellRenderer<'_>,
) -> Result<bool, XlsxError> {
    let mut buf = Vec::new();
    let mut patch_idx = 0usize;
    let mut next_col = 0u32;
    let mut formula_removed = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if local_name(e.name().as_ref()) == b"c" => {
                let cell_start = e.into_owned();
                let attrs = CellAttrs::parse(&cell_start, row_num, next_col)?;
                next_col = attrs.cell.col + 1;

                if attrs.cell.row + 1 != row_num {
                    // Mismatched cell refs are preserved unchanged.
                    writer.write_event(Event::Start(cell_start))?;
                } else {
                    let col = attrs.cell.col;
                    flush_patches_before(writer, row_num, col, patches, &mut patch_idx, cells)?;
                    if let Some(patch) = take_patch_at(col, patches, &mut patch_idx) {
                        formula_removed |= skip_cell_body(reader)?;
                        cells.write_cell(writer.get_mut(), attrs.cell, patch, Some(&attrs))?;
                    } else {
                        writer.write_event(Event::Start(with_cell_ref(cell_start, &attrs)?))?;
                    }
                }
            }
            Event::Empty(e) if local_name(e.name().as_ref()) == b"c" => {
                let cell_empty = e.into_owned();
                let attrs = CellAttrs::parse(&cell_empty, row_num, next_col)?;
                next_col = attrs.cell.col + 1;

                if attrs.cell.row + 1 != row_num {
                    writer.write_event(Event::Empty(cell_empty))?;
                } else {
                    let col = attrs.cell.col;
                    flush_patches_before(writer, row_num, col, patches, &mut patch_idx, cells)?;
                    if let Some(patch) = take_patch_at(col, patches, &mut patch_idx) {
                        cells.write_cell(writer.get_mut(), attrs.cell, patch, Some(&attrs))?;
                    } else {
                        writer.write_event(Event::Empty(with_cell_ref(cell_empty, &attrs)?))?;
                    }
                }
            }
            Event::End(e) if local_name(e.name().as_ref()) == b"row" => {
                flush_patches_before(writer, row_num, u32::MAX, patches, &mut patch_idx, cells)?;
                writer.write_event(Event::End(e.into_owned()))?;
                break;
            }
            Event::Eof => {
                return Err(XlsxError::Invalid(
                    "unexpected EOF while patching row".to_string(),
                ))
            }
            ev => writer.write_event(ev.into_owned())?,
        }
        buf.clear();
    }

    Ok(formula_removed)
}

/// Write the pending patches for columns left of `col` as new cells.
fn flush_patches_before(
    writer: &mut Writer<Vec<u8>>,
    row_num: u32,
    col: u32,
    patches: &[(u32, &CellPatch)],
    patch_idx: &mut usize,
    cells: &mut CellRenderer<'_>,
) -> Result<(), XlsxError> {
    while let Some(&(patch_col, patch)) = patches.get(*patch_idx).filter(|(c, _)| *c < col) {
        cells.write_cell(writer.get_mut(), CellRef::new(row_num - 1, patch_col), patch, None)?;
        *patch_idx += 1;
    }
    Ok(())
}

fn take_patch_at<'p>(
    col: u32,
    patches: &[(u32, &'p CellPatch)],
    patch_idx: &mut usize,
) -> Option<&'p CellPatch> {
    let &(patch_col, patch) = patches.get(*patch_idx)?;
    if patch_col != col {
        return None;
    }
    *patch_idx += 1;
    Some(patch)
}

/// Consume the children of a `<c>` being replaced; returns whether it held a formula.
fn skip_cell_body<R: BufRead>(reader: &mut Reader<R>) -> Result<bool, XlsxError> {
    let mut buf = Vec::new();
    let mut had_formula = false;
    let mut depth = 1usize;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(inner) => {
                if depth == 1 && local_name(inner.name().as_ref()) == b"f" {
                    had_formula = true;
                }
                depth += 1;
            }
            Event::Empty(inner) => {
                if depth == 1 && local_name(inner.name().as_ref()) == b"f" {
                    had_formula = true;
                }
            }
            Event::End(inner) => {
                depth = depth.saturating_sub(1);
                if depth == 0 && local_name(inner.name().as_ref()) == b"c" {
                    break;
                }
            }
            Event::Eof => {
                return Err(XlsxError::Invalid(
                    "unexpected EOF while skipping patched cell".to_string(),
                ))
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(had_formula)
}

/// Make an implicit row position explicit so inserted rows cannot shift it.
fn with_row_ref(row: BytesStart<'static>, row_num: u32) -> Result<BytesStart<'static>, XlsxError> {
    if parse_row_r(&row)?.is_some() {
        return Ok(row);
    }
    prepend_ref(&row, &row_num.to_string())
}

/// Make an implicit cell position explicit so inserted or dropped siblings cannot shift it.
fn with_cell_ref(
    cell: BytesStart<'static>,
    attrs: &CellAttrs,
) -> Result<BytesStart<'static>, XlsxError> {
    if attrs.explicit_ref {
        return Ok(cell);
    }
    prepend_ref(&cell, &attrs.cell.to_a1())
}

fn prepend_ref(e: &BytesStart<'_>, reference: &str) -> Result<BytesStart<'static>, XlsxError> {
    let mut out = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    out.push_attribute(("r", reference));
    for attr in e.attributes() {
        let attr = attr?;
        if local_name(attr.key.as_ref()) != b"r" {
            out.push_attribute((attr.key.as_ref(), attr.value.as_ref()));
        }
    }
    Ok(out)
}
