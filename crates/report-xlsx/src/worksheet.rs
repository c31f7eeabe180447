//! Read-side view of a worksheet part.
//!
//! Only `<sheetData>` is interpreted. Rows and cells without an `r` attribute take
//! the position following their previous sibling, as Excel does.

use std::collections::BTreeMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};
use report_model::{CellRef, Range};

use crate::openxml::local_name;
use crate::shared_strings::read_string_item;
use crate::XlsxError;

/// Value of a cell as stored in the worksheet (cached value for formula cells).
#[derive(Clone, Debug, Default, PartialEq)]
pub enum SheetValue {
    #[default]
    Empty,
    Number(f64),
    Boolean(bool),
    Text(String),
    /// Error literal such as `#NUM!`.
    Error(String),
}

impl SheetValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, SheetValue::Empty)
    }
}

/// Everything stored for one `<c>` element.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CellContent {
    pub value: SheetValue,
    /// Formula text without the leading `=`; empty for shared-formula followers.
    pub formula: Option<String>,
    /// Cell XF index (`s` attribute).
    pub style_index: Option<u32>,
}

impl CellContent {
    /// A cell that only carries formatting.
    pub fn is_blank(&self) -> bool {
        self.value.is_empty() && self.formula.is_none()
    }
}

/// Cells of one worksheet keyed in row-major order.
#[derive(Clone, Debug, Default)]
pub(crate) struct WorksheetCells {
    cells: BTreeMap<CellRef, CellContent>,
}

impl WorksheetCells {
    pub(crate) fn get(&self, cell: CellRef) -> Option<&CellContent> {
        self.cells.get(&cell)
    }

    pub(crate) fn len(&self) -> usize {
        self.cells.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (CellRef, &CellContent)> {
        self.cells.iter().map(|(cell, content)| (*cell, content))
    }

    /// Bounding box of every `<c>` element, `None` when the sheet has no cells.
    pub(crate) fn used_range(&self) -> Option<Range> {
        let mut iter = self.cells.keys();
        let first = *iter.next()?;
        let mut range = Range::single(first);
        for cell in iter {
            range.extend_to(*cell);
        }
        Some(range)
    }

    /// Existing cell addresses inside `range`, row-major.
    pub(crate) fn cells_in(&self, range: Range) -> impl Iterator<Item = CellRef> + '_ {
        self.cells
            .range(range.start..=range.end)
            .map(|(cell, _)| *cell)
            .filter(move |cell| range.contains(*cell))
    }
}

pub(crate) fn parse_worksheet_cells(
    xml: &[u8],
    shared_strings: &[String],
) -> Result<WorksheetCells, XlsxError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut cells = BTreeMap::new();

    let mut in_sheet_data = false;
    // 1-based row number of the most recent row, 0 before the first one.
    let mut row_num = 0u32;
    let mut next_col = 0u32;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if local_name(e.name().as_ref()) == b"sheetData" => in_sheet_data = true,
            Event::End(e) if local_name(e.name().as_ref()) == b"sheetData" => in_sheet_data = false,
            Event::Start(e) | Event::Empty(e)
                if in_sheet_data && local_name(e.name().as_ref()) == b"row" =>
            {
                row_num = parse_row_r(&e)?.unwrap_or(row_num + 1);
                next_col = 0;
            }
            Event::Start(e) if in_sheet_data && local_name(e.name().as_ref()) == b"c" => {
                let attrs = CellAttrs::parse(&e, row_num, next_col)?;
                let content = read_cell_body(&mut reader, &attrs, shared_strings)?;
                next_col = attrs.cell.col + 1;
                cells.insert(attrs.cell, content);
            }
            Event::Empty(e) if in_sheet_data && local_name(e.name().as_ref()) == b"c" => {
                let attrs = CellAttrs::parse(&e, row_num, next_col)?;
                next_col = attrs.cell.col + 1;
                cells.insert(
                    attrs.cell,
                    CellContent {
                        style_index: attrs.style_index,
                        ..CellContent::default()
                    },
                );
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(WorksheetCells { cells })
}

/// Attributes of a `<c>` element with the position resolved.
#[derive(Debug)]
pub(crate) struct CellAttrs {
    pub(crate) cell: CellRef,
    /// `true` when the element carried its own `r` attribute.
    pub(crate) explicit_ref: bool,
    pub(crate) cell_type: Option<String>,
    pub(crate) style_index: Option<u32>,
}

impl CellAttrs {
    /// `row_num` is 1-based; `implicit_col` is the zero-based column used when `r` is absent.
    pub(crate) fn parse(
        e: &BytesStart<'_>,
        row_num: u32,
        implicit_col: u32,
    ) -> Result<Self, XlsxError> {
        let mut cell = None;
        let mut cell_type = None;
        let mut style_index = None;
        for attr in e.attributes() {
            let attr = attr?;
            match local_name(attr.key.as_ref()) {
                b"r" => {
                    let value = attr.unescape_value()?;
                    cell = Some(CellRef::from_a1(&value).map_err(|err| {
                        XlsxError::Invalid(format!("invalid cell reference {value:?}: {err}"))
                    })?);
                }
                b"t" => cell_type = Some(attr.unescape_value()?.into_owned()),
                b"s" => style_index = attr.unescape_value()?.parse::<u32>().ok(),
                _ => {}
            }
        }
        let explicit_ref = cell.is_some();
        let cell = cell.unwrap_or(CellRef::new(row_num.saturating_sub(1), implicit_col));
        Ok(Self {
            cell,
            explicit_ref,
            cell_type,
            style_index,
        })
    }
}

pub(crate) fn parse_row_r(row: &BytesStart<'_>) -> Result<Option<u32>, XlsxError> {
    for attr in row.attributes() {
        let attr = attr?;
        if local_name(attr.key.as_ref()) == b"r" {
            return Ok(attr.unescape_value()?.parse::<u32>().ok().filter(|r| *r > 0));
        }
    }
    Ok(None)
}

fn read_cell_body<R: std::io::BufRead>(
    reader: &mut Reader<R>,
    attrs: &CellAttrs,
    shared_strings: &[String],
) -> Result<CellContent, XlsxError> {
    let mut buf = Vec::new();
    let mut formula: Option<String> = None;
    let mut raw_value: Option<String> = None;
    let mut inline: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                match local_name(&name) {
                    b"f" => formula = Some(read_text(reader, b"f")?),
                    b"v" => raw_value = Some(read_text(reader, b"v")?),
                    b"is" => inline = Some(read_string_item(reader, b"is")?),
                    _ => {
                        reader.read_to_end_into(QName(&name), &mut Vec::new())?;
                    }
                }
            }
            Event::Empty(e) => match local_name(e.name().as_ref()) {
                b"f" => formula = Some(String::new()),
                b"is" => inline = Some(String::new()),
                _ => {}
            },
            Event::End(e) if local_name(e.name().as_ref()) == b"c" => break,
            Event::Eof => {
                return Err(XlsxError::Invalid(format!(
                    "unexpected EOF inside cell {}",
                    attrs.cell
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    let value = match (attrs.cell_type.as_deref(), raw_value, inline) {
        (Some("inlineStr"), _, Some(text)) => SheetValue::Text(text),
        (_, None, _) => SheetValue::Empty,
        (Some("s"), Some(raw), _) => {
            let idx: usize = raw.trim().parse().map_err(|_| {
                XlsxError::Invalid(format!("invalid shared string index {raw:?} in {}", attrs.cell))
            })?;
            let text = shared_strings.get(idx).ok_or_else(|| {
                XlsxError::Invalid(format!("shared string index {idx} out of range in {}", attrs.cell))
            })?;
            SheetValue::Text(text.clone())
        }
        (Some("b"), Some(raw), _) => SheetValue::Boolean(raw.trim() == "1"),
        (Some("e"), Some(raw), _) => SheetValue::Error(raw),
        (Some("str" | "inlineStr" | "d"), Some(raw), _) => SheetValue::Text(raw),
        (_, Some(raw), _) => match raw.trim().parse::<f64>() {
            Ok(n) => SheetValue::Number(n),
            Err(_) => SheetValue::Text(raw),
        },
    };

    Ok(CellContent {
        value,
        formula,
        style_index: attrs.style_index,
    })
}

/// Concatenated text content of an element whose start tag was just consumed.
fn read_text<R: std::io::BufRead>(reader: &mut Reader<R>, end_tag: &[u8]) -> Result<String, XlsxError> {
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut depth = 0usize;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(t) => out.push_str(&t.unescape()?),
            Event::CData(t) => out.push_str(&String::from_utf8_lossy(&t.into_inner())),
            Event::Start(_) => depth += 1,
            Event::End(e) => {
                if depth == 0 && local_name(e.name().as_ref()) == end_tag {
                    break;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => {
                return Err(XlsxError::Invalid(format!(
                    "unexpected EOF inside <{}>",
                    String::from_utf8_lossy(end_tag)
                )))
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// Rewrite `<dimension ref>` to `range` (`A1` for an empty sheet).
///
/// Sheets without a `<dimension>` element are returned unchanged.
pub(crate) fn rewrite_dimension(xml: &[u8], range: Option<Range>) -> Result<Vec<u8>, XlsxError> {
    let reference = range.map_or_else(|| "A1".to_string(), |r| r.to_string());

    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));
    let mut buf = Vec::new();
    let mut done = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Empty(e) if !done && local_name(e.name().as_ref()) == b"dimension" => {
                done = true;
                writer.write_event(Event::Empty(with_ref(&e, &reference)?))?;
            }
            Event::Start(e) if !done && local_name(e.name().as_ref()) == b"dimension" => {
                done = true;
                writer.write_event(Event::Start(with_ref(&e, &reference)?))?;
            }
            Event::Eof => break,
            ev => writer.write_event(ev.into_owned())?,
        }
        buf.clear();
    }

    Ok(writer.into_inner())
}

fn with_ref(e: &BytesStart<'_>, reference: &str) -> Result<BytesStart<'static>, XlsxError> {
    let mut out = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    let mut wrote_ref = false;
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"ref" {
            out.push_attribute(("ref", reference));
            wrote_ref = true;
        } else {
            out.push_attribute((attr.key.as_ref(), attr.value.as_ref()));
        }
    }
    if !wrote_ref {
        out.push_attribute(("ref", reference));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
  <dimension ref="A1:C3"/>
  <sheetData>
    <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="inlineStr"><is><t>Inline</t></is></c></row>
    <row r="2"><c r="A2"><v>42.5</v></c><c r="B2" t="b"><v>1</v></c><c r="C2" s="3"/></row>
    <row><c t="e"><v>#DIV/0!</v></c><c><f>SUM(A2:A2)</f><v>42.5</v></c><c t="str"><f>"x"&amp;"y"</f><v>xy</v></c></row>
  </sheetData>
</worksheet>"#;

    #[test]
    fn parses_values_formulas_and_implicit_positions() {
        let cells = parse_worksheet_cells(SHEET.as_bytes(), &["Header".to_string()]).unwrap();
        let at = |a1: &str| cells.get(CellRef::from_a1(a1).unwrap()).cloned().unwrap();

        assert_eq!(at("A1").value, SheetValue::Text("Header".to_string()));
        assert_eq!(at("B1").value, SheetValue::Text("Inline".to_string()));
        assert_eq!(at("A2").value, SheetValue::Number(42.5));
        assert_eq!(at("B2").value, SheetValue::Boolean(true));
        assert!(at("C2").is_blank());
        assert_eq!(at("C2").style_index, Some(3));
        assert_eq!(at("A3").value, SheetValue::Error("#DIV/0!".to_string()));
        assert_eq!(at("B3").formula.as_deref(), Some("SUM(A2:A2)"));
        assert_eq!(at("C3").formula.as_deref(), Some(r#""x"&"y""#));
        assert_eq!(at("C3").value, SheetValue::Text("xy".to_string()));

        assert_eq!(cells.used_range(), Some(Range::from_a1("A1:C3").unwrap()));
    }

    #[test]
    fn cells_in_skips_columns_outside_range() {
        let cells = parse_worksheet_cells(SHEET.as_bytes(), &["Header".to_string()]).unwrap();
        let found: Vec<String> = cells
            .cells_in(Range::from_a1("B1:C2").unwrap())
            .map(|c| c.to_a1())
            .collect();
        assert_eq!(found, vec!["B1", "B2", "C2"]);
    }

    #[test]
    fn empty_sheet_has_no_used_range() {
        let xml = br#"<worksheet><sheetData/></worksheet>"#;
        let cells = parse_worksheet_cells(xml, &[]).unwrap();
        assert_eq!(cells.len(), 0);
        assert_eq!(cells.used_range(), None);
    }

    #[test]
    fn dimension_is_rewritten_in_place() {
        let out = rewrite_dimension(SHEET.as_bytes(), Range::from_a1("A1:B4").ok()).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains(r#"<dimension ref="A1:B4"/>"#), "{out}");

        let out = rewrite_dimension(SHEET.as_bytes(), None).unwrap();
        assert!(String::from_utf8(out).unwrap().contains(r#"<dimension ref="A1"/>"#));
    }
}
