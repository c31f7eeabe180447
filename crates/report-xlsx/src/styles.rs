//! Cell formats (`xl/styles.xml`) required by written values.
//!
//! Only `cellXfs` is touched. Existing `<xf>` records keep their indices and new
//! records are appended, so every `s` attribute already in the workbook still
//! points at the same format.

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::openxml::{local_name, name_prefix};
use crate::XlsxError;

pub(crate) const STYLES_PART: &str = "xl/styles.xml";

/// Built-in number format 14: locale short date.
pub(crate) const NUM_FMT_DATE: u32 = 14;
/// Built-in number format 22: short date with `h:mm`.
pub(crate) const NUM_FMT_DATE_TIME: u32 = 22;

/// Append-only view of `cellXfs` used while patching worksheets.
#[derive(Debug)]
pub(crate) struct CellFormatsState {
    original: Vec<u8>,
    has_cell_xfs: bool,
    existing_len: u32,
    /// `(xf index, numFmtId)` of records that only set a number format.
    plain_formats: Vec<(u32, u32)>,
    appended: Vec<u32>,
}

impl CellFormatsState {
    pub(crate) fn from_part(bytes: &[u8]) -> Result<Self, XlsxError> {
        let mut reader = Reader::from_reader(bytes);
        reader.config_mut().trim_text(false);
        let mut buf = Vec::new();
        let mut in_cell_xfs = false;
        let mut has_cell_xfs = false;
        let mut existing_len = 0u32;
        let mut plain_formats = Vec::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) if local_name(e.name().as_ref()) == b"cellXfs" => {
                    in_cell_xfs = true;
                    has_cell_xfs = true;
                }
                Event::Empty(e) if local_name(e.name().as_ref()) == b"cellXfs" => {
                    has_cell_xfs = true;
                }
                Event::End(e) if local_name(e.name().as_ref()) == b"cellXfs" => in_cell_xfs = false,
                // An xf with children carries alignment or protection.
                Event::Start(e) if in_cell_xfs && local_name(e.name().as_ref()) == b"xf" => {
                    existing_len += 1;
                }
                Event::Empty(e) if in_cell_xfs && local_name(e.name().as_ref()) == b"xf" => {
                    if let Some(num_fmt) = plain_number_format(&e)? {
                        plain_formats.push((existing_len, num_fmt));
                    }
                    existing_len += 1;
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        Ok(Self {
            original: bytes.to_vec(),
            has_cell_xfs,
            existing_len,
            plain_formats,
            appended: Vec::new(),
        })
    }

    /// Index of an xf record that applies `num_fmt` and nothing else, appending one
    /// when needed. `None` when the stylesheet has no `cellXfs` to extend.
    pub(crate) fn style_for_number_format(&mut self, num_fmt: u32) -> Option<u32> {
        if !self.has_cell_xfs {
            return None;
        }
        if let Some((idx, _)) = self.plain_formats.iter().find(|(_, id)| *id == num_fmt) {
            return Some(*idx);
        }
        let idx = self.existing_len + self.appended.len() as u32;
        self.appended.push(num_fmt);
        self.plain_formats.push((idx, num_fmt));
        Some(idx)
    }

    /// Rewritten part bytes, or `None` when nothing was appended.
    pub(crate) fn write_if_dirty(&self) -> Result<Option<Vec<u8>>, XlsxError> {
        if self.appended.is_empty() {
            return Ok(None);
        }

        let mut reader = Reader::from_reader(self.original.as_slice());
        reader.config_mut().trim_text(false);
        let mut writer = Writer::new(Vec::with_capacity(
            self.original.len() + self.appended.len() * 96,
        ));
        let mut buf = Vec::new();
        let mut xf_tag = "xf".to_string();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) if local_name(e.name().as_ref()) == b"cellXfs" => {
                    xf_tag = prefixed_xf_tag(&e);
                    writer.write_event(Event::Start(self.patched_cell_xfs(&e)?))?;
                }
                Event::Empty(e) if local_name(e.name().as_ref()) == b"cellXfs" => {
                    xf_tag = prefixed_xf_tag(&e);
                    let end = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    writer.write_event(Event::Start(self.patched_cell_xfs(&e)?))?;
                    self.write_appended(&mut writer, &xf_tag)?;
                    writer.write_event(Event::End(BytesEnd::new(end)))?;
                }
                Event::End(e) if local_name(e.name().as_ref()) == b"cellXfs" => {
                    self.write_appended(&mut writer, &xf_tag)?;
                    writer.write_event(Event::End(e.into_owned()))?;
                }
                Event::Eof => break,
                ev => writer.write_event(ev.into_owned())?,
            }
            buf.clear();
        }

        Ok(Some(writer.into_inner()))
    }

    fn patched_cell_xfs(&self, e: &BytesStart<'_>) -> Result<BytesStart<'static>, XlsxError> {
        let count = (self.existing_len + self.appended.len() as u32).to_string();
        let mut out = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
        let mut replaced = false;
        for attr in e.attributes() {
            let attr = attr?;
            if attr.key.as_ref() == b"count" {
                out.push_attribute(("count", count.as_str()));
                replaced = true;
            } else {
                out.push_attribute((attr.key.as_ref(), attr.value.as_ref()));
            }
        }
        if !replaced {
            out.push_attribute(("count", count.as_str()));
        }
        Ok(out)
    }

    fn write_appended(&self, writer: &mut Writer<Vec<u8>>, xf_tag: &str) -> Result<(), XlsxError> {
        for num_fmt in &self.appended {
            let mut xf = BytesStart::new(xf_tag);
            xf.push_attribute(("numFmtId", num_fmt.to_string().as_str()));
            xf.push_attribute(("fontId", "0"));
            xf.push_attribute(("fillId", "0"));
            xf.push_attribute(("borderId", "0"));
            xf.push_attribute(("xfId", "0"));
            xf.push_attribute(("applyNumberFormat", "1"));
            writer.write_event(Event::Empty(xf))?;
        }
        Ok(())
    }
}

/// `numFmtId` of an xf that uses the default font, fill and border.
fn plain_number_format(xf: &BytesStart<'_>) -> Result<Option<u32>, XlsxError> {
    let mut num_fmt = 0u32;
    for attr in xf.attributes() {
        let attr = attr?;
        let value = attr.unescape_value()?;
        match attr.key.as_ref() {
            b"numFmtId" => match value.parse() {
                Ok(id) => num_fmt = id,
                Err(_) => return Ok(None),
            },
            b"fontId" | b"fillId" | b"borderId" if value != "0" => return Ok(None),
            _ => {}
        }
    }
    Ok(Some(num_fmt))
}

fn prefixed_xf_tag(cell_xfs: &BytesStart<'_>) -> String {
    match name_prefix(cell_xfs.name().as_ref()) {
        Some(prefix) => format!("{prefix}:xf"),
        None => "xf".to_string(),
    }
}
