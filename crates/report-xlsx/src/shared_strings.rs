//! Shared strings table (`xl/sharedStrings.xml`).
//!
//! Reads resolve each `<si>` to its visible plain text. Writes are append-only:
//! existing `<si>` items (including rich-text runs and phonetic data) are copied
//! through untouched and new plain items are added before `</sst>`, so indices
//! referenced by other sheets never move.
//!
//! Characters XML 1.0 cannot carry are stored as `_xHHHH_` escapes, and a literal
//! text that looks like an escape has its leading `_` escaped as `_x005F_`.

use std::borrow::Cow;
use std::collections::HashMap;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::openxml::local_name;
use crate::XlsxError;

pub(crate) const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";

/// Parse the visible text of every `<si>` item, in index order.
pub fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, XlsxError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut items = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if local_name(e.name().as_ref()) == b"si" => {
                items.push(read_string_item(&mut reader, b"si")?);
            }
            Event::Empty(e) if local_name(e.name().as_ref()) == b"si" => items.push(String::new()),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(items)
}

/// Collect the visible text of a string item (`<si>` or `<is>`) whose start tag was
/// just consumed. `<t>` is visible when it is a direct child or inside `<r>`; phonetic
/// runs (`<rPh>`) and extension subtrees are skipped.
pub(crate) fn read_string_item<R: std::io::BufRead>(
    reader: &mut Reader<R>,
    end_tag: &[u8],
) -> Result<String, XlsxError> {
    let mut buf = Vec::new();
    let mut out = String::new();
    // Stack of local names below the item element.
    let mut path: Vec<Vec<u8>> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => path.push(local_name(e.name().as_ref()).to_vec()),
            Event::End(e) => {
                if path.is_empty() && local_name(e.name().as_ref()) == end_tag {
                    break;
                }
                path.pop();
            }
            Event::Text(t) if text_is_visible(&path) => out.push_str(&t.unescape()?),
            Event::CData(t) if text_is_visible(&path) => {
                out.push_str(&String::from_utf8_lossy(&t.into_inner()));
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

    if let Cow::Owned(decoded) = decode_escapes(&out) {
        return Ok(decoded);
    }
    Ok(out)
}

fn text_is_visible(path: &[Vec<u8>]) -> bool {
    match path {
        [t] => t.as_slice() == b"t",
        [r, t] => r.as_slice() == b"r" && t.as_slice() == b"t",
        _ => false,
    }
}

/// Append-only view of the shared strings table used while patching worksheets.
#[derive(Debug)]
pub(crate) struct SharedStringsState {
    original: Vec<u8>,
    existing_len: u32,
    plain_index: HashMap<String, u32>,
    appended: Vec<String>,
    references_added: u32,
}

impl SharedStringsState {
    pub(crate) fn from_part(bytes: &[u8]) -> Result<Self, XlsxError> {
        let items = parse_shared_strings(bytes)?;
        let mut plain_index = HashMap::with_capacity(items.len());
        for (idx, text) in items.iter().enumerate() {
            plain_index.entry(text.clone()).or_insert(idx as u32);
        }
        Ok(Self {
            original: bytes.to_vec(),
            existing_len: items.len() as u32,
            plain_index,
            appended: Vec::new(),
            references_added: 0,
        })
    }

    /// Index of a plain string item, appending one when needed.
    ///
    /// Reuse is keyed on visible text, so an existing rich-text item with the same
    /// text is shared and its formatting shows through.
    pub(crate) fn get_or_insert_plain(&mut self, text: &str) -> u32 {
        self.references_added += 1;
        if let Some(idx) = self.plain_index.get(text).copied() {
            return idx;
        }
        let idx = self.existing_len + self.appended.len() as u32;
        self.appended.push(text.to_string());
        self.plain_index.insert(text.to_string(), idx);
        idx
    }

    /// Rewritten part bytes, or `None` when nothing was appended.
    pub(crate) fn write_if_dirty(&self) -> Result<Option<Vec<u8>>, XlsxError> {
        if self.appended.is_empty() {
            return Ok(None);
        }

        let mut reader = Reader::from_reader(self.original.as_slice());
        reader.config_mut().trim_text(false);
        let mut writer = Writer::new(Vec::with_capacity(
            self.original.len() + self.appended.len() * 32,
        ));
        let mut buf = Vec::new();
        let mut item_tag = "si".to_string();
        let mut text_tag = "t".to_string();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) if local_name(e.name().as_ref()) == b"sst" => {
                    (item_tag, text_tag) = prefixed_item_tags(&e);
                    writer.write_event(Event::Start(self.patched_sst(&e)?))?;
                }
                Event::Empty(e) if local_name(e.name().as_ref()) == b"sst" => {
                    (item_tag, text_tag) = prefixed_item_tags(&e);
                    let start = self.patched_sst(&e)?;
                    let end = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    writer.write_event(Event::Start(start))?;
                    self.write_appended(&mut writer, &item_tag, &text_tag)?;
                    writer.write_event(Event::End(BytesEnd::new(end)))?;
                }
                Event::End(e) if local_name(e.name().as_ref()) == b"sst" => {
                    self.write_appended(&mut writer, &item_tag, &text_tag)?;
                    writer.write_event(Event::End(e.into_owned()))?;
                }
                Event::Eof => break,
                ev => writer.write_event(ev.into_owned())?,
            }
            buf.clear();
        }

        Ok(Some(writer.into_inner()))
    }

    fn patched_sst(&self, e: &BytesStart<'_>) -> Result<BytesStart<'static>, XlsxError> {
        let unique = self.existing_len + self.appended.len() as u32;
        let mut out = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
        for attr in e.attributes() {
            let attr = attr?;
            match attr.key.as_ref() {
                b"uniqueCount" => {
                    out.push_attribute(("uniqueCount", unique.to_string().as_str()));
                }
                b"count" => {
                    let previous: u32 = attr.unescape_value()?.parse().unwrap_or(0);
                    let count = previous.saturating_add(self.references_added);
                    out.push_attribute(("count", count.to_string().as_str()));
                }
                _ => out.push_attribute((attr.key.as_ref(), attr.value.as_ref())),
            }
        }
        Ok(out)
    }

    fn write_appended(
        &self,
        writer: &mut Writer<Vec<u8>>,
        item_tag: &str,
        text_tag: &str,
    ) -> Result<(), XlsxError> {
        for text in &self.appended {
            writer.write_event(Event::Start(BytesStart::new(item_tag)))?;
            let text = encode_escapes(text);
            let mut t = BytesStart::new(text_tag);
            if needs_space_preserve(&text) {
                t.push_attribute(("xml:space", "preserve"));
            }
            writer.write_event(Event::Start(t))?;
            writer.write_event(Event::Text(BytesText::new(&text)))?;
            writer.write_event(Event::End(BytesEnd::new(text_tag)))?;
            writer.write_event(Event::End(BytesEnd::new(item_tag)))?;
        }
        Ok(())
    }
}

fn prefixed_item_tags(sst: &BytesStart<'_>) -> (String, String) {
    match crate::openxml::name_prefix(sst.name().as_ref()) {
        Some(prefix) => (format!("{prefix}:si"), format!("{prefix}:t")),
        None => ("si".to_string(), "t".to_string()),
    }
}

pub(crate) fn needs_space_preserve(text: &str) -> bool {
    text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace)
}

/// Whether `c` must be written as `_xHHHH_`. CR is included since XML parsers
/// fold it into LF.
fn must_escape(c: char) -> bool {
    (c < ' ' && c != '\t' && c != '\n') || c == '\u{FFFE}' || c == '\u{FFFF}'
}

/// `s` starts with `_xHHHH_`.
fn starts_with_escape(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 7
        && b[0] == b'_'
        && b[1] == b'x'
        && b[2..6].iter().all(u8::is_ascii_hexdigit)
        && b[6] == b'_'
}

/// Text as stored in `<t>`: illegal characters and escape look-alikes escaped.
pub(crate) fn encode_escapes(text: &str) -> Cow<'_, str> {
    let escaped_at =
        |i: usize, c: char| must_escape(c) || (c == '_' && starts_with_escape(&text[i..]));
    if !text.char_indices().any(|(i, c)| escaped_at(i, c)) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 14);
    for (i, c) in text.char_indices() {
        if escaped_at(i, c) {
            out.push_str(&format!("_x{:04X}_", u32::from(c)));
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

/// Inverse of [`encode_escapes`]. Escapes naming an invalid code point stay literal.
pub(crate) fn decode_escapes(text: &str) -> Cow<'_, str> {
    if !text.contains("_x") {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find("_x") {
        out.push_str(&rest[..pos]);
        let candidate = &rest[pos..];
        let decoded = starts_with_escape(candidate)
            .then(|| u32::from_str_radix(&candidate[2..6], 16).ok())
            .flatten()
            .and_then(char::from_u32);
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &candidate[7..];
            }
            None => {
                out.push_str("_x");
                rest = &candidate[2..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}
