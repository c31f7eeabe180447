use std::collections::BTreeMap;
use std::io::{Cursor, Write};

use thiserror::Error;

use crate::sheet_metadata::{parse_workbook_sheets, WorkbookSheetInfo};
use crate::zip_util::{
    part_names_equivalent, read_entry_with_budget, ZipInflateBudget,
    MAX_XLSX_PACKAGE_PART_BYTES, MAX_XLSX_PACKAGE_TOTAL_BYTES,
};

pub(crate) const WORKBOOK_PART: &str = "xl/workbook.xml";

#[derive(Debug, Error)]
pub enum XlsxError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("utf-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("xml attribute error: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
    #[error("missing required attribute: {0}")]
    MissingAttr(&'static str),
    #[error("missing xlsx part: {0}")]
    MissingPart(String),
    #[error("invalid xlsx: {0}")]
    Invalid(String),
    #[error("xlsx package part is too large to load safely: {part} is {size} bytes (max {max} bytes)")]
    PartTooLarge { part: String, size: u64, max: u64 },
    #[error("xlsx package is too large to load safely: {total} bytes uncompressed (max {max})")]
    PackageTooLarge { total: u64, max: u64 },
    #[error("invalid sheetId value")]
    InvalidSheetId,
}

/// Size limits enforced by [`XlsxPackage::from_bytes_limited`].
#[derive(Debug, Clone, Copy)]
pub struct XlsxPackageLimits {
    /// Maximum allowed uncompressed bytes for any single part.
    pub max_part_bytes: u64,
    /// Maximum allowed uncompressed bytes across the whole package.
    pub max_total_bytes: u64,
}

impl Default for XlsxPackageLimits {
    fn default() -> Self {
        Self {
            max_part_bytes: MAX_XLSX_PACKAGE_PART_BYTES,
            max_total_bytes: MAX_XLSX_PACKAGE_TOTAL_BYTES,
        }
    }
}

/// In-memory Open Packaging Convention container: part name -> bytes.
///
/// Parts are kept verbatim. Writing re-packs the ZIP container in the original
/// entry order; any part that was not replaced through [`XlsxPackage::set_part`]
/// is written back byte-for-byte.
#[derive(Debug, Clone)]
pub struct XlsxPackage {
    parts: BTreeMap<String, Vec<u8>>,
    /// ZIP entry order as read; parts added later are appended.
    order: Vec<String>,
}

impl XlsxPackage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, XlsxError> {
        Self::from_bytes_limited(bytes, XlsxPackageLimits::default())
    }

    pub fn from_bytes_limited(bytes: &[u8], limits: XlsxPackageLimits) -> Result<Self, XlsxError> {
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes))?;

        let mut parts = BTreeMap::new();
        let mut order = Vec::with_capacity(zip.len());
        let mut budget = ZipInflateBudget::new(limits.max_total_bytes);
        for i in 0..zip.len() {
            let file = zip.by_index(i)?;
            if !file.is_file() {
                continue;
            }

            let name = file.name().to_string();
            let declared = file.size();
            let buf =
                read_entry_with_budget(file, &name, declared, limits.max_part_bytes, &mut budget)?;
            if parts.insert(name.clone(), buf).is_none() {
                order.push(name);
            }
        }

        Ok(Self { parts, order })
    }

    /// Look up a part by name.
    ///
    /// Exact names win; otherwise non-canonical producer output (leading `/`, `\`
    /// separators, ASCII case differences) is matched without renaming the stored part.
    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.resolve_part_name(name)
            .and_then(|key| self.parts.get(key))
            .map(Vec::as_slice)
    }

    /// The stored name of the part equivalent to `name`, if any.
    pub fn resolve_part_name(&self, name: &str) -> Option<&str> {
        if let Some((key, _)) = self.parts.get_key_value(name) {
            return Some(key.as_str());
        }
        self.parts
            .keys()
            .find(|key| part_names_equivalent(key, name))
            .map(String::as_str)
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Replace (or add) a part. An existing equivalent name keeps its stored spelling.
    pub fn set_part(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        let name = name.into();
        let key = self
            .resolve_part_name(&name)
            .map(str::to_string)
            .unwrap_or(name);
        if self.parts.insert(key.clone(), bytes).is_none() {
            self.order.push(key);
        }
    }

    /// Remove a part, returning its bytes when it existed.
    pub fn remove_part(&mut self, name: &str) -> Option<Vec<u8>> {
        let key = self.resolve_part_name(name)?.to_string();
        self.order.retain(|n| *n != key);
        self.parts.remove(&key)
    }

    pub fn write_to_bytes(&self) -> Result<Vec<u8>, XlsxError> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> Result<(), XlsxError> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::FileOptions::<()>::default()
            .compression_method(zip::CompressionMethod::Deflated);

        for name in &self.order {
            let Some(bytes) = self.parts.get(name) else {
                continue;
            };
            zip.start_file(name.as_str(), options)?;
            zip.write_all(bytes)?;
        }

        let cursor = zip.finish()?;
        w.write_all(&cursor.into_inner())?;
        Ok(())
    }

    /// Parse the ordered list of workbook sheets from `xl/workbook.xml`.
    pub fn workbook_sheets(&self) -> Result<Vec<WorkbookSheetInfo>, XlsxError> {
        let workbook_xml = self
            .part(WORKBOOK_PART)
            .ok_or_else(|| XlsxError::MissingPart(WORKBOOK_PART.to_string()))?;
        let workbook_xml = String::from_utf8(workbook_xml.to_vec())?;
        parse_workbook_sheets(&workbook_xml)
    }
}
