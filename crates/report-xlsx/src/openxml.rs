//! Relationship (`.rels`) parsing and OPC target resolution.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::package::{XlsxError, XlsxPackage};

pub(crate) const REL_TYPE_PIVOT_CACHE_DEFINITION: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/pivotCacheDefinition";
pub(crate) const REL_TYPE_CALC_CHAIN: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub type_uri: String,
    pub target: String,
    pub target_mode: Option<String>,
}

impl Relationship {
    pub fn is_external(&self) -> bool {
        self.target_mode
            .as_deref()
            .is_some_and(|mode| mode.trim().eq_ignore_ascii_case("External"))
    }
}

/// Name of the relationships part that belongs to `part_name`
/// (`xl/workbook.xml` -> `xl/_rels/workbook.xml.rels`).
pub fn rels_part_name(part_name: &str) -> String {
    match part_name.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part_name}.rels"),
    }
}

/// Resolve relationship `relationship_id` of `part_name` to a concrete part name.
///
/// Returns `Ok(None)` for external targets, unknown ids or a missing `.rels` part.
pub fn resolve_relationship_target(
    package: &XlsxPackage,
    part_name: &str,
    relationship_id: &str,
) -> Result<Option<String>, XlsxError> {
    let Some(rels_bytes) = package.part(&rels_part_name(part_name)) else {
        return Ok(None);
    };
    let Some(rel) = parse_relationships(rels_bytes)?
        .into_iter()
        .find(|rel| rel.id == relationship_id)
    else {
        return Ok(None);
    };
    if rel.is_external() {
        return Ok(None);
    }
    let target = resolve_target(part_name, &rel.target);
    Ok((!target.is_empty()).then_some(target))
}

/// Resolve every internal relationship of `part_name` with the given type.
pub(crate) fn related_parts_of_type(
    package: &XlsxPackage,
    part_name: &str,
    type_uri: &str,
) -> Result<Vec<String>, XlsxError> {
    let Some(rels_bytes) = package.part(&rels_part_name(part_name)) else {
        return Ok(Vec::new());
    };
    Ok(parse_relationships(rels_bytes)?
        .into_iter()
        .filter(|rel| rel.type_uri == type_uri && !rel.is_external())
        .map(|rel| resolve_target(part_name, &rel.target))
        .collect())
}

/// Resolve a relationship target URI against the part that owns the relationship.
pub fn resolve_target(base_part: &str, target: &str) -> String {
    // OPC part names never carry URI fragments.
    let target = target.split_once('#').map_or(target, |(base, _)| base);
    if target.is_empty() {
        return base_part.trim_start_matches('/').to_string();
    }

    let mut components: Vec<&str> = match target.strip_prefix('/') {
        Some(_) => Vec::new(),
        None => base_part
            .rsplit_once('/')
            .map(|(dir, _)| dir.split('/').filter(|s| !s.is_empty()).collect())
            .unwrap_or_default(),
    };

    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            _ => components.push(segment),
        }
    }

    components.join("/")
}

pub fn parse_relationships(xml: &[u8]) -> Result<Vec<Relationship>, XlsxError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut relationships = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if local_name(e.name().as_ref()) == b"Relationship" => {
                let mut id = None;
                let mut type_uri = None;
                let mut target = None;
                let mut target_mode = None;
                for attr in e.attributes() {
                    let attr = attr?;
                    let value = attr.unescape_value()?.into_owned();
                    match local_name(attr.key.as_ref()) {
                        b"Id" => id = Some(value),
                        b"Type" => type_uri = Some(value),
                        b"Target" => target = Some(value),
                        b"TargetMode" => target_mode = Some(value),
                        _ => {}
                    }
                }
                relationships.push(Relationship {
                    id: id.ok_or(XlsxError::MissingAttr("Id"))?,
                    type_uri: type_uri.ok_or(XlsxError::MissingAttr("Type"))?,
                    target: target.ok_or(XlsxError::MissingAttr("Target"))?,
                    target_mode,
                });
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(relationships)
}

/// Strip any namespace prefix from a qualified XML name.
pub(crate) fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|b| *b == b':') {
        Some(idx) => &name[idx + 1..],
        None => name,
    }
}

/// Namespace prefix of a qualified XML name (`x:workbook` -> `Some("x")`).
pub(crate) fn name_prefix(name: &[u8]) -> Option<&str> {
    let idx = name.iter().position(|b| *b == b':')?;
    std::str::from_utf8(&name[..idx]).ok()
}
