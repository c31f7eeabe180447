//! Recalculation requests written into the package.
//!
//! Formulas are not evaluated here. Instead the workbook is flagged so the
//! consuming application recalculates when it opens the file:
//! - `xl/calcChain.xml` is dropped together with its relationship and content-type
//!   override (a stale chain makes Excel report "repaired records");
//! - `<calcPr fullCalcOnLoad="1"/>` is set in `xl/workbook.xml`;
//! - every pivot cache definition gets `refreshOnLoad="1"` so pivot tables (and the
//!   charts built on them) pick up the new source data.

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::openxml::{
    local_name, name_prefix, parse_relationships, related_parts_of_type, rels_part_name,
    resolve_target, REL_TYPE_CALC_CHAIN, REL_TYPE_PIVOT_CACHE_DEFINITION,
};
use crate::package::WORKBOOK_PART;
use crate::{XlsxError, XlsxPackage};

const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
const DEFAULT_CALC_CHAIN_PART: &str = "xl/calcChain.xml";

/// Workbook children that must come after `<calcPr>` (CT_Workbook sequence order).
const ELEMENTS_AFTER_CALC_PR: &[&[u8]] = &[
    b"oleSize",
    b"customWorkbookViews",
    b"pivotCaches",
    b"smartTagPr",
    b"smartTagTypes",
    b"webPublishing",
    b"fileRecoveryPr",
    b"webPublishObjects",
    b"extLst",
];

/// Which recalculation hints to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecalcPolicy {
    /// Set `<calcPr fullCalcOnLoad="1"/>` in `xl/workbook.xml`.
    pub force_full_calc_on_load: bool,
    /// Remove `xl/calcChain.xml` and the metadata entries pointing at it.
    pub drop_calc_chain: bool,
    /// Set `refreshOnLoad="1"` on every pivot cache definition.
    pub refresh_pivot_caches_on_load: bool,
}

impl RecalcPolicy {
    /// Leave calculation metadata untouched.
    pub const PRESERVE: Self = Self {
        force_full_calc_on_load: false,
        drop_calc_chain: false,
        refresh_pivot_caches_on_load: false,
    };

    /// Applied automatically after existing formulas were overwritten or cleared.
    pub const FORMULA_EDIT: Self = Self {
        force_full_calc_on_load: true,
        drop_calc_chain: true,
        refresh_pivot_caches_on_load: false,
    };
}

impl Default for RecalcPolicy {
    fn default() -> Self {
        Self {
            force_full_calc_on_load: true,
            drop_calc_chain: true,
            refresh_pivot_caches_on_load: true,
        }
    }
}

pub(crate) fn apply_recalc_policy(
    pkg: &mut XlsxPackage,
    policy: RecalcPolicy,
) -> Result<(), XlsxError> {
    if policy.drop_calc_chain {
        drop_calc_chain(pkg)?;
    }

    if policy.force_full_calc_on_load {
        if let Some(workbook_xml) = pkg.part(WORKBOOK_PART) {
            if let Some(updated) = workbook_xml_force_full_calc_on_load(workbook_xml)? {
                pkg.set_part(WORKBOOK_PART, updated);
            }
        }
    }

    if policy.refresh_pivot_caches_on_load {
        for part in related_parts_of_type(pkg, WORKBOOK_PART, REL_TYPE_PIVOT_CACHE_DEFINITION)? {
            let Some(xml) = pkg.part(&part) else {
                tracing::warn!(part = %part, "pivot cache definition referenced but missing");
                continue;
            };
            if let Some(updated) = pivot_cache_definition_refresh_on_load(xml)? {
                tracing::debug!(part = %part, "pivot cache flagged for refresh on load");
                pkg.set_part(part, updated);
            }
        }
    }

    Ok(())
}

fn drop_calc_chain(pkg: &mut XlsxPackage) -> Result<(), XlsxError> {
    let mut targets = related_parts_of_type(pkg, WORKBOOK_PART, REL_TYPE_CALC_CHAIN)?;
    if targets.is_empty() {
        targets.push(DEFAULT_CALC_CHAIN_PART.to_string());
    }

    let mut removed = Vec::new();
    for target in targets {
        if pkg.remove_part(&target).is_some() {
            removed.push(target);
        }
    }

    let rels_part = rels_part_name(WORKBOOK_PART);
    if let Some(rels_xml) = pkg.part(&rels_part) {
        if let Some(updated) = workbook_rels_remove_calc_chain(rels_xml)? {
            pkg.set_part(rels_part, updated);
        }
    }

    if let Some(ct_xml) = pkg.part(CONTENT_TYPES_PART) {
        if let Some(updated) = content_types_remove_parts(ct_xml, &removed)? {
            pkg.set_part(CONTENT_TYPES_PART, updated);
        }
    }

    if !removed.is_empty() {
        tracing::debug!(parts = ?removed, "dropped calculation chain");
    }
    Ok(())
}

/// Rewritten workbook XML with `fullCalcOnLoad="1"`, or `None` when already set.
pub(crate) fn workbook_xml_force_full_calc_on_load(
    workbook_xml: &[u8],
) -> Result<Option<Vec<u8>>, XlsxError> {
    if workbook_has_full_calc_on_load(workbook_xml)? {
        return Ok(None);
    }

    let mut reader = Reader::from_reader(workbook_xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(workbook_xml.len() + 64));

    let mut buf = Vec::new();
    let mut prefix: Option<String> = None;
    let mut depth = 0usize;
    let mut saw_calc_pr = false;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Start(ref e) if depth == 0 && local_name(e.name().as_ref()) == b"workbook" => {
                prefix = name_prefix(e.name().as_ref()).map(str::to_string);
                depth += 1;
                writer.write_event(Event::Start(e.to_owned()))?;
            }
            Event::Empty(ref e) if depth == 1 && local_name(e.name().as_ref()) == b"calcPr" => {
                saw_calc_pr = true;
                writer.write_event(Event::Empty(patched_calc_pr(e)?))?;
            }
            Event::Start(ref e) if depth == 1 && local_name(e.name().as_ref()) == b"calcPr" => {
                saw_calc_pr = true;
                depth += 1;
                writer.write_event(Event::Start(patched_calc_pr(e)?))?;
            }
            Event::Start(ref e) | Event::Empty(ref e)
                if depth == 1
                    && !saw_calc_pr
                    && ELEMENTS_AFTER_CALC_PR.contains(&local_name(e.name().as_ref())) =>
            {
                saw_calc_pr = true;
                writer.write_event(Event::Empty(new_calc_pr(prefix.as_deref())))?;
                if matches!(event, Event::Start(_)) {
                    depth += 1;
                }
                writer.write_event(event.into_owned())?;
            }
            Event::End(ref e) if depth == 1 && local_name(e.name().as_ref()) == b"workbook" => {
                if !saw_calc_pr {
                    writer.write_event(Event::Empty(new_calc_pr(prefix.as_deref())))?;
                }
                depth -= 1;
                writer.write_event(Event::End(e.to_owned()))?;
            }
            Event::Start(_) => {
                depth += 1;
                writer.write_event(event.into_owned())?;
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                writer.write_event(event.into_owned())?;
            }
            Event::Eof => break,
            other => writer.write_event(other.into_owned())?,
        }
        buf.clear();
    }

    Ok(Some(writer.into_inner()))
}

fn workbook_has_full_calc_on_load(bytes: &[u8]) -> Result<bool, XlsxError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if local_name(e.name().as_ref()) == b"calcPr" => {
                for attr in e.attributes() {
                    let attr = attr?;
                    if local_name(attr.key.as_ref()) == b"fullCalcOnLoad" {
                        let v = attr.unescape_value()?;
                        return Ok(v == "1" || v.eq_ignore_ascii_case("true"));
                    }
                }
                return Ok(false);
            }
            Event::Eof => return Ok(false),
            _ => {}
        }
        buf.clear();
    }
}

fn new_calc_pr(prefix: Option<&str>) -> BytesStart<'static> {
    let name = match prefix {
        Some(prefix) => format!("{prefix}:calcPr"),
        None => "calcPr".to_string(),
    };
    let mut calc_pr = BytesStart::new(name);
    calc_pr.push_attribute(("fullCalcOnLoad", "1"));
    calc_pr
}

fn patched_calc_pr(e: &BytesStart<'_>) -> Result<BytesStart<'static>, XlsxError> {
    set_attr(e, "fullCalcOnLoad", "1")
}

/// Copy of `e` with `key` set to `value` (replaced in place or appended).
fn set_attr(e: &BytesStart<'_>, key: &str, value: &str) -> Result<BytesStart<'static>, XlsxError> {
    let mut out = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    let mut replaced = false;
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == key.as_bytes() {
            out.push_attribute((key, value));
            replaced = true;
        } else {
            out.push_attribute((attr.key.as_ref(), attr.value.as_ref()));
        }
    }
    if !replaced {
        out.push_attribute((key, value));
    }
    Ok(out)
}

/// Rewritten pivot cache definition with `refreshOnLoad="1"`, or `None` when already set.
pub(crate) fn pivot_cache_definition_refresh_on_load(
    xml: &[u8],
) -> Result<Option<Vec<u8>>, XlsxError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(xml.len() + 24));
    let mut buf = Vec::new();
    let mut changed = false;
    let mut seen_root = false;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e)
                if !seen_root && local_name(e.name().as_ref()) == b"pivotCacheDefinition" =>
            {
                seen_root = true;
                if refresh_on_load_is_set(e)? {
                    return Ok(None);
                }
                changed = true;
                let patched = set_attr(e, "refreshOnLoad", "1")?;
                match event {
                    Event::Start(_) => writer.write_event(Event::Start(patched))?,
                    _ => writer.write_event(Event::Empty(patched))?,
                }
            }
            Event::Eof => break,
            other => writer.write_event(other.into_owned())?,
        }
        buf.clear();
    }

    Ok(changed.then(|| writer.into_inner()))
}

fn refresh_on_load_is_set(e: &BytesStart<'_>) -> Result<bool, XlsxError> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"refreshOnLoad" {
            let v = attr.unescape_value()?;
            return Ok(v == "1" || v.eq_ignore_ascii_case("true"));
        }
    }
    Ok(false)
}

/// Workbook rels without calcChain relationships, or `None` when there were none.
pub(crate) fn workbook_rels_remove_calc_chain(rels_xml: &[u8]) -> Result<Option<Vec<u8>>, XlsxError> {
    let has_calc_chain = parse_relationships(rels_xml)?
        .iter()
        .any(|rel| rel.type_uri == REL_TYPE_CALC_CHAIN);
    if !has_calc_chain {
        return Ok(None);
    }

    let mut reader = Reader::from_reader(rels_xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(rels_xml.len()));

    let mut buf = Vec::new();
    let mut skipping = false;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Eof => break,
            Event::Start(ref e) if local_name(e.name().as_ref()) == b"Relationship" => {
                if relationship_is_calc_chain(e)? {
                    skipping = true;
                } else {
                    writer.write_event(Event::Start(e.to_owned()))?;
                }
            }
            Event::Empty(ref e) if local_name(e.name().as_ref()) == b"Relationship" => {
                if !relationship_is_calc_chain(e)? {
                    writer.write_event(Event::Empty(e.to_owned()))?;
                }
            }
            Event::End(ref e) if skipping && local_name(e.name().as_ref()) == b"Relationship" => {
                skipping = false;
            }
            ev if skipping => drop(ev),
            ev => writer.write_event(ev.into_owned())?,
        }
        buf.clear();
    }

    Ok(Some(writer.into_inner()))
}

fn relationship_is_calc_chain(e: &BytesStart<'_>) -> Result<bool, XlsxError> {
    for attr in e.attributes() {
        let attr = attr?;
        if local_name(attr.key.as_ref()) == b"Type" {
            return Ok(attr.unescape_value()? == REL_TYPE_CALC_CHAIN);
        }
    }
    Ok(false)
}

/// `[Content_Types].xml` without `<Override>` entries for `removed` parts, or `None`
/// when nothing matched.
fn content_types_remove_parts(ct_xml: &[u8], removed: &[String]) -> Result<Option<Vec<u8>>, XlsxError> {
    if removed.is_empty() {
        return Ok(None);
    }

    let mut reader = Reader::from_reader(ct_xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(ct_xml.len()));

    let mut buf = Vec::new();
    let mut skipping = false;
    let mut changed = false;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Eof => break,
            Event::Start(ref e) if local_name(e.name().as_ref()) == b"Override" => {
                if override_targets(e, removed)? {
                    skipping = true;
                    changed = true;
                } else {
                    writer.write_event(Event::Start(e.to_owned()))?;
                }
            }
            Event::Empty(ref e) if local_name(e.name().as_ref()) == b"Override" => {
                if override_targets(e, removed)? {
                    changed = true;
                } else {
                    writer.write_event(Event::Empty(e.to_owned()))?;
                }
            }
            Event::End(ref e) if skipping && local_name(e.name().as_ref()) == b"Override" => {
                skipping = false;
            }
            ev if skipping => drop(ev),
            ev => writer.write_event(ev.into_owned())?,
        }
        buf.clear();
    }

    Ok(changed.then(|| writer.into_inner()))
}

fn override_targets(e: &BytesStart<'_>, removed: &[String]) -> Result<bool, XlsxError> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"PartName" {
            let part = resolve_target("", &attr.unescape_value()?);
            return Ok(removed
                .iter()
                .any(|r| crate::zip_util::part_names_equivalent(r, &part)));
        }
    }
    Ok(false)
}
