use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::openxml::local_name;
use crate::XlsxError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkbookSheetInfo {
    pub name: String,
    pub sheet_id: u32,
    pub rel_id: String,
}

/// Workbook epoch used for serial date values (`workbookPr/@date1904`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DateSystem {
    #[default]
    Excel1900,
    Excel1904,
}

pub fn parse_workbook_sheets(workbook_xml: &str) -> Result<Vec<WorkbookSheetInfo>, XlsxError> {
    let mut reader = Reader::from_str(workbook_xml);
    reader.config_mut().trim_text(true);

    let mut sheets = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Empty(e) | Event::Start(e) if e.local_name().as_ref() == b"sheet" => {
                sheets.push(parse_sheet_element(&e)?);
            }
            _ => {}
        }
    }

    Ok(sheets)
}

fn parse_sheet_element(e: &BytesStart<'_>) -> Result<WorkbookSheetInfo, XlsxError> {
    let mut name: Option<String> = None;
    let mut sheet_id: Option<u32> = None;
    let mut rel_id: Option<String> = None;

    for attr in e.attributes() {
        let attr = attr?;
        let key = attr.key.as_ref();
        match key {
            b"name" => name = Some(attr.unescape_value()?.into_owned()),
            b"sheetId" => {
                let v = attr.unescape_value()?;
                sheet_id = Some(v.parse::<u32>().map_err(|_| XlsxError::InvalidSheetId)?);
            }
            _ if local_name(key) == b"id" => rel_id = Some(attr.unescape_value()?.into_owned()),
            _ => {}
        }
    }

    Ok(WorkbookSheetInfo {
        name: name.ok_or(XlsxError::MissingAttr("name"))?,
        sheet_id: sheet_id.ok_or(XlsxError::MissingAttr("sheetId"))?,
        rel_id: rel_id.ok_or(XlsxError::MissingAttr("r:id"))?,
    })
}

/// Read the workbook date system from `<workbookPr date1904="...">`.
pub fn parse_workbook_date_system(workbook_xml: &[u8]) -> Result<DateSystem, XlsxError> {
    let mut reader = Reader::from_reader(workbook_xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Empty(e) | Event::Start(e) if e.local_name().as_ref() == b"workbookPr" => {
                for attr in e.attributes() {
                    let attr = attr?;
                    if local_name(attr.key.as_ref()) == b"date1904" {
                        let v = attr.unescape_value()?;
                        if v.as_ref() == "1" || v.eq_ignore_ascii_case("true") {
                            return Ok(DateSystem::Excel1904);
                        }
                    }
                }
                return Ok(DateSystem::Excel1900);
            }
            Event::Eof => return Ok(DateSystem::Excel1900),
            _ => {}
        }
        buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
  <workbookPr date1904="1"/>
  <sheets>
    <sheet name="Master Data" sheetId="1" r:id="rId1"/>
    <sheet name="R&amp;D" sheetId="4" state="hidden" r:id="rId7"/>
  </sheets>
</workbook>"#;

    #[test]
    fn parses_sheet_list_in_order() {
        let sheets = parse_workbook_sheets(WORKBOOK).unwrap();
        assert_eq!(
            sheets,
            vec![
                WorkbookSheetInfo {
                    name: "Master Data".to_string(),
                    sheet_id: 1,
                    rel_id: "rId1".to_string(),
                },
                WorkbookSheetInfo {
                    name: "R&D".to_string(),
                    sheet_id: 4,
                    rel_id: "rId7".to_string(),
                },
            ]
        );
    }

    #[test]
    fn missing_rel_id_is_an_error() {
        let err = parse_workbook_sheets(r#"<workbook><sheets><sheet name="A" sheetId="1"/></sheets></workbook>"#)
            .unwrap_err();
        assert!(matches!(err, XlsxError::MissingAttr("r:id")));
    }

    #[test]
    fn date_system_defaults_to_1900() {
        assert_eq!(
            parse_workbook_date_system(WORKBOOK.as_bytes()).unwrap(),
            DateSystem::Excel1904
        );
        assert_eq!(
            parse_workbook_date_system(b"<workbook><workbookPr/></workbook>").unwrap(),
            DateSystem::Excel1900
        );
        assert_eq!(
            parse_workbook_date_system(b"<workbook/>").unwrap(),
            DateSystem::Excel1900
        );
    }
}
