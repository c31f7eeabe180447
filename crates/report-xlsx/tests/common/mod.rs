//! In-test template builder: a small but realistic report workbook with a data
//! sheet, a summary sheet, a chart over the data, a pivot cache, a calc chain,
//! styles, shared strings and a defined name.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use report_xlsx::{CellContent, Document, SheetValue};
use report_model::CellRef;

pub const DATA_SHEET: &str = "Master Data";
pub const CHART_PART: &str = "xl/charts/chart1.xml";
pub const DRAWING_PART: &str = "xl/drawings/drawing1.xml";
pub const STYLES_PART: &str = "xl/styles.xml";
pub const PIVOT_DEFINITION_PART: &str = "xl/pivotCache/pivotCacheDefinition1.xml";
pub const PIVOT_RECORDS_PART: &str = "xl/pivotCache/pivotCacheRecords1.xml";
pub const DATA_SHEET_PART: &str = "xl/worksheets/sheet1.xml";
pub const SUMMARY_SHEET_PART: &str = "xl/worksheets/sheet2.xml";

const DATE_STYLE: u32 = 1;

#[derive(Debug, Clone, Copy)]
pub struct TemplateOptions {
    /// Last populated row of the data sheet (row 1 is the header).
    pub last_row: u32,
    /// Store text in `xl/sharedStrings.xml` (inline strings otherwise).
    pub shared_strings: bool,
    pub date1904: bool,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            last_row: 50,
            shared_strings: true,
            date1904: false,
        }
    }
}

pub fn template() -> Vec<u8> {
    template_with(TemplateOptions::default())
}

pub fn template_with(opts: TemplateOptions) -> Vec<u8> {
    let mut strings: Vec<String> = Vec::new();
    let sheet1 = data_sheet_xml(opts, &mut strings);

    let mut parts: Vec<(&str, String)> = vec![
        ("[Content_Types].xml", content_types_xml(opts)),
        ("_rels/.rels", ROOT_RELS.to_string()),
        ("xl/workbook.xml", workbook_xml(opts)),
        ("xl/_rels/workbook.xml.rels", workbook_rels_xml(opts)),
        (STYLES_PART, STYLES.to_string()),
        (DATA_SHEET_PART, sheet1),
        ("xl/worksheets/_rels/sheet1.xml.rels", SHEET1_RELS.to_string()),
        (SUMMARY_SHEET_PART, SUMMARY_SHEET.to_string()),
        (DRAWING_PART, DRAWING.to_string()),
        ("xl/drawings/_rels/drawing1.xml.rels", DRAWING_RELS.to_string()),
        (CHART_PART, chart_xml(opts.last_row)),
        (PIVOT_DEFINITION_PART, pivot_definition_xml(opts.last_row)),
        ("xl/pivotCache/_rels/pivotCacheDefinition1.xml.rels", PIVOT_RELS.to_string()),
        (PIVOT_RECORDS_PART, PIVOT_RECORDS.to_string()),
        ("xl/calcChain.xml", calc_chain_xml(opts.last_row)),
    ];
    if opts.shared_strings {
        parts.push(("xl/sharedStrings.xml", shared_strings_xml(&strings)));
    }

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::<()>::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for (name, xml) in parts {
        zip.start_file(name, options).unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

fn text_cell(a1: &str, text: &str, opts: TemplateOptions, strings: &mut Vec<String>) -> String {
    if opts.shared_strings {
        let idx = match strings.iter().position(|s| s == text) {
            Some(idx) => idx,
            None => {
                strings.push(text.to_string());
                strings.len() - 1
            }
        };
        format!(r#"<c r="{a1}" t="s"><v>{idx}</v></c>"#)
    } else {
        format!(r#"<c r="{a1}" t="inlineStr"><is><t>{text}</t></is></c>"#)
    }
}

fn data_sheet_xml(opts: TemplateOptions, strings: &mut Vec<String>) -> String {
    let mut rows = String::new();
    rows.push_str(r#"<row r="1" spans="1:4">"#);
    for (a1, text) in [("A1", "Date"), ("B1", "Qty"), ("C1", "Item"), ("D1", "Total")] {
        rows.push_str(&text_cell(a1, text, opts, strings));
    }
    rows.push_str("</row>");

    for r in 2..=opts.last_row {
        rows.push_str(&format!(r#"<row r="{r}" spans="1:4">"#));
        rows.push_str(&format!(r#"<c r="A{r}" s="{DATE_STYLE}"><v>{}</v></c>"#, 45000 + r));
        rows.push_str(&format!(r#"<c r="B{r}"><v>{}</v></c>"#, r * 10));
        rows.push_str(&text_cell(&format!("C{r}"), &format!("Item {r}"), opts, strings));
        rows.push_str(&format!(r#"<c r="D{r}"><f>B{r}*2</f><v>{}</v></c>"#, r * 20));
        rows.push_str("</row>");
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><dimension ref="A1:D{last}"/><sheetViews><sheetView workbookViewId="0"/></sheetViews><sheetFormatPr defaultRowHeight="15"/><cols><col min="1" max="1" width="12" customWidth="1"/></cols><sheetData>{rows}</sheetData><pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/><drawing r:id="rId1"/></worksheet>"#,
        last = opts.last_row
    )
}

fn shared_strings_xml(strings: &[String]) -> String {
    let items: String = strings
        .iter()
        .map(|s| format!("<si><t>{s}</t></si>"))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="{n}" uniqueCount="{n}">{items}</sst>"#,
        n = strings.len()
    )
}

fn content_types_xml(opts: TemplateOptions) -> String {
    let sst = if opts.shared_strings {
        r#"<Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/>"#
    } else {
        ""
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/worksheets/sheet2.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>{sst}<Override PartName="/xl/drawings/drawing1.xml" ContentType="application/vnd.openxmlformats-officedocument.drawing+xml"/><Override PartName="/xl/charts/chart1.xml" ContentType="application/vnd.openxmlformats-officedocument.drawingml.chart+xml"/><Override PartName="/xl/pivotCache/pivotCacheDefinition1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.pivotCacheDefinition+xml"/><Override PartName="/xl/pivotCache/pivotCacheRecords1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.pivotCacheRecords+xml"/><Override PartName="/xl/calcChain.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.calcChain+xml"/></Types>"#
    )
}

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

fn workbook_xml(opts: TemplateOptions) -> String {
    let date1904 = if opts.date1904 { r#" date1904="1""# } else { "" };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><workbookPr{date1904} defaultThemeVersion="166925"/><bookViews><workbookView xWindow="0" yWindow="0" windowWidth="28800" windowHeight="12300"/></bookViews><sheets><sheet name="Master Data" sheetId="1" r:id="rId1"/><sheet name="Summary" sheetId="2" r:id="rId2"/></sheets><definedNames><definedName name="ReportData">'Master Data'!$A$1:$D${last}</definedName></definedNames><calcPr calcId="191029"/><pivotCaches><pivotCache cacheId="7" r:id="rId6"/></pivotCaches></workbook>"#,
        last = opts.last_row
    )
}

fn workbook_rels_xml(opts: TemplateOptions) -> String {
    let sst = if opts.shared_strings {
        r#"<Relationship Id="rId4" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/>"#
    } else {
        ""
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet2.xml"/><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>{sst}<Relationship Id="rId5" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain" Target="calcChain.xml"/><Relationship Id="rId6" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/pivotCacheDefinition" Target="pivotCache/pivotCacheDefinition1.xml"/></Relationships>"#
    )
}

const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="1"><font><sz val="11"/><name val="Calibri"/></font></fonts><fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills><borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="2"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="14" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"/></cellXfs><cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles></styleSheet>"#;

const SHEET1_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/drawing" Target="../drawings/drawing1.xml"/></Relationships>"#;

const SUMMARY_SHEET: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><dimension ref="A1:B1"/><sheetData><row r="1"><c r="A1" t="inlineStr"><is><t>Total qty</t></is></c><c r="B1"><f>SUM('Master Data'!B:B)</f><v>12740</v></c></row></sheetData></worksheet>"#;

const DRAWING: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<xdr:wsDr xmlns:xdr="http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main"><xdr:twoCellAnchor><xdr:from><xdr:col>5</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>1</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from><xdr:to><xdr:col>12</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>16</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:to><xdr:graphicFrame macro=""><xdr:nvGraphicFramePr><xdr:cNvPr id="2" name="Qty chart"/><xdr:cNvGraphicFramePr/></xdr:nvGraphicFramePr><xdr:xfrm><a:off x="0" y="0"/><a:ext cx="0" cy="0"/></xdr:xfrm><a:graphic><a:graphicData uri="http://schemas.openxmlformats.org/drawingml/2006/chart"><c:chart xmlns:c="http://schemas.openxmlformats.org/drawingml/2006/chart" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" r:id="rId1"/></a:graphicData></a:graphic></xdr:graphicFrame><xdr:clientData/></xdr:twoCellAnchor></xdr:wsDr>"#;

const DRAWING_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/chart" Target="../charts/chart1.xml"/></Relationships>"#;

fn chart_xml(last_row: u32) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<c:chartSpace xmlns:c="http://schemas.openxmlformats.org/drawingml/2006/chart" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main">
  <c:chart>
    <c:plotArea>
      <c:lineChart>
        <c:grouping val="standard"/>
        <c:ser>
          <c:idx val="0"/><c:order val="0"/>
          <c:tx><c:strRef><c:f>'Master Data'!$B$1</c:f></c:strRef></c:tx>
          <c:cat><c:numRef><c:f>'Master Data'!$A$2:$A${last_row}</c:f></c:numRef></c:cat>
          <c:val><c:numRef><c:f>'Master Data'!$B$2:$B${last_row}</c:f></c:numRef></c:val>
        </c:ser>
        <c:axId val="1"/><c:axId val="2"/>
      </c:lineChart>
    </c:plotArea>
  </c:chart>
</c:chartSpace>"#
    )
}

fn pivot_definition_xml(last_row: u32) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<pivotCacheDefinition xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" r:id="rId1" refreshedBy="report" refreshedVersion="8" recordCount="2"><cacheSource type="worksheet"><worksheetSource ref="A1:D{last_row}" sheet="Master Data"/></cacheSource><cacheFields count="1"><cacheField name="Qty" numFmtId="0"><sharedItems containsSemiMixedTypes="0" containsString="0" containsNumber="1" containsInteger="1"/></cacheField></cacheFields></pivotCacheDefinition>"#
    )
}

const PIVOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/pivotCacheRecords" Target="pivotCacheRecords1.xml"/></Relationships>"#;

const PIVOT_RECORDS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<pivotCacheRecords xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="2"><r><n v="20"/></r><r><n v="30"/></r></pivotCacheRecords>"#;

fn calc_chain_xml(last_row: u32) -> String {
    let cells: String = (2..=last_row)
        .map(|r| format!(r#"<c r="D{r}" i="1"/>"#))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<calcChain xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">{cells}<c r="B1" i="2"/></calcChain>"#
    )
}

/// Content of `a1` on `sheet` in a serialized workbook.
pub fn cell_at(bytes: &[u8], sheet: &str, a1: &str) -> Option<CellContent> {
    let mut doc = Document::open(bytes).unwrap();
    let handle = doc.find_sheet(sheet).unwrap();
    doc.cell(&handle, CellRef::from_a1(a1).unwrap()).unwrap()
}

/// Value of every cell in `range` (row-major) as display text, `None` for empty cells.
pub fn values_in(bytes: &[u8], sheet: &str, range: &str) -> Vec<Option<String>> {
    let mut doc = Document::open(bytes).unwrap();
    let handle = doc.find_sheet(sheet).unwrap();
    report_model::Range::from_a1(range)
        .unwrap()
        .cells()
        .map(|cell| {
            doc.cell(&handle, cell)
                .unwrap()
                .and_then(|content| display(&content.value))
        })
        .collect()
}

pub fn display(value: &SheetValue) -> Option<String> {
    match value {
        SheetValue::Empty => None,
        SheetValue::Number(n) => Some(n.to_string()),
        SheetValue::Boolean(b) => Some(b.to_string()),
        SheetValue::Text(s) | SheetValue::Error(s) => Some(s.clone()),
    }
}

/// Raw bytes of one package part.
pub fn part(bytes: &[u8], name: &str) -> Option<Vec<u8>> {
    report_xlsx::XlsxPackage::from_bytes(bytes)
        .unwrap()
        .part(name)
        .map(<[u8]>::to_vec)
}

pub fn part_text(bytes: &[u8], name: &str) -> String {
    String::from_utf8(part(bytes, name).unwrap_or_default()).unwrap()
}
