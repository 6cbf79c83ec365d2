//! Per-format text extraction.
//!
//! One function per [`DocumentKind`], selected once by [`extract`]. Office
//! formats are read straight from their ZIP/XML parts with `zip` and
//! `quick-xml`; PDFs go through `pdf-extract`; notebooks are parsed with
//! `serde_json`. Output is raw text: cleanup happens in
//! [`normalize`](crate::normalize).

use std::io::Read;

use knowledge_harness_core::models::DocumentKind;
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extraction error. Never a panic: the pipeline records it and skips the file.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("corrupt archive: {0}")]
    Zip(String),
    #[error("malformed XML: {0}")]
    Xml(String),
    #[error("malformed notebook: {0}")]
    Notebook(String),
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("no content extracted")]
    Empty,
}

impl From<zip::result::ZipError> for ExtractError {
    fn from(e: zip::result::ZipError) -> Self {
        ExtractError::Zip(e.to_string())
    }
}

impl From<quick_xml::Error> for ExtractError {
    fn from(e: quick_xml::Error) -> Self {
        ExtractError::Xml(e.to_string())
    }
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

/// Extract raw text from file bytes according to the document kind.
pub fn extract(bytes: &[u8], kind: &DocumentKind) -> Result<String, ExtractError> {
    match kind {
        DocumentKind::PlainText | DocumentKind::SourceCode { .. } => Ok(decode_text(bytes)),
        DocumentKind::RichDocument => extract_docx(bytes),
        DocumentKind::SlideDeck => extract_pptx(bytes),
        DocumentKind::Spreadsheet => extract_xlsx(bytes),
        DocumentKind::Notebook => extract_notebook(bytes),
        DocumentKind::Pdf => extract_pdf(bytes),
    }
}

/// UTF-8 with a single-byte (Latin-1) fallback. Never fails.
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// pdf-extract panics on some malformed files; those become errors too.
fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(result) => result.map_err(|e| ExtractError::Pdf(e.to_string())),
        Err(_) => Err(ExtractError::Pdf("parser panicked on malformed input".to_string())),
    }
}

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    Ok(zip::ZipArchive::new(std::io::Cursor::new(bytes))?)
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive.by_name(name)?;
    let mut out = Vec::new();
    entry.take(max_bytes).read_to_end(&mut out)?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Zip(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// Numbered part names (`prefix<N>.xml`) in numeric order.
fn numbered_parts(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key || a.key.local_name().as_ref() == key)
        .map(|a| String::from_utf8_lossy(a.value.as_ref()).into_owned())
}

/// Paragraphs, then table rows as `cell | cell`, joined by blank lines.
fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;

    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut paragraphs: Vec<String> = Vec::new();
    let mut rows: Vec<String> = Vec::new();
    let mut table_depth = 0usize;
    let mut in_text = false;
    let mut para = String::new();
    let mut cell = String::new();
    let mut row: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"tbl" => table_depth += 1,
                b"tr" => row.clear(),
                b"tc" => cell.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Event::Empty(e) => {
                if matches!(e.local_name().as_ref(), b"br" | b"cr") {
                    para.push('\n');
                }
            }
            Event::Text(t) if in_text => {
                para.push_str(&t.unescape().map_err(ExtractError::from)?);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = std::mem::take(&mut para);
                    let text = text.trim();
                    if table_depth > 0 {
                        if !cell.is_empty() && !text.is_empty() {
                            cell.push(' ');
                        }
                        cell.push_str(text);
                    } else if !text.is_empty() {
                        paragraphs.push(text.to_string());
                    }
                }
                b"tc" => row.push(std::mem::take(&mut cell)),
                b"tr" => {
                    if row.iter().any(|c| !c.trim().is_empty()) {
                        rows.push(row.join(" | "));
                    }
                    row.clear();
                }
                b"tbl" => table_depth = table_depth.saturating_sub(1),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    paragraphs.extend(rows);
    Ok(paragraphs.join("\n\n"))
}

/// `[Slide N]` followed by the slide's paragraphs, for slides with text.
fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let slide_names = numbered_parts(&archive, "ppt/slides/slide");
    let mut blocks = Vec::new();
    for (idx, name) in slide_names.iter().enumerate() {
        let xml = read_zip_entry_bounded(&mut archive, name, MAX_XML_ENTRY_BYTES)?;
        let lines = drawing_paragraphs(&xml)?;
        if !lines.is_empty() {
            blocks.push(format!("[Slide {}]\n{}", idx + 1, lines.join("\n")));
        }
    }
    Ok(blocks.join("\n\n"))
}

fn drawing_paragraphs(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut lines = Vec::new();
    let mut para = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
            Event::Text(t) if in_text => {
                para.push_str(&t.unescape().map_err(ExtractError::from)?);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = std::mem::take(&mut para);
                    if !text.trim().is_empty() {
                        lines.push(text.trim().to_string());
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(lines)
}

/// `[Sheet: name]` followed by pipe-joined non-empty rows, per sheet.
fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = if archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        read_shared_strings(&mut archive)?
    } else {
        Vec::new()
    };
    let sheets = list_sheets(&mut archive)?;

    let mut blocks = Vec::new();
    for (name, part) in sheets.into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_zip_entry_bounded(&mut archive, &part, MAX_XML_ENTRY_BYTES)?;
        let rows = sheet_rows(&xml, &shared_strings)?;
        if !rows.is_empty() {
            blocks.push(format!("[Sheet: {}]\n{}", name, rows.join("\n")));
        }
    }
    Ok(blocks.join("\n\n"))
}

fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, ExtractError> {
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Event::Text(t) if in_text => {
                current.push_str(&t.unescape().map_err(ExtractError::from)?);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => strings.push(std::mem::take(&mut current)),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// `(sheet name, part path)` in workbook order. Falls back to numbered
/// worksheet parts when the workbook cannot be mapped.
fn list_sheets(archive: &mut Archive<'_>) -> Result<Vec<(String, String)>, ExtractError> {
    let has = |archive: &Archive<'_>, name: &str| archive.file_names().any(|n| n == name);
    if has(archive, "xl/workbook.xml") && has(archive, "xl/_rels/workbook.xml.rels") {
        let rels_xml =
            read_zip_entry_bounded(archive, "xl/_rels/workbook.xml.rels", MAX_XML_ENTRY_BYTES)?;
        let mut targets = std::collections::HashMap::new();
        let mut reader = Reader::from_reader(rels_xml.as_slice());
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                    if let (Some(id), Some(target)) = (attr_value(&e, b"Id"), attr_value(&e, b"Target")) {
                        let part = match target.strip_prefix('/') {
                            Some(absolute) => absolute.to_string(),
                            None => format!("xl/{}", target),
                        };
                        targets.insert(id, part);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        let workbook_xml = read_zip_entry_bounded(archive, "xl/workbook.xml", MAX_XML_ENTRY_BYTES)?;
        let mut sheets = Vec::new();
        let mut reader = Reader::from_reader(workbook_xml.as_slice());
        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                    let name = attr_value(&e, b"name");
                    let part = attr_value(&e, b"id").and_then(|id| targets.get(&id).cloned());
                    if let (Some(name), Some(part)) = (name, part) {
                        if has(archive, &part) {
                            sheets.push((name, part));
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        if !sheets.is_empty() {
            return Ok(sheets);
        }
    }

    Ok(numbered_parts(archive, "xl/worksheets/sheet")
        .into_iter()
        .enumerate()
        .map(|(i, part)| (format!("Sheet{}", i + 1), part))
        .collect())
}

fn sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<Vec<String>, ExtractError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell_type: Option<String> = None;
    let mut value = String::new();
    let mut in_value = false;
    let mut cell_count = 0usize;

    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    cell_type = attr_value(&e, b"t");
                    value.clear();
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Event::Text(t) if in_value => {
                value.push_str(&t.unescape().map_err(ExtractError::from)?);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    let raw = std::mem::take(&mut value);
                    let text = match cell_type.as_deref() {
                        Some("s") => raw
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i).cloned())
                            .unwrap_or_default(),
                        _ => raw,
                    };
                    row.push(text);
                    cell_count += 1;
                }
                b"row" => {
                    if row.iter().any(|c| !c.trim().is_empty()) {
                        rows.push(row.join(" | "));
                    }
                    row.clear();
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

/// Tagged markdown and code cells, with stream/text outputs.
fn extract_notebook(bytes: &[u8]) -> Result<String, ExtractError> {
    let notebook: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| ExtractError::Notebook(e.to_string()))?;
    let cells = notebook
        .get("cells")
        .and_then(|c| c.as_array())
        .ok_or_else(|| ExtractError::Notebook("missing cells array".to_string()))?;

    let mut parts = Vec::new();
    for (idx, cell) in cells.iter().enumerate() {
        let source = joined_text(cell.get("source"));
        match cell.get("cell_type").and_then(|t| t.as_str()) {
            Some("markdown") => parts.push(format!("[Markdown Cell {}]\n{}", idx + 1, source)),
            Some("code") => {
                parts.push(format!("[Code Cell {}]\n```\n{}\n```", idx + 1, source));
                let outputs = cell.get("outputs").and_then(|o| o.as_array());
                for output in outputs.into_iter().flatten() {
                    let text = output
                        .get("text")
                        .or_else(|| output.get("data").and_then(|d| d.get("text/plain")));
                    if let Some(text) = text {
                        parts.push(format!("Output:\n{}", joined_text(Some(text))));
                    }
                }
            }
            _ => {}
        }
    }
    Ok(parts.join("\n\n"))
}

/// Notebook text fields are a string or a list of line strings.
fn joined_text(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Array(lines)) => lines.iter().filter_map(|l| l.as_str()).collect(),
        _ => String::new(),
    }
}
