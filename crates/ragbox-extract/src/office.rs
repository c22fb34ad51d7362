//! DOCX and XLSX extractors.
//!
//! Both formats are OOXML zip containers; the interesting parts are
//! `word/document.xml` for DOCX and the worksheet/sharedStrings parts for
//! XLSX. Parsing happens on a blocking task since `zip` is synchronous.

use async_trait::async_trait;
use quick_xml::events::Event;
use ragbox_core::ExtractError;
use std::io::Read;
use std::path::Path;
use tracing::debug;

use crate::registry::FormatExtractor;
use crate::text::has_extension;
use crate::{read_bounded, ReadBudget};

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

// ============================================================================
// DOCX
// ============================================================================

/// Extractor for Word documents.
pub struct DocxExtractor;

impl DocxExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for DocxExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FormatExtractor for DocxExtractor {
    fn supported_types(&self) -> &[&str] {
        &[DOCX_MIME]
    }

    fn can_extract_by_extension(&self, path: &Path) -> bool {
        has_extension(path, &["docx"])
    }

    async fn extract(&self, path: &Path, budget: &ReadBudget) -> Result<String, ExtractError> {
        debug!("extracting DOCX {:?}", path);
        let bytes = read_bounded(path, budget).await?;

        tokio::task::spawn_blocking(move || extract_docx(&bytes))
            .await
            .map_err(|e| ExtractError::Parse(format!("task join error: {e}")))?
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let cursor = std::io::Cursor::new(bytes);
    let mut archive =
        zip::ZipArchive::new(cursor).map_err(|e| ExtractError::Parse(e.to_string()))?;

    let xml = read_zip_entry(&mut archive, "word/document.xml")?;
    parse_docx_xml(&xml)
}

/// Pull run text out of `word/document.xml`: text from `<w:t>`, a newline
/// per paragraph, tabs and line breaks preserved.
fn parse_docx_xml(xml: &str) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml.as_bytes());
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if in_text {
                    let text = t
                        .unescape()
                        .map_err(|e| ExtractError::Parse(e.to_string()))?;
                    out.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ExtractError::Parse(e.to_string())),
        }
        buf.clear();
    }
    Ok(out)
}

// ============================================================================
// XLSX
// ============================================================================

/// Extractor for Excel workbooks.
///
/// Emits a `Sheet: <name>` header per worksheet followed by tab-separated
/// rows.
pub struct XlsxExtractor;

impl XlsxExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for XlsxExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FormatExtractor for XlsxExtractor {
    fn supported_types(&self) -> &[&str] {
        &[XLSX_MIME]
    }

    fn can_extract_by_extension(&self, path: &Path) -> bool {
        has_extension(path, &["xlsx"])
    }

    async fn extract(&self, path: &Path, budget: &ReadBudget) -> Result<String, ExtractError> {
        debug!("extracting XLSX {:?}", path);
        let bytes = read_bounded(path, budget).await?;

        tokio::task::spawn_blocking(move || extract_xlsx(&bytes))
            .await
            .map_err(|e| ExtractError::Parse(format!("task join error: {e}")))?
    }
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let cursor = std::io::Cursor::new(bytes);
    let mut archive =
        zip::ZipArchive::new(cursor).map_err(|e| ExtractError::Parse(e.to_string()))?;

    let shared = match read_zip_entry(&mut archive, "xl/sharedStrings.xml") {
        Ok(xml) => parse_shared_strings(&xml)?,
        Err(_) => Vec::new(),
    };

    let sheet_names = match read_zip_entry(&mut archive, "xl/workbook.xml") {
        Ok(xml) => parse_sheet_names(&xml)?,
        Err(_) => Vec::new(),
    };

    // Worksheet parts, ordered by their numeric suffix
    let mut sheet_files: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    sheet_files.sort_by_key(|n| sheet_number(n));

    let mut sections = Vec::new();
    for (i, file) in sheet_files.iter().enumerate() {
        let xml = read_zip_entry(&mut archive, file)?;
        let rows = parse_sheet_rows(&xml, &shared)?;

        let name = sheet_names
            .get(i)
            .cloned()
            .unwrap_or_else(|| format!("Sheet {}", i + 1));
        sections.push(format!("Sheet: {name}\n\n{}", rows.join("\n")));
    }

    Ok(sections.join("\n\n"))
}

fn read_zip_entry(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<String, ExtractError> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Parse(format!("{name}: {e}")))?;
    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e| ExtractError::Parse(format!("{name}: {e}")))?;
    Ok(xml)
}

fn sheet_number(name: &str) -> u32 {
    name.trim_start_matches("xl/worksheets/sheet")
        .trim_end_matches(".xml")
        .parse()
        .unwrap_or(u32::MAX)
}

/// `xl/sharedStrings.xml`: one string per `<si>`, runs concatenated.
fn parse_shared_strings(xml: &str) -> Result<Vec<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml.as_bytes());
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => {
                    if let Some(s) = current.take() {
                        strings.push(s);
                    }
                }
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if in_text {
                    if let Some(ref mut s) = current {
                        let text = t
                            .unescape()
                            .map_err(|e| ExtractError::Parse(e.to_string()))?;
                        s.push_str(&text);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ExtractError::Parse(e.to_string())),
        }
        buf.clear();
    }
    Ok(strings)
}

/// `xl/workbook.xml`: sheet names in document order.
fn parse_sheet_names(xml: &str) -> Result<Vec<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml.as_bytes());
    let mut buf = Vec::new();
    let mut names = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"sheet" {
                    if let Ok(Some(attr)) = e.try_get_attribute("name") {
                        let name = attr
                            .unescape_value()
                            .map_err(|e| ExtractError::Parse(e.to_string()))?;
                        names.push(name.into_owned());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ExtractError::Parse(e.to_string())),
        }
        buf.clear();
    }
    Ok(names)
}

/// One worksheet: rows of tab-separated cell values.
fn parse_sheet_rows(xml: &str, shared: &[String]) -> Result<Vec<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml.as_bytes());
    let mut buf = Vec::new();

    let mut rows = Vec::new();
    let mut cells: Vec<String> = Vec::new();
    let mut in_row = false;
    let mut cell_type: Option<String> = None;
    let mut cell_value: Option<String> = None;
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    in_row = true;
                    cells.clear();
                }
                b"c" => {
                    cell_type = match e.try_get_attribute("t") {
                        Ok(Some(attr)) => Some(
                            attr.unescape_value()
                                .map_err(|e| ExtractError::Parse(e.to_string()))?
                                .into_owned(),
                        ),
                        _ => None,
                    };
                    cell_value = None;
                }
                // Both <v> and inline-string <t> carry the cell payload
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"row" => {
                    in_row = false;
                    rows.push(cells.join("\t"));
                }
                b"c" => {
                    let raw = cell_value.take().unwrap_or_default();
                    let resolved = if cell_type.as_deref() == Some("s") {
                        raw.parse::<usize>()
                            .ok()
                            .and_then(|i| shared.get(i).cloned())
                            .unwrap_or(raw)
                    } else {
                        raw
                    };
                    cells.push(resolved);
                    cell_type = None;
                }
                b"v" | b"t" => in_value = false,
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if in_row && in_value {
                    let text = t
                        .unescape()
                        .map_err(|e| ExtractError::Parse(e.to_string()))?;
                    cell_value.get_or_insert_with(String::new).push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ExtractError::Parse(e.to_string())),
        }
        buf.clear();
    }
    Ok(rows)
}
