//! Extractors for text-native formats: plain text, Markdown, CSV, JSON, XML.

use async_trait::async_trait;
use ragbox_core::ExtractError;
use std::path::Path;

use crate::registry::FormatExtractor;
use crate::{read_bounded, ReadBudget};

// ============================================================================
// Plain text / Markdown
// ============================================================================

/// Extractor for plain text and Markdown files.
pub struct TextExtractor;

impl TextExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FormatExtractor for TextExtractor {
    fn supported_types(&self) -> &[&str] {
        &["text/plain", "text/markdown", "text/x-markdown"]
    }

    fn can_extract_by_extension(&self, path: &Path) -> bool {
        has_extension(path, &["txt", "md", "markdown", "text", "log"])
    }

    async fn extract(&self, path: &Path, budget: &ReadBudget) -> Result<String, ExtractError> {
        let bytes = read_bounded(path, budget).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

// ============================================================================
// CSV
// ============================================================================

/// Extractor for CSV files. Rows become tab-separated lines so tabular
/// context survives into the chunks.
pub struct CsvExtractor;

impl CsvExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for CsvExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FormatExtractor for CsvExtractor {
    fn supported_types(&self) -> &[&str] {
        &["text/csv", "application/csv"]
    }

    fn can_extract_by_extension(&self, path: &Path) -> bool {
        has_extension(path, &["csv", "tsv"])
    }

    async fn extract(&self, path: &Path, budget: &ReadBudget) -> Result<String, ExtractError> {
        let bytes = read_bounded(path, budget).await?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(bytes.as_slice());

        let mut lines = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| ExtractError::Parse(e.to_string()))?;
            lines.push(record.iter().collect::<Vec<_>>().join("\t"));
        }
        Ok(lines.join("\n"))
    }
}

// ============================================================================
// JSON
// ============================================================================

/// Extractor for JSON files. Scalar leaves are flattened to
/// `path: value` lines, which embeds far better than raw punctuation.
pub struct JsonExtractor;

impl JsonExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for JsonExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FormatExtractor for JsonExtractor {
    fn supported_types(&self) -> &[&str] {
        &["application/json", "text/json"]
    }

    fn can_extract_by_extension(&self, path: &Path) -> bool {
        has_extension(path, &["json", "jsonl", "ndjson"])
    }

    async fn extract(&self, path: &Path, budget: &ReadBudget) -> Result<String, ExtractError> {
        let bytes = read_bounded(path, budget).await?;
        let text = String::from_utf8_lossy(&bytes);

        let mut lines = Vec::new();
        // JSONL files hold one value per line; plain JSON is one value
        for candidate in text.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<serde_json::Value>(candidate) {
                Ok(value) => flatten_json(&value, "", &mut lines),
                Err(_) => {
                    // Not line-delimited; parse the whole document once
                    let value: serde_json::Value = serde_json::from_str(&text)
                        .map_err(|e| ExtractError::Parse(e.to_string()))?;
                    lines.clear();
                    flatten_json(&value, "", &mut lines);
                    break;
                }
            }
        }
        Ok(lines.join("\n"))
    }
}

fn flatten_json(value: &serde_json::Value, prefix: &str, out: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, v) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_json(v, &path, out);
            }
        }
        serde_json::Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_json(v, &format!("{prefix}[{i}]"), out);
            }
        }
        serde_json::Value::Null => {}
        scalar => {
            let rendered = match scalar {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if prefix.is_empty() {
                out.push(rendered);
            } else {
                out.push(format!("{prefix}: {rendered}"));
            }
        }
    }
}

// ============================================================================
// XML
// ============================================================================

/// Extractor for XML files: text nodes only, one per line.
pub struct XmlExtractor;

impl XmlExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for XmlExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FormatExtractor for XmlExtractor {
    fn supported_types(&self) -> &[&str] {
        &["application/xml", "text/xml"]
    }

    fn can_extract_by_extension(&self, path: &Path) -> bool {
        has_extension(path, &["xml"])
    }

    async fn extract(&self, path: &Path, budget: &ReadBudget) -> Result<String, ExtractError> {
        let bytes = read_bounded(path, budget).await?;

        let mut reader = quick_xml::Reader::from_reader(bytes.as_slice());
        let mut buf = Vec::new();
        let mut lines = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(quick_xml::events::Event::Text(t)) => {
                    let text = t
                        .unescape()
                        .map_err(|e| ExtractError::Parse(e.to_string()))?;
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        lines.push(trimmed.to_string());
                    }
                }
                Ok(quick_xml::events::Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(ExtractError::Parse(e.to_string())),
            }
            buf.clear();
        }
        Ok(lines.join("\n"))
    }
}

pub(crate) fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.contains(&ext.to_lowercase().as_str()))
}
