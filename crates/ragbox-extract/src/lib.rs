//! # ragbox-extract
//!
//! Text extraction from user documents.
//!
//! [`ExtractorRegistry`] dispatches by MIME type, then by filename suffix,
//! to format extractors for plain text, Markdown, CSV, JSON, XML, PDF, DOCX
//! and XLSX. Every extractor reads through a bounded budget (7,500,000 bytes
//! or 250,000 characters, whichever first).
//!
//! [`gate`] holds the post-extraction quality gate: header/footer denoising
//! followed by minimum-length and repetitiveness checks.

pub mod gate;
mod office;
mod pdf;
mod registry;
mod text;

pub use office::{DocxExtractor, XlsxExtractor};
pub use pdf::PdfExtractor;
pub use registry::{ExtractorRegistry, FormatExtractor};
pub use text::{CsvExtractor, JsonExtractor, TextExtractor, XmlExtractor};

use ragbox_core::ExtractError;
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Read limits applied to every extractor.
#[derive(Debug, Clone, Copy)]
pub struct ReadBudget {
    /// Maximum bytes read from the source
    pub max_bytes: u64,
    /// Maximum characters kept from the extracted text
    pub max_chars: usize,
}

impl Default for ReadBudget {
    fn default() -> Self {
        Self {
            max_bytes: 7_500_000,
            max_chars: 250_000,
        }
    }
}

impl ReadBudget {
    /// Truncate extracted text to the character budget, at a char boundary.
    pub fn cap_chars(&self, text: String) -> String {
        match text.char_indices().nth(self.max_chars) {
            Some((byte_idx, _)) => text[..byte_idx].to_string(),
            None => text,
        }
    }
}

/// Read at most `budget.max_bytes` from a file.
pub(crate) async fn read_bounded(path: &Path, budget: &ReadBudget) -> Result<Vec<u8>, ExtractError> {
    let file = tokio::fs::File::open(path).await?;
    let mut reader = file.take(budget.max_bytes);
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).await?;
    Ok(bytes)
}
