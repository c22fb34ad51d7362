//! PDF text extractor.

use async_trait::async_trait;
use ragbox_core::ExtractError;
use std::path::Path;
use tracing::debug;

use crate::registry::FormatExtractor;
use crate::text::has_extension;
use crate::{read_bounded, ReadBudget};

/// Extractor for PDF files, backed by `pdf-extract`.
pub struct PdfExtractor;

impl PdfExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for PdfExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FormatExtractor for PdfExtractor {
    fn supported_types(&self) -> &[&str] {
        &["application/pdf"]
    }

    fn can_extract_by_extension(&self, path: &Path) -> bool {
        has_extension(path, &["pdf"])
    }

    async fn extract(&self, path: &Path, budget: &ReadBudget) -> Result<String, ExtractError> {
        debug!("extracting PDF {:?}", path);
        let bytes = read_bounded(path, budget).await?;

        // pdf-extract is blocking
        let text = tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem(&bytes).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| ExtractError::Parse(format!("task join error: {e}")))?
        .map_err(ExtractError::Parse)?;

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_pdf_extension() {
        let e = PdfExtractor::new();
        assert!(e.can_extract_by_extension(Path::new("report.pdf")));
        assert!(e.can_extract_by_extension(Path::new("REPORT.PDF")));
        assert!(!e.can_extract_by_extension(Path::new("report.doc")));
    }

    #[tokio::test]
    async fn test_pdf_garbage_fails_with_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"not a pdf at all").unwrap();

        let err = PdfExtractor::new()
            .extract(&path, &ReadBudget::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Parse(_)));
    }
}
