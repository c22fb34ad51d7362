//! Extractor registry: MIME-first dispatch with extension fallback.

use async_trait::async_trait;
use ragbox_core::ExtractError;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::{
    CsvExtractor, DocxExtractor, JsonExtractor, PdfExtractor, ReadBudget, TextExtractor,
    XlsxExtractor, XmlExtractor,
};

/// Trait for format-specific text extractors.
#[async_trait]
pub trait FormatExtractor: Send + Sync {
    /// MIME types this extractor handles.
    fn supported_types(&self) -> &[&str];

    /// Extension fallback when the MIME type is unknown or generic.
    fn can_extract_by_extension(&self, _path: &Path) -> bool {
        false
    }

    /// Extract text from the file within the read budget.
    async fn extract(&self, path: &Path, budget: &ReadBudget) -> Result<String, ExtractError>;
}

/// Registry of format extractors.
pub struct ExtractorRegistry {
    extractors: HashMap<String, Arc<dyn FormatExtractor>>,
    mime_mapping: HashMap<String, String>,
    budget: ReadBudget,
}

impl ExtractorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            extractors: HashMap::new(),
            mime_mapping: HashMap::new(),
            budget: ReadBudget::default(),
        }
    }

    /// Registry with every supported format registered.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("text", TextExtractor::new());
        registry.register("csv", CsvExtractor::new());
        registry.register("json", JsonExtractor::new());
        registry.register("xml", XmlExtractor::new());
        registry.register("pdf", PdfExtractor::new());
        registry.register("docx", DocxExtractor::new());
        registry.register("xlsx", XlsxExtractor::new());
        registry
    }

    /// Override the default read budget.
    #[must_use]
    pub fn with_budget(mut self, budget: ReadBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Register an extractor under a name.
    pub fn register<E: FormatExtractor + 'static>(&mut self, name: &str, extractor: E) {
        let extractor = Arc::new(extractor);
        for mime in extractor.supported_types() {
            self.mime_mapping
                .insert((*mime).to_string(), name.to_string());
        }
        self.extractors.insert(name.to_string(), extractor);
    }

    /// Get an extractor for a MIME type.
    #[must_use]
    pub fn get_for_mime(&self, mime: &str) -> Option<Arc<dyn FormatExtractor>> {
        self.mime_mapping
            .get(mime)
            .and_then(|name| self.extractors.get(name))
            .cloned()
    }

    /// Get an extractor for a file: MIME first, then filename suffix.
    #[must_use]
    pub fn get_for_file(&self, path: &Path, mime: &str) -> Option<Arc<dyn FormatExtractor>> {
        if let Some(extractor) = self.get_for_mime(mime) {
            return Some(extractor);
        }
        self.extractors
            .values()
            .find(|e| e.can_extract_by_extension(path))
            .cloned()
    }

    /// Extract text from a file, within the registry's read budget.
    ///
    /// Fails with [`ExtractError::UnsupportedFormat`] when no extractor
    /// claims the file.
    pub async fn extract(&self, path: &Path, mime: &str) -> Result<String, ExtractError> {
        let extractor = self
            .get_for_file(path, mime)
            .ok_or_else(|| ExtractError::UnsupportedFormat(mime.to_string()))?;

        debug!("extracting {:?} as {}", path, mime);
        let text = extractor.extract(path, &self.budget).await?;
        Ok(self.budget.cap_chars(text))
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
