//! Consumed interfaces.
//!
//! The engine core does not load models or talk to devices itself. It
//! consumes three externally provided interfaces:
//!
//! - [`Embedder`]: text to a fixed-dimension float vector
//! - [`LlmChat`]: prompt templating and token-stream generation
//! - [`DocumentSource`]: a readable byte stream plus display name and MIME hint
//!
//! [`FileSource`] is the provided filesystem-backed source implementation.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;

use crate::error::{EmbedError, Result};
use crate::types::ChatMessage;

/// Token stream emitted by [`LlmChat::send`].
///
/// Dropping the receiver cancels generation at the next token boundary.
pub type TokenStream = mpsc::Receiver<String>;

// ============================================================================
// Embedder
// ============================================================================

/// Maps text to a float vector of constant dimension.
///
/// The dimension must be stable across a store's lifetime. Implementations
/// back onto native inference state that is not thread-safe; callers
/// serialize access through the embedder facade.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embedding dimension.
    fn dim(&self) -> usize;

    /// Embed one text. The result is not necessarily unit-norm; the facade
    /// normalizes.
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedError>;
}

// ============================================================================
// Chat model
// ============================================================================

/// Templated chat generation.
#[async_trait]
pub trait LlmChat: Send + Sync {
    /// Render a message list through the model's chat template.
    fn template(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Start generating from a templated prompt. Tokens arrive on the
    /// returned stream; dropping it cancels generation.
    async fn send(&self, prompt: &str) -> Result<TokenStream>;

    /// The model-specific end-of-turn marker, trimmed from the tail of the
    /// final assistant message.
    fn eot_string(&self) -> String;
}

// ============================================================================
// Document sources
// ============================================================================

/// A readable byte source for one document.
///
/// The core never reads device content providers directly; it copies the
/// bytes into its staging directory before indexing so long-running workers
/// are decoupled from ephemeral permissions.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Human-readable name, used in citations.
    fn display_name(&self) -> &str;

    /// MIME type hint, when the provider knows one.
    fn mime_hint(&self) -> Option<&str>;

    /// Size in bytes, when known ahead of reading.
    fn size_bytes(&self) -> Option<u64>;

    /// Opaque reference to the original bytes, stored as a URI string.
    fn source_uri(&self) -> String;

    /// Open the byte stream.
    async fn open(&self) -> std::io::Result<Box<dyn AsyncRead + Send + Unpin>>;
}

/// Filesystem-backed document source.
pub struct FileSource {
    path: PathBuf,
    display_name: String,
    mime_hint: Option<String>,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self {
            path,
            display_name,
            mime_hint: None,
        }
    }

    /// Attach an explicit MIME hint.
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime_hint = Some(mime.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DocumentSource for FileSource {
    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn mime_hint(&self) -> Option<&str> {
        self.mime_hint.as_deref()
    }

    fn size_bytes(&self) -> Option<u64> {
        std::fs::metadata(&self.path).ok().map(|m| m.len())
    }

    fn source_uri(&self) -> String {
        format!("file://{}", self.path.to_string_lossy())
    }

    async fn open(&self) -> std::io::Result<Box<dyn AsyncRead + Send + Unpin>> {
        let file = tokio::fs::File::open(&self.path).await?;
        Ok(Box::new(file))
    }
}
