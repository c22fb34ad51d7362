//! Core types for ragbox.
//!
//! Shared data structures used across the pipeline:
//!
//! - [`DocRecord`] / [`DocStatus`]: per-document metadata and lifecycle state
//! - [`Chunk`]: one semantic segment of a document
//! - [`RetrievalHit`]: a scored chunk returned from retrieval
//! - [`DocStats`]: on-disk size accounting for one document
//! - [`ChatMessage`] / [`Role`]: typed conversation messages
//!
//! Serde attribute names on [`DocRecord`] and [`Chunk`] are the on-disk wire
//! format (`meta.json` and `chunks.jsonl`) and must not change.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Document Records
// ============================================================================

/// Metadata about one user document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocRecord {
    /// Unique document identifier, assigned at creation
    #[serde(rename = "docId")]
    pub doc_id: Uuid,
    /// Opaque reference to the original byte source
    #[serde(rename = "uri")]
    pub source_uri: String,
    /// Human-readable name shown in citations
    #[serde(rename = "name")]
    pub display_name: String,
    /// MIME type of the source
    pub mime: String,
    /// Source size in bytes
    #[serde(rename = "sizeBytes")]
    pub size_bytes: u64,
    /// Creation time, milliseconds since the Unix epoch
    #[serde(rename = "createdAt")]
    pub created_at_ms: i64,
    /// Current lifecycle state
    pub status: DocStatus,
    /// Failure reason, present only when status is `Failed`
    pub error: Option<String>,
}

/// Document lifecycle state.
///
/// Transitions are monotonic: `Indexing -> Ready` or `Indexing -> Failed`.
/// There is no back-transition without deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocStatus {
    /// Submitted, worker in flight
    Indexing,
    /// Chunks and vectors durably persisted
    Ready,
    /// Irrecoverable extraction/embedding error
    Failed,
}

impl DocRecord {
    /// Create a fresh record in the `Indexing` state.
    pub fn new_indexing(
        source_uri: String,
        display_name: String,
        mime: String,
        size_bytes: u64,
        created_at_ms: i64,
    ) -> Self {
        Self {
            doc_id: Uuid::new_v4(),
            source_uri,
            display_name,
            mime,
            size_bytes,
            created_at_ms,
            status: DocStatus::Indexing,
            error: None,
        }
    }

    /// Whether the document is available for retrieval.
    pub fn is_ready(&self) -> bool {
        self.status == DocStatus::Ready
    }
}

// ============================================================================
// Chunks
// ============================================================================

/// One semantic segment of a document, as persisted in `chunks.jsonl`.
///
/// For a `Ready` document the chunk count equals the vector count in
/// `embeddings.bin`, both in identical order, with `chunk_index` dense over
/// `0..N`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Opaque identifier, unique per document
    #[serde(rename = "chunkId")]
    pub chunk_id: String,
    /// Zero-based position in the source text
    #[serde(rename = "chunkIndex")]
    pub chunk_index: u32,
    /// UTF-8 payload, post-overlap
    pub text: String,
}

// ============================================================================
// Retrieval
// ============================================================================

/// A scored chunk returned from retrieval.
///
/// `score` is the dot product of two unit-norm vectors, so it equals cosine
/// similarity in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub doc_id: Uuid,
    pub doc_name: String,
    pub chunk_id: String,
    pub chunk_index: u32,
    pub text: String,
    pub score: f32,
}

/// On-disk size accounting for one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocStats {
    /// Number of chunk rows in `chunks.jsonl`
    pub chunk_count: u64,
    /// Size of `embeddings.bin`
    pub embedding_bytes: u64,
    /// Total bytes of the document folder
    pub total_bytes: u64,
}

impl DocStats {
    /// Bytes per stored vector, or `None` when the record is corrupt
    /// (embedding bytes not evenly divisible over the chunks).
    pub fn bytes_per_vector(&self) -> Option<u64> {
        if self.chunk_count == 0 || self.embedding_bytes % self.chunk_count != 0 {
            return None;
        }
        let bpv = self.embedding_bytes / self.chunk_count;
        if bpv % 4 != 0 {
            return None;
        }
        Some(bpv)
    }

    /// Embedding dimension inferred from file sizes, never stored.
    pub fn inferred_dim(&self) -> Option<usize> {
        self.bytes_per_vector().map(|bpv| (bpv / 4) as usize)
    }
}

// ============================================================================
// Chat Messages
// ============================================================================

/// Message role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}
