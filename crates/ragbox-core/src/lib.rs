//! # ragbox-core
//!
//! Core types and traits for ragbox, an offline retrieval-augmented
//! generation engine for local LLM assistants.
//!
//! This crate provides the foundational pieces used throughout the
//! workspace:
//!
//! - **Data model**: [`DocRecord`], [`Chunk`], [`RetrievalHit`],
//!   [`ChatMessage`] and their on-disk wire names
//! - **Consumed interfaces**: [`Embedder`], [`LlmChat`], [`DocumentSource`]
//! - **Vector primitives**: little-endian float packing and packed dot
//!   products ([`vector`])
//! - **Text normalization**: whitespace/line-ending canonicalization
//!   ([`text`])
//! - **Errors**: per-domain `thiserror` enums and the umbrella [`Error`]
//!
//! ## Pipeline
//!
//! ```text
//! DocumentSource -> extract -> normalize -> chunk -> embed -> store
//!                                                               |
//!                                         query -> retrieve -> hits -> router
//! ```
//!
//! ## Related Crates
//!
//! - `ragbox-extract`: format dispatch and quality gating
//! - `ragbox-chunker`: sentence-aware overlapping chunking
//! - `ragbox-embed`: embedder facade with lifecycle and query cache
//! - `ragbox-store`: per-document folder store with atomic writes
//! - `ragbox-index`: background indexing workers
//! - `ragbox-query`: repository, retrieval, and context assembly
//! - `ragbox-chat`: router and prompt assembly

pub mod error;
pub mod text;
pub mod traits;
pub mod types;
pub mod vector;

pub use error::{
    ChunkError, EmbedError, Error, ExtractError, IndexError, Result, StoreError, VectorError,
};
pub use traits::*;
pub use types::*;
