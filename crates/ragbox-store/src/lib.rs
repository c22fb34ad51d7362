//! # ragbox-store
//!
//! Append-only, per-document folder store.
//!
//! On-disk layout:
//!
//! ```text
//! <root>/rag/docs/<doc_id>/
//!     meta.json            # DocRecord, pretty-printed JSON
//!     chunks.jsonl         # one {chunkId, chunkIndex, text} per line
//!     embeddings.bin       # concatenated float32 LE vectors, no header
//! <root>/rag/staging/      # copied source bytes awaiting indexing
//! ```
//!
//! Every write goes through a sibling `.tmp` file, an fsync, and a rename,
//! so a crash mid-write leaves the previous version intact and at worst a
//! stray `.tmp` to discard.

mod local;

pub use local::{LocalRagStore, StagedFile};
