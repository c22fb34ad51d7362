//! # ragbox-query
//!
//! The public face of the engine: [`RagRepository`] owns the document
//! lifecycle (stage, index, remove), retrieval over packed vectors with a
//! bounded per-document cache, and assembly of the bounded context block
//! that the router injects into prompts.

mod cache;
mod context;
mod repository;

pub use context::build_context_block;
pub use repository::{RagRepository, RepositoryConfig};
