//! # ragbox-embed
//!
//! The embedding layer between the engine and the externally provided
//! [`Embedder`](ragbox_core::Embedder):
//!
//! - [`NativeRunner`]: a single task owning the native inference context;
//!   all embedding calls serialize through it because the underlying state
//!   is not thread-safe
//! - [`EmbedderFacade`]: attach/detach lifecycle, L2 normalization, and a
//!   bounded LRU cache for query-side embeddings
//! - [`HashEmbedder`]: a deterministic, dependency-free embedder for tests
//!   and dry runs

mod facade;
mod hash;
mod runner;

pub use facade::EmbedderFacade;
pub use hash::HashEmbedder;
pub use runner::NativeRunner;
