//! # ragbox-index
//!
//! Background, cancellable, per-document indexing.
//!
//! [`run_index_job`] drives one document through
//! extract -> normalize -> gate -> chunk -> embed -> persist, flipping its
//! record from `Indexing` to `Ready` or `Failed`. [`WorkerPool`] bounds
//! concurrency and keys jobs uniquely by document id: submitting an id a
//! second time replaces the in-flight job.

mod pool;
mod worker;

pub use pool::{CancelFlag, WorkerPool};
pub use worker::{run_index_job, IndexContext, IndexJob};
