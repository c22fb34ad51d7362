//! The single-document indexing job.

use ragbox_chunker::{chunk, ChunkerConfig};
use ragbox_core::text::normalize;
use ragbox_core::vector::pack_f32_le;
use ragbox_core::{Chunk, ChunkError, DocStatus, EmbedError, Error, Result};
use ragbox_embed::EmbedderFacade;
use ragbox_extract::{gate, ExtractorRegistry};
use ragbox_store::LocalRagStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::pool::CancelFlag;

/// Failure reasons recorded in `meta.json` are bounded to this length.
const MAX_ERROR_CHARS: usize = 300;

/// Shared dependencies of every indexing job.
pub struct IndexContext {
    pub store: Arc<LocalRagStore>,
    pub extractors: Arc<ExtractorRegistry>,
    pub facade: Arc<EmbedderFacade>,
    pub chunker: ChunkerConfig,
}

/// One unit of indexing work.
#[derive(Debug, Clone)]
pub struct IndexJob {
    pub doc_id: Uuid,
    /// Staged copy of the source bytes
    pub staged_path: PathBuf,
    pub mime: String,
}

/// Run one document through the full pipeline.
///
/// Ordered stages with a cancellation checkpoint at every boundary:
/// status write, embedder check, extract, gate, chunk, per-chunk embed,
/// persist chunks, persist vectors, status flip to `Ready`, staged-file
/// cleanup. On failure the record flips to `Failed` with a bounded reason;
/// on cancellation nothing is recorded (the caller deletes the record).
pub async fn run_index_job(
    ctx: &IndexContext,
    job: &IndexJob,
    cancel: &CancelFlag,
) -> Result<u32> {
    match run_stages(ctx, job, cancel).await {
        Ok(chunk_count) => {
            info!("indexed doc {} ({} chunks)", job.doc_id, chunk_count);
            Ok(chunk_count)
        }
        Err(e) if e.is_cancelled() => {
            debug!("indexing of {} cancelled", job.doc_id);
            Err(e)
        }
        Err(e) => {
            warn!("indexing of {} failed: {}", job.doc_id, e);
            record_failure(ctx, job.doc_id, &e).await;
            Err(e)
        }
    }
}

async fn run_stages(ctx: &IndexContext, job: &IndexJob, cancel: &CancelFlag) -> Result<u32> {
    let doc_id = job.doc_id;

    // Re-assert the indexing state; a re-run after a crash starts from
    // whatever the old meta said.
    let mut record = ctx.store.read_meta(doc_id).await?;
    record.status = DocStatus::Indexing;
    record.error = None;
    ctx.store.write_meta(&record).await?;
    ctx.store.discard_tmp(doc_id).await?;
    cancel.check()?;

    if !ctx.facade.is_attached().await {
        return Err(EmbedError::NotAttached.into());
    }
    cancel.check()?;

    // Extract and normalize
    let raw = ctx
        .extractors
        .extract(&job.staged_path, &job.mime)
        .await
        .map_err(Error::Extraction)?;
    cancel.check()?;

    let normalized = normalize(&raw);
    let gated = gate::apply(&normalized).map_err(Error::Extraction)?;
    cancel.check()?;

    // Chunk
    let pieces = chunk(&gated, &ctx.chunker);
    if pieces.is_empty() {
        return Err(ChunkError::ProducedNone.into());
    }
    cancel.check()?;

    // Embed each chunk in order, packing vectors as we go
    let mut chunks = Vec::with_capacity(pieces.len());
    let mut packed = Vec::new();
    let mut expected_dim: Option<usize> = None;

    for piece in &pieces {
        cancel.check()?;
        let vector = ctx
            .facade
            .embed_passage(&piece.text)
            .await
            .map_err(Error::Embedding)?;

        match expected_dim {
            None => expected_dim = Some(vector.len()),
            Some(expected) if expected != vector.len() => {
                return Err(EmbedError::Dimension {
                    expected,
                    actual: vector.len(),
                }
                .into());
            }
            Some(_) => {}
        }

        packed.extend_from_slice(&pack_f32_le(&vector));
        chunks.push(Chunk {
            chunk_id: Uuid::new_v4().to_string(),
            chunk_index: piece.index,
            text: piece.text.clone(),
        });
    }

    // Persist: chunks first, then vectors, each write atomic
    ctx.store.write_chunks(doc_id, &chunks).await?;
    cancel.check()?;
    ctx.store.write_embeddings(doc_id, &packed).await?;
    cancel.check()?;

    record.status = DocStatus::Ready;
    record.error = None;
    ctx.store.write_meta(&record).await?;

    // Best-effort cleanup of the staged source copy
    ctx.store.remove_staged(&job.staged_path).await;

    Ok(chunks.len() as u32)
}

async fn record_failure(ctx: &IndexContext, doc_id: Uuid, error: &Error) {
    let mut reason: String = error.to_string().chars().take(MAX_ERROR_CHARS).collect();
    if reason.is_empty() {
        reason = "indexing failed".to_string();
    }

    match ctx.store.read_meta(doc_id).await {
        Ok(mut record) => {
            record.status = DocStatus::Failed;
            record.error = Some(reason);
            if let Err(e) = ctx.store.write_meta(&record).await {
                warn!("could not record failure for {}: {}", doc_id, e);
            }
        }
        Err(e) => warn!("could not read meta for failed doc {}: {}", doc_id, e),
    }
}
