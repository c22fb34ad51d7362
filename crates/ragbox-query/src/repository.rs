//! Document repository: lifecycle, retrieval, caches.

use ragbox_chunker::ChunkerConfig;
use ragbox_core::vector::dot_packed_le;
use ragbox_core::{
    DocRecord, DocStatus, DocumentSource, Error, Result, RetrievalHit, StoreError,
};
use ragbox_embed::EmbedderFacade;
use ragbox_extract::ExtractorRegistry;
use ragbox_index::{IndexContext, IndexJob, WorkerPool};
use ragbox_store::LocalRagStore;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{DocCacheEntry, DocVectorCache};
use crate::context;

/// Tunables for the repository. Defaults follow the engine's standard
/// configuration.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    pub chunker: ChunkerConfig,
    pub retrieval_top_k: usize,
    pub retrieval_threshold: f32,
    pub context_max_chars: usize,
    pub context_per_doc_cap: usize,
    pub doc_cache_capacity: usize,
    pub staging_cap_bytes: u64,
    pub worker_max_concurrent: usize,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            retrieval_top_k: 8,
            retrieval_threshold: 0.05,
            context_max_chars: 2400,
            context_per_doc_cap: 6,
            doc_cache_capacity: 8,
            staging_cap_bytes: 100 * 1024 * 1024,
            worker_max_concurrent: WorkerPool::default_concurrency(),
        }
    }
}

/// One candidate in the top-k heap. Greater = better: higher score wins,
/// ties go to the more recent document (lower position in the
/// `created_at` descending doc list), then the lower chunk index.
#[derive(Debug, PartialEq)]
struct Scored {
    score: f32,
    doc_pos: usize,
    chunk_pos: usize,
}

impl Eq for Scored {}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.doc_pos.cmp(&self.doc_pos))
            .then_with(|| other.chunk_pos.cmp(&self.chunk_pos))
    }
}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Public API of the engine core.
///
/// Owns the store, the embedder facade, the worker pool, and a bounded LRU
/// of per-document vector data keyed by file mtimes.
pub struct RagRepository {
    store: Arc<LocalRagStore>,
    facade: Arc<EmbedderFacade>,
    pool: WorkerPool,
    index_ctx: Arc<IndexContext>,
    cache: Mutex<DocVectorCache>,
    config: RepositoryConfig,
}

impl RagRepository {
    pub fn new(
        store: Arc<LocalRagStore>,
        facade: Arc<EmbedderFacade>,
        config: RepositoryConfig,
    ) -> Self {
        let index_ctx = Arc::new(IndexContext {
            store: Arc::clone(&store),
            extractors: Arc::new(ExtractorRegistry::with_defaults()),
            facade: Arc::clone(&facade),
            chunker: config.chunker.clone(),
        });

        Self {
            store,
            facade,
            pool: WorkerPool::new(config.worker_max_concurrent),
            index_ctx,
            cache: Mutex::new(DocVectorCache::new(config.doc_cache_capacity)),
            config,
        }
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn facade(&self) -> &Arc<EmbedderFacade> {
        &self.facade
    }

    // ========================================================================
    // Document lifecycle
    // ========================================================================

    /// Stage each source, persist an `Indexing` record, and enqueue one
    /// worker per document. Returns the assigned ids in submission order.
    ///
    /// A source that cannot be staged is recorded as `Failed` instead of
    /// aborting the batch.
    pub async fn add_documents(
        &self,
        sources: Vec<Box<dyn DocumentSource>>,
    ) -> Result<Vec<Uuid>> {
        self.store.init().await.map_err(Error::Store)?;
        let mut ids = Vec::with_capacity(sources.len());

        for source in sources {
            let display_name = source.display_name().to_string();
            let mime = resolve_mime(source.as_ref(), &display_name);
            let mut record = DocRecord::new_indexing(
                source.source_uri(),
                display_name.clone(),
                mime.clone(),
                source.size_bytes().unwrap_or(0),
                chrono::Utc::now().timestamp_millis(),
            );
            let doc_id = record.doc_id;
            ids.push(doc_id);

            let staged = match source.open().await {
                Ok(reader) => {
                    self.store
                        .stage_stream(
                            doc_id,
                            extension_of(&display_name),
                            reader,
                            self.config.staging_cap_bytes,
                        )
                        .await
                }
                Err(e) => Err(StoreError::Io(e)),
            };

            match staged {
                Ok(staged) => {
                    if record.size_bytes == 0 {
                        record.size_bytes = staged.bytes_written;
                    }
                    self.store.write_meta(&record).await.map_err(Error::Store)?;
                    info!("submitted {} as {}", display_name, doc_id);

                    self.pool
                        .submit(
                            Arc::clone(&self.index_ctx),
                            IndexJob {
                                doc_id,
                                staged_path: staged.path,
                                mime,
                            },
                        )
                        .await;
                }
                Err(e) => {
                    warn!("staging {} failed: {}", display_name, e);
                    record.status = DocStatus::Failed;
                    record.error = Some(e.to_string());
                    self.store.write_meta(&record).await.map_err(Error::Store)?;
                }
            }
        }

        Ok(ids)
    }

    /// Cancel any in-flight worker, delete the folder, drop the cache entry.
    /// Idempotent.
    pub async fn remove_document(&self, doc_id: Uuid) -> Result<()> {
        self.pool.cancel(doc_id).await;
        self.store.delete_doc(doc_id).await.map_err(Error::Store)?;
        self.cache.lock().await.invalidate(doc_id);
        Ok(())
    }

    /// Cancel all workers, delete every document, clear caches and staging.
    pub async fn clear_all(&self) -> Result<()> {
        self.pool.cancel_all().await;
        self.store.delete_all().await.map_err(Error::Store)?;
        self.store.clear_staging().await.map_err(Error::Store)?;
        self.cache.lock().await.clear();
        Ok(())
    }

    /// Synchronous read of the current document set, most recent first.
    pub async fn snapshot_docs(&self) -> Vec<DocRecord> {
        self.store.list_docs().await
    }

    /// Poll the document set on `period`, emitting only on structural
    /// change. Dropping the stream stops the poller.
    pub fn observe_docs(self: Arc<Self>, period: Duration) -> ReceiverStream<Vec<DocRecord>> {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let repo = self;

        tokio::spawn(async move {
            let mut last: Option<Vec<DocRecord>> = None;
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let docs = repo.store.list_docs().await;
                if last.as_ref() != Some(&docs) {
                    last = Some(docs.clone());
                    if tx.send(docs).await.is_err() {
                        break;
                    }
                }
            }
        });

        ReceiverStream::new(rx)
    }

    /// Block until the worker for this document has finished (either way).
    pub async fn wait_for_indexing(&self, doc_id: Uuid) {
        self.pool.wait_for(doc_id).await;
    }

    // ========================================================================
    // Retrieval
    // ========================================================================

    /// Top-k retrieval by dot product over the packed per-document buffers.
    ///
    /// Deterministic for a fixed on-disk state and query: ties break to the
    /// more recent document, then the lower chunk index. Corrupt or
    /// dimension-mismatched documents are skipped with a log line, never
    /// silently partial.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        threshold: f32,
        filter: Option<Uuid>,
    ) -> Result<Vec<RetrievalHit>> {
        let query = query.trim();
        if query.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let qvec = self.facade.embed_query(query).await.map_err(Error::Embedding)?;
        let dim = qvec.len();

        // list_docs is created_at descending, which doubles as the
        // tie-break order
        let docs: Vec<DocRecord> = self
            .snapshot_docs()
            .await
            .into_iter()
            .filter(|d| d.is_ready())
            .filter(|d| filter.map_or(true, |f| d.doc_id == f))
            .collect();

        let mut heap: BinaryHeap<Reverse<Scored>> = BinaryHeap::with_capacity(k + 1);
        let mut entries: Vec<Option<DocCacheEntry>> = vec![None; docs.len()];

        for (doc_pos, doc) in docs.iter().enumerate() {
            let Some(entry) = self.ensure_cache_entry(doc, dim).await else {
                continue;
            };

            for chunk_pos in 0..entry.chunks.len() {
                let offset = chunk_pos * entry.bytes_per_vec;
                let Some(score) = dot_packed_le(&qvec, &entry.packed, offset, dim) else {
                    warn!("doc {} vector buffer shorter than chunk list", doc.doc_id);
                    break;
                };
                if score <= threshold {
                    continue;
                }

                let candidate = Scored {
                    score,
                    doc_pos,
                    chunk_pos,
                };
                if heap.len() < k {
                    heap.push(Reverse(candidate));
                } else if let Some(Reverse(worst)) = heap.peek() {
                    if *worst < candidate {
                        heap.pop();
                        heap.push(Reverse(candidate));
                    }
                }
            }
            entries[doc_pos] = Some(entry);
        }

        let mut selected: Vec<Scored> = heap.into_iter().map(|Reverse(s)| s).collect();
        selected.sort_by(|a, b| b.cmp(a));

        let hits = selected
            .into_iter()
            .filter_map(|s| {
                let doc = &docs[s.doc_pos];
                let entry = entries[s.doc_pos].as_ref()?;
                let chunk = entry.chunks.get(s.chunk_pos)?;
                Some(RetrievalHit {
                    doc_id: doc.doc_id,
                    doc_name: doc.display_name.clone(),
                    chunk_id: chunk.chunk_id.clone(),
                    chunk_index: chunk.chunk_index,
                    text: chunk.text.clone(),
                    score: s.score,
                })
            })
            .collect();

        Ok(hits)
    }

    /// The first `max` chunks of one document, scored 1.0. Used when
    /// similarity search yields nothing but the caller still wants
    /// document context.
    pub async fn fallback_top_chunks(
        &self,
        doc_id: Uuid,
        max: usize,
    ) -> Result<Vec<RetrievalHit>> {
        let record = self.store.read_meta(doc_id).await.map_err(Error::Store)?;
        if !record.is_ready() {
            return Ok(Vec::new());
        }

        let chunks = self.store.read_chunks(doc_id).await.map_err(Error::Store)?;
        Ok(chunks
            .into_iter()
            .take(max)
            .map(|chunk| RetrievalHit {
                doc_id,
                doc_name: record.display_name.clone(),
                chunk_id: chunk.chunk_id,
                chunk_index: chunk.chunk_index,
                text: chunk.text,
                score: 1.0,
            })
            .collect())
    }

    /// Assemble the bounded context block from retrieval hits.
    pub fn build_context_block(&self, hits: &[RetrievalHit], max_chars: usize) -> Option<String> {
        context::build_context_block(hits, max_chars, self.config.context_per_doc_cap)
    }

    // ========================================================================
    // Cache control
    // ========================================================================

    pub async fn invalidate_cache(&self, doc_id: Uuid) {
        self.cache.lock().await.invalidate(doc_id);
    }

    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    /// Return a valid cache entry for this document, reloading from disk
    /// when the mtimes or the dimension disagree. `None` skips the doc.
    async fn ensure_cache_entry(&self, doc: &DocRecord, dim: usize) -> Option<DocCacheEntry> {
        let (chunks_mtime, emb_mtime) = match self.store.file_mtimes(doc.doc_id).await {
            Ok(mtimes) => mtimes,
            Err(e) => {
                warn!("doc {} unreadable, skipping: {}", doc.doc_id, e);
                return None;
            }
        };

        {
            let mut cache = self.cache.lock().await;
            if let Some(entry) = cache.get(doc.doc_id) {
                if entry.chunks_mtime == chunks_mtime
                    && entry.emb_mtime == emb_mtime
                    && entry.dim() == dim
                {
                    return Some(entry);
                }
                debug!("cache entry for {} stale, reloading", doc.doc_id);
                cache.invalidate(doc.doc_id);
            }
        }

        // Load outside the cache lock; no await happens while holding it
        let stats = self.store.doc_stats(doc.doc_id).await.ok()?;
        let bytes_per_vec = match stats.bytes_per_vector() {
            Some(bpv) => bpv as usize,
            None => {
                warn!("doc {} has corrupt embedding sizing, excluded", doc.doc_id);
                return None;
            }
        };
        if stats.inferred_dim() != Some(dim) {
            warn!(
                "doc {} dimension {:?} does not match query dim {}, excluded",
                doc.doc_id,
                stats.inferred_dim(),
                dim
            );
            return None;
        }

        let chunks = self.store.read_chunks(doc.doc_id).await.ok()?;
        let packed = self.store.read_embeddings(doc.doc_id).await.ok()?;
        if chunks.len() * bytes_per_vec != packed.len() {
            warn!("doc {} chunk/vector count mismatch, excluded", doc.doc_id);
            return None;
        }

        let entry = DocCacheEntry {
            chunks: Arc::new(chunks),
            packed: Arc::new(packed),
            bytes_per_vec,
            chunks_mtime,
            emb_mtime,
        };
        let mut cache = self.cache.lock().await;
        cache.insert(doc.doc_id, entry.clone());
        debug!("loaded doc {} into cache ({} cached)", doc.doc_id, cache.len());
        Some(entry)
    }
}

fn resolve_mime(source: &dyn DocumentSource, display_name: &str) -> String {
    if let Some(hint) = source.mime_hint() {
        return hint.to_string();
    }
    mime_guess::from_path(display_name)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

fn extension_of(display_name: &str) -> Option<&str> {
    std::path::Path::new(display_name)
        .extension()
        .and_then(|e| e.to_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragbox_core::FileSource;
    use ragbox_embed::HashEmbedder;
    use tempfile::{tempdir, TempDir};
    use tokio_stream::StreamExt;

    const DIM: usize = 64;

    async fn setup() -> (TempDir, Arc<RagRepository>) {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalRagStore::new(dir.path().join("data")));
        store.init().await.unwrap();

        let facade = Arc::new(EmbedderFacade::new());
        facade.attach(Arc::new(HashEmbedder::new(DIM))).await;

        let config = RepositoryConfig {
            chunker: ChunkerConfig {
                target_chars: 200,
                overlap_chars: 50,
            },
            ..Default::default()
        };
        let repo = Arc::new(RagRepository::new(store, facade, config));
        (dir, repo)
    }

    fn write_source(dir: &TempDir, name: &str, content: &str) -> FileSource {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        FileSource::new(path)
    }

    fn article() -> String {
        let mut parts = vec![
            "The migration plan moves the billing service to the new cluster.".to_string(),
        ];
        for i in 0..20 {
            parts.push(format!(
                "Step {i} of the rollout describes checks for subsystem {i}."
            ));
        }
        parts.join(" ")
    }

    async fn add_and_wait(repo: &Arc<RagRepository>, source: FileSource) -> Uuid {
        let ids = repo
            .add_documents(vec![Box::new(source) as Box<dyn DocumentSource>])
            .await
            .unwrap();
        let id = ids[0];
        repo.wait_for_indexing(id).await;
        id
    }

    #[tokio::test]
    async fn test_add_document_reaches_ready() {
        let (dir, repo) = setup().await;
        let id = add_and_wait(&repo, write_source(&dir, "plan.txt", &article())).await;

        let docs = repo.snapshot_docs().await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].doc_id, id);
        assert_eq!(docs[0].status, DocStatus::Ready);
        assert_eq!(docs[0].display_name, "plan.txt");
        assert_eq!(docs[0].mime, "text/plain");
    }

    #[tokio::test]
    async fn test_retrieve_finds_relevant_chunk() {
        let (dir, repo) = setup().await;
        add_and_wait(&repo, write_source(&dir, "plan.txt", &article())).await;

        let hits = repo
            .retrieve("billing service migration", 8, 0.0, None)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].score > 0.0);
        assert!(hits[0].text.contains("billing"));
        // Scores come back descending
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_retrieve_empty_query() {
        let (_dir, repo) = setup().await;
        assert!(repo.retrieve("   ", 8, 0.0, None).await.unwrap().is_empty());
        assert!(repo.retrieve("q", 0, 0.0, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_determinism() {
        let (dir, repo) = setup().await;
        add_and_wait(&repo, write_source(&dir, "plan.txt", &article())).await;

        let a = repo.retrieve("rollout checks", 5, 0.0, None).await.unwrap();
        let b = repo.retrieve("rollout checks", 5, 0.0, None).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_retrieve_with_doc_filter() {
        let (dir, repo) = setup().await;
        let first = add_and_wait(&repo, write_source(&dir, "one.txt", &article())).await;
        let _second = add_and_wait(&repo, write_source(&dir, "two.txt", &article())).await;

        let hits = repo
            .retrieve("rollout checks", 8, 0.0, Some(first))
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.doc_id == first));
    }

    #[tokio::test]
    async fn test_retrieve_threshold_filters() {
        let (dir, repo) = setup().await;
        add_and_wait(&repo, write_source(&dir, "plan.txt", &article())).await;

        let hits = repo
            .retrieve("completely unrelated penguin astronomy", 8, 0.99, None)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_doc_excluded() {
        let (dir, repo) = setup().await;
        let good = add_and_wait(&repo, write_source(&dir, "good.txt", &article())).await;
        let bad = add_and_wait(&repo, write_source(&dir, "bad.txt", &article())).await;

        // Corrupt the second doc's vectors into a different dimension by
        // truncating the buffer to half-width vectors
        let packed = repo.store.read_embeddings(bad).await.unwrap();
        let stats = repo.store.doc_stats(bad).await.unwrap();
        let halved: Vec<u8> = packed
            .chunks(stats.bytes_per_vector().unwrap() as usize)
            .flat_map(|v| v[..v.len() / 2].to_vec())
            .collect();
        repo.store.write_embeddings(bad, &halved).await.unwrap();
        repo.invalidate_cache(bad).await;

        let hits = repo.retrieve("rollout checks", 16, 0.0, None).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.doc_id == good));
    }

    #[tokio::test]
    async fn test_remove_document_idempotent() {
        let (dir, repo) = setup().await;
        let id = add_and_wait(&repo, write_source(&dir, "plan.txt", &article())).await;

        repo.remove_document(id).await.unwrap();
        repo.remove_document(id).await.unwrap();
        assert!(repo.snapshot_docs().await.is_empty());

        let hits = repo.retrieve("rollout checks", 8, 0.0, None).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_clear_all() {
        let (dir, repo) = setup().await;
        add_and_wait(&repo, write_source(&dir, "a.txt", &article())).await;
        add_and_wait(&repo, write_source(&dir, "b.txt", &article())).await;

        repo.clear_all().await.unwrap();
        assert!(repo.snapshot_docs().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_staging_records_failure() {
        let (_dir, repo) = setup().await;
        let source = FileSource::new("/definitely/not/here.txt");
        let ids = repo
            .add_documents(vec![Box::new(source) as Box<dyn DocumentSource>])
            .await
            .unwrap();

        let docs = repo.snapshot_docs().await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].doc_id, ids[0]);
        assert_eq!(docs[0].status, DocStatus::Failed);
        assert!(docs[0].error.is_some());
    }

    #[tokio::test]
    async fn test_fallback_top_chunks() {
        let (dir, repo) = setup().await;
        let id = add_and_wait(&repo, write_source(&dir, "plan.txt", &article())).await;

        let hits = repo.fallback_top_chunks(id, 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_index, 0);
        assert_eq!(hits[1].chunk_index, 1);
        assert!(hits.iter().all(|h| h.score == 1.0));
    }

    #[tokio::test]
    async fn test_cache_refreshes_on_rewrite() {
        let (dir, repo) = setup().await;
        let id = add_and_wait(&repo, write_source(&dir, "plan.txt", &article())).await;

        // Warm the cache
        repo.retrieve("rollout", 4, 0.0, None).await.unwrap();

        // Rewrite the doc on disk with different chunk text
        tokio::time::sleep(Duration::from_millis(30)).await;
        let mut chunks = repo.store.read_chunks(id).await.unwrap();
        chunks[0].text = "entirely replaced text about aquariums".to_string();
        repo.store.write_chunks(id, &chunks).await.unwrap();

        // The mtime changed, so retrieval sees the new text without an
        // explicit invalidate
        let hits = repo.retrieve("rollout", 16, -1.0, None).await.unwrap();
        assert!(hits.iter().any(|h| h.text.contains("aquariums")));
    }

    #[tokio::test]
    async fn test_observe_docs_emits_on_change() {
        let (dir, repo) = setup().await;
        let mut stream = Arc::clone(&repo).observe_docs(Duration::from_millis(20));

        // First emission reflects the empty store
        let initial = stream.next().await.unwrap();
        assert!(initial.is_empty());

        add_and_wait(&repo, write_source(&dir, "plan.txt", &article())).await;

        // Eventually emits the Ready doc
        let mut saw_ready = false;
        for _ in 0..50 {
            match tokio::time::timeout(Duration::from_millis(200), stream.next()).await {
                Ok(Some(docs)) => {
                    if docs.iter().any(|d| d.status == DocStatus::Ready) {
                        saw_ready = true;
                        break;
                    }
                }
                _ => break,
            }
        }
        assert!(saw_ready);
    }

    #[tokio::test]
    async fn test_recency_tie_break() {
        let (dir, repo) = setup().await;
        // Identical content: identical scores across docs
        let text = article();
        let _older = add_and_wait(&repo, write_source(&dir, "older.txt", &text)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let newer = add_and_wait(&repo, write_source(&dir, "newer.txt", &text)).await;

        let hits = repo.retrieve("rollout checks", 1, 0.0, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        // The more recent document wins the tie
        assert_eq!(hits[0].doc_id, newer);
    }
}
