//! Embedder facade: lifecycle, normalization, query cache.

use ragbox_core::vector::{l2_norm, normalize_l2};
use ragbox_core::{EmbedError, Embedder};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::runner::NativeRunner;

/// Default capacity of the query-side embedding cache.
const DEFAULT_QUERY_CACHE: usize = 64;
/// Cache keys are the lowercased query truncated to this many characters.
const QUERY_KEY_MAX_CHARS: usize = 256;

struct CacheEntry {
    vector: Vec<f32>,
    last_access: u64,
}

struct QueryCache {
    entries: HashMap<String, CacheEntry>,
    counter: u64,
    capacity: usize,
}

impl QueryCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            counter: 0,
            capacity: capacity.max(1),
        }
    }

    fn get(&mut self, key: &str) -> Option<Vec<f32>> {
        self.counter += 1;
        let counter = self.counter;
        self.entries.get_mut(key).map(|entry| {
            entry.last_access = counter;
            entry.vector.clone()
        })
    }

    fn insert(&mut self, key: String, vector: Vec<f32>) {
        self.counter += 1;
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(
            key,
            CacheEntry {
                vector,
                last_access: self.counter,
            },
        );
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Wraps the external [`Embedder`] with lifecycle management, L2
/// normalization, and a bounded LRU cache for query embeddings.
///
/// Chunk embeddings (`embed_passage`) are computed exactly once per chunk
/// and persisted by the worker; only query-side embeddings are cached.
pub struct EmbedderFacade {
    runner: Mutex<Option<NativeRunner>>,
    cache: Mutex<QueryCache>,
}

impl EmbedderFacade {
    pub fn new() -> Self {
        Self::with_cache_capacity(DEFAULT_QUERY_CACHE)
    }

    pub fn with_cache_capacity(capacity: usize) -> Self {
        Self {
            runner: Mutex::new(None),
            cache: Mutex::new(QueryCache::new(capacity)),
        }
    }

    /// Attach an embedder, spawning its native runner. Idempotent: a second
    /// attach while one is live is a no-op.
    pub async fn attach(&self, embedder: Arc<dyn Embedder>) {
        let mut runner = self.runner.lock().await;
        if runner.is_none() {
            debug!("attaching embedder (dim {})", embedder.dim());
            *runner = Some(NativeRunner::spawn(embedder));
        }
    }

    /// Detach the embedder and clear the query cache.
    pub async fn detach(&self) {
        let mut runner = self.runner.lock().await;
        *runner = None;
        drop(runner);
        self.cache.lock().await.clear();
        debug!("embedder detached");
    }

    pub async fn is_attached(&self) -> bool {
        self.runner.lock().await.is_some()
    }

    /// Dimension of the attached embedder.
    pub async fn dim(&self) -> Result<usize, EmbedError> {
        self.current_runner().await.map(|r| r.dim())
    }

    /// Embed a chunk of document text. Never cached.
    pub async fn embed_passage(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let runner = self.current_runner().await?;
        let mut vector = runner.embed(text).await?;
        ensure_unit_norm(&mut vector);
        Ok(vector)
    }

    /// Embed a query, with caching. Cache hits return a defensive copy and
    /// never touch the underlying model.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, EmbedError> {
        let key = cache_key(query);

        if let Some(hit) = self.cache.lock().await.get(&key) {
            debug!("query cache hit");
            return Ok(hit);
        }

        let runner = self.current_runner().await?;
        let mut vector = runner.embed(query).await?;
        ensure_unit_norm(&mut vector);

        self.cache.lock().await.insert(key, vector.clone());
        Ok(vector)
    }

    /// Drop every cached query embedding.
    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    /// Number of cached query embeddings.
    pub async fn cache_len(&self) -> usize {
        self.cache.lock().await.len()
    }

    async fn current_runner(&self) -> Result<NativeRunner, EmbedError> {
        self.runner
            .lock()
            .await
            .clone()
            .ok_or(EmbedError::NotAttached)
    }
}

impl Default for EmbedderFacade {
    fn default() -> Self {
        Self::new()
    }
}

fn cache_key(query: &str) -> String {
    query
        .to_lowercase()
        .chars()
        .take(QUERY_KEY_MAX_CHARS)
        .collect()
}

fn ensure_unit_norm(vector: &mut [f32]) {
    if (l2_norm(vector) - 1.0).abs() > 1e-6 {
        normalize_l2(vector);
    }
}
