//! Deterministic hashing embedder.
//!
//! Maps tokens into a fixed-dimension unit vector by feature hashing. Texts
//! sharing tokens get positive cosine similarity, which is enough for tests,
//! dry runs, and offline demos without any model weights.

use async_trait::async_trait;
use ragbox_core::vector::normalize_l2;
use ragbox_core::{EmbedError, Embedder};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Feature-hashing embedder with a call counter.
pub struct HashEmbedder {
    dim: usize,
    calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim: dim.max(1),
            calls: AtomicUsize::new(0),
        }
    }

    /// How many times `embed` ran; lets tests verify cache hits.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        let lowered = text.to_lowercase();
        for token in lowered.split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let bucket =
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize % self.dim;
            let sign = if bytes[4] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }

        if v.iter().all(|x| *x == 0.0) {
            v[0] = 1.0;
        }
        normalize_l2(&mut v);
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.embed_sync(text))
    }
}
