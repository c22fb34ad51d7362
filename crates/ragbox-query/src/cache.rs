//! Bounded LRU cache of unpacked per-document vector data.

use ragbox_core::Chunk;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use uuid::Uuid;

/// Immutable snapshot of one document's chunks and packed vectors.
///
/// An entry reflects the on-disk bytes as of the recorded mtimes; the
/// repository drops it whenever either file changes.
#[derive(Clone)]
pub(crate) struct DocCacheEntry {
    pub chunks: Arc<Vec<Chunk>>,
    pub packed: Arc<Vec<u8>>,
    pub bytes_per_vec: usize,
    pub chunks_mtime: SystemTime,
    pub emb_mtime: SystemTime,
}

impl DocCacheEntry {
    pub fn dim(&self) -> usize {
        self.bytes_per_vec / 4
    }
}

struct Slot {
    entry: DocCacheEntry,
    last_access: u64,
}

/// LRU map from document id to cached vector data.
pub(crate) struct DocVectorCache {
    slots: HashMap<Uuid, Slot>,
    counter: u64,
    capacity: usize,
}

impl DocVectorCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: HashMap::new(),
            counter: 0,
            capacity: capacity.max(1),
        }
    }

    pub fn get(&mut self, doc_id: Uuid) -> Option<DocCacheEntry> {
        self.counter += 1;
        let counter = self.counter;
        self.slots.get_mut(&doc_id).map(|slot| {
            slot.last_access = counter;
            slot.entry.clone()
        })
    }

    pub fn insert(&mut self, doc_id: Uuid, entry: DocCacheEntry) {
        self.counter += 1;
        if self.slots.len() >= self.capacity && !self.slots.contains_key(&doc_id) {
            if let Some(oldest) = self
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_access)
                .map(|(id, _)| *id)
            {
                self.slots.remove(&oldest);
            }
        }
        self.slots.insert(
            doc_id,
            Slot {
                entry,
                last_access: self.counter,
            },
        );
    }

    pub fn invalidate(&mut self, doc_id: Uuid) {
        self.slots.remove(&doc_id);
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}
