//! Bounded worker pool keyed by document id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::worker::{run_index_job, IndexContext, IndexJob};
use ragbox_core::{IndexError, Result};

/// Cooperative cancellation flag, checked at every stage boundary.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Bail out with [`IndexError::Cancelled`] when the flag is set.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(IndexError::Cancelled.into())
        } else {
            Ok(())
        }
    }
}

struct Running {
    generation: u64,
    cancel: CancelFlag,
    handle: JoinHandle<()>,
}

/// Fair FIFO pool of indexing jobs, bounded by a semaphore and uniquely
/// keyed by `doc_id`: submitting a document that is already queued or
/// running replaces the in-flight job.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    running: Arc<Mutex<HashMap<Uuid, Running>>>,
    generation: AtomicU64,
}

impl WorkerPool {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            running: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Default worker count: physical cores, minimum two.
    pub fn default_concurrency() -> usize {
        num_cpus::get_physical().max(2)
    }

    /// Enqueue an indexing job, replacing any in-flight job for the same id.
    pub async fn submit(&self, ctx: Arc<IndexContext>, job: IndexJob) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancelFlag::default();
        let doc_id = job.doc_id;

        let mut running = self.running.lock().await;
        if let Some(previous) = running.remove(&doc_id) {
            debug!("replacing in-flight worker for {}", doc_id);
            previous.cancel.cancel();
        }

        let semaphore = Arc::clone(&self.semaphore);
        let map = Arc::clone(&self.running);
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            if !task_cancel.is_cancelled() {
                if let Err(e) = run_index_job(&ctx, &job, &task_cancel).await {
                    if !e.is_cancelled() {
                        warn!("worker for {} failed: {}", doc_id, e);
                    }
                }
            }

            // Remove our own entry unless a newer submission replaced it
            let mut map = map.lock().await;
            if map.get(&doc_id).map(|r| r.generation) == Some(generation) {
                map.remove(&doc_id);
            }
        });

        running.insert(
            doc_id,
            Running {
                generation,
                cancel,
                handle,
            },
        );
    }

    /// Cancel the worker for one document and wait for it to wind down.
    pub async fn cancel(&self, doc_id: Uuid) {
        let entry = self.running.lock().await.remove(&doc_id);
        if let Some(entry) = entry {
            entry.cancel.cancel();
            let _ = entry.handle.await;
        }
    }

    /// Cancel every worker and wait for all of them.
    pub async fn cancel_all(&self) {
        let entries: Vec<Running> = {
            let mut map = self.running.lock().await;
            map.drain().map(|(_, v)| v).collect()
        };
        for entry in &entries {
            entry.cancel.cancel();
        }
        for entry in entries {
            let _ = entry.handle.await;
        }
    }

    /// Whether a worker is queued or running for this document.
    pub async fn is_active(&self, doc_id: Uuid) -> bool {
        self.running.lock().await.contains_key(&doc_id)
    }

    /// Wait until the worker for this document (if any) has finished.
    pub async fn wait_for(&self, doc_id: Uuid) {
        loop {
            let done = {
                let map = self.running.lock().await;
                match map.get(&doc_id) {
                    Some(entry) => entry.handle.is_finished(),
                    None => true,
                }
            };
            if done {
                // Entry may still linger briefly between job end and
                // self-removal; that's fine for callers
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}
