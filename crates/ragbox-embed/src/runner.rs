//! Single-task runner for the native inference context.

use ragbox_core::{EmbedError, Embedder};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

enum Job {
    Embed {
        text: String,
        reply: oneshot::Sender<Result<Vec<f32>, EmbedError>>,
    },
}

/// Serializes every embedding call onto one task.
///
/// The wrapped native state is not thread-safe, so callers submit and await
/// instead of calling it directly. A call in flight cannot be preempted;
/// caller cancellation takes effect at the next job boundary.
#[derive(Clone)]
pub struct NativeRunner {
    tx: mpsc::Sender<Job>,
    dim: usize,
}

impl NativeRunner {
    /// Spawn the runner task around an embedder. Dropping every handle
    /// shuts the task down.
    pub fn spawn(embedder: Arc<dyn Embedder>) -> Self {
        let dim = embedder.dim();
        let (tx, mut rx) = mpsc::channel::<Job>(32);

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    Job::Embed { text, reply } => {
                        let result = embedder.embed(&text).await;
                        // Receiver may have been cancelled; that's fine
                        let _ = reply.send(result);
                    }
                }
            }
            debug!("native runner shut down");
        });

        Self { tx, dim }
    }

    /// Embedding dimension of the wrapped model.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Submit one embedding call and await its result.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Job::Embed {
                text: text.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| EmbedError::NotAttached)?;

        reply_rx
            .await
            .map_err(|_| EmbedError::Failed("native runner dropped the reply".to_string()))?
    }
}
