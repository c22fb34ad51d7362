//! Per-turn routing between plain chat and document-grounded chat.

use ragbox_core::{ChatMessage, DocRecord, DocStatus, LlmChat, Result, RetrievalHit};
use ragbox_query::RagRepository;
use tracing::{debug, info};
use uuid::Uuid;

use crate::window::window_messages;

/// Epilogue appended after the user's question in document mode.
const GROUNDING_RULES: &str = "RULES:\n\
1. Use ONLY the information from the excerpts above.\n\
2. If the answer is not in the excerpts, say \"I cannot find this in the uploaded documents.\"\n\
3. Do NOT repeat the excerpts word-for-word.\n\
4. Be concise and direct.";

/// Substitute block when documents are ready but nothing relevant was
/// found. Small models tend to ignore system messages, so the instruction
/// rides inside the user turn.
const NOT_FOUND_BLOCK: &str = "DOCUMENT CONTEXT (excerpts):\n\
No relevant excerpts were found for this question.\n\
Answer exactly: \"I cannot find this information in the uploaded documents.\"";

/// Router tunables.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Keywords that signal document intent. English defaults; override
    /// for other deployments.
    pub keywords: Vec<String>,
    /// Best-score gate above which context is injected without a keyword
    pub score_gate: f32,
    /// Lock releases when the best score drops below this and no keyword
    /// is present
    pub lock_release_score: f32,
    /// Non-system messages kept when templating
    pub history_window: usize,
    /// Window used when the templated prompt overruns the soft limit
    pub shrunk_window: usize,
    /// Soft character limit on the templated prompt
    pub prompt_soft_limit: usize,
    pub retrieval_top_k: usize,
    pub retrieval_threshold: f32,
    pub context_max_chars: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            keywords: ["file", "document", "doc", "pdf", "resume", "uploaded"]
                .into_iter()
                .map(String::from)
                .collect(),
            score_gate: 0.35,
            lock_release_score: 0.25,
            history_window: 10,
            shrunk_window: 6,
            prompt_soft_limit: 18_000,
            retrieval_top_k: 8,
            retrieval_threshold: 0.05,
            context_max_chars: 2400,
        }
    }
}

/// Outcome of routing one turn.
#[derive(Debug)]
pub enum Route {
    /// Plain chat, no document context.
    Plain { prompt: String },
    /// The user asked about documents but none are usable; the model is
    /// not invoked.
    Status { message: String },
    /// Document-grounded prompt with the hits that produced it.
    Grounded {
        prompt: String,
        hits: Vec<RetrievalHit>,
    },
}

/// Decides, per turn, whether document context is injected, and carries
/// the document lock across a multi-turn document conversation.
pub struct Router {
    config: RouterConfig,
    locked_doc: Option<Uuid>,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            locked_doc: None,
        }
    }

    pub fn locked_doc(&self) -> Option<Uuid> {
        self.locked_doc
    }

    /// Clearing the conversation unconditionally releases the lock.
    pub fn reset(&mut self) {
        self.locked_doc = None;
    }

    /// Route one user turn.
    ///
    /// `history` is the conversation so far (without the new user
    /// message); `user_text` is the incoming user message.
    pub async fn route(
        &mut self,
        repo: &RagRepository,
        chat: &dyn LlmChat,
        history: &[ChatMessage],
        user_text: &str,
    ) -> Result<Route> {
        let docs = repo.snapshot_docs().await;
        let has_keyword = self.matches_keyword(user_text);
        let any_ready = docs.iter().any(|d| d.status == DocStatus::Ready);

        if !any_ready {
            if has_keyword {
                return Ok(Route::Status {
                    message: status_message(&docs),
                });
            }
            let prompt = self.template_windowed(chat, history, user_text)?;
            return Ok(Route::Plain { prompt });
        }

        let hits = repo
            .retrieve(
                user_text,
                self.config.retrieval_top_k,
                self.config.retrieval_threshold,
                self.locked_doc,
            )
            .await?;
        let best_score = hits.first().map(|h| h.score).unwrap_or(0.0);

        if self.locked_doc.is_some()
            && best_score < self.config.lock_release_score
            && !has_keyword
        {
            info!("releasing document lock (best score {best_score:.3})");
            self.locked_doc = None;
        }

        let use_docs = best_score > self.config.score_gate || has_keyword;
        if !use_docs {
            debug!("suppressing document context (best score {best_score:.3})");
            let prompt = self.template_windowed(chat, history, user_text)?;
            return Ok(Route::Plain { prompt });
        }

        // First document-mode turn selects the lock: the most recently
        // created ready doc, else the top hit's doc
        if self.locked_doc.is_none() {
            let lock = docs
                .iter()
                .find(|d| d.status == DocStatus::Ready)
                .map(|d| d.doc_id)
                .or_else(|| hits.first().map(|h| h.doc_id));
            if let Some(id) = lock {
                info!("locking document conversation to {id}");
                self.locked_doc = Some(id);
            }
        }

        // Similarity found nothing: fall back to the head of the locked doc
        let hits = if hits.is_empty() {
            match self.locked_doc {
                Some(id) => {
                    repo.fallback_top_chunks(id, repo.config().context_per_doc_cap)
                        .await?
                }
                None => hits,
            }
        } else {
            hits
        };

        let block = repo
            .build_context_block(&hits, self.config.context_max_chars)
            .unwrap_or_else(|| NOT_FOUND_BLOCK.to_string());

        let grounded_user = format!(
            "{block}\n\nBased ONLY on the document excerpts above, please answer this question:\n{user_text}\n\n{GROUNDING_RULES}"
        );
        let prompt = self.template_windowed(chat, history, &grounded_user)?;

        Ok(Route::Grounded { prompt, hits })
    }

    fn matches_keyword(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.config.keywords.iter().any(|k| lowered.contains(k))
    }

    /// Window, template, and re-window once when the prompt overruns the
    /// soft limit.
    fn template_windowed(
        &self,
        chat: &dyn LlmChat,
        history: &[ChatMessage],
        user_text: &str,
    ) -> Result<String> {
        let mut messages = window_messages(history, self.config.history_window);
        messages.push(ChatMessage::user(user_text));
        let prompt = chat.template(&messages)?;

        if prompt.chars().count() <= self.config.prompt_soft_limit {
            return Ok(prompt);
        }

        debug!("prompt over soft limit, shrinking history window");
        let mut messages = window_messages(history, self.config.shrunk_window);
        messages.push(ChatMessage::user(user_text));
        chat.template(&messages)
    }
}

/// User-visible status when documents are referenced but none are ready.
fn status_message(docs: &[DocRecord]) -> String {
    if docs.iter().any(|d| d.status == DocStatus::Indexing) {
        "Document indexing in progress. Please try again in a moment.".to_string()
    } else if docs.iter().any(|d| d.status == DocStatus::Failed) {
        "Document indexing failed. Remove the document and add it again.".to_string()
    } else {
        "No documents indexed yet. Add a document to ask questions about it.".to_string()
    }
}
