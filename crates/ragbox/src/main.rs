//! # ragbox CLI
//!
//! Command-line front end for the ragbox engine: an offline
//! retrieval-augmented generation core that grounds a local LLM assistant
//! in user-supplied documents.
//!
//! ## Commands
//!
//! - `ragbox add <FILES>...` - index documents
//! - `ragbox list` - show indexed documents and their status
//! - `ragbox query <TEXT>` - retrieve the best-matching chunks
//! - `ragbox chat` - interactive prompt assembly (shows exactly what a
//!   connected model would receive)
//! - `ragbox remove <ID>` / `ragbox clear` - drop documents
//! - `ragbox status` - store statistics
//!
//! The CLI wires the deterministic [`HashEmbedder`] so everything works
//! offline; a production deployment attaches a real model through the
//! [`Embedder`](ragbox_core::Embedder) and [`LlmChat`] traits instead.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use ragbox_chat::{Route, Router, RouterConfig};
use ragbox_chunker::ChunkerConfig;
use ragbox_core::{ChatMessage, DocStatus, DocumentSource, FileSource, LlmChat, TokenStream};
use ragbox_embed::{EmbedderFacade, HashEmbedder};
use ragbox_query::{RagRepository, RepositoryConfig};
use ragbox_store::LocalRagStore;
use serde::Serialize;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

mod config;

use config::{data_dir, Config};

/// Embedding dimension of the built-in hashing embedder.
const EMBEDDING_DIM: usize = 384;

#[derive(Parser)]
#[command(name = "ragbox")]
#[command(about = "Offline RAG engine for local LLM assistants")]
#[command(version)]
struct Cli {
    /// Path to config file (default: ~/.config/ragbox/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Index one or more documents
    Add {
        /// Files to index
        files: Vec<PathBuf>,

        /// Wait for indexing to finish before returning
        #[arg(short, long, default_value_t = true)]
        wait: bool,
    },

    /// List indexed documents
    List,

    /// Remove one document by id
    Remove {
        /// Document id
        id: Uuid,
    },

    /// Remove every document and clear caches
    Clear,

    /// Retrieve the best-matching chunks for a query
    Query {
        /// Query text
        query: String,

        /// Maximum hits
        #[arg(short, long)]
        limit: Option<usize>,

        /// Minimum similarity score
        #[arg(short, long)]
        threshold: Option<f32>,

        /// Restrict to one document id
        #[arg(short, long)]
        doc: Option<Uuid>,
    },

    /// Show store statistics
    Status,

    /// Interactive prompt assembly against the indexed documents
    Chat,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Print a sample configuration file
    Init,
    /// Show the config file path
    Path,
}

#[derive(Serialize)]
struct QueryOutput {
    query: String,
    hits: Vec<HitItem>,
}

#[derive(Serialize)]
struct HitItem {
    doc: String,
    chunk: u32,
    score: f32,
    text: String,
}

#[derive(Serialize)]
struct DocItem {
    id: String,
    name: String,
    mime: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Minimal chat templating for prompt assembly: role-prefixed lines, the
/// shape a chat template produces before model-specific markers.
struct TemplateChat;

#[async_trait]
impl LlmChat for TemplateChat {
    fn template(&self, messages: &[ChatMessage]) -> ragbox_core::Result<String> {
        let mut out = String::new();
        for message in messages {
            out.push_str(message.role.as_str());
            out.push_str(": ");
            out.push_str(&message.content);
            out.push('\n');
        }
        out.push_str("assistant: ");
        Ok(out)
    }

    async fn send(&self, _prompt: &str) -> ragbox_core::Result<TokenStream> {
        // Generation belongs to the attached model; the CLI only assembles
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        Ok(rx)
    }

    fn eot_string(&self) -> String {
        "<|im_end|>".to_string()
    }
}

fn build_repository(config: &Config) -> Result<Arc<RagRepository>> {
    let root = data_dir().context("could not determine data directory")?;
    let store = Arc::new(LocalRagStore::new(root));

    let facade = Arc::new(EmbedderFacade::with_cache_capacity(
        config.cache.query_capacity,
    ));

    let worker_max = if config.workers.max_concurrent == 0 {
        ragbox_index::WorkerPool::default_concurrency()
    } else {
        config.workers.max_concurrent
    };

    let repo_config = RepositoryConfig {
        chunker: ChunkerConfig {
            target_chars: config.chunking.target_chars,
            overlap_chars: config.chunking.overlap_chars,
        },
        retrieval_top_k: config.retrieval.top_k,
        retrieval_threshold: config.retrieval.threshold,
        context_max_chars: config.context.max_chars,
        context_per_doc_cap: config.context.per_doc_cap,
        doc_cache_capacity: config.cache.doc_capacity,
        staging_cap_bytes: config.workers.staging_cap_bytes,
        worker_max_concurrent: worker_max,
    };

    Ok(Arc::new(RagRepository::new(store, facade, repo_config)))
}

fn router_config(config: &Config) -> RouterConfig {
    RouterConfig {
        keywords: config.router.keywords.clone(),
        history_window: config.router.history_window,
        shrunk_window: config.router.shrunk_window,
        prompt_soft_limit: config.router.prompt_soft_limit,
        retrieval_top_k: config.retrieval.top_k,
        retrieval_threshold: config.retrieval.threshold,
        context_max_chars: config.context.max_chars,
        ..Default::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    let config = if let Some(ref path) = cli.config {
        Config::load_from(Some(path.clone()))
            .with_context(|| format!("failed to load config from {}", path.display()))?
    } else {
        Config::load().context("failed to load config")?
    };

    match cli.command {
        Commands::Add { files, wait } => {
            if files.is_empty() {
                anyhow::bail!("no files given");
            }
            for file in &files {
                if !file.exists() {
                    anyhow::bail!("file does not exist: {}", file.display());
                }
            }

            let repo = build_repository(&config)?;
            repo.facade()
                .attach(Arc::new(HashEmbedder::new(EMBEDDING_DIM)))
                .await;

            let sources: Vec<Box<dyn DocumentSource>> = files
                .iter()
                .map(|f| Box::new(FileSource::new(f)) as Box<dyn DocumentSource>)
                .collect();
            let ids = repo.add_documents(sources).await?;

            if wait {
                for id in &ids {
                    repo.wait_for_indexing(*id).await;
                }
            }

            let docs = repo.snapshot_docs().await;
            for id in ids {
                match docs.iter().find(|d| d.doc_id == id) {
                    Some(doc) => match doc.status {
                        DocStatus::Ready => println!("{} {} ready", id, doc.display_name),
                        DocStatus::Indexing => {
                            println!("{} {} indexing", id, doc.display_name)
                        }
                        DocStatus::Failed => println!(
                            "{} {} failed: {}",
                            id,
                            doc.display_name,
                            doc.error.as_deref().unwrap_or("unknown error")
                        ),
                    },
                    None => println!("{id} missing"),
                }
            }
        }

        Commands::List => {
            let repo = build_repository(&config)?;
            let docs = repo.snapshot_docs().await;

            match cli.format {
                OutputFormat::Json => {
                    let items: Vec<DocItem> = docs
                        .iter()
                        .map(|d| DocItem {
                            id: d.doc_id.to_string(),
                            name: d.display_name.clone(),
                            mime: d.mime.clone(),
                            status: format!("{:?}", d.status).to_lowercase(),
                            error: d.error.clone(),
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&items)?);
                }
                OutputFormat::Text => {
                    if docs.is_empty() {
                        println!("No documents indexed.");
                    }
                    for d in docs {
                        let status = format!("{:?}", d.status).to_lowercase();
                        print!("{}  {:<9} {}", d.doc_id, status, d.display_name);
                        if let Some(err) = d.error {
                            print!("  ({err})");
                        }
                        println!();
                    }
                }
            }
        }

        Commands::Remove { id } => {
            let repo = build_repository(&config)?;
            repo.remove_document(id).await?;
            info!("removed {id}");
        }

        Commands::Clear => {
            let repo = build_repository(&config)?;
            repo.clear_all().await?;
            info!("removed all documents");
        }

        Commands::Query {
            query,
            limit,
            threshold,
            doc,
        } => {
            let repo = build_repository(&config)?;
            repo.facade()
                .attach(Arc::new(HashEmbedder::new(EMBEDDING_DIM)))
                .await;

            let hits = repo
                .retrieve(
                    &query,
                    limit.unwrap_or(config.retrieval.top_k),
                    threshold.unwrap_or(config.retrieval.threshold),
                    doc,
                )
                .await?;

            match cli.format {
                OutputFormat::Json => {
                    let output = QueryOutput {
                        query: query.clone(),
                        hits: hits
                            .iter()
                            .map(|h| HitItem {
                                doc: h.doc_name.clone(),
                                chunk: h.chunk_index,
                                score: h.score,
                                text: h.text.clone(),
                            })
                            .collect(),
                    };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Text => {
                    if hits.is_empty() {
                        println!("No results.");
                    }
                    for (i, hit) in hits.iter().enumerate() {
                        println!(
                            "{}. {} §{} (score {:.3})",
                            i + 1,
                            hit.doc_name,
                            hit.chunk_index + 1,
                            hit.score
                        );
                        println!("   {}", truncate(&hit.text, 160));
                    }
                }
            }
        }

        Commands::Status => {
            let repo = build_repository(&config)?;
            let docs = repo.snapshot_docs().await;
            let ready = docs.iter().filter(|d| d.is_ready()).count();
            let failed = docs
                .iter()
                .filter(|d| d.status == DocStatus::Failed)
                .count();

            println!("Documents: {} total, {} ready, {} failed", docs.len(), ready, failed);
        }

        Commands::Chat => {
            let repo = build_repository(&config)?;
            repo.facade()
                .attach(Arc::new(HashEmbedder::new(EMBEDDING_DIM)))
                .await;

            let chat = TemplateChat;
            let mut router = Router::new(router_config(&config));
            let mut history: Vec<ChatMessage> =
                vec![ChatMessage::system("You are a helpful assistant.")];

            println!("ragbox chat - prompt assembly preview. Empty line to exit, /reset to clear.");
            let stdin = std::io::stdin();
            loop {
                print!("> ");
                std::io::stdout().flush().ok();
                let mut line = String::new();
                if stdin.lock().read_line(&mut line)? == 0 {
                    break;
                }
                let line = line.trim();
                if line.is_empty() {
                    break;
                }
                if line == "/reset" {
                    router.reset();
                    history.truncate(1);
                    println!("(conversation cleared)");
                    continue;
                }

                match router.route(&repo, &chat, &history, line).await? {
                    Route::Status { message } => {
                        println!("{message}");
                    }
                    Route::Plain { prompt } => {
                        println!("--- prompt (plain chat) ---");
                        println!("{prompt}");
                        history.push(ChatMessage::user(line));
                    }
                    Route::Grounded { prompt, hits } => {
                        println!(
                            "--- prompt (grounded, {} excerpts{}) ---",
                            hits.len(),
                            router
                                .locked_doc()
                                .map(|id| format!(", locked to {id}"))
                                .unwrap_or_default()
                        );
                        println!("{prompt}");
                        history.push(ChatMessage::user(line));
                    }
                }
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
                OutputFormat::Text => println!("{}", toml::to_string_pretty(&config)?),
            },
            ConfigAction::Init => println!("{}", Config::sample_toml()),
            ConfigAction::Path => match Config::config_path() {
                Some(path) => println!("{}", path.display()),
                None => println!("Could not determine config directory"),
            },
        },
    }

    Ok(())
}

/// Truncate a string to a display length, flattening newlines.
fn truncate(s: &str, max_len: usize) -> String {
    let flat = s.replace('\n', " ");
    if flat.chars().count() <= max_len {
        flat
    } else {
        let cut: String = flat.chars().take(max_len.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
