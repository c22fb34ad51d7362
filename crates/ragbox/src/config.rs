//! Configuration handling for the ragbox CLI.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure, loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Chunking configuration
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Retrieval configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Context block configuration
    #[serde(default)]
    pub context: ContextConfig,

    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Router configuration
    #[serde(default)]
    pub router: RouterSection,

    /// Worker configuration
    #[serde(default)]
    pub workers: WorkerConfig,
}

/// Chunking-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target chunk size (characters)
    #[serde(default = "default_target_chars")]
    pub target_chars: usize,

    /// Overlap carried between chunks (characters)
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

fn default_target_chars() -> usize {
    800
}

fn default_overlap_chars() -> usize {
    350
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_chars: default_target_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

/// Retrieval-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Default number of hits
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Minimum similarity score
    #[serde(default = "default_threshold")]
    pub threshold: f32,
}

fn default_top_k() -> usize {
    8
}

fn default_threshold() -> f32 {
    0.05
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            threshold: default_threshold(),
        }
    }
}

/// Context block configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Character budget of the assembled block
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    /// Maximum excerpts per document
    #[serde(default = "default_per_doc_cap")]
    pub per_doc_cap: usize,
}

fn default_max_chars() -> usize {
    2400
}

fn default_per_doc_cap() -> usize {
    6
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            per_doc_cap: default_per_doc_cap(),
        }
    }
}

/// Cache sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Documents held in the unpacked vector cache
    #[serde(default = "default_doc_capacity")]
    pub doc_capacity: usize,

    /// Query embeddings held in the facade cache
    #[serde(default = "default_query_capacity")]
    pub query_capacity: usize,
}

fn default_doc_capacity() -> usize {
    8
}

fn default_query_capacity() -> usize {
    64
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            doc_capacity: default_doc_capacity(),
            query_capacity: default_query_capacity(),
        }
    }
}

/// Router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSection {
    /// Keywords that signal document intent
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,

    /// History messages kept when templating
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// History messages kept when the prompt overruns the soft limit
    #[serde(default = "default_shrunk_window")]
    pub shrunk_window: usize,

    /// Soft character limit on the templated prompt
    #[serde(default = "default_prompt_soft_limit")]
    pub prompt_soft_limit: usize,
}

fn default_keywords() -> Vec<String> {
    ["file", "document", "doc", "pdf", "resume", "uploaded"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_history_window() -> usize {
    10
}

fn default_shrunk_window() -> usize {
    6
}

fn default_prompt_soft_limit() -> usize {
    18_000
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            keywords: default_keywords(),
            history_window: default_history_window(),
            shrunk_window: default_shrunk_window(),
            prompt_soft_limit: default_prompt_soft_limit(),
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum concurrent indexing jobs (0 = physical cores, min 2)
    #[serde(default)]
    pub max_concurrent: usize,

    /// Staging size cap per document, bytes
    #[serde(default = "default_staging_cap")]
    pub staging_cap_bytes: u64,
}

fn default_staging_cap() -> u64 {
    100 * 1024 * 1024
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 0,
            staging_cap_bytes: default_staging_cap(),
        }
    }
}

impl Config {
    /// Load from the default config path; missing file means defaults.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Self::config_path())
    }

    /// Load from an explicit path; `None` or a missing file means defaults.
    pub fn load_from(path: Option<PathBuf>) -> anyhow::Result<Self> {
        match path {
            Some(path) if path.exists() => {
                let text = std::fs::read_to_string(&path)?;
                Ok(toml::from_str(&text)?)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Default config file path.
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "ragbox").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Sample configuration with every default spelled out.
    pub fn sample_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Data directory for the store.
pub fn data_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("RAGBOX_DATA_DIR") {
        return Some(PathBuf::from(dir));
    }
    ProjectDirs::from("", "", "ragbox").map(|dirs| dirs.data_dir().to_path_buf())
}
