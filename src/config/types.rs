use serde::{Deserialize, Serialize};

use super::defaults::*;

// ============================================================================
// Service Providers
// ============================================================================

/// Wire protocol spoken by an external model service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceProvider {
    #[default]
    Ollama,
    Openai,
}

impl ServiceProvider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            ServiceProvider::Ollama => DEFAULT_OLLAMA_URL,
            ServiceProvider::Openai => DEFAULT_OPENAI_URL,
        }
    }
}

// ============================================================================
// Completion Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionConfig {
    #[serde(default)]
    pub provider: ServiceProvider,
    pub base_url: Option<String>,
    #[serde(default = "default_completion_model")]
    pub model: String,
    pub api_key: Option<String>,
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl CompletionConfig {
    pub fn resolved_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.provider.default_base_url().to_string())
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: ServiceProvider::default(),
            base_url: None,
            model: default_completion_model(),
            api_key: None,
            timeout_secs: DEFAULT_COMPLETION_TIMEOUT_SECS,
            system_prompt: default_system_prompt(),
        }
    }
}

// ============================================================================
// Embedding Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: ServiceProvider,
    pub base_url: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    pub api_key: Option<String>,
    /// Expected vector length. When set, responses of any other length are
    /// rejected as malformed.
    pub dimensions: Option<usize>,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub cache: EmbeddingCacheConfig,
}

impl EmbeddingConfig {
    pub fn resolved_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.provider.default_base_url().to_string())
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ServiceProvider::default(),
            base_url: None,
            model: default_embedding_model(),
            api_key: None,
            dimensions: None,
            timeout_secs: DEFAULT_EMBEDDING_TIMEOUT_SECS,
            cache: EmbeddingCacheConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingCacheConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
}

impl Default for EmbeddingCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_entries: DEFAULT_EMBEDDING_CACHE_ENTRIES,
        }
    }
}

// ============================================================================
// Memory Store Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryConfig {
    /// SQLite file; defaults to `<state_dir>/memory/memories.db`.
    pub db_path: Option<String>,
    #[serde(default = "default_search_limit")]
    pub search_limit: i64,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            search_limit: DEFAULT_SEARCH_LIMIT,
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

// ============================================================================
// Cold Backup Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfig {
    /// Directory holding one `<username>.json` per user; defaults to
    /// `<state_dir>/users`.
    pub dir: Option<String>,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_completion_model() -> String {
    DEFAULT_COMPLETION_MODEL.to_string()
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_completion_timeout() -> u64 {
    DEFAULT_COMPLETION_TIMEOUT_SECS
}

fn default_embedding_timeout() -> u64 {
    DEFAULT_EMBEDDING_TIMEOUT_SECS
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_cache_entries() -> usize {
    DEFAULT_EMBEDDING_CACHE_ENTRIES
}

fn default_search_limit() -> i64 {
    DEFAULT_SEARCH_LIMIT
}

fn default_pool_size() -> u32 {
    DEFAULT_POOL_SIZE
}
