mod defaults;
mod io;
mod types;
mod validation;

pub use defaults::*;
pub use io::*;
pub use types::*;
pub use validation::*;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Top-level Cintessa configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub backup: BackupConfig,

    /// State directory for persistent data.
    #[serde(skip)]
    pub state_dir: PathBuf,
}

impl Config {
    /// Load configuration from file, environment, and defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = path
            .map(PathBuf::from)
            .or_else(find_config_file)
            .unwrap_or_else(|| PathBuf::from("cintessa.json"));

        let mut config = if config_path.exists() {
            info!("Loading config from {}", config_path.display());
            load_config_file(&config_path)?
        } else {
            info!("No config file found, using defaults");
            Config::default()
        };

        config.state_dir = resolve_state_dir();
        config.apply_env_overrides();

        Ok(config)
    }

    /// Write default configuration to a file.
    pub fn write_default(path: &str) -> Result<()> {
        write_config_file(Path::new(path), &Config::default())
    }

    /// Path of the SQLite memory database.
    pub fn memory_db_path(&self) -> PathBuf {
        self.memory
            .db_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.state_dir.join("memory").join("memories.db"))
    }

    /// Directory holding the per-user cold backups.
    pub fn backup_dir(&self) -> PathBuf {
        self.backup
            .dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.state_dir.join("users"))
    }

    /// Apply environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("CINTESSA_OLLAMA_URL") {
            if self.completion.provider == ServiceProvider::Ollama {
                self.completion.base_url = Some(url.clone());
            }
            if self.embedding.provider == ServiceProvider::Ollama {
                self.embedding.base_url = Some(url);
            }
        }

        if let Ok(model) = std::env::var("CINTESSA_MODEL") {
            self.completion.model = model;
        }

        if let Ok(model) = std::env::var("CINTESSA_EMBEDDING_MODEL") {
            self.embedding.model = model;
        }

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if self.completion.provider == ServiceProvider::Openai {
                self.completion.api_key.get_or_insert(key.clone());
            }
            if self.embedding.provider == ServiceProvider::Openai {
                self.embedding.api_key.get_or_insert(key);
            }
        }

        if let Ok(path) = std::env::var("CINTESSA_DB_PATH") {
            self.memory.db_path = Some(path);
        }

        if let Ok(dir) = std::env::var("CINTESSA_BACKUP_DIR") {
            self.backup.dir = Some(dir);
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            completion: CompletionConfig::default(),
            embedding: EmbeddingConfig::default(),
            memory: MemoryConfig::default(),
            backup: BackupConfig::default(),
            state_dir: resolve_state_dir(),
        }
    }
}

/// Find the configuration file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    let candidates = [
        PathBuf::from("cintessa.json"),
        PathBuf::from("cintessa.yaml"),
        PathBuf::from("cintessa.yml"),
        PathBuf::from("cintessa.toml"),
    ];

    for path in &candidates {
        if path.exists() {
            return Some(path.clone());
        }
    }

    if let Some(home) = dirs::home_dir() {
        let home_config = home.join(".cintessa").join("config.json");
        if home_config.exists() {
            return Some(home_config);
        }
    }

    None
}

/// Resolve the state directory for persistent data.
fn resolve_state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CINTESSA_STATE_DIR") {
        return PathBuf::from(dir);
    }

    dirs::home_dir()
        .map(|h| h.join(".cintessa"))
        .unwrap_or_else(|| PathBuf::from(".cintessa"))
}
