use super::Config;
use anyhow::Result;
use tracing::warn;

use super::types::ServiceProvider;

/// Validation errors for configuration.
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validate a configuration object.
pub fn validate_config(config: &Config) -> Vec<ConfigValidationError> {
    let mut errors = Vec::new();

    if config.completion.timeout_secs == 0 {
        errors.push(ConfigValidationError {
            path: "completion.timeoutSecs".to_string(),
            message: "Timeout must be greater than 0".to_string(),
        });
    }

    if config.embedding.timeout_secs == 0 {
        errors.push(ConfigValidationError {
            path: "embedding.timeoutSecs".to_string(),
            message: "Timeout must be greater than 0".to_string(),
        });
    }

    for (section, base_url) in [
        ("completion", config.completion.resolved_base_url()),
        ("embedding", config.embedding.resolved_base_url()),
    ] {
        if let Err(e) = url::Url::parse(&base_url) {
            errors.push(ConfigValidationError {
                path: format!("{section}.baseUrl"),
                message: format!("Invalid URL '{base_url}': {e}"),
            });
        }
    }

    if config.completion.model.trim().is_empty() {
        errors.push(ConfigValidationError {
            path: "completion.model".to_string(),
            message: "Model is required".to_string(),
        });
    }

    if config.embedding.model.trim().is_empty() {
        errors.push(ConfigValidationError {
            path: "embedding.model".to_string(),
            message: "Model is required".to_string(),
        });
    }

    if config.embedding.dimensions == Some(0) {
        errors.push(ConfigValidationError {
            path: "embedding.dimensions".to_string(),
            message: "Dimensions must be greater than 0".to_string(),
        });
    }

    if config.embedding.cache.enabled && config.embedding.cache.max_entries == 0 {
        errors.push(ConfigValidationError {
            path: "embedding.cache.maxEntries".to_string(),
            message: "Cache size must be greater than 0 when the cache is enabled".to_string(),
        });
    }

    if config.memory.search_limit <= 0 {
        errors.push(ConfigValidationError {
            path: "memory.searchLimit".to_string(),
            message: "Search limit must be greater than 0".to_string(),
        });
    }

    if config.memory.pool_size == 0 {
        errors.push(ConfigValidationError {
            path: "memory.poolSize".to_string(),
            message: "Pool size must be greater than 0".to_string(),
        });
    }

    if config.completion.provider == ServiceProvider::Openai && config.completion.api_key.is_none() {
        warn!("Completion provider is 'openai' but no API key is configured");
    }

    if config.embedding.provider == ServiceProvider::Openai && config.embedding.api_key.is_none() {
        warn!("Embedding provider is 'openai' but no API key is configured");
    }

    errors
}

/// Validate configuration and return Result.
pub fn validate_config_object(config: &Config) -> Result<()> {
    let errors = validate_config(config);
    if errors.is_empty() {
        Ok(())
    } else {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        anyhow::bail!("Configuration validation failed:\n{}", messages.join("\n"));
    }
}
