use anyhow::{bail, Context, Result};
use std::path::Path;

use super::Config;

/// Maximum size for a config file (1 MB).
pub const MAX_CONFIG_FILE_BYTES: u64 = 1024 * 1024;

/// Read a configuration file into a generic JSON value.
///
/// The format is picked from the extension: YAML, TOML, or JSON5 (which also
/// accepts plain JSON) for anything else.
pub fn read_config_value(path: &Path) -> Result<serde_json::Value> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Cannot stat config file '{}'", path.display()))?;

    if metadata.len() > MAX_CONFIG_FILE_BYTES {
        bail!(
            "Config file '{}' is {} bytes, exceeds limit of {} bytes",
            path.display(),
            metadata.len(),
            MAX_CONFIG_FILE_BYTES,
        );
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    let value = match ext {
        "yaml" | "yml" => serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid YAML in '{}'", path.display()))?,
        "toml" => toml::from_str(&content)
            .with_context(|| format!("Invalid TOML in '{}'", path.display()))?,
        _ => json5::from_str(&content)
            .with_context(|| format!("Invalid JSON in '{}'", path.display()))?,
    };

    Ok(value)
}

/// Load a typed configuration from `path`.
pub fn load_config_file(path: &Path) -> Result<Config> {
    let value = read_config_value(path)?;
    let config = serde_json::from_value(value)
        .with_context(|| format!("Config file '{}' does not match the schema", path.display()))?;
    Ok(config)
}

/// Write configuration to a pretty-printed JSON file.
pub fn write_config_file(path: &Path, config: &Config) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file '{}'", path.display()))?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
