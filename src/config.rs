//! YAML/JSON file loading for randomize configs, inventories and jobs.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use crate::error::ConfigError;
use crate::randomizer::RandomizeConfig;

/// Reads `path` as YAML (`.yaml`/`.yml`) or JSON (`.json`).
pub fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let display = path.display().to_string();
    let format = format_of(path).ok_or_else(|| ConfigError::UnsupportedExtension(display.clone()))?;
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: display.clone(),
        source,
    })?;

    match format {
        Format::Yaml => {
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml { path: display, source })
        }
        Format::Json => {
            serde_json::from_str(&content).map_err(|source| ConfigError::Json { path: display, source })
        }
    }
}

/// Loads a randomize config and rejects fields placed in the wrong section.
pub fn load_randomize_config(path: &Path) -> Result<RandomizeConfig, ConfigError> {
    let config: RandomizeConfig = load_file(path)?;
    config.validate()?;
    log::info!(
        "Loaded randomize config from {} ({} params, {} other, enabled: {})",
        path.display(),
        config.params.len(),
        config.other.len(),
        config.enabled
    );
    Ok(config)
}

/// Writes `value` to `path` in the format its extension names.
pub fn save_file<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    let display = path.display().to_string();
    let format = format_of(path).ok_or_else(|| ConfigError::UnsupportedExtension(display.clone()))?;
    let payload = match format {
        Format::Yaml => serde_yaml::to_string(value).map_err(|source| ConfigError::Yaml {
            path: display.clone(),
            source,
        })?,
        Format::Json => serde_json::to_string_pretty(value).map_err(|source| ConfigError::Json {
            path: display.clone(),
            source,
        })?,
    };

    std::fs::write(path, payload).map_err(|source| ConfigError::Io { path: display, source })
}

enum Format {
    Yaml,
    Json,
}

fn format_of(path: &Path) -> Option<Format> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "yaml" | "yml" => Some(Format::Yaml),
        "json" => Some(Format::Json),
        _ => None,
    }
}
