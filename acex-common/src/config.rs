//! Configuration loading and cache location resolution
//!
//! Resolution priority for every setting:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file (`<config dir>/acex/acex.toml`)
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings read from the optional TOML config file
///
/// Every field is optional; missing fields fall through to the next
/// resolution tier. A missing or malformed file never aborts startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Cache root to scan
    pub cache_dir: Option<String>,
    /// Output root for the emission tree
    pub output_dir: Option<String>,
    /// Worker pool size
    pub workers: Option<usize>,
    /// "duration" or "size"
    pub classification: Option<String>,
    /// Include the client's index database in the scan
    pub scan_index_db: Option<bool>,
    /// Target codec for the optional transcode pass
    pub convert_to: Option<String>,
}

/// Load the TOML config from its conventional location, if present
///
/// Missing file or unparseable content degrades to defaults with a warning.
pub fn load_toml_config() -> TomlConfig {
    let Some(path) = config_file_path() else {
        return TomlConfig::default();
    };
    load_toml_config_from(&path)
}

/// Load a TOML config from an explicit path
pub fn load_toml_config_from(path: &Path) -> TomlConfig {
    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Malformed config file, using defaults");
                TomlConfig::default()
            }
        },
        Err(_) => TomlConfig::default(),
    }
}

/// Write a TOML config atomically (write-temp + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp = path.with_extension("toml.tmp");
    std::fs::write(&temp, content)?;
    std::fs::rename(&temp, path)?;
    Ok(())
}

/// Conventional config file path for the platform
pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("acex").join("acex.toml"))
}

/// OS-dependent default location of the game client's cache
///
/// On Windows this is the client's `%LOCALAPPDATA%` blob store; elsewhere the
/// equivalent local-data directory is used (useful for caches copied off a
/// Windows machine, and for tests).
pub fn default_cache_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("Roblox").join("rbx-storage"))
        .unwrap_or_else(|| PathBuf::from("./rbx-storage"))
}

/// Conventional location of the client's SQLite index next to the blob store
///
/// The index lives as a sibling of the storage folder: `<parent>/rbx-storage.db`.
pub fn default_index_db_path(cache_dir: &Path) -> PathBuf {
    match cache_dir.parent() {
        Some(parent) => parent.join("rbx-storage.db"),
        None => PathBuf::from("rbx-storage.db"),
    }
}

/// Default output root: `<cache_dir>/extracted`
pub fn default_output_dir(cache_dir: &Path) -> PathBuf {
    cache_dir.join("extracted")
}

/// Default processed-set location: `<config dir>/acex/extract_history.json`
pub fn default_history_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("acex").join("extract_history.json"))
        .unwrap_or_else(|| PathBuf::from("./extract_history.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_yields_defaults() {
        let config = load_toml_config_from(Path::new("/nonexistent/acex.toml"));
        assert!(config.cache_dir.is_none());
        assert!(config.workers.is_none());
    }

    #[test]
    fn malformed_config_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acex.toml");
        std::fs::write(&path, "not [ valid { toml").unwrap();

        let config = load_toml_config_from(&path);
        assert!(config.cache_dir.is_none());
    }

    #[test]
    fn write_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acex.toml");

        let config = TomlConfig {
            cache_dir: Some("/tmp/cache".to_string()),
            workers: Some(8),
            classification: Some("size".to_string()),
            ..Default::default()
        };
        write_toml_config(&config, &path).unwrap();

        let loaded = load_toml_config_from(&path);
        assert_eq!(loaded.cache_dir.as_deref(), Some("/tmp/cache"));
        assert_eq!(loaded.workers, Some(8));
        assert_eq!(loaded.classification.as_deref(), Some("size"));
        assert!(loaded.convert_to.is_none());
    }

    #[test]
    fn index_db_is_sibling_of_storage_folder() {
        let db = default_index_db_path(Path::new("/data/Roblox/rbx-storage"));
        assert_eq!(db, PathBuf::from("/data/Roblox/rbx-storage.db"));
    }
}
