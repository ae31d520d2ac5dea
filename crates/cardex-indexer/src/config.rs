//! Indexer configuration.
//!
//! Lives at `<realm dir>/.cardex/config.json` and is written by
//! `cardex init`. Every field has a default so a partial file still loads.

use crate::error::IndexerError;
use cardex_core::url::{RealmUrl, UrlMapper, UrlMapping};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory holding config and the index store.
pub const CONFIG_DIR: &str = ".cardex";

/// Config file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexerConfig {
    pub realm_url: String,
    pub realm_username: String,
    /// Jobs that may wait in the queue before submitters back off.
    pub queue_capacity: usize,
    /// Index store location, relative to the realm directory.
    pub store_path: PathBuf,
    pub follow_symlinks: bool,
    /// Directory names that are never indexed, whatever the ignore files say.
    pub always_ignore: Vec<String>,
    /// Realm-to-realm URL prefix remapping for module loading.
    pub url_mappings: Vec<UrlMapping>,
    /// File watcher debounce window.
    pub debounce_ms: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            realm_url: "http://localhost:4201/".to_string(),
            realm_username: "indexer".to_string(),
            queue_capacity: 64,
            store_path: PathBuf::from(CONFIG_DIR).join("index"),
            follow_symlinks: false,
            always_ignore: vec!["node_modules".to_string()],
            url_mappings: Vec::new(),
            debounce_ms: 200,
        }
    }
}

impl IndexerConfig {
    /// Path of the config file for a realm directory.
    pub fn path_for(realm_dir: &Path) -> PathBuf {
        realm_dir.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Loads the config of a realm directory, falling back to defaults if
    /// there is none.
    pub fn load(realm_dir: &Path) -> Result<Self, IndexerError> {
        let path = Self::path_for(realm_dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| IndexerError::Config(format!("{}: {}", path.display(), e)))?;
        config.realm()?;
        Ok(config)
    }

    /// Writes the config into a realm directory.
    pub fn save(&self, realm_dir: &Path) -> Result<PathBuf, IndexerError> {
        let path = Self::path_for(realm_dir);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| IndexerError::Config(e.to_string()))?;
        fs::write(&path, text)?;
        Ok(path)
    }

    pub fn realm(&self) -> Result<RealmUrl, IndexerError> {
        Ok(RealmUrl::new(self.realm_url.clone())?)
    }

    pub fn url_mapper(&self) -> UrlMapper {
        self.url_mappings
            .iter()
            .fold(UrlMapper::new(), |mapper, m| mapper.with_mapping(&m.from, &m.to))
    }

    /// Absolute store location for a realm directory.
    pub fn store_dir(&self, realm_dir: &Path) -> PathBuf {
        if self.store_path.is_absolute() {
            self.store_path.clone()
        } else {
            realm_dir.join(&self.store_path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = IndexerConfig::load(dir.path()).unwrap();
        assert_eq!(config, IndexerConfig::default());
        assert_eq!(config.always_ignore, vec!["node_modules"]);
    }

    #[test]
    fn test_save_and_load_partial() {
        let dir = tempdir().unwrap();
        let mut config = IndexerConfig::default();
        config.realm_url = "http://test-realm/test".into();
        config.url_mappings.push(UrlMapping {
            from: "https://cardstack.com/catalog/".into(),
            to: "http://localhost:4201/catalog/".into(),
        });
        config.save(dir.path()).unwrap();

        let loaded = IndexerConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.realm().unwrap().as_str(), "http://test-realm/test/");
        assert!(!loaded.url_mapper().is_empty());

        std::fs::write(
            IndexerConfig::path_for(dir.path()),
            r#"{"realmUrl": "http://other/", "debounceMs": 50}"#,
        )
        .unwrap();
        let partial = IndexerConfig::load(dir.path()).unwrap();
        assert_eq!(partial.debounce_ms, 50);
        assert_eq!(partial.queue_capacity, 64);
    }

    #[test]
    fn test_relative_realm_url_is_rejected() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(CONFIG_DIR)).unwrap();
        std::fs::write(IndexerConfig::path_for(dir.path()), r#"{"realmUrl": "nope"}"#).unwrap();
        assert!(IndexerConfig::load(dir.path()).is_err());
    }
}
