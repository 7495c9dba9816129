//! Index catalog - key -> {description, updated}
//!
//! Stored as `index.json`. Every mutation is read-modify-write of the whole
//! file followed by an atomic rename; callers hold the store lock around it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{CredentialError, IoContext, Result};
use crate::fsio;

pub const INDEX_FILE: &str = "index.json";

/// Metadata for one stored credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub description: String,
    pub updated: DateTime<Utc>,
}

/// One row of `list()` output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogRow {
    pub key: String,
    pub description: String,
    pub updated: DateTime<Utc>,
}

/// The full catalog, ordered by key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexCatalog {
    entries: BTreeMap<String, IndexEntry>,
}

impl IndexCatalog {
    /// Load the catalog. A missing file is an empty catalog.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .io_context(|| format!("Failed to read {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_json::from_str(&content)
            .map_err(|e| CredentialError::Catalog(format!("{}: {}", path.display(), e)))
    }

    /// Serialize in full and atomically replace the file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_vec_pretty(self)
            .map_err(|e| CredentialError::Catalog(format!("Failed to serialize index: {}", e)))?;
        fsio::write_private_atomic(path, &content)
    }

    /// Insert or replace the entry for `key`, leaving all others untouched
    pub fn upsert(&mut self, key: &str, entry: IndexEntry) {
        self.entries.insert(key.to_string(), entry);
    }

    /// Record a store of `key` at `now`.
    ///
    /// `updated` strictly increases per key even if the clock stalls or
    /// steps backwards between two writes.
    pub fn touch(&mut self, key: &str, description: &str, now: DateTime<Utc>) -> &IndexEntry {
        let updated = match self.entries.get(key) {
            Some(prev) if now <= prev.updated => prev.updated + Duration::microseconds(1),
            _ => now,
        };
        self.entries.insert(
            key.to_string(),
            IndexEntry {
                description: description.to_string(),
                updated,
            },
        );
        &self.entries[key]
    }

    pub fn remove(&mut self, key: &str) -> Option<IndexEntry> {
        self.entries.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&IndexEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All rows in key order
    pub fn rows(&self) -> Vec<CatalogRow> {
        self.entries
            .iter()
            .map(|(key, entry)| CatalogRow {
                key: key.clone(),
                description: entry.description.clone(),
                updated: entry.updated,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(desc: &str) -> IndexEntry {
        IndexEntry {
            description: desc.to_string(),
            updated: Utc::now(),
        }
    }

    #[test]
    fn test_missing_and_empty_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        assert!(IndexCatalog::load(&path).unwrap().is_empty());

        std::fs::write(&path, "  \n").unwrap();
        assert!(IndexCatalog::load(&path).unwrap().is_empty());
    }

    #[test]
    fn test_upsert_leaves_others_untouched() {
        let mut catalog = IndexCatalog::default();
        catalog.upsert("a", entry("A"));
        catalog.upsert("b", entry("B"));
        catalog.upsert("a", entry("A2"));

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("a").unwrap().description, "A2");
        assert_eq!(catalog.get("b").unwrap().description, "B");
    }

    #[test]
    fn test_touch_strictly_increases() {
        let mut catalog = IndexCatalog::default();
        let now = Utc::now();

        let first = catalog.touch("k", "d1", now).updated;
        let second = catalog.touch("k", "d2", now).updated;
        let third = catalog.touch("k", "d3", now - Duration::seconds(30)).updated;

        assert!(second > first);
        assert!(third > second);
        assert_eq!(catalog.get("k").unwrap().description, "d3");
    }

    #[test]
    fn test_rows_sorted_by_key() {
        let mut catalog = IndexCatalog::default();
        for key in ["redis_url", "aws_region", "github_token"] {
            catalog.upsert(key, entry(key));
        }

        let keys: Vec<String> = catalog.rows().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["aws_region", "github_token", "redis_url"]);
    }

    #[test]
    fn test_save_load_and_remove() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);

        let mut catalog = IndexCatalog::default();
        catalog.upsert("github_token", entry("GitHub PAT"));
        catalog.upsert("npm_token", entry("npm"));
        catalog.save(&path).unwrap();

        let mut loaded = IndexCatalog::load(&path).unwrap();
        assert_eq!(loaded, catalog);

        assert!(loaded.remove("npm_token").is_some());
        assert!(loaded.remove("npm_token").is_none());
        loaded.save(&path).unwrap();
        assert_eq!(IndexCatalog::load(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_on_disk_shape_is_plain_map() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);

        let mut catalog = IndexCatalog::default();
        catalog.upsert("k", entry("desc"));
        catalog.save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["k"]["description"], "desc");
        assert!(raw["k"]["updated"].is_string());
    }

    #[test]
    fn test_garbage_file_is_catalog_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            IndexCatalog::load(&path),
            Err(CredentialError::Catalog(_))
        ));
    }
}
