//! Configuration management for devkit tools
//!
//! One JSON file at ~/.config/devkit/config.json. Every field has a default,
//! so a missing file or a partial file both load cleanly.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::Paths;

/// Environment variable that overrides the credential store location
pub const CREDENTIALS_DIR_ENV: &str = "DEVKIT_CREDENTIALS_DIR";

/// Global devkit configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Settings for the encrypted credential store
    #[serde(default)]
    pub credentials: CredentialsSettings,
}

/// Credential store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsSettings {
    /// Store directory (defaults to ~/.local/share/devkit/credentials)
    #[serde(default)]
    pub store_dir: Option<PathBuf>,

    /// How long a writer waits for the store lock (milliseconds)
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// PBKDF2 iterations used when a new store is created
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,

    /// AEAD suite for new slots ("aes-256-gcm" or "chacha20-poly1305")
    #[serde(default = "default_cipher")]
    pub cipher: String,

    /// Permit the non-confidential base64 encoding. Never on by default.
    #[serde(default)]
    pub allow_insecure_encoding: bool,
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

fn default_kdf_iterations() -> u32 {
    210_000
}

fn default_cipher() -> String {
    "aes-256-gcm".to_string()
}

impl Default for CredentialsSettings {
    fn default() -> Self {
        Self {
            store_dir: None,
            lock_timeout_ms: default_lock_timeout_ms(),
            kdf_iterations: default_kdf_iterations(),
            cipher: default_cipher(),
            allow_insecure_encoding: false,
        }
    }
}

impl CredentialsSettings {
    /// Resolve the store directory: env override, then config, then default
    pub fn resolve_store_dir(&self, paths: &Paths) -> PathBuf {
        if let Ok(dir) = std::env::var(CREDENTIALS_DIR_ENV) {
            if !dir.is_empty() {
                return PathBuf::from(dir);
            }
        }
        self.store_dir.clone().unwrap_or_else(|| paths.credentials())
    }
}

impl Config {
    /// Load config from the default location
    pub fn load_default() -> Result<Self> {
        Self::load(&Paths::new().config_file())
    }

    /// Load config from file
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.credentials.lock_timeout_ms, 5_000);
        assert_eq!(config.credentials.cipher, "aes-256-gcm");
        assert!(!config.credentials.allow_insecure_encoding);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"credentials": {"kdf_iterations": 50000}}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.credentials.kdf_iterations, 50_000);
        assert_eq!(config.credentials.lock_timeout_ms, 5_000);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.credentials.cipher = "chacha20-poly1305".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.credentials.cipher, "chacha20-poly1305");
    }
}
