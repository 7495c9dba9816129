//! Credential slots: one `<key>.enc` file per stored secret.

use std::fs;
use std::path::{Path, PathBuf};

use crate::cipher::Blob;
use crate::error::{CredentialError, IoContext, Result};
use crate::fsio;

pub const SLOT_EXTENSION: &str = "enc";

/// Suffix of blobs staged by a rekey that has not finished
pub const STAGING_SUFFIX: &str = "rekey";

/// Validate a key name.
///
/// Keys become file names, so they are restricted to ASCII alphanumerics,
/// `_`, `-` and `.`, may not start with `.` and may not contain `..`.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CredentialError::InvalidKey("Key cannot be empty".to_string()));
    }

    if key.starts_with('.') || key.contains("..") {
        return Err(CredentialError::InvalidKey(format!(
            "Invalid key format: {}",
            key
        )));
    }

    for c in key.chars() {
        if !c.is_ascii_alphanumeric() && c != '_' && c != '-' && c != '.' {
            return Err(CredentialError::InvalidKey(format!(
                "Invalid character '{}' in key",
                c
            )));
        }
    }

    Ok(())
}

/// A slot on disk (key only, value is decrypted on demand)
#[derive(Debug, Clone)]
pub struct CredentialSlot {
    /// The key name (e.g., "github_token")
    pub key: String,
    /// Path to the encrypted file
    pub path: PathBuf,
}

impl CredentialSlot {
    /// Locate the slot for `key` in `dir`. The file may not exist yet.
    pub fn new(dir: &Path, key: &str) -> Result<Self> {
        validate_key(key)?;
        Ok(Self {
            key: key.to_string(),
            path: dir.join(format!("{}.{}", key, SLOT_EXTENSION)),
        })
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the sealed blob, `None` if the slot does not exist
    pub fn read(&self) -> Result<Option<Blob>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CredentialError::io(
                    format!("Failed to read {}", self.path.display()),
                    e,
                ))
            }
        };
        Blob::from_bytes(&bytes).map(Some)
    }

    /// Write or overwrite the slot, mode 600
    pub fn write(&self, blob: &Blob) -> Result<()> {
        fsio::write_private_atomic(&self.path, &blob.to_bytes())
    }

    /// Delete the slot. Returns whether it existed.
    pub fn remove(&self) -> Result<bool> {
        fsio::remove_if_exists(&self.path)
    }

    /// Where a rekey stages this slot's new blob (`.<key>.rekey`)
    pub fn staging_path(&self) -> PathBuf {
        self.path
            .with_file_name(format!(".{}.{}", self.key, STAGING_SUFFIX))
    }

    /// Associated data binding a blob to this slot's key
    pub fn context(&self) -> &[u8] {
        self.key.as_bytes()
    }
}

/// All slots in `dir`, sorted by key
pub fn list_slots(dir: &Path) -> Result<Vec<CredentialSlot>> {
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut slots = vec![];
    for entry in fs::read_dir(dir).io_context(|| format!("Failed to read {}", dir.display()))? {
        let entry = entry.io_context(|| format!("Failed to read {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(key) = name.strip_suffix(".enc") {
            if validate_key(key).is_ok() {
                slots.push(CredentialSlot {
                    key: key.to_string(),
                    path,
                });
            }
        }
    }

    slots.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(slots)
}

/// Slots that have a staged rekey blob next to them, sorted by key
pub fn list_staged(dir: &Path) -> Result<Vec<CredentialSlot>> {
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut staged = vec![];
    for entry in fs::read_dir(dir).io_context(|| format!("Failed to read {}", dir.display()))? {
        let entry = entry.io_context(|| format!("Failed to read {}", dir.display()))?;
        let name = entry.file_name().to_string_lossy().to_string();
        let key = name
            .strip_prefix('.')
            .and_then(|rest| rest.strip_suffix(&format!(".{}", STAGING_SUFFIX)));
        if let Some(key) = key {
            if let Ok(slot) = CredentialSlot::new(dir, key) {
                staged.push(slot);
            }
        }
    }

    staged.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{CipherEngine, CipherKind};
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    #[test]
    fn test_valid_keys() {
        for key in ["github_token", "aws-region", "db.prod", "OPENAI_API_KEY", "a1"] {
            assert!(validate_key(key).is_ok(), "{key} should be valid");
        }
    }

    #[test]
    fn test_invalid_keys() {
        for key in ["", ".master", "../escape", "a/b", "has space", "x..y", "ключ"] {
            assert!(
                matches!(validate_key(key), Err(CredentialError::InvalidKey(_))),
                "{key} should be invalid"
            );
        }
    }

    #[test]
    fn test_write_read_remove() {
        let dir = tempdir().unwrap();
        let slot = CredentialSlot::new(dir.path(), "npm_token").unwrap();
        assert!(!slot.exists());
        assert!(slot.read().unwrap().is_none());

        let engine = CipherEngine::new(CipherKind::Aes256Gcm, false).unwrap();
        let blob = engine.seal(&[3u8; 32], b"npm_abc", slot.context()).unwrap();
        slot.write(&blob).unwrap();

        assert!(slot.exists());
        assert_eq!(slot.read().unwrap().unwrap(), blob);
        let mode = fs::metadata(&slot.path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        assert!(slot.remove().unwrap());
        assert!(!slot.exists());
    }

    #[test]
    fn test_list_slots_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        for name in ["zeta.enc", "alpha.enc", "index.json", ".master", "notes.txt"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        let keys: Vec<String> = list_slots(dir.path())
            .unwrap()
            .into_iter()
            .map(|s| s.key)
            .collect();
        assert_eq!(keys, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_list_staged() {
        let dir = tempdir().unwrap();
        let slot = CredentialSlot::new(dir.path(), "npm_token").unwrap();
        assert_eq!(slot.staging_path(), dir.path().join(".npm_token.rekey"));

        for name in [".npm_token.rekey", ".aws_region.rekey", "npm_token.enc", ".bad key.rekey"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        let keys: Vec<String> = list_staged(dir.path())
            .unwrap()
            .into_iter()
            .map(|s| s.key)
            .collect();
        assert_eq!(keys, vec!["aws_region", "npm_token"]);
        // Staged blobs are never listed as slots
        assert_eq!(list_slots(dir.path()).unwrap().len(), 1);
    }

    #[test]
    fn test_list_missing_dir() {
        let dir = tempdir().unwrap();
        assert!(list_slots(&dir.path().join("absent")).unwrap().is_empty());
    }
}
