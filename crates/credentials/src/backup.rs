//! Backup archives
//!
//! `export` packs `.master`, `index.json` and every slot into a gzip tarball.
//! Everything in it is already ciphertext (or a verifier), so the archive
//! needs no extra encryption and the passphrase is needed only to use it.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::Read;
use std::path::{Component, Path};
use std::time::Duration;
use tar::{Archive, Builder, Header};
use tracing::info;

use crate::error::{CredentialError, IoContext, Result};
use crate::fsio;
use crate::index::INDEX_FILE;
use crate::lock::{StoreLock, LOCK_FILE};
use crate::slot::{self, validate_key};
use crate::store::MASTER_FILE;

/// Export the store at `dir` to `output`. Returns the number of slots.
pub fn export(dir: &Path, output: &Path, lock_timeout: Duration) -> Result<usize> {
    if !dir.join(MASTER_FILE).is_file() {
        return Err(CredentialError::NotInitialized);
    }
    let _lock = StoreLock::acquire(&dir.join(LOCK_FILE), lock_timeout)?;

    let mut names = vec![MASTER_FILE.to_string()];
    if dir.join(INDEX_FILE).is_file() {
        names.push(INDEX_FILE.to_string());
    }
    let slots = slot::list_slots(dir)?;
    names.extend(slots.iter().map(|s| format!("{}.{}", s.key, slot::SLOT_EXTENSION)));

    let mut tar_data = vec![];
    {
        let gz = GzEncoder::new(&mut tar_data, Compression::default());
        let mut tar_builder = Builder::new(gz);
        for name in &names {
            let bytes = fs::read(dir.join(name))
                .io_context(|| format!("Failed to read {}", name))?;
            let mut header = Header::new_gnu();
            header.set_size(bytes.len() as u64);
            header.set_mode(fsio::FILE_MODE);
            header.set_cksum();
            tar_builder
                .append_data(&mut header, name, bytes.as_slice())
                .io_context(|| format!("Failed to archive {}", name))?;
        }
        tar_builder
            .into_inner()
            .and_then(|gz| gz.finish())
            .io_context(|| "Failed to finish archive")?;
    }

    fsio::write_private_atomic(output, &tar_data)?;
    info!(slots = slots.len(), output = %output.display(), "credential store exported");
    Ok(slots.len())
}

/// Names an archive may contain
fn allowed_entry(path: &Path) -> Option<String> {
    let mut components = path.components();
    let name = match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => name.to_str()?.to_string(),
        _ => return None,
    };

    if name == MASTER_FILE || name == INDEX_FILE {
        return Some(name);
    }
    let key = name.strip_suffix(".enc")?;
    validate_key(key).ok()?;
    Some(name)
}

/// Import an archive made by [`export`] into `dir`.
///
/// Every entry is checked before anything is written; an archive holding
/// any other name (including traversal paths) is rejected whole. An
/// initialized store is only replaced when `overwrite` is set; slots the
/// archive does not carry are then deleted, so the result is exactly the
/// archived store.
pub fn import(dir: &Path, input: &Path, overwrite: bool, lock_timeout: Duration) -> Result<usize> {
    let data = fs::read(input).io_context(|| format!("Failed to read {}", input.display()))?;
    let mut archive = Archive::new(GzDecoder::new(data.as_slice()));

    let mut files: Vec<(String, Vec<u8>)> = vec![];
    let entries = archive.entries().io_context(|| "Failed to read archive")?;
    for entry in entries {
        let mut entry = entry.io_context(|| "Failed to read archive entry")?;
        let path = entry
            .path()
            .io_context(|| "Failed to read archive entry path")?
            .into_owned();

        let name = allowed_entry(&path).ok_or_else(|| {
            CredentialError::Catalog(format!("Unexpected archive entry: {}", path.display()))
        })?;

        let mut bytes = vec![];
        entry
            .read_to_end(&mut bytes)
            .io_context(|| format!("Failed to read archive entry {}", name))?;
        files.push((name, bytes));
    }

    if !files.iter().any(|(name, _)| name == MASTER_FILE) {
        return Err(CredentialError::Catalog("Archive has no master record".to_string()));
    }

    fsio::ensure_private_dir(dir)?;
    let _lock = StoreLock::acquire(&dir.join(LOCK_FILE), lock_timeout)?;

    if dir.join(MASTER_FILE).is_file() && !overwrite {
        return Err(CredentialError::Catalog(format!(
            "{} already holds a credential store",
            dir.display()
        )));
    }

    let slot_count = files.iter().filter(|(name, _)| name.ends_with(".enc")).count();
    // Slots and index before the master record, so a half-finished import
    // never pairs a new master with old slots.
    files.sort_by_key(|(name, _)| name == MASTER_FILE);
    for (name, bytes) in &files {
        fsio::write_private_atomic(&dir.join(name), bytes)?;
    }

    // Anything the archive does not carry was sealed under the old master
    let imported = |name: &str| files.iter().any(|(n, _)| n == name);
    let mut dropped = 0;
    for slot in slot::list_slots(dir)? {
        let name = format!("{}.{}", slot.key, slot::SLOT_EXTENSION);
        if !imported(name.as_str()) && slot.remove()? {
            dropped += 1;
        }
    }
    for staged in slot::list_staged(dir)? {
        fsio::remove_if_exists(&staged.staging_path())?;
    }
    if !imported(INDEX_FILE) {
        fsio::remove_if_exists(&dir.join(INDEX_FILE))?;
    }

    info!(slots = slot_count, dropped, "credential store imported");
    Ok(slot_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::Fixed;
    use crate::store::tests::{options, temp_store};
    use crate::store::CredentialStore;
    use secrecy::ExposeSecret;
    use tempfile::tempdir;

    const TIMEOUT: Duration = Duration::from_millis(500);

    #[test]
    fn test_export_import_roundtrip() {
        let (store, dir) = temp_store("pw");
        store.store("github_token", "ghp_backup", "GitHub PAT").unwrap();
        store.store("aws_region", "us-west-2", "AWS region").unwrap();

        let archive = dir.path().join("backup.tar.gz");
        assert_eq!(export(store.dir(), &archive, TIMEOUT).unwrap(), 2);

        let target = dir.path().join("restored");
        assert_eq!(import(&target, &archive, false, TIMEOUT).unwrap(), 2);

        let restored = CredentialStore::open(&target, options(), &mut Fixed::new("pw")).unwrap();
        assert_eq!(
            restored.load("github_token").unwrap().unwrap().expose_secret(),
            "ghp_backup"
        );
        assert_eq!(restored.list().unwrap(), store.list().unwrap());
    }

    #[test]
    fn test_archive_contains_no_plaintext() {
        let (store, dir) = temp_store("pw");
        store.store("github_token", "ghp_plaintext_marker", "GitHub PAT").unwrap();

        let archive = dir.path().join("backup.tar.gz");
        export(store.dir(), &archive, TIMEOUT).unwrap();

        let mut raw = vec![];
        GzDecoder::new(fs::read(&archive).unwrap().as_slice())
            .read_to_end(&mut raw)
            .unwrap();
        let text = String::from_utf8_lossy(&raw);
        assert!(!text.contains("ghp_plaintext_marker"));
        assert!(!text.contains("\"pw\""));
    }

    #[test]
    fn test_import_refuses_existing_store() {
        let (store, dir) = temp_store("pw");
        store.store("k", "v", "d").unwrap();
        let archive = dir.path().join("backup.tar.gz");
        export(store.dir(), &archive, TIMEOUT).unwrap();

        assert!(import(store.dir(), &archive, false, TIMEOUT).is_err());
        assert!(import(store.dir(), &archive, true, TIMEOUT).is_ok());
    }

    #[test]
    fn test_overwrite_import_replaces_whole_store() {
        let (source, dir) = temp_store("pw");
        source.store("github_token", "ghp_archived", "GitHub PAT").unwrap();
        let archive = dir.path().join("backup.tar.gz");
        export(source.dir(), &archive, TIMEOUT).unwrap();

        let target = dir.path().join("target");
        let existing = CredentialStore::setup(&target, options(), &mut Fixed::new("old-pw")).unwrap();
        existing.store("npm_token", "npm_old", "npm").unwrap();
        fs::write(target.join(".npm_token.rekey"), b"stale").unwrap();

        assert_eq!(import(&target, &archive, true, TIMEOUT).unwrap(), 1);

        let restored = CredentialStore::open(&target, options(), &mut Fixed::new("pw")).unwrap();
        assert!(!target.join("npm_token.enc").exists());
        assert!(!target.join(".npm_token.rekey").exists());
        assert!(restored.load("npm_token").unwrap().is_none());

        let report = restored.verify().unwrap();
        assert!(report.is_consistent());
        let keys: Vec<String> = restored.list().unwrap().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["github_token"]);
    }

    #[test]
    fn test_import_rejects_traversal() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("evil.tar.gz");

        let mut tar_data = vec![];
        {
            let gz = GzEncoder::new(&mut tar_data, Compression::default());
            let mut builder = Builder::new(gz);
            for name in [MASTER_FILE, "../escape.enc"] {
                let mut header = Header::new_gnu();
                header.set_size(1);
                header.set_mode(0o600);
                // set_path refuses "..", so write the raw name bytes
                let field = &mut header.as_old_mut().name;
                field[..name.len()].copy_from_slice(name.as_bytes());
                header.set_cksum();
                builder.append(&header, &b"x"[..]).unwrap();
            }
            builder.into_inner().unwrap().finish().unwrap();
        }
        fs::write(&archive, tar_data).unwrap();

        let target = dir.path().join("target");
        assert!(matches!(
            import(&target, &archive, false, TIMEOUT),
            Err(CredentialError::Catalog(_))
        ));
        assert!(!target.exists());
        assert!(!dir.path().join("escape.enc").exists());
    }

    #[test]
    fn test_allowed_entries() {
        assert!(allowed_entry(Path::new(".master")).is_some());
        assert!(allowed_entry(Path::new("index.json")).is_some());
        assert!(allowed_entry(Path::new("github_token.enc")).is_some());
        assert!(allowed_entry(Path::new("vault/github_token.enc")).is_none());
        assert!(allowed_entry(Path::new("/etc/passwd")).is_none());
        assert!(allowed_entry(Path::new(".lock")).is_none());
        assert!(allowed_entry(Path::new("notes.txt")).is_none());
    }

    #[test]
    fn test_export_uninitialized() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            export(dir.path(), &dir.path().join("x.tar.gz"), TIMEOUT),
            Err(CredentialError::NotInitialized)
        ));
    }
}
