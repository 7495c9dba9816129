//! Credential store - slots, catalog and master record under one directory
//!
//! Layout (directory mode 700, files mode 600):
//! - `<key>.enc`   one sealed value per credential
//! - `index.json`  key -> {description, updated}
//! - `.master`     KDF parameters and passphrase verifier
//! - `.lock`       advisory writer lock
//!
//! Writes go slot first, then catalog. A slot without an index entry is
//! inert: it is not listed, and `reconcile` / the next store of that key
//! picks it up again.

use chrono::Utc;
use devkit_core::CredentialsSettings;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::cipher::{Blob, CipherEngine, CipherKind};
use crate::error::{CredentialError, IoContext, Result};
use crate::fsio;
use crate::index::{CatalogRow, IndexCatalog, INDEX_FILE};
use crate::kdf::{self, MasterRecord};
use crate::known::KNOWN_CREDENTIALS;
use crate::lock::{StoreLock, LOCK_FILE};
use crate::prompt::PassphraseSource;
use crate::session::Session;
use crate::slot::{self, CredentialSlot};

pub const MASTER_FILE: &str = ".master";

/// Tunables, usually built from the global devkit config
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub lock_timeout: Duration,
    pub kdf_iterations: u32,
    pub cipher: CipherKind,
    pub allow_insecure: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        let settings = CredentialsSettings::default();
        Self {
            lock_timeout: Duration::from_millis(settings.lock_timeout_ms),
            kdf_iterations: settings.kdf_iterations,
            cipher: CipherKind::Aes256Gcm,
            allow_insecure: false,
        }
    }
}

impl StoreOptions {
    /// Fails with `CipherUnavailable` for an unknown cipher name, or for the
    /// insecure encoding without the explicit opt-in.
    pub fn from_settings(settings: &CredentialsSettings) -> Result<Self> {
        let cipher: CipherKind = settings.cipher.parse()?;
        CipherEngine::new(cipher, settings.allow_insecure_encoding)?;
        Ok(Self {
            lock_timeout: Duration::from_millis(settings.lock_timeout_ms),
            kdf_iterations: settings.kdf_iterations,
            cipher,
            allow_insecure: settings.allow_insecure_encoding,
        })
    }

    fn engine(&self) -> Result<CipherEngine> {
        CipherEngine::new(self.cipher, self.allow_insecure)
    }
}

/// Result of a single `store` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    /// Empty value: nothing written
    Skipped,
}

/// Presence of a well-known credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Present,
    Absent,
    Corrupt,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyStatus {
    pub key: &'static str,
    pub env_var: &'static str,
    pub description: &'static str,
    pub presence: Presence,
}

/// Output of `verify`: presence per well-known key, never values
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub known: Vec<KeyStatus>,
    /// Catalog entries whose slot file is gone
    pub missing_slots: Vec<String>,
    /// Slot files nobody listed in the catalog
    pub unindexed_slots: Vec<String>,
}

impl VerifyReport {
    pub fn count(&self, presence: Presence) -> usize {
        self.known.iter().filter(|s| s.presence == presence).count()
    }

    pub fn is_consistent(&self) -> bool {
        self.missing_slots.is_empty() && self.unindexed_slots.is_empty()
    }
}

/// Output of `reconcile`
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub dropped_entries: Vec<String>,
    pub unindexed_slots: Vec<String>,
}

/// The unlocked credential store
#[derive(Debug)]
pub struct CredentialStore {
    dir: PathBuf,
    options: StoreOptions,
    session: Session,
}

impl CredentialStore {
    /// Whether `dir` holds an initialized store
    pub fn is_initialized(dir: &Path) -> bool {
        dir.join(MASTER_FILE).is_file()
    }

    /// Create the store on first run, otherwise unlock it.
    ///
    /// First run asks `source` for a passphrase and its confirmation; a
    /// mismatch aborts before anything is written.
    pub fn setup(
        dir: &Path,
        options: StoreOptions,
        source: &mut dyn PassphraseSource,
    ) -> Result<Self> {
        let engine = options.engine()?;
        let master = dir.join(MASTER_FILE);

        let session = if master.is_file() {
            kdf::setup(&master, source, options.kdf_iterations, engine, options.allow_insecure)?
        } else {
            fsio::ensure_private_dir(dir)?;
            let _lock = StoreLock::acquire(&dir.join(LOCK_FILE), options.lock_timeout)?;
            kdf::setup(&master, source, options.kdf_iterations, engine, options.allow_insecure)?
        };

        let store = Self {
            dir: dir.to_path_buf(),
            options,
            session,
        };
        store.recover_staged()?;
        Ok(store)
    }

    /// Finish or discard blobs left behind by an interrupted rekey.
    ///
    /// A staged blob that opens under the current session was sealed for the
    /// master record now on disk, so it replaces its slot. One that does not
    /// open predates that record and is dropped.
    fn recover_staged(&self) -> Result<usize> {
        if slot::list_staged(&self.dir)?.is_empty() {
            return Ok(0);
        }

        let _lock = self.lock()?;
        let mut finished = 0;
        for slot in slot::list_staged(&self.dir)? {
            let staging = slot.staging_path();
            let bytes = fs::read(&staging)
                .io_context(|| format!("Failed to read {}", staging.display()))?;
            let opens = Blob::from_bytes(&bytes)
                .and_then(|blob| self.session.open(&blob, slot.context()))
                .is_ok();

            if opens {
                fs::rename(&staging, &slot.path)
                    .io_context(|| format!("Failed to move {} into place", slot.path.display()))?;
                finished += 1;
            } else {
                fsio::remove_if_exists(&staging)?;
                debug!(key = %slot.key, "discarded stale rekey staging file");
            }
        }

        if finished > 0 {
            warn!(slots = finished, "finished an interrupted rekey");
        }
        Ok(finished)
    }

    /// Unlock an existing store; never creates one
    pub fn open(
        dir: &Path,
        options: StoreOptions,
        source: &mut dyn PassphraseSource,
    ) -> Result<Self> {
        if !Self::is_initialized(dir) {
            return Err(CredentialError::NotInitialized);
        }
        Self::setup(dir, options, source)
    }

    /// Use key material the caller already derived (no verifier check)
    pub fn with_session(dir: &Path, options: StoreOptions, session: Session) -> Self {
        Self {
            dir: dir.to_path_buf(),
            options,
            session,
        }
    }

    /// Read the master record of an initialized store
    pub fn master_record(dir: &Path) -> Result<MasterRecord> {
        MasterRecord::load(&dir.join(MASTER_FILE))?.ok_or(CredentialError::NotInitialized)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    pub(crate) fn lock(&self) -> Result<StoreLock> {
        StoreLock::acquire(&self.dir.join(LOCK_FILE), self.options.lock_timeout)
    }

    /// Store a secret.
    ///
    /// An empty value is a no-op so a blank answer never clobbers an
    /// existing secret.
    pub fn store(&self, key: &str, value: &str, description: &str) -> Result<StoreOutcome> {
        let slot = CredentialSlot::new(&self.dir, key)?;
        if value.is_empty() {
            debug!(key, "empty value, skipping");
            return Ok(StoreOutcome::Skipped);
        }

        let _lock = self.lock()?;

        let blob = self.session.seal(value.as_bytes(), slot.context())?;
        slot.write(&blob)?;

        let index_path = self.index_path();
        let mut catalog = IndexCatalog::load(&index_path)?;
        catalog.touch(key, description, Utc::now());
        catalog.save(&index_path)?;

        debug!(key, cipher = %blob.kind, "credential stored");
        Ok(StoreOutcome::Stored)
    }

    /// Store several credentials. Each is independent: one failure does
    /// not stop the rest.
    pub fn store_batch<'a, I>(&self, items: I) -> Vec<(String, Result<StoreOutcome>)>
    where
        I: IntoIterator<Item = (&'a str, &'a str, &'a str)>,
    {
        items
            .into_iter()
            .map(|(key, value, description)| {
                let result = self.store(key, value, description);
                if let Err(e) = &result {
                    warn!(key, error = %e, "failed to store credential");
                }
                (key.to_string(), result)
            })
            .collect()
    }

    /// Retrieve a secret.
    ///
    /// `Ok(None)` means never stored. A slot that exists but does not open
    /// under this session is `CorruptCredential`, not absent.
    pub fn load(&self, key: &str) -> Result<Option<SecretString>> {
        let slot = CredentialSlot::new(&self.dir, key)?;
        let Some(plaintext) = self.open_slot(&slot)? else {
            return Ok(None);
        };

        let value = String::from_utf8(plaintext.to_vec()).map_err(|_| corrupt(key))?;
        Ok(Some(SecretString::from(value)))
    }

    fn open_slot(&self, slot: &CredentialSlot) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let blob = match slot.read() {
            Ok(Some(blob)) => blob,
            Ok(None) => return Ok(None),
            Err(CredentialError::DecryptionFailure) => return Err(corrupt(&slot.key)),
            Err(e) => return Err(e),
        };

        match self.session.open(&blob, slot.context()) {
            Ok(plaintext) => Ok(Some(plaintext)),
            Err(CredentialError::DecryptionFailure) => Err(corrupt(&slot.key)),
            Err(e) => Err(e),
        }
    }

    pub fn github_token(&self) -> Result<Option<SecretString>> {
        self.load("github_token")
    }

    pub fn github_org(&self) -> Result<Option<SecretString>> {
        self.load("github_org")
    }

    pub fn database_url(&self) -> Result<Option<SecretString>> {
        self.load("database_url")
    }

    /// Check if a slot exists for `key`
    pub fn exists(&self, key: &str) -> bool {
        CredentialSlot::new(&self.dir, key)
            .map(|slot| slot.exists())
            .unwrap_or(false)
    }

    /// Catalog rows sorted by key. Needs no passphrase.
    pub fn read_catalog(dir: &Path) -> Result<Vec<CatalogRow>> {
        Ok(IndexCatalog::load(&dir.join(INDEX_FILE))?.rows())
    }

    /// All catalog rows, ordered by key
    pub fn list(&self) -> Result<Vec<CatalogRow>> {
        Self::read_catalog(&self.dir)
    }

    /// Report presence of every well-known key and catalog/slot drift
    pub fn verify(&self) -> Result<VerifyReport> {
        let mut statuses = Vec::with_capacity(KNOWN_CREDENTIALS.len());
        for credential in KNOWN_CREDENTIALS {
            let presence = match self.load(credential.key) {
                Ok(Some(_)) => Presence::Present,
                Ok(None) => Presence::Absent,
                Err(CredentialError::CorruptCredential { .. }) => Presence::Corrupt,
                Err(e) => return Err(e),
            };
            statuses.push(KeyStatus {
                key: credential.key,
                env_var: credential.env_var,
                description: credential.description,
                presence,
            });
        }

        let (missing_slots, unindexed_slots) = self.drift()?;
        if !missing_slots.is_empty() || !unindexed_slots.is_empty() {
            warn!(
                missing = missing_slots.len(),
                unindexed = unindexed_slots.len(),
                "catalog and slots disagree"
            );
        }

        Ok(VerifyReport {
            known: statuses,
            missing_slots,
            unindexed_slots,
        })
    }

    /// (catalog keys without a slot, slot keys without a catalog entry)
    fn drift(&self) -> Result<(Vec<String>, Vec<String>)> {
        let catalog = IndexCatalog::load(&self.index_path())?;
        let slots = slot::list_slots(&self.dir)?;

        let missing = catalog
            .keys()
            .filter(|key| !slots.iter().any(|s| s.key == *key))
            .map(str::to_string)
            .collect();
        let unindexed = slots
            .into_iter()
            .filter(|s| !catalog.contains(&s.key))
            .map(|s| s.key)
            .collect();

        Ok((missing, unindexed))
    }

    /// Delete a credential. Returns whether anything existed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let slot = CredentialSlot::new(&self.dir, key)?;
        let _lock = self.lock()?;

        let had_slot = slot.remove()?;

        let index_path = self.index_path();
        let mut catalog = IndexCatalog::load(&index_path)?;
        let had_entry = catalog.remove(key).is_some();
        if had_entry {
            catalog.save(&index_path)?;
        }

        debug!(key, had_slot, had_entry, "credential removed");
        Ok(had_slot || had_entry)
    }

    /// Drop catalog entries whose slot is gone; report unindexed slots
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        let _lock = self.lock()?;
        let (missing, unindexed) = self.drift()?;

        if !missing.is_empty() {
            let index_path = self.index_path();
            let mut catalog = IndexCatalog::load(&index_path)?;
            for key in &missing {
                catalog.remove(key);
            }
            catalog.save(&index_path)?;
            info!(dropped = missing.len(), "dropped catalog entries without slots");
        }

        Ok(ReconcileReport {
            dropped_entries: missing,
            unindexed_slots: unindexed,
        })
    }

    /// Re-encrypt every slot under a new passphrase.
    ///
    /// Every slot is opened before anything is written; one that fails
    /// aborts the rekey with the store untouched. New blobs are staged next
    /// to the slots, the master record is replaced, then the staged blobs
    /// are moved into place. If that last step is interrupted, the next
    /// `setup`/`open` finishes it.
    pub fn rekey(&mut self, new_passphrase: &SecretString) -> Result<usize> {
        if new_passphrase.expose_secret().is_empty() {
            return Err(CredentialError::EmptyPassphrase);
        }

        let _lock = self.lock()?;
        let slots = slot::list_slots(&self.dir)?;

        let mut plaintexts: Vec<(CredentialSlot, Zeroizing<Vec<u8>>)> = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(plaintext) = self.open_slot(&slot)? {
                plaintexts.push((slot, plaintext));
            }
        }

        let (record, session) =
            MasterRecord::create(new_passphrase, self.options.kdf_iterations, self.options.engine()?)?;

        let mut staged = Vec::with_capacity(plaintexts.len());
        for (slot, plaintext) in &plaintexts {
            let blob = session.seal(plaintext, slot.context())?;
            let staging = slot.staging_path();
            fsio::write_private_atomic(&staging, &blob.to_bytes())?;
            staged.push((staging, slot.path.clone()));
        }

        record.save(&self.dir.join(MASTER_FILE))?;
        self.session = session;
        for (staging, target) in &staged {
            fs::rename(staging, target)
                .io_context(|| format!("Failed to move {} into place", target.display()))?;
        }

        info!(slots = staged.len(), "credential store rekeyed");
        Ok(staged.len())
    }
}

fn corrupt(key: &str) -> CredentialError {
    CredentialError::CorruptCredential {
        key: key.to_string(),
    }
}
