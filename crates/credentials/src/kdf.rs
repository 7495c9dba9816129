//! Passphrase key derivation and the `.master` verification record.
//!
//! Keys are derived with PBKDF2-HMAC-SHA256 from the passphrase and a
//! 16-byte salt. The salt is per store, shared by every slot; each slot
//! still gets its own random nonce. Per-slot salts would be stronger.
//!
//! `.master` never contains the passphrase. It records the KDF parameters
//! and a verifier: a fixed check phrase sealed under the derived key.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use ring::pbkdf2;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::path::Path;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::cipher::{self, Blob, CipherEngine, CipherKind};
use crate::error::{CredentialError, IoContext, Result};
use crate::fsio;
use crate::prompt::PassphraseSource;
use crate::session::Session;

pub const KDF_ALGORITHM: &str = "pbkdf2-hmac-sha256";
pub const MIN_ITERATIONS: u32 = 10_000;
pub const SALT_LEN: usize = 16;

const RECORD_VERSION: u32 = 1;
const VERIFIER_PLAINTEXT: &[u8] = b"devkit-credentials-verifier-v1";
const VERIFIER_CONTEXT: &[u8] = b".master";

/// Derive 32 bytes of key material from a passphrase.
///
/// The returned key is wrapped in [`Zeroizing`] for automatic memory zeroing
/// on drop.
pub fn derive_key(
    passphrase: &SecretString,
    salt: &[u8],
    iterations: u32,
) -> Result<Zeroizing<[u8; 32]>> {
    let rounds = NonZeroU32::new(iterations)
        .ok_or_else(|| CredentialError::Catalog("KDF iterations must be non-zero".to_string()))?;

    let mut output = Zeroizing::new([0u8; 32]);
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        rounds,
        salt,
        passphrase.expose_secret().as_bytes(),
        &mut output[..],
    );
    Ok(output)
}

/// Generate a random salt
pub fn generate_salt() -> Result<[u8; SALT_LEN]> {
    cipher::random_bytes::<SALT_LEN>()
}

/// KDF parameters as recorded in `.master`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KdfParams {
    pub algorithm: String,
    pub iterations: u32,
    /// Base64-encoded salt
    pub salt: String,
}

/// Contents of the `.master` file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterRecord {
    pub version: u32,
    pub kdf: KdfParams,
    pub cipher: String,
    /// Base64-encoded sealed check phrase
    pub verifier: String,
    pub created: DateTime<Utc>,
}

impl MasterRecord {
    /// Create a fresh record (new salt) and the session it unlocks
    pub fn create(
        passphrase: &SecretString,
        iterations: u32,
        engine: CipherEngine,
    ) -> Result<(Self, Session)> {
        let iterations = if iterations < MIN_ITERATIONS {
            warn!(
                requested = iterations,
                minimum = MIN_ITERATIONS,
                "KDF iteration count below minimum, using minimum"
            );
            MIN_ITERATIONS
        } else {
            iterations
        };

        let salt = generate_salt()?;
        let key = derive_key(passphrase, &salt, iterations)?;
        let session = Session::from_parts(key, engine);
        let verifier = session.seal(VERIFIER_PLAINTEXT, VERIFIER_CONTEXT)?;

        let record = Self {
            version: RECORD_VERSION,
            kdf: KdfParams {
                algorithm: KDF_ALGORITHM.to_string(),
                iterations,
                salt: STANDARD.encode(salt),
            },
            cipher: engine.kind().as_str().to_string(),
            verifier: STANDARD.encode(verifier.to_bytes()),
            created: Utc::now(),
        };

        Ok((record, session))
    }

    /// Load the record, `None` if the store was never set up
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .io_context(|| format!("Failed to read {}", path.display()))?;
        let record: Self = serde_json::from_str(&content)
            .map_err(|e| CredentialError::Catalog(format!("{}: {}", path.display(), e)))?;

        if record.kdf.algorithm != KDF_ALGORITHM {
            return Err(CredentialError::Catalog(format!(
                "unsupported KDF '{}'",
                record.kdf.algorithm
            )));
        }
        Ok(Some(record))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_vec_pretty(self)
            .map_err(|e| CredentialError::Catalog(format!("Failed to serialize master record: {}", e)))?;
        fsio::write_private_atomic(path, &content)
    }

    pub fn salt(&self) -> Result<Vec<u8>> {
        let salt = STANDARD
            .decode(&self.kdf.salt)
            .map_err(|e| CredentialError::Catalog(format!("corrupted salt: {}", e)))?;
        if salt.len() != SALT_LEN {
            return Err(CredentialError::Catalog(format!(
                "corrupted salt (expected {} bytes)",
                SALT_LEN
            )));
        }
        Ok(salt)
    }

    pub fn cipher_kind(&self) -> Result<CipherKind> {
        self.cipher.parse()
    }

    /// Check that `session` was derived from the right passphrase
    pub fn check(&self, session: &Session) -> Result<()> {
        let bytes = STANDARD
            .decode(&self.verifier)
            .map_err(|e| CredentialError::Catalog(format!("corrupted verifier: {}", e)))?;
        let blob = Blob::from_bytes(&bytes).map_err(|_| CredentialError::WrongPassphrase)?;

        match session.open(&blob, VERIFIER_CONTEXT) {
            Ok(plain) if plain.as_slice() == VERIFIER_PLAINTEXT => Ok(()),
            Ok(_) | Err(CredentialError::DecryptionFailure) => Err(CredentialError::WrongPassphrase),
            Err(e) => Err(e),
        }
    }
}

/// Establish session key material for the store whose record lives at
/// `master_path`.
///
/// First run: asks for a passphrase twice and fails with
/// `PassphraseMismatch` before anything is written if they differ. Later
/// runs: derives from the recorded salt and checks the verifier.
pub fn setup(
    master_path: &Path,
    source: &mut dyn PassphraseSource,
    iterations: u32,
    engine: CipherEngine,
    allow_insecure: bool,
) -> Result<Session> {
    if let Some(record) = MasterRecord::load(master_path)? {
        let passphrase = source.passphrase()?;
        let session = Session::derive(&passphrase, &record, allow_insecure)?;
        record.check(&session)?;
        return Ok(session);
    }

    let (first, confirm) = source.new_passphrase()?;
    if first.expose_secret() != confirm.expose_secret() {
        return Err(CredentialError::PassphraseMismatch);
    }
    if first.expose_secret().is_empty() {
        return Err(CredentialError::EmptyPassphrase);
    }

    let (record, session) = MasterRecord::create(&first, iterations, engine)?;
    record.save(master_path)?;
    info!(cipher = %engine.kind(), iterations = record.kdf.iterations, "credential store created");
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::Fixed;
    use tempfile::tempdir;

    fn engine() -> CipherEngine {
        CipherEngine::new(CipherKind::Aes256Gcm, false).unwrap()
    }

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    #[test]
    fn derive_key_is_deterministic() {
        let salt = [1u8; SALT_LEN];
        let a = derive_key(&secret("pw"), &salt, MIN_ITERATIONS).unwrap();
        let b = derive_key(&secret("pw"), &salt, MIN_ITERATIONS).unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn derive_key_depends_on_passphrase_and_salt() {
        let a = derive_key(&secret("pw"), &[1u8; SALT_LEN], MIN_ITERATIONS).unwrap();
        let b = derive_key(&secret("pw2"), &[1u8; SALT_LEN], MIN_ITERATIONS).unwrap();
        let c = derive_key(&secret("pw"), &[2u8; SALT_LEN], MIN_ITERATIONS).unwrap();
        assert_ne!(*a, *b);
        assert_ne!(*a, *c);
    }

    #[test]
    fn zero_iterations_rejected() {
        assert!(derive_key(&secret("pw"), &[0u8; SALT_LEN], 0).is_err());
    }

    #[test]
    fn record_never_contains_passphrase() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".master");

        let (record, _session) =
            MasterRecord::create(&secret("hunter2-passphrase"), MIN_ITERATIONS, engine()).unwrap();
        record.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("hunter2-passphrase"));
        assert!(raw.contains(KDF_ALGORITHM));
    }

    #[test]
    fn low_iterations_are_raised_to_minimum() {
        let (record, _) = MasterRecord::create(&secret("pw"), 10, engine()).unwrap();
        assert_eq!(record.kdf.iterations, MIN_ITERATIONS);
    }

    #[test]
    fn verifier_accepts_right_and_rejects_wrong_passphrase() {
        let (record, _) = MasterRecord::create(&secret("pw"), MIN_ITERATIONS, engine()).unwrap();

        let good = Session::derive(&secret("pw"), &record, false).unwrap();
        assert!(record.check(&good).is_ok());

        let bad = Session::derive(&secret("pw2"), &record, false).unwrap();
        assert!(matches!(record.check(&bad), Err(CredentialError::WrongPassphrase)));
    }

    #[test]
    fn setup_mismatch_creates_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".master");
        let mut source = Fixed::with_confirmation("pw", "pw-typo");

        let result = setup(&path, &mut source, MIN_ITERATIONS, engine(), false);

        assert!(matches!(result, Err(CredentialError::PassphraseMismatch)));
        assert!(!path.exists());
    }

    #[test]
    fn setup_rejects_empty_passphrase() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".master");

        let result = setup(&path, &mut Fixed::new(""), MIN_ITERATIONS, engine(), false);

        assert!(matches!(result, Err(CredentialError::EmptyPassphrase)));
        assert!(!path.exists());
    }

    #[test]
    fn setup_then_unlock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".master");

        setup(&path, &mut Fixed::new("pw"), MIN_ITERATIONS, engine(), false).unwrap();
        assert!(path.exists());

        assert!(setup(&path, &mut Fixed::new("pw"), MIN_ITERATIONS, engine(), false).is_ok());
        assert!(matches!(
            setup(&path, &mut Fixed::new("nope"), MIN_ITERATIONS, engine(), false),
            Err(CredentialError::WrongPassphrase)
        ));
    }
}
