//! Session key material
//!
//! A `Session` is the only place derived key bytes live. It is created from a
//! passphrase, handed by reference to every seal/open, and zeroes the key
//! when dropped. Nothing caches it beyond the owner's scope.

use secrecy::SecretString;
use std::fmt;
use zeroize::Zeroizing;

use crate::cipher::{Blob, CipherEngine};
use crate::error::Result;
use crate::kdf::{self, MasterRecord};

pub struct Session {
    key: Zeroizing<[u8; 32]>,
    engine: CipherEngine,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &"[REDACTED]")
            .field("cipher", &self.engine.kind())
            .finish()
    }
}

impl Session {
    pub(crate) fn from_parts(key: Zeroizing<[u8; 32]>, engine: CipherEngine) -> Self {
        Self { key, engine }
    }

    /// Derive key material for an existing store without checking the
    /// verifier. A wrong passphrase shows up later as a failed open.
    pub fn derive(
        passphrase: &SecretString,
        record: &MasterRecord,
        allow_insecure: bool,
    ) -> Result<Self> {
        let salt = record.salt()?;
        let key = kdf::derive_key(passphrase, &salt, record.kdf.iterations)?;
        let engine = CipherEngine::new(record.cipher_kind()?, allow_insecure)?;
        Ok(Self { key, engine })
    }

    pub fn seal(&self, plaintext: &[u8], context: &[u8]) -> Result<Blob> {
        self.engine.seal(&self.key, plaintext, context)
    }

    pub fn open(&self, blob: &Blob, context: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.engine.open(&self.key, blob, context)
    }
}
