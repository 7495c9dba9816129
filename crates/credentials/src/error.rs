//! Credential store errors

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CredentialError>;

/// Everything that can go wrong in the credential store
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Passphrases do not match")]
    PassphraseMismatch,

    #[error("Empty passphrase not allowed")]
    EmptyPassphrase,

    #[error("No passphrase available - set DEVKIT_CREDENTIALS_PASSPHRASE or run interactively")]
    PassphraseUnavailable,

    #[error("Wrong passphrase for this credential store")]
    WrongPassphrase,

    #[error("Credential store not initialized - run 'credentials' to set it up")]
    NotInitialized,

    #[error("Decryption failed - wrong key or corrupted data")]
    DecryptionFailure,

    #[error("Credential '{key}' exists but cannot be decrypted")]
    CorruptCredential { key: String },

    #[error("Authenticated cipher unavailable: {0}")]
    CipherUnavailable(String),

    #[error("Timed out after {waited:?} waiting for lock on {}", path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("Invalid key name: {0}")]
    InvalidKey(String),

    #[error("Malformed store file: {0}")]
    Catalog(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl CredentialError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Attach a context message to io results, like anyhow's `with_context`
pub(crate) trait IoContext<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| CredentialError::io(f(), e))
    }
}
