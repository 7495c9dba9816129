//! credentials - Local encrypted credential store for devkit
//!
//! "Secrets should be invisible until you need them."
//!
//! Tokens, keys and connection strings are sealed one file per credential
//! under a key derived from a master passphrase, with a small JSON catalog
//! of what is stored and when. Downstream tools (project scaffolding, CI
//! setup) get values through the store or the environment materializer,
//! never from plaintext on disk.
//!
//! Uses PBKDF2-HMAC-SHA256 for key derivation and AES-256-GCM (or
//! ChaCha20-Poly1305) for sealing, both from `ring`.

pub mod backup;
pub mod cipher;
pub mod error;
pub mod fsio;
pub mod index;
pub mod kdf;
pub mod known;
pub mod lock;
pub mod materialize;
pub mod prompt;
pub mod session;
pub mod slot;
pub mod store;

pub use cipher::{CipherEngine, CipherKind};
pub use error::{CredentialError, Result};
pub use index::{CatalogRow, IndexCatalog, IndexEntry};
pub use known::{KnownCredential, KNOWN_CREDENTIALS};
pub use materialize::{Descriptor, MaterializedEnv};
pub use prompt::{PassphraseSource, TtyPrompt};
pub use session::Session;
pub use store::{CredentialStore, Presence, StoreOptions, StoreOutcome, VerifyReport};
