//! Authenticated encryption of single credential values.
//!
//! Every [`CipherEngine::seal`] draws a fresh 96-bit nonce from the system
//! CSPRNG. The blob header (magic + suite id) and a caller-supplied context
//! (the key name for slots) are bound in as associated data, so a slot file
//! copied over another key's slot fails to open.
//!
//! Blob layout: `"DKC1" | suite id (1) | nonce (12) | ciphertext || tag (16)`.
//!
//! The sealed plaintext is framed as `len (u32 BE) | value | zero padding`
//! up to a multiple of [`PAD_BLOCK`], so a slot's size does not reveal the
//! length of the value inside it.

use base64::{engine::general_purpose::STANDARD, Engine};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, CHACHA20_POLY1305};
use ring::rand::{SecureRandom, SystemRandom};
use std::fmt;
use std::str::FromStr;
use tracing::warn;
use zeroize::Zeroizing;

use crate::error::{CredentialError, Result};

const MAGIC: &[u8; 4] = b"DKC1";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = MAGIC.len() + 1 + NONCE_LEN;
const LEN_PREFIX: usize = 4;

/// Sealed plaintexts are padded to a multiple of this many bytes
pub const PAD_BLOCK: usize = 64;

/// Which cipher a blob was sealed with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    Aes256Gcm,
    ChaCha20Poly1305,
    /// Base64 only. No confidentiality, no integrity.
    InsecureEncoding,
}

impl CipherKind {
    fn id(self) -> u8 {
        match self {
            Self::Aes256Gcm => 1,
            Self::ChaCha20Poly1305 => 2,
            Self::InsecureEncoding => 0xff,
        }
    }

    fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Self::Aes256Gcm),
            2 => Some(Self::ChaCha20Poly1305),
            0xff => Some(Self::InsecureEncoding),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aes256Gcm => "aes-256-gcm",
            Self::ChaCha20Poly1305 => "chacha20-poly1305",
            Self::InsecureEncoding => "insecure-base64",
        }
    }

    pub fn is_authenticated(self) -> bool {
        !matches!(self, Self::InsecureEncoding)
    }

    fn aead_key(self, key: &[u8; 32]) -> Result<LessSafeKey> {
        let algorithm = match self {
            Self::Aes256Gcm => &AES_256_GCM,
            Self::ChaCha20Poly1305 => &CHACHA20_POLY1305,
            Self::InsecureEncoding => {
                return Err(unavailable("insecure encoding has no key"));
            }
        };
        let unbound = UnboundKey::new(algorithm, key)
            .map_err(|_| unavailable(format!("{} key setup failed", self)))?;
        Ok(LessSafeKey::new(unbound))
    }
}

impl fmt::Display for CipherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CipherKind {
    type Err = CredentialError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aes-256-gcm" | "aes256gcm" => Ok(Self::Aes256Gcm),
            "chacha20-poly1305" | "chacha20poly1305" => Ok(Self::ChaCha20Poly1305),
            "insecure-base64" => Ok(Self::InsecureEncoding),
            other => Err(unavailable(format!("unknown cipher '{}'", other))),
        }
    }
}

fn unavailable(msg: impl Into<String>) -> CredentialError {
    CredentialError::CipherUnavailable(msg.into())
}

/// Length-prefix `plaintext` and zero-pad it to a multiple of [`PAD_BLOCK`]
fn pad(plaintext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let len = u32::try_from(plaintext.len())
        .map_err(|_| unavailable("value too large to seal"))?;
    let framed = LEN_PREFIX + plaintext.len();
    let padded = framed.div_ceil(PAD_BLOCK) * PAD_BLOCK;

    let mut out = Zeroizing::new(Vec::with_capacity(padded + TAG_LEN));
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(plaintext);
    out.resize(padded, 0);
    Ok(out)
}

/// Inverse of [`pad`]. A bad prefix or non-zero padding is a decryption failure.
fn unpad(framed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if framed.len() < LEN_PREFIX || framed.len() % PAD_BLOCK != 0 {
        return Err(CredentialError::DecryptionFailure);
    }
    let mut prefix = [0u8; LEN_PREFIX];
    prefix.copy_from_slice(&framed[..LEN_PREFIX]);
    let len = u32::from_be_bytes(prefix) as usize;

    let body = &framed[LEN_PREFIX..];
    if len > body.len() || body[len..].iter().any(|b| *b != 0) {
        return Err(CredentialError::DecryptionFailure);
    }
    Ok(Zeroizing::new(body[..len].to_vec()))
}

/// A sealed credential value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub kind: CipherKind,
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext with the authentication tag appended
    pub ciphertext: Vec<u8>,
}

impl Blob {
    fn header(kind: CipherKind, nonce: &[u8; NONCE_LEN]) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[..4].copy_from_slice(MAGIC);
        header[4] = kind.id();
        header[5..].copy_from_slice(nonce);
        header
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.ciphertext.len());
        out.extend_from_slice(&Self::header(self.kind, &self.nonce));
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse a blob. Anything malformed is a decryption failure.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(CredentialError::DecryptionFailure);
        }
        let kind = CipherKind::from_id(bytes[4]).ok_or(CredentialError::DecryptionFailure)?;
        if kind.is_authenticated() && bytes.len() < HEADER_LEN + TAG_LEN {
            return Err(CredentialError::DecryptionFailure);
        }

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[5..HEADER_LEN]);

        Ok(Self {
            kind,
            nonce,
            ciphertext: bytes[HEADER_LEN..].to_vec(),
        })
    }

    fn aad(&self, context: &[u8]) -> Vec<u8> {
        let mut aad = Self::header(self.kind, &self.nonce).to_vec();
        aad.extend_from_slice(context);
        aad
    }
}

/// Seals and opens values under 32-byte key material
#[derive(Debug, Clone, Copy)]
pub struct CipherEngine {
    kind: CipherKind,
    allow_insecure: bool,
}

impl CipherEngine {
    /// Create an engine for `kind`.
    ///
    /// The insecure encoding is refused with `CipherUnavailable` unless the
    /// caller explicitly opted in.
    pub fn new(kind: CipherKind, allow_insecure: bool) -> Result<Self> {
        if !kind.is_authenticated() && !allow_insecure {
            return Err(unavailable(
                "insecure-base64 requires allow_insecure_encoding = true",
            ));
        }
        Ok(Self {
            kind,
            allow_insecure,
        })
    }

    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    pub fn seal(&self, key: &[u8; 32], plaintext: &[u8], context: &[u8]) -> Result<Blob> {
        if !self.kind.is_authenticated() {
            warn!("sealing with insecure-base64: value is NOT encrypted");
            return Ok(Blob {
                kind: self.kind,
                nonce: [0u8; NONCE_LEN],
                ciphertext: STANDARD.encode(plaintext).into_bytes(),
            });
        }

        let aead_key = self.kind.aead_key(key)?;

        let nonce_bytes = random_bytes::<NONCE_LEN>()?;

        let mut in_out = pad(plaintext)?;
        let mut blob = Blob {
            kind: self.kind,
            nonce: nonce_bytes,
            ciphertext: vec![],
        };
        let aad = blob.aad(context);

        aead_key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(aad.as_slice()),
                &mut *in_out,
            )
            .map_err(|_| unavailable(format!("{} encryption failed", self.kind)))?;

        blob.ciphertext = in_out.to_vec();
        Ok(blob)
    }

    /// Open a blob with the suite recorded in it.
    ///
    /// Never returns partial plaintext: wrong key, wrong context or tampered
    /// bytes all fail with `DecryptionFailure`.
    pub fn open(&self, key: &[u8; 32], blob: &Blob, context: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if !blob.kind.is_authenticated() {
            if !self.allow_insecure {
                return Err(unavailable(
                    "slot uses insecure-base64 and allow_insecure_encoding is off",
                ));
            }
            let decoded = STANDARD
                .decode(&blob.ciphertext)
                .map_err(|_| CredentialError::DecryptionFailure)?;
            return Ok(Zeroizing::new(decoded));
        }

        let aead_key = blob.kind.aead_key(key)?;
        let aad = blob.aad(context);

        let mut in_out = Zeroizing::new(blob.ciphertext.clone());
        let plaintext = aead_key
            .open_in_place(
                Nonce::assume_unique_for_key(blob.nonce),
                Aad::from(aad.as_slice()),
                in_out.as_mut_slice(),
            )
            .map_err(|_| CredentialError::DecryptionFailure)?;

        unpad(plaintext)
    }
}

/// Fill a buffer from the system CSPRNG
pub(crate) fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| unavailable("system random source failed"))?;
    Ok(buf)
}
