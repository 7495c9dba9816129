//! Passphrase acquisition via TTY prompt or the DEVKIT_CREDENTIALS_PASSPHRASE
//! environment variable.

use secrecy::{ExposeSecret, SecretString};
use std::io::IsTerminal;

use crate::error::{CredentialError, Result};

/// The environment variable name for providing the master passphrase.
pub const PASSPHRASE_ENV_VAR: &str = "DEVKIT_CREDENTIALS_PASSPHRASE";

/// Where the master passphrase comes from
pub trait PassphraseSource {
    /// Passphrase for an existing store
    fn passphrase(&mut self) -> Result<SecretString>;

    /// A new passphrase and its confirmation, for store creation
    fn new_passphrase(&mut self) -> Result<(SecretString, SecretString)>;
}

/// Environment variable first (headless use), then an interactive prompt
#[derive(Debug, Default)]
pub struct TtyPrompt;

fn from_env() -> Option<SecretString> {
    match std::env::var(PASSPHRASE_ENV_VAR) {
        Ok(value) if !value.is_empty() => Some(SecretString::from(value)),
        _ => None,
    }
}

fn read_hidden(prompt: &str) -> Result<SecretString> {
    let value = rpassword::prompt_password(prompt)
        .map_err(|e| CredentialError::io("Failed to read passphrase", e))?;
    Ok(SecretString::from(value))
}

impl PassphraseSource for TtyPrompt {
    fn passphrase(&mut self) -> Result<SecretString> {
        if let Some(pass) = from_env() {
            return Ok(pass);
        }
        if !std::io::stdin().is_terminal() {
            return Err(CredentialError::PassphraseUnavailable);
        }
        read_hidden("Master passphrase: ")
    }

    fn new_passphrase(&mut self) -> Result<(SecretString, SecretString)> {
        // Env var does not need confirmation.
        if let Some(pass) = from_env() {
            let confirm = SecretString::from(pass.expose_secret().to_owned());
            return Ok((pass, confirm));
        }
        if !std::io::stdin().is_terminal() {
            return Err(CredentialError::PassphraseUnavailable);
        }
        let first = read_hidden("New master passphrase: ")?;
        let second = read_hidden("Confirm master passphrase: ")?;
        Ok((first, second))
    }
}

/// A passphrase supplied up front, for scripted callers and tests
pub struct Fixed {
    first: SecretString,
    confirm: Option<SecretString>,
}

impl Fixed {
    pub fn new(passphrase: &str) -> Self {
        Self {
            first: SecretString::from(passphrase.to_owned()),
            confirm: None,
        }
    }

    /// Supply a confirmation that differs from the first entry
    pub fn with_confirmation(passphrase: &str, confirmation: &str) -> Self {
        Self {
            first: SecretString::from(passphrase.to_owned()),
            confirm: Some(SecretString::from(confirmation.to_owned())),
        }
    }
}

impl PassphraseSource for Fixed {
    fn passphrase(&mut self) -> Result<SecretString> {
        Ok(SecretString::from(self.first.expose_secret().to_owned()))
    }

    fn new_passphrase(&mut self) -> Result<(SecretString, SecretString)> {
        let confirm = match &self.confirm {
            Some(c) => c.expose_secret().to_owned(),
            None => self.first.expose_secret().to_owned(),
        };
        Ok((self.passphrase()?, SecretString::from(confirm)))
    }
}

/// Read a visible line of input (non-secret answers such as an organization name)
pub fn read_line(prompt: &str) -> Result<String> {
    use std::io::Write;

    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "{}", prompt);
    let _ = stderr.flush();

    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .map_err(|e| CredentialError::io("Failed to read input", e))?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Read a hidden value (tokens, keys)
pub fn read_secret(prompt: &str) -> Result<SecretString> {
    read_hidden(prompt)
}
