//! Environment materializer
//!
//! Turns stored credentials into environment variables, in two modes:
//!
//! - Immediate: decrypt now and hand the values to this process
//!   ([`MaterializedEnv::apply`]) or to a child ([`MaterializedEnv::command_env`]).
//! - Deferred: a [`Descriptor`] is a plain list of `(env_var, key)` bindings.
//!   It holds no values and no shell syntax; whoever needs the variables
//!   later evaluates it through the store.
//!
//! [`render_shell_exports`] exists for shells that want `eval $(credentials env)`.
//! Its output is a script fragment, not a key=value data file.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::process::Command;
use tracing::warn;

use crate::error::{CredentialError, Result};
use crate::known::{self, KNOWN_CREDENTIALS};
use crate::store::CredentialStore;

const DESCRIPTOR_VERSION: u32 = 1;

/// One deferred environment variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub env_var: String,
    pub key: String,
}

/// A lazy materializer: which keys become which variables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub version: u32,
    pub bindings: Vec<Binding>,
}

impl Descriptor {
    /// Bindings for every well-known credential
    pub fn known() -> Self {
        Self {
            version: DESCRIPTOR_VERSION,
            bindings: KNOWN_CREDENTIALS
                .iter()
                .map(|c| Binding {
                    env_var: c.env_var.to_string(),
                    key: c.key.to_string(),
                })
                .collect(),
        }
    }

    /// Bindings for arbitrary keys, named after the key
    pub fn for_keys<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            version: DESCRIPTOR_VERSION,
            bindings: keys
                .into_iter()
                .map(|key| Binding {
                    env_var: known::env_var_for(key),
                    key: key.to_string(),
                })
                .collect(),
        }
    }

    /// Bindings for every key currently in the store's catalog
    pub fn catalog(store: &CredentialStore) -> Result<Self> {
        let rows = store.list()?;
        Ok(Self::for_keys(rows.iter().map(|r| r.key.as_str())))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CredentialError::Catalog(format!("Failed to serialize descriptor: {}", e)))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let descriptor: Self = serde_json::from_str(content)
            .map_err(|e| CredentialError::Catalog(format!("Invalid descriptor: {}", e)))?;
        if descriptor.version != DESCRIPTOR_VERSION {
            return Err(CredentialError::Catalog(format!(
                "Unsupported descriptor version {}",
                descriptor.version
            )));
        }
        if let Some(bad) = descriptor
            .bindings
            .iter()
            .find(|b| !known::is_env_var_name(&b.env_var))
        {
            return Err(CredentialError::Catalog(format!(
                "Invalid environment variable name '{}'",
                bad.env_var
            )));
        }
        Ok(descriptor)
    }

    /// Decrypt every bound key now.
    ///
    /// Missing keys are skipped. Corrupt keys are skipped and reported in
    /// [`MaterializedEnv::corrupt`]. A binding whose variable name is not a
    /// shell identifier, or was already taken by an earlier binding, is
    /// skipped and reported in [`MaterializedEnv::unbound`]. Any other
    /// failure aborts.
    pub fn evaluate(&self, store: &CredentialStore) -> Result<MaterializedEnv> {
        let mut env = MaterializedEnv::default();
        let mut taken = BTreeSet::new();

        for binding in &self.bindings {
            if !known::is_env_var_name(&binding.env_var) {
                warn!(key = %binding.key, env_var = %binding.env_var, "not a valid variable name, skipping");
                env.unbound.push(binding.key.clone());
                continue;
            }
            if !taken.insert(binding.env_var.as_str()) {
                warn!(key = %binding.key, env_var = %binding.env_var, "variable already bound to another key, skipping");
                env.unbound.push(binding.key.clone());
                continue;
            }

            match store.load(&binding.key) {
                Ok(Some(value)) => {
                    env.vars.insert(binding.env_var.clone(), value);
                }
                Ok(None) => {}
                Err(CredentialError::CorruptCredential { key }) => {
                    warn!(key = %key, "failed to decrypt credential, skipping");
                    env.corrupt.push(key);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(env)
    }
}

/// Decrypted environment, ready to inject
#[derive(Debug, Default)]
pub struct MaterializedEnv {
    vars: BTreeMap<String, SecretString>,
    /// Keys that exist but could not be decrypted
    pub corrupt: Vec<String>,
    /// Keys whose variable name was invalid or already bound
    pub unbound: Vec<String>,
}

impl MaterializedEnv {
    /// Immediate mode for the well-known keys
    pub fn known(store: &CredentialStore) -> Result<Self> {
        Descriptor::known().evaluate(store)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn get(&self, env_var: &str) -> Option<&SecretString> {
        self.vars.get(env_var)
    }

    /// Set every variable in the current process environment
    pub fn apply(&self) {
        for (name, value) in &self.vars {
            std::env::set_var(name, value.expose_secret());
        }
    }

    /// Add every variable to a child process
    pub fn command_env(&self, cmd: &mut Command) {
        for (name, value) in &self.vars {
            cmd.env(name, value.expose_secret());
        }
    }
}

/// Render `export NAME='value'` lines for `eval` in a POSIX shell.
///
/// The output is executable shell, not data: never parse it as key=value.
pub fn render_shell_exports(env: &MaterializedEnv) -> String {
    let mut out = String::from("# devkit credentials: shell script fragment, eval it, do not parse it\n");
    for (name, value) in &env.vars {
        // Escape single quotes in the value
        let escaped = value.expose_secret().replace('\'', "'\\''");
        out.push_str(&format!("export {}='{}'\n", name, escaped));
    }
    out
}
