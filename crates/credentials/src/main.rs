//! credentials - Local encrypted credential store for devkit
//!
//! Passphrase-protected storage for tokens, keys, and connection strings.
//!
//! Commands:
//! - (none) / setup: Interactive walkthrough of every well-known credential
//! - set <KEY> [VALUE]: Store a credential (prompts if no value)
//! - get <KEY>: Print a credential
//! - list / --list: Show the catalog (no passphrase needed)
//! - verify / --verify: Report which well-known credentials are configured
//! - remove <KEY>: Delete a credential
//! - env: Output shell export statements
//! - descriptor: Output the deferred (value-free) environment descriptor
//! - inject <CMD>: Run command with credentials in environment
//! - rekey: Change the master passphrase
//! - reconcile: Drop catalog entries whose slot is gone
//! - export [FILE] / import <FILE>: Backup and restore

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use credentials::known::{self, Category};
use credentials::materialize::{render_shell_exports, Descriptor};
use credentials::prompt;
use credentials::{
    backup, CredentialError, CredentialStore, MaterializedEnv, Presence, StoreOptions, StoreOutcome,
    TtyPrompt,
};
use devkit_core::{format, Config, Paths};
use secrecy::{ExposeSecret, SecretString};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "credentials")]
#[command(about = "Local encrypted credential store for devkit - tokens, keys, and connection strings")]
#[command(version)]
#[command(after_help = r#"WELL-KNOWN KEYS:
    github_token, github_org          Source control
    aws_access_key_id, aws_region     Cloud (plus aws_secret_access_key)
    database_url, redis_url           Databases
    openai_api_key, anthropic_api_key AI providers
    npm_token, docker_hub_token       Package registries

SECURITY:
    - Values are sealed with AES-256-GCM under a PBKDF2-derived key
    - The master passphrase is never written to disk
    - Store lives in ~/.local/share/devkit/credentials/ (override with DEVKIT_CREDENTIALS_DIR)
    - Set DEVKIT_CREDENTIALS_PASSPHRASE for non-interactive use"#)]
struct Cli {
    /// Print the credential catalog (same as `list`)
    #[arg(long, conflicts_with = "verify")]
    list: bool,

    /// Report which well-known credentials are configured (same as `verify`)
    #[arg(long)]
    verify: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Set the master passphrase and walk through every well-known credential
    Setup,

    /// Store a credential (prompts securely if value not provided)
    Set {
        /// Credential key (e.g., github_token, database_url)
        key: String,
        /// Credential value (omit for secure hidden prompt)
        value: Option<String>,
        /// Description shown by `list`
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Retrieve and print a credential value
    Get {
        /// Don't print trailing newline (useful for piping)
        #[arg(short = 'n')]
        no_newline: bool,
        /// Credential key
        key: String,
    },

    /// List stored credentials (values hidden)
    List {
        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Report presence of every well-known credential without revealing values
    Verify {
        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Delete a credential permanently
    Remove {
        /// Credential key to delete
        key: String,
    },

    /// Output credentials as shell export statements (eval "$(credentials env)")
    Env,

    /// Output a value-free descriptor of env var -> credential bindings
    Descriptor {
        /// Bind every stored key, not just the well-known ones
        #[arg(long)]
        all: bool,
    },

    /// Run a command with credentials injected as environment variables
    Inject {
        /// Command to run with credentials in environment
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Change the master passphrase, re-encrypting every credential
    Rekey,

    /// Drop catalog entries whose encrypted file is missing
    Reconcile,

    /// Export the encrypted store to a backup archive
    Export {
        /// Output file path
        #[arg(default_value = "credentials-backup.tar.gz")]
        file: PathBuf,
    },

    /// Restore the store from a backup archive
    Import {
        /// Archive to import
        file: PathBuf,
        /// Replace an existing store
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = Config::load_default()?;
    let dir = config.credentials.resolve_store_dir(&Paths::new());
    let options = StoreOptions::from_settings(&config.credentials)?;

    let command = if cli.list {
        Commands::List { json: false }
    } else if cli.verify {
        Commands::Verify { json: false }
    } else {
        cli.command.unwrap_or(Commands::Setup)
    };

    match command {
        Commands::Setup => cmd_setup(&dir, options),
        Commands::Set {
            key,
            value,
            description,
        } => cmd_set(&dir, options, &key, value, description),
        Commands::Get { no_newline, key } => cmd_get(&dir, options, &key, no_newline),
        Commands::List { json } => cmd_list(&dir, json),
        Commands::Verify { json } => cmd_verify(&dir, options, json),
        Commands::Remove { key } => cmd_remove(&dir, options, &key),
        Commands::Env => cmd_env(&dir, options),
        Commands::Descriptor { all } => cmd_descriptor(&dir, options, all),
        Commands::Inject { command } => cmd_inject(&dir, options, &command),
        Commands::Rekey => cmd_rekey(&dir, options),
        Commands::Reconcile => cmd_reconcile(&dir, options),
        Commands::Export { file } => cmd_export(&dir, options, &file),
        Commands::Import { file, force } => cmd_import(&dir, options, &file, force),
    }
}

fn unlock(dir: &Path, options: StoreOptions) -> Result<CredentialStore> {
    CredentialStore::open(dir, options, &mut TtyPrompt).context("Failed to unlock credential store")
}

/// Interactive walkthrough
fn cmd_setup(dir: &Path, options: StoreOptions) -> Result<()> {
    let first_run = !CredentialStore::is_initialized(dir);
    if first_run {
        println!("info: Creating credential store in {}", dir.display());
        println!("Choose a master passphrase. It is never stored; losing it loses every credential.");
    }

    let store = CredentialStore::setup(dir, options, &mut TtyPrompt)?;
    if first_run {
        println!("success: Credential store created");
    }
    println!();
    println!("Press Enter to keep a credential unchanged.");

    let mut answers: Vec<(&'static str, SecretString, &'static str)> = vec![];
    for category in Category::ALL {
        println!();
        println!("{}", category.title());

        for credential in known::in_category(category) {
            let status = if store.exists(credential.key) { "set" } else { "not set" };
            let question = format!("  {} [{}]: ", credential.description, status);
            let answer = if credential.secret {
                prompt::read_secret(&question)?
            } else {
                SecretString::from(prompt::read_line(&question)?)
            };
            answers.push((credential.key, answer, credential.description));
        }
    }

    let results = store.store_batch(
        answers
            .iter()
            .map(|(key, value, desc)| (*key, value.expose_secret(), *desc)),
    );

    let mut stored = 0;
    let mut failed = 0;
    for (key, result) in results {
        match result {
            Ok(StoreOutcome::Stored) => stored += 1,
            Ok(StoreOutcome::Skipped) => {}
            Err(e) => {
                failed += 1;
                println!("error: {}: {}", key, e);
            }
        }
    }

    println!();
    println!("success: {} credential(s) updated", stored);
    if failed > 0 {
        bail!("{} credential(s) could not be stored", failed);
    }
    Ok(())
}

/// Store a credential
fn cmd_set(
    dir: &Path,
    options: StoreOptions,
    key: &str,
    value: Option<String>,
    description: Option<String>,
) -> Result<()> {
    let store = CredentialStore::setup(dir, options, &mut TtyPrompt)?;

    // Get value - prompt if not provided
    let secret_value = match value {
        Some(v) => SecretString::from(v),
        None => prompt::read_secret("Enter credential value: ")?,
    };

    let description = description.unwrap_or_else(|| match known::by_key(key) {
        Some(credential) => credential.description.to_string(),
        None => key.to_string(),
    });

    match store.store(key, secret_value.expose_secret(), &description)? {
        StoreOutcome::Stored => println!("success: Credential stored: {}", key),
        StoreOutcome::Skipped => println!("warning: Empty value, {} left unchanged", key),
    }

    Ok(())
}

/// Retrieve a credential
fn cmd_get(dir: &Path, options: StoreOptions, key: &str, no_newline: bool) -> Result<()> {
    let store = unlock(dir, options)?;

    let Some(value) = store.load(key)? else {
        bail!("Credential not found: {}", key);
    };

    if no_newline {
        print!("{}", value.expose_secret());
    } else {
        println!("{}", value.expose_secret());
    }

    Ok(())
}

/// List the catalog
fn cmd_list(dir: &Path, json: bool) -> Result<()> {
    let rows = CredentialStore::read_catalog(dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No credentials stored. Add one with: credentials set <key>");
        return Ok(());
    }

    println!("Stored Credentials");
    println!();

    let width = rows.iter().map(|r| r.key.len()).max().unwrap_or(0);
    for row in &rows {
        println!(
            "  {:<width$}  {:<40}  {}",
            row.key,
            format::truncate(&row.description, 40),
            format::relative_time(row.updated),
            width = width
        );
    }

    Ok(())
}

/// Report presence per well-known key
fn cmd_verify(dir: &Path, options: StoreOptions, json: bool) -> Result<()> {
    let store = unlock(dir, options)?;
    let report = store.verify()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Credential Status");
    println!();
    for status in &report.known {
        let mark = match status.presence {
            Presence::Present => "ok     ",
            Presence::Absent => "missing",
            Presence::Corrupt => "CORRUPT",
        };
        println!("  {}  {:<22} {}", mark, status.env_var, status.description);
    }

    println!();
    println!(
        "{} configured, {} missing, {} corrupt",
        report.count(Presence::Present),
        report.count(Presence::Absent),
        report.count(Presence::Corrupt)
    );

    for key in &report.missing_slots {
        println!("warning: catalog lists {} but its encrypted file is gone (run: credentials reconcile)", key);
    }
    for key in &report.unindexed_slots {
        println!("warning: {} has an encrypted file but no catalog entry (re-store it)", key);
    }

    if report.count(Presence::Corrupt) > 0 {
        bail!("Some credentials cannot be decrypted");
    }
    Ok(())
}

/// Delete a credential
fn cmd_remove(dir: &Path, options: StoreOptions, key: &str) -> Result<()> {
    let store = unlock(dir, options)?;
    if !store.remove(key)? {
        bail!("Credential not found: {}", key);
    }
    println!("success: Credential removed: {}", key);
    Ok(())
}

/// Output shell exports for every stored credential
fn cmd_env(dir: &Path, options: StoreOptions) -> Result<()> {
    let store = unlock(dir, options)?;
    let env = Descriptor::catalog(&store)?.evaluate(&store)?;
    warn_skipped(&env);
    print!("{}", render_shell_exports(&env));
    Ok(())
}

fn warn_skipped(env: &MaterializedEnv) {
    for key in &env.corrupt {
        eprintln!("warning: Failed to decrypt {}", key);
    }
    for key in &env.unbound {
        eprintln!(
            "warning: {} not exported, {} is already bound or not a valid name",
            key,
            known::env_var_for(key)
        );
    }
}

/// Output the deferred descriptor
fn cmd_descriptor(dir: &Path, options: StoreOptions, all: bool) -> Result<()> {
    let descriptor = if all {
        let store = unlock(dir, options)?;
        Descriptor::catalog(&store)?
    } else {
        Descriptor::known()
    };
    println!("{}", descriptor.to_json()?);
    Ok(())
}

/// Run a command with credentials injected
fn cmd_inject(dir: &Path, options: StoreOptions, command: &[String]) -> Result<()> {
    if command.is_empty() {
        bail!("Command required. Usage: credentials inject <command>");
    }

    let store = unlock(dir, options)?;
    let env = Descriptor::catalog(&store)?.evaluate(&store)?;
    warn_skipped(&env);

    // Build command
    let program = &command[0];
    let args = &command[1..];

    let mut cmd = Command::new(program);
    cmd.args(args);
    env.command_env(&mut cmd);
    drop(store);

    // Replace current process with the command
    let err = cmd.exec();

    // exec() only returns if there was an error
    bail!("Failed to execute command: {}", err);
}

/// Change the master passphrase
fn cmd_rekey(dir: &Path, options: StoreOptions) -> Result<()> {
    let mut store = unlock(dir, options)?;

    let new = prompt::read_secret("New master passphrase: ")?;
    let confirm = prompt::read_secret("Confirm new master passphrase: ")?;
    if new.expose_secret() != confirm.expose_secret() {
        bail!(CredentialError::PassphraseMismatch);
    }

    let count = store.rekey(&new)?;
    println!("success: Master passphrase changed, {} credential(s) re-encrypted", count);
    Ok(())
}

/// Drop dangling catalog entries
fn cmd_reconcile(dir: &Path, options: StoreOptions) -> Result<()> {
    let store = unlock(dir, options)?;
    let report = store.reconcile()?;

    for key in &report.dropped_entries {
        println!("info: Dropped catalog entry without encrypted file: {}", key);
    }
    for key in &report.unindexed_slots {
        println!("warning: {} has an encrypted file but no catalog entry (re-store it)", key);
    }
    if report.dropped_entries.is_empty() && report.unindexed_slots.is_empty() {
        println!("success: Catalog and encrypted files agree");
    }
    Ok(())
}

/// Export the store
fn cmd_export(dir: &Path, options: StoreOptions, file: &Path) -> Result<()> {
    let count = backup::export(dir, file, options.lock_timeout)?;

    println!("success: {} credential(s) exported to: {}", count, file.display());
    println!("The archive is encrypted; restoring it still needs the master passphrase.");

    Ok(())
}

/// Import a backup
fn cmd_import(dir: &Path, options: StoreOptions, file: &Path, force: bool) -> Result<()> {
    if !file.exists() {
        bail!("Import file not found: {}", file.display());
    }

    let count = backup::import(dir, file, force, options.lock_timeout)?;
    println!("success: {} credential(s) imported", count);
    println!("Run `credentials --verify` to check the store opens with your passphrase.");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse() {
        let cli = Cli::try_parse_from(["credentials"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.list && !cli.verify);

        let cli = Cli::try_parse_from(["credentials", "set", "github_token", "abc", "-d", "PAT"]).unwrap();
        if let Some(Commands::Set {
            key,
            value,
            description,
        }) = cli.command
        {
            assert_eq!(key, "github_token");
            assert_eq!(value, Some("abc".to_string()));
            assert_eq!(description, Some("PAT".to_string()));
        } else {
            panic!("Expected Set command");
        }

        let cli = Cli::try_parse_from(["credentials", "get", "-n", "github_token"]).unwrap();
        if let Some(Commands::Get { key, no_newline }) = cli.command {
            assert_eq!(key, "github_token");
            assert!(no_newline);
        } else {
            panic!("Expected Get command");
        }
    }

    #[test]
    fn test_legacy_flags() {
        let cli = Cli::try_parse_from(["credentials", "--list"]).unwrap();
        assert!(cli.list);

        let cli = Cli::try_parse_from(["credentials", "--verify"]).unwrap();
        assert!(cli.verify);

        assert!(Cli::try_parse_from(["credentials", "--list", "--verify"]).is_err());
    }

    #[test]
    fn test_cli_inject() {
        let cli = Cli::try_parse_from(["credentials", "inject", "npm", "run", "dev"]).unwrap();
        if let Some(Commands::Inject { command }) = cli.command {
            assert_eq!(command, vec!["npm", "run", "dev"]);
        } else {
            panic!("Expected Inject command");
        }
    }

    #[test]
    fn test_cli_import_force() {
        let cli = Cli::try_parse_from(["credentials", "import", "backup.tar.gz", "--force"]).unwrap();
        if let Some(Commands::Import { file, force }) = cli.command {
            assert_eq!(file, PathBuf::from("backup.tar.gz"));
            assert!(force);
        } else {
            panic!("Expected Import command");
        }
    }
}
