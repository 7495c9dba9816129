//! devkit core - Shared functionality for all devkit tools
//!
//! devkit installs development tooling and scaffolds projects. The pieces
//! every tool needs live here: where things go on disk, the global config
//! file, and a few display helpers.

pub mod config;
pub mod format;
pub mod paths;

pub use config::{Config, CredentialsSettings};
pub use paths::Paths;
