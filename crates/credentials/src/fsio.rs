//! Owner-only file helpers
//!
//! Every file in the store is written to a temp file in the same directory
//! and renamed over the target, so readers see the old or the new version
//! and never a torn write.

use std::fs::{self, File, OpenOptions, Permissions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::error::{CredentialError, IoContext, Result};

pub const DIR_MODE: u32 = 0o700;
pub const FILE_MODE: u32 = 0o600;

/// Create `dir` (and parents) and restrict it to the owner
pub fn ensure_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .io_context(|| format!("Failed to create directory {}", dir.display()))?;
    fs::set_permissions(dir, Permissions::from_mode(DIR_MODE))
        .io_context(|| format!("Failed to set permissions on {}", dir.display()))
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp.{}", name, std::process::id()))
}

/// Atomically replace `path` with `contents`, mode 600
pub fn write_private_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = temp_path(path);

    let result = (|| {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(FILE_MODE)
            .open(&tmp)
            .io_context(|| format!("Failed to create {}", tmp.display()))?;
        file.write_all(contents)
            .io_context(|| format!("Failed to write {}", tmp.display()))?;
        file.sync_all()
            .io_context(|| format!("Failed to sync {}", tmp.display()))?;
        // mode() only applies on creation; a stale temp file keeps its old bits
        fs::set_permissions(&tmp, Permissions::from_mode(FILE_MODE))
            .io_context(|| format!("Failed to set permissions on {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .io_context(|| format!("Failed to move {} into place", path.display()))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
        return result;
    }

    if let Some(parent) = path.parent() {
        // Best effort: persist the rename itself
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}

/// Remove a file, treating "already gone" as success. Returns whether it existed.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CredentialError::io(
            format!("Failed to remove {}", path.display()),
            e,
        )),
    }
}
