//! Owner-only temporary files and best-effort deletion.
//!
//! Intermediate tar data is plaintext email, so staging files must never be
//! readable by other local users.

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{ArchiveError, Result};

/// Random characters in each temporary file name.
const RANDOM_NAME_LEN: usize = 12;

/// Create a uniquely named file in `dir`, readable and writable only by the
/// current user.
///
/// The file is *not* removed automatically; pair it with
/// [`safe_delete_file`] (or a guard that calls it).
pub fn create_secure_temp_file(dir: &Path, prefix: &str, extension: &str) -> Result<(File, PathBuf)> {
    let named = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(extension)
        .rand_bytes(RANDOM_NAME_LEN)
        .tempfile_in(dir)
        .map_err(|e| ArchiveError::io(dir, e))?;

    let (file, path) = named.keep().map_err(|e| ArchiveError::io(dir, e.error))?;
    restrict_to_owner(&file, &path)?;

    debug!(path = %path.display(), "Created secure temp file");
    Ok((file, path))
}

#[cfg(unix)]
fn restrict_to_owner(file: &File, path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let perms = std::fs::Permissions::from_mode(0o600);
    if let Err(e) = file.set_permissions(perms) {
        safe_delete_file(path);
        return Err(ArchiveError::io(path, e));
    }
    Ok(())
}

// On Windows the file inherits the per-user temp directory ACL.
#[cfg(not(unix))]
fn restrict_to_owner(_file: &File, _path: &Path) -> Result<()> {
    Ok(())
}

/// Delete `path` if it exists. Never fails: returns `false` and logs a
/// warning when the file exists but could not be removed.
pub fn safe_delete_file(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Deleted file");
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to delete file");
            false
        }
    }
}
