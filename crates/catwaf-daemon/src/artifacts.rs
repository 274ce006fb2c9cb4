//! Proxy-consumed artifacts on disk.
//!
//! Every write goes to a temp file in the target's directory and is renamed
//! over the target, so the proxy never reads a half-written file. Writers of
//! the same path serialize through [`ArtifactLocks`].

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tempfile::NamedTempFile;
use tokio::sync::OwnedMutexGuard;

/// Permission bits for public artifacts (configs, certificates).
pub const PUBLIC_MODE: u32 = 0o644;

/// Permission bits for private keys and credentials.
pub const PRIVATE_MODE: u32 = 0o600;

/// Artifact errors.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Failed to write {path}: {reason}")]
    Write { path: String, reason: String },

    #[error("Failed to remove {path}: {reason}")]
    Remove { path: String, reason: String },

    #[error("Failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to generate artifact: {0}")]
    Generate(String),
}

fn write_err(path: &Path, e: impl std::fmt::Display) -> ArtifactError {
    ArtifactError::Write {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

/// One async mutex per artifact path.
#[derive(Debug, Clone, Default)]
pub struct ArtifactLocks {
    locks: Arc<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ArtifactLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire exclusive access to `path`.
    pub async fn lock(&self, path: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(path.to_path_buf()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Atomically replace `path` with `contents`.
///
/// Parent directories are created as needed.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<(), ArtifactError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| write_err(path, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| write_err(path, e))?;
    tmp.write_all(contents).map_err(|e| write_err(path, e))?;
    tmp.as_file().sync_all().map_err(|e| write_err(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(mode))
            .map_err(|e| write_err(path, e))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    tmp.persist(path).map_err(|e| write_err(path, e.error))?;
    Ok(())
}

/// Read an artifact; a missing file reads as `None`.
pub fn read_optional(path: &Path) -> Result<Option<String>, ArtifactError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ArtifactError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Remove a file. Returns `false` if it was already gone.
pub fn remove_file(path: &Path) -> Result<bool, ArtifactError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ArtifactError::Remove {
            path: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Remove a directory tree. Returns `false` if it was already gone.
pub fn remove_dir(path: &Path) -> Result<bool, ArtifactError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ArtifactError::Remove {
            path: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}
