//! Crash-safe file replacement: write a temporary file in the target
//! directory, fsync it, then rename over the target.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{WalletError, WalletResult};

/// A fully written and synced temporary file that has not replaced its target yet.
/// Dropping it without [`StagedWrite::commit`] removes the temporary file and
/// leaves the target untouched.
pub struct StagedWrite {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    pub fn new(target: &Path, contents: &[u8]) -> WalletResult<Self> {
        let dir = parent_dir(target);
        fs::create_dir_all(dir)
            .map_err(|e| WalletError::storage(format!("create {}", dir.display()), e))?;
        let mut temp = NamedTempFile::new_in(dir)
            .map_err(|e| WalletError::storage(format!("temp file in {}", dir.display()), e))?;
        temp.write_all(contents)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|e| WalletError::storage(format!("write {}", temp.path().display()), e))?;
        Ok(Self {
            temp,
            target: target.to_path_buf(),
        })
    }

    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    pub fn commit(self) -> WalletResult<()> {
        let target = self.target;
        self.temp
            .persist(&target)
            .map_err(|e| {
                WalletError::storage(format!("rename onto {}", target.display()), e.error)
            })?;
        sync_dir(parent_dir(&target));
        debug!(path = %target.display(), "file replaced atomically");
        Ok(())
    }
}

pub fn write_atomic(target: &Path, contents: &[u8]) -> WalletResult<()> {
    StagedWrite::new(target, contents)?.commit()
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

// Makes the rename itself durable; best effort where directories cannot be opened.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = fs::File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn replaces_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.db");
        write_atomic(&path, b"old").unwrap();
        write_atomic(&path, b"new").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn dropped_stage_leaves_target_intact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.db");
        write_atomic(&path, b"old").unwrap();
        let staged = StagedWrite::new(&path, b"new").unwrap();
        let temp = staged.temp_path().to_path_buf();
        assert!(temp.exists());
        assert_eq!(fs::read(&path).unwrap(), b"old");
        drop(staged);
        assert!(!temp.exists());
        assert_eq!(fs::read(&path).unwrap(), b"old");
    }

    #[test]
    fn creates_missing_parent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deeper/users.db");
        write_atomic(&path, b"x").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"x");
    }
}
