use directories::ProjectDirs;
use std::path::{Path, PathBuf};

use crate::error::{WalletError, WalletResult};

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "cgwallet";
pub const APP_NAME: &str = "CGWallet";

pub const DATA_DIR_ENV: &str = "CGWALLET_DATA_DIR";

/// Per-user application data directory: roaming AppData on Windows,
/// Application Support on macOS, the XDG data dir elsewhere.
pub fn data_dir() -> WalletResult<PathBuf> {
    if let Ok(override_path) = std::env::var(DATA_DIR_ENV) {
        if !override_path.is_empty() {
            return Ok(PathBuf::from(override_path));
        }
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| WalletError::Config("cannot determine data directory".into()))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn default_config_path() -> WalletResult<PathBuf> {
    Ok(data_dir()?.join("config.json"))
}

/// Absolute form of `path` without touching the filesystem.
pub fn absolute(path: &Path) -> WalletResult<PathBuf> {
    std::path::absolute(path)
        .map_err(|e| WalletError::storage(format!("resolve {}", path.display()), e))
}
