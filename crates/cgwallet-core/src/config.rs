use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{WalletError, WalletResult};
use crate::password::{DEFAULT_ITERATIONS, MAX_ITERATIONS};
use crate::paths;

/// Lowest iteration count a stored verifier may carry.
pub const RECORD_MIN_ITERATIONS: u32 = 50_000;
pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PasswordSettings {
    pub iterations: u32,
    pub min_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UsernameSettings {
    pub max_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitSettings {
    pub threshold: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub reset_after_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WalletConfig {
    pub data_dir: Option<PathBuf>,
    pub database_file: String,
    pub sealed_dir: String,
    pub password: PasswordSettings,
    pub username: UsernameSettings,
    pub rate_limit: RateLimitSettings,
}

impl Default for PasswordSettings {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            min_length: 8,
        }
    }
}

impl Default for UsernameSettings {
    fn default() -> Self {
        Self {
            max_length: USERNAME_MAX_LEN,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            threshold: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            reset_after_secs: 15 * 60,
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            database_file: "users.db".into(),
            sealed_dir: "sealed".into(),
            password: PasswordSettings::default(),
            username: UsernameSettings::default(),
            rate_limit: RateLimitSettings::default(),
        }
    }
}

impl WalletConfig {
    /// Loads `path`, or the default `config.json` when `path` is `None`.
    /// A missing default file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> WalletResult<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (paths::default_config_path()?, false),
        };
        if !path.exists() {
            if required {
                return Err(WalletError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            return Ok(Self::default());
        }
        let data = std::fs::read(&path)
            .map_err(|e| WalletError::storage(format!("read {}", path.display()), e))?;
        let config: Self = serde_json::from_slice(&data)
            .map_err(|e| WalletError::Config(format!("parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> WalletResult<()> {
        if !(RECORD_MIN_ITERATIONS..=MAX_ITERATIONS).contains(&self.password.iterations) {
            return Err(WalletError::Config(format!(
                "password.iterations must be within [{RECORD_MIN_ITERATIONS}, {MAX_ITERATIONS}]"
            )));
        }
        if self.password.min_length < 8 {
            return Err(WalletError::Config(
                "password.min_length cannot be below 8".into(),
            ));
        }
        if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&self.username.max_length) {
            return Err(WalletError::Config(format!(
                "username.max_length must be within [{USERNAME_MIN_LEN}, {USERNAME_MAX_LEN}]"
            )));
        }
        let rl = &self.rate_limit;
        if rl.threshold == 0 || rl.base_delay_ms == 0 || rl.max_delay_ms < rl.base_delay_ms {
            return Err(WalletError::Config("rate_limit values out of range".into()));
        }
        if self.database_file.is_empty() || self.sealed_dir.is_empty() {
            return Err(WalletError::Config(
                "database_file and sealed_dir must be set".into(),
            ));
        }
        Ok(())
    }

    /// Data directory: `CGWALLET_DATA_DIR`, then the configured value, then the platform default.
    pub fn resolved_data_dir(&self) -> WalletResult<PathBuf> {
        if let Ok(env_dir) = std::env::var(paths::DATA_DIR_ENV) {
            if !env_dir.is_empty() {
                return Ok(PathBuf::from(env_dir));
            }
        }
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => paths::data_dir(),
        }
    }

    pub fn database_path(&self) -> WalletResult<PathBuf> {
        Ok(self.resolved_data_dir()?.join(&self.database_file))
    }

    pub fn sealed_path(&self) -> WalletResult<PathBuf> {
        Ok(self.resolved_data_dir()?.join(&self.sealed_dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_file_takes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, br#"{"password": {"iterations": 200000}}"#).unwrap();
        let config = WalletConfig::load(Some(&path)).unwrap();
        assert_eq!(config.password.iterations, 200_000);
        assert_eq!(config.password.min_length, 8);
        assert_eq!(config.rate_limit, RateLimitSettings::default());
        assert_eq!(config.database_file, "users.db");
    }

    #[test]
    fn rejects_weak_iterations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, br#"{"password": {"iterations": 1000}}"#).unwrap();
        let err = WalletConfig::load(Some(&path)).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Config);
    }

    #[test]
    fn missing_explicit_file_is_error() {
        let dir = tempdir().unwrap();
        assert!(WalletConfig::load(Some(&dir.path().join("nope.json"))).is_err());
    }

    #[test]
    fn explicit_data_dir_drives_paths() {
        let config = WalletConfig {
            data_dir: Some(PathBuf::from("/tmp/cgw")),
            ..WalletConfig::default()
        };
        if std::env::var(paths::DATA_DIR_ENV).is_err() {
            assert_eq!(config.database_path().unwrap(), PathBuf::from("/tmp/cgw/users.db"));
            assert_eq!(config.sealed_path().unwrap(), PathBuf::from("/tmp/cgw/sealed"));
        }
    }
}
