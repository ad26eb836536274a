//! User registry: the username → record index, its encrypted file, and the
//! `UNINITIALIZED → LOCKED → OPEN` lifecycle around the master key.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::codec::{decode_records, encode_records, UserRecord, UserSummary};
use crate::config::{WalletConfig, RECORD_MIN_ITERATIONS, USERNAME_MIN_LEN};
use crate::entropy::{EntropySource, SystemEntropy};
use crate::envelope::{DatabaseEnvelope, KeyHeader};
use crate::error::{WalletError, WalletResult};
use crate::master_key::{self, MasterKey, MasterKeyManager};
use crate::password::{PasswordHasher, PasswordVerifier};
use crate::paths;
use crate::platform::{PlatformCrypto, SecretBytes};
use crate::storage;
use crate::throttle::LoginThrottle;
use crate::vault::WalletSecretVault;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    Uninitialized,
    Locked,
    Open,
}

impl fmt::Display for RegistryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "UNINITIALIZED",
            Self::Locked => "LOCKED",
            Self::Open => "OPEN",
        })
    }
}

/// Database bound by `open`.
struct Database {
    path: PathBuf,
    db_id: String,
}

/// Present only while `OPEN`. Dropping it zeroes the master key.
struct Session {
    key: MasterKey,
    header: KeyHeader,
    users: BTreeMap<String, UserRecord>,
}

pub struct UserRegistry {
    crypto: PlatformCrypto,
    hasher: PasswordHasher,
    vault: WalletSecretVault,
    keys: MasterKeyManager,
    config: WalletConfig,
    throttle: LoginThrottle,
    database: Option<Database>,
    session: Option<Session>,
}

impl fmt::Debug for UserRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRegistry")
            .field("state", &self.state())
            .field("path", &self.database_path())
            .field("backend", &self.crypto.backend())
            .finish_non_exhaustive()
    }
}

impl UserRegistry {
    pub fn new(
        crypto: PlatformCrypto,
        entropy: Arc<dyn EntropySource>,
        config: WalletConfig,
    ) -> WalletResult<Self> {
        config.validate()?;
        Ok(Self {
            hasher: PasswordHasher::new(crypto.clone()),
            vault: WalletSecretVault::new(crypto.clone()),
            keys: MasterKeyManager::new(crypto.clone(), entropy),
            throttle: LoginThrottle::new(config.rate_limit.clone()),
            crypto,
            config,
            database: None,
            session: None,
        })
    }

    /// Host sealed store and machine identity.
    pub fn native(config: WalletConfig) -> WalletResult<Self> {
        let crypto = PlatformCrypto::native(&config)?;
        Self::new(crypto, Arc::new(SystemEntropy), config)
    }

    pub fn state(&self) -> RegistryState {
        match (&self.database, &self.session) {
            (None, _) => RegistryState::Uninitialized,
            (Some(_), None) => RegistryState::Locked,
            (Some(_), Some(_)) => RegistryState::Open,
        }
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn backend(&self) -> &'static str {
        self.crypto.backend()
    }

    pub fn database_path(&self) -> Option<&Path> {
        self.database.as_ref().map(|db| db.path.as_path())
    }

    pub fn db_id(&self) -> Option<&str> {
        self.database.as_ref().map(|db| db.db_id.as_str())
    }

    /// Binds the registry to `path`. An existing file must parse; it is
    /// decrypted only by [`UserRegistry::unlock`].
    pub fn open(&mut self, path: &Path) -> WalletResult<()> {
        self.require(RegistryState::Uninitialized)?;
        let path = paths::absolute(path)?;
        let db_id = master_key::db_id(&self.crypto, &path);
        let existing =
            read_envelope(&path).map_err(|e| e.during("open", path.display().to_string()))?;
        info!(
            path = %path.display(),
            db_id = %db_id,
            exists = existing.is_some(),
            "database opened"
        );
        self.database = Some(Database { path, db_id });
        Ok(())
    }

    pub fn open_default(&mut self) -> WalletResult<()> {
        let path = self.config.database_path()?;
        self.open(&path)
    }

    pub fn unlock(&mut self) -> WalletResult<()> {
        self.require(RegistryState::Locked)?;
        let (path, db_id) = match &self.database {
            Some(db) => (db.path.clone(), db.db_id.clone()),
            None => return Err(self.invalid_state(RegistryState::Locked)),
        };
        let subject = path.display().to_string();
        let (session, resealed) = self
            .load_session(&path, &db_id)
            .map_err(|e| e.during("unlock", subject.clone()))?;
        self.session = Some(session);
        if resealed {
            if let Err(e) = self.persist() {
                self.session = None;
                return Err(e.during("unlock", subject));
            }
        }
        info!(path = %path.display(), users = self.user_count_unchecked(), "registry unlocked");
        Ok(())
    }

    fn load_session(&self, path: &Path, db_id: &str) -> WalletResult<(Session, bool)> {
        let Some(envelope) = read_envelope(path)? else {
            let provisioned = self.keys.provision(db_id)?;
            return Ok((
                Session {
                    key: provisioned.key,
                    header: provisioned.header,
                    users: BTreeMap::new(),
                },
                false,
            ));
        };
        let unlocked = self.keys.open(db_id, &envelope)?;
        let records = decode_records(&unlocked.plaintext)?;
        let mut users = BTreeMap::new();
        for record in records {
            if let Err(e) = check_stored_verifier(&record.password_verifier) {
                warn!(username = %record.username, error = %e, "stored password verifier rejected");
                return Err(e.during("load record", record.username.as_str()));
            }
            let username = record.username.clone();
            if users.insert(username, record).is_some() {
                return Err(WalletError::DatabaseCorrupt(
                    "duplicate username in user table".into(),
                ));
            }
        }
        let resealed = unlocked.resealed_header.is_some();
        Ok((
            Session {
                key: unlocked.key,
                header: unlocked.resealed_header.unwrap_or(envelope.header),
                users,
            },
            resealed,
        ))
    }

    /// Zeroes the master key and forgets the decrypted records.
    pub fn lock(&mut self) -> WalletResult<()> {
        if self.state() == RegistryState::Uninitialized {
            return Err(self.invalid_state(RegistryState::Locked));
        }
        if self.session.take().is_some() {
            info!(path = ?self.database_path(), "registry locked");
        }
        Ok(())
    }

    pub fn close(&mut self) {
        self.session = None;
        if let Some(db) = self.database.take() {
            info!(path = %db.path.display(), "database closed");
        }
    }

    pub fn user_count(&self) -> WalletResult<usize> {
        Ok(self.session()?.users.len())
    }

    pub fn list_users(&self) -> WalletResult<Vec<UserSummary>> {
        Ok(self.session()?.users.values().map(UserSummary::from).collect())
    }

    pub fn register(&mut self, username: &str, password: &str) -> WalletResult<UserSummary> {
        self.require(RegistryState::Open)?;
        validate_username(username, self.config.username.max_length)?;
        self.validate_password(password)?;
        if self.session()?.users.contains_key(username) {
            return Err(WalletError::UsernameExists(username.to_string()));
        }

        let verifier = self
            .hasher
            .create_verifier(password, self.config.password.iterations)
            .map_err(|e| e.during("register", username))?;
        let seed = self
            .vault
            .create(username)
            .map_err(|e| e.during("register", username))?;
        let now = unix_now();
        let record = UserRecord {
            username: username.to_string(),
            password_verifier: verifier,
            wallet_public_identifier: seed.public_identifier,
            secret_handle: seed.handle.clone(),
            created_at: now,
            last_login_at: 0,
        };
        let summary = UserSummary::from(&record);
        self.session_mut()?.users.insert(username.to_string(), record);

        if let Err(e) = self.persist() {
            self.session_mut()?.users.remove(username);
            if let Err(cleanup) = self.vault.delete(&seed.handle) {
                warn!(username, error = %cleanup, "seed not removed after aborted registration");
            }
            return Err(e.during("register", username));
        }
        info!(username, "user registered");
        Ok(summary)
    }

    pub fn login(&mut self, username: &str, password: &str) -> WalletResult<UserSummary> {
        self.authenticate(username, password)?;
        let session = self.session_mut()?;
        let Some(record) = session.users.get_mut(username) else {
            return Err(WalletError::NoSuchUser(username.to_string()));
        };
        let previous = record.last_login_at;
        record.last_login_at = previous.max(unix_now());
        let summary = UserSummary::from(&*record);
        if let Err(e) = self.persist() {
            if let Some(record) = self.session_mut()?.users.get_mut(username) {
                record.last_login_at = previous;
            }
            return Err(e.during("login", username));
        }
        info!(username, "login succeeded");
        Ok(summary)
    }

    pub fn delete_user(&mut self, username: &str, password: &str) -> WalletResult<()> {
        self.authenticate(username, password)?;
        let Some(record) = self.session_mut()?.users.remove(username) else {
            return Err(WalletError::NoSuchUser(username.to_string()));
        };
        if let Err(e) = self.persist() {
            self.session_mut()?.users.insert(username.to_string(), record);
            debug!(username, "user restored after failed persist");
            return Err(e.during("delete_user", username));
        }
        if let Err(e) = self.vault.delete(&record.secret_handle) {
            // Put the record back so the user and the seed stay paired.
            self.session_mut()?.users.insert(username.to_string(), record);
            if let Err(restore) = self.persist() {
                warn!(username, error = %restore, "user record not restored on disk");
            }
            return Err(e.during("delete_user", username));
        }
        info!(username, "user deleted");
        Ok(())
    }

    /// Caller owns the seed; the buffer is zeroed when dropped.
    pub fn reveal_seed(&mut self, username: &str, password: &str) -> WalletResult<SecretBytes> {
        self.authenticate(username, password)?;
        let handle = self
            .session()?
            .users
            .get(username)
            .map(|r| r.secret_handle.clone())
            .ok_or_else(|| WalletError::NoSuchUser(username.to_string()))?;
        let seed = self
            .vault
            .unseal(&handle)
            .map_err(|e| e.during("reveal_seed", username))?;
        info!(username, "wallet seed revealed");
        Ok(seed)
    }

    pub fn change_password(
        &mut self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> WalletResult<()> {
        self.authenticate(username, old_password)?;
        self.validate_password(new_password)?;
        let verifier = self
            .hasher
            .create_verifier(new_password, self.config.password.iterations)
            .map_err(|e| e.during("change_password", username))?;
        let Some(record) = self.session_mut()?.users.get_mut(username) else {
            return Err(WalletError::NoSuchUser(username.to_string()));
        };
        let previous = std::mem::replace(&mut record.password_verifier, verifier);
        if let Err(e) = self.persist() {
            if let Some(record) = self.session_mut()?.users.get_mut(username) {
                record.password_verifier = previous;
            }
            return Err(e.during("change_password", username));
        }
        info!(username, "password changed");
        Ok(())
    }

    /// Throttle check, lookup and constant-time verification shared by every
    /// password-gated operation. Only wrong passwords count as failures.
    fn authenticate(&mut self, username: &str, password: &str) -> WalletResult<()> {
        self.require(RegistryState::Open)?;
        self.throttle.check(username, Instant::now())?;
        let stored = self
            .session()?
            .users
            .get(username)
            .map(|r| r.password_verifier.clone())
            .ok_or_else(|| WalletError::NoSuchUser(username.to_string()))?;
        let verifier = check_stored_verifier(&stored)?;
        if self
            .hasher
            .verify_parsed(password, &verifier)
            .map_err(|e| e.during("verify", username))?
        {
            self.throttle.clear(username);
            Ok(())
        } else {
            let failures = self.throttle.record_failure(username, Instant::now());
            warn!(username, failures, "password rejected");
            Err(WalletError::BadCredentials)
        }
    }

    fn persist(&self) -> WalletResult<()> {
        let (Some(db), Some(session)) = (&self.database, &self.session) else {
            return Err(self.invalid_state(RegistryState::Open));
        };
        let plaintext = encode_records(session.users.values())?;
        let envelope = DatabaseEnvelope::seal(
            &self.crypto,
            session.key.as_bytes(),
            session.header.clone(),
            &plaintext,
        )?;
        storage::write_atomic(&db.path, &envelope.to_bytes()?)?;
        debug!(path = %db.path.display(), users = session.users.len(), "database persisted");
        Ok(())
    }

    fn validate_password(&self, password: &str) -> WalletResult<()> {
        let min = self.config.password.min_length;
        if password.chars().count() < min {
            return Err(WalletError::WeakPassword { min });
        }
        Ok(())
    }

    fn require(&self, required: RegistryState) -> WalletResult<()> {
        if self.state() == required {
            Ok(())
        } else {
            Err(self.invalid_state(required))
        }
    }

    fn invalid_state(&self, required: RegistryState) -> WalletError {
        WalletError::InvalidState {
            required,
            actual: self.state(),
        }
    }

    fn session(&self) -> WalletResult<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| self.invalid_state(RegistryState::Open))
    }

    fn session_mut(&mut self) -> WalletResult<&mut Session> {
        let actual = self.state();
        self.session.as_mut().ok_or(WalletError::InvalidState {
            required: RegistryState::Open,
            actual,
        })
    }

    fn user_count_unchecked(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.users.len())
    }
}

/// Username rules: 3 to `max_len` UTF-8 code units, no control characters,
/// no surrounding whitespace.
pub fn validate_username(username: &str, max_len: usize) -> WalletResult<()> {
    let len = username.len();
    if len < USERNAME_MIN_LEN {
        return Err(WalletError::UsernameInvalid("shorter than 3 bytes"));
    }
    if len > max_len {
        return Err(WalletError::UsernameInvalid("longer than the configured maximum"));
    }
    if username.chars().any(char::is_control) {
        return Err(WalletError::UsernameInvalid("contains control characters"));
    }
    if username.trim() != username {
        return Err(WalletError::UsernameInvalid("leading or trailing whitespace"));
    }
    Ok(())
}

/// A stored verifier must parse and carry at least the record iteration floor.
fn check_stored_verifier(stored: &str) -> WalletResult<PasswordVerifier> {
    let verifier: PasswordVerifier = stored.parse()?;
    if verifier.iterations < RECORD_MIN_ITERATIONS {
        return Err(WalletError::BadVerifier(format!(
            "iterations {} below {RECORD_MIN_ITERATIONS}",
            verifier.iterations
        )));
    }
    Ok(verifier)
}

fn read_envelope(path: &Path) -> WalletResult<Option<DatabaseEnvelope>> {
    match std::fs::read(path) {
        Ok(bytes) => DatabaseEnvelope::from_bytes(&bytes).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(WalletError::storage(format!("read {}", path.display()), e)),
    }
}

fn unix_now() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}

/// Thread-safe handle: every call runs under one exclusive lock.
#[derive(Clone)]
pub struct SharedRegistry {
    inner: Arc<Mutex<UserRegistry>>,
}

impl SharedRegistry {
    pub fn new(registry: UserRegistry) -> Self {
        Self {
            inner: Arc::new(Mutex::new(registry)),
        }
    }

    /// Runs `f` with the registry locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut UserRegistry) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn state(&self) -> RegistryState {
        self.inner.lock().state()
    }

    pub fn open(&self, path: &Path) -> WalletResult<()> {
        self.inner.lock().open(path)
    }

    pub fn unlock(&self) -> WalletResult<()> {
        self.inner.lock().unlock()
    }

    pub fn lock(&self) -> WalletResult<()> {
        self.inner.lock().lock()
    }

    pub fn close(&self) {
        self.inner.lock().close()
    }

    pub fn user_count(&self) -> WalletResult<usize> {
        self.inner.lock().user_count()
    }

    pub fn list_users(&self) -> WalletResult<Vec<UserSummary>> {
        self.inner.lock().list_users()
    }

    pub fn register(&self, username: &str, password: &str) -> WalletResult<UserSummary> {
        self.inner.lock().register(username, password)
    }

    pub fn login(&self, username: &str, password: &str) -> WalletResult<UserSummary> {
        self.inner.lock().login(username, password)
    }

    pub fn delete_user(&self, username: &str, password: &str) -> WalletResult<()> {
        self.inner.lock().delete_user(username, password)
    }

    pub fn reveal_seed(&self, username: &str, password: &str) -> WalletResult<SecretBytes> {
        self.inner.lock().reveal_seed(username, password)
    }

    pub fn change_password(&self, username: &str, old: &str, new: &str) -> WalletResult<()> {
        self.inner.lock().change_password(username, old, new)
    }
}
