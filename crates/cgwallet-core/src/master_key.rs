//! Per-database master key: derived from machine entropy and a random salt,
//! kept wrapped in the OS-sealed store under `master::<db_id>`.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::entropy::EntropySource;
use crate::envelope::{DatabaseEnvelope, KeyHeader, DB_SALT_LEN};
use crate::error::{ErrorKind, WalletError, WalletResult};
use crate::platform::{PlatformCrypto, SecretBytes, KEY_LEN};

pub const MASTER_KEY_ITERATIONS: u32 = 200_000;
pub const MASTER_ID_PREFIX: &str = "master::";

#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    fn from_slice(bytes: &[u8]) -> Option<Self> {
        let mut key = [0u8; KEY_LEN];
        if bytes.len() != KEY_LEN {
            return None;
        }
        key.copy_from_slice(bytes);
        Some(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// First 16 hex characters of SHA-256 over the absolute database path.
pub fn db_id(crypto: &PlatformCrypto, absolute_path: &Path) -> String {
    let digest = crypto.sha256(absolute_path.to_string_lossy().as_bytes());
    hex::encode(&digest[..8])
}

pub fn master_secret_id(db_id: &str) -> String {
    format!("{MASTER_ID_PREFIX}{db_id}")
}

/// A fresh key together with the header that will front the database file.
pub struct ProvisionedKey {
    pub key: MasterKey,
    pub header: KeyHeader,
}

/// Result of opening an existing database file.
pub struct UnlockedDatabase {
    pub key: MasterKey,
    pub plaintext: SecretBytes,
    /// Set when the key came from the entropy fallback and was sealed again;
    /// the file must be rewritten with this header.
    pub resealed_header: Option<KeyHeader>,
}

impl fmt::Debug for UnlockedDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockedDatabase")
            .field("key", &self.key)
            .field("plaintext_len", &self.plaintext.len())
            .field("resealed", &self.resealed_header.is_some())
            .finish()
    }
}

#[derive(Clone)]
pub struct MasterKeyManager {
    crypto: PlatformCrypto,
    entropy: Arc<dyn EntropySource>,
}

impl MasterKeyManager {
    pub fn new(crypto: PlatformCrypto, entropy: Arc<dyn EntropySource>) -> Self {
        Self { crypto, entropy }
    }

    pub fn derive(&self, db_salt: &[u8; DB_SALT_LEN]) -> WalletResult<MasterKey> {
        let machine = self.entropy.gather()?;
        let dk = self
            .crypto
            .pbkdf2_sha256(&machine, db_salt, MASTER_KEY_ITERATIONS, KEY_LEN)?;
        MasterKey::from_slice(&dk)
            .ok_or_else(|| WalletError::Crypto("derived master key has wrong length".into()))
    }

    pub fn provision(&self, db_id: &str) -> WalletResult<ProvisionedKey> {
        let db_salt: [u8; DB_SALT_LEN] = self.crypto.random_array()?;
        let key = self.derive(&db_salt)?;
        let wrapped_master_key = self
            .crypto
            .secure_protect(&master_secret_id(db_id), key.as_bytes())?;
        info!(db_id, backend = self.crypto.backend(), "master key provisioned");
        Ok(ProvisionedKey {
            key,
            header: KeyHeader {
                db_salt,
                wrapped_master_key,
            },
        })
    }

    /// Recovers the master key for `envelope` and decrypts it.
    ///
    /// The sealed copy is tried first. When the store cannot produce it, the
    /// key is re-derived from machine entropy and, if that opens the file,
    /// sealed again.
    pub fn open(&self, db_id: &str, envelope: &DatabaseEnvelope) -> WalletResult<UnlockedDatabase> {
        let secret_id = master_secret_id(db_id);
        let sealed_err = match self
            .crypto
            .secure_unprotect(&secret_id, &envelope.header.wrapped_master_key)
        {
            Ok(unwrapped) => {
                let key = MasterKey::from_slice(&unwrapped).ok_or_else(|| {
                    WalletError::DatabaseCorrupt("sealed master key has wrong length".into())
                })?;
                return match envelope.open(&self.crypto, key.as_bytes()) {
                    Ok(plaintext) => Ok(UnlockedDatabase {
                        key,
                        plaintext,
                        resealed_header: None,
                    }),
                    Err(e) if e.kind() == ErrorKind::AuthFailed => Err(WalletError::DatabaseCorrupt(
                        "database failed authentication under the sealed master key".into(),
                    )),
                    Err(e) => Err(e),
                };
            }
            Err(e) => match e.kind() {
                ErrorKind::NotAuthorized | ErrorKind::SecretNotFound | ErrorKind::AuthFailed => e,
                _ => return Err(e),
            },
        };

        warn!(
            db_id,
            error = %sealed_err,
            "sealed master key unavailable; re-deriving from machine entropy"
        );
        let key = self.derive(&envelope.header.db_salt).map_err(|e| match e.kind() {
            ErrorKind::EntropyUnavailable => WalletError::MasterKeyUnavailable(e.to_string()),
            _ => e,
        })?;
        match envelope.open(&self.crypto, key.as_bytes()) {
            Ok(plaintext) => {
                let wrapped_master_key = self.crypto.secure_protect(&secret_id, key.as_bytes())?;
                info!(db_id, "master key recovered from machine entropy and re-sealed");
                Ok(UnlockedDatabase {
                    key,
                    plaintext,
                    resealed_header: Some(KeyHeader {
                        db_salt: envelope.header.db_salt,
                        wrapped_master_key,
                    }),
                })
            }
            Err(e) if e.kind() == ErrorKind::AuthFailed => {
                if sealed_err.kind() == ErrorKind::AuthFailed {
                    Err(WalletError::DatabaseCorrupt(
                        "wrapped master key failed integrity check".into(),
                    ))
                } else {
                    Err(WalletError::MasterKeyUnavailable(format!(
                        "sealed key not accessible ({sealed_err}) and machine-bound key \
                         does not open the database"
                    )))
                }
            }
            Err(e) => Err(e),
        }
    }
}
