//! Wallet seeds, held only in the OS-sealed store under `seed::<username>`.

use tracing::debug;

use crate::error::{WalletError, WalletResult};
use crate::platform::{PlatformCrypto, SecretBytes};

pub const SEED_LEN: usize = 32;
pub const SEED_ID_PREFIX: &str = "seed::";
const PUBLIC_ID_LABEL: &[u8] = b"cgwallet/public-id";

pub fn seed_handle(username: &str) -> String {
    format!("{SEED_ID_PREFIX}{username}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedSeed {
    pub handle: String,
    pub public_identifier: String,
}

#[derive(Debug, Clone)]
pub struct WalletSecretVault {
    crypto: PlatformCrypto,
}

impl WalletSecretVault {
    pub fn new(crypto: PlatformCrypto) -> Self {
        Self { crypto }
    }

    /// Draws a fresh seed and seals it. Never overwrites an existing handle.
    pub fn create(&self, username: &str) -> WalletResult<ProvisionedSeed> {
        let handle = seed_handle(username);
        if self.crypto.secure_exists(&handle)? {
            return Err(WalletError::SeedAlreadyExists(handle));
        }
        let seed = self.crypto.rand_bytes(SEED_LEN)?;
        let public_identifier = self.public_identifier(&seed)?;
        self.crypto.secure_protect(&handle, &seed)?;
        debug!(handle = %handle, "wallet seed sealed");
        Ok(ProvisionedSeed {
            handle,
            public_identifier,
        })
    }

    /// Caller owns the returned buffer; it is zeroed when dropped.
    pub fn unseal(&self, handle: &str) -> WalletResult<SecretBytes> {
        let blob = self
            .crypto
            .secure_fetch(handle)?
            .ok_or_else(|| WalletError::SecretNotFound(handle.to_string()))?;
        self.crypto.secure_unprotect(handle, &blob)
    }

    pub fn delete(&self, handle: &str) -> WalletResult<()> {
        self.crypto.secure_delete(handle)
    }

    pub fn exists(&self, handle: &str) -> WalletResult<bool> {
        self.crypto.secure_exists(handle)
    }

    /// `0x` + first 20 bytes of HMAC-SHA-256 keyed by the seed.
    pub fn public_identifier(&self, seed: &[u8]) -> WalletResult<String> {
        let mac = self.crypto.hmac_sha256(seed, PUBLIC_ID_LABEL)?;
        Ok(format!("0x{}", hex::encode(&mac[..20])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MemorySealedStore;
    use crate::ErrorKind;
    use std::sync::Arc;

    fn vault() -> WalletSecretVault {
        let store = Arc::new(MemorySealedStore::new("alice"));
        WalletSecretVault::new(PlatformCrypto::with_store(store))
    }

    #[test]
    fn create_then_unseal() {
        let v = vault();
        let seed = v.create("alice").unwrap();
        assert_eq!(seed.handle, "seed::alice");
        assert!(v.exists("seed::alice").unwrap());
        let plain = v.unseal(&seed.handle).unwrap();
        assert_eq!(plain.len(), SEED_LEN);
        assert_eq!(v.public_identifier(&plain).unwrap(), seed.public_identifier);
    }

    #[test]
    fn public_identifier_shape() {
        let id = vault().public_identifier(&[7u8; SEED_LEN]).unwrap();
        assert!(id.starts_with("0x"));
        assert_eq!(id.len(), 42);
    }

    #[test]
    fn refuses_to_overwrite() {
        let v = vault();
        let first = v.create("alice").unwrap();
        let before = v.unseal(&first.handle).unwrap();
        let err = v.create("alice").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SeedAlreadyExists);
        assert_eq!(v.unseal(&first.handle).unwrap().as_slice(), before.as_slice());
    }

    #[test]
    fn delete_is_idempotent_and_unseal_reports_missing() {
        let v = vault();
        let seed = v.create("alice").unwrap();
        v.delete(&seed.handle).unwrap();
        v.delete(&seed.handle).unwrap();
        assert!(!v.exists(&seed.handle).unwrap());
        assert_eq!(v.unseal(&seed.handle).unwrap_err().kind(), ErrorKind::SecretNotFound);
    }
}
