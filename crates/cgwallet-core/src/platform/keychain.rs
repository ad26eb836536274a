//! Sealed store backed by the OS credential store (macOS Keychain, Secret
//! Service on Linux) through the `keyring` crate.
//!
//! The credential store holds a random wrapping key per secret id; the sealed
//! blob (`iv ‖ ciphertext ‖ tag`, AAD = id) lives in the blob directory.

use base64::{engine::general_purpose, Engine as _};
use keyring::Entry;
use std::path::PathBuf;
use tracing::debug;
use zeroize::Zeroizing;

use super::primitives::{self, SecretBytes, KEY_LEN};
use super::sealed::{unwrap_with_key, wrap_with_key, BlobDir, SealedStore};
use crate::error::{WalletError, WalletResult};

pub const SERVICE_NAME: &str = "CGWallet";

pub struct KeychainStore {
    service: String,
    blobs: BlobDir,
}

impl KeychainStore {
    pub fn new(service: &str, blob_dir: PathBuf) -> WalletResult<Self> {
        Ok(Self {
            service: service.to_string(),
            blobs: BlobDir::new(blob_dir)?,
        })
    }

    fn entry(&self, id: &str) -> WalletResult<Entry> {
        Entry::new(&self.service, id).map_err(|e| WalletError::Crypto(format!("keyring init: {e}")))
    }

    fn wrapping_key(&self, id: &str) -> WalletResult<SecretBytes> {
        let encoded = match self.entry(id)?.get_password() {
            Ok(value) => Zeroizing::new(value),
            Err(keyring::Error::NoEntry) => {
                return Err(WalletError::NotAuthorized(format!("no keychain entry for {id}")))
            }
            Err(e) => return Err(WalletError::NotAuthorized(format!("keychain {id}: {e}"))),
        };
        let key = general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|_| {
                WalletError::NotAuthorized(format!("keychain entry for {id} unreadable"))
            })?;
        if key.len() != KEY_LEN {
            return Err(WalletError::NotAuthorized(format!(
                "keychain entry for {id} has wrong length"
            )));
        }
        Ok(Zeroizing::new(key))
    }
}

impl SealedStore for KeychainStore {
    fn backend(&self) -> &'static str {
        "keychain"
    }

    fn protect(&self, id: &str, plaintext: &[u8]) -> WalletResult<Vec<u8>> {
        let key = primitives::rand_bytes(KEY_LEN)?;
        let encoded = Zeroizing::new(general_purpose::STANDARD.encode(key.as_slice()));
        self.entry(id)?
            .set_password(&encoded)
            .map_err(|e| WalletError::Crypto(format!("store keychain entry: {e}")))?;
        let blob = wrap_with_key(&key, id, plaintext)?;
        self.blobs.write(id, &blob)?;
        debug!(id, backend = "keychain", "sealed secret");
        Ok(blob)
    }

    fn unprotect(&self, id: &str, ciphertext: &[u8]) -> WalletResult<SecretBytes> {
        let key = self.wrapping_key(id)?;
        unwrap_with_key(&key, id, ciphertext)
    }

    fn fetch(&self, id: &str) -> WalletResult<Option<Vec<u8>>> {
        self.blobs.read(id)
    }

    fn exists(&self, id: &str) -> WalletResult<bool> {
        match self.entry(id)?.get_password() {
            Ok(_) => Ok(self.blobs.exists(id)),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(WalletError::Crypto(format!("query keychain entry: {e}"))),
        }
    }

    fn delete(&self, id: &str) -> WalletResult<()> {
        match self.entry(id)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => {}
            Err(e) => return Err(WalletError::Crypto(format!("delete keychain entry: {e}"))),
        }
        self.blobs.remove(id)?;
        debug!(id, backend = "keychain", "deleted sealed secret");
        Ok(())
    }
}
