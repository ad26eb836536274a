//! Process-local sealed store.
//!
//! Uses the same blob format as the keychain backend with a wrapping key held
//! in memory. Two instances never share keys, which is how tests model a
//! second user account or host. Not persistent; intended for tests and
//! ephemeral embedders.

use parking_lot::Mutex;
use std::collections::HashMap;
use zeroize::Zeroizing;

use super::primitives::{self, SecretBytes, KEY_LEN};
use super::sealed::{unwrap_with_key, wrap_with_key, SealedStore};
use crate::error::{WalletError, WalletResult};

struct Entry {
    key: SecretBytes,
    blob: Vec<u8>,
}

pub struct MemorySealedStore {
    account: String,
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemorySealedStore {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Drops every entry, as if the OS store had been cleared.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn aad(&self, id: &str) -> String {
        format!("{}\0{}", self.account, id)
    }
}

impl SealedStore for MemorySealedStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn protect(&self, id: &str, plaintext: &[u8]) -> WalletResult<Vec<u8>> {
        let key = primitives::rand_bytes(KEY_LEN)?;
        let blob = wrap_with_key(&key, &self.aad(id), plaintext)?;
        self.entries.lock().insert(
            id.to_string(),
            Entry {
                key,
                blob: blob.clone(),
            },
        );
        Ok(blob)
    }

    fn unprotect(&self, id: &str, ciphertext: &[u8]) -> WalletResult<SecretBytes> {
        let key = {
            let guard = self.entries.lock();
            let entry = guard
                .get(id)
                .ok_or_else(|| WalletError::NotAuthorized(format!("no sealed entry for {id}")))?;
            Zeroizing::new(entry.key.to_vec())
        };
        unwrap_with_key(&key, &self.aad(id), ciphertext)
    }

    fn fetch(&self, id: &str) -> WalletResult<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(id).map(|e| e.blob.clone()))
    }

    fn exists(&self, id: &str) -> WalletResult<bool> {
        Ok(self.entries.lock().contains_key(id))
    }

    fn delete(&self, id: &str) -> WalletResult<()> {
        self.entries.lock().remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn protect_unprotect_roundtrip() {
        let store = MemorySealedStore::new("alice");
        let blob = store.protect("seed::alice", b"0123456789").unwrap();
        assert!(store.exists("seed::alice").unwrap());
        assert_eq!(store.fetch("seed::alice").unwrap().unwrap(), blob);
        assert_eq!(
            store.unprotect("seed::alice", &blob).unwrap().as_slice(),
            b"0123456789"
        );
    }

    #[test]
    fn other_instance_is_not_authorized() {
        let ours = MemorySealedStore::new("alice");
        let theirs = MemorySealedStore::new("alice");
        let blob = ours.protect("master::abc", &[1u8; 32]).unwrap();
        let err = theirs.unprotect("master::abc", &blob).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotAuthorized);
    }

    #[test]
    fn tampered_blob_fails_auth() {
        let store = MemorySealedStore::new("alice");
        let mut blob = store.protect("master::abc", &[1u8; 32]).unwrap();
        blob[20] ^= 0x01;
        let err = store.unprotect("master::abc", &blob).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthFailed);
    }

    #[test]
    fn delete_is_idempotent() {
        let store = MemorySealedStore::new("alice");
        store.protect("seed::alice", b"x").unwrap();
        store.delete("seed::alice").unwrap();
        store.delete("seed::alice").unwrap();
        assert!(!store.exists("seed::alice").unwrap());
        assert!(store.is_empty());
    }
}
