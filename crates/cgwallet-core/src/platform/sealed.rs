use std::fs;
use std::io;
use std::path::PathBuf;

use crate::error::{WalletError, WalletResult};
use crate::platform::primitives::{self, AeadSealed, SecretBytes};
use crate::storage;

/// OS-level secret sealing bound to the current user account (and host).
///
/// `protect` seals the plaintext, records the sealed blob under `id` and
/// returns it. `unprotect` must report [`WalletError::NotAuthorized`] when the
/// store has no access to the sealing key for `id` (missing entry, another
/// user or host) and [`WalletError::AuthFailed`] when the blob itself fails
/// integrity checks.
pub trait SealedStore: Send + Sync {
    fn backend(&self) -> &'static str;

    fn protect(&self, id: &str, plaintext: &[u8]) -> WalletResult<Vec<u8>>;

    fn unprotect(&self, id: &str, ciphertext: &[u8]) -> WalletResult<SecretBytes>;

    /// Sealed blob last recorded for `id`.
    fn fetch(&self, id: &str) -> WalletResult<Option<Vec<u8>>>;

    fn exists(&self, id: &str) -> WalletResult<bool>;

    /// Idempotent.
    fn delete(&self, id: &str) -> WalletResult<()>;
}

/// Seals `plaintext` under a per-id wrapping key; AAD is the id.
pub(crate) fn wrap_with_key(key: &[u8], id: &str, plaintext: &[u8]) -> WalletResult<Vec<u8>> {
    Ok(primitives::aes_gcm_seal(key, plaintext, id.as_bytes())?.to_blob())
}

pub(crate) fn unwrap_with_key(key: &[u8], id: &str, blob: &[u8]) -> WalletResult<SecretBytes> {
    let sealed = AeadSealed::from_blob(blob).ok_or(WalletError::AuthFailed)?;
    primitives::aes_gcm_open(key, &sealed.iv, &sealed.ciphertext, &sealed.tag, id.as_bytes())
}

/// Directory of sealed blobs, one file per secret id.
#[derive(Debug, Clone)]
pub(crate) struct BlobDir {
    root: PathBuf,
}

impl BlobDir {
    pub(crate) fn new(root: PathBuf) -> WalletResult<Self> {
        fs::create_dir_all(&root)
            .map_err(|e| WalletError::storage(format!("create {}", root.display()), e))?;
        Ok(Self { root })
    }

    #[cfg(test)]
    pub(crate) fn root(&self) -> &std::path::Path {
        &self.root
    }

    // Ids contain user-controlled text; file names are derived, never the id itself.
    fn path_for(&self, id: &str) -> PathBuf {
        let digest = primitives::sha256(id.as_bytes());
        self.root.join(format!("{}.sealed", hex::encode(&digest[..16])))
    }

    pub(crate) fn write(&self, id: &str, blob: &[u8]) -> WalletResult<()> {
        storage::write_atomic(&self.path_for(id), blob)
    }

    pub(crate) fn read(&self, id: &str) -> WalletResult<Option<Vec<u8>>> {
        let path = self.path_for(id);
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(WalletError::storage(format!("read {}", path.display()), e)),
        }
    }

    pub(crate) fn exists(&self, id: &str) -> bool {
        self.path_for(id).is_file()
    }

    pub(crate) fn remove(&self, id: &str) -> WalletResult<()> {
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WalletError::storage(format!("remove {}", path.display()), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn key_wrap_binds_id() {
        let key = [3u8; 32];
        let blob = wrap_with_key(&key, "seed::alice", b"seed bytes").unwrap();
        assert_eq!(
            unwrap_with_key(&key, "seed::alice", &blob).unwrap().as_slice(),
            b"seed bytes"
        );
        let err = unwrap_with_key(&key, "seed::bob", &blob).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::AuthFailed);
        let err = unwrap_with_key(&key, "seed::alice", &blob[..5]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::AuthFailed);
    }

    #[test]
    fn blob_dir_lifecycle() {
        let dir = tempdir().unwrap();
        let blobs = BlobDir::new(dir.path().join("sealed")).unwrap();
        assert!(!blobs.exists("seed::../../etc"));
        blobs.write("seed::../../etc", b"blob").unwrap();
        assert!(blobs.exists("seed::../../etc"));
        assert_eq!(blobs.read("seed::../../etc").unwrap().unwrap(), b"blob");
        assert_eq!(fs::read_dir(blobs.root()).unwrap().count(), 1);
        blobs.remove("seed::../../etc").unwrap();
        blobs.remove("seed::../../etc").unwrap();
        assert!(blobs.read("seed::../../etc").unwrap().is_none());
    }
}
