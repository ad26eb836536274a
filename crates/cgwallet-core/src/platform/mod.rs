//! Platform crypto adapter: the only place host differences are visible.

#[cfg(windows)]
pub mod dpapi;
#[cfg(not(windows))]
pub mod keychain;
pub mod memory;
pub mod primitives;
mod sealed;

use std::fmt;
use std::sync::Arc;

pub use memory::MemorySealedStore;
pub use primitives::{AeadSealed, SecretBytes, IV_LEN, KEY_LEN, TAG_LEN};
pub use sealed::SealedStore;

use crate::config::WalletConfig;
use crate::error::WalletResult;

/// Capability set handed to every other component.
#[derive(Clone)]
pub struct PlatformCrypto {
    sealed: Arc<dyn SealedStore>,
}

impl fmt::Debug for PlatformCrypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformCrypto")
            .field("backend", &self.sealed.backend())
            .finish()
    }
}

impl PlatformCrypto {
    /// Host backend: DPAPI on Windows, the OS credential store elsewhere.
    pub fn native(config: &WalletConfig) -> WalletResult<Self> {
        let blob_dir = config.sealed_path()?;
        #[cfg(windows)]
        let store: Arc<dyn SealedStore> = Arc::new(dpapi::DpapiStore::new(blob_dir)?);
        #[cfg(not(windows))]
        let store: Arc<dyn SealedStore> =
            Arc::new(keychain::KeychainStore::new(keychain::SERVICE_NAME, blob_dir)?);
        Ok(Self::with_store(store))
    }

    pub fn with_store(sealed: Arc<dyn SealedStore>) -> Self {
        Self { sealed }
    }

    pub fn backend(&self) -> &'static str {
        self.sealed.backend()
    }

    pub fn rand_bytes(&self, n: usize) -> WalletResult<SecretBytes> {
        primitives::rand_bytes(n)
    }

    pub fn random_array<const N: usize>(&self) -> WalletResult<[u8; N]> {
        primitives::random_array()
    }

    pub fn sha256(&self, data: &[u8]) -> [u8; 32] {
        primitives::sha256(data)
    }

    pub fn hmac_sha1(&self, key: &[u8], data: &[u8]) -> WalletResult<[u8; 20]> {
        primitives::hmac_sha1(key, data)
    }

    pub fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> WalletResult<[u8; 32]> {
        primitives::hmac_sha256(key, data)
    }

    pub fn hmac_sha512(&self, key: &[u8], data: &[u8]) -> WalletResult<[u8; 64]> {
        primitives::hmac_sha512(key, data)
    }

    pub fn pbkdf2_sha256(
        &self,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
        dk_len: usize,
    ) -> WalletResult<SecretBytes> {
        primitives::pbkdf2_sha256(password, salt, iterations, dk_len)
    }

    pub fn aes_gcm_seal(
        &self,
        key: &[u8],
        plaintext: &[u8],
        aad: &[u8],
    ) -> WalletResult<AeadSealed> {
        primitives::aes_gcm_seal(key, plaintext, aad)
    }

    pub fn aes_gcm_open(
        &self,
        key: &[u8],
        iv: &[u8; IV_LEN],
        ciphertext: &[u8],
        tag: &[u8; TAG_LEN],
        aad: &[u8],
    ) -> WalletResult<SecretBytes> {
        primitives::aes_gcm_open(key, iv, ciphertext, tag, aad)
    }

    pub fn secure_protect(&self, id: &str, plaintext: &[u8]) -> WalletResult<Vec<u8>> {
        self.sealed.protect(id, plaintext)
    }

    pub fn secure_unprotect(&self, id: &str, ciphertext: &[u8]) -> WalletResult<SecretBytes> {
        self.sealed.unprotect(id, ciphertext)
    }

    pub fn secure_fetch(&self, id: &str) -> WalletResult<Option<Vec<u8>>> {
        self.sealed.fetch(id)
    }

    pub fn secure_exists(&self, id: &str) -> WalletResult<bool> {
        self.sealed.exists(id)
    }

    pub fn secure_delete(&self, id: &str) -> WalletResult<()> {
        self.sealed.delete(id)
    }
}
