//! Host-independent primitives backing [`super::PlatformCrypto`].
//!
//! Everything here is a thin wrapper over the RustCrypto crates and the OS
//! CSPRNG. On failure, output buffers are discarded; nothing partial escapes.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroizing;

use crate::error::{WalletError, WalletResult};

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Heap buffer that is wiped when dropped.
pub type SecretBytes = Zeroizing<Vec<u8>>;

/// Output of an AES-256-GCM seal with the tag detached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AeadSealed {
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

impl AeadSealed {
    /// `iv ‖ ciphertext ‖ tag`
    pub fn to_blob(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IV_LEN + self.ciphertext.len() + TAG_LEN);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }

    pub fn from_blob(blob: &[u8]) -> Option<Self> {
        if blob.len() < IV_LEN + TAG_LEN {
            return None;
        }
        let (iv, rest) = blob.split_at(IV_LEN);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);
        Some(Self {
            iv: iv.try_into().ok()?,
            ciphertext: ciphertext.to_vec(),
            tag: tag.try_into().ok()?,
        })
    }
}

pub fn fill_random(buf: &mut [u8]) -> WalletResult<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| WalletError::Crypto(format!("os rng: {e}")))
}

pub fn rand_bytes(n: usize) -> WalletResult<SecretBytes> {
    let mut out = Zeroizing::new(vec![0u8; n]);
    fill_random(&mut out)?;
    Ok(out)
}

pub fn random_array<const N: usize>() -> WalletResult<[u8; N]> {
    let mut out = [0u8; N];
    fill_random(&mut out)?;
    Ok(out)
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

pub fn hmac_sha1(key: &[u8], data: &[u8]) -> WalletResult<[u8; 20]> {
    let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(key)
        .map_err(|e| WalletError::Crypto(format!("hmac-sha1 init: {e}")))?;
    mac.update(data);
    Ok(copy_array(&mac.finalize().into_bytes()))
}

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> WalletResult<[u8; 32]> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|e| WalletError::Crypto(format!("hmac-sha256 init: {e}")))?;
    mac.update(data);
    Ok(copy_array(&mac.finalize().into_bytes()))
}

pub fn hmac_sha512(key: &[u8], data: &[u8]) -> WalletResult<[u8; 64]> {
    let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(key)
        .map_err(|e| WalletError::Crypto(format!("hmac-sha512 init: {e}")))?;
    mac.update(data);
    Ok(copy_array(&mac.finalize().into_bytes()))
}

/// PBKDF2-HMAC-SHA-256. `iterations` is applied as given.
pub fn pbkdf2_sha256(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    dk_len: usize,
) -> WalletResult<SecretBytes> {
    if iterations == 0 || dk_len == 0 {
        return Err(WalletError::Crypto(
            "pbkdf2 requires non-zero iterations and output length".into(),
        ));
    }
    let mut dk = Zeroizing::new(vec![0u8; dk_len]);
    pbkdf2::pbkdf2::<Hmac<Sha256>>(password, salt, iterations, &mut dk)
        .map_err(|e| WalletError::Crypto(format!("pbkdf2: {e}")))?;
    Ok(dk)
}

/// Seals with a fresh random IV on every call.
pub fn aes_gcm_seal(key: &[u8], plaintext: &[u8], aad: &[u8]) -> WalletResult<AeadSealed> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| WalletError::Crypto("aes-gcm key must be 32 bytes".into()))?;
    let iv: [u8; IV_LEN] = random_array()?;
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&iv), aad, &mut buffer)
        .map_err(|_| WalletError::Crypto("aes-gcm seal".into()))?;
    Ok(AeadSealed {
        iv,
        ciphertext: buffer,
        tag: copy_array(&tag),
    })
}

/// Fails with `AuthFailed` on tag mismatch; the scratch buffer is wiped in that case.
pub fn aes_gcm_open(
    key: &[u8],
    iv: &[u8; IV_LEN],
    ciphertext: &[u8],
    tag: &[u8; TAG_LEN],
    aad: &[u8],
) -> WalletResult<SecretBytes> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| WalletError::Crypto("aes-gcm key must be 32 bytes".into()))?;
    let mut buffer = Zeroizing::new(ciphertext.to_vec());
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(iv),
            aad,
            buffer.as_mut_slice(),
            Tag::from_slice(tag),
        )
        .map_err(|_| WalletError::AuthFailed)?;
    Ok(buffer)
}

fn copy_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}
