//! Database file envelope.
//!
//! ```text
//! offset  size  field
//! 0       8     magic = "CGWALLET"
//! 8       2     version = 0x0001
//! 10      32    db_salt
//! 42      4     wrapped_len (u32)
//! 46      W     wrapped_master_key
//! 46+W    12    iv
//! 58+W    4     ciphertext_len (u32)
//! 62+W    C     ciphertext
//! 62+W+C  16    gcm_tag
//! ```
//! AAD = magic ‖ version ‖ db_salt ‖ wrapped_master_key, recomputed from the
//! parsed header on every open.

use crate::error::{WalletError, WalletResult};
use crate::platform::{PlatformCrypto, SecretBytes, IV_LEN, TAG_LEN};

pub const DB_MAGIC: &[u8; 8] = b"CGWALLET";
pub const DB_VERSION: u16 = 1;
pub const DB_SALT_LEN: usize = 32;
pub const MAX_WRAPPED_LEN: usize = 64 * 1024;

const WRAPPED_OFFSET: usize = 46;

/// Everything before the IV; authenticated but not encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHeader {
    pub db_salt: [u8; DB_SALT_LEN],
    pub wrapped_master_key: Vec<u8>,
}

impl KeyHeader {
    pub fn aad(&self) -> Vec<u8> {
        let mut aad = Vec::with_capacity(10 + DB_SALT_LEN + self.wrapped_master_key.len());
        aad.extend_from_slice(DB_MAGIC);
        aad.extend_from_slice(&DB_VERSION.to_le_bytes());
        aad.extend_from_slice(&self.db_salt);
        aad.extend_from_slice(&self.wrapped_master_key);
        aad
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseEnvelope {
    pub header: KeyHeader,
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

impl DatabaseEnvelope {
    pub fn seal(
        crypto: &PlatformCrypto,
        master_key: &[u8],
        header: KeyHeader,
        plaintext: &[u8],
    ) -> WalletResult<Self> {
        let sealed = crypto.aes_gcm_seal(master_key, plaintext, &header.aad())?;
        Ok(Self {
            header,
            iv: sealed.iv,
            ciphertext: sealed.ciphertext,
            tag: sealed.tag,
        })
    }

    /// `AuthFailed` when the key is wrong or any authenticated byte changed.
    pub fn open(&self, crypto: &PlatformCrypto, master_key: &[u8]) -> WalletResult<SecretBytes> {
        crypto.aes_gcm_open(
            master_key,
            &self.iv,
            &self.ciphertext,
            &self.tag,
            &self.header.aad(),
        )
    }

    pub fn to_bytes(&self) -> WalletResult<Vec<u8>> {
        let wrapped_len = u32::try_from(self.header.wrapped_master_key.len())
            .ok()
            .filter(|len| (*len as usize) <= MAX_WRAPPED_LEN)
            .ok_or_else(|| WalletError::Crypto("wrapped master key too large".into()))?;
        let ciphertext_len = u32::try_from(self.ciphertext.len())
            .map_err(|_| WalletError::Crypto("database ciphertext exceeds 4 GiB".into()))?;
        let mut buf = Vec::with_capacity(
            WRAPPED_OFFSET + wrapped_len as usize + IV_LEN + 4 + self.ciphertext.len() + TAG_LEN,
        );
        buf.extend_from_slice(DB_MAGIC);
        buf.extend_from_slice(&DB_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.header.db_salt);
        buf.extend_from_slice(&wrapped_len.to_le_bytes());
        buf.extend_from_slice(&self.header.wrapped_master_key);
        buf.extend_from_slice(&self.iv);
        buf.extend_from_slice(&ciphertext_len.to_le_bytes());
        buf.extend_from_slice(&self.ciphertext);
        buf.extend_from_slice(&self.tag);
        Ok(buf)
    }

    pub fn from_bytes(buf: &[u8]) -> WalletResult<Self> {
        let mut reader = Reader { buf, pos: 0 };
        if reader.take(DB_MAGIC.len(), "magic")? != DB_MAGIC {
            return Err(corrupt("invalid magic"));
        }
        let version = u16::from_le_bytes(reader.array("version")?);
        if version != DB_VERSION {
            return Err(WalletError::DatabaseCorrupt(format!(
                "unsupported version {version:#06x}"
            )));
        }
        let db_salt: [u8; DB_SALT_LEN] = reader.array("db_salt")?;
        let wrapped_len = u32::from_le_bytes(reader.array("wrapped_len")?) as usize;
        if wrapped_len == 0 || wrapped_len > MAX_WRAPPED_LEN {
            return Err(corrupt("wrapped key length out of range"));
        }
        let wrapped_master_key = reader.take(wrapped_len, "wrapped_master_key")?.to_vec();
        let iv: [u8; IV_LEN] = reader.array("iv")?;
        let ciphertext_len = u32::from_le_bytes(reader.array("ciphertext_len")?) as usize;
        let ciphertext = reader.take(ciphertext_len, "ciphertext")?.to_vec();
        let tag: [u8; TAG_LEN] = reader.array("gcm_tag")?;
        if reader.pos != buf.len() {
            return Err(corrupt("trailing data after tag"));
        }
        Ok(Self {
            header: KeyHeader {
                db_salt,
                wrapped_master_key,
            },
            iv,
            ciphertext,
            tag,
        })
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize, what: &str) -> WalletResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| WalletError::DatabaseCorrupt(format!("truncated at {what}")))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self, what: &str) -> WalletResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }
}

fn corrupt(detail: &str) -> WalletError {
    WalletError::DatabaseCorrupt(detail.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MemorySealedStore;
    use crate::ErrorKind;
    use std::sync::Arc;

    fn crypto() -> PlatformCrypto {
        PlatformCrypto::with_store(Arc::new(MemorySealedStore::new("test")))
    }

    fn sample(crypto: &PlatformCrypto) -> DatabaseEnvelope {
        let header = KeyHeader {
            db_salt: [0x11; DB_SALT_LEN],
            wrapped_master_key: vec![0x22; 60],
        };
        DatabaseEnvelope::seal(crypto, &[0x33; 32], header, b"plaintext block").unwrap()
    }

    #[test]
    fn byte_layout_offsets() {
        let crypto = crypto();
        let env = sample(&crypto);
        let bytes = env.to_bytes().unwrap();
        assert_eq!(&bytes[0..8], b"CGWALLET");
        assert_eq!(&bytes[8..10], &[0x01, 0x00]);
        assert_eq!(&bytes[10..42], &[0x11; 32]);
        assert_eq!(&bytes[42..46], &60u32.to_le_bytes());
        assert_eq!(&bytes[46..106], &[0x22; 60][..]);
        assert_eq!(&bytes[106..118], &env.iv);
        assert_eq!(&bytes[118..122], &15u32.to_le_bytes());
        assert_eq!(bytes.len(), 62 + 60 + 15 + 16);
        assert_eq!(&bytes[bytes.len() - 16..], &env.tag);
    }

    #[test]
    fn parse_and_open() {
        let crypto = crypto();
        let env = sample(&crypto);
        let parsed = DatabaseEnvelope::from_bytes(&env.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, env);
        assert_eq!(parsed.open(&crypto, &[0x33; 32]).unwrap().as_slice(), b"plaintext block");
    }

    #[test]
    fn header_is_authenticated() {
        let crypto = crypto();
        let env = sample(&crypto);
        let bytes = env.to_bytes().unwrap();
        // salt and wrapped key bytes parse fine but break the AAD
        for offset in [10, 41, 46, 105] {
            let mut tampered = bytes.clone();
            tampered[offset] ^= 0x80;
            let parsed = DatabaseEnvelope::from_bytes(&tampered).unwrap();
            let err = parsed.open(&crypto, &[0x33; 32]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AuthFailed, "offset {offset}");
        }
    }

    #[test]
    fn structural_damage_is_corrupt() {
        let crypto = crypto();
        let bytes = sample(&crypto).to_bytes().unwrap();

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        let mut bad_version = bytes.clone();
        bad_version[8] = 2;
        let mut bad_wrapped_len = bytes.clone();
        bad_wrapped_len[42..46].copy_from_slice(&u32::MAX.to_le_bytes());
        let mut bad_ct_len = bytes.clone();
        bad_ct_len[118..122].copy_from_slice(&1000u32.to_le_bytes());
        let mut trailing = bytes.clone();
        trailing.push(0);

        for (name, case) in [
            ("magic", bad_magic),
            ("version", bad_version),
            ("wrapped_len", bad_wrapped_len),
            ("ciphertext_len", bad_ct_len),
            ("trailing", trailing),
            ("truncated", bytes[..bytes.len() - 1].to_vec()),
            ("empty", Vec::new()),
        ] {
            let err = DatabaseEnvelope::from_bytes(&case).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::DatabaseCorrupt, "{name}");
        }
    }
}
