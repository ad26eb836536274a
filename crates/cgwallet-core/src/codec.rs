//! Canonical plaintext block for the user list.
//!
//! ```text
//! u64 record_count
//! repeat record_count times:
//!   u64 len; bytes    username
//!   u64 len; bytes    password_verifier
//!   u64 len; bytes    wallet_public_identifier
//!   u64 len; bytes    secret_handle
//!   u64 created_at
//!   u64 last_login_at
//! ```
//! All integers little-endian.

use bytes::{Buf, BufMut};
use serde::Serialize;
use zeroize::Zeroizing;

use crate::error::{WalletError, WalletResult};
use crate::platform::SecretBytes;

pub const MAX_FIELD_LEN: u64 = 64 * 1024;
pub const MAX_RECORDS: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub password_verifier: String,
    pub wallet_public_identifier: String,
    pub secret_handle: String,
    pub created_at: u64,
    pub last_login_at: u64,
}

/// What a caller may see about a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub username: String,
    pub wallet_public_identifier: String,
    pub created_at: u64,
    pub last_login_at: u64,
}

impl From<&UserRecord> for UserSummary {
    fn from(r: &UserRecord) -> Self {
        Self {
            username: r.username.clone(),
            wallet_public_identifier: r.wallet_public_identifier.clone(),
            created_at: r.created_at,
            last_login_at: r.last_login_at,
        }
    }
}

pub fn encode_records<'a, I>(records: I) -> WalletResult<SecretBytes>
where
    I: IntoIterator<Item = &'a UserRecord>,
{
    let records: Vec<&UserRecord> = records.into_iter().collect();
    let count = records.len() as u64;
    if count > MAX_RECORDS {
        return Err(WalletError::Crypto(format!(
            "refusing to encode {count} records (limit {MAX_RECORDS})"
        )));
    }
    // Sized up front so the buffer never reallocates and strands unzeroed copies.
    let capacity = 8 + records
        .iter()
        .map(|r| {
            48 + r.username.len()
                + r.password_verifier.len()
                + r.wallet_public_identifier.len()
                + r.secret_handle.len()
        })
        .sum::<usize>();
    let mut out = Zeroizing::new(Vec::with_capacity(capacity));
    out.put_u64_le(count);
    for record in records {
        for field in [
            &record.username,
            &record.password_verifier,
            &record.wallet_public_identifier,
            &record.secret_handle,
        ] {
            put_field(&mut out, field)?;
        }
        out.put_u64_le(record.created_at);
        out.put_u64_le(record.last_login_at);
    }
    Ok(out)
}

fn put_field(out: &mut Vec<u8>, field: &str) -> WalletResult<()> {
    let len = field.len() as u64;
    if len > MAX_FIELD_LEN {
        return Err(WalletError::Crypto(format!(
            "field of {len} bytes exceeds {MAX_FIELD_LEN}"
        )));
    }
    out.put_u64_le(len);
    out.put_slice(field.as_bytes());
    Ok(())
}

/// Rejects the whole block on any violation; never yields a partial list.
pub fn decode_records(mut buf: &[u8]) -> WalletResult<Vec<UserRecord>> {
    let count = take_u64(&mut buf, "record count")?;
    if count > MAX_RECORDS {
        return Err(corrupt(format!("record count {count} exceeds {MAX_RECORDS}")));
    }
    // Each record needs at least six u64 words.
    if count.saturating_mul(48) > buf.len() as u64 {
        return Err(corrupt("record count larger than payload".into()));
    }
    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let username = take_field(&mut buf, "username")?;
        let password_verifier = take_field(&mut buf, "password_verifier")?;
        let wallet_public_identifier = take_field(&mut buf, "wallet_public_identifier")?;
        let secret_handle = take_field(&mut buf, "secret_handle")?;
        let created_at = take_u64(&mut buf, "created_at")?;
        let last_login_at = take_u64(&mut buf, "last_login_at")?;
        records.push(UserRecord {
            username,
            password_verifier,
            wallet_public_identifier,
            secret_handle,
            created_at,
            last_login_at,
        });
    }
    if buf.has_remaining() {
        return Err(corrupt(format!("{} trailing bytes", buf.remaining())));
    }
    Ok(records)
}

fn take_u64(buf: &mut &[u8], what: &str) -> WalletResult<u64> {
    if buf.remaining() < 8 {
        return Err(corrupt(format!("truncated at {what}")));
    }
    Ok(buf.get_u64_le())
}

fn take_field(buf: &mut &[u8], what: &str) -> WalletResult<String> {
    let len = take_u64(buf, what)?;
    if len > MAX_FIELD_LEN {
        return Err(corrupt(format!("{what} length {len} exceeds {MAX_FIELD_LEN}")));
    }
    let len = len as usize;
    if buf.remaining() < len {
        return Err(corrupt(format!("{what} overruns payload")));
    }
    let text = std::str::from_utf8(&buf[..len])
        .map_err(|_| corrupt(format!("{what} is not UTF-8")))?
        .to_owned();
    buf.advance(len);
    Ok(text)
}

fn corrupt(detail: String) -> WalletError {
    WalletError::DatabaseCorrupt(detail)
}
