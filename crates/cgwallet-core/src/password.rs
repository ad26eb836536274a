//! PBKDF2-SHA-256 password verifiers in the self-describing form
//! `pbkdf2-sha256$<iterations>$<salt_b64>$<dk_b64>`.

use base64::{engine::general_purpose, Engine as _};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;

use crate::error::{WalletError, WalletResult};
use crate::platform::PlatformCrypto;

pub const VERIFIER_PREFIX: &str = "pbkdf2-sha256";
pub const DEFAULT_ITERATIONS: u32 = 100_000;
pub const MIN_ITERATIONS: u32 = 10_000;
pub const MAX_ITERATIONS: u32 = 10_000_000;
pub const SALT_LEN: usize = 16;
pub const DK_LEN: usize = 32;

/// Parsed verifier. Not secret, but never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordVerifier {
    pub iterations: u32,
    pub salt: [u8; SALT_LEN],
    pub dk: [u8; DK_LEN],
}

impl fmt::Debug for PasswordVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordVerifier")
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for PasswordVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{VERIFIER_PREFIX}${}${}${}",
            self.iterations,
            general_purpose::STANDARD.encode(self.salt),
            general_purpose::STANDARD.encode(self.dk)
        )
    }
}

impl FromStr for PasswordVerifier {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split('$').collect();
        if fields.len() != 4 {
            return Err(WalletError::BadVerifier(format!(
                "expected 4 fields, found {}",
                fields.len()
            )));
        }
        if fields[0] != VERIFIER_PREFIX {
            return Err(WalletError::BadVerifier("unknown scheme".into()));
        }
        let iterations: u32 = fields[1]
            .parse()
            .map_err(|_| WalletError::BadVerifier("iterations not a number".into()))?;
        if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&iterations) {
            return Err(WalletError::BadVerifier(format!(
                "iterations {iterations} outside [{MIN_ITERATIONS}, {MAX_ITERATIONS}]"
            )));
        }
        let salt = decode_fixed::<SALT_LEN>(fields[2], "salt")?;
        let dk = decode_fixed::<DK_LEN>(fields[3], "derived key")?;
        Ok(Self {
            iterations,
            salt,
            dk,
        })
    }
}

fn decode_fixed<const N: usize>(field: &str, what: &str) -> WalletResult<[u8; N]> {
    let bytes = general_purpose::STANDARD
        .decode(field)
        .map_err(|_| WalletError::BadVerifier(format!("{what} is not valid base64")))?;
    bytes
        .try_into()
        .map_err(|_| WalletError::BadVerifier(format!("{what} must be {N} bytes")))
}

/// Byte equality whose running time depends only on the lengths.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[derive(Debug, Clone)]
pub struct PasswordHasher {
    crypto: PlatformCrypto,
}

impl PasswordHasher {
    pub fn new(crypto: PlatformCrypto) -> Self {
        Self { crypto }
    }

    pub fn create_verifier(&self, password: &str, iterations: u32) -> WalletResult<String> {
        if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&iterations) {
            return Err(WalletError::Crypto(format!(
                "iterations {iterations} outside [{MIN_ITERATIONS}, {MAX_ITERATIONS}]"
            )));
        }
        let salt: [u8; SALT_LEN] = self.crypto.random_array()?;
        let dk = self
            .crypto
            .pbkdf2_sha256(password.as_bytes(), &salt, iterations, DK_LEN)?;
        let mut verifier = PasswordVerifier {
            iterations,
            salt,
            dk: [0u8; DK_LEN],
        };
        verifier.dk.copy_from_slice(&dk);
        Ok(verifier.to_string())
    }

    /// `Ok(false)` on mismatch; `BadVerifier` when the stored string is malformed.
    pub fn verify(&self, password: &str, verifier: &str) -> WalletResult<bool> {
        let parsed: PasswordVerifier = verifier.parse()?;
        self.verify_parsed(password, &parsed)
    }

    pub fn verify_parsed(&self, password: &str, verifier: &PasswordVerifier) -> WalletResult<bool> {
        let dk = self.crypto.pbkdf2_sha256(
            password.as_bytes(),
            &verifier.salt,
            verifier.iterations,
            DK_LEN,
        )?;
        Ok(constant_time_eq(&dk, &verifier.dk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MemorySealedStore;
    use crate::ErrorKind;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn hasher() -> PasswordHasher {
        PasswordHasher::new(PlatformCrypto::with_store(Arc::new(MemorySealedStore::new("test"))))
    }

    #[test]
    fn verifier_format() {
        let v = hasher().create_verifier("CorrectHorseBattery7!", MIN_ITERATIONS).unwrap();
        let fields: Vec<&str> = v.split('$').collect();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[0], "pbkdf2-sha256");
        assert_eq!(fields[1], "10000");
        assert_eq!(general_purpose::STANDARD.decode(fields[2]).unwrap().len(), SALT_LEN);
        assert_eq!(general_purpose::STANDARD.decode(fields[3]).unwrap().len(), DK_LEN);
    }

    #[test]
    fn known_vector_verifies() {
        // dk = PBKDF2-HMAC-SHA256("password", 16 x 0x00, 10000, 32)
        let salt = [0u8; SALT_LEN];
        let dk = crate::platform::primitives::pbkdf2_sha256(b"password", &salt, 10_000, DK_LEN)
            .unwrap();
        let verifier = format!(
            "pbkdf2-sha256$10000${}${}",
            general_purpose::STANDARD.encode(salt),
            general_purpose::STANDARD.encode(dk.as_slice())
        );
        assert!(hasher().verify("password", &verifier).unwrap());
        assert!(!hasher().verify("Password", &verifier).unwrap());
    }

    #[test]
    fn salts_are_fresh() {
        let h = hasher();
        let a = h.create_verifier("same password", MIN_ITERATIONS).unwrap();
        let b = h.create_verifier("same password", MIN_ITERATIONS).unwrap();
        assert_ne!(a.split('$').nth(2), b.split('$').nth(2));
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_malformed_verifiers() {
        let h = hasher();
        let good = h.create_verifier("pw-long-enough", MIN_ITERATIONS).unwrap();
        let fields: Vec<&str> = good.split('$').collect();
        let cases = [
            format!("bcrypt${}${}${}", fields[1], fields[2], fields[3]),
            format!("pbkdf2-sha256${}${}", fields[1], fields[2]),
            format!("{good}$extra"),
            format!("pbkdf2-sha256$9999${}${}", fields[2], fields[3]),
            format!("pbkdf2-sha256$10000001${}${}", fields[2], fields[3]),
            format!("pbkdf2-sha256$abc${}${}", fields[2], fields[3]),
            format!("pbkdf2-sha256${}$!!notb64!!${}", fields[1], fields[3]),
            format!("pbkdf2-sha256${}${}$AAAA", fields[1], fields[2]),
        ];
        for case in cases {
            let err = h.verify("pw-long-enough", &case).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BadVerifier, "{case}");
        }
    }

    #[test]
    fn create_rejects_out_of_range_iterations() {
        assert!(hasher().create_verifier("pw", MIN_ITERATIONS - 1).is_err());
        assert!(hasher().create_verifier("pw", MAX_ITERATIONS + 1).is_err());
    }

    #[test]
    fn debug_does_not_expose_key() {
        let v: PasswordVerifier = hasher()
            .create_verifier("pw-long-enough", MIN_ITERATIONS)
            .unwrap()
            .parse()
            .unwrap();
        let rendered = format!("{v:?}");
        assert!(!rendered.contains(&general_purpose::STANDARD.encode(v.dk)));
    }

    #[test]
    fn constant_time_eq_lengths() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn constant_time_eq_timing_is_position_independent() {
        const TRIALS: usize = 10_000;
        let reference = [0xA5u8; DK_LEN];
        let median_for = |pos: usize| {
            let mut other = reference;
            other[pos] ^= 0xFF;
            let mut samples: Vec<u128> = (0..TRIALS)
                .map(|_| {
                    let start = Instant::now();
                    let eq = constant_time_eq(
                        std::hint::black_box(&reference),
                        std::hint::black_box(&other),
                    );
                    std::hint::black_box(eq);
                    start.elapsed().as_nanos()
                })
                .collect();
            samples.sort_unstable();
            samples[TRIALS / 2].max(1)
        };
        let first = median_for(0);
        let last = median_for(DK_LEN - 1);
        let (lo, hi) = if first < last { (first, last) } else { (last, first) };
        assert!(hi <= lo * 10, "median timings diverge: {first} ns vs {last} ns");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn roundtrip_law(password in "\\PC{1,40}", other in "\\PC{1,40}") {
            let h = hasher();
            let verifier = h.create_verifier(&password, MIN_ITERATIONS).unwrap();
            prop_assert!(h.verify(&password, &verifier).unwrap());
            if other != password {
                prop_assert!(!h.verify(&other, &verifier).unwrap());
            }
        }
    }
}
