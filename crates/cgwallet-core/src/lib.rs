//! cgwallet-core: authentication and secret protection for a local wallet.
//!
//! # Protection strategy
//! - Passwords are stored only as PBKDF2-SHA-256 verifiers.
//! - The user table is one AES-256-GCM envelope under a per-database master
//!   key derived from machine entropy and a random salt.
//! - The master key and every wallet seed live wrapped in the OS-sealed
//!   store (DPAPI on Windows, the OS credential store elsewhere); the
//!   registry only ever holds handles.
//!
//! # Lifecycle
//! `UserRegistry::open` binds a database path, `unlock` recovers the master
//! key, `lock` zeroes it again.

pub mod codec;
pub mod config;
pub mod entropy;
pub mod envelope;
pub mod error;
pub mod master_key;
pub mod password;
pub mod paths;
pub mod platform;
pub mod registry;
pub mod storage;
pub mod throttle;
pub mod vault;

pub use codec::{UserRecord, UserSummary};
pub use config::WalletConfig;
pub use entropy::{EntropySource, StaticEntropy, SystemEntropy};
pub use error::{ErrorKind, WalletError, WalletResult};
pub use platform::{MemorySealedStore, PlatformCrypto, SealedStore, SecretBytes};
pub use registry::{RegistryState, SharedRegistry, UserRegistry};
pub use vault::WalletSecretVault;
