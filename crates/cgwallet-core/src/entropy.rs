//! Machine-bound, non-secret binding input for master-key derivation.

use zeroize::Zeroizing;

use crate::error::{WalletError, WalletResult};
use crate::platform::SecretBytes;

pub const MIN_ENTROPY_LEN: usize = 16;
const DOMAIN_TAG: &[u8] = b"cgwallet/machine/v1\0";

pub trait EntropySource: Send + Sync {
    /// Deterministic for a given host and account.
    fn gather(&self) -> WalletResult<SecretBytes>;
}

/// Identifiers that make up the machine entropy, in their fixed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub hostname: String,
    pub account: String,
    pub hardware_id: String,
}

impl HostIdentity {
    pub fn to_entropy(&self) -> WalletResult<SecretBytes> {
        if self.hostname.is_empty() && self.account.is_empty() && self.hardware_id.is_empty() {
            return Err(WalletError::EntropyUnavailable(
                "no host identifiers available".into(),
            ));
        }
        let fields = [&self.hostname, &self.account, &self.hardware_id];
        // The tag and separators are constant; only identifier bytes count.
        let identifier_len: usize = fields.iter().map(|f| f.len()).sum();
        if identifier_len < MIN_ENTROPY_LEN {
            return Err(WalletError::EntropyUnavailable(format!(
                "host identifiers total {identifier_len} bytes, need {MIN_ENTROPY_LEN}"
            )));
        }
        let mut out = Zeroizing::new(Vec::with_capacity(DOMAIN_TAG.len() + identifier_len + 3));
        out.extend_from_slice(DOMAIN_TAG);
        for field in fields {
            out.extend_from_slice(field.as_bytes());
            out.push(0);
        }
        Ok(out)
    }
}

/// Reads the identifiers of the running host on every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemEntropy;

impl SystemEntropy {
    pub fn identity(&self) -> WalletResult<HostIdentity> {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default();
        let identity = HostIdentity {
            hostname,
            account: account_name(),
            hardware_id: hardware_id().unwrap_or_default(),
        };
        if identity.hardware_id.is_empty() {
            tracing::warn!(
                "hardware identifier unavailable; machine binding uses hostname and account only"
            );
        }
        Ok(identity)
    }
}

impl EntropySource for SystemEntropy {
    fn gather(&self) -> WalletResult<SecretBytes> {
        self.identity()?.to_entropy()
    }
}

/// Fixed identity, for tests and for simulating a different host.
#[derive(Debug, Clone)]
pub struct StaticEntropy(pub HostIdentity);

impl StaticEntropy {
    pub fn new(hostname: &str, account: &str, hardware_id: &str) -> Self {
        Self(HostIdentity {
            hostname: hostname.into(),
            account: account.into(),
            hardware_id: hardware_id.into(),
        })
    }
}

impl EntropySource for StaticEntropy {
    fn gather(&self) -> WalletResult<SecretBytes> {
        self.0.to_entropy()
    }
}

/// Account of the running process as the OS reports it, independent of the
/// session's environment.
fn account_name() -> String {
    match whoami::fallible::username() {
        Ok(name) => name,
        Err(e) => {
            tracing::warn!(error = %e, "account name unavailable");
            String::new()
        }
    }
}

#[cfg(target_os = "linux")]
fn hardware_id() -> Option<String> {
    ["/etc/machine-id", "/var/lib/dbus/machine-id"]
        .iter()
        .find_map(|p| std::fs::read_to_string(p).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(target_os = "macos")]
fn hardware_id() -> Option<String> {
    let output = std::process::Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output()
        .ok()?;
    parse_platform_uuid(&String::from_utf8_lossy(&output.stdout))
}

#[cfg(any(target_os = "macos", test))]
fn parse_platform_uuid(ioreg: &str) -> Option<String> {
    ioreg
        .lines()
        .find(|line| line.contains("\"IOPlatformUUID\""))
        .and_then(|line| line.split('=').nth(1))
        .map(|value| value.trim().trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(windows)]
fn hardware_id() -> Option<String> {
    use std::ptr;
    use winapi::um::fileapi::GetVolumeInformationW;

    let drive = std::env::var("SystemDrive").unwrap_or_else(|_| "C:".into());
    let root: Vec<u16> = format!("{drive}\\").encode_utf16().chain(Some(0)).collect();
    let mut serial: u32 = 0;
    let ok = unsafe {
        GetVolumeInformationW(
            root.as_ptr(),
            ptr::null_mut(),
            0,
            &mut serial,
            ptr::null_mut(),
            ptr::null_mut(),
            ptr::null_mut(),
            0,
        )
    };
    (ok != 0).then(|| format!("{serial:08X}"))
}

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
fn hardware_id() -> Option<String> {
    None
}
