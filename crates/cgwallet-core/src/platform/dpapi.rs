//! Sealed store using Windows DPAPI (user scope). The secret id is passed as
//! optional entropy so a blob only opens under the id it was sealed for.

use std::path::PathBuf;
use std::ptr;
use tracing::debug;
use winapi::shared::winerror::{ERROR_INVALID_DATA, NTE_BAD_DATA};
use winapi::um::dpapi::{CryptProtectData, CryptUnprotectData, CRYPTPROTECT_UI_FORBIDDEN};
use winapi::um::errhandlingapi::GetLastError;
use winapi::um::wincrypt::DATA_BLOB;
use zeroize::{Zeroize, Zeroizing};

use super::primitives::SecretBytes;
use super::sealed::{BlobDir, SealedStore};
use crate::error::{WalletError, WalletResult};

pub struct DpapiStore {
    blobs: BlobDir,
}

impl DpapiStore {
    pub fn new(blob_dir: PathBuf) -> WalletResult<Self> {
        Ok(Self {
            blobs: BlobDir::new(blob_dir)?,
        })
    }
}

fn input_blob(data: &[u8]) -> WalletResult<DATA_BLOB> {
    let len = u32::try_from(data.len())
        .map_err(|_| WalletError::Crypto("DPAPI input too large".into()))?;
    Ok(DATA_BLOB {
        cbData: len,
        pbData: data.as_ptr() as *mut u8,
    })
}

/// Copies the DPAPI-allocated output and releases it.
unsafe fn take_output(blob: &DATA_BLOB) -> Vec<u8> {
    let out = std::slice::from_raw_parts(blob.pbData, blob.cbData as usize).to_vec();
    winapi::um::winbase::LocalFree(blob.pbData as _);
    out
}

/// Same as `take_output`, but the DPAPI buffer holds plaintext and is wiped
/// before it goes back to the heap.
unsafe fn take_secret_output(blob: &DATA_BLOB) -> SecretBytes {
    let raw = std::slice::from_raw_parts_mut(blob.pbData, blob.cbData as usize);
    let out = copy_and_wipe(raw);
    winapi::um::winbase::LocalFree(blob.pbData as _);
    out
}

fn copy_and_wipe(raw: &mut [u8]) -> SecretBytes {
    let out = Zeroizing::new(raw.to_vec());
    raw.zeroize();
    out
}

fn dpapi_protect(id: &str, data: &[u8]) -> WalletResult<Vec<u8>> {
    let mut input = input_blob(data)?;
    let mut entropy = input_blob(id.as_bytes())?;
    let mut output = DATA_BLOB {
        cbData: 0,
        pbData: ptr::null_mut(),
    };
    let ok = unsafe {
        CryptProtectData(
            &mut input,
            ptr::null(),
            &mut entropy,
            ptr::null_mut(),
            ptr::null_mut(),
            CRYPTPROTECT_UI_FORBIDDEN,
            &mut output,
        )
    };
    if ok == 0 {
        let code = unsafe { GetLastError() };
        return Err(WalletError::Crypto(format!("DPAPI protect failed (0x{code:08x})")));
    }
    Ok(unsafe { take_output(&output) })
}

fn dpapi_unprotect(id: &str, data: &[u8]) -> WalletResult<SecretBytes> {
    let mut input = input_blob(data)?;
    let mut entropy = input_blob(id.as_bytes())?;
    let mut output = DATA_BLOB {
        cbData: 0,
        pbData: ptr::null_mut(),
    };
    let ok = unsafe {
        CryptUnprotectData(
            &mut input,
            ptr::null_mut(),
            &mut entropy,
            ptr::null_mut(),
            ptr::null_mut(),
            CRYPTPROTECT_UI_FORBIDDEN,
            &mut output,
        )
    };
    if ok == 0 {
        let code = unsafe { GetLastError() };
        // Malformed or modified blobs come back as bad-data; anything else means
        // the blob belongs to another user or machine.
        if code == ERROR_INVALID_DATA || code == NTE_BAD_DATA as u32 {
            return Err(WalletError::AuthFailed);
        }
        return Err(WalletError::NotAuthorized(format!(
            "DPAPI unprotect failed for {id} (0x{code:08x})"
        )));
    }
    Ok(unsafe { take_secret_output(&output) })
}

impl SealedStore for DpapiStore {
    fn backend(&self) -> &'static str {
        "dpapi"
    }

    fn protect(&self, id: &str, plaintext: &[u8]) -> WalletResult<Vec<u8>> {
        let blob = dpapi_protect(id, plaintext)?;
        self.blobs.write(id, &blob)?;
        debug!(id, backend = "dpapi", "sealed secret");
        Ok(blob)
    }

    fn unprotect(&self, id: &str, ciphertext: &[u8]) -> WalletResult<SecretBytes> {
        dpapi_unprotect(id, ciphertext)
    }

    fn fetch(&self, id: &str) -> WalletResult<Option<Vec<u8>>> {
        self.blobs.read(id)
    }

    fn exists(&self, id: &str) -> WalletResult<bool> {
        Ok(self.blobs.exists(id))
    }

    fn delete(&self, id: &str) -> WalletResult<()> {
        self.blobs.remove(id)?;
        debug!(id, backend = "dpapi", "deleted sealed secret");
        Ok(())
    }
}
