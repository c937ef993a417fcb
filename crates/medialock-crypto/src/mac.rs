//! Truncated HMAC-SHA256 helpers
//!
//! Every MAC on the wire is the first 10 bytes of an HMAC-SHA256 under the
//! bundle's mac key. The trailer MAC covers `iv || ciphertext`; sidecar
//! entries cover one ciphertext window each.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use medialock_core::{MediaError, MediaResult};

use crate::MAC_SIZE;

type HmacSha256 = Hmac<Sha256>;

/// Running HMAC over `iv || ciphertext`, finalized exactly once.
pub struct RunningMac {
    inner: HmacSha256,
    bytes: u64,
}

impl RunningMac {
    /// Start a MAC seeded with the IV.
    pub fn new(mac_key: &[u8], iv: &[u8]) -> MediaResult<Self> {
        let mut inner = new_hmac(mac_key)?;
        inner.update(iv);
        Ok(Self { inner, bytes: 0 })
    }

    pub fn update(&mut self, ciphertext: &[u8]) {
        self.inner.update(ciphertext);
        self.bytes += ciphertext.len() as u64;
    }

    /// Ciphertext bytes absorbed so far (the IV seed is not counted).
    pub fn bytes_absorbed(&self) -> u64 {
        self.bytes
    }

    pub fn finalize(self) -> [u8; MAC_SIZE] {
        truncate(&self.inner.finalize().into_bytes())
    }
}

impl std::fmt::Debug for RunningMac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningMac")
            .field("bytes", &self.bytes)
            .finish_non_exhaustive()
    }
}

/// `HMAC-SHA256(mac_key, data)[0..10]`
pub fn hmac10(mac_key: &[u8], data: &[u8]) -> MediaResult<[u8; MAC_SIZE]> {
    let mut mac = new_hmac(mac_key)?;
    mac.update(data);
    Ok(truncate(&mac.finalize().into_bytes()))
}

/// Constant-time comparison of a computed MAC against a claimed one.
pub fn verify_mac(computed: &[u8], claimed: &[u8]) -> MediaResult<()> {
    if computed.len() == claimed.len() && bool::from(computed.ct_eq(claimed)) {
        Ok(())
    } else {
        Err(MediaError::Integrity)
    }
}

fn new_hmac(mac_key: &[u8]) -> MediaResult<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(mac_key)
        .map_err(|e| MediaError::CipherFailure(format!("HMAC init failed: {e}")))
}

fn truncate(full: &[u8]) -> [u8; MAC_SIZE] {
    let mut out = [0u8; MAC_SIZE];
    out.copy_from_slice(&full[..MAC_SIZE]);
    out
}
