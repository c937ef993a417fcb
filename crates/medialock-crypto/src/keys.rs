//! Key hierarchy: 32-byte root key → HKDF-SHA256 → {iv, cipher key, mac key, ref key}

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroize;

use medialock_core::{MediaError, MediaResult, MediaType};

use crate::{EXPANDED_KEY_SIZE, IV_SIZE, KEY_SIZE};

/// A 256-bit root key shared out-of-band. Zeroized on drop.
#[derive(Clone)]
pub struct RootKey {
    bytes: [u8; KEY_SIZE],
}

impl RootKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Accepts exactly 32 bytes, anything else is `InvalidKeyLength`.
    pub fn from_slice(bytes: &[u8]) -> MediaResult<Self> {
        let array: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| MediaError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self { bytes: array })
    }

    /// Generate a random root key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_bytes(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for RootKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for RootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// HKDF info strings per media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoTable {
    pub image: Vec<u8>,
    pub video: Vec<u8>,
    pub audio: Vec<u8>,
    pub document: Vec<u8>,
}

impl Default for InfoTable {
    fn default() -> Self {
        Self {
            image: b"WhatsApp Image Keys".to_vec(),
            video: b"WhatsApp Video Keys".to_vec(),
            audio: b"WhatsApp Audio Keys".to_vec(),
            document: b"WhatsApp Document Keys".to_vec(),
        }
    }
}

impl InfoTable {
    pub fn info_for(&self, media_type: MediaType) -> &[u8] {
        match media_type {
            MediaType::Image => &self.image,
            MediaType::Video => &self.video,
            MediaType::Audio => &self.audio,
            MediaType::Document => &self.document,
        }
    }

    /// Resolve a raw label; unrecognized labels use the document info.
    pub fn info_for_label(&self, label: &str) -> &[u8] {
        self.info_for(MediaType::from_label_lenient(label))
    }
}

/// Sub-keys expanded from a root key for one media type.
///
/// Layout of the 112 expanded bytes:
/// ```text
/// [0..16)   iv
/// [16..48)  cipher key (AES-256)
/// [48..80)  mac key (HMAC-SHA256)
/// [80..112) ref key
/// ```
#[derive(Clone)]
pub struct KeyBundle {
    media_type: MediaType,
    iv: [u8; IV_SIZE],
    cipher_key: [u8; KEY_SIZE],
    mac_key: [u8; KEY_SIZE],
    ref_key: [u8; KEY_SIZE],
}

impl KeyBundle {
    /// Derive with the default info table.
    pub fn derive(root: &RootKey, media_type: MediaType) -> MediaResult<Self> {
        Self::derive_with(root, media_type, &InfoTable::default())
    }

    pub fn derive_with(
        root: &RootKey,
        media_type: MediaType,
        table: &InfoTable,
    ) -> MediaResult<Self> {
        let mut okm = expand(root.as_bytes(), table.info_for(media_type))?;

        let mut bundle = Self {
            media_type,
            iv: [0u8; IV_SIZE],
            cipher_key: [0u8; KEY_SIZE],
            mac_key: [0u8; KEY_SIZE],
            ref_key: [0u8; KEY_SIZE],
        };
        bundle.iv.copy_from_slice(&okm[..16]);
        bundle.cipher_key.copy_from_slice(&okm[16..48]);
        bundle.mac_key.copy_from_slice(&okm[48..80]);
        bundle.ref_key.copy_from_slice(&okm[80..112]);
        okm.zeroize();

        Ok(bundle)
    }

    /// Validate raw root key bytes, then derive.
    pub fn from_root_slice(root: &[u8], media_type: MediaType) -> MediaResult<Self> {
        Self::derive(&RootKey::from_slice(root)?, media_type)
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    pub fn cipher_key(&self) -> &[u8; KEY_SIZE] {
        &self.cipher_key
    }

    pub fn mac_key(&self) -> &[u8; KEY_SIZE] {
        &self.mac_key
    }

    pub fn ref_key(&self) -> &[u8; KEY_SIZE] {
        &self.ref_key
    }
}

impl Drop for KeyBundle {
    fn drop(&mut self) {
        self.iv.zeroize();
        self.cipher_key.zeroize();
        self.mac_key.zeroize();
        self.ref_key.zeroize();
    }
}

impl std::fmt::Debug for KeyBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyBundle")
            .field("media_type", &self.media_type)
            .field("keys", &"[REDACTED]")
            .finish()
    }
}

/// HKDF-SHA256 (no salt) to 112 bytes with the given info string.
fn expand(ikm: &[u8; KEY_SIZE], info: &[u8]) -> MediaResult<[u8; EXPANDED_KEY_SIZE]> {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = [0u8; EXPANDED_KEY_SIZE];
    hkdf.expand(info, &mut okm)
        .map_err(|e| MediaError::CipherFailure(format!("HKDF expand failed: {e}")))?;
    Ok(okm)
}
