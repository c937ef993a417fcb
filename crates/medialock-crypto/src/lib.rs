//! medialock-crypto: streaming media encryption
//!
//! Architecture: AES-256-CBC with the chaining value carried across 64 KiB
//! chunks, authenticated by a truncated HMAC-SHA256 trailer.
//!
//! Pipeline: plaintext → pull 64 KiB → (pad final) → CBC encrypt → HMAC + sidecar → ciphertext || mac10
//!
//! Key hierarchy:
//! ```text
//! Root Key (256-bit, shared out-of-band)
//!   └── HKDF-SHA256(info = per-media-type string) → 112 bytes
//!         ├── iv          [0..16)
//!         ├── cipher key  [16..48)   AES-256-CBC
//!         ├── mac key     [48..80)   HMAC-SHA256, trailer + sidecar
//!         └── ref key     [80..112)
//! ```

pub mod chain;
pub mod decrypt;
pub mod encrypt;
pub mod keys;
pub mod mac;
pub mod sidecar;
pub mod source;

pub use chain::CipherChain;
pub use decrypt::DecryptingEngine;
pub use encrypt::EncryptingEngine;
pub use keys::{InfoTable, KeyBundle, RootKey};
pub use mac::{hmac10, RunningMac};
pub use sidecar::{Sidecar, SidecarIndexer};
pub use source::{read_to_end, ByteSource, MemorySource, ReaderSource};

pub use medialock_core::{MediaError, MediaResult, MediaType};

/// Size of a root key and of each derived 256-bit sub-key
pub const KEY_SIZE: usize = 32;

/// Size of the derived IV and of one AES block
pub const IV_SIZE: usize = 16;

/// AES block size
pub const BLOCK_SIZE: usize = 16;

/// Truncated HMAC length used for the trailer and sidecar entries
pub const MAC_SIZE: usize = 10;

/// HKDF output length: iv + cipher key + mac key + ref key
pub const EXPANDED_KEY_SIZE: usize = 112;

/// Plaintext/ciphertext chunk size, also the sidecar window stride
pub const CHUNK_SIZE: usize = 65536;

/// Sidecar window: one stride plus one overlapping block
pub const SIDECAR_WINDOW_SIZE: usize = CHUNK_SIZE + BLOCK_SIZE;

/// Build an encrypting stream from raw root key bytes.
///
/// Key length and the sidecar request are validated before the source is
/// touched.
pub fn encrypting_stream<S: ByteSource>(
    source: S,
    root_key: &[u8],
    media_type: MediaType,
    generate_sidecar: bool,
) -> MediaResult<EncryptingEngine<S>> {
    let root = RootKey::from_slice(root_key)?;
    if generate_sidecar && !media_type.is_streamable() {
        return Err(MediaError::UnsupportedSidecarRequest(media_type));
    }
    EncryptingEngine::new(source, KeyBundle::derive(&root, media_type)?, generate_sidecar)
}

/// Build a decrypting stream from raw root key bytes.
pub fn decrypting_stream<S: ByteSource>(
    source: S,
    root_key: &[u8],
    media_type: MediaType,
) -> MediaResult<DecryptingEngine<S>> {
    let root = RootKey::from_slice(root_key)?;
    DecryptingEngine::new(source, KeyBundle::derive(&root, media_type)?)
}

/// Encrypt an in-memory payload. Returns `ciphertext || mac` and the
/// sidecar when one was requested.
pub fn encrypt_bytes(
    keys: KeyBundle,
    plaintext: &[u8],
    generate_sidecar: bool,
) -> MediaResult<(Vec<u8>, Option<Sidecar>)> {
    let mut engine = EncryptingEngine::new(
        MemorySource::new(plaintext.to_vec()),
        keys,
        generate_sidecar,
    )?;
    let ciphertext = read_to_end(&mut engine, CHUNK_SIZE)?;
    Ok((ciphertext, engine.into_sidecar()?))
}

/// Verify and decrypt an in-memory `ciphertext || mac`.
pub fn decrypt_bytes(keys: KeyBundle, encrypted: &[u8]) -> MediaResult<Vec<u8>> {
    let mut engine = DecryptingEngine::new(MemorySource::new(encrypted.to_vec()), keys)?;
    read_to_end(&mut engine, CHUNK_SIZE)
}
