//! AES-256-CBC with the chaining value carried across chunk boundaries
//!
//! Each `advance` call runs CBC over one chunk using the current chaining
//! value as IV, then replaces the chaining value with the last ciphertext
//! block of that chunk. Processing a byte stream in one call or in many
//! block-aligned calls therefore yields identical output.

use aes::Aes256;
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use zeroize::Zeroize;

use medialock_core::{MediaError, MediaResult};

use crate::{BLOCK_SIZE, IV_SIZE, KEY_SIZE};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Encrypt,
    Decrypt,
}

pub struct CipherChain {
    direction: Direction,
    key: [u8; KEY_SIZE],
    chain: [u8; IV_SIZE],
}

impl CipherChain {
    fn new(direction: Direction, key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE]) -> Self {
        Self {
            direction,
            key: *key,
            chain: *iv,
        }
    }

    pub fn encryptor(key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE]) -> Self {
        Self::new(Direction::Encrypt, key, iv)
    }

    pub fn decryptor(key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE]) -> Self {
        Self::new(Direction::Decrypt, key, iv)
    }

    /// The IV the next `advance` call will use.
    pub fn chain_value(&self) -> &[u8; IV_SIZE] {
        &self.chain
    }

    /// Process one chunk.
    ///
    /// Encrypting: the final chunk is PKCS#7 padded first; non-final chunks
    /// must already be block aligned.
    /// Decrypting: the chunk must be block aligned; the final chunk has its
    /// padding stripped after decryption.
    pub fn advance(&mut self, chunk: &[u8], is_final: bool) -> MediaResult<Vec<u8>> {
        match self.direction {
            Direction::Encrypt => self.encrypt(chunk, is_final),
            Direction::Decrypt => self.decrypt(chunk, is_final),
        }
    }

    fn encrypt(&mut self, chunk: &[u8], is_final: bool) -> MediaResult<Vec<u8>> {
        let ciphertext = if is_final {
            self.cbc_encrypt(&pkcs7_pad(chunk))?
        } else {
            self.cbc_encrypt(chunk)?
        };
        self.carry(&ciphertext);
        Ok(ciphertext)
    }

    fn decrypt(&mut self, chunk: &[u8], is_final: bool) -> MediaResult<Vec<u8>> {
        let plaintext = self.cbc_decrypt(chunk)?;
        self.carry(chunk);
        if is_final {
            pkcs7_unpad(plaintext)
        } else {
            Ok(plaintext)
        }
    }

    fn cbc_encrypt(&self, data: &[u8]) -> MediaResult<Vec<u8>> {
        check_aligned(data)?;
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let cipher = Aes256CbcEnc::new_from_slices(&self.key, &self.chain)
            .map_err(|e| MediaError::CipherFailure(format!("AES-256-CBC init: {e}")))?;
        Ok(cipher.encrypt_padded_vec_mut::<NoPadding>(data))
    }

    fn cbc_decrypt(&self, data: &[u8]) -> MediaResult<Vec<u8>> {
        check_aligned(data)?;
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let cipher = Aes256CbcDec::new_from_slices(&self.key, &self.chain)
            .map_err(|e| MediaError::CipherFailure(format!("AES-256-CBC init: {e}")))?;
        cipher
            .decrypt_padded_vec_mut::<NoPadding>(data)
            .map_err(|e| MediaError::CipherFailure(format!("AES-256-CBC decrypt: {e}")))
    }

    /// Next chaining value is the last ciphertext block just processed.
    fn carry(&mut self, ciphertext: &[u8]) {
        if ciphertext.len() >= IV_SIZE {
            self.chain
                .copy_from_slice(&ciphertext[ciphertext.len() - IV_SIZE..]);
        }
    }
}

impl Drop for CipherChain {
    fn drop(&mut self) {
        self.key.zeroize();
        self.chain.zeroize();
    }
}

impl std::fmt::Debug for CipherChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherChain")
            .field("direction", &self.direction)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

fn check_aligned(data: &[u8]) -> MediaResult<()> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(MediaError::CipherFailure(format!(
            "input of {} bytes is not a multiple of the {BLOCK_SIZE}-byte block size",
            data.len()
        )));
    }
    Ok(())
}

/// PKCS#7 pad to a 16-byte boundary. Always adds 1..=16 bytes.
pub fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    let pad_len = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut padded = Vec::with_capacity(data.len() + pad_len);
    padded.extend_from_slice(data);
    padded.resize(data.len() + pad_len, pad_len as u8);
    padded
}

/// Strip PKCS#7 padding. Only the final byte is inspected: it must be 1..=16.
pub fn pkcs7_unpad(mut data: Vec<u8>) -> MediaResult<Vec<u8>> {
    let pad_len = data.last().copied().unwrap_or(0);
    if pad_len == 0 || pad_len as usize > BLOCK_SIZE || pad_len as usize > data.len() {
        return Err(MediaError::InvalidPadding(pad_len));
    }
    data.truncate(data.len() - pad_len as usize);
    Ok(data)
}
