//! Sidecar index for streamable media
//!
//! Sidecar format (binary):
//! ```text
//! [16 bytes: iv][10 bytes: HMAC10(window_0)][10 bytes: HMAC10(window_1)]...
//! window_i = ciphertext[i * 65536 .. i * 65536 + 65552]   (last one may be shorter)
//! ```
//!
//! Consecutive windows overlap by one cipher block, so a consumer that
//! fetches a byte range can authenticate it and still have the preceding
//! block it needs as the CBC IV.

use std::ops::Range;

use zeroize::Zeroize;

use medialock_core::{MediaError, MediaResult};

use crate::keys::KeyBundle;
use crate::mac::{hmac10, verify_mac, RunningMac};
use crate::source::{ByteSource, MemorySource};
use crate::{CHUNK_SIZE, IV_SIZE, KEY_SIZE, MAC_SIZE, SIDECAR_WINDOW_SIZE};

/// Consumes ciphertext in order and emits one truncated MAC per window.
pub struct SidecarIndexer {
    mac_key: [u8; KEY_SIZE],
    pending: Vec<u8>,
    out: Vec<u8>,
}

impl SidecarIndexer {
    pub fn new(iv: &[u8; IV_SIZE], mac_key: &[u8; KEY_SIZE]) -> Self {
        let mut out = Vec::with_capacity(IV_SIZE + MAC_SIZE * 4);
        out.extend_from_slice(iv);
        Self {
            mac_key: *mac_key,
            pending: Vec::with_capacity(SIDECAR_WINDOW_SIZE + CHUNK_SIZE),
            out,
        }
    }

    pub fn update(&mut self, ciphertext: &[u8]) -> MediaResult<()> {
        self.pending.extend_from_slice(ciphertext);
        while self.pending.len() >= SIDECAR_WINDOW_SIZE {
            let sig = hmac10(&self.mac_key, &self.pending[..SIDECAR_WINDOW_SIZE])?;
            self.out.extend_from_slice(&sig);
            // keep the trailing block: it opens the next window
            self.pending.drain(..CHUNK_SIZE);
        }
        Ok(())
    }

    /// Entries emitted so far.
    pub fn entry_count(&self) -> usize {
        (self.out.len() - IV_SIZE) / MAC_SIZE
    }

    /// Sign whatever remains as the final (short) window.
    pub fn finish(mut self) -> MediaResult<Sidecar> {
        if self.pending.is_empty() {
            return Err(MediaError::InvalidSidecar(
                "no ciphertext was indexed".into(),
            ));
        }
        let sig = hmac10(&self.mac_key, &self.pending)?;
        self.out.extend_from_slice(&sig);
        Ok(Sidecar {
            bytes: std::mem::take(&mut self.out),
        })
    }
}

impl Drop for SidecarIndexer {
    fn drop(&mut self) {
        self.mac_key.zeroize();
    }
}

impl std::fmt::Debug for SidecarIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidecarIndexer")
            .field("pending", &self.pending.len())
            .field("entries", &self.entry_count())
            .finish_non_exhaustive()
    }
}

/// A completed sidecar: the IV followed by at least one 10-byte entry.
#[derive(Clone, PartialEq, Eq)]
pub struct Sidecar {
    bytes: Vec<u8>,
}

impl Sidecar {
    /// Parse serialized sidecar bytes; length must be `16 + 10k` with k ≥ 1.
    pub fn from_bytes(bytes: Vec<u8>) -> MediaResult<Self> {
        if bytes.len() < IV_SIZE + MAC_SIZE || (bytes.len() - IV_SIZE) % MAC_SIZE != 0 {
            return Err(MediaError::InvalidSidecar(format!(
                "length {} is not 16 + 10k",
                bytes.len()
            )));
        }
        Ok(Self { bytes })
    }

    /// Rebuild the sidecar for a complete encrypted file (`ciphertext || mac`).
    pub fn from_ciphertext(keys: &KeyBundle, encrypted: &[u8]) -> MediaResult<Self> {
        Self::from_source(keys, MemorySource::new(encrypted))
    }

    /// Rebuild the sidecar by streaming an encrypted file from `source`.
    ///
    /// The last 10 bytes seen are held back as the candidate trailer. The
    /// index is only returned once that trailer verifies, so it is never
    /// built over unauthenticated bytes.
    pub fn from_source<S: ByteSource>(keys: &KeyBundle, mut source: S) -> MediaResult<Self> {
        let media_type = keys.media_type();
        if !media_type.is_streamable() {
            return Err(MediaError::UnsupportedSidecarRequest(media_type));
        }

        let mut mac = RunningMac::new(keys.mac_key(), keys.iv())?;
        let mut indexer = SidecarIndexer::new(keys.iv(), keys.mac_key());
        let mut held = Vec::with_capacity(CHUNK_SIZE + MAC_SIZE);

        while !source.at_end() {
            let got = source.read(CHUNK_SIZE)?;
            if got.is_empty() {
                if source.at_end() {
                    break;
                }
                return Err(MediaError::SourceStalled);
            }
            held.extend_from_slice(&got);
            if held.len() > MAC_SIZE {
                let body: Vec<u8> = held.drain(..held.len() - MAC_SIZE).collect();
                mac.update(&body);
                indexer.update(&body)?;
            }
        }

        if held.len() < MAC_SIZE {
            return Err(MediaError::Integrity);
        }
        verify_mac(&mac.finalize(), &held)?;
        indexer.finish()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn iv(&self) -> &[u8] {
        &self.bytes[..IV_SIZE]
    }

    pub fn entry_count(&self) -> usize {
        (self.bytes.len() - IV_SIZE) / MAC_SIZE
    }

    pub fn entry(&self, index: usize) -> Option<&[u8]> {
        self.entries().nth(index)
    }

    pub fn entries(&self) -> impl Iterator<Item = &[u8]> {
        self.bytes[IV_SIZE..].chunks_exact(MAC_SIZE)
    }

    /// Byte range of the ciphertext body (trailer excluded) covered by
    /// entry `index`, or `None` if the index is past the last entry.
    pub fn window_range(&self, index: usize, body_len: u64) -> Option<Range<u64>> {
        if index >= self.entry_count() {
            return None;
        }
        let start = index as u64 * CHUNK_SIZE as u64;
        if start >= body_len {
            return None;
        }
        let end = (start + SIDECAR_WINDOW_SIZE as u64).min(body_len);
        Some(start..end)
    }

    /// Authenticate one fetched window against entry `index`.
    pub fn verify_window(
        &self,
        mac_key: &[u8; KEY_SIZE],
        index: usize,
        window: &[u8],
    ) -> MediaResult<()> {
        let expected = self.entry(index).ok_or_else(|| {
            MediaError::InvalidSidecar(format!(
                "window {index} out of range ({} entries)",
                self.entry_count()
            ))
        })?;
        verify_mac(&hmac10(mac_key, window)?, expected)
    }
}

impl AsRef<[u8]> for Sidecar {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for Sidecar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sidecar")
            .field("len", &self.bytes.len())
            .field("entries", &self.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IV: [u8; 16] = [3u8; 16];
    const MAC_KEY: [u8; 32] = [5u8; 32];

    fn ciphertext(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i.wrapping_mul(31) >> 2) as u8).collect()
    }

    fn index(data: &[u8], step: usize) -> Sidecar {
        let mut indexer = SidecarIndexer::new(&IV, &MAC_KEY);
        for piece in data.chunks(step) {
            indexer.update(piece).unwrap();
        }
        indexer.finish().unwrap()
    }

    #[test]
    fn test_single_short_window() {
        let data = ciphertext(48);
        let sidecar = index(&data, 48);

        assert_eq!(sidecar.len(), 16 + 10);
        assert_eq!(sidecar.iv(), &IV);
        assert_eq!(sidecar.entry(0).unwrap(), &hmac10(&MAC_KEY, &data).unwrap());
    }

    #[test]
    fn test_windows_overlap_by_one_block() {
        let data = ciphertext(CHUNK_SIZE * 2 + 32);
        let sidecar = index(&data, 4096);

        assert_eq!(sidecar.entry_count(), 3);
        let w0 = &data[..SIDECAR_WINDOW_SIZE];
        let w1 = &data[CHUNK_SIZE..CHUNK_SIZE + SIDECAR_WINDOW_SIZE];
        let w2 = &data[2 * CHUNK_SIZE..];
        assert_eq!(sidecar.entry(0).unwrap(), &hmac10(&MAC_KEY, w0).unwrap());
        assert_eq!(sidecar.entry(1).unwrap(), &hmac10(&MAC_KEY, w1).unwrap());
        assert_eq!(sidecar.entry(2).unwrap(), &hmac10(&MAC_KEY, w2).unwrap());
    }

    #[test]
    fn test_exact_window_leaves_overlap_entry() {
        // one full window: the retained 16-byte overlap still gets signed
        let data = ciphertext(SIDECAR_WINDOW_SIZE);
        let sidecar = index(&data, SIDECAR_WINDOW_SIZE);

        assert_eq!(sidecar.entry_count(), 2);
        assert_eq!(
            sidecar.entry(1).unwrap(),
            &hmac10(&MAC_KEY, &data[CHUNK_SIZE..]).unwrap()
        );
    }

    #[test]
    fn test_update_granularity_does_not_matter() {
        let data = ciphertext(CHUNK_SIZE * 3 + 160);
        assert_eq!(index(&data, 16), index(&data, data.len()));
        assert_eq!(index(&data, 1000), index(&data, CHUNK_SIZE));
    }

    #[test]
    fn test_finish_without_input_fails() {
        let indexer = SidecarIndexer::new(&IV, &MAC_KEY);
        assert!(matches!(
            indexer.finish(),
            Err(MediaError::InvalidSidecar(_))
        ));
    }

    #[test]
    fn test_from_bytes_validates_length() {
        assert!(Sidecar::from_bytes(vec![0u8; 16]).is_err());
        assert!(Sidecar::from_bytes(vec![0u8; 30]).is_err());
        let parsed = Sidecar::from_bytes(vec![0u8; 36]).unwrap();
        assert_eq!(parsed.entry_count(), 2);
    }

    #[test]
    fn test_window_range_and_verify() {
        let data = ciphertext(CHUNK_SIZE * 2 + 64);
        let sidecar = index(&data, 8192);
        let body_len = data.len() as u64;

        assert_eq!(
            sidecar.window_range(0, body_len),
            Some(0..SIDECAR_WINDOW_SIZE as u64)
        );
        let last = sidecar.window_range(2, body_len).unwrap();
        assert_eq!(last, (2 * CHUNK_SIZE) as u64..body_len);
        assert_eq!(sidecar.window_range(3, body_len), None);

        for i in 0..sidecar.entry_count() {
            let r = sidecar.window_range(i, body_len).unwrap();
            let window = &data[r.start as usize..r.end as usize];
            sidecar.verify_window(&MAC_KEY, i, window).unwrap();
        }

        let mut tampered = data[..SIDECAR_WINDOW_SIZE].to_vec();
        tampered[100] ^= 0x80;
        assert!(matches!(
            sidecar.verify_window(&MAC_KEY, 0, &tampered),
            Err(MediaError::Integrity)
        ));
        assert!(matches!(
            sidecar.verify_window(&MAC_KEY, 9, &tampered),
            Err(MediaError::InvalidSidecar(_))
        ));
    }

    fn video_keys() -> KeyBundle {
        KeyBundle::from_root_slice(&[8u8; 32], medialock_core::MediaType::Video).unwrap()
    }

    #[test]
    fn test_from_source_matches_engine_sidecar() {
        let data: Vec<u8> = (0..CHUNK_SIZE as u32 * 3 + 999).map(|i| (i % 253) as u8).collect();
        let (encrypted, generated) = crate::encrypt_bytes(video_keys(), &data, true).unwrap();
        let generated = generated.unwrap();

        // short reads put the trailer across several pulls
        for max_read in [1usize, 7, 4096, CHUNK_SIZE + 3] {
            let source = MemorySource::new(encrypted.clone()).with_max_read(max_read);
            let rebuilt = Sidecar::from_source(&video_keys(), source).unwrap();
            assert_eq!(rebuilt, generated, "max_read {max_read}");
        }
        assert_eq!(
            Sidecar::from_ciphertext(&video_keys(), &encrypted).unwrap(),
            generated
        );
    }

    #[test]
    fn test_from_source_rejects_bad_trailer() {
        let (mut encrypted, _) = crate::encrypt_bytes(video_keys(), &[1u8; 5000], false).unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0x02;

        let source = MemorySource::new(encrypted).with_max_read(333);
        assert!(matches!(
            Sidecar::from_source(&video_keys(), source),
            Err(MediaError::Integrity)
        ));
        assert!(matches!(
            Sidecar::from_source(&video_keys(), MemorySource::new(vec![0u8; 4])),
            Err(MediaError::Integrity)
        ));
    }

    #[test]
    fn test_from_source_requires_streamable_type() {
        let keys = KeyBundle::from_root_slice(&[8u8; 32], medialock_core::MediaType::Image).unwrap();
        let mut source = MemorySource::new(vec![0u8; 64]);
        assert!(matches!(
            Sidecar::from_source(&keys, &mut source),
            Err(MediaError::UnsupportedSidecarRequest(_))
        ));
        assert_eq!(source.remaining(), 64);
    }

    #[test]
    fn test_entries_follow_iv() {
        let data = ciphertext(CHUNK_SIZE + 80);
        let sidecar = index(&data, 1024);
        let entries: Vec<&[u8]> = sidecar.entries().collect();

        assert_eq!(entries.len(), sidecar.entry_count());
        assert_eq!(entries.concat(), &sidecar.as_bytes()[IV_SIZE..]);
    }
}
