//! Decrypting stream
//!
//! The trailer MAC sits in the last 10 bytes of the input, and where the
//! input ends is only known once the source says so. Ciphertext is
//! therefore accumulated and a full chunk is only decrypted while enough
//! bytes remain buffered behind it to hold at least one block plus the
//! trailer. Once the source is exhausted the whole remainder is the final
//! chunk: its MAC is checked before any of its plaintext is released.

use std::collections::VecDeque;
use std::io;

use tracing::{debug, trace, warn};

use medialock_core::{MediaError, MediaResult, MediaType};

use crate::chain::CipherChain;
use crate::keys::KeyBundle;
use crate::mac::{verify_mac, RunningMac};
use crate::source::ByteSource;
use crate::{BLOCK_SIZE, CHUNK_SIZE, MAC_SIZE};

/// Buffered ciphertext needed before a non-final chunk may be released.
const HOLDBACK: usize = CHUNK_SIZE + BLOCK_SIZE + MAC_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Streaming,
    Finalized,
    Poisoned,
}

#[derive(Debug)]
pub struct DecryptingEngine<S> {
    source: S,
    keys: KeyBundle,
    chain: CipherChain,
    mac: Option<RunningMac>,
    pending: Vec<u8>,
    output: VecDeque<u8>,
    state: State,
    ciphertext_bytes: u64,
    plaintext_bytes: u64,
}

impl<S: ByteSource> DecryptingEngine<S> {
    pub fn new(source: S, keys: KeyBundle) -> MediaResult<Self> {
        let chain = CipherChain::decryptor(keys.cipher_key(), keys.iv());
        let mac = RunningMac::new(keys.mac_key(), keys.iv())?;

        debug!(media_type = %keys.media_type(), "decrypting stream created");

        Ok(Self {
            source,
            keys,
            chain,
            mac: Some(mac),
            pending: Vec::with_capacity(HOLDBACK + CHUNK_SIZE),
            output: VecDeque::with_capacity(CHUNK_SIZE),
            state: State::Streaming,
            ciphertext_bytes: 0,
            plaintext_bytes: 0,
        })
    }

    pub fn media_type(&self) -> MediaType {
        self.keys.media_type()
    }

    /// True once the trailer has been verified and all plaintext read.
    pub fn at_end(&self) -> bool {
        self.state == State::Finalized && self.output.is_empty()
    }

    /// Return up to `max` bytes of plaintext. An empty result means the
    /// stream is exhausted.
    ///
    /// After `Integrity` or `InvalidPadding` the engine is poisoned and
    /// every further call fails with `Poisoned`.
    pub fn read(&mut self, max: usize) -> MediaResult<Vec<u8>> {
        if self.state == State::Poisoned {
            return Err(MediaError::Poisoned);
        }
        if let Err(e) = self.produce_more() {
            if e.is_fatal() {
                self.state = State::Poisoned;
                self.output.clear();
                self.pending.clear();
            }
            return Err(e);
        }
        let n = max.min(self.output.len());
        Ok(self.output.drain(..n).collect())
    }

    pub fn ciphertext_bytes(&self) -> u64 {
        self.ciphertext_bytes
    }

    pub fn plaintext_bytes(&self) -> u64 {
        self.plaintext_bytes
    }

    fn produce_more(&mut self) -> MediaResult<()> {
        while self.output.is_empty() && self.state == State::Streaming {
            self.fill()?;

            if self.source.at_end() {
                self.process_final()?;
            } else {
                self.process_chunk()?;
            }
        }
        Ok(())
    }

    /// Accumulate ciphertext until a chunk can be released or the source ends.
    fn fill(&mut self) -> MediaResult<()> {
        while self.pending.len() < HOLDBACK && !self.source.at_end() {
            let got = self.source.read(CHUNK_SIZE)?;
            if got.is_empty() {
                if self.source.at_end() {
                    break;
                }
                return Err(MediaError::SourceStalled);
            }
            self.ciphertext_bytes += got.len() as u64;
            self.pending.extend_from_slice(&got);
        }
        Ok(())
    }

    fn process_chunk(&mut self) -> MediaResult<()> {
        let chunk: Vec<u8> = self.pending.drain(..CHUNK_SIZE).collect();
        if let Some(mac) = self.mac.as_mut() {
            mac.update(&chunk);
        }
        let plaintext = self.chain.advance(&chunk, false)?;
        trace!(ciphertext = chunk.len(), "decrypted chunk");

        self.plaintext_bytes += plaintext.len() as u64;
        self.output.extend(plaintext);
        Ok(())
    }

    fn process_final(&mut self) -> MediaResult<()> {
        let data = std::mem::take(&mut self.pending);
        let mut mac = self
            .mac
            .take()
            .ok_or_else(|| MediaError::CipherFailure("trailer MAC already finalized".into()))?;

        if data.len() < MAC_SIZE {
            warn!(
                media_type = %self.keys.media_type(),
                len = data.len(),
                "ciphertext shorter than the trailer MAC"
            );
            return Err(MediaError::Integrity);
        }
        let (body, claimed) = data.split_at(data.len() - MAC_SIZE);

        mac.update(body);
        if let Err(e) = verify_mac(&mac.finalize(), claimed) {
            warn!(
                media_type = %self.keys.media_type(),
                ciphertext_bytes = self.ciphertext_bytes,
                "MAC verification failed"
            );
            return Err(e);
        }

        let plaintext = self.chain.advance(body, true).map_err(|e| {
            if let MediaError::InvalidPadding(pad) = &e {
                warn!(pad = *pad, "invalid padding after successful MAC check");
            }
            e
        })?;

        self.plaintext_bytes += plaintext.len() as u64;
        self.output.extend(plaintext);
        self.state = State::Finalized;

        debug!(
            media_type = %self.keys.media_type(),
            ciphertext_bytes = self.ciphertext_bytes,
            plaintext_bytes = self.plaintext_bytes,
            "decrypting stream finalized"
        );
        Ok(())
    }
}

impl<S: ByteSource> ByteSource for DecryptingEngine<S> {
    fn read(&mut self, max: usize) -> MediaResult<Vec<u8>> {
        DecryptingEngine::read(self, max)
    }

    fn at_end(&self) -> bool {
        DecryptingEngine::at_end(self)
    }
}

impl<S: ByteSource> io::Read for DecryptingEngine<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let out = DecryptingEngine::read(self, buf.len())?;
        buf[..out.len()].copy_from_slice(&out);
        Ok(out.len())
    }
}
