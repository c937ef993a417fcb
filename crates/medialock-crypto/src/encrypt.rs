//! Encrypting stream
//!
//! Output layout:
//! ```text
//! [N bytes: AES-256-CBC(iv, cipher_key, PKCS7(plaintext))][10 bytes: HMAC10(iv || ciphertext)]
//! ```
//!
//! Plaintext is pulled in 64 KiB chunks. The chunk during which the source
//! reports end-of-input is padded and closes the stream; the trailer MAC
//! is appended right after it.

use std::collections::VecDeque;
use std::io;

use tracing::{debug, trace};

use medialock_core::{MediaError, MediaResult, MediaType};

use crate::chain::CipherChain;
use crate::keys::KeyBundle;
use crate::mac::RunningMac;
use crate::sidecar::{Sidecar, SidecarIndexer};
use crate::source::ByteSource;
use crate::CHUNK_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Streaming,
    Finalized,
    Poisoned,
}

#[derive(Debug)]
pub struct EncryptingEngine<S> {
    source: S,
    keys: KeyBundle,
    chain: CipherChain,
    mac: Option<RunningMac>,
    indexer: Option<SidecarIndexer>,
    sidecar: Option<Sidecar>,
    output: VecDeque<u8>,
    state: State,
    plaintext_bytes: u64,
    ciphertext_bytes: u64,
}

impl<S: ByteSource> EncryptingEngine<S> {
    /// Build an encrypting stream over `source`.
    ///
    /// Requesting a sidecar for IMAGE or DOCUMENT fails here, before any
    /// byte is pulled from the source.
    pub fn new(source: S, keys: KeyBundle, generate_sidecar: bool) -> MediaResult<Self> {
        let media_type = keys.media_type();
        if generate_sidecar && !media_type.is_streamable() {
            return Err(MediaError::UnsupportedSidecarRequest(media_type));
        }

        let chain = CipherChain::encryptor(keys.cipher_key(), keys.iv());
        let mac = RunningMac::new(keys.mac_key(), keys.iv())?;
        let indexer = generate_sidecar.then(|| SidecarIndexer::new(keys.iv(), keys.mac_key()));

        debug!(%media_type, sidecar = generate_sidecar, "encrypting stream created");

        Ok(Self {
            source,
            keys,
            chain,
            mac: Some(mac),
            indexer,
            sidecar: None,
            output: VecDeque::with_capacity(CHUNK_SIZE + 32),
            state: State::Streaming,
            plaintext_bytes: 0,
            ciphertext_bytes: 0,
        })
    }

    pub fn media_type(&self) -> MediaType {
        self.keys.media_type()
    }

    /// True once the source is drained and every output byte, trailer
    /// included, has been read.
    pub fn at_end(&self) -> bool {
        self.state == State::Finalized && self.output.is_empty()
    }

    /// Return up to `max` bytes of ciphertext. An empty result means the
    /// stream is exhausted.
    pub fn read(&mut self, max: usize) -> MediaResult<Vec<u8>> {
        if self.state == State::Poisoned {
            return Err(MediaError::Poisoned);
        }
        if let Err(e) = self.produce_more() {
            if e.is_fatal() {
                self.state = State::Poisoned;
            }
            return Err(e);
        }
        let n = max.min(self.output.len());
        Ok(self.output.drain(..n).collect())
    }

    /// The completed sidecar, or `None` if none was requested.
    ///
    /// Fails with `NotYetFinalized` until the source has been fully consumed.
    pub fn sidecar(&self) -> MediaResult<Option<&Sidecar>> {
        if self.state != State::Finalized {
            return Err(MediaError::NotYetFinalized);
        }
        Ok(self.sidecar.as_ref())
    }

    pub fn into_sidecar(self) -> MediaResult<Option<Sidecar>> {
        if self.state != State::Finalized {
            return Err(MediaError::NotYetFinalized);
        }
        Ok(self.sidecar)
    }

    /// Plaintext bytes consumed from the source so far.
    pub fn plaintext_bytes(&self) -> u64 {
        self.plaintext_bytes
    }

    /// Ciphertext bytes produced so far, trailer included once written.
    pub fn ciphertext_bytes(&self) -> u64 {
        self.ciphertext_bytes
    }

    fn produce_more(&mut self) -> MediaResult<()> {
        while self.output.is_empty() && self.state == State::Streaming {
            let chunk = self.pull_chunk()?;
            let is_final = self.source.at_end();

            let ciphertext = self.chain.advance(&chunk, is_final)?;
            if let Some(mac) = self.mac.as_mut() {
                mac.update(&ciphertext);
            }
            if let Some(indexer) = self.indexer.as_mut() {
                indexer.update(&ciphertext)?;
            }
            trace!(
                plaintext = chunk.len(),
                ciphertext = ciphertext.len(),
                is_final,
                "encrypted chunk"
            );

            self.plaintext_bytes += chunk.len() as u64;
            self.ciphertext_bytes += ciphertext.len() as u64;
            self.output.extend(ciphertext);

            if is_final {
                self.finalize()?;
            }
        }
        Ok(())
    }

    /// Pull exactly one chunk, or less if the source ends first.
    fn pull_chunk(&mut self) -> MediaResult<Vec<u8>> {
        let mut chunk = Vec::with_capacity(CHUNK_SIZE);
        while chunk.len() < CHUNK_SIZE && !self.source.at_end() {
            let got = self.source.read(CHUNK_SIZE - chunk.len())?;
            if got.is_empty() {
                if self.source.at_end() {
                    break;
                }
                return Err(MediaError::SourceStalled);
            }
            chunk.extend_from_slice(&got);
        }
        Ok(chunk)
    }

    fn finalize(&mut self) -> MediaResult<()> {
        let mac = self
            .mac
            .take()
            .ok_or_else(|| MediaError::CipherFailure("trailer MAC already finalized".into()))?;
        let trailer = mac.finalize();
        self.output.extend(trailer);
        self.ciphertext_bytes += trailer.len() as u64;

        if let Some(indexer) = self.indexer.take() {
            self.sidecar = Some(indexer.finish()?);
        }
        self.state = State::Finalized;

        debug!(
            media_type = %self.keys.media_type(),
            plaintext_bytes = self.plaintext_bytes,
            ciphertext_bytes = self.ciphertext_bytes,
            sidecar_entries = self.sidecar.as_ref().map(Sidecar::entry_count),
            "encrypting stream finalized"
        );
        Ok(())
    }
}

impl<S: ByteSource> ByteSource for EncryptingEngine<S> {
    fn read(&mut self, max: usize) -> MediaResult<Vec<u8>> {
        EncryptingEngine::read(self, max)
    }

    fn at_end(&self) -> bool {
        EncryptingEngine::at_end(self)
    }
}

impl<S: ByteSource> io::Read for EncryptingEngine<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let out = EncryptingEngine::read(self, buf.len())?;
        buf[..out.len()].copy_from_slice(&out);
        Ok(out.len())
    }
}
