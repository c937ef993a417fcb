//! Pull-based byte sources
//!
//! A source hands out up to `max` bytes per `read` and may return fewer
//! without being exhausted. `at_end` reports whether all bytes have been
//! handed out.

use std::io::Read;

use medialock_core::MediaResult;

pub trait ByteSource {
    fn read(&mut self, max: usize) -> MediaResult<Vec<u8>>;

    fn at_end(&self) -> bool;
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read(&mut self, max: usize) -> MediaResult<Vec<u8>> {
        (**self).read(max)
    }

    fn at_end(&self) -> bool {
        (**self).at_end()
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn read(&mut self, max: usize) -> MediaResult<Vec<u8>> {
        (**self).read(max)
    }

    fn at_end(&self) -> bool {
        (**self).at_end()
    }
}

/// In-memory source over owned bytes.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    data: Vec<u8>,
    pos: usize,
    max_read: Option<usize>,
}

impl MemorySource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
            max_read: None,
        }
    }

    /// Cap every read at `max_read` bytes, simulating a source that
    /// returns short reads.
    pub fn with_max_read(mut self, max_read: usize) -> Self {
        self.max_read = Some(max_read.max(1));
        self
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

impl ByteSource for MemorySource {
    fn read(&mut self, max: usize) -> MediaResult<Vec<u8>> {
        let limit = self.max_read.map_or(max, |cap| cap.min(max));
        let n = limit.min(self.remaining());
        let out = self.data[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(out)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }
}

/// Adapts any `io::Read`. Keeps a one-read lookahead so `at_end` is exact
/// as soon as the last byte has been handed out.
#[derive(Debug)]
pub struct ReaderSource<R> {
    reader: R,
    lookahead: Vec<u8>,
    scratch: Vec<u8>,
    eof: bool,
}

impl<R: Read> ReaderSource<R> {
    pub const DEFAULT_FILL: usize = 64 * 1024;

    pub fn new(reader: R) -> Self {
        Self {
            reader,
            lookahead: Vec::new(),
            scratch: Vec::new(),
            eof: false,
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Read from the underlying reader until `want` bytes are buffered or EOF.
    fn fill(&mut self, want: usize) -> MediaResult<()> {
        while !self.eof && self.lookahead.len() < want {
            if self.scratch.is_empty() {
                self.scratch.resize(Self::DEFAULT_FILL, 0);
            }
            let n = match self.reader.read(&mut self.scratch) {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                self.eof = true;
            } else {
                self.lookahead.extend_from_slice(&self.scratch[..n]);
            }
        }
        Ok(())
    }
}

impl<R: Read> ByteSource for ReaderSource<R> {
    fn read(&mut self, max: usize) -> MediaResult<Vec<u8>> {
        self.fill(max.max(1))?;
        let n = max.min(self.lookahead.len());
        let out: Vec<u8> = self.lookahead.drain(..n).collect();
        // peek so at_end flips as soon as the last byte is out
        self.fill(1)?;
        Ok(out)
    }

    fn at_end(&self) -> bool {
        self.eof && self.lookahead.is_empty()
    }
}

/// Drain a source completely into memory. A `read_size` of 0 is treated as 1.
pub fn read_to_end<S: ByteSource + ?Sized>(source: &mut S, read_size: usize) -> MediaResult<Vec<u8>> {
    let read_size = read_size.max(1);
    let mut out = Vec::new();
    while !source.at_end() {
        let chunk = source.read(read_size)?;
        if chunk.is_empty() && source.at_end() {
            break;
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}
