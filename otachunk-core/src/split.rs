//! Fixed-size splitting of an image stream.
//!
//! [`Splitter`] is a lazy, single-pass iterator: it owns one chunk buffer at a
//! time and never seeks, so multi-gigabyte images stream through bounded memory.

use std::io::{ErrorKind, Read};

use crate::digest::{Digest, Hasher};
use crate::error::{OtaError, Result};

/// Chunk size used by the stock updater (512 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 512 * 1024;

/// One contiguous slice of the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: u32,
    /// Byte offset within the image.
    pub offset: u64,
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Number of chunks an image of `len` bytes splits into.
pub fn chunk_count(len: u64, chunk_size: usize) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    len.div_ceil(chunk_size as u64)
}

pub struct Splitter<R> {
    reader: R,
    chunk_size: usize,
    next_index: u32,
    offset: u64,
    done: bool,
    image_hasher: Option<Hasher>,
    image_digest: Option<Digest>,
}

impl<R: Read> Splitter<R> {
    pub fn new(reader: R, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(OtaError::InvalidConfig("chunk size must be greater than zero".into()));
        }
        Ok(Self {
            reader,
            chunk_size,
            next_index: 0,
            offset: 0,
            done: false,
            image_hasher: None,
            image_digest: None,
        })
    }

    /// Also compute the digest of the whole stream while splitting.
    pub fn with_image_digest(mut self) -> Self {
        self.image_hasher = Some(Hasher::new());
        self
    }

    /// Digest of every byte read, available once the iterator is exhausted.
    pub fn image_digest(&self) -> Option<Digest> {
        self.image_digest
    }

    /// Bytes consumed so far.
    pub fn bytes_read(&self) -> u64 {
        self.offset
    }

    fn fill(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn finish(&mut self) {
        self.done = true;
        if let Some(h) = self.image_hasher.take() {
            self.image_digest = Some(h.finalize());
        }
    }
}

impl<R: Read> Iterator for Splitter<R> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = vec![0u8; self.chunk_size];
        let n = match self.fill(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                self.done = true;
                return Some(Err(OtaError::Io { path: "<image stream>".into(), source: e }));
            }
        };
        if n == 0 {
            self.finish();
            if self.next_index == 0 {
                return Some(Err(OtaError::EmptyInput));
            }
            return None;
        }
        buf.truncate(n);
        if let Some(h) = self.image_hasher.as_mut() {
            h.update(&buf);
        }
        let chunk = Chunk { index: self.next_index, offset: self.offset, data: buf };
        self.next_index += 1;
        self.offset += n as u64;
        if n < self.chunk_size {
            // Short read means EOF; no empty trailing chunk.
            self.finish();
        }
        Some(Ok(chunk))
    }
}

/// Collect all chunks of an in-memory image.
pub fn split_bytes(data: &[u8], chunk_size: usize) -> Result<Vec<Chunk>> {
    Splitter::new(data, chunk_size)?.collect()
}
