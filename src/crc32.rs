//! Helper module to compute a CRC32 checksum

use std::io;
use std::io::prelude::*;

use crc32fast::Hasher;

/// Reader that keeps a running CRC32 of everything read through it.
///
/// A streaming salvage decoder cannot always know the expected checksum
/// before the body has been consumed (data-descriptor entries resolve it
/// last), so this reader only observes. Compare [`Crc32Reader::crc32`]
/// against the value the entry reports once the body is exhausted.
pub struct Crc32Reader<R> {
    inner: R,
    hasher: Hasher,
}

impl<R> Crc32Reader<R> {
    /// Get a new Crc32Reader which observes the bytes read from `inner`.
    pub fn new(inner: R) -> Self {
        Crc32Reader {
            inner,
            hasher: Hasher::new(),
        }
    }

    /// The CRC32 of the bytes read so far.
    pub fn crc32(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Unwraps the inner reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        self.hasher.update(&buf[..count]);
        Ok(count)
    }
}
