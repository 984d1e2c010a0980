//! SHA-256 content checksums.
//!
//! Checksums are only computed when cheap metadata cannot tell a content
//! change from a metadata-only touch, and while copying a file (the bytes
//! pass through the hasher anyway).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};

/// Prefix of the textual checksum form.
const PREFIX: &str = "sha256:";

/// A SHA-256 digest of a file's content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(pub [u8; 32]);

impl Checksum {
    /// Computes the checksum of an in-memory buffer.
    #[must_use]
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Computes the checksum of everything `reader` yields.
    ///
    /// # Errors
    ///
    /// Returns any error raised by the reader.
    pub fn of_reader(reader: impl Read) -> io::Result<Self> {
        let mut reader = ChecksumReader::new(reader);
        io::copy(&mut reader, &mut io::sink())?;
        Ok(reader.finish())
    }

    /// Returns the raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(PREFIX)?;
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A reader adapter that hashes every byte read through it.
pub struct ChecksumReader<R> {
    inner: R,
    hasher: Sha256,
    bytes: u64,
}

impl<R: Read> ChecksumReader<R> {
    /// Wraps `inner`.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    /// Number of bytes read so far.
    #[must_use]
    pub fn bytes_read(&self) -> u64 {
        self.bytes
    }

    /// Consumes the adapter and returns the checksum of the bytes read.
    #[must_use]
    pub fn finish(self) -> Checksum {
        Checksum(self.hasher.finalize().into())
    }
}

impl<R: Read> Read for ChecksumReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_value() {
        let checksum = Checksum::of_bytes(b"hello world");
        assert_eq!(
            checksum.to_string(),
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn reader_matches_buffer() {
        let data = vec![7u8; 100_000];
        let from_reader = Checksum::of_reader(&data[..]).unwrap();
        assert_eq!(from_reader, Checksum::of_bytes(&data));
    }

    #[test]
    fn reader_passes_bytes_through() {
        let mut reader = ChecksumReader::new(&b"payload"[..]);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"payload");
        assert_eq!(reader.bytes_read(), 7);
        assert_eq!(reader.finish(), Checksum::of_bytes(b"payload"));
    }

    #[test]
    fn different_content_different_checksum() {
        assert_ne!(Checksum::of_bytes(b"aaa"), Checksum::of_bytes(b"bbb"));
    }
}
