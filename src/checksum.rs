//! Integrity checks for XZ blocks.
//!
//! XZ appends one check value to every block. Four kinds are defined by the
//! format: none, CRC-32 (IEEE 802.3), CRC-64 (ECMA-182) and SHA-256. The
//! stream header stores the kind once; every block carries a check of that
//! kind over its uncompressed data.
//!
//! # Example
//!
//! ```rust
//! use exzed::checksum::{CheckKind, CheckSink};
//!
//! let mut sink = CheckSink::new(CheckKind::Crc32);
//! sink.update(b"Hello, ");
//! sink.update(b"World!");
//! assert_eq!(sink.finish(), vec![0xD0, 0xC3, 0x4A, 0xEC]);
//! ```

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Computes the CRC-32 (IEEE 802.3) of a byte slice in one shot.
///
/// Used for XZ header, block-header and index CRCs.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// The check kind declared in an XZ stream header.
///
/// The discriminants are the on-wire identifiers from the XZ format
/// (low nibble of the second stream-flag byte).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckKind {
    /// No integrity check.
    None,
    /// CRC-32, 4 bytes, little-endian.
    Crc32,
    /// CRC-64 (ECMA-182), 8 bytes, little-endian. The XZ default.
    #[default]
    Crc64,
    /// SHA-256, 32 bytes.
    Sha256,
}

impl CheckKind {
    /// Decodes a check kind from its XZ identifier.
    ///
    /// Identifiers other than 0, 1, 4 and 10 are reserved by the format;
    /// they decode to `None` here so callers can distinguish "reserved"
    /// from "unsupported" themselves.
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0x00 => Ok(Self::None),
            0x01 => Ok(Self::Crc32),
            0x04 => Ok(Self::Crc64),
            0x0A => Ok(Self::Sha256),
            other => Err(Error::UnsupportedCheck(other)),
        }
    }

    /// The XZ identifier of this check kind.
    pub fn id(self) -> u8 {
        match self {
            Self::None => 0x00,
            Self::Crc32 => 0x01,
            Self::Crc64 => 0x04,
            Self::Sha256 => 0x0A,
        }
    }

    /// Size of the check value in bytes.
    pub fn len(self) -> usize {
        match self {
            Self::None => 0,
            Self::Crc32 => 4,
            Self::Crc64 => 8,
            Self::Sha256 => 32,
        }
    }

    /// Returns `true` if this kind carries no check bytes.
    pub fn is_empty(self) -> bool {
        self == Self::None
    }
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Crc32 => "CRC32",
            Self::Crc64 => "CRC64",
            Self::Sha256 => "SHA-256",
        };
        f.write_str(name)
    }
}

/// An incremental hasher for one block check.
///
/// Construct one per block, feed it the uncompressed data, then either take
/// the value with [`finish`](Self::finish) (writer side) or compare against
/// the on-wire bytes with [`verify`](Self::verify) (reader side).
#[derive(Clone)]
pub enum CheckSink {
    /// No hashing.
    None,
    /// CRC-32 state.
    Crc32(crc32fast::Hasher),
    /// CRC-64 state.
    Crc64(crc64fast::Digest),
    /// SHA-256 state.
    Sha256(Box<Sha256>),
}

impl CheckSink {
    /// Creates a fresh hasher for the given kind.
    pub fn new(kind: CheckKind) -> Self {
        match kind {
            CheckKind::None => Self::None,
            CheckKind::Crc32 => Self::Crc32(crc32fast::Hasher::new()),
            CheckKind::Crc64 => Self::Crc64(crc64fast::Digest::new()),
            CheckKind::Sha256 => Self::Sha256(Box::new(Sha256::new())),
        }
    }

    /// The kind this sink hashes for.
    pub fn kind(&self) -> CheckKind {
        match self {
            Self::None => CheckKind::None,
            Self::Crc32(_) => CheckKind::Crc32,
            Self::Crc64(_) => CheckKind::Crc64,
            Self::Sha256(_) => CheckKind::Sha256,
        }
    }

    /// Feeds data into the hasher.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::None => {}
            Self::Crc32(h) => h.update(data),
            Self::Crc64(d) => d.write(data),
            Self::Sha256(s) => s.update(data),
        }
    }

    /// Finishes the hash and returns the on-wire check bytes.
    ///
    /// CRC values are little-endian per the XZ format; SHA-256 is the raw
    /// 32-byte digest.
    pub fn finish(self) -> Vec<u8> {
        match self {
            Self::None => Vec::new(),
            Self::Crc32(h) => h.finalize().to_le_bytes().to_vec(),
            Self::Crc64(d) => d.sum64().to_le_bytes().to_vec(),
            Self::Sha256(s) => s.finalize().to_vec(),
        }
    }

    /// Finishes the hash and compares it against the stored check bytes.
    pub fn verify(self, stored: &[u8]) -> Result<()> {
        let kind = self.kind();
        let computed = self.finish();
        debug_assert_eq!(stored.len(), kind.len());
        if computed == stored {
            return Ok(());
        }
        Err(Error::ChecksumMismatch {
            kind,
            expected: check_summary(kind, stored),
            actual: check_summary(kind, &computed),
        })
    }
}

/// Condenses check bytes into a `u64` for error reporting.
///
/// CRCs are decoded from their little-endian wire form; for SHA-256 the
/// first eight digest bytes are taken big-endian.
fn check_summary(kind: CheckKind, bytes: &[u8]) -> u64 {
    match kind {
        CheckKind::None => 0,
        CheckKind::Crc32 => {
            u32::from_le_bytes(bytes[..4].try_into().unwrap_or_default()) as u64
        }
        CheckKind::Crc64 => u64::from_le_bytes(bytes[..8].try_into().unwrap_or_default()),
        CheckKind::Sha256 => u64::from_be_bytes(bytes[..8].try_into().unwrap_or_default()),
    }
}

/// A reader wrapper that counts the bytes passing through it.
///
/// The XZ reader uses this to measure on-wire compressed sizes against the
/// block header and index declarations.
pub struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R> CountingReader<R> {
    /// Wraps a reader with a zeroed counter.
    pub fn new(inner: R) -> Self {
        Self { inner, count: 0 }
    }

    /// Bytes read since construction or the last [`reset`](Self::reset).
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Resets the counter.
    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Returns the inner reader.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Returns a mutable reference to the inner reader.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

/// A writer wrapper that counts the bytes passing through it.
pub struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W> CountingWriter<W> {
    /// Wraps a writer with a zeroed counter.
    pub fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    /// Bytes written since construction or the last [`reset`](Self::reset).
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Resets the counter.
    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Returns the inner writer.
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Returns a mutable reference to the inner writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
