//! Error types for LZMA / LZMA2 / XZ stream operations.
//!
//! All fallible operations in this crate return [`Result<T>`]. The [`Error`]
//! enum groups failures into the categories a caller can act on: I/O,
//! malformed container framing, corrupt compressed payloads, checksum
//! mismatches, configuration problems and use-after-close.

use std::io;

use crate::checksum::CheckKind;

/// Classifies corruption detected inside a compressed payload.
///
/// These are the failure modes of the range coder and the LZMA operation
/// stream, as opposed to container-level framing errors which are reported
/// through [`Error::Format`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Corruption {
    /// The range decoder needed more input mid-renormalisation.
    RangeCoderTruncated,
    /// The first byte of a range-coded payload was not 0x00.
    RangeCoderLeadByte,
    /// A match distance exceeded the current dictionary length.
    DistanceTooFar,
    /// The end-of-stream marker appeared although the uncompressed size was
    /// declared and not yet reached.
    UnexpectedEos,
    /// The range coder did not end cleanly after the end-of-stream marker.
    MoreDataAfterEos,
    /// The end-of-stream marker was required but never seen.
    MissingEosMarker,
    /// The compressed payload ended at a size different from the declared one.
    WrongCompressedSize,
    /// The decoded data ended at a size different from the declared one.
    WrongUncompressedSize,
    /// An LZMA2 chunk header byte was not valid in the current chunk state.
    BadChunkHeader,
}

impl std::fmt::Display for Corruption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::RangeCoderTruncated => "range coder input exhausted",
            Self::RangeCoderLeadByte => "range coder lead byte is not zero",
            Self::DistanceTooFar => "match distance exceeds dictionary",
            Self::UnexpectedEos => "unexpected end-of-stream marker",
            Self::MoreDataAfterEos => "data after end-of-stream marker",
            Self::MissingEosMarker => "missing end-of-stream marker",
            Self::WrongCompressedSize => "compressed size mismatch",
            Self::WrongUncompressedSize => "uncompressed size mismatch",
            Self::BadChunkHeader => "invalid LZMA2 chunk header",
        };
        f.write_str(msg)
    }
}

/// The main error type for stream operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred on the underlying reader or writer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The container framing is invalid: bad magic, reserved bits set,
    /// malformed header fields, varint overflow.
    #[error("invalid stream format: {0}")]
    Format(String),

    /// A required read position hit end of input.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// The stream declares a check kind this implementation does not know.
    #[error("unsupported check kind {0:#04x}")]
    UnsupportedCheck(u8),

    /// A block uses a filter other than LZMA2.
    #[error("unsupported filter id {0:#x}")]
    UnsupportedFilter(u64),

    /// A CRC32 over header bytes did not match.
    #[error("header CRC32 mismatch: expected {expected:#010x}, got {actual:#010x}")]
    HeaderCrcMismatch {
        /// CRC stored in the stream.
        expected: u32,
        /// CRC computed over the bytes read.
        actual: u32,
    },

    /// The integrity check over a block's uncompressed data did not match.
    ///
    /// For SHA-256 the reported values are the first eight bytes of each
    /// digest, big-endian.
    #[error("{kind} check mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// The check kind that failed.
        kind: CheckKind,
        /// Check value stored in the stream.
        expected: u64,
        /// Check value computed from the decoded data.
        actual: u64,
    },

    /// A declared size (block header, index record, backward size) does not
    /// match what was actually observed on the wire.
    #[error("{what} mismatch: declared {declared}, actual {actual}")]
    SizeMismatch {
        /// Which declared quantity disagreed.
        what: &'static str,
        /// Value declared in the stream.
        declared: u64,
        /// Value observed while reading.
        actual: u64,
    },

    /// The compressed payload itself is corrupt.
    #[error("corrupt input at byte {offset}: {kind}")]
    CorruptInput {
        /// Uncompressed byte offset at which corruption was detected.
        offset: u64,
        /// What kind of corruption was detected.
        kind: Corruption,
    },

    /// An encoder hit its compressed- or uncompressed-size cap.
    ///
    /// This is recovered internally by the LZMA2 chunker, which closes the
    /// current chunk and starts a new one. It surfaces to callers only from
    /// the raw coder API.
    #[error("size limit reached")]
    LimitReached,

    /// Operation on a writer or reader that was already closed.
    #[error("stream already closed")]
    Closed,

    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

impl Error {
    /// Convenience constructor for [`Error::Format`].
    pub fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    /// Convenience constructor for [`Error::CorruptInput`].
    pub fn corrupt(offset: u64, kind: Corruption) -> Self {
        Error::CorruptInput { offset, kind }
    }

    /// Returns `true` if this error indicates data corruption rather than an
    /// environmental or usage problem.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::CorruptInput { .. }
                | Error::ChecksumMismatch { .. }
                | Error::HeaderCrcMismatch { .. }
                | Error::SizeMismatch { .. }
        )
    }

    /// Returns `true` if this error means the input ended too early.
    pub fn is_truncation(&self) -> bool {
        match self {
            Error::UnexpectedEof => true,
            Error::Io(e) => e.kind() == io::ErrorKind::UnexpectedEof,
            Error::CorruptInput { kind, .. } => {
                matches!(kind, Corruption::RangeCoderTruncated)
            }
            _ => false,
        }
    }

    /// Produces an owned copy suitable for replaying from a terminally
    /// failed writer or reader.
    ///
    /// [`io::Error`] is not `Clone`; its kind and message are preserved.
    pub fn replay(&self) -> Self {
        match self {
            Error::Io(e) => Error::Io(io::Error::new(e.kind(), e.to_string())),
            Error::Format(s) => Error::Format(s.clone()),
            Error::UnexpectedEof => Error::UnexpectedEof,
            Error::UnsupportedCheck(id) => Error::UnsupportedCheck(*id),
            Error::UnsupportedFilter(id) => Error::UnsupportedFilter(*id),
            Error::HeaderCrcMismatch { expected, actual } => Error::HeaderCrcMismatch {
                expected: *expected,
                actual: *actual,
            },
            Error::ChecksumMismatch {
                kind,
                expected,
                actual,
            } => Error::ChecksumMismatch {
                kind: *kind,
                expected: *expected,
                actual: *actual,
            },
            Error::SizeMismatch {
                what,
                declared,
                actual,
            } => Error::SizeMismatch {
                what,
                declared: *declared,
                actual: *actual,
            },
            Error::CorruptInput { offset, kind } => Error::CorruptInput {
                offset: *offset,
                kind: *kind,
            },
            Error::LimitReached => Error::LimitReached,
            Error::Closed => Error::Closed,
            Error::ConfigInvalid(s) => Error::ConfigInvalid(s.clone()),
        }
    }

    /// Maps this error into an [`io::Error`] for `std::io` trait impls.
    pub(crate) fn into_io(self) -> io::Error {
        match self {
            Error::Io(e) => e,
            Error::UnexpectedEof => {
                io::Error::new(io::ErrorKind::UnexpectedEof, "unexpected end of input")
            }
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}

/// A specialized `Result` type for stream operations.
pub type Result<T> = std::result::Result<T, Error>;
