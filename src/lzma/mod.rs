//! The legacy single-stream `.lzma` file format.
//!
//! A 13-byte header (packed properties, little-endian dictionary size,
//! little-endian uncompressed size) followed by one raw LZMA payload. The
//! all-ones size means "unknown, terminated by the end-of-stream marker".

mod reader;
mod writer;

pub use reader::LzmaReader;
pub use writer::LzmaWriter;

/// Header length in bytes.
pub const HEADER_LEN: usize = 13;

/// Size field value declaring an unknown uncompressed size.
pub const SIZE_UNKNOWN: u64 = u64::MAX;
