//! LZMA2 chunk framing.
//!
//! LZMA2 wraps raw LZMA payloads in control-byte chunks. A chunk is either
//! uncompressed (with or without a dictionary reset) or an LZMA payload
//! whose control byte selects which coder state is reset first. A single
//! 0x00 byte terminates the stream.
//!
//! Control byte layout:
//!
//! | Header       | Type         | Reset dict | Reset state | New props |
//! |--------------|--------------|------------|-------------|-----------|
//! | `0x00`       | end of stream| -          | -           | -         |
//! | `0x01`       | uncompressed | yes        | -           | -         |
//! | `0x02`       | uncompressed | no         | -           | -         |
//! | `100xxxxx`   | LZMA         | no         | no          | no        |
//! | `101xxxxx`   | LZMA         | no         | yes         | no        |
//! | `110xxxxx`   | LZMA         | no         | yes         | yes       |
//! | `111xxxxx`   | LZMA         | yes        | yes         | yes       |

mod reader;
mod writer;

pub use reader::Lzma2Reader;
pub use writer::{Lzma2UncompressedWriter, Lzma2Writer};

/// End-of-stream marker byte.
pub const CONTROL_EOS: u8 = 0x00;

/// Uncompressed chunk that resets the dictionary.
pub const CONTROL_UNCOMPRESSED_RESET_DICT: u8 = 0x01;

/// Uncompressed chunk that keeps the dictionary.
pub const CONTROL_UNCOMPRESSED: u8 = 0x02;

/// LZMA chunk, no resets.
pub const CONTROL_LZMA: u8 = 0x80;

/// LZMA chunk with a state reset.
pub const CONTROL_LZMA_RESET_STATE: u8 = 0xA0;

/// LZMA chunk with a state reset and new properties.
pub const CONTROL_LZMA_RESET_PROPS: u8 = 0xC0;

/// LZMA chunk with dictionary, state and properties resets.
pub const CONTROL_LZMA_RESET_ALL: u8 = 0xE0;

/// Maximum compressed payload per chunk.
pub const CHUNK_COMPRESSED_MAX: usize = 1 << 16;

/// Maximum uncompressed span per LZMA chunk.
pub const CHUNK_UNCOMPRESSED_MAX: usize = 1 << 21;

/// Maximum payload of one uncompressed chunk.
pub const CHUNK_UNCOMPRESSED_PAYLOAD_MAX: usize = 1 << 16;

/// Approximate decoder memory requirement in KiB for a dictionary size.
pub fn reader_memory_usage_kib(dict_size: u32) -> u32 {
    40 + (CHUNK_COMPRESSED_MAX as u32) / 1024 + dict_size.max(4096).div_ceil(1024)
}
