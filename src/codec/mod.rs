//! The LZMA engine: range coder, probability model, dictionary, match
//! finder and the raw coder that ties them together.

pub mod dict;
pub mod lzma;
pub mod matchfind;
pub mod model;
pub mod rangecoder;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Smallest dictionary the formats allow.
pub const DICT_SIZE_MIN: u32 = 4096;

/// Largest dictionary the formats allow (4 GiB - 1).
pub const DICT_SIZE_MAX: u32 = u32::MAX;

/// Minimum match length.
pub const MATCH_LEN_MIN: u32 = 2;

/// Maximum match length.
pub const MATCH_LEN_MAX: u32 = 273;

/// Reserved distance value (0-based) signalling end of stream.
pub const DIST_EOS: u32 = u32::MAX;

/// LZMA modelling parameters `(lc, lp, pb)`.
///
/// `lc` literal-context bits, `lp` literal-position bits, `pb` position
/// bits. LZMA2 additionally requires `lc + lp <= 4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Properties {
    /// Literal context bits (0-8).
    pub lc: u32,
    /// Literal position bits (0-4).
    pub lp: u32,
    /// Position bits (0-4).
    pub pb: u32,
}

impl Default for Properties {
    fn default() -> Self {
        Self { lc: 3, lp: 0, pb: 2 }
    }
}

impl Properties {
    /// Creates a property triple without validation; call
    /// [`verify`](Self::verify) before use.
    pub fn new(lc: u32, lp: u32, pb: u32) -> Self {
        Self { lc, lp, pb }
    }

    /// Validates the ranges and, when `lzma2` is set, the combined
    /// `lc + lp <= 4` constraint.
    pub fn verify(&self, lzma2: bool) -> Result<()> {
        if self.lc > 8 || self.lp > 4 || self.pb > 4 {
            return Err(Error::ConfigInvalid(format!(
                "properties out of range: lc={} lp={} pb={}",
                self.lc, self.lp, self.pb
            )));
        }
        if lzma2 && self.lc + self.lp > 4 {
            return Err(Error::ConfigInvalid(format!(
                "lc + lp must not exceed 4 (lc={} lp={})",
                self.lc, self.lp
            )));
        }
        Ok(())
    }

    /// Packs the triple into the single-byte wire form
    /// `(pb * 5 + lp) * 9 + lc`.
    pub fn pack(&self) -> u8 {
        ((self.pb * 5 + self.lp) * 9 + self.lc) as u8
    }

    /// Unpacks the single-byte wire form. The maximum valid value is 224.
    pub fn unpack(byte: u8) -> Result<Self> {
        if byte > (4 * 5 + 4) * 9 + 8 {
            return Err(Error::format(format!("invalid properties byte {byte:#04x}")));
        }
        let byte = byte as u32;
        let pb = byte / 45;
        let rest = byte - pb * 45;
        let lp = rest / 9;
        let lc = rest - lp * 9;
        let props = Self { lc, lp, pb };
        props.verify(false)?;
        Ok(props)
    }

    /// Number of position states, `1 << pb`.
    pub fn pos_states(&self) -> usize {
        1 << self.pb
    }
}

/// One step of the LZ operation stream fed into the entropy coder.
///
/// Distances are 0-based: `dist == 0` refers to the previous byte. The
/// reserved value [`DIST_EOS`] with length 2 is the end-of-stream marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// A single literal byte.
    Literal(u8),
    /// A back-reference of `len` bytes at distance `dist + 1`.
    Match {
        /// 0-based match distance.
        dist: u32,
        /// Match length, 2..=273 (1 only for a short rep).
        len: u32,
    },
}

impl Operation {
    /// Number of uncompressed bytes this operation produces.
    pub fn len(&self) -> u32 {
        match self {
            Operation::Literal(_) => 1,
            Operation::Match { len, .. } => *len,
        }
    }

    /// Returns `true` for the reserved end-of-stream marker.
    pub fn is_eos(&self) -> bool {
        matches!(self, Operation::Match { dist: DIST_EOS, .. })
    }
}

/// Decodes the LZMA2 dictionary-size property byte.
///
/// The byte packs a 2-or-3 mantissa and an exponent:
/// `size = (2 | (byte & 1)) << (11 + (byte >> 1))`; byte 40 denotes the
/// 4 GiB - 1 maximum. Bytes above 40 are invalid.
pub fn dict_size_decode(byte: u8) -> Result<u32> {
    if byte > 40 {
        return Err(Error::format(format!(
            "invalid dictionary size property {byte}"
        )));
    }
    if byte == 40 {
        return Ok(DICT_SIZE_MAX);
    }
    Ok((2 | (byte & 1) as u32) << (11 + (byte >> 1)))
}

/// Encodes a dictionary size as the smallest property byte whose decoded
/// size is at least `size`.
pub fn dict_size_encode(size: u32) -> Result<u8> {
    if size < DICT_SIZE_MIN {
        return Err(Error::ConfigInvalid(format!(
            "dictionary size {size} below minimum {DICT_SIZE_MIN}"
        )));
    }
    for byte in 0u8..40 {
        if dict_size_decode(byte)? >= size {
            return Ok(byte);
        }
    }
    Ok(40)
}

/// Rounds a dictionary size up to the nearest exactly-encodable value.
pub fn dict_size_ceil(size: u32) -> Result<u32> {
    dict_size_decode(dict_size_encode(size)?)
}
