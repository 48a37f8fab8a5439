//! XZ block headers.
//!
//! A block header is `(size_byte + 1) * 4` bytes: flags, optional declared
//! compressed/uncompressed sizes as varints, the filter list, zero padding
//! and a CRC32 over everything before the CRC. Only the LZMA2 filter
//! (id 0x21, one property byte encoding the dictionary size) is supported;
//! the filter list is still parsed generically.

use std::io::Read;

use crate::codec::{dict_size_decode, dict_size_encode};
use crate::format::vli::{read_vli, vli_len, write_vli};
use crate::xz::stream::map_eof;
use crate::{Error, Result};

/// The LZMA2 filter id.
pub const FILTER_LZMA2: u64 = 0x21;

/// Largest encodable block header.
pub const HEADER_LEN_MAX: usize = 1024;

/// A parsed or to-be-written block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Declared compressed size of the block body, if present.
    pub compressed_size: Option<u64>,
    /// Declared uncompressed size of the block, if present.
    pub uncompressed_size: Option<u64>,
    /// LZMA2 dictionary size from the filter properties.
    pub dict_size: u32,
}

impl BlockHeader {
    /// A streaming header: sizes unknown, one LZMA2 filter.
    pub fn streaming(dict_size: u32) -> Self {
        Self {
            compressed_size: None,
            uncompressed_size: None,
            dict_size,
        }
    }

    /// Encodes the header, returning the bytes written (a multiple of 4).
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<usize> {
        let mut body = Vec::with_capacity(16);

        let mut flags = 0u8; // one filter
        if self.compressed_size.is_some() {
            flags |= 0x40;
        }
        if self.uncompressed_size.is_some() {
            flags |= 0x80;
        }
        body.push(flags);
        if let Some(size) = self.compressed_size {
            write_vli(&mut body, size)?;
        }
        if let Some(size) = self.uncompressed_size {
            write_vli(&mut body, size)?;
        }

        // Filter list: LZMA2, one property byte.
        write_vli(&mut body, FILTER_LZMA2)?;
        write_vli(&mut body, 1)?;
        body.push(dict_size_encode(self.dict_size)?);

        // size byte + body + padding + crc32, padded to a 4-byte multiple.
        let header_len = (1 + body.len() + 4).div_ceil(4) * 4;
        let size_byte = (header_len / 4 - 1) as u8;
        body.resize(header_len - 1 - 4, 0);

        let mut crc = crc32fast::Hasher::new();
        crc.update(&[size_byte]);
        crc.update(&body);

        out.push(size_byte);
        out.extend_from_slice(&body);
        out.extend_from_slice(&crc.finalize().to_le_bytes());
        Ok(header_len)
    }

    /// Decodes a header whose size byte was already consumed (the reader
    /// needs that byte to tell a block from the index indicator).
    ///
    /// Returns the header and its total encoded length.
    pub fn decode<R: Read>(r: &mut R, size_byte: u8) -> Result<(Self, usize)> {
        let header_len = (size_byte as usize + 1) * 4;
        let mut rest = vec![0u8; header_len - 1];
        r.read_exact(&mut rest).map_err(map_eof)?;

        let crc_offset = rest.len() - 4;
        let expected = u32::from_le_bytes(rest[crc_offset..].try_into().unwrap());
        let mut crc = crc32fast::Hasher::new();
        crc.update(&[size_byte]);
        crc.update(&rest[..crc_offset]);
        let actual = crc.finalize();
        if expected != actual {
            return Err(Error::HeaderCrcMismatch { expected, actual });
        }

        let body = &rest[..crc_offset];
        let flags = body[0];
        if flags & 0x3C != 0 {
            return Err(Error::format("reserved block flag bits set"));
        }
        let num_filters = (flags & 0x03) as usize + 1;

        let mut cursor = &body[1..];
        let compressed_size = if flags & 0x40 != 0 {
            Some(read_vli(&mut cursor)?.0)
        } else {
            None
        };
        let uncompressed_size = if flags & 0x80 != 0 {
            Some(read_vli(&mut cursor)?.0)
        } else {
            None
        };

        let mut dict_size = None;
        for _ in 0..num_filters {
            let (filter_id, _) = read_vli(&mut cursor)?;
            let (props_len, _) = read_vli(&mut cursor)?;
            if cursor.len() < props_len as usize {
                return Err(Error::format("filter properties overrun block header"));
            }
            let props = &cursor[..props_len as usize];
            cursor = &cursor[props_len as usize..];

            if filter_id != FILTER_LZMA2 {
                return Err(Error::UnsupportedFilter(filter_id));
            }
            if props.len() != 1 {
                return Err(Error::format("LZMA2 filter expects one property byte"));
            }
            dict_size = Some(dict_size_decode(props[0])?);
        }
        let dict_size =
            dict_size.ok_or_else(|| Error::format("block header declares no filter"))?;

        if cursor.iter().any(|&b| b != 0) {
            return Err(Error::format("non-zero block header padding"));
        }

        Ok((
            Self {
                compressed_size,
                uncompressed_size,
                dict_size,
            },
            header_len,
        ))
    }

    /// Encoded length of this header without materialising it.
    pub fn encoded_len(&self) -> usize {
        let mut body = 1usize;
        if let Some(size) = self.compressed_size {
            body += vli_len(size);
        }
        if let Some(size) = self.uncompressed_size {
            body += vli_len(size);
        }
        body += vli_len(FILTER_LZMA2) + vli_len(1) + 1;
        (1 + body + 4).div_ceil(4) * 4
    }
}
