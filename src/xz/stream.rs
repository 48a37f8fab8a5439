//! XZ stream header and footer.

use std::io::{Read, Write};

use crate::checksum::{crc32, CheckKind};
use crate::{Error, Result};

/// The six magic bytes opening every XZ stream.
pub const MAGIC: [u8; 6] = [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];

/// The two magic bytes closing every XZ stream.
pub const FOOTER_MAGIC: [u8; 2] = [0x59, 0x5A];

/// Stream header length (= footer length).
pub const HEADER_LEN: usize = 12;

/// The two stream-flag bytes, identical in header and footer.
///
/// Byte 0 is reserved (zero); the low nibble of byte 1 is the check kind
/// and its high nibble is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFlags {
    /// Check kind applied to every block of the stream.
    pub check: CheckKind,
}

impl StreamFlags {
    /// Encodes the two flag bytes.
    pub fn encode(self) -> [u8; 2] {
        [0x00, self.check.id()]
    }

    /// Decodes and validates the two flag bytes.
    pub fn decode(bytes: [u8; 2]) -> Result<Self> {
        if bytes[0] != 0x00 || bytes[1] & 0xF0 != 0 {
            return Err(Error::format("reserved stream flag bits set"));
        }
        Ok(Self {
            check: CheckKind::from_id(bytes[1] & 0x0F)?,
        })
    }
}

/// Writes the 12-byte stream header.
pub fn write_header<W: Write>(w: &mut W, flags: StreamFlags) -> Result<()> {
    let flag_bytes = flags.encode();
    w.write_all(&MAGIC)?;
    w.write_all(&flag_bytes)?;
    w.write_all(&crc32(&flag_bytes).to_le_bytes())?;
    Ok(())
}

/// Reads and validates the 12-byte stream header.
pub fn read_header<R: Read>(r: &mut R) -> Result<StreamFlags> {
    let mut header = [0u8; HEADER_LEN];
    r.read_exact(&mut header).map_err(map_eof)?;
    read_header_bytes(&header)
}

/// Validates an already-read 12-byte stream header.
pub fn read_header_bytes(header: &[u8; HEADER_LEN]) -> Result<StreamFlags> {
    if header[..6] != MAGIC {
        return Err(Error::format("bad stream magic"));
    }
    let flags = StreamFlags::decode([header[6], header[7]])?;
    let expected = u32::from_le_bytes(header[8..12].try_into().unwrap());
    let actual = crc32(&header[6..8]);
    if expected != actual {
        return Err(Error::HeaderCrcMismatch { expected, actual });
    }
    Ok(flags)
}

/// Writes the 12-byte stream footer.
///
/// `backward_size` is the stored form: `real index size / 4 - 1`.
pub fn write_footer<W: Write>(w: &mut W, flags: StreamFlags, backward_size: u32) -> Result<()> {
    let flag_bytes = flags.encode();
    let mut crc_input = [0u8; 6];
    crc_input[..4].copy_from_slice(&backward_size.to_le_bytes());
    crc_input[4..6].copy_from_slice(&flag_bytes);

    w.write_all(&crc32(&crc_input).to_le_bytes())?;
    w.write_all(&backward_size.to_le_bytes())?;
    w.write_all(&flag_bytes)?;
    w.write_all(&FOOTER_MAGIC)?;
    Ok(())
}

/// Reads and validates the 12-byte stream footer, returning the flags and
/// the stored backward size.
pub fn read_footer<R: Read>(r: &mut R) -> Result<(StreamFlags, u32)> {
    let mut footer = [0u8; HEADER_LEN];
    r.read_exact(&mut footer).map_err(map_eof)?;

    if footer[10..12] != FOOTER_MAGIC {
        return Err(Error::format("bad stream footer magic"));
    }
    let expected = u32::from_le_bytes(footer[..4].try_into().unwrap());
    let actual = crc32(&footer[4..10]);
    if expected != actual {
        return Err(Error::HeaderCrcMismatch { expected, actual });
    }
    let backward_size = u32::from_le_bytes(footer[4..8].try_into().unwrap());
    let flags = StreamFlags::decode([footer[8], footer[9]])?;
    Ok((flags, backward_size))
}

pub(crate) fn map_eof(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::UnexpectedEof
    } else {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        for check in [
            CheckKind::None,
            CheckKind::Crc32,
            CheckKind::Crc64,
            CheckKind::Sha256,
        ] {
            let mut out = Vec::new();
            write_header(&mut out, StreamFlags { check }).unwrap();
            assert_eq!(out.len(), HEADER_LEN);
            assert_eq!(&out[..6], &MAGIC);

            let flags = read_header(&mut out.as_slice()).unwrap();
            assert_eq!(flags.check, check);
        }
    }

    #[test]
    fn test_footer_roundtrip() {
        let mut out = Vec::new();
        let flags = StreamFlags {
            check: CheckKind::Crc64,
        };
        write_footer(&mut out, flags, 7).unwrap();
        assert_eq!(out.len(), HEADER_LEN);
        assert_eq!(&out[10..], &FOOTER_MAGIC);

        let (read_flags, backward) = read_footer(&mut out.as_slice()).unwrap();
        assert_eq!(read_flags, flags);
        assert_eq!(backward, 7);
    }

    #[test]
    fn test_bad_magic() {
        let mut header = [0u8; HEADER_LEN];
        header[0] = 0xFD;
        assert!(matches!(
            read_header(&mut header.as_slice()),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_corrupt_header_crc() {
        let mut out = Vec::new();
        write_header(
            &mut out,
            StreamFlags {
                check: CheckKind::Crc32,
            },
        )
        .unwrap();
        out[9] ^= 0xFF;
        assert!(matches!(
            read_header(&mut out.as_slice()),
            Err(Error::HeaderCrcMismatch { .. })
        ));
    }

    #[test]
    fn test_reserved_flag_bits() {
        assert!(StreamFlags::decode([0x01, 0x04]).is_err());
        assert!(StreamFlags::decode([0x00, 0x14]).is_err());
    }

    #[test]
    fn test_reserved_check_id() {
        assert!(matches!(
            StreamFlags::decode([0x00, 0x02]),
            Err(Error::UnsupportedCheck(0x02))
        ));
    }
}
