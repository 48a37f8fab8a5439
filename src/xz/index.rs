//! The XZ index.
//!
//! The index closes the block sequence: a 0x00 indicator, the record
//! count, one `(unpadded_size, uncompressed_size)` varint pair per block,
//! zero padding to a 4-byte multiple and a CRC32.

use std::io::Read;

use crate::format::vli::{read_vli, vli_len, write_vli};
use crate::xz::stream::map_eof;
use crate::{Error, Result};

/// One block's entry in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRecord {
    /// Header + compressed body + check, before alignment padding.
    pub unpadded_size: u64,
    /// Uncompressed size of the block.
    pub uncompressed_size: u64,
}

/// Total encoded index size (indicator through CRC) for these records.
pub fn encoded_len(records: &[IndexRecord]) -> u64 {
    let mut len = 1 + vli_len(records.len() as u64) as u64;
    for record in records {
        len += vli_len(record.unpadded_size) as u64;
        len += vli_len(record.uncompressed_size) as u64;
    }
    len.div_ceil(4) * 4 + 4
}

/// The stored backward size for these records: `encoded_len / 4 - 1`.
pub fn backward_size(records: &[IndexRecord]) -> u32 {
    (encoded_len(records) / 4 - 1) as u32
}

/// Encodes the full index, including the indicator byte.
pub fn encode(records: &[IndexRecord], out: &mut Vec<u8>) -> Result<u64> {
    let start = out.len();
    out.push(0x00);
    write_vli(out, records.len() as u64)?;
    for record in records {
        write_vli(out, record.unpadded_size)?;
        write_vli(out, record.uncompressed_size)?;
    }
    while (out.len() - start) % 4 != 0 {
        out.push(0x00);
    }
    let crc = crate::checksum::crc32(&out[start..]);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok((out.len() - start) as u64)
}

/// Decodes the index after its 0x00 indicator was consumed, verifying the
/// CRC and padding. Returns the records and the total encoded size.
pub fn decode<R: Read>(r: &mut R) -> Result<(Vec<IndexRecord>, u64)> {
    // Re-accumulate the exact bytes for the CRC.
    let mut raw: Vec<u8> = vec![0x00];
    let mut records = Vec::new();
    {
        let mut tee = TeeReader {
            inner: r,
            raw: &mut raw,
        };
        let (count, _) = read_vli(&mut tee)?;
        for _ in 0..count {
            let (unpadded_size, _) = read_vli(&mut tee)?;
            let (uncompressed_size, _) = read_vli(&mut tee)?;
            records.push(IndexRecord {
                unpadded_size,
                uncompressed_size,
            });
        }

        while tee.raw.len() % 4 != 0 {
            let mut byte = [0u8; 1];
            tee.read_exact(&mut byte).map_err(map_eof)?;
            if byte[0] != 0 {
                return Err(Error::format("non-zero index padding"));
            }
        }
    }

    let mut crc_bytes = [0u8; 4];
    r.read_exact(&mut crc_bytes).map_err(map_eof)?;
    let expected = u32::from_le_bytes(crc_bytes);
    let actual = crate::checksum::crc32(&raw);
    if expected != actual {
        return Err(Error::HeaderCrcMismatch { expected, actual });
    }

    Ok((records, raw.len() as u64 + 4))
}

/// Compares the decoded index against the records accumulated while
/// reading the blocks.
pub fn verify(decoded: &[IndexRecord], accumulated: &[IndexRecord]) -> Result<()> {
    if decoded.len() != accumulated.len() {
        return Err(Error::SizeMismatch {
            what: "index record count",
            declared: decoded.len() as u64,
            actual: accumulated.len() as u64,
        });
    }
    for (d, a) in decoded.iter().zip(accumulated) {
        if d.unpadded_size != a.unpadded_size {
            return Err(Error::SizeMismatch {
                what: "index unpadded size",
                declared: d.unpadded_size,
                actual: a.unpadded_size,
            });
        }
        if d.uncompressed_size != a.uncompressed_size {
            return Err(Error::SizeMismatch {
                what: "index uncompressed size",
                declared: d.uncompressed_size,
                actual: a.uncompressed_size,
            });
        }
    }
    Ok(())
}

/// Forwards reads while keeping a copy of the consumed bytes.
struct TeeReader<'a, R> {
    inner: &'a mut R,
    raw: &'a mut Vec<u8>,
}

impl<R: Read> Read for TeeReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.raw.extend_from_slice(&buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_records() -> Vec<IndexRecord> {
        vec![
            IndexRecord {
                unpadded_size: 1234,
                uncompressed_size: 262_144,
            },
            IndexRecord {
                unpadded_size: 987,
                uncompressed_size: 100_000,
            },
        ]
    }

    #[test]
    fn test_roundtrip() {
        let records = sample_records();
        let mut out = Vec::new();
        let written = encode(&records, &mut out).unwrap();
        assert_eq!(written, out.len() as u64);
        assert_eq!(written % 4, 0);
        assert_eq!(written, encoded_len(&records));

        let mut cursor = &out[1..];
        let (decoded, size) = decode(&mut cursor).unwrap();
        assert_eq!(decoded, records);
        assert_eq!(size, written);
    }

    #[test]
    fn test_empty_index() {
        let mut out = Vec::new();
        let written = encode(&[], &mut out).unwrap();
        // indicator + count + 2 padding + crc = 8.
        assert_eq!(written, 8);
        let mut cursor = &out[1..];
        let (decoded, _) = decode(&mut cursor).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_backward_size() {
        let records = sample_records();
        assert_eq!(
            backward_size(&records) as u64,
            encoded_len(&records) / 4 - 1
        );
    }

    #[test]
    fn test_crc_mismatch() {
        let mut out = Vec::new();
        encode(&sample_records(), &mut out).unwrap();
        let last = out.len() - 1;
        out[last] ^= 0xFF;
        let mut cursor = &out[1..];
        assert!(matches!(
            decode(&mut cursor),
            Err(Error::HeaderCrcMismatch { .. })
        ));
    }

    #[test]
    fn test_nonzero_padding() {
        let records = vec![IndexRecord {
            unpadded_size: 5,
            uncompressed_size: 5,
        }];
        let mut out = Vec::new();
        encode(&records, &mut out).unwrap();
        // Corrupt the padding byte before the CRC and fix the CRC so the
        // padding check itself trips.
        let pad_at = out.len() - 5;
        out[pad_at] = 1;
        let crc_at = out.len() - 4;
        let crc = crate::checksum::crc32(&out[..crc_at]);
        out[crc_at..].copy_from_slice(&crc.to_le_bytes());

        let mut cursor = &out[1..];
        assert!(decode(&mut cursor).is_err());
    }

    #[test]
    fn test_verify_mismatch() {
        let a = sample_records();
        let mut b = a.clone();
        b[1].uncompressed_size += 1;
        assert!(verify(&a, &a).is_ok());
        assert!(verify(&a, &b).is_err());
    }
}
