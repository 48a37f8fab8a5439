//! Legacy `.lzma` decompressor.

use std::io::{self, Read};

use log::warn;

use super::{HEADER_LEN, SIZE_UNKNOWN};
use crate::codec::dict::LzDict;
use crate::codec::lzma::{DecodeOutcome, RawDecoder};
use crate::codec::rangecoder::{RangeDecoder, StreamSource};
use crate::codec::{DICT_SIZE_MIN, Properties};
use crate::{Corruption, Error, Result};

/// A single-stream `.lzma` decompressor.
///
/// The declared dictionary size is sanitised before allocation: values
/// below 4096 are raised to 4096, and a dictionary larger than the declared
/// uncompressed size is clamped to it, so a hostile header cannot demand an
/// absurd allocation for a tiny payload.
#[derive(Debug)]
pub struct LzmaReader<R> {
    dec: RawDecoder,
    dict: LzDict,
    rc: RangeDecoder<StreamSource<R>>,
    /// Undelivered bytes when the header declared a size.
    remaining: Option<u64>,
    dict_size: u32,
    end_reached: bool,
    error: Option<Error>,
}

impl<R: Read> LzmaReader<R> {
    /// Parses the 13-byte header and prepares the decoder.
    pub fn new(mut inner: R) -> Result<Self> {
        let mut header = [0u8; HEADER_LEN];
        inner.read_exact(&mut header).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::UnexpectedEof
            } else {
                Error::Io(e)
            }
        })?;

        let props = Properties::unpack(header[0])?;
        let mut dict_size = u32::from_le_bytes(header[1..5].try_into().unwrap());
        let declared = u64::from_le_bytes(header[5..13].try_into().unwrap());
        let remaining = (declared != SIZE_UNKNOWN).then_some(declared);

        if dict_size < DICT_SIZE_MIN {
            warn!("raising declared dictionary size {dict_size} to {DICT_SIZE_MIN}");
            dict_size = DICT_SIZE_MIN;
        }
        if let Some(size) = remaining {
            if dict_size as u64 > size {
                let clamped = (size as u32).max(DICT_SIZE_MIN);
                warn!(
                    "clamping dictionary size {dict_size} to uncompressed size ({clamped})"
                );
                dict_size = clamped;
            }
        }

        let rc = RangeDecoder::new(StreamSource::new(inner))?;
        Ok(Self {
            dec: RawDecoder::new(props),
            dict: LzDict::new(dict_size),
            rc,
            remaining,
            dict_size,
            end_reached: false,
            error: None,
        })
    }

    /// The (sanitised) dictionary size in use.
    pub fn dict_size(&self) -> u32 {
        self.dict_size
    }

    /// Returns the underlying reader.
    pub fn into_inner(self) -> R {
        self.rc.into_source().into_inner()
    }

    fn read_inner(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || self.end_reached {
            return Ok(0);
        }
        if let Some(err) = &self.error {
            return Err(err.replay());
        }

        let mut total = 0;
        while total < buf.len() && !self.end_reached {
            let mut want = buf.len() - total;
            if let Some(remaining) = self.remaining {
                want = want.min(remaining as usize);
            }
            self.dict.set_limit(want);

            let outcome = match self.dec.decode_into(&mut self.rc, &mut self.dict) {
                Ok(outcome) => outcome,
                Err(err)
                    if self.remaining.is_none() && err.is_truncation() =>
                {
                    return Err(Error::corrupt(
                        self.dict.head(),
                        Corruption::MissingEosMarker,
                    ));
                }
                Err(err) => return Err(err),
            };

            let n = self.dict.flush(&mut buf[total..total + want]);
            total += n;

            match outcome {
                DecodeOutcome::EndMarker => {
                    if let Some(remaining) = self.remaining {
                        if remaining != n as u64 {
                            return Err(Error::corrupt(
                                self.dict.head(),
                                Corruption::UnexpectedEos,
                            ));
                        }
                    }
                    self.rc.align_end()?;
                    if !self.rc.possibly_at_end() {
                        return Err(Error::corrupt(
                            self.dict.head(),
                            Corruption::MoreDataAfterEos,
                        ));
                    }
                    self.end_reached = true;
                }
                DecodeOutcome::Filled => {
                    if let Some(remaining) = self.remaining.as_mut() {
                        *remaining -= n as u64;
                        if *remaining == 0 {
                            if self.dict.has_pending() {
                                return Err(Error::corrupt(
                                    self.dict.head(),
                                    Corruption::WrongUncompressedSize,
                                ));
                            }
                            self.end_reached = true;
                        }
                    }
                }
            }
        }
        Ok(total)
    }
}

impl<R: Read> Read for LzmaReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.read_inner(buf) {
            Ok(n) => Ok(n),
            Err(err) => {
                let replay = err.replay();
                self.error = Some(replay);
                Err(err.into_io())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lzma::LzmaWriter;
    use crate::options::LzmaOptions;
    use std::io::Write;

    fn compress(data: &[u8], opts: &LzmaOptions) -> Vec<u8> {
        let mut writer = LzmaWriter::new(Vec::new(), opts).unwrap();
        writer.write_all(data).unwrap();
        writer.finish().unwrap()
    }

    #[test]
    fn test_roundtrip_unknown_size() {
        let data = b"legacy format roundtrip with an end marker ".repeat(64);
        let compressed = compress(&data, &LzmaOptions::default());
        let mut reader = LzmaReader::new(std::io::Cursor::new(compressed)).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_roundtrip_declared_size() {
        let data = b"declared size, no end marker".to_vec();
        let mut writer =
            LzmaWriter::with_size(Vec::new(), &LzmaOptions::default(), data.len() as u64)
                .unwrap();
        writer.write_all(&data).unwrap();
        let compressed = writer.finish().unwrap();

        let mut reader = LzmaReader::new(std::io::Cursor::new(compressed)).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_dict_size_raised_to_minimum() {
        // Hand-build a header declaring a 2-byte dictionary.
        let data = b"tiny dict header";
        let mut writer =
            LzmaWriter::with_size(Vec::new(), &LzmaOptions::default(), data.len() as u64)
                .unwrap();
        writer.write_all(data).unwrap();
        let mut compressed = writer.finish().unwrap();
        compressed[1..5].copy_from_slice(&2u32.to_le_bytes());

        let reader = LzmaReader::new(std::io::Cursor::new(compressed)).unwrap();
        assert_eq!(reader.dict_size(), DICT_SIZE_MIN);
    }

    #[test]
    fn test_dict_clamped_to_declared_size() {
        let data = vec![b'q'; 8192];
        let mut writer =
            LzmaWriter::with_size(Vec::new(), &LzmaOptions::default(), data.len() as u64)
                .unwrap();
        writer.write_all(&data).unwrap();
        let compressed = writer.finish().unwrap();
        // The default 8 MiB dictionary exceeds the 8 KiB payload.
        let mut reader = LzmaReader::new(std::io::Cursor::new(compressed)).unwrap();
        assert_eq!(reader.dict_size(), 8192);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_truncated_header() {
        let err = LzmaReader::new(std::io::Cursor::new(vec![0x5Du8, 0, 0])).unwrap_err();
        assert!(err.is_truncation());
    }

    #[test]
    fn test_invalid_props_byte() {
        let mut header = vec![0xFFu8];
        header.extend_from_slice(&(1u32 << 16).to_le_bytes());
        header.extend_from_slice(&SIZE_UNKNOWN.to_le_bytes());
        header.extend_from_slice(&[0u8; 8]);
        assert!(LzmaReader::new(std::io::Cursor::new(header)).is_err());
    }

    #[test]
    fn test_truncated_payload_reports_missing_eos() {
        let data = b"will be cut short".repeat(16);
        let compressed = compress(&data, &LzmaOptions::default());
        let cut = compressed.len() - 6;
        let mut reader =
            LzmaReader::new(std::io::Cursor::new(compressed[..cut].to_vec())).unwrap();
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
