//! LZMA2 chunked decompressor.

use std::io::{self, Read};

use log::trace;

use super::{CHUNK_COMPRESSED_MAX, CONTROL_EOS};
use crate::codec::dict::LzDict;
use crate::codec::lzma::{DecodeOutcome, RawDecoder};
use crate::codec::rangecoder::{ChunkSource, RangeDecoder};
use crate::codec::Properties;
use crate::{Corruption, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkKind {
    Lzma,
    Uncompressed,
}

/// A single-threaded LZMA2 decompressor.
///
/// Drives the chunk-type state machine: the first chunk must reset the
/// dictionary, a dictionary reset demands new properties, and new
/// properties demand a state reset. Violations are corruption.
pub struct Lzma2Reader<R> {
    inner: R,
    dict: LzDict,
    rc: RangeDecoder<ChunkSource>,
    dec: Option<RawDecoder>,
    kind: ChunkKind,
    /// Undelivered uncompressed bytes of the current chunk.
    chunk_remaining: usize,
    need_dict_reset: bool,
    need_props: bool,
    end_reached: bool,
    error: Option<Error>,
}

impl<R> Lzma2Reader<R> {
    /// Returns the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Returns `true` once the end-of-stream byte has been consumed.
    pub fn is_finished(&self) -> bool {
        self.end_reached
    }
}

impl<R: Read> Lzma2Reader<R> {
    /// Creates a reader decoding against a dictionary of `dict_size` bytes.
    pub fn new(inner: R, dict_size: u32) -> Self {
        Self {
            inner,
            dict: LzDict::new(dict_size),
            rc: RangeDecoder::new_unprimed(ChunkSource::new()),
            dec: None,
            kind: ChunkKind::Uncompressed,
            chunk_remaining: 0,
            need_dict_reset: true,
            need_props: true,
            end_reached: false,
            error: None,
        }
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.inner.read_exact(&mut buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::UnexpectedEof
            } else {
                Error::Io(e)
            }
        })?;
        Ok(buf[0])
    }

    fn read_u16_be(&mut self) -> Result<u16> {
        let hi = self.read_u8()?;
        let lo = self.read_u8()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    fn decode_chunk_header(&mut self) -> Result<()> {
        let control = self.read_u8()?;

        if control == CONTROL_EOS {
            self.end_reached = true;
            return Ok(());
        }

        if control >= 0xE0 || control == 0x01 {
            // Dictionary reset; fresh properties are mandatory afterwards.
            self.need_props = true;
            self.need_dict_reset = false;
            self.dict.reset();
        } else if self.need_dict_reset {
            return Err(Error::corrupt(
                self.dict.head(),
                Corruption::BadChunkHeader,
            ));
        }

        if control >= 0x80 {
            self.kind = ChunkKind::Lzma;
            self.chunk_remaining = ((control & 0x1F) as usize) << 16;
            self.chunk_remaining += self.read_u16_be()? as usize + 1;
            let compressed_size = self.read_u16_be()? as usize + 1;
            debug_assert!(compressed_size <= CHUNK_COMPRESSED_MAX);

            if control >= 0xC0 {
                let props = Properties::unpack(self.read_u8()?)?;
                props.verify(true).map_err(|_| {
                    Error::corrupt(self.dict.head(), Corruption::BadChunkHeader)
                })?;
                match self.dec.as_mut() {
                    Some(dec) => dec.set_props(props),
                    None => self.dec = Some(RawDecoder::new(props)),
                }
                self.need_props = false;
            } else if self.need_props {
                return Err(Error::corrupt(
                    self.dict.head(),
                    Corruption::BadChunkHeader,
                ));
            } else if control >= 0xA0 {
                if let Some(dec) = self.dec.as_mut() {
                    dec.reset_state();
                }
            }

            trace!(
                "lzma2 chunk {:#04x}: {} <- {} bytes",
                control,
                self.chunk_remaining,
                compressed_size
            );
            self.rc
                .source_mut()
                .reload(&mut self.inner, compressed_size)?;
            self.rc.prepare()?;
        } else if control > 0x02 {
            return Err(Error::corrupt(
                self.dict.head(),
                Corruption::BadChunkHeader,
            ));
        } else {
            self.kind = ChunkKind::Uncompressed;
            self.chunk_remaining = self.read_u16_be()? as usize + 1;
            trace!("lzma2 uncompressed chunk: {} bytes", self.chunk_remaining);
        }
        Ok(())
    }

    fn read_inner(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(err) = &self.error {
            return Err(err.replay());
        }
        let mut total = 0;
        while total < buf.len() && !self.end_reached {
            if self.chunk_remaining == 0 {
                self.decode_chunk_header()?;
                continue;
            }

            let want = (buf.len() - total).min(self.chunk_remaining);
            self.dict.set_limit(want);
            match self.kind {
                ChunkKind::Uncompressed => {
                    let inner = &mut self.inner;
                    self.dict.copy_uncompressed(inner, want)?;
                }
                ChunkKind::Lzma => {
                    let dec = self.dec.as_mut().ok_or_else(|| {
                        Error::corrupt(self.dict.head(), Corruption::BadChunkHeader)
                    })?;
                    if dec.decode_into(&mut self.rc, &mut self.dict)?
                        == DecodeOutcome::EndMarker
                    {
                        return Err(Error::corrupt(
                            self.dict.head(),
                            Corruption::UnexpectedEos,
                        ));
                    }
                }
            }

            let n = self.dict.flush(&mut buf[total..total + want]);
            total += n;
            self.chunk_remaining -= n;

            if self.chunk_remaining == 0 && self.kind == ChunkKind::Lzma {
                self.rc.align_end()?;
                if !self.rc.finished_clean() || self.dict.has_pending() {
                    return Err(Error::corrupt(
                        self.dict.head(),
                        Corruption::WrongCompressedSize,
                    ));
                }
            }
        }
        Ok(total)
    }
}

impl<R: Read> Read for Lzma2Reader<R> {
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
