//! LZMA2 chunked compressor.

use std::io::{self, Write};

use log::trace;

use super::{
    CHUNK_COMPRESSED_MAX, CHUNK_UNCOMPRESSED_MAX, CHUNK_UNCOMPRESSED_PAYLOAD_MAX, CONTROL_EOS,
    CONTROL_LZMA, CONTROL_LZMA_RESET_ALL, CONTROL_LZMA_RESET_PROPS, CONTROL_LZMA_RESET_STATE,
    CONTROL_UNCOMPRESSED, CONTROL_UNCOMPRESSED_RESET_DICT,
};
use crate::codec::lzma::RawEncoder;
use crate::codec::rangecoder::RangeEncoder;
use crate::options::LzmaOptions;
use crate::{Error, Result};

/// A single-threaded LZMA2 compressor.
///
/// Buffers input in the encoder window and emits one chunk whenever a full
/// chunk's worth is pending. Each chunk is encoded, measured, and written
/// as an uncompressed chunk instead whenever that is not larger. The first
/// chunk resets the dictionary; [`flush`](Write::flush) ends the current
/// chunk so that everything written so far is decodable; closing writes the
/// 0x00 end marker.
pub struct Lzma2Writer<W: Write> {
    inner: W,
    enc: RawEncoder,
    rc: RangeEncoder,
    props_byte: u8,
    dict_size: u32,
    /// Uncompressed bytes that trigger a chunk write.
    chunk_trigger: usize,
    need_dict_reset: bool,
    need_state_reset: bool,
    need_props: bool,
    finished: bool,
    error: Option<Error>,
}

impl<W: Write> Lzma2Writer<W> {
    /// Creates a writer; defaults are applied to and the result verified
    /// against a private copy of `options`.
    pub fn new(inner: W, options: &LzmaOptions) -> Result<Self> {
        let mut options = options.clone();
        options.apply_defaults();
        options.verify(true)?;

        let props = options.props();
        let buf = options.buf();
        let chunk_trigger = CHUNK_UNCOMPRESSED_MAX
            .min(options.dict_size as usize)
            .min(buf.lookahead());

        Ok(Self {
            inner,
            enc: RawEncoder::new(props, options.parser_kind(), buf),
            rc: RangeEncoder::new(),
            props_byte: props.pack(),
            dict_size: options.dict_size,
            chunk_trigger,
            need_dict_reset: true,
            need_state_reset: true,
            need_props: true,
            finished: false,
            error: None,
        })
    }

    /// The dictionary size this writer encodes against.
    pub fn dict_size(&self) -> u32 {
        self.dict_size
    }

    /// Returns the inner writer without writing the end marker.
    pub fn into_inner(self) -> W {
        self.inner
    }

    fn guard(&self) -> Result<()> {
        if let Some(err) = &self.error {
            return Err(err.replay());
        }
        if self.finished {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn write_lzma_chunk(&mut self, data: &[u8], uncompressed: usize) -> Result<()> {
        let control = if self.need_props {
            if self.need_dict_reset {
                CONTROL_LZMA_RESET_ALL
            } else {
                CONTROL_LZMA_RESET_PROPS
            }
        } else if self.need_state_reset {
            CONTROL_LZMA_RESET_STATE
        } else {
            CONTROL_LZMA
        };

        let u = (uncompressed - 1) as u32;
        let c = (data.len() - 1) as u16;
        let mut header = [0u8; 6];
        header[0] = control | (u >> 16) as u8;
        header[1..3].copy_from_slice(&(u as u16).to_be_bytes());
        header[3..5].copy_from_slice(&c.to_be_bytes());
        let header_len = if self.need_props {
            header[5] = self.props_byte;
            6
        } else {
            5
        };

        self.inner.write_all(&header[..header_len])?;
        self.inner.write_all(data)?;

        self.need_dict_reset = false;
        self.need_state_reset = false;
        self.need_props = false;
        Ok(())
    }

    fn write_uncompressed_chunks(&mut self, total: usize) -> Result<()> {
        let data = self.enc.recent(total).to_vec();
        let mut off = 0;
        while off < total {
            let n = (total - off).min(CHUNK_UNCOMPRESSED_PAYLOAD_MAX);
            let control = if self.need_dict_reset {
                CONTROL_UNCOMPRESSED_RESET_DICT
            } else {
                CONTROL_UNCOMPRESSED
            };
            let mut header = [0u8; 3];
            header[0] = control;
            header[1..3].copy_from_slice(&((n - 1) as u16).to_be_bytes());
            self.inner.write_all(&header)?;
            self.inner.write_all(&data[off..off + n])?;
            self.need_dict_reset = false;
            off += n;
        }
        // The coder state diverged from what was written; the next LZMA
        // chunk must reset it.
        self.enc.reset_state();
        self.need_state_reset = true;
        Ok(())
    }

    /// Encodes and writes one chunk from the pending window data.
    fn write_chunk(&mut self) -> Result<()> {
        if self.enc.pending() == 0 {
            return Ok(());
        }
        let outcome = self.enc.encode_ops(
            &mut self.rc,
            self.chunk_trigger as u32,
            Some(CHUNK_COMPRESSED_MAX),
        );
        let uncompressed = outcome.produced as usize;
        debug_assert!(uncompressed > 0);
        let data = self.rc.finish_chunk();

        let header_len = if self.need_props { 6 } else { 5 };
        trace!(
            "lzma2 chunk: {} -> {} bytes{}",
            uncompressed,
            data.len(),
            if outcome.limit_reached { " (cap)" } else { "" },
        );
        if 3 + uncompressed <= header_len + data.len() {
            self.write_uncompressed_chunks(uncompressed)
        } else {
            self.write_lzma_chunk(&data, uncompressed)
        }
    }

    fn write_inner(&mut self, buf: &[u8]) -> Result<usize> {
        self.guard()?;
        let mut off = 0;
        while off < buf.len() {
            off += self.enc.fill(&buf[off..]);
            while self.enc.pending() >= self.chunk_trigger {
                self.write_chunk()?;
            }
        }
        Ok(off)
    }

    fn flush_inner(&mut self) -> Result<()> {
        self.guard()?;
        while self.enc.pending() > 0 {
            self.write_chunk()?;
        }
        self.inner.flush()?;
        Ok(())
    }

    /// Drains pending data, writes the end-of-stream byte and returns the
    /// inner writer.
    pub fn finish(mut self) -> Result<W> {
        self.guard()?;
        while self.enc.pending() > 0 {
            self.write_chunk()?;
        }
        self.inner.write_all(&[CONTROL_EOS])?;
        self.finished = true;
        Ok(self.inner)
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.error = Some(err.replay());
        }
        result
    }
}

impl<W: Write> Write for Lzma2Writer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.write_inner(buf);
        self.record(result).map_err(Error::into_io)
    }

    fn flush(&mut self) -> io::Result<()> {
        let result = self.flush_inner();
        self.record(result).map_err(Error::into_io)
    }
}

/// An LZMA2 writer that stores everything in uncompressed chunks.
///
/// Useful when the data is known to be incompressible and only the framing
/// is wanted.
pub struct Lzma2UncompressedWriter<W: Write> {
    inner: W,
    buf: Vec<u8>,
    first: bool,
    finished: bool,
}

impl<W: Write> Lzma2UncompressedWriter<W> {
    /// Creates a passthrough writer.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(CHUNK_UNCOMPRESSED_PAYLOAD_MAX),
            first: true,
            finished: false,
        }
    }

    fn emit_chunk(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let control = if self.first {
            CONTROL_UNCOMPRESSED_RESET_DICT
        } else {
            CONTROL_UNCOMPRESSED
        };
        let mut header = [0u8; 3];
        header[0] = control;
        header[1..3].copy_from_slice(&((self.buf.len() - 1) as u16).to_be_bytes());
        self.inner.write_all(&header)?;
        self.inner.write_all(&self.buf)?;
        self.buf.clear();
        self.first = false;
        Ok(())
    }

    /// Flushes buffered bytes and writes the end-of-stream byte.
    pub fn finish(mut self) -> io::Result<W> {
        if self.finished {
            return Err(Error::Closed.into_io());
        }
        self.emit_chunk()?;
        self.inner.write_all(&[CONTROL_EOS])?;
        self.finished = true;
        Ok(self.inner)
    }
}

impl<W: Write> Write for Lzma2UncompressedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.finished {
            return Err(Error::Closed.into_io());
        }
        let mut off = 0;
        while off < buf.len() {
            let room = CHUNK_UNCOMPRESSED_PAYLOAD_MAX - self.buf.len();
            let take = room.min(buf.len() - off);
            self.buf.extend_from_slice(&buf[off..off + take]);
            off += take;
            if self.buf.len() == CHUNK_UNCOMPRESSED_PAYLOAD_MAX {
                self.emit_chunk()?;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.emit_chunk()?;
        self.inner.flush()
    }
}
