//! Legacy `.lzma` compressor.

use std::io::{self, Write};

use super::SIZE_UNKNOWN;
use crate::codec::lzma::RawEncoder;
use crate::codec::rangecoder::RangeEncoder;
use crate::options::LzmaOptions;
use crate::{Error, Result};

/// A single-stream `.lzma` compressor.
///
/// Without a declared size the header carries the all-ones sentinel and the
/// payload ends with the end-of-stream marker; with one, the byte count is
/// verified at close and no marker is written.
pub struct LzmaWriter<W: Write> {
    inner: W,
    enc: RawEncoder,
    rc: RangeEncoder,
    declared_size: Option<u64>,
    dict_size: u32,
    /// Parse/encode batch size; encoding only at full batches keeps the
    /// output independent of the caller's write granularity.
    batch: usize,
    header_written: bool,
    props_byte: u8,
    finished: bool,
    error: Option<Error>,
}

impl<W: Write> LzmaWriter<W> {
    /// Creates a writer with an unknown uncompressed size (end-of-stream
    /// marker emitted at close).
    pub fn new(inner: W, options: &LzmaOptions) -> Result<Self> {
        Self::construct(inner, options, None)
    }

    /// Creates a writer that declares `uncompressed_size` in the header.
    pub fn with_size(inner: W, options: &LzmaOptions, uncompressed_size: u64) -> Result<Self> {
        Self::construct(inner, options, Some(uncompressed_size))
    }

    fn construct(inner: W, options: &LzmaOptions, size: Option<u64>) -> Result<Self> {
        let mut options = options.clone();
        options.apply_defaults();
        // The legacy format has no lc + lp restriction.
        options.verify(false)?;

        let props = options.props();
        let buf = options.buf();
        Ok(Self {
            inner,
            enc: RawEncoder::new(props, options.parser_kind(), buf),
            rc: RangeEncoder::new(),
            declared_size: size,
            dict_size: options.dict_size,
            batch: buf.lookahead(),
            header_written: false,
            props_byte: props.pack(),
            finished: false,
            error: None,
        })
    }

    /// The dictionary size declared in the header.
    pub fn dict_size(&self) -> u32 {
        self.dict_size
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

    fn write_header(&mut self) -> Result<()> {
        if self.header_written {
            return Ok(());
        }
        let mut header = [0u8; super::HEADER_LEN];
        header[0] = self.props_byte;
        header[1..5].copy_from_slice(&self.dict_size.to_le_bytes());
        let size = self.declared_size.unwrap_or(SIZE_UNKNOWN);
        header[5..13].copy_from_slice(&size.to_le_bytes());
        self.inner.write_all(&header)?;
        self.header_written = true;
        Ok(())
    }

    fn write_inner(&mut self, buf: &[u8]) -> Result<usize> {
        self.guard()?;
        self.write_header()?;
        let mut off = 0;
        while off < buf.len() {
            off += self.enc.fill(&buf[off..]);
            while self.enc.pending() >= self.batch {
                self.enc.encode_ops(&mut self.rc, self.batch as u32, None);
                let out = self.rc.drain();
                self.inner.write_all(&out)?;
            }
        }
        Ok(off)
    }

    fn finish_inner(&mut self) -> Result<()> {
        self.guard()?;
        self.write_header()?;
        while self.enc.pending() > 0 {
            self.enc.encode_ops(&mut self.rc, u32::MAX, None);
        }
        if let Some(declared) = self.declared_size {
            let actual = self.enc.pos();
            if actual != declared {
                return Err(Error::SizeMismatch {
                    what: "uncompressed size",
                    declared,
                    actual,
                });
            }
        } else {
            self.enc.encode_eos(&mut self.rc);
        }
        let tail = self.rc.finish_chunk();
        self.inner.write_all(&tail)?;
        self.finished = true;
        Ok(())
    }

    /// Drains pending data, terminates the payload and returns the inner
    /// writer.
    pub fn finish(mut self) -> Result<W> {
        let result = self.finish_inner();
        self.record(result)?;
        Ok(self.inner)
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.error = Some(err.replay());
        }
        result
    }
}

impl<W: Write> Write for LzmaWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.write_inner(buf);
        self.record(result).map_err(Error::into_io)
    }

    fn flush(&mut self) -> io::Result<()> {
        // The raw payload cannot end a coder run mid-stream; only buffered
        // output bytes are pushed down.
        if let Some(err) = &self.error {
            return Err(err.replay().into_io());
        }
        let out = self.rc.drain();
        self.inner.write_all(&out)?;
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout_unknown_size() {
        let opts = LzmaOptions {
            dict_size: 1 << 15,
            ..LzmaOptions::default()
        };
        let mut writer = LzmaWriter::new(Vec::new(), &opts).unwrap();
        writer.write_all(b"x").unwrap();
        let out = writer.finish().unwrap();
        // Packed default properties then 0x8000 little-endian.
        assert_eq!(
            &out[..13],
            &[0x5D, 0x00, 0x80, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        );
        assert!(out.len() > 13);
    }

    #[test]
    fn test_header_layout_declared_size() {
        let mut writer =
            LzmaWriter::with_size(Vec::new(), &LzmaOptions::default(), 5).unwrap();
        writer.write_all(b"abcde").unwrap();
        let out = writer.finish().unwrap();
        assert_eq!(
            u64::from_le_bytes(out[5..13].try_into().unwrap()),
            5
        );
    }

    #[test]
    fn test_declared_size_mismatch_fails() {
        let mut writer =
            LzmaWriter::with_size(Vec::new(), &LzmaOptions::default(), 10).unwrap();
        writer.write_all(b"abc").unwrap();
        let err = writer.finish().unwrap_err();
        assert!(matches!(err, Error::SizeMismatch { declared: 10, actual: 3, .. }));
    }

    #[test]
    fn test_empty_stream_is_at_least_header() {
        let writer = LzmaWriter::new(Vec::new(), &LzmaOptions::default()).unwrap();
        let out = writer.finish().unwrap();
        // Header plus the end-of-stream marker payload.
        assert!(out.len() >= super::super::HEADER_LEN);
    }
}
