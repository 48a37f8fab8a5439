//! XZ stream writer.

use std::io::{self, Write};

use log::debug;

use crate::checksum::{CheckKind, CheckSink, CountingWriter};
use crate::lzma2::Lzma2Writer;
use crate::options::{LzmaOptions, WriterOptions};
use crate::xz::block::BlockHeader;
use crate::xz::index::{self, IndexRecord};
use crate::xz::stream::{self, StreamFlags};
use crate::{Error, Result};

/// Compresses `data` as one complete XZ block (header, LZMA2 body,
/// padding, check) into `out`, returning its index record.
///
/// This is the unit of work of the block-parallel writer: each worker
/// builds an independent block and the output thread only concatenates.
pub(crate) fn compress_block(
    data: &[u8],
    lzma: &LzmaOptions,
    check: CheckKind,
    out: &mut Vec<u8>,
) -> Result<IndexRecord> {
    let header_len = BlockHeader::streaming(lzma.dict_size).encode(out)?;

    let body_start = out.len();
    let mut writer = Lzma2Writer::new(&mut *out, lzma)?;
    writer.write_all(data).map_err(Error::Io)?;
    writer.finish()?;
    let body_len = out.len() - body_start;

    let padding = body_len.wrapping_neg() % 4;
    out.resize(out.len() + padding, 0);

    let mut sink = CheckSink::new(check);
    sink.update(data);
    out.extend_from_slice(&sink.finish());

    Ok(IndexRecord {
        unpadded_size: (header_len + body_len + check.len()) as u64,
        uncompressed_size: data.len() as u64,
    })
}

enum BlockState<W: Write> {
    /// Between blocks; owns the output.
    Idle(W),
    /// Inside a block; the LZMA2 writer owns the output through a byte
    /// counter.
    InBlock {
        lz: Lzma2Writer<CountingWriter<W>>,
        header_len: usize,
    },
    /// Transient during state changes and terminal after errors.
    Poisoned,
}

/// A single-threaded XZ compressor.
///
/// Input is split into blocks of `block_size` bytes (a single block when
/// unset). Every block gets its own check; the index and footer are
/// written at [`finish`](Self::finish).
pub struct XzWriter<W: Write> {
    state: BlockState<W>,
    lzma: LzmaOptions,
    flags: StreamFlags,
    block_size: Option<u64>,
    records: Vec<IndexRecord>,
    check: CheckSink,
    block_uncompressed: u64,
    header_written: bool,
    finished: bool,
    error: Option<Error>,
}

impl<W: Write> XzWriter<W> {
    /// Creates a writer; defaults are applied to and the result verified
    /// against a private copy of `options`.
    pub fn new(inner: W, options: &WriterOptions) -> Result<Self> {
        let mut options = options.clone();
        options.apply_defaults();
        options.verify()?;

        Ok(Self {
            state: BlockState::Idle(inner),
            flags: StreamFlags {
                check: options.checksum,
            },
            check: CheckSink::new(options.checksum),
            lzma: options.lzma.clone(),
            block_size: options.block_size,
            records: Vec::new(),
            block_uncompressed: 0,
            header_written: false,
            finished: false,
            error: None,
        })
    }

    /// The dictionary size blocks are encoded against.
    pub fn dict_size(&self) -> u32 {
        self.lzma.dict_size
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

    fn start_block(&mut self) -> Result<()> {
        let BlockState::Idle(mut inner) = std::mem::replace(&mut self.state, BlockState::Poisoned)
        else {
            return Err(Error::format("internal writer state"));
        };
        if !self.header_written {
            stream::write_header(&mut inner, self.flags)?;
            self.header_written = true;
        }

        let mut header = Vec::with_capacity(16);
        let header_len = BlockHeader::streaming(self.lzma.dict_size).encode(&mut header)?;
        inner.write_all(&header)?;

        let lz = Lzma2Writer::new(CountingWriter::new(inner), &self.lzma)?;
        self.state = BlockState::InBlock { lz, header_len };
        self.block_uncompressed = 0;
        Ok(())
    }

    fn finish_block(&mut self) -> Result<()> {
        let BlockState::InBlock { lz, header_len } =
            std::mem::replace(&mut self.state, BlockState::Poisoned)
        else {
            return Err(Error::format("internal writer state"));
        };
        let counting = lz.finish()?;
        let body_len = counting.count();
        let mut inner = counting.into_inner();

        let padding = (body_len as usize).wrapping_neg() % 4;
        inner.write_all(&[0u8; 3][..padding])?;

        let sink = std::mem::replace(&mut self.check, CheckSink::new(self.flags.check));
        inner.write_all(&sink.finish())?;

        let record = IndexRecord {
            unpadded_size: header_len as u64 + body_len + self.flags.check.len() as u64,
            uncompressed_size: self.block_uncompressed,
        };
        debug!(
            "xz block {}: {} -> {} bytes",
            self.records.len(),
            record.uncompressed_size,
            record.unpadded_size
        );
        self.records.push(record);
        self.state = BlockState::Idle(inner);
        Ok(())
    }

    fn write_inner(&mut self, buf: &[u8]) -> Result<usize> {
        self.guard()?;
        let mut off = 0;
        while off < buf.len() {
            if matches!(self.state, BlockState::Idle(_)) {
                self.start_block()?;
            }

            let mut take = buf.len() - off;
            if let Some(block_size) = self.block_size {
                let room = (block_size - self.block_uncompressed) as usize;
                take = take.min(room);
            }

            let BlockState::InBlock { lz, .. } = &mut self.state else {
                return Err(Error::format("internal writer state"));
            };
            lz.write_all(&buf[off..off + take])?;
            self.check.update(&buf[off..off + take]);
            self.block_uncompressed += take as u64;
            off += take;

            if self.block_size == Some(self.block_uncompressed) {
                self.finish_block()?;
            }
        }
        Ok(off)
    }

    fn flush_inner(&mut self) -> Result<()> {
        self.guard()?;
        match &mut self.state {
            BlockState::Idle(inner) => inner.flush()?,
            BlockState::InBlock { lz, .. } => lz.flush()?,
            BlockState::Poisoned => return Err(Error::format("internal writer state")),
        }
        Ok(())
    }

    fn finish_inner(&mut self) -> Result<W> {
        self.guard()?;
        if matches!(self.state, BlockState::InBlock { .. }) {
            self.finish_block()?;
        }
        let BlockState::Idle(mut inner) = std::mem::replace(&mut self.state, BlockState::Poisoned)
        else {
            return Err(Error::format("internal writer state"));
        };
        if !self.header_written {
            stream::write_header(&mut inner, self.flags)?;
            self.header_written = true;
        }

        let mut tail = Vec::with_capacity(32);
        index::encode(&self.records, &mut tail)?;
        inner.write_all(&tail)?;
        stream::write_footer(&mut inner, self.flags, index::backward_size(&self.records))?;
        self.finished = true;
        Ok(inner)
    }

    /// Closes any open block, writes the index and footer and returns the
    /// inner writer.
    pub fn finish(mut self) -> Result<W> {
        let result = self.finish_inner();
        if let Err(err) = &result {
            self.error = Some(err.replay());
        }
        result
    }

    fn record_err<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.error = Some(err.replay());
        }
        result
    }
}

impl<W: Write> Write for XzWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.write_inner(buf);
        self.record_err(result).map_err(Error::into_io)
    }

    fn flush(&mut self) -> io::Result<()> {
        let result = self.flush_inner();
        self.record_err(result).map_err(Error::into_io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xz::stream::{FOOTER_MAGIC, MAGIC};

    #[test]
    fn test_empty_stream_is_32_bytes() {
        let writer = XzWriter::new(Vec::new(), &WriterOptions::default()).unwrap();
        let out = writer.finish().unwrap();
        assert_eq!(out.len(), 32);
        assert_eq!(&out[..6], &MAGIC);
        assert_eq!(&out[30..], &FOOTER_MAGIC);
    }

    #[test]
    fn test_single_block_layout() {
        let mut writer = XzWriter::new(Vec::new(), &WriterOptions::default()).unwrap();
        writer.write_all(b"payload bytes").unwrap();
        let out = writer.finish().unwrap();
        assert_eq!(&out[..6], &MAGIC);
        assert_eq!(&out[out.len() - 2..], &FOOTER_MAGIC);
        // Default check is CRC64 (id 4) in the stream flags.
        assert_eq!(out[7], 0x04);
    }

    #[test]
    fn test_block_splitting() {
        let options = WriterOptions {
            block_size: Some(1024),
            ..WriterOptions::default()
        };
        let mut writer = XzWriter::new(Vec::new(), &options).unwrap();
        writer.write_all(&vec![b'r'; 4096]).unwrap();
        assert_eq!(writer.records.len(), 4);
        let out = writer.finish().unwrap();
        assert!(!out.is_empty());
    }

    #[test]
    fn test_compress_block_unit() {
        let mut lzma = LzmaOptions::default();
        lzma.apply_defaults();
        let mut out = Vec::new();
        let record =
            compress_block(b"block payload", &lzma, CheckKind::Crc32, &mut out).unwrap();
        assert_eq!(record.uncompressed_size, 13);
        // header + body + check, all on-wire bytes minus alignment padding.
        assert!(record.unpadded_size <= out.len() as u64);
        assert_eq!(out.len() % 4, 0);
    }

    #[test]
    fn test_finish_after_data_grows_stream() {
        let mut writer = XzWriter::new(Vec::new(), &WriterOptions::default()).unwrap();
        writer.write_all(b"x").unwrap();
        let out = writer.finish().unwrap();
        assert!(out.len() > 32);
    }
}
