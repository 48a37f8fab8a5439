//! XZ stream reader.

use std::io::{self, Read};

use log::debug;

use crate::checksum::{CheckSink, CountingReader};
use crate::lzma2::Lzma2Reader;
use crate::options::ReaderOptions;
use crate::xz::block::BlockHeader;
use crate::xz::index::{self, IndexRecord};
use crate::xz::stream::{self, StreamFlags};
use crate::{Error, Result};

struct BlockReader<R> {
    lz: Lzma2Reader<CountingReader<R>>,
    header: BlockHeader,
    header_len: usize,
    check: CheckSink,
    uncompressed: u64,
}

enum Inner<R> {
    /// Positioned at a block-header size byte or the index indicator.
    Idle(R),
    /// Inside a block body.
    Block(Box<BlockReader<R>>),
    /// All streams consumed.
    Done(R),
    /// Transient during state changes and terminal after errors.
    Poisoned,
}

/// A streaming XZ decompressor.
///
/// Verifies everything the format allows it to verify: header and footer
/// CRCs, block header CRCs, block checks of the declared kind, declared
/// block sizes, the index against the blocks actually read, and the
/// footer's backward size. Concatenated streams and stream padding are
/// consumed transparently unless `single_stream` is set.
pub struct XzReader<R> {
    inner: Inner<R>,
    opts: ReaderOptions,
    flags: StreamFlags,
    records: Vec<IndexRecord>,
    streams: u64,
    error: Option<Error>,
}

impl<R: Read> XzReader<R> {
    /// Reads and validates the first stream header.
    pub fn new(mut inner: R, options: &ReaderOptions) -> Result<Self> {
        let mut options = options.clone();
        options.apply_defaults();
        options.verify()?;

        let flags = stream::read_header(&mut inner)?;
        Ok(Self {
            inner: Inner::Idle(inner),
            opts: options,
            flags,
            records: Vec::new(),
            streams: 0,
            error: None,
        })
    }

    /// The check kind of the current stream.
    pub fn check(&self) -> crate::checksum::CheckKind {
        self.flags.check
    }

    /// Completed streams so far.
    pub fn streams(&self) -> u64 {
        self.streams
    }

    /// Returns the underlying reader.
    pub fn into_inner(self) -> R {
        match self.inner {
            Inner::Idle(r) | Inner::Done(r) => r,
            Inner::Block(block) => block.lz.into_inner().into_inner(),
            Inner::Poisoned => unreachable!("reader poisoned"),
        }
    }

    fn start_block(&mut self, size_byte: u8) -> Result<()> {
        let Inner::Idle(mut inner) = std::mem::replace(&mut self.inner, Inner::Poisoned) else {
            return Err(Error::format("internal reader state"));
        };
        let (header, header_len) = BlockHeader::decode(&mut inner, size_byte)?;
        debug!(
            "xz block: dict {} KiB, sizes {:?}/{:?}",
            header.dict_size / 1024,
            header.compressed_size,
            header.uncompressed_size
        );
        let lz = Lzma2Reader::new(CountingReader::new(inner), header.dict_size);
        self.inner = Inner::Block(Box::new(BlockReader {
            lz,
            header,
            header_len,
            check: CheckSink::new(self.flags.check),
            uncompressed: 0,
        }));
        Ok(())
    }

    fn end_block(&mut self) -> Result<()> {
        let Inner::Block(block) = std::mem::replace(&mut self.inner, Inner::Poisoned) else {
            return Err(Error::format("internal reader state"));
        };
        let BlockReader {
            lz,
            header,
            header_len,
            check,
            uncompressed,
        } = *block;
        let counting = lz.into_inner();
        let body_len = counting.count();
        let mut inner = counting.into_inner();

        if let Some(declared) = header.compressed_size {
            if declared != body_len {
                return Err(Error::SizeMismatch {
                    what: "block compressed size",
                    declared,
                    actual: body_len,
                });
            }
        }
        if let Some(declared) = header.uncompressed_size {
            if declared != uncompressed {
                return Err(Error::SizeMismatch {
                    what: "block uncompressed size",
                    declared,
                    actual: uncompressed,
                });
            }
        }

        let padding = (body_len as usize).wrapping_neg() % 4;
        let mut pad = [0u8; 3];
        inner
            .read_exact(&mut pad[..padding])
            .map_err(stream::map_eof)?;
        if pad[..padding].iter().any(|&b| b != 0) {
            return Err(Error::format("non-zero block padding"));
        }

        let mut stored = [0u8; 32];
        let check_len = self.flags.check.len();
        inner
            .read_exact(&mut stored[..check_len])
            .map_err(stream::map_eof)?;
        check.verify(&stored[..check_len])?;

        self.records.push(IndexRecord {
            unpadded_size: header_len as u64 + body_len + check_len as u64,
            uncompressed_size: uncompressed,
        });
        self.inner = Inner::Idle(inner);
        Ok(())
    }

    /// Handles the index, footer and whatever follows: padding, another
    /// stream, or end of input.
    fn finish_stream(&mut self) -> Result<()> {
        let Inner::Idle(mut inner) = std::mem::replace(&mut self.inner, Inner::Poisoned) else {
            return Err(Error::format("internal reader state"));
        };

        let (decoded, index_size) = index::decode(&mut inner)?;
        index::verify(&decoded, &self.records)?;

        let (footer_flags, backward) = stream::read_footer(&mut inner)?;
        if footer_flags != self.flags {
            return Err(Error::format("stream footer flags differ from header"));
        }
        let actual_backward = (index_size / 4 - 1) as u32;
        if backward != actual_backward {
            return Err(Error::SizeMismatch {
                what: "backward size",
                declared: backward as u64,
                actual: actual_backward as u64,
            });
        }

        self.streams += 1;
        self.records.clear();
        debug!("xz stream {} complete", self.streams);

        if self.opts.single_stream {
            let mut probe = [0u8; 1];
            return match inner.read(&mut probe) {
                Ok(0) => {
                    self.inner = Inner::Done(inner);
                    Ok(())
                }
                Ok(_) => Err(Error::format("data after single stream")),
                Err(e) => Err(Error::Io(e)),
            };
        }

        // Stream padding is made of zeroed 4-byte words; the first non-zero
        // word must open the next stream's magic.
        loop {
            let mut word = [0u8; 4];
            let n = inner.read(&mut word)?;
            if n == 0 {
                self.inner = Inner::Done(inner);
                return Ok(());
            }
            inner.read_exact(&mut word[n..]).map_err(stream::map_eof)?;
            if word == [0, 0, 0, 0] {
                continue;
            }
            let mut header = [0u8; stream::HEADER_LEN];
            header[..4].copy_from_slice(&word);
            inner
                .read_exact(&mut header[4..])
                .map_err(stream::map_eof)?;
            self.flags = stream::read_header_bytes(&header)?;
            self.inner = Inner::Idle(inner);
            return Ok(());
        }
    }

    fn read_inner(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(err) = &self.error {
            return Err(err.replay());
        }
        loop {
            match &mut self.inner {
                Inner::Done(_) => return Ok(0),
                Inner::Idle(inner) => {
                    let mut size_byte = [0u8; 1];
                    inner.read_exact(&mut size_byte).map_err(stream::map_eof)?;
                    if size_byte[0] == 0x00 {
                        self.finish_stream()?;
                    } else {
                        self.start_block(size_byte[0])?;
                    }
                }
                Inner::Block(block) => {
                    let n = block.lz.read(buf).map_err(|e| {
                        if e.kind() == io::ErrorKind::UnexpectedEof {
                            Error::UnexpectedEof
                        } else {
                            Error::Io(e)
                        }
                    })?;
                    if n == 0 {
                        self.end_block()?;
                        continue;
                    }
                    block.check.update(&buf[..n]);
                    block.uncompressed += n as u64;
                    return Ok(n);
                }
                Inner::Poisoned => return Err(Error::format("internal reader state")),
            }
        }
    }
}

impl<R: Read> Read for XzReader<R> {
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
    use crate::checksum::CheckKind;
    use crate::options::WriterOptions;
    use crate::xz::XzWriter;
    use std::io::Write;

    fn compress(data: &[u8], options: &WriterOptions) -> Vec<u8> {
        let mut writer = XzWriter::new(Vec::new(), options).unwrap();
        writer.write_all(data).unwrap();
        writer.finish().unwrap()
    }

    fn decompress(stream: &[u8]) -> io::Result<Vec<u8>> {
        let mut reader =
            XzReader::new(std::io::Cursor::new(stream.to_vec()), &ReaderOptions::default())
                .unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_roundtrip_empty() {
        let stream = compress(b"", &WriterOptions::default());
        assert_eq!(stream.len(), 32);
        assert_eq!(decompress(&stream).unwrap(), b"");
    }

    #[test]
    fn test_roundtrip_text() {
        let data = b"The quick brown fox jumps over the lazy dog.\n".repeat(100);
        let stream = compress(&data, &WriterOptions::default());
        assert!(stream.len() < data.len());
        assert_eq!(decompress(&stream).unwrap(), data);
    }

    #[test]
    fn test_roundtrip_all_checks() {
        let data = b"check this payload".repeat(32);
        for check in [
            CheckKind::None,
            CheckKind::Crc32,
            CheckKind::Crc64,
            CheckKind::Sha256,
        ] {
            let options = WriterOptions {
                checksum: check,
                ..WriterOptions::default()
            };
            let stream = compress(&data, &options);
            assert_eq!(decompress(&stream).unwrap(), data, "check {check}");
        }
    }

    #[test]
    fn test_roundtrip_multi_block() {
        let options = WriterOptions {
            block_size: Some(4096),
            ..WriterOptions::default()
        };
        let data = vec![b'm'; 20_000];
        let stream = compress(&data, &options);
        assert_eq!(decompress(&stream).unwrap(), data);
    }

    #[test]
    fn test_concatenated_streams() {
        let mut stream = compress(b"first stream ", &WriterOptions::default());
        // Stream padding between streams is allowed in 4-byte words.
        stream.extend_from_slice(&[0u8; 8]);
        stream.extend_from_slice(&compress(b"second stream", &WriterOptions::default()));

        let mut reader =
            XzReader::new(std::io::Cursor::new(stream), &ReaderOptions::default()).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"first stream second stream");
        assert_eq!(reader.streams(), 2);
    }

    #[test]
    fn test_single_stream_rejects_trailer() {
        let mut stream = compress(b"lonely", &WriterOptions::default());
        stream.extend_from_slice(&[0u8; 4]);

        let opts = ReaderOptions {
            single_stream: true,
        };
        let mut reader = XzReader::new(std::io::Cursor::new(stream), &opts).unwrap();
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
    }

    #[test]
    fn test_truncated_stream() {
        let stream = compress(b"will truncate this", &WriterOptions::default());
        let cut = &stream[..stream.len() - 10];
        assert!(decompress(cut).is_err());
    }

    #[test]
    fn test_corrupt_block_check() {
        let data = b"The quick brown fox jumps over the lazy dog.\n";
        let stream = compress(data, &WriterOptions::default());
        // Layout from the tail: footer (12) + index (8 for one small
        // block) + the CRC64 check (8) at the end of the block.
        let mut corrupted = stream.clone();
        let check_at = stream.len() - 12 - 8 - 8;
        corrupted[check_at] ^= 0x40;
        assert!(decompress(&corrupted).is_err());
    }

    #[test]
    fn test_garbage_after_footer_rejected() {
        let mut stream = compress(b"data", &WriterOptions::default());
        stream.extend_from_slice(&[1, 2, 3, 4]);
        // A non-zero padding word that is not a stream magic.
        assert!(decompress(&stream).is_err());
    }
}
