//! Streamed XZ statistics.
//!
//! Walks an XZ file sequentially, firing callbacks for stream headers,
//! block headers, LZMA2 chunk headers, index records and stream footers,
//! all without decompressing anything. Chunk payloads are skipped using the
//! sizes declared in their headers, so the walk is cheap even for huge
//! files.

use std::io::{self, Read};

use crate::checksum::{CheckKind, CountingReader};
use crate::xz::block::BlockHeader;
use crate::xz::index::{self, IndexRecord};
use crate::xz::stream::{self, map_eof, StreamFlags};
use crate::{Corruption, Error, Result};

/// Aggregate statistics for a whole file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Info {
    /// Number of streams.
    pub streams: u64,
    /// Number of blocks across all streams.
    pub blocks: u64,
    /// Total compressed bytes, i.e. the file size.
    pub compressed: u64,
    /// Total uncompressed bytes declared by the chunk headers.
    pub uncompressed: u64,
    /// Check kind of the first stream.
    pub check: CheckKind,
}

/// One LZMA2 chunk inside a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    /// The chunk's control byte.
    pub control: u8,
    /// On-wire payload size.
    pub compressed_size: u64,
    /// Uncompressed span the chunk covers.
    pub uncompressed_size: u64,
}

/// Returned by [`Walk::on_block`] to opt out of per-chunk callbacks for
/// that block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    /// Deliver chunk callbacks for this block.
    Continue,
    /// Skip chunk callbacks; the block is still walked for accounting.
    SkipChunks,
}

/// Callbacks fired during a walk. All methods default to no-ops.
pub trait Walk {
    /// A stream header was validated.
    fn on_stream_header(&mut self, _flags: StreamFlags) -> Result<()> {
        Ok(())
    }

    /// A block header was parsed. `index` counts blocks across streams.
    fn on_block(&mut self, _index: u64, _header: &BlockHeader) -> Result<WalkControl> {
        Ok(WalkControl::Continue)
    }

    /// An LZMA2 chunk header was parsed (unless suppressed).
    fn on_chunk(&mut self, _chunk: &ChunkInfo) -> Result<()> {
        Ok(())
    }

    /// An index record was read and verified.
    fn on_record(&mut self, _record: &IndexRecord) -> Result<()> {
        Ok(())
    }

    /// A stream footer was validated.
    fn on_stream_footer(&mut self, _flags: StreamFlags, _backward_size: u32) -> Result<()> {
        Ok(())
    }
}

/// The no-op visitor behind [`stat`].
struct NoVisit;

impl Walk for NoVisit {}

/// Walks `input` to the end, returning aggregate statistics.
pub fn stat<R: Read>(input: R) -> Result<Info> {
    walk(input, &mut NoVisit)
}

fn skip<R: Read>(r: &mut R, n: u64) -> Result<()> {
    let copied = io::copy(&mut r.take(n), &mut io::sink())?;
    if copied != n {
        return Err(Error::UnexpectedEof);
    }
    Ok(())
}

fn read_u8<R: Read>(r: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf).map_err(map_eof)?;
    Ok(buf[0])
}

fn read_u16_be<R: Read>(r: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf).map_err(map_eof)?;
    Ok(u16::from_be_bytes(buf))
}

/// Walks the chunk headers of one block body, returning
/// `(body_len, uncompressed_len)`.
fn walk_chunks<R: Read, W: Walk>(
    r: &mut R,
    visitor: &mut W,
    deliver: bool,
) -> Result<(u64, u64)> {
    let mut body = 0u64;
    let mut uncompressed = 0u64;
    loop {
        let control = read_u8(r)?;
        body += 1;
        if control == 0x00 {
            return Ok((body, uncompressed));
        }

        let chunk = if control >= 0x80 {
            let u = (((control & 0x1F) as u64) << 16) + read_u16_be(r)? as u64 + 1;
            let c = read_u16_be(r)? as u64 + 1;
            body += 4;
            if control >= 0xC0 {
                let _props = read_u8(r)?;
                body += 1;
            }
            skip(r, c)?;
            body += c;
            ChunkInfo {
                control,
                compressed_size: c,
                uncompressed_size: u,
            }
        } else if control <= 0x02 {
            let u = read_u16_be(r)? as u64 + 1;
            body += 2;
            skip(r, u)?;
            body += u;
            ChunkInfo {
                control,
                compressed_size: u,
                uncompressed_size: u,
            }
        } else {
            return Err(Error::corrupt(uncompressed, Corruption::BadChunkHeader));
        };

        uncompressed += chunk.uncompressed_size;
        if deliver {
            visitor.on_chunk(&chunk)?;
        }
    }
}

/// Walks `input` to the end, firing `visitor` callbacks, and returns
/// aggregate statistics.
pub fn walk<R: Read, W: Walk>(input: R, visitor: &mut W) -> Result<Info> {
    let mut r = CountingReader::new(input);
    let mut info = Info::default();

    let mut flags = stream::read_header(&mut r)?;
    info.check = flags.check;

    loop {
        visitor.on_stream_header(flags)?;
        let mut records: Vec<IndexRecord> = Vec::new();

        // Blocks until the index indicator.
        loop {
            let size_byte = read_u8(&mut r)?;
            if size_byte == 0x00 {
                break;
            }
            let (header, header_len) = BlockHeader::decode(&mut r, size_byte)?;
            let control = visitor.on_block(info.blocks, &header)?;
            let (body, uncompressed) =
                walk_chunks(&mut r, visitor, control == WalkControl::Continue)?;

            let padding = (body % 4).wrapping_neg() % 4;
            skip(&mut r, padding)?;
            skip(&mut r, flags.check.len() as u64)?;

            records.push(IndexRecord {
                unpadded_size: header_len as u64 + body + flags.check.len() as u64,
                uncompressed_size: uncompressed,
            });
            info.blocks += 1;
            info.uncompressed += uncompressed;
        }

        let (decoded, index_size) = index::decode(&mut r)?;
        index::verify(&decoded, &records)?;
        for record in &decoded {
            visitor.on_record(record)?;
        }

        let (footer_flags, backward) = stream::read_footer(&mut r)?;
        if footer_flags != flags {
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
        visitor.on_stream_footer(footer_flags, backward)?;
        info.streams += 1;

        // Stream padding, another stream, or end of input.
        loop {
            let mut word = [0u8; 4];
            let n = r.read(&mut word)?;
            if n == 0 {
                info.compressed = r.count();
                return Ok(info);
            }
            r.read_exact(&mut word[n..]).map_err(map_eof)?;
            if word == [0, 0, 0, 0] {
                continue;
            }
            let mut header = [0u8; stream::HEADER_LEN];
            header[..4].copy_from_slice(&word);
            r.read_exact(&mut header[4..]).map_err(map_eof)?;
            flags = stream::read_header_bytes(&header)?;
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::WriterOptions;
    use crate::xz::XzWriter;
    use std::io::Write;

    fn compress(data: &[u8], options: &WriterOptions) -> Vec<u8> {
        let mut writer = XzWriter::new(Vec::new(), options).unwrap();
        writer.write_all(data).unwrap();
        writer.finish().unwrap()
    }

    #[test]
    fn test_stat_single_block() {
        let data = b"The quick brown fox jumps over the lazy dog.\n";
        let stream = compress(data, &WriterOptions::default());
        let info = stat(std::io::Cursor::new(stream.clone())).unwrap();
        assert_eq!(info.streams, 1);
        assert_eq!(info.blocks, 1);
        assert_eq!(info.uncompressed, 45);
        assert_eq!(info.compressed, stream.len() as u64);
        assert_eq!(info.check, CheckKind::Crc64);
    }

    #[test]
    fn test_stat_empty_stream() {
        let stream = compress(b"", &WriterOptions::default());
        let info = stat(std::io::Cursor::new(stream)).unwrap();
        assert_eq!(info.streams, 1);
        assert_eq!(info.blocks, 0);
        assert_eq!(info.uncompressed, 0);
        assert_eq!(info.compressed, 32);
    }

    #[test]
    fn test_stat_multi_block() {
        let options = WriterOptions {
            block_size: Some(1000),
            ..WriterOptions::default()
        };
        let stream = compress(&vec![b's'; 5000], &options);
        let info = stat(std::io::Cursor::new(stream)).unwrap();
        assert_eq!(info.blocks, 5);
        assert_eq!(info.uncompressed, 5000);
    }

    #[test]
    fn test_stat_concatenated_streams() {
        let mut stream = compress(b"one", &WriterOptions::default());
        stream.extend_from_slice(&[0u8; 4]);
        stream.extend_from_slice(&compress(b"two!", &WriterOptions::default()));
        let info = stat(std::io::Cursor::new(stream)).unwrap();
        assert_eq!(info.streams, 2);
        assert_eq!(info.uncompressed, 7);
    }

    #[test]
    fn test_walk_callbacks_fire() {
        #[derive(Default)]
        struct Counts {
            headers: u64,
            blocks: u64,
            chunks: u64,
            visited_records: u64,
            footers: u64,
        }
        impl Walk for Counts {
            fn on_stream_header(&mut self, _flags: StreamFlags) -> Result<()> {
                self.headers += 1;
                Ok(())
            }
            fn on_block(&mut self, _i: u64, _h: &BlockHeader) -> Result<WalkControl> {
                self.blocks += 1;
                Ok(WalkControl::Continue)
            }
            fn on_chunk(&mut self, _c: &ChunkInfo) -> Result<()> {
                self.chunks += 1;
                Ok(())
            }
            fn on_record(&mut self, _r: &IndexRecord) -> Result<()> {
                self.visited_records += 1;
                Ok(())
            }
            fn on_stream_footer(&mut self, _f: StreamFlags, _b: u32) -> Result<()> {
                self.footers += 1;
                Ok(())
            }
        }

        let stream = compress(&b"callbacks ".repeat(100), &WriterOptions::default());
        let mut counts = Counts::default();
        walk(std::io::Cursor::new(stream), &mut counts).unwrap();
        assert_eq!(counts.headers, 1);
        assert_eq!(counts.blocks, 1);
        assert!(counts.chunks >= 1);
        assert_eq!(counts.visited_records, 1);
        assert_eq!(counts.footers, 1);
    }

    #[test]
    fn test_walk_suppresses_chunks() {
        struct NoChunks {
            chunks: u64,
        }
        impl Walk for NoChunks {
            fn on_block(&mut self, _i: u64, _h: &BlockHeader) -> Result<WalkControl> {
                Ok(WalkControl::SkipChunks)
            }
            fn on_chunk(&mut self, _c: &ChunkInfo) -> Result<()> {
                self.chunks += 1;
                Ok(())
            }
        }

        let stream = compress(b"suppressed", &WriterOptions::default());
        let mut visitor = NoChunks { chunks: 0 };
        let info = walk(std::io::Cursor::new(stream), &mut visitor).unwrap();
        assert_eq!(visitor.chunks, 0);
        // Accounting still happened.
        assert_eq!(info.uncompressed, 10);
    }

    #[test]
    fn test_stat_rejects_truncation() {
        let stream = compress(b"cut me", &WriterOptions::default());
        let cut = &stream[..stream.len() - 4];
        assert!(stat(std::io::Cursor::new(cut.to_vec())).is_err());
    }
}
