//! Statistics walker over complete files.

use std::io::Write;

use exzed::xz::{ChunkInfo, IndexRecord};
use exzed::{CheckKind, Result, Walk, WalkControl, WriterOptions, XzWriter};

fn xz_stream(data: &[u8], options: &WriterOptions) -> Vec<u8> {
    let mut writer = XzWriter::new(Vec::new(), options).unwrap();
    writer.write_all(data).unwrap();
    writer.finish().unwrap()
}

#[test]
fn info_for_single_stream() {
    let data = b"statistics without decompression ".repeat(1000);
    let stream = xz_stream(&data, &WriterOptions::default());
    let info = exzed::stat(std::io::Cursor::new(stream.clone())).unwrap();
    assert_eq!(info.streams, 1);
    assert_eq!(info.blocks, 1);
    assert_eq!(info.uncompressed, data.len() as u64);
    assert_eq!(info.compressed, stream.len() as u64);
    assert_eq!(info.check, CheckKind::Crc64);
}

#[test]
fn info_counts_blocks() {
    let options = WriterOptions {
        block_size: Some(10_000),
        ..WriterOptions::default()
    };
    let data = vec![b'b'; 95_000];
    let stream = xz_stream(&data, &options);
    let info = exzed::stat(std::io::Cursor::new(stream)).unwrap();
    assert_eq!(info.blocks, 10);
    assert_eq!(info.uncompressed, 95_000);
}

#[test]
fn walker_sees_chunks_and_records() {
    #[derive(Default)]
    struct Visitor {
        chunk_uncompressed: u64,
        records: Vec<IndexRecord>,
    }
    impl Walk for Visitor {
        fn on_chunk(&mut self, chunk: &ChunkInfo) -> Result<()> {
            self.chunk_uncompressed += chunk.uncompressed_size;
            Ok(())
        }
        fn on_record(&mut self, record: &IndexRecord) -> Result<()> {
            self.records.push(*record);
            Ok(())
        }
    }

    let data = b"chunk accounting ".repeat(20_000);
    let stream = xz_stream(&data, &WriterOptions::default());
    let mut visitor = Visitor::default();
    let info = exzed::walk(std::io::Cursor::new(stream), &mut visitor).unwrap();

    assert_eq!(visitor.chunk_uncompressed, data.len() as u64);
    assert_eq!(visitor.records.len(), 1);
    assert_eq!(visitor.records[0].uncompressed_size, data.len() as u64);
    assert_eq!(info.uncompressed, data.len() as u64);
}

#[test]
fn walker_chunk_suppression() {
    struct Suppressor {
        chunks_seen: u64,
        blocks_seen: u64,
    }
    impl Walk for Suppressor {
        fn on_block(
            &mut self,
            _index: u64,
            _header: &exzed::xz::BlockHeader,
        ) -> Result<WalkControl> {
            self.blocks_seen += 1;
            Ok(WalkControl::SkipChunks)
        }
        fn on_chunk(&mut self, _chunk: &ChunkInfo) -> Result<()> {
            self.chunks_seen += 1;
            Ok(())
        }
    }

    let options = WriterOptions {
        block_size: Some(4096),
        ..WriterOptions::default()
    };
    let stream = xz_stream(&vec![b'c'; 20_000], &options);
    let mut visitor = Suppressor {
        chunks_seen: 0,
        blocks_seen: 0,
    };
    exzed::walk(std::io::Cursor::new(stream), &mut visitor).unwrap();
    assert_eq!(visitor.blocks_seen, 5);
    assert_eq!(visitor.chunks_seen, 0);
}

#[test]
fn walker_callback_error_aborts() {
    struct Failing;
    impl Walk for Failing {
        fn on_block(
            &mut self,
            _index: u64,
            _header: &exzed::xz::BlockHeader,
        ) -> Result<WalkControl> {
            Err(exzed::Error::format("visitor gave up"))
        }
    }

    let stream = xz_stream(b"abort early", &WriterOptions::default());
    let err = exzed::walk(std::io::Cursor::new(stream), &mut Failing).unwrap_err();
    assert!(err.to_string().contains("visitor gave up"));
}

#[test]
fn concatenated_streams_accumulate() {
    let mut stream = xz_stream(b"first", &WriterOptions::default());
    stream.extend_from_slice(&xz_stream(b"second!", &WriterOptions::default()));
    let info = exzed::stat(std::io::Cursor::new(stream)).unwrap();
    assert_eq!(info.streams, 2);
    assert_eq!(info.blocks, 2);
    assert_eq!(info.uncompressed, 12);
}
