//! Hostile and damaged input handling.

use std::io::{Read, Write};

use exzed::{
    LzmaOptions, LzmaReader, Lzma2Reader, ReaderOptions, WriterOptions, XzReader, XzWriter,
};

fn xz_stream(data: &[u8]) -> Vec<u8> {
    let mut writer = XzWriter::new(Vec::new(), &WriterOptions::default()).unwrap();
    writer.write_all(data).unwrap();
    writer.finish().unwrap()
}

fn try_decompress(stream: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut reader =
        XzReader::new(std::io::Cursor::new(stream.to_vec()), &ReaderOptions::default())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
    let mut out = Vec::new();
    reader.read_to_end(&mut out)?;
    Ok(out)
}

#[test]
fn bad_stream_magic() {
    let mut stream = xz_stream(b"data");
    stream[0] = 0xFE;
    assert!(try_decompress(&stream).is_err());
}

#[test]
fn bad_footer_magic() {
    let mut stream = xz_stream(b"data");
    let last = stream.len() - 1;
    stream[last] = 0x00;
    assert!(try_decompress(&stream).is_err());
}

#[test]
fn corrupt_stream_header_crc() {
    let mut stream = xz_stream(b"data");
    stream[8] ^= 0x01;
    assert!(try_decompress(&stream).is_err());
}

#[test]
fn corrupt_block_header() {
    let mut stream = xz_stream(b"data");
    // The block header begins at offset 12; flip a byte inside it.
    stream[14] ^= 0x01;
    assert!(try_decompress(&stream).is_err());
}

#[test]
fn corrupt_block_check_fails_scenario() {
    // Scenario: flip one byte in the block check region of a fox-sentence
    // stream; the reader must fail and deliver nothing past the corruption.
    let data = b"The quick brown fox jumps over the lazy dog.\n";
    let stream = xz_stream(data);
    // From the tail: footer (12), index (8 for one small block), then the
    // 8-byte CRC64 check.
    let check_at = stream.len() - 12 - 8 - 8;
    for bit in [0x01u8, 0x80] {
        let mut corrupted = stream.clone();
        corrupted[check_at] ^= bit;
        let err = try_decompress(&corrupted).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}

#[test]
fn corrupt_compressed_payload() {
    let data: Vec<u8> = b"a moderately compressible payload ".repeat(200);
    let stream = xz_stream(&data);
    // Somewhere inside the block body.
    let mut corrupted = stream.clone();
    corrupted[stream.len() / 2] ^= 0xFF;
    assert!(try_decompress(&corrupted).is_err());
}

#[test]
fn truncations_at_every_region() {
    let stream = xz_stream(b"truncate me everywhere");
    for keep in [0, 5, 11, 12, 13, 20, stream.len() - 13, stream.len() - 1] {
        assert!(
            try_decompress(&stream[..keep]).is_err(),
            "kept {keep} of {}",
            stream.len()
        );
    }
}

#[test]
fn unsupported_check_kind() {
    let mut stream = xz_stream(b"data");
    // Check id 0x02 is reserved.
    stream[7] = 0x02;
    let crc = crc32fast::hash(&stream[6..8]);
    stream[8..12].copy_from_slice(&crc.to_le_bytes());
    assert!(try_decompress(&stream).is_err());
}

#[test]
fn reserved_stream_flag() {
    let mut stream = xz_stream(b"data");
    stream[6] = 0x01;
    let crc = crc32fast::hash(&stream[6..8]);
    stream[8..12].copy_from_slice(&crc.to_le_bytes());
    assert!(try_decompress(&stream).is_err());
}

#[test]
fn lzma2_reserved_control_byte() {
    let stream = vec![0x7Fu8, 0x00, 0x00, 0x00];
    let mut reader = Lzma2Reader::new(std::io::Cursor::new(stream), 1 << 16);
    let mut out = Vec::new();
    assert!(reader.read_to_end(&mut out).is_err());
}

#[test]
fn lzma2_missing_first_dict_reset() {
    let stream = vec![0x02u8, 0x00, 0x01, b'x', b'y', 0x00];
    let mut reader = Lzma2Reader::new(std::io::Cursor::new(stream), 1 << 16);
    let mut out = Vec::new();
    assert!(reader.read_to_end(&mut out).is_err());
}

#[test]
fn legacy_header_too_short() {
    assert!(LzmaReader::new(std::io::Cursor::new(vec![0x5Du8; 7])).is_err());
}

#[test]
fn legacy_bad_properties() {
    let mut header = vec![0xE1u8]; // 225 > 224
    header.extend_from_slice(&4096u32.to_le_bytes());
    header.extend_from_slice(&u64::MAX.to_le_bytes());
    assert!(LzmaReader::new(std::io::Cursor::new(header)).is_err());
}

#[test]
fn legacy_truncated_payload() {
    let mut writer = exzed::LzmaWriter::new(Vec::new(), &LzmaOptions::default()).unwrap();
    writer.write_all(&b"to be truncated ".repeat(64)).unwrap();
    let stream = writer.finish().unwrap();

    let cut = stream.len() * 2 / 3;
    let mut reader = LzmaReader::new(std::io::Cursor::new(stream[..cut].to_vec())).unwrap();
    let mut out = Vec::new();
    assert!(reader.read_to_end(&mut out).is_err());
}

#[test]
fn xz_index_tampered() {
    let stream = xz_stream(b"index integrity");
    // The index CRC sits 16 bytes before the end (4 CRC + 12 footer).
    let mut corrupted = stream.clone();
    let at = stream.len() - 16;
    corrupted[at] ^= 0x01;
    assert!(try_decompress(&corrupted).is_err());
}

#[test]
fn errors_are_sticky() {
    let mut stream = xz_stream(b"sticky");
    let len = stream.len();
    stream.truncate(len - 6);
    let mut reader =
        XzReader::new(std::io::Cursor::new(stream), &ReaderOptions::default()).unwrap();
    let mut out = Vec::new();
    assert!(reader.read_to_end(&mut out).is_err());
    let mut buf = [0u8; 8];
    assert!(reader.read(&mut buf).is_err());
}
