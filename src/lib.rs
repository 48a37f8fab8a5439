//! # exzed
//!
//! A pure-Rust implementation of the XZ, LZMA2 and LZMA compressed stream
//! formats: the adaptive range coder, the LZMA probability model, match
//! finding over a sliding dictionary, LZMA2 chunk framing, the XZ
//! container with its integrity checks and index, and a parallel
//! block-compression pool.
//!
//! ## Quick Start
//!
//! ### Compressing to XZ
//!
//! ```rust
//! use std::io::Write;
//! use exzed::{WriterOptions, XzWriter};
//!
//! let mut writer = XzWriter::new(Vec::new(), &WriterOptions::default()).unwrap();
//! writer.write_all(b"Hello, world!").unwrap();
//! let stream = writer.finish().unwrap();
//! assert_eq!(&stream[..6], &[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00]);
//! ```
//!
//! ### Decompressing XZ
//!
//! ```rust
//! # use std::io::Write;
//! # use exzed::{WriterOptions, XzWriter};
//! # let mut writer = XzWriter::new(Vec::new(), &WriterOptions::default()).unwrap();
//! # writer.write_all(b"Hello, world!").unwrap();
//! # let stream = writer.finish().unwrap();
//! use std::io::Read;
//! use exzed::{ReaderOptions, XzReader};
//!
//! let mut reader = XzReader::new(std::io::Cursor::new(stream), &ReaderOptions::default()).unwrap();
//! let mut out = Vec::new();
//! reader.read_to_end(&mut out).unwrap();
//! assert_eq!(out, b"Hello, world!");
//! ```
//!
//! ### Parallel compression
//!
//! With the default `parallel` feature, [`XzWriterMt`] compresses
//! independent blocks on a worker pool while preserving output order:
//!
//! ```rust,ignore
//! use exzed::{WriterOptions, XzWriterMt};
//!
//! let options = WriterOptions { workers: 8, ..WriterOptions::default() };
//! let mut writer = XzWriterMt::new(std::fs::File::create("out.xz")?, &options)?;
//! ```
//!
//! ## Stream levels
//!
//! | Level | Writer | Reader |
//! |-------|--------|--------|
//! | XZ container | [`XzWriter`], [`XzWriterMt`] | [`XzReader`] |
//! | LZMA2 chunks | [`Lzma2Writer`], [`Lzma2WriterMt`] | [`Lzma2Reader`] |
//! | Legacy `.lzma` | [`LzmaWriter`] | [`LzmaReader`] |
//!
//! [`stat`] walks an XZ file without decompressing it and reports
//! per-stream and per-block figures.

pub mod checksum;
pub mod codec;
pub mod error;
pub mod format;
pub mod lzma;
pub mod lzma2;
pub mod options;
#[cfg(feature = "parallel")]
pub mod pool;
pub mod xz;

pub use checksum::CheckKind;
pub use codec::matchfind::{BufConfig, ParserKind};
pub use codec::{dict_size_ceil, Properties, DICT_SIZE_MAX, DICT_SIZE_MIN};
pub use error::{Corruption, Error, Result};
pub use lzma::{LzmaReader, LzmaWriter};
pub use lzma2::{Lzma2Reader, Lzma2Writer};
pub use options::{Format, LzmaOptions, ReaderOptions, WriterKind, WriterOptions};
#[cfg(feature = "parallel")]
pub use pool::{Lzma2WriterMt, XzWriterMt};
pub use xz::{stat, walk, Info, Walk, WalkControl, XzReader, XzWriter};
