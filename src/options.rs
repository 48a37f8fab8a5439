//! Writer and reader configuration.
//!
//! Option structs follow a two-step contract: [`apply_defaults`] fills
//! zero/unset values, then [`verify`] validates the result. Every
//! constructor in this crate runs both exactly once on a private copy of
//! the caller's options.
//!
//! The top-level configs serialize to JSON with the fixed tag pair
//! `{"Format": "LZMA"|"XZ", "Type": "Writer"|"Writer2"}` so configurations
//! can be stored and replayed.
//!
//! [`apply_defaults`]: WriterOptions::apply_defaults
//! [`verify`]: WriterOptions::verify

use serde::{Deserialize, Serialize};

use crate::checksum::CheckKind;
use crate::codec::matchfind::{BufConfig, ParserKind};
use crate::codec::{DICT_SIZE_MIN, Properties};
use crate::{Error, Result};

/// Default dictionary size per preset 0..=9.
const PRESET_DICT_SIZE: [u32; 10] = [
    1 << 18,
    1 << 20,
    1 << 21,
    1 << 22,
    1 << 22,
    1 << 23,
    1 << 23,
    1 << 24,
    1 << 25,
    1 << 26,
];

/// Hash-chain walk depth per preset.
const PRESET_DEPTH: [u32; 10] = [4, 8, 24, 48, 48, 64, 96, 128, 192, 256];

/// Early-exit match length per preset.
const PRESET_NICE_LEN: [u32; 10] = [128, 128, 273, 273, 64, 96, 128, 192, 273, 273];

/// Default compression preset.
pub const PRESET_DEFAULT: u32 = 6;

/// Default XZ block size in block-parallel mode (256 KiB).
pub const BLOCK_SIZE_DEFAULT: u64 = 256 << 10;

/// Stream format selector for serialized configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Format {
    /// The legacy single-stream `.lzma` format.
    #[serde(rename = "LZMA")]
    Lzma,
    /// The XZ container.
    #[serde(rename = "XZ")]
    Xz,
}

/// Writer flavour selector for serialized configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriterKind {
    /// Single-threaded writer.
    Writer,
    /// Parallel worker-pool writer.
    Writer2,
}

/// Modelling and parsing options shared by all encoders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LzmaOptions {
    /// Dictionary (window) size in bytes; 0 selects the preset default.
    pub dict_size: u32,
    /// Modelling parameters; `None` selects the defaults, unless
    /// `fixed_properties` makes the zero triple literal.
    pub properties: Option<Properties>,
    /// Use zero-valued properties literally instead of the defaults.
    pub fixed_properties: bool,
    /// Compression preset 0..=9 supplying unset values.
    pub preset: u32,
    /// Match-finder selection; `None` derives from the preset.
    pub parser: Option<ParserKind>,
    /// Encoder window geometry; `None` derives from the dictionary size.
    pub buf_config: Option<BufConfig>,
}

impl Default for LzmaOptions {
    fn default() -> Self {
        Self {
            dict_size: 0,
            properties: None,
            fixed_properties: false,
            preset: PRESET_DEFAULT,
            parser: None,
            buf_config: None,
        }
    }
}

impl LzmaOptions {
    /// Options for a given preset with everything else defaulted.
    pub fn with_preset(preset: u32) -> Self {
        Self {
            preset: preset.min(9),
            ..Self::default()
        }
    }

    /// Fills unset values from the preset.
    pub fn apply_defaults(&mut self) {
        self.preset = self.preset.min(9);
        if self.dict_size == 0 {
            self.dict_size = PRESET_DICT_SIZE[self.preset as usize];
        }
        if self.properties.is_none() {
            self.properties = Some(if self.fixed_properties {
                Properties::new(0, 0, 0)
            } else {
                Properties::default()
            });
        }
        if self.parser.is_none() {
            self.parser = Some(ParserKind::HashChain {
                depth: PRESET_DEPTH[self.preset as usize],
                nice_len: PRESET_NICE_LEN[self.preset as usize],
            });
        }
        if self.buf_config.is_none() {
            self.buf_config = Some(BufConfig::from_window(self.dict_size as usize));
        }
    }

    /// Validates the options. `lzma2` additionally enforces `lc + lp <= 4`.
    pub fn verify(&self, lzma2: bool) -> Result<()> {
        if self.dict_size < DICT_SIZE_MIN {
            return Err(Error::ConfigInvalid(format!(
                "dictionary size {} below minimum {}",
                self.dict_size, DICT_SIZE_MIN
            )));
        }
        let props = self
            .properties
            .ok_or_else(|| Error::ConfigInvalid("properties not defaulted".into()))?;
        props.verify(lzma2)?;
        let buf = self
            .buf_config
            .ok_or_else(|| Error::ConfigInvalid("buffer config not defaulted".into()))?;
        buf.verify()?;
        if buf.window_size != self.dict_size as usize {
            return Err(Error::ConfigInvalid(format!(
                "buffer window {} does not match dictionary size {}",
                buf.window_size, self.dict_size
            )));
        }
        Ok(())
    }

    /// The effective properties; valid after [`apply_defaults`](Self::apply_defaults).
    pub fn props(&self) -> Properties {
        self.properties.unwrap_or_default()
    }

    /// The effective parser; valid after [`apply_defaults`](Self::apply_defaults).
    pub fn parser_kind(&self) -> ParserKind {
        self.parser.unwrap_or_default()
    }

    /// The effective buffer geometry; valid after [`apply_defaults`](Self::apply_defaults).
    pub fn buf(&self) -> BufConfig {
        self.buf_config
            .unwrap_or_else(|| BufConfig::from_window(self.dict_size as usize))
    }

    /// Approximate encoder memory requirement in KiB: window buffer, hash
    /// tables and probability model. The parallel writers need this much
    /// per worker.
    pub fn encoder_memory_usage_kib(&self) -> u32 {
        let buf = self.buf();
        let window = buf.buffer_size as u32;
        // head table + chain links, both u32 per entry.
        let tables = ((1u32 << 16) + buf.buffer_size as u32) * 4;
        let props = self.props();
        let model = (0x300u32 << (props.lc + props.lp)) * 2;
        64 + (window + tables + model).div_ceil(1024)
    }
}

/// Top-level writer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WriterOptions {
    /// Output format tag.
    pub format: Format,
    /// Writer flavour tag.
    #[serde(rename = "Type")]
    pub kind: WriterKind,
    /// Modelling and parsing options.
    #[serde(flatten)]
    pub lzma: LzmaOptions,
    /// Block check kind (XZ only). Defaults to CRC-64.
    pub checksum: CheckKind,
    /// Worker count: 0 selects the host parallelism, 1 is single-threaded.
    pub workers: u32,
    /// Per-worker task budget in bytes; 0 derives from the block size.
    pub work_size: usize,
    /// Bytes per XZ block in block-parallel mode; `None` keeps a single
    /// block per stream (serial) or the 256 KiB default (parallel).
    pub block_size: Option<u64>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            format: Format::Xz,
            kind: WriterKind::Writer,
            lzma: LzmaOptions::default(),
            checksum: CheckKind::default(),
            workers: 1,
            work_size: 0,
            block_size: None,
        }
    }
}

impl WriterOptions {
    /// XZ writer options at the given preset.
    pub fn xz_with_preset(preset: u32) -> Self {
        Self {
            lzma: LzmaOptions::with_preset(preset),
            ..Self::default()
        }
    }

    /// Fills unset values.
    pub fn apply_defaults(&mut self) {
        self.lzma.apply_defaults();
        if self.workers == 0 {
            self.workers = std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(4);
        }
        if self.workers > 1 {
            self.kind = WriterKind::Writer2;
            if self.block_size.is_none() {
                self.block_size = Some(BLOCK_SIZE_DEFAULT);
            }
        }
        if self.work_size == 0 {
            self.work_size = self
                .block_size
                .map(|b| b as usize)
                .unwrap_or(BLOCK_SIZE_DEFAULT as usize);
        }
    }

    /// Validates the options.
    pub fn verify(&self) -> Result<()> {
        self.lzma.verify(self.format == Format::Xz)?;
        if let Some(block_size) = self.block_size {
            if block_size == 0 {
                return Err(Error::ConfigInvalid("block size must be non-zero".into()));
            }
        }
        if self.work_size == 0 {
            return Err(Error::ConfigInvalid("work size must be non-zero".into()));
        }
        if self.format == Format::Lzma && self.checksum != CheckKind::default() {
            return Err(Error::ConfigInvalid(
                "the legacy LZMA format carries no block check".into(),
            ));
        }
        Ok(())
    }
}

/// Top-level reader configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReaderOptions {
    /// Reject stream padding and concatenated streams after the first.
    pub single_stream: bool,
}

impl ReaderOptions {
    /// Nothing to default today; present to keep the constructor contract
    /// uniform.
    pub fn apply_defaults(&mut self) {}

    /// Validates the options.
    pub fn verify(&self) -> Result<()> {
        Ok(())
    }
}
