//! Raw LZMA coder.
//!
//! Glues the parser, probability model, dictionary and range coder into an
//! operation stream. The encoder produces range-coded output under optional
//! compressed- and uncompressed-size caps (the LZMA2 chunker's budgets);
//! the decoder applies operations to the dictionary until its step budget
//! is filled or the end-of-stream marker appears.

use crate::codec::dict::LzDict;
use crate::codec::matchfind::{BufConfig, MatchFinder, ParserKind};
use crate::codec::model::{DecodeStep, LzmaModel};
use crate::codec::rangecoder::{RangeDecoder, RangeEncoder, ReadByte};
use crate::codec::{Operation, Properties};
use crate::Result;

/// Bytes held back from a compressed-size cap so that one operation plus
/// the coder flush can never overrun it.
const COMPRESSED_CAP_MARGIN: usize = 48;

/// Outcome of one encoder drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOutcome {
    /// Uncompressed bytes consumed from the window.
    pub produced: u32,
    /// The compressed-size cap stopped encoding early.
    pub limit_reached: bool,
}

/// Streaming LZMA encoder over a private window.
#[derive(Debug)]
pub struct RawEncoder {
    model: LzmaModel,
    finder: MatchFinder,
}

impl RawEncoder {
    /// Creates an encoder with the given model parameters and parser.
    pub fn new(props: Properties, kind: ParserKind, cfg: BufConfig) -> Self {
        Self {
            model: LzmaModel::new(props),
            finder: MatchFinder::new(kind, cfg),
        }
    }

    /// Feeds input into the window; returns bytes accepted.
    pub fn fill(&mut self, data: &[u8]) -> usize {
        self.finder.fill(data)
    }

    /// Unencoded bytes buffered in the window.
    pub fn pending(&self) -> usize {
        self.finder.pending()
    }

    /// Uncompressed position since the last dictionary reset.
    pub fn pos(&self) -> u64 {
        self.finder.global_pos()
    }

    /// The `len` most recently encoded bytes, for uncompressed fallback.
    pub fn recent(&self, len: usize) -> &[u8] {
        self.finder.recent(len)
    }

    /// Resets probabilities, automaton and reps (LZMA2 state reset).
    pub fn reset_state(&mut self) {
        self.model.reset();
    }

    /// Resets the model and drops the window (dictionary reset).
    pub fn reset_dict(&mut self) {
        self.model.reset();
        self.finder.reset();
    }

    /// Encodes buffered operations into `rc`.
    ///
    /// Stops when `max_uncompressed` bytes are consumed, when the window
    /// runs dry, or (with a `compressed_cap`) when the coder output would
    /// come within a safety margin of the cap, reported as `limit_reached`.
    pub fn encode_ops(
        &mut self,
        rc: &mut RangeEncoder,
        max_uncompressed: u32,
        compressed_cap: Option<usize>,
    ) -> EncodeOutcome {
        let mut produced = 0u32;
        while produced < max_uncompressed && self.finder.pending() > 0 {
            if let Some(cap) = compressed_cap {
                if rc.len_bound() + COMPRESSED_CAP_MARGIN >= cap {
                    return EncodeOutcome {
                        produced,
                        limit_reached: true,
                    };
                }
            }

            let pos = self.finder.global_pos();
            let op = self
                .finder
                .next_op(self.model.reps(), max_uncompressed - produced);
            match op {
                Operation::Literal(byte) => {
                    let prev_byte = self.finder.byte_back(1);
                    let match_byte = self.finder.byte_back(self.model.reps()[0] + 1);
                    self.model.encode_literal(rc, byte, pos, prev_byte, match_byte);
                }
                Operation::Match { dist, len } => {
                    if len == 1 {
                        self.model.encode_rep(rc, 0, 1, pos);
                    } else {
                        match self.model.reps().iter().position(|&r| r == dist) {
                            Some(idx) => self.model.encode_rep(rc, idx, len, pos),
                            None => self.model.encode_match(rc, dist, len, pos),
                        }
                    }
                }
            }
            produced += op.len();
        }
        EncodeOutcome {
            produced,
            limit_reached: false,
        }
    }

    /// Encodes the end-of-stream marker.
    pub fn encode_eos(&mut self, rc: &mut RangeEncoder) {
        let pos = self.finder.global_pos();
        self.model.encode_eos(rc, pos);
    }
}

/// Outcome of one decoder drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// The dictionary's step budget is exhausted (or a split match copy is
    /// pending); more output can be flushed.
    Filled,
    /// The end-of-stream marker was decoded.
    EndMarker,
}

/// Streaming LZMA decoder.
#[derive(Debug)]
pub struct RawDecoder {
    model: LzmaModel,
}

impl RawDecoder {
    /// Creates a decoder with the given model parameters.
    pub fn new(props: Properties) -> Self {
        Self {
            model: LzmaModel::new(props),
        }
    }

    /// Replaces the model for a properties reset.
    pub fn set_props(&mut self, props: Properties) {
        self.model = LzmaModel::new(props);
    }

    /// Resets probabilities, automaton and reps (LZMA2 state reset).
    pub fn reset_state(&mut self) {
        self.model.reset();
    }

    /// Decodes operations into the dictionary until its budget fills or the
    /// end-of-stream marker appears.
    pub fn decode_into<S: ReadByte>(
        &mut self,
        rc: &mut RangeDecoder<S>,
        dict: &mut LzDict,
    ) -> Result<DecodeOutcome> {
        dict.copy_pending()?;
        while dict.has_space() {
            match self.model.decode_step(rc, dict)? {
                DecodeStep::Data => {}
                DecodeStep::EndMarker => return Ok(DecodeOutcome::EndMarker),
            }
        }
        Ok(DecodeOutcome::Filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::rangecoder::{ChunkSource, StreamSource};

    fn encode_all(input: &[u8], props: Properties, with_eos: bool) -> Vec<u8> {
        let mut enc = RawEncoder::new(
            props,
            ParserKind::Greedy,
            BufConfig::from_window(1 << 16),
        );
        let mut rc = RangeEncoder::new();
        let mut fed = 0;
        loop {
            if fed < input.len() {
                fed += enc.fill(&input[fed..]);
            }
            let outcome = enc.encode_ops(&mut rc, u32::MAX, None);
            if fed == input.len() && outcome.produced == 0 && enc.pending() == 0 {
                break;
            }
        }
        if with_eos {
            enc.encode_eos(&mut rc);
        }
        rc.finish_chunk()
    }

    fn decode_all(
        payload: &[u8],
        props: Properties,
        expect_len: usize,
    ) -> (Vec<u8>, DecodeOutcome) {
        let mut dec = RawDecoder::new(props);
        let mut dict = LzDict::new(1 << 16);
        let mut src = ChunkSource::new();
        let mut cur = std::io::Cursor::new(payload.to_vec());
        src.reload(&mut cur, payload.len()).unwrap();
        let mut rc = RangeDecoder::new_unprimed(src);
        rc.prepare().unwrap();

        let mut out = Vec::new();
        let mut scratch = vec![0u8; 4096];
        let mut last = DecodeOutcome::Filled;
        while out.len() < expect_len {
            dict.set_limit((expect_len - out.len()).min(scratch.len()));
            last = dec.decode_into(&mut rc, &mut dict).unwrap();
            let n = dict.flush(&mut scratch);
            out.extend_from_slice(&scratch[..n]);
            if last == DecodeOutcome::EndMarker {
                break;
            }
        }
        (out, last)
    }

    #[test]
    fn test_roundtrip_text() {
        let input = b"A screaming comes across the sky. It has happened before, \
                      but there is nothing to compare it to now."
            .repeat(20);
        let payload = encode_all(&input, Properties::default(), false);
        assert!(payload.len() < input.len());
        let (out, _) = decode_all(&payload, Properties::default(), input.len());
        assert_eq!(out, input);
    }

    #[test]
    fn test_roundtrip_with_eos() {
        let input = b"end of stream follows".to_vec();
        let payload = encode_all(&input, Properties::default(), true);
        let (out, outcome) = decode_all(&payload, Properties::default(), usize::MAX >> 1);
        assert_eq!(out, input);
        assert_eq!(outcome, DecodeOutcome::EndMarker);
    }

    #[test]
    fn test_roundtrip_incompressible() {
        // A fixed pseudo-random sequence: mostly literals.
        let mut x = 0x2545F491u32;
        let input: Vec<u8> = (0..4096)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 17;
                x ^= x << 5;
                (x >> 24) as u8
            })
            .collect();
        let payload = encode_all(&input, Properties::default(), false);
        let (out, _) = decode_all(&payload, Properties::default(), input.len());
        assert_eq!(out, input);
    }

    #[test]
    fn test_roundtrip_nondefault_props() {
        let props = Properties::new(0, 2, 1);
        let input = b"banana banana banana banana".repeat(50);
        let payload = encode_all(&input, props, true);
        let (out, outcome) = decode_all(&payload, props, usize::MAX >> 1);
        assert_eq!(out, input);
        assert_eq!(outcome, DecodeOutcome::EndMarker);
    }

    #[test]
    fn test_compressed_cap_stops_early() {
        let mut x = 0x9E3779B9u32;
        let input: Vec<u8> = (0..(1 << 16))
            .map(|_| {
                x = x.wrapping_mul(1664525).wrapping_add(1013904223);
                (x >> 24) as u8
            })
            .collect();
        let mut enc = RawEncoder::new(
            Properties::default(),
            ParserKind::Greedy,
            BufConfig::from_window(1 << 16),
        );
        let mut rc = RangeEncoder::new();
        let mut fed = 0;
        while fed < input.len() {
            let n = enc.fill(&input[fed..]);
            if n == 0 {
                break;
            }
            fed += n;
        }
        // Random bytes cannot compress below one byte per byte, so a small
        // cap must trip before the window drains.
        let outcome = enc.encode_ops(&mut rc, u32::MAX, Some(1024));
        assert!(outcome.limit_reached);
        assert!(outcome.produced < input.len() as u32);
        let data = rc.finish_chunk();
        assert!(data.len() <= 1024);
    }

    #[test]
    fn test_stream_source_decode() {
        // The streaming decoder path (legacy format) shares the model.
        let input = b"stream me, please, stream me".to_vec();
        let payload = encode_all(&input, Properties::default(), true);

        let mut dec = RawDecoder::new(Properties::default());
        let mut dict = LzDict::new(1 << 16);
        let mut rc =
            RangeDecoder::new(StreamSource::new(std::io::Cursor::new(payload))).unwrap();
        dict.set_limit(1 << 15);
        let outcome = dec.decode_into(&mut rc, &mut dict).unwrap();
        assert_eq!(outcome, DecodeOutcome::EndMarker);
        rc.align_end().unwrap();
        assert!(rc.possibly_at_end());

        let mut out = vec![0u8; input.len() + 16];
        let n = dict.flush(&mut out);
        assert_eq!(&out[..n], &input[..]);
    }
}
