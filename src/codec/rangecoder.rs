//! Binary range coder.
//!
//! The adaptive arithmetic coder behind every LZMA bit. Probabilities are
//! 11-bit values; the coder keeps a 32-bit `range` renormalised in byte
//! steps, and the encoder carries a 64-bit `low` so that carries can be
//! resolved through a one-byte cache and a run of pending 0xFF bytes.

use crate::{Corruption, Error, Result};

/// A byte-at-a-time input source for the range decoder.
///
/// Exhaustion mid-payload is corruption, not a normal end of input, so
/// implementations report it as [`Corruption::RangeCoderTruncated`].
pub trait ReadByte {
    /// Reads the next payload byte.
    fn read_byte(&mut self) -> Result<u8>;
}

/// Streaming [`ReadByte`] source over any reader.
///
/// Used by the legacy `.lzma` decoder, whose payload runs to the end of the
/// input rather than to a declared chunk boundary.
#[derive(Debug)]
pub struct StreamSource<R> {
    inner: R,
}

impl<R> StreamSource<R> {
    /// Wraps a reader.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Returns the wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: std::io::Read> ReadByte for StreamSource<R> {
    fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.inner.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::corrupt(0, Corruption::RangeCoderTruncated)
            } else {
                Error::Io(e)
            }
        })?;
        Ok(buf[0])
    }
}

/// Number of bits in the probability model.
pub const PROB_BITS: u32 = 11;

/// Total probability weight (2048).
pub const PROB_TOTAL: u32 = 1 << PROB_BITS;

/// Initial probability (50%).
pub const PROB_INIT: u16 = (PROB_TOTAL / 2) as u16;

/// Adaptation shift for probability updates.
pub const MOVE_BITS: u32 = 5;

/// Renormalisation threshold.
const TOP: u32 = 1 << 24;

/// Initialises a probability slice to [`PROB_INIT`].
pub fn init_probs(probs: &mut [u16]) {
    probs.fill(PROB_INIT);
}

/// Range encoder writing into an in-memory buffer.
///
/// The buffer form is what the LZMA2 chunker needs: a chunk is encoded,
/// measured, then either emitted or discarded in favour of an uncompressed
/// chunk. The legacy `.lzma` writer drains the buffer to its output between
/// operations instead of bounding it.
#[derive(Debug)]
pub struct RangeEncoder {
    low: u64,
    range: u32,
    cache: u8,
    cache_size: u64,
    out: Vec<u8>,
}

impl RangeEncoder {
    /// Creates an encoder with a fresh coder state.
    pub fn new() -> Self {
        Self {
            low: 0,
            range: 0xFFFF_FFFF,
            cache: 0,
            cache_size: 1,
            out: Vec::with_capacity(4096),
        }
    }

    /// Resets the coder state for a new independent payload, keeping the
    /// output buffer allocation.
    pub fn reset(&mut self) {
        self.low = 0;
        self.range = 0xFFFF_FFFF;
        self.cache = 0;
        self.cache_size = 1;
        self.out.clear();
    }

    /// Upper bound on the final output length if the coder were flushed now.
    ///
    /// Used by the chunker to stop encoding before the 64 KiB chunk cap.
    pub fn len_bound(&self) -> usize {
        self.out.len() + self.cache_size as usize + 5
    }

    /// Returns `true` if nothing has been encoded since the last reset.
    pub fn is_empty(&self) -> bool {
        self.out.is_empty() && self.cache_size == 1 && self.low == 0
    }

    /// Encodes one bit under an adaptive probability.
    pub fn encode_bit(&mut self, prob: &mut u16, bit: u32) {
        let bound = (self.range >> PROB_BITS) * (*prob as u32);
        if bit == 0 {
            self.range = bound;
            *prob += ((PROB_TOTAL - *prob as u32) >> MOVE_BITS) as u16;
        } else {
            self.low += bound as u64;
            self.range -= bound;
            *prob -= *prob >> MOVE_BITS;
        }
        while self.range < TOP {
            self.shift_low();
            self.range <<= 8;
        }
    }

    /// Encodes one bit at a fixed 50% probability.
    pub fn encode_direct_bit(&mut self, bit: u32) {
        self.range >>= 1;
        if bit != 0 {
            self.low += self.range as u64;
        }
        while self.range < TOP {
            self.shift_low();
            self.range <<= 8;
        }
    }

    /// Encodes `count` direct bits, most significant first.
    pub fn encode_direct_bits(&mut self, value: u32, count: u32) {
        for i in (0..count).rev() {
            self.encode_direct_bit((value >> i) & 1);
        }
    }

    /// Encodes a symbol through a bit tree, most significant bit first.
    pub fn encode_bit_tree(&mut self, probs: &mut [u16], num_bits: u32, symbol: u32) {
        let mut m = 1usize;
        for i in (0..num_bits).rev() {
            let bit = (symbol >> i) & 1;
            self.encode_bit(&mut probs[m], bit);
            m = (m << 1) | bit as usize;
        }
    }

    /// Encodes a symbol through a bit tree, least significant bit first.
    pub fn encode_bit_tree_reverse(&mut self, probs: &mut [u16], num_bits: u32, symbol: u32) {
        let mut m = 1usize;
        for i in 0..num_bits {
            let bit = (symbol >> i) & 1;
            self.encode_bit(&mut probs[m], bit);
            m = (m << 1) | bit as usize;
        }
    }

    /// Emits one byte of `low`, resolving carries through the cache.
    fn shift_low(&mut self) {
        if self.low < 0xFF00_0000 || self.low > 0xFFFF_FFFF {
            let carry = (self.low >> 32) as u8;
            let mut byte = self.cache;
            loop {
                self.out.push(byte.wrapping_add(carry));
                byte = 0xFF;
                self.cache_size -= 1;
                if self.cache_size == 0 {
                    break;
                }
            }
            self.cache = (self.low >> 24) as u8;
        }
        self.cache_size += 1;
        self.low = (self.low << 8) & 0xFFFF_FFFF;
    }

    /// Flushes the remaining five bytes of `low` and takes the finished
    /// payload, resetting the coder for the next chunk.
    pub fn finish_chunk(&mut self) -> Vec<u8> {
        for _ in 0..5 {
            self.shift_low();
        }
        let data = std::mem::take(&mut self.out);
        self.reset();
        data
    }

    /// Drains output bytes produced so far without finishing the payload.
    ///
    /// Lets the legacy writer stream an unbounded payload to its output
    /// while coding continues.
    pub fn drain(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out)
    }
}

impl Default for RangeEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Range decoder over a byte source.
///
/// Sources are either streaming ([`ReadByte`] over any reader) or the
/// bounded per-chunk buffer used by the LZMA2 reader.
#[derive(Debug)]
pub struct RangeDecoder<S> {
    src: S,
    range: u32,
    code: u32,
}

impl<S: ReadByte> RangeDecoder<S> {
    /// Creates a decoder and consumes the five initialisation bytes.
    ///
    /// The first payload byte must be 0x00; anything else is corruption.
    pub fn new(mut src: S) -> Result<Self> {
        let lead = src.read_byte()?;
        if lead != 0x00 {
            return Err(Error::corrupt(0, Corruption::RangeCoderLeadByte));
        }
        let mut code = 0u32;
        for _ in 0..4 {
            code = (code << 8) | src.read_byte()? as u32;
        }
        Ok(Self {
            src,
            range: 0xFFFF_FFFF,
            code,
        })
    }

    /// Returns the underlying source.
    pub fn into_source(self) -> S {
        self.src
    }

    /// Returns `true` iff the internal code is zero, the necessary (but not
    /// sufficient) condition for a cleanly terminated payload.
    pub fn possibly_at_end(&self) -> bool {
        self.code == 0
    }

    fn normalize(&mut self) -> Result<()> {
        if self.range < TOP {
            let byte = self.src.read_byte()?;
            self.code = (self.code << 8) | byte as u32;
            self.range <<= 8;
        }
        Ok(())
    }

    /// Catch-up renormalisation at the end of a payload.
    ///
    /// Renormalisation is lazy (it runs before the next bit), so after the
    /// final symbol one byte of the encoder's flush can still be unread.
    /// Consuming it here makes the end-of-payload checks exact: a cleanly
    /// terminated payload is fully consumed with a zero code afterwards.
    pub fn align_end(&mut self) -> Result<()> {
        self.normalize()
    }

    /// Decodes one bit under an adaptive probability.
    pub fn decode_bit(&mut self, prob: &mut u16) -> Result<u32> {
        self.normalize()?;
        let bound = (self.range >> PROB_BITS) * (*prob as u32);
        if self.code < bound {
            self.range = bound;
            *prob += ((PROB_TOTAL - *prob as u32) >> MOVE_BITS) as u16;
            Ok(0)
        } else {
            self.range -= bound;
            self.code -= bound;
            *prob -= *prob >> MOVE_BITS;
            Ok(1)
        }
    }

    /// Decodes one bit at a fixed 50% probability.
    pub fn decode_direct_bit(&mut self) -> Result<u32> {
        self.normalize()?;
        self.range >>= 1;
        self.code = self.code.wrapping_sub(self.range);
        if (self.code as i32) < 0 {
            self.code = self.code.wrapping_add(self.range);
            Ok(0)
        } else {
            Ok(1)
        }
    }

    /// Decodes `count` direct bits, most significant first.
    pub fn decode_direct_bits(&mut self, count: u32) -> Result<u32> {
        let mut result = 0u32;
        for _ in 0..count {
            result = (result << 1) | self.decode_direct_bit()?;
        }
        Ok(result)
    }

    /// Decodes a bit-tree symbol, most significant bit first.
    pub fn decode_bit_tree(&mut self, probs: &mut [u16], num_bits: u32) -> Result<u32> {
        let mut m = 1usize;
        for _ in 0..num_bits {
            m = (m << 1) | self.decode_bit(&mut probs[m])? as usize;
        }
        Ok(m as u32 - (1 << num_bits))
    }

    /// Decodes a bit-tree symbol, least significant bit first.
    pub fn decode_bit_tree_reverse(&mut self, probs: &mut [u16], num_bits: u32) -> Result<u32> {
        let mut m = 1usize;
        let mut symbol = 0u32;
        for i in 0..num_bits {
            let bit = self.decode_bit(&mut probs[m])?;
            m = (m << 1) | bit as usize;
            symbol |= bit << i;
        }
        Ok(symbol)
    }
}

/// Bounded byte source for one LZMA2 chunk payload.
///
/// The chunk's declared compressed size limits how many bytes the decoder
/// may consume; running past it is corruption, not EOF.
#[derive(Debug, Default)]
pub struct ChunkSource {
    buf: Vec<u8>,
    pos: usize,
}

impl ChunkSource {
    /// Creates an empty source; fill it with [`reload`](Self::reload).
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the next chunk payload of `len` bytes from `reader`.
    pub fn reload<R: std::io::Read>(&mut self, reader: &mut R, len: usize) -> Result<()> {
        self.buf.resize(len, 0);
        reader.read_exact(&mut self.buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::UnexpectedEof
            } else {
                Error::Io(e)
            }
        })?;
        self.pos = 0;
        Ok(())
    }

    /// Returns `true` when every loaded byte has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.pos == self.buf.len()
    }
}

impl ReadByte for ChunkSource {
    fn read_byte(&mut self) -> Result<u8> {
        match self.buf.get(self.pos) {
            Some(&b) => {
                self.pos += 1;
                Ok(b)
            }
            None => Err(Error::corrupt(0, Corruption::RangeCoderTruncated)),
        }
    }
}

impl<S> RangeDecoder<S> {
    /// Builds a decoder around an unprepared source.
    ///
    /// Used with [`ChunkSource`], where initialisation happens per chunk via
    /// [`RangeDecoder::prepare`] rather than at construction.
    pub fn new_unprimed(src: S) -> Self {
        Self {
            src,
            range: 0,
            code: 0,
        }
    }

    /// Gives access to the source, e.g. to reload a chunk buffer.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.src
    }
}

impl RangeDecoder<ChunkSource> {
    /// Re-initialises the coder from the first five bytes of a freshly
    /// loaded chunk payload.
    pub fn prepare(&mut self) -> Result<()> {
        let lead = self.src.read_byte()?;
        if lead != 0x00 {
            return Err(Error::corrupt(0, Corruption::RangeCoderLeadByte));
        }
        let mut code = 0u32;
        for _ in 0..4 {
            code = (code << 8) | self.src.read_byte()? as u32;
        }
        self.code = code;
        self.range = 0xFFFF_FFFF;
        Ok(())
    }

    /// Clean termination for a chunk: all payload consumed and code zero.
    pub fn finished_clean(&self) -> bool {
        self.src.is_exhausted() && self.code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct SliceSource<'a> {
        data: &'a [u8],
        pos: usize,
    }

    impl ReadByte for SliceSource<'_> {
        fn read_byte(&mut self) -> Result<u8> {
            match self.data.get(self.pos) {
                Some(&b) => {
                    self.pos += 1;
                    Ok(b)
                }
                None => Err(Error::corrupt(0, Corruption::RangeCoderTruncated)),
            }
        }
    }

    fn decoder(data: &[u8]) -> RangeDecoder<SliceSource<'_>> {
        RangeDecoder::new(SliceSource { data, pos: 0 }).unwrap()
    }

    #[test]
    fn test_prob_adaptation() {
        let mut rc = RangeEncoder::new();
        let mut prob = PROB_INIT;
        rc.encode_bit(&mut prob, 0);
        assert!(prob > PROB_INIT);
        rc.encode_bit(&mut prob, 1);
        rc.encode_bit(&mut prob, 1);
        assert!(prob < PROB_INIT);
    }

    #[test]
    fn test_flush_is_five_bytes() {
        let mut rc = RangeEncoder::new();
        let out = rc.finish_chunk();
        assert_eq!(out.len(), 5);
        assert_eq!(out[0], 0x00);
    }

    #[test]
    fn test_bit_roundtrip_with_shared_probs() {
        let bits = [0u32, 1, 1, 0, 1, 0, 0, 0, 1, 1, 0, 1];
        let mut rc = RangeEncoder::new();
        let mut enc_prob = PROB_INIT;
        for &b in &bits {
            rc.encode_bit(&mut enc_prob, b);
        }
        let data = rc.finish_chunk();

        let mut dec = decoder(&data);
        let mut dec_prob = PROB_INIT;
        for &b in &bits {
            assert_eq!(dec.decode_bit(&mut dec_prob).unwrap(), b);
        }
        // Probability trajectories must be identical on both sides.
        assert_eq!(enc_prob, dec_prob);
    }

    #[test]
    fn test_direct_bits_roundtrip() {
        let mut rc = RangeEncoder::new();
        rc.encode_direct_bits(0b1011_0010, 8);
        rc.encode_direct_bits(0x3FF, 10);
        let data = rc.finish_chunk();

        let mut dec = decoder(&data);
        assert_eq!(dec.decode_direct_bits(8).unwrap(), 0b1011_0010);
        assert_eq!(dec.decode_direct_bits(10).unwrap(), 0x3FF);
    }

    #[test]
    fn test_bit_tree_roundtrip() {
        let mut rc = RangeEncoder::new();
        let mut enc_probs = [PROB_INIT; 64];
        for sym in [0u32, 5, 63, 32, 17] {
            rc.encode_bit_tree(&mut enc_probs, 6, sym);
        }
        let data = rc.finish_chunk();

        let mut dec = decoder(&data);
        let mut dec_probs = [PROB_INIT; 64];
        for sym in [0u32, 5, 63, 32, 17] {
            assert_eq!(dec.decode_bit_tree(&mut dec_probs, 6).unwrap(), sym);
        }
        assert_eq!(enc_probs, dec_probs);
    }

    #[test]
    fn test_reverse_bit_tree_roundtrip() {
        let mut rc = RangeEncoder::new();
        let mut enc_probs = [PROB_INIT; 16];
        for sym in [0u32, 10, 15, 7] {
            rc.encode_bit_tree_reverse(&mut enc_probs, 4, sym);
        }
        let data = rc.finish_chunk();

        let mut dec = decoder(&data);
        let mut dec_probs = [PROB_INIT; 16];
        for sym in [0u32, 10, 15, 7] {
            assert_eq!(dec.decode_bit_tree_reverse(&mut dec_probs, 4).unwrap(), sym);
        }
    }

    #[test]
    fn test_decoder_rejects_nonzero_lead() {
        let data = [0x01u8, 0, 0, 0, 0];
        let err = RangeDecoder::new(SliceSource {
            data: &data,
            pos: 0,
        })
        .unwrap_err();
        assert!(matches!(
            err,
            Error::CorruptInput {
                kind: Corruption::RangeCoderLeadByte,
                ..
            }
        ));
    }

    #[test]
    fn test_decoder_truncated_input() {
        let data = [0x00u8, 0, 0];
        let err = RangeDecoder::new(SliceSource {
            data: &data,
            pos: 0,
        })
        .unwrap_err();
        assert!(err.is_truncation());
    }

    #[test]
    fn test_possibly_at_end_after_clean_stream() {
        // An encoder flushed immediately emits five zero bytes; the decoder
        // sees code == 0 from the start.
        let mut rc = RangeEncoder::new();
        let data = rc.finish_chunk();
        let dec = decoder(&data);
        assert!(dec.possibly_at_end());
    }

    #[test]
    fn test_chunk_source_exhaustion() {
        let mut src = ChunkSource::new();
        let mut cur = std::io::Cursor::new(vec![1u8, 2, 3]);
        src.reload(&mut cur, 3).unwrap();
        assert!(!src.is_exhausted());
        for expect in [1u8, 2, 3] {
            assert_eq!(src.read_byte().unwrap(), expect);
        }
        assert!(src.is_exhausted());
        assert!(src.read_byte().is_err());
    }

    #[test]
    fn test_len_bound_grows() {
        let mut rc = RangeEncoder::new();
        let initial = rc.len_bound();
        let mut prob = PROB_INIT;
        for i in 0..1000 {
            rc.encode_bit(&mut prob, (i & 1) as u32);
        }
        assert!(rc.len_bound() > initial);
    }
}
