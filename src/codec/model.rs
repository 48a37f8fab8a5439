//! LZMA probability model and symbol codecs.
//!
//! Context-indexed 11-bit probabilities driving the range coder: the
//! literal codec (with its matched-byte variant), the length codec, the
//! distance codec (slot, special reverse tree, alignment tree), the
//! 12-state transition automaton and the `rep[0..3]` repeat-distance
//! history. Encoding and decoding walk the same tables so both sides adapt
//! identically.

use crate::codec::dict::LzDict;
use crate::codec::rangecoder::{
    init_probs, PROB_INIT, RangeDecoder, RangeEncoder, ReadByte,
};
use crate::codec::{DIST_EOS, MATCH_LEN_MIN, Properties};
use crate::{Corruption, Error, Result};

const NUM_STATES: usize = 12;
const POS_STATES_MAX: usize = 16;

const LEN_LOW_BITS: u32 = 3;
const LEN_LOW_SYMBOLS: u32 = 1 << LEN_LOW_BITS;
const LEN_MID_BITS: u32 = 3;
const LEN_MID_SYMBOLS: u32 = 1 << LEN_MID_BITS;
const LEN_HIGH_BITS: u32 = 8;
const LEN_HIGH_SYMBOLS: usize = 1 << LEN_HIGH_BITS;

const DIST_SLOTS: usize = 64;
const DIST_SLOT_BITS: u32 = 6;
const LEN_TO_DIST_STATES: usize = 4;

const ALIGN_BITS: u32 = 4;
const ALIGN_SIZE: usize = 1 << ALIGN_BITS;

const START_DIST_MODEL_INDEX: u32 = 4;
const END_DIST_MODEL_INDEX: u32 = 14;
const FULL_DISTANCES: u32 = 1 << (END_DIST_MODEL_INDEX / 2);
const SPECIAL_SIZE: usize = (1 + FULL_DISTANCES - END_DIST_MODEL_INDEX) as usize;

/// The 12-state transition automaton.
///
/// States 0..=6 follow a literal; 7..=11 follow a match, rep or short rep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct State(u8);

impl State {
    /// Initial state.
    pub const fn new() -> Self {
        Self(0)
    }

    /// Table index of the current state.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns `true` when the last operation was a literal.
    pub fn is_literal(self) -> bool {
        self.0 < 7
    }

    /// Transition after a literal: `s<4 -> 0; 4<=s<10 -> s-3; s>=10 -> s-6`.
    pub fn update_literal(&mut self) {
        self.0 = if self.0 < 4 {
            0
        } else if self.0 < 10 {
            self.0 - 3
        } else {
            self.0 - 6
        };
    }

    /// Transition after a simple match.
    pub fn update_match(&mut self) {
        self.0 = if self.0 < 7 { 7 } else { 10 };
    }

    /// Transition after a rep match.
    pub fn update_rep(&mut self) {
        self.0 = if self.0 < 7 { 8 } else { 11 };
    }

    /// Transition after a short rep.
    pub fn update_short_rep(&mut self) {
        self.0 = if self.0 < 7 { 9 } else { 11 };
    }
}

/// Length codec: a two-bit choice tree selecting 3-bit low (2..9), 3-bit
/// mid (10..17) or 8-bit high (18..273) trees; the low and mid tables are
/// indexed by position state.
#[derive(Debug, Clone)]
struct LengthCoder {
    choice: u16,
    choice2: u16,
    low: [[u16; LEN_LOW_SYMBOLS as usize]; POS_STATES_MAX],
    mid: [[u16; LEN_MID_SYMBOLS as usize]; POS_STATES_MAX],
    high: [u16; LEN_HIGH_SYMBOLS],
}

impl LengthCoder {
    fn new() -> Self {
        Self {
            choice: PROB_INIT,
            choice2: PROB_INIT,
            low: [[PROB_INIT; LEN_LOW_SYMBOLS as usize]; POS_STATES_MAX],
            mid: [[PROB_INIT; LEN_MID_SYMBOLS as usize]; POS_STATES_MAX],
            high: [PROB_INIT; LEN_HIGH_SYMBOLS],
        }
    }

    fn reset(&mut self) {
        self.choice = PROB_INIT;
        self.choice2 = PROB_INIT;
        for row in &mut self.low {
            init_probs(row);
        }
        for row in &mut self.mid {
            init_probs(row);
        }
        init_probs(&mut self.high);
    }

    fn encode(&mut self, rc: &mut RangeEncoder, len: u32, pos_state: usize) {
        debug_assert!((MATCH_LEN_MIN..=crate::codec::MATCH_LEN_MAX).contains(&len));
        let sym = len - MATCH_LEN_MIN;
        if sym < LEN_LOW_SYMBOLS {
            rc.encode_bit(&mut self.choice, 0);
            rc.encode_bit_tree(&mut self.low[pos_state], LEN_LOW_BITS, sym);
        } else if sym < LEN_LOW_SYMBOLS + LEN_MID_SYMBOLS {
            rc.encode_bit(&mut self.choice, 1);
            rc.encode_bit(&mut self.choice2, 0);
            rc.encode_bit_tree(&mut self.mid[pos_state], LEN_MID_BITS, sym - LEN_LOW_SYMBOLS);
        } else {
            rc.encode_bit(&mut self.choice, 1);
            rc.encode_bit(&mut self.choice2, 1);
            rc.encode_bit_tree(
                &mut self.high,
                LEN_HIGH_BITS,
                sym - LEN_LOW_SYMBOLS - LEN_MID_SYMBOLS,
            );
        }
    }

    fn decode<S: ReadByte>(
        &mut self,
        rc: &mut RangeDecoder<S>,
        pos_state: usize,
    ) -> Result<u32> {
        if rc.decode_bit(&mut self.choice)? == 0 {
            let sym = rc.decode_bit_tree(&mut self.low[pos_state], LEN_LOW_BITS)?;
            Ok(MATCH_LEN_MIN + sym)
        } else if rc.decode_bit(&mut self.choice2)? == 0 {
            let sym = rc.decode_bit_tree(&mut self.mid[pos_state], LEN_MID_BITS)?;
            Ok(MATCH_LEN_MIN + LEN_LOW_SYMBOLS + sym)
        } else {
            let sym = rc.decode_bit_tree(&mut self.high, LEN_HIGH_BITS)?;
            Ok(MATCH_LEN_MIN + LEN_LOW_SYMBOLS + LEN_MID_SYMBOLS + sym)
        }
    }
}

/// Maps a distance (0-based) to its logarithmic slot 0..=63.
pub fn dist_slot(dist: u32) -> u32 {
    if dist < START_DIST_MODEL_INDEX {
        return dist;
    }
    let top = 32 - dist.leading_zeros();
    ((top - 1) << 1) | ((dist >> (top - 2)) & 1)
}

/// One step of the decoded operation stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStep {
    /// One or more bytes were produced into the dictionary.
    Data,
    /// The end-of-stream marker was decoded; nothing was produced.
    EndMarker,
}

/// The complete probability store plus automaton state and rep history.
#[derive(Debug, Clone)]
pub struct LzmaModel {
    props: Properties,
    pos_mask: u32,
    lit_pos_mask: u32,

    state: State,
    reps: [u32; 4],

    is_match: [[u16; POS_STATES_MAX]; NUM_STATES],
    is_rep: [u16; NUM_STATES],
    is_rep_g0: [u16; NUM_STATES],
    is_rep_g1: [u16; NUM_STATES],
    is_rep_g2: [u16; NUM_STATES],
    is_rep0_long: [[u16; POS_STATES_MAX]; NUM_STATES],

    literal: Vec<u16>,

    match_len: LengthCoder,
    rep_len: LengthCoder,

    dist_slot: [[u16; DIST_SLOTS]; LEN_TO_DIST_STATES],
    dist_special: [u16; SPECIAL_SIZE],
    dist_align: [u16; ALIGN_SIZE],
}

impl LzmaModel {
    /// Creates a model with every probability at its initial value.
    pub fn new(props: Properties) -> Self {
        let literal_len = 0x300usize << (props.lc + props.lp);
        Self {
            props,
            pos_mask: (1 << props.pb) - 1,
            lit_pos_mask: (1 << props.lp) - 1,
            state: State::new(),
            reps: [0; 4],
            is_match: [[PROB_INIT; POS_STATES_MAX]; NUM_STATES],
            is_rep: [PROB_INIT; NUM_STATES],
            is_rep_g0: [PROB_INIT; NUM_STATES],
            is_rep_g1: [PROB_INIT; NUM_STATES],
            is_rep_g2: [PROB_INIT; NUM_STATES],
            is_rep0_long: [[PROB_INIT; POS_STATES_MAX]; NUM_STATES],
            literal: vec![PROB_INIT; literal_len],
            match_len: LengthCoder::new(),
            rep_len: LengthCoder::new(),
            dist_slot: [[PROB_INIT; DIST_SLOTS]; LEN_TO_DIST_STATES],
            dist_special: [PROB_INIT; SPECIAL_SIZE],
            dist_align: [PROB_INIT; ALIGN_SIZE],
        }
    }

    /// The modelling parameters this model was built with.
    pub fn props(&self) -> Properties {
        self.props
    }

    /// Current rep history, most recent first.
    pub fn reps(&self) -> &[u32; 4] {
        &self.reps
    }

    /// Current automaton state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Resets probabilities, automaton state and rep history (LZMA2 state
    /// reset). The dictionary position is not part of this state.
    pub fn reset(&mut self) {
        self.state = State::new();
        self.reps = [0; 4];
        for row in &mut self.is_match {
            init_probs(row);
        }
        init_probs(&mut self.is_rep);
        init_probs(&mut self.is_rep_g0);
        init_probs(&mut self.is_rep_g1);
        init_probs(&mut self.is_rep_g2);
        for row in &mut self.is_rep0_long {
            init_probs(row);
        }
        init_probs(&mut self.literal);
        self.match_len.reset();
        self.rep_len.reset();
        for row in &mut self.dist_slot {
            init_probs(row);
        }
        init_probs(&mut self.dist_special);
        init_probs(&mut self.dist_align);
    }

    fn pos_state(&self, pos: u64) -> usize {
        (pos as u32 & self.pos_mask) as usize
    }

    fn literal_offset(&self, pos: u64, prev_byte: u8) -> usize {
        let lit_state = ((pos as u32 & self.lit_pos_mask) << self.props.lc)
            + ((prev_byte as u32) >> (8 - self.props.lc));
        0x300 * lit_state as usize
    }

    // ----- encoding -----

    /// Encodes a literal byte at uncompressed position `pos`.
    ///
    /// `match_byte` is the byte at `rep[0]` behind the position; it is only
    /// consulted in the matched-literal states (state >= 7).
    pub fn encode_literal(
        &mut self,
        rc: &mut RangeEncoder,
        byte: u8,
        pos: u64,
        prev_byte: u8,
        match_byte: u8,
    ) {
        let pos_state = self.pos_state(pos);
        rc.encode_bit(&mut self.is_match[self.state.index()][pos_state], 0);

        let off = self.literal_offset(pos, prev_byte);
        if self.state.is_literal() {
            self.encode_literal_normal(rc, off, byte);
        } else {
            self.encode_literal_matched(rc, off, byte, match_byte);
        }
        self.state.update_literal();
    }

    fn encode_literal_normal(&mut self, rc: &mut RangeEncoder, off: usize, byte: u8) {
        let mut context = 1usize;
        for i in (0..8).rev() {
            let bit = ((byte >> i) & 1) as u32;
            rc.encode_bit(&mut self.literal[off + context], bit);
            context = (context << 1) | bit as usize;
        }
    }

    fn encode_literal_matched(
        &mut self,
        rc: &mut RangeEncoder,
        off: usize,
        byte: u8,
        match_byte: u8,
    ) {
        let mut context = 1usize;
        let mut match_sym = (match_byte as usize) << 1;
        let mut sym = (byte as usize) | 0x100;
        loop {
            let match_bit = (match_sym >> 8) & 1;
            match_sym <<= 1;
            let bit = ((sym >> 7) & 1) as u32;
            sym <<= 1;

            let idx = off + 0x100 + (match_bit << 8) + context;
            rc.encode_bit(&mut self.literal[idx], bit);
            context = (context << 1) | bit as usize;
            if context >= 0x100 {
                return;
            }
            if match_bit != bit as usize {
                // Diverged from the match byte; finish on the plain tables.
                while context < 0x100 {
                    let bit = ((sym >> 7) & 1) as u32;
                    sym <<= 1;
                    rc.encode_bit(&mut self.literal[off + context], bit);
                    context = (context << 1) | bit as usize;
                }
                return;
            }
        }
    }

    /// Encodes a simple match. `dist` is 0-based; [`DIST_EOS`] encodes the
    /// end-of-stream marker.
    pub fn encode_match(&mut self, rc: &mut RangeEncoder, dist: u32, len: u32, pos: u64) {
        let pos_state = self.pos_state(pos);
        rc.encode_bit(&mut self.is_match[self.state.index()][pos_state], 1);
        rc.encode_bit(&mut self.is_rep[self.state.index()], 0);

        self.match_len.encode(rc, len, pos_state);
        self.encode_distance(rc, dist, len);

        self.reps = [dist, self.reps[0], self.reps[1], self.reps[2]];
        self.state.update_match();
    }

    /// Encodes a rep match. `len == 1` with `rep_index == 0` is the short
    /// rep; other indices rotate the chosen distance to the front.
    pub fn encode_rep(&mut self, rc: &mut RangeEncoder, rep_index: usize, len: u32, pos: u64) {
        let pos_state = self.pos_state(pos);
        let s = self.state.index();
        rc.encode_bit(&mut self.is_match[s][pos_state], 1);
        rc.encode_bit(&mut self.is_rep[s], 1);

        if rep_index == 0 {
            rc.encode_bit(&mut self.is_rep_g0[s], 0);
            if len == 1 {
                rc.encode_bit(&mut self.is_rep0_long[s][pos_state], 0);
                self.state.update_short_rep();
                return;
            }
            rc.encode_bit(&mut self.is_rep0_long[s][pos_state], 1);
        } else {
            rc.encode_bit(&mut self.is_rep_g0[s], 1);
            if rep_index == 1 {
                rc.encode_bit(&mut self.is_rep_g1[s], 0);
            } else {
                rc.encode_bit(&mut self.is_rep_g1[s], 1);
                rc.encode_bit(&mut self.is_rep_g2[s], (rep_index != 2) as u32);
            }
            let dist = self.reps[rep_index];
            for i in (1..=rep_index).rev() {
                self.reps[i] = self.reps[i - 1];
            }
            self.reps[0] = dist;
        }

        self.rep_len.encode(rc, len, pos_state);
        self.state.update_rep();
    }

    /// Encodes the end-of-stream marker (distance 2^32, length 2).
    pub fn encode_eos(&mut self, rc: &mut RangeEncoder, pos: u64) {
        self.encode_match(rc, DIST_EOS, MATCH_LEN_MIN, pos);
    }

    fn encode_distance(&mut self, rc: &mut RangeEncoder, dist: u32, len: u32) {
        let len_state = ((len - MATCH_LEN_MIN).min(LEN_TO_DIST_STATES as u32 - 1)) as usize;
        let slot = dist_slot(dist);
        rc.encode_bit_tree(&mut self.dist_slot[len_state], DIST_SLOT_BITS, slot);

        if slot < START_DIST_MODEL_INDEX {
            return;
        }
        let direct_bits = (slot >> 1) - 1;
        let base = (2 | (slot & 1)) << direct_bits;
        let reduced = dist - base;

        if slot < END_DIST_MODEL_INDEX {
            // Reverse tree over the per-slot special probabilities.
            let origin = (base - slot) as usize;
            let mut m = 1usize;
            for i in 0..direct_bits {
                let bit = (reduced >> i) & 1;
                rc.encode_bit(&mut self.dist_special[origin + m], bit);
                m = (m << 1) | bit as usize;
            }
        } else {
            rc.encode_direct_bits(reduced >> ALIGN_BITS, direct_bits - ALIGN_BITS);
            rc.encode_bit_tree_reverse(
                &mut self.dist_align,
                ALIGN_BITS,
                reduced & (ALIGN_SIZE as u32 - 1),
            );
        }
    }

    // ----- decoding -----

    fn decode_distance<S: ReadByte>(
        &mut self,
        rc: &mut RangeDecoder<S>,
        len: u32,
    ) -> Result<u32> {
        let len_state = ((len - MATCH_LEN_MIN).min(LEN_TO_DIST_STATES as u32 - 1)) as usize;
        let slot = rc.decode_bit_tree(&mut self.dist_slot[len_state], DIST_SLOT_BITS)?;

        if slot < START_DIST_MODEL_INDEX {
            return Ok(slot);
        }
        let direct_bits = (slot >> 1) - 1;
        let base = (2 | (slot & 1)) << direct_bits;

        if slot < END_DIST_MODEL_INDEX {
            let origin = (base - slot) as usize;
            let mut m = 1usize;
            let mut reduced = 0u32;
            for i in 0..direct_bits {
                let bit = rc.decode_bit(&mut self.dist_special[origin + m])?;
                m = (m << 1) | bit as usize;
                reduced |= bit << i;
            }
            Ok(base + reduced)
        } else {
            let high = rc.decode_direct_bits(direct_bits - ALIGN_BITS)?;
            let align = rc.decode_bit_tree_reverse(&mut self.dist_align, ALIGN_BITS)?;
            Ok(base
                .wrapping_add(high << ALIGN_BITS)
                .wrapping_add(align))
        }
    }

    fn decode_literal<S: ReadByte>(
        &mut self,
        rc: &mut RangeDecoder<S>,
        dict: &LzDict,
    ) -> Result<u8> {
        let prev_byte = dict.byte_at(0);
        let off = self.literal_offset(dict.head(), prev_byte);

        let mut context = 1usize;
        if self.state.is_literal() {
            while context < 0x100 {
                let bit = rc.decode_bit(&mut self.literal[off + context])?;
                context = (context << 1) | bit as usize;
            }
        } else {
            let mut match_sym = dict.byte_at(self.reps[0]) as usize;
            loop {
                let match_bit = (match_sym >> 7) & 1;
                match_sym = (match_sym << 1) & 0xFF;

                let idx = off + 0x100 + (match_bit << 8) + context;
                let bit = rc.decode_bit(&mut self.literal[idx])? as usize;
                context = (context << 1) | bit;
                if context >= 0x100 {
                    break;
                }
                if match_bit != bit {
                    while context < 0x100 {
                        let bit = rc.decode_bit(&mut self.literal[off + context])?;
                        context = (context << 1) | bit as usize;
                    }
                    break;
                }
            }
        }
        Ok((context - 0x100) as u8)
    }

    /// Decodes one operation and applies it to the dictionary.
    ///
    /// Returns [`DecodeStep::EndMarker`] when the reserved end-of-stream
    /// distance is decoded; the caller decides whether it was legal there.
    pub fn decode_step<S: ReadByte>(
        &mut self,
        rc: &mut RangeDecoder<S>,
        dict: &mut LzDict,
    ) -> Result<DecodeStep> {
        let pos_state = self.pos_state(dict.head());
        let s = self.state.index();

        if rc.decode_bit(&mut self.is_match[s][pos_state])? == 0 {
            let byte = self.decode_literal(rc, dict)?;
            dict.put_byte(byte);
            self.state.update_literal();
            return Ok(DecodeStep::Data);
        }

        let (dist, len);
        if rc.decode_bit(&mut self.is_rep[s])? == 0 {
            len = self.match_len.decode(rc, pos_state)?;
            dist = self.decode_distance(rc, len)?;
            self.reps = [dist, self.reps[0], self.reps[1], self.reps[2]];
            if dist == DIST_EOS {
                return Ok(DecodeStep::EndMarker);
            }
            self.state.update_match();
        } else if rc.decode_bit(&mut self.is_rep_g0[s])? == 0 {
            if rc.decode_bit(&mut self.is_rep0_long[s][pos_state])? == 0 {
                // Short rep: one byte at rep[0].
                let rep0 = self.reps[0];
                if rep0 as u64 >= dict.current_len() {
                    return Err(Error::corrupt(dict.head(), Corruption::DistanceTooFar));
                }
                let byte = dict.byte_at(rep0);
                dict.put_byte(byte);
                self.state.update_short_rep();
                return Ok(DecodeStep::Data);
            }
            self.state.update_rep();
            len = self.rep_len.decode(rc, pos_state)?;
            dist = self.reps[0];
        } else {
            let rep_index = if rc.decode_bit(&mut self.is_rep_g1[s])? == 0 {
                1
            } else if rc.decode_bit(&mut self.is_rep_g2[s])? == 0 {
                2
            } else {
                3
            };
            dist = self.reps[rep_index];
            for i in (1..=rep_index).rev() {
                self.reps[i] = self.reps[i - 1];
            }
            self.reps[0] = dist;
            self.state.update_rep();
            len = self.rep_len.decode(rc, pos_state)?;
        }

        dict.copy_match(dist, len)?;
        Ok(DecodeStep::Data)
    }
}
