//! Encoder-side window and match finding.
//!
//! The encoder keeps its recent history in a linear buffer that doubles as
//! the LZ77 window: unparsed input sits after `read_pos`, up to
//! `shrink_size` bytes of history sit before it. When the buffer fills, the
//! oldest history is dropped and the hash tables rebased. The greedy parser
//! consults a 3-byte hash chain, the four rep distances and a short-distance
//! scan, then emits one [`Operation`] per step.

use serde::{Deserialize, Serialize};

use crate::codec::{MATCH_LEN_MAX, MATCH_LEN_MIN, Operation};
use crate::{Error, Result};

const HASH_BITS: u32 = 16;
const HASH_SIZE: usize = 1 << HASH_BITS;
const EMPTY: u32 = u32::MAX;

/// Distances probed byte-by-byte in addition to the hash chain.
const SMALL_DIST_SCAN: u32 = 10;

/// Buffer geometry for the encoder window.
///
/// Invariants: `window_size <= shrink_size <= buffer_size` and
/// `shrink_size >= 64 KiB`. `shrink_size` is the history kept when the
/// buffer is compacted; `buffer_size - shrink_size` is the parse lookahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufConfig {
    /// Maximum match distance, i.e. the dictionary size.
    pub window_size: usize,
    /// Total buffer capacity.
    pub buffer_size: usize,
    /// History retained when the buffer is compacted.
    pub shrink_size: usize,
}

impl BufConfig {
    /// Derives a configuration from a window (dictionary) size.
    pub fn from_window(window_size: usize) -> Self {
        let shrink_size = window_size.max(64 << 10);
        Self {
            window_size,
            buffer_size: shrink_size + (64 << 10),
            shrink_size,
        }
    }

    /// Validates the geometry invariants.
    pub fn verify(&self) -> Result<()> {
        if self.shrink_size < (64 << 10) {
            return Err(Error::ConfigInvalid(format!(
                "shrink size {} below one uncompressed chunk (64 KiB)",
                self.shrink_size
            )));
        }
        if self.window_size > self.shrink_size {
            return Err(Error::ConfigInvalid(format!(
                "window size {} exceeds shrink size {}",
                self.window_size, self.shrink_size
            )));
        }
        if self.shrink_size >= self.buffer_size {
            return Err(Error::ConfigInvalid(format!(
                "shrink size {} leaves no room in buffer size {}",
                self.shrink_size, self.buffer_size
            )));
        }
        Ok(())
    }

    /// Bytes of unparsed input the buffer can hold between compactions.
    pub fn lookahead(&self) -> usize {
        self.buffer_size - self.shrink_size
    }
}

/// Match-finder selection.
///
/// All finders obey the same contract; the choice trades search depth for
/// speed and never affects decoder semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParserKind {
    /// Shallow hash-chain walk; the minimum viable finder.
    Greedy,
    /// Hash chains with configurable walk depth and early-exit length.
    HashChain {
        /// Chain positions examined per step.
        depth: u32,
        /// A match at least this long ends the search.
        nice_len: u32,
    },
}

impl Default for ParserKind {
    fn default() -> Self {
        ParserKind::Greedy
    }
}

impl ParserKind {
    fn resolve(self) -> (u32, u32) {
        match self {
            ParserKind::Greedy => (8, 32),
            ParserKind::HashChain { depth, nice_len } => {
                (depth.max(1), nice_len.clamp(MATCH_LEN_MIN, MATCH_LEN_MAX))
            }
        }
    }
}

/// A match candidate during scoring.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    len: u32,
    dist: u32,
}

/// Encoder window plus hash-chain match finder.
#[derive(Debug)]
pub struct MatchFinder {
    cfg: BufConfig,
    depth: u32,
    nice_len: u32,
    buf: Vec<u8>,
    /// Next position to parse.
    read_pos: usize,
    /// Global offset of `buf[0]` since the last window reset.
    base: u64,
    head: Vec<u32>,
    chain: Vec<u32>,
}

impl MatchFinder {
    /// Creates a finder for the given parser and buffer geometry.
    pub fn new(kind: ParserKind, cfg: BufConfig) -> Self {
        let (depth, nice_len) = kind.resolve();
        Self {
            cfg,
            depth,
            nice_len,
            buf: Vec::with_capacity(cfg.buffer_size.min(1 << 20)),
            read_pos: 0,
            base: 0,
            head: vec![EMPTY; HASH_SIZE],
            chain: vec![EMPTY; cfg.buffer_size],
        }
    }

    /// Global position of the parse head since the last reset.
    pub fn global_pos(&self) -> u64 {
        self.base + self.read_pos as u64
    }

    /// Unparsed bytes currently buffered.
    pub fn pending(&self) -> usize {
        self.buf.len() - self.read_pos
    }

    /// Drops all window state (dictionary reset).
    pub fn reset(&mut self) {
        self.buf.clear();
        self.read_pos = 0;
        self.base = 0;
        self.head.fill(EMPTY);
        self.chain.fill(EMPTY);
    }

    /// Appends input, compacting the buffer first if it is full. Returns
    /// the number of bytes consumed; zero means the caller must parse
    /// pending data before more input fits.
    pub fn fill(&mut self, data: &[u8]) -> usize {
        if self.buf.len() == self.cfg.buffer_size {
            self.shift();
        }
        let free = self.cfg.buffer_size - self.buf.len();
        let take = free.min(data.len());
        self.buf.extend_from_slice(&data[..take]);
        take
    }

    /// Drops history beyond `shrink_size` and rebases the hash tables.
    fn shift(&mut self) {
        let delta = self.read_pos.saturating_sub(self.cfg.shrink_size);
        if delta == 0 {
            return;
        }
        self.buf.copy_within(delta.., 0);
        self.buf.truncate(self.buf.len() - delta);
        self.read_pos -= delta;
        self.base += delta as u64;

        let rebase = |v: u32| {
            if v == EMPTY || (v as usize) < delta {
                EMPTY
            } else {
                v - delta as u32
            }
        };
        for slot in self.head.iter_mut() {
            *slot = rebase(*slot);
        }
        for i in 0..self.buf.len() {
            self.chain[i] = rebase(self.chain[i + delta]);
        }
    }

    /// The `len` most recently parsed bytes, for uncompressed chunk output.
    pub fn recent(&self, len: usize) -> &[u8] {
        &self.buf[self.read_pos - len..self.read_pos]
    }

    /// Byte at 0-based distance `dist` behind the parse head.
    pub fn byte_back(&self, dist: u32) -> u8 {
        let back = dist as usize + 1;
        if back > self.read_pos {
            return 0;
        }
        self.buf[self.read_pos - back]
    }

    fn hash3(&self, pos: usize) -> usize {
        let mut h = 2166136261u32;
        for i in 0..3 {
            h ^= self.buf[pos + i] as u32;
            h = h.wrapping_mul(16777619);
        }
        (h >> (32 - HASH_BITS)) as usize & (HASH_SIZE - 1)
    }

    fn insert(&mut self, pos: usize) {
        if pos + 3 > self.buf.len() {
            return;
        }
        let h = self.hash3(pos);
        self.chain[pos] = self.head[h];
        self.head[h] = pos as u32;
    }

    fn extend(&self, a: usize, b: usize, max_len: usize) -> u32 {
        let mut len = 0;
        while len < max_len && self.buf[a + len] == self.buf[b + len] {
            len += 1;
        }
        len as u32
    }

    /// Longest rep candidate, preferring the smallest index on equal length.
    fn best_rep(&self, reps: &[u32; 4], max_len: usize) -> Option<(usize, u32)> {
        let pos = self.read_pos;
        let mut best: Option<(usize, u32)> = None;
        for (idx, &dist) in reps.iter().enumerate() {
            let back = dist as usize + 1;
            if back > pos || (dist as usize) >= self.cfg.window_size {
                continue;
            }
            let len = self.extend(pos, pos - back, max_len);
            if len > best.map_or(0, |(_, l)| l) {
                best = Some((idx, len));
            }
        }
        best
    }

    /// Best chain / short-distance candidate at the parse head.
    fn best_match(&self, max_len: usize) -> Option<Candidate> {
        let pos = self.read_pos;
        let mut best: Option<Candidate> = None;

        let mut consider = |len: u32, dist: u32| {
            if len < MATCH_LEN_MIN {
                return;
            }
            // A short match far away costs more than literals.
            if (len == 2 && dist >= 512) || (len == 3 && dist >= (1 << 15)) {
                return;
            }
            let better = match best {
                None => true,
                Some(b) => len > b.len || (len == b.len && dist < b.dist),
            };
            if better {
                best = Some(Candidate { len, dist });
            }
        };

        for dist in 0..SMALL_DIST_SCAN {
            let back = dist as usize + 1;
            if back > pos {
                break;
            }
            let len = self.extend(pos, pos - back, max_len);
            consider(len, dist);
        }

        if pos + 3 <= self.buf.len() {
            let mut cursor = self.head[self.hash3(pos)];
            let mut steps = 0;
            while cursor != EMPTY && steps < self.depth {
                let cand = cursor as usize;
                if cand >= pos {
                    break;
                }
                let dist = (pos - cand - 1) as u32;
                if dist as usize >= self.cfg.window_size {
                    break;
                }
                if self.buf[cand] == self.buf[pos] {
                    let len = self.extend(pos, cand, max_len);
                    consider(len, dist);
                    if len >= self.nice_len.min(max_len as u32) {
                        break;
                    }
                }
                let next = self.chain[cand];
                if next != EMPTY && next as usize >= cand {
                    break;
                }
                cursor = next;
                steps += 1;
            }
        }

        best
    }

    /// Parses one operation at the head and advances past it.
    ///
    /// `len_cap` additionally bounds the match length (the chunker's
    /// remaining uncompressed budget). There must be pending input.
    pub fn next_op(&mut self, reps: &[u32; 4], len_cap: u32) -> Operation {
        debug_assert!(self.pending() > 0);
        let pos = self.read_pos;
        let max_len = self
            .pending()
            .min(MATCH_LEN_MAX as usize)
            .min(len_cap as usize);

        let rep = self.best_rep(reps, max_len);
        let other = self.best_match(max_len);

        let rep_len = rep.map_or(0, |(_, l)| l);
        let other_len = other.map_or(0, |c| c.len);

        let op = if rep_len >= MATCH_LEN_MIN && rep_len >= other_len {
            let (idx, len) = rep.unwrap();
            Operation::Match {
                dist: reps[idx],
                len,
            }
        } else if other_len >= MATCH_LEN_MIN {
            let c = other.unwrap();
            Operation::Match {
                dist: c.dist,
                len: c.len,
            }
        } else if rep_len == 1 && rep.unwrap().0 == 0 {
            // Length-1 short rep on rep[0] only.
            Operation::Match {
                dist: reps[0],
                len: 1,
            }
        } else {
            Operation::Literal(self.buf[pos])
        };

        let advance = op.len() as usize;
        for p in pos..pos + advance {
            self.insert(p);
        }
        self.read_pos += advance;
        op
    }
}
