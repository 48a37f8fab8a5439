//! Decoder-side sliding dictionary.
//!
//! A ring buffer holding the most recent decompressed bytes. The raw LZMA
//! decoder writes literals and match copies into it; the stream readers
//! flush decoded bytes out of it into caller buffers. A per-step limit keeps
//! the unflushed span within the ring so streaming reads of any size are
//! safe with any dictionary size.

use std::io::Read;

use crate::{Corruption, Error, Result};

/// Sliding decode window.
#[derive(Debug)]
pub struct LzDict {
    buf: Box<[u8]>,
    /// Next write index in the ring.
    pos: usize,
    /// Bytes written since the last dictionary reset. Monotone within a
    /// reset scope; also the position fed to the probability model.
    head: u64,
    /// Bytes handed out through [`flush`](Self::flush).
    flushed: u64,
    /// Absolute `head` bound for the current decode step.
    limit: u64,
    /// Remainder of a match copy that ran into the limit.
    pending_len: u32,
    pending_dist: u32,
}

impl LzDict {
    /// Allocates a dictionary of `dict_size` bytes (floored at the format
    /// minimum of 4096).
    pub fn new(dict_size: u32) -> Self {
        let cap = dict_size.max(crate::codec::DICT_SIZE_MIN) as usize;
        Self {
            buf: vec![0u8; cap].into_boxed_slice(),
            pos: 0,
            head: 0,
            flushed: 0,
            limit: 0,
            pending_len: 0,
            pending_dist: 0,
        }
    }

    /// Dictionary capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Total bytes decoded since the last dictionary reset.
    pub fn head(&self) -> u64 {
        self.head
    }

    /// Bytes currently resolvable as match sources.
    pub fn current_len(&self) -> u64 {
        self.head.min(self.buf.len() as u64)
    }

    /// Resets the window. Valid only once all decoded bytes are flushed.
    pub fn reset(&mut self) {
        debug_assert_eq!(self.head, self.flushed);
        self.pos = 0;
        self.head = 0;
        self.flushed = 0;
        self.limit = 0;
        self.pending_len = 0;
        self.pending_dist = 0;
    }

    /// Sets the decode budget for the next step to at most `n` bytes,
    /// clamped so the unflushed span cannot outgrow the ring.
    pub fn set_limit(&mut self, n: usize) {
        let unflushed = (self.head - self.flushed) as usize;
        let room = self.buf.len() - unflushed;
        self.limit = self.head + n.min(room) as u64;
    }

    /// Remaining bytes in the current decode budget.
    pub fn space(&self) -> usize {
        (self.limit - self.head) as usize
    }

    /// Returns `true` while the current step's budget has room.
    pub fn has_space(&self) -> bool {
        self.limit > self.head && self.pending_len == 0
    }

    /// Returns `true` if a match copy was split by the limit and has not
    /// finished yet.
    pub fn has_pending(&self) -> bool {
        self.pending_len > 0
    }

    /// The byte at 0-based distance `dist` behind the head, or 0 when the
    /// distance exceeds the current window length.
    pub fn byte_at(&self, dist: u32) -> u8 {
        if dist as u64 >= self.current_len() {
            return 0;
        }
        let cap = self.buf.len();
        let back = dist as usize + 1;
        let idx = if self.pos >= back {
            self.pos - back
        } else {
            cap - (back - self.pos)
        };
        self.buf[idx]
    }

    /// Appends one literal byte.
    pub fn put_byte(&mut self, byte: u8) {
        debug_assert!(self.head < self.limit);
        self.buf[self.pos] = byte;
        self.pos += 1;
        if self.pos == self.buf.len() {
            self.pos = 0;
        }
        self.head += 1;
    }

    /// Copies `len` bytes from 0-based distance `dist`, one byte at a time
    /// so overlapping copies expand correctly.
    ///
    /// If the step budget runs out mid-copy, the remainder is stashed and
    /// resumed by [`copy_pending`](Self::copy_pending) on the next step.
    pub fn copy_match(&mut self, dist: u32, len: u32) -> Result<()> {
        if dist as u64 >= self.current_len() {
            return Err(Error::corrupt(self.head, Corruption::DistanceTooFar));
        }
        let take = (len as u64).min(self.limit - self.head) as u32;
        for _ in 0..take {
            let byte = self.byte_at(dist);
            self.buf[self.pos] = byte;
            self.pos += 1;
            if self.pos == self.buf.len() {
                self.pos = 0;
            }
            self.head += 1;
        }
        if take < len {
            self.pending_dist = dist;
            self.pending_len = len - take;
        }
        Ok(())
    }

    /// Resumes a limit-split match copy. Call at the start of every decode
    /// step.
    pub fn copy_pending(&mut self) -> Result<()> {
        if self.pending_len == 0 {
            return Ok(());
        }
        let len = self.pending_len;
        self.pending_len = 0;
        self.copy_match(self.pending_dist, len)
    }

    /// Copies `len` raw bytes from `reader` into the window (uncompressed
    /// LZMA2 chunk payload). Bounded by the step budget; the caller loops.
    pub fn copy_uncompressed<R: Read>(&mut self, reader: &mut R, len: usize) -> Result<usize> {
        let take = len.min(self.space());
        let mut copied = 0;
        let mut scratch = [0u8; 4096];
        while copied < take {
            let want = (take - copied).min(scratch.len());
            reader.read_exact(&mut scratch[..want]).map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    Error::UnexpectedEof
                } else {
                    Error::Io(e)
                }
            })?;
            for &b in &scratch[..want] {
                self.buf[self.pos] = b;
                self.pos += 1;
                if self.pos == self.buf.len() {
                    self.pos = 0;
                }
            }
            self.head += want as u64;
            copied += want;
        }
        Ok(copied)
    }

    /// Moves decoded-but-unflushed bytes into `out`, returning the count.
    pub fn flush(&mut self, out: &mut [u8]) -> usize {
        let unflushed = (self.head - self.flushed) as usize;
        let n = unflushed.min(out.len());
        let cap = self.buf.len();
        // Oldest unflushed byte sits `unflushed` positions behind the head.
        let mut idx = if self.pos >= unflushed {
            self.pos - unflushed
        } else {
            cap - (unflushed - self.pos)
        };
        for slot in out[..n].iter_mut() {
            *slot = self.buf[idx];
            idx += 1;
            if idx == cap {
                idx = 0;
            }
        }
        self.flushed += n as u64;
        n
    }
}
