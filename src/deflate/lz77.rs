//! LZ77 match finder over a sliding window, using hash chains.

use super::{MAX_MATCH, MIN_MATCH, WINDOW_SIZE};

const HASH_BITS: u32 = 15;
const HASH_SIZE: usize = 1 << HASH_BITS;
const WINDOW_MASK: usize = WINDOW_SIZE - 1;
const NIL: u32 = u32::MAX;

/// Per-level search parameters.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MatchConfig {
    /// Shorten the lazy search once a match this long is found.
    pub(crate) good: usize,
    /// Do not look for a better match once one this long is found.
    pub(crate) lazy: usize,
    /// Stop searching once a match this long is found.
    pub(crate) nice: usize,
    /// Maximum hash chain length to walk.
    pub(crate) chain: usize,
    pub(crate) lazy_matching: bool,
}

const fn cfg(good: usize, lazy: usize, nice: usize, chain: usize, lazy_matching: bool) -> MatchConfig {
    MatchConfig {
        good,
        lazy,
        nice,
        chain,
        lazy_matching,
    }
}

/// Levels 1..=9; level 0 never searches.
const CONFIGS: [MatchConfig; 10] = [
    cfg(0, 0, 0, 0, false),
    cfg(4, 4, 8, 4, false),
    cfg(4, 5, 16, 8, false),
    cfg(4, 6, 32, 32, false),
    cfg(4, 4, 16, 16, true),
    cfg(8, 16, 32, 32, true),
    cfg(8, 16, 128, 128, true),
    cfg(8, 32, 128, 256, true),
    cfg(32, 128, 258, 1024, true),
    cfg(32, 258, 258, 4096, true),
];

pub(crate) fn config_for(level: u8) -> MatchConfig {
    CONFIGS[level.min(9) as usize]
}

/// Sliding window plus hash chains.
///
/// `buf` holds up to one window of history followed by the bytes that still
/// have to be encoded (`buf[cursor..]`). Positions stored in `head`/`prev`
/// are indices into `buf` and are rebased whenever the window slides.
pub(crate) struct Matcher {
    pub(crate) buf: Vec<u8>,
    pub(crate) cursor: usize,
    inserted: usize,
    head: Vec<u32>,
    prev: Vec<u32>,
}

impl Matcher {
    pub(crate) fn new() -> Self {
        Self {
            buf: Vec::new(),
            cursor: 0,
            inserted: 0,
            head: vec![NIL; HASH_SIZE],
            prev: vec![NIL; WINDOW_SIZE],
        }
    }

    pub(crate) fn lookahead(&self) -> usize {
        self.buf.len() - self.cursor
    }

    pub(crate) fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Seed the window with history that is never emitted.
    pub(crate) fn set_dictionary(&mut self, dict: &[u8]) {
        let dict = &dict[dict.len().saturating_sub(WINDOW_SIZE)..];
        self.buf.extend_from_slice(dict);
        self.cursor = self.buf.len();
        self.insert_until(self.cursor);
    }

    /// Forget all history (full flush).
    pub(crate) fn forget_history(&mut self) {
        self.head.fill(NIL);
        self.prev.fill(NIL);
        self.inserted = self.cursor;
    }

    pub(crate) fn reset(&mut self) {
        self.buf.clear();
        self.cursor = 0;
        self.inserted = 0;
        self.head.fill(NIL);
        self.prev.fill(NIL);
    }

    pub(crate) fn release(&mut self) {
        self.buf = Vec::new();
        self.head = Vec::new();
        self.prev = Vec::new();
        self.cursor = 0;
        self.inserted = 0;
    }

    /// Drop history older than one window. Shifts by a multiple of the window
    /// size so that `prev` slots stay valid.
    pub(crate) fn slide(&mut self) {
        if self.cursor < 2 * WINDOW_SIZE {
            return;
        }
        let shift = (self.cursor - WINDOW_SIZE) & !WINDOW_MASK;
        self.buf.drain(..shift);
        self.cursor -= shift;
        self.inserted = self.inserted.saturating_sub(shift);

        let rebase = |slot: &mut u32| {
            *slot = if *slot == NIL || (*slot as usize) < shift {
                NIL
            } else {
                *slot - shift as u32
            };
        };
        self.head.iter_mut().for_each(rebase);
        self.prev.iter_mut().for_each(rebase);
    }

    fn hash(&self, pos: usize) -> usize {
        let b = &self.buf[pos..pos + MIN_MATCH];
        let v = (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32;
        (v.wrapping_mul(0x9E37_79B1) >> (32 - HASH_BITS)) as usize
    }

    /// Insert every position below `end` that has not been hashed yet.
    pub(crate) fn insert_until(&mut self, end: usize) {
        while self.inserted < end {
            let pos = self.inserted;
            if pos + MIN_MATCH <= self.buf.len() {
                let h = self.hash(pos);
                self.prev[pos & WINDOW_MASK] = self.head[h];
                self.head[h] = pos as u32;
            }
            self.inserted += 1;
        }
    }

    /// Find the longest match for `pos` among hashed positions.
    ///
    /// Returns `(length, distance)`; length is 0 when nothing of at least
    /// `MIN_MATCH` bytes was found.
    pub(crate) fn find_match(&self, pos: usize, max_chain: usize, nice: usize) -> (usize, usize) {
        let max_len = (self.buf.len() - pos).min(MAX_MATCH);
        if max_len < MIN_MATCH {
            return (0, 0);
        }
        let nice = nice.min(max_len);
        let limit = pos.saturating_sub(WINDOW_SIZE);

        let mut best_len = MIN_MATCH - 1;
        let mut best_dist = 0;
        let mut candidate = self.head[self.hash(pos)];
        let mut chain = max_chain;

        while candidate != NIL && chain > 0 {
            let cand = candidate as usize;
            if cand >= pos || cand < limit {
                break;
            }
            if self.buf[cand + best_len] == self.buf[pos + best_len] {
                let len = self.buf[cand..cand + max_len]
                    .iter()
                    .zip(&self.buf[pos..pos + max_len])
                    .take_while(|(a, b)| a == b)
                    .count();
                if len > best_len {
                    best_len = len;
                    best_dist = pos - cand;
                    if len >= nice {
                        break;
                    }
                }
            }
            let next = self.prev[cand & WINDOW_MASK];
            if next == NIL || next as usize >= cand {
                break;
            }
            candidate = next;
            chain -= 1;
        }

        if best_len >= MIN_MATCH {
            (best_len, best_dist)
        } else {
            (0, 0)
        }
    }
}
