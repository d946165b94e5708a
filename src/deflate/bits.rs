//! Bit-level I/O in DEFLATE order (least significant bit first).

/// Accumulates bits and appends completed bytes to `out`.
#[derive(Default)]
pub(crate) struct BitWriter {
    pub(crate) out: Vec<u8>,
    bit_buf: u64,
    bit_count: u32,
}

impl BitWriter {
    pub(crate) fn write_bits(&mut self, value: u32, count: u32) {
        debug_assert!(count <= 32);
        if count == 0 {
            return;
        }
        self.bit_buf |= ((value as u64) & ((1u64 << count) - 1)) << self.bit_count;
        self.bit_count += count;
        while self.bit_count >= 8 {
            self.out.push(self.bit_buf as u8);
            self.bit_buf >>= 8;
            self.bit_count -= 8;
        }
    }

    /// Pad with zero bits up to the next byte boundary.
    pub(crate) fn align(&mut self) {
        if self.bit_count > 0 {
            self.out.push(self.bit_buf as u8);
            self.bit_buf = 0;
            self.bit_count = 0;
        }
    }

    /// Append raw bytes; the writer must be byte aligned.
    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) {
        debug_assert_eq!(self.bit_count, 0);
        self.out.extend_from_slice(bytes);
    }

    pub(crate) fn clear(&mut self) {
        self.out.clear();
        self.bit_buf = 0;
        self.bit_count = 0;
    }
}

/// Committed position of a [`BitReader`]; restoring it rolls back every read
/// made since it was taken.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct BitCursor {
    pub(crate) pos: usize,
    bit_buf: u64,
    bit_count: u32,
}

impl BitCursor {
    /// Whole bytes loaded into the bit buffer but not consumed.
    pub(crate) fn buffered_bytes(&self) -> usize {
        (self.bit_count / 8) as usize
    }

    /// Shift the byte position after the front of the input was discarded.
    pub(crate) fn rebase(&mut self, consumed: usize) {
        self.pos -= consumed;
    }
}

/// Reads bits from a byte slice. Every read returns `None` instead of
/// blocking when the slice runs out, leaving the caller free to discard the
/// reader and retry from its last committed cursor once more input arrives.
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    cur: BitCursor,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(data: &'a [u8], cur: BitCursor) -> Self {
        Self { data, cur }
    }

    pub(crate) fn cursor(&self) -> BitCursor {
        self.cur
    }

    fn fill(&mut self, count: u32) -> bool {
        while self.cur.bit_count < count {
            let Some(&byte) = self.data.get(self.cur.pos) else {
                return false;
            };
            self.cur.bit_buf |= (byte as u64) << self.cur.bit_count;
            self.cur.pos += 1;
            self.cur.bit_count += 8;
        }
        true
    }

    pub(crate) fn bits(&mut self, count: u32) -> Option<u32> {
        if count == 0 {
            return Some(0);
        }
        if !self.fill(count) {
            return None;
        }
        let value = (self.cur.bit_buf & ((1u64 << count) - 1)) as u32;
        self.consume(count);
        Some(value)
    }

    /// Look at up to `count` bits without consuming them. Returns the bits
    /// and how many of them are actually backed by input.
    pub(crate) fn peek(&mut self, count: u32) -> (u32, u32) {
        self.fill(count);
        let avail = self.cur.bit_count.min(count);
        let value = (self.cur.bit_buf & ((1u64 << count) - 1)) as u32;
        (value, avail)
    }

    pub(crate) fn consume(&mut self, count: u32) {
        debug_assert!(count <= self.cur.bit_count);
        self.cur.bit_buf >>= count;
        self.cur.bit_count -= count;
    }

    /// Drop bits up to the next byte boundary.
    pub(crate) fn align(&mut self) {
        let partial = self.cur.bit_count % 8;
        self.consume(partial);
    }

    pub(crate) fn has_buffered_byte(&self) -> bool {
        self.cur.bit_count >= 8
    }

    /// Borrow up to `max` raw bytes; only valid when the bit buffer is
    /// empty.
    pub(crate) fn take_bytes(&mut self, max: usize) -> &'a [u8] {
        debug_assert_eq!(self.cur.bit_count, 0);
        let data = self.data;
        let start = self.cur.pos.min(data.len());
        let end = start + max.min(data.len() - start);
        self.cur.pos = end;
        &data[start..end]
    }
}
