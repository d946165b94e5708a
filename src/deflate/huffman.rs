//! Huffman code construction (compressor side) and canonical decoding
//! (decompressor side).

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::bits::BitReader;
use crate::error::{ZipError, ZipResult};

pub(crate) const MAX_BITS: u32 = 15;

/// Number of low bits resolved by the direct lookup table.
const FAST_BITS: u32 = 9;

/// Reverse the lowest `bits` bits of `value`.
fn reverse_bits(value: u32, bits: u32) -> u32 {
    value.reverse_bits() >> (32 - bits)
}

/// Compute Huffman code lengths for `freqs`, no longer than `max_bits`.
///
/// Symbols with zero frequency get length 0. At least two symbols always
/// receive a code so the resulting code is complete even when only one (or
/// no) symbol is in use.
pub(crate) fn build_lengths(freqs: &[u32], max_bits: u32) -> Vec<u8> {
    let mut lengths = vec![0u8; freqs.len()];
    let used: Vec<usize> = (0..freqs.len()).filter(|&s| freqs[s] > 0).collect();

    if used.len() < 2 {
        let first = used.first().copied().unwrap_or(0);
        let second = if first == 0 { 1 } else { 0 };
        lengths[first] = 1;
        lengths[second] = 1;
        return lengths;
    }

    let mut weights: Vec<u64> = used.iter().map(|&s| freqs[s] as u64).collect();
    loop {
        let depths = tree_depths(&weights);
        if depths.iter().all(|&d| d <= max_bits) {
            for (&sym, &depth) in used.iter().zip(&depths) {
                lengths[sym] = depth as u8;
            }
            return lengths;
        }
        // Flatten the distribution and retry until the tree is shallow enough.
        for w in &mut weights {
            *w = (*w >> 1).max(1);
        }
    }
}

/// Depth of every leaf in a Huffman tree built over `weights`.
fn tree_depths(weights: &[u64]) -> Vec<u32> {
    let leaves = weights.len();
    // parent[i] for every node; leaves first, then internal nodes.
    let mut parent = vec![usize::MAX; 2 * leaves - 1];
    let mut heap: BinaryHeap<Reverse<(u64, usize)>> = weights
        .iter()
        .enumerate()
        .map(|(i, &w)| Reverse((w, i)))
        .collect();

    let mut next = leaves;
    while heap.len() > 1 {
        let Some(Reverse((wa, a))) = heap.pop() else { break };
        let Some(Reverse((wb, b))) = heap.pop() else { break };
        parent[a] = next;
        parent[b] = next;
        heap.push(Reverse((wa + wb, next)));
        next += 1;
    }

    // Internal nodes are created after their children, so walking from the
    // root downwards resolves every depth in one reverse pass.
    let mut depth = vec![0u32; next];
    for node in (0..next - 1).rev() {
        depth[node] = depth[parent[node]] + 1;
    }
    depth.truncate(leaves);
    depth
}

/// Canonical codes for a set of code lengths, stored bit-reversed so they
/// can be written LSB first.
pub(crate) struct HuffmanCodes {
    pub(crate) lengths: Vec<u8>,
    pub(crate) codes: Vec<u16>,
}

impl HuffmanCodes {
    pub(crate) fn from_lengths(lengths: &[u8]) -> Self {
        let mut bl_count = [0u16; MAX_BITS as usize + 1];
        for &len in lengths {
            bl_count[len as usize] += 1;
        }
        bl_count[0] = 0;

        let mut next_code = [0u32; MAX_BITS as usize + 1];
        let mut code = 0u32;
        for bits in 1..=MAX_BITS as usize {
            code = (code + bl_count[bits - 1] as u32) << 1;
            next_code[bits] = code;
        }

        let codes = lengths
            .iter()
            .map(|&len| {
                if len == 0 {
                    return 0;
                }
                let c = next_code[len as usize];
                next_code[len as usize] += 1;
                reverse_bits(c, len as u32) as u16
            })
            .collect();

        Self {
            lengths: lengths.to_vec(),
            codes,
        }
    }

    pub(crate) fn from_freqs(freqs: &[u32], max_bits: u32) -> Self {
        Self::from_lengths(&build_lengths(freqs, max_bits))
    }

    /// Total bits needed to code `freqs` with this code, excluding extra bits.
    pub(crate) fn cost(&self, freqs: &[u32]) -> u64 {
        freqs
            .iter()
            .zip(&self.lengths)
            .map(|(&f, &l)| f as u64 * l as u64)
            .sum()
    }
}

/// Canonical Huffman decoder with a direct lookup table for short codes.
pub(crate) struct HuffmanDecoder {
    counts: [u16; MAX_BITS as usize + 1],
    symbols: Vec<u16>,
    /// `(symbol << 4) | length` for every FAST_BITS-bit prefix, 0 if the code
    /// is longer than FAST_BITS.
    fast: Vec<u16>,
}

impl HuffmanDecoder {
    /// Build a decoder from code lengths.
    ///
    /// # Errors
    ///
    /// Returns [`ZipError::InvalidData`] if the lengths over-subscribe the
    /// code space.
    pub(crate) fn new(lengths: &[u8]) -> ZipResult<Self> {
        let mut counts = [0u16; MAX_BITS as usize + 1];
        for &len in lengths {
            if len as u32 > MAX_BITS {
                return Err(ZipError::invalid_data("invalid code length"));
            }
            counts[len as usize] += 1;
        }
        counts[0] = 0;

        let mut left: i32 = 1;
        for &count in &counts[1..] {
            left <<= 1;
            left -= count as i32;
            if left < 0 {
                return Err(ZipError::invalid_data("over-subscribed code lengths set"));
            }
        }

        let mut offsets = [0u16; MAX_BITS as usize + 2];
        for len in 1..=MAX_BITS as usize {
            offsets[len + 1] = offsets[len] + counts[len];
        }
        let mut symbols = vec![0u16; offsets[MAX_BITS as usize + 1] as usize];
        for (sym, &len) in lengths.iter().enumerate() {
            if len > 0 {
                symbols[offsets[len as usize] as usize] = sym as u16;
                offsets[len as usize] += 1;
            }
        }

        let mut fast = vec![0u16; 1 << FAST_BITS];
        let codes = HuffmanCodes::from_lengths(lengths);
        for (sym, (&len, &code)) in lengths.iter().zip(&codes.codes).enumerate() {
            let len = len as u32;
            if len == 0 || len > FAST_BITS {
                continue;
            }
            let mut index = code as usize;
            while index < fast.len() {
                fast[index] = ((sym as u16) << 4) | len as u16;
                index += 1 << len;
            }
        }

        Ok(Self {
            counts,
            symbols,
            fast,
        })
    }

    /// Decode one symbol.
    ///
    /// Returns `Ok(None)` when the reader runs out of input before a complete
    /// code was seen.
    pub(crate) fn decode(&self, reader: &mut BitReader<'_>) -> ZipResult<Option<u16>> {
        let (bits, avail) = reader.peek(MAX_BITS);

        let entry = self.fast[(bits & ((1 << FAST_BITS) - 1)) as usize];
        let len = (entry & 0xF) as u32;
        if len != 0 && len <= avail {
            reader.consume(len);
            return Ok(Some(entry >> 4));
        }

        let mut code: i32 = 0;
        let mut first: i32 = 0;
        let mut index: i32 = 0;
        for len in 1..=MAX_BITS {
            if len > avail {
                return Ok(None);
            }
            code |= ((bits >> (len - 1)) & 1) as i32;
            let count = self.counts[len as usize] as i32;
            if code - first < count {
                reader.consume(len);
                return Ok(Some(self.symbols[(index + code - first) as usize]));
            }
            index += count;
            first = (first + count) << 1;
            code <<= 1;
        }
        Err(ZipError::invalid_data("invalid Huffman code"))
    }
}
