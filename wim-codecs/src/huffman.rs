//! Canonical Huffman decode-table construction, shared by LZX, XPRESS and
//! LZMS's adaptive codes.
//!
//! The table has two levels: a primary table indexed by the first
//! `table_bits` bits of the stream, and one subtable per primary slot whose
//! codeword is longer than `table_bits`, indexed by the remaining bits.
//! Subtable lengths are stored relative to the subtable's own index, same
//! as the primary table's lengths are relative to the stream.

use crate::bitstream::BitSource;
use crate::error::{CodecError, CodecResult};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

#[derive(Copy, Clone, Debug)]
enum Entry {
    /// No codeword maps here (can only happen in an otherwise-empty code).
    Unassigned,
    Symbol { symbol: u16, length: u8 },
    SubTable { index: u32 },
}

/// A built decode table for one canonical Huffman code.
pub struct DecodeTable {
    table_bits: u32,
    primary: Vec<Entry>,
    /// Number of low bits each subtable is indexed by.
    sub_bits: u32,
    subtables: Vec<Vec<Entry>>,
}

impl DecodeTable {
    /// Builds a decode table from a set of codeword lengths.
    ///
    /// `lens[sym]` is the codeword length for symbol `sym`, or 0 if `sym`
    /// does not occur in this code. `table_bits` bounds the size of the
    /// primary table (`2^table_bits` entries); codewords longer than that
    /// spill into a subtable. `max_len` is the longest codeword length
    /// that can occur for this alphabet.
    pub fn build(lens: &[u8], table_bits: u32, max_len: u8) -> CodecResult<Self> {
        let num_syms = lens.len();
        let max_len = max_len as usize;
        let mut len_counts = vec![0u32; max_len + 1];
        for &l in lens {
            if l as usize > max_len {
                return Err(CodecError::InvalidSymbol);
            }
            len_counts[l as usize] += 1;
        }

        let nonzero: u32 = len_counts[1..].iter().sum();

        // Kraft-inequality bookkeeping: reject over-subscribed codes;
        // reject under-subscribed codes unless the whole alphabet is empty.
        let mut left: i64 = 1;
        for len in 1..=max_len {
            left = (left << 1) - len_counts[len] as i64;
            if left < 0 {
                return Err(CodecError::OversubscribedCode);
            }
        }

        if nonzero == 0 {
            // Empty code: nothing is ever decodable from it.
            let size = 1usize << table_bits;
            return Ok(Self {
                table_bits,
                primary: vec![Entry::Unassigned; size],
                sub_bits: 0,
                subtables: Vec::new(),
            });
        }

        if nonzero == 1 && left > 0 {
            // Degenerate single-symbol code: consume its codeword length
            // but decode to that symbol regardless of the bits seen, same
            // convention used by DEFLATE's fixed-code special case.
            let (sym, len) = lens
                .iter()
                .enumerate()
                .find(|&(_, &l)| l != 0)
                .map(|(i, &l)| (i as u16, l))
                .unwrap();
            let size = 1usize << table_bits;
            let fill_len = len.min(table_bits as u8);
            let entry = Entry::Symbol { symbol: sym, length: fill_len };
            return Ok(Self {
                table_bits,
                primary: vec![entry; size],
                sub_bits: 0,
                subtables: Vec::new(),
            });
        }

        if left != 0 {
            return Err(CodecError::IncompleteCode);
        }

        // Assign canonical codewords: increasing length, then increasing
        // symbol value, by walking symbol indices in order and handing out
        // the next available codeword of each length.
        let mut next_code = vec![0u32; max_len + 1];
        {
            let mut code = 0u32;
            for len in 1..=max_len {
                code = (code + len_counts[len - 1]) << 1;
                next_code[len] = code;
            }
        }
        let mut codewords = vec![0u32; num_syms];
        for (sym, &len) in lens.iter().enumerate() {
            if len == 0 {
                continue;
            }
            codewords[sym] = next_code[len as usize];
            next_code[len as usize] += 1;
        }

        let table_bits_usize = table_bits as usize;
        let primary_size = 1usize << table_bits;
        let mut primary = vec![Entry::Unassigned; primary_size];
        let sub_bits = max_len.saturating_sub(table_bits_usize) as u32;
        let mut subtables: Vec<Vec<Entry>> = Vec::new();

        for (sym, &len) in lens.iter().enumerate() {
            if len == 0 {
                continue;
            }
            let len = len as usize;
            let code = codewords[sym];
            if len <= table_bits_usize {
                let shift = table_bits_usize - len;
                let base = (code as usize) << shift;
                let span = 1usize << shift;
                for slot in base..base + span {
                    primary[slot] = Entry::Symbol { symbol: sym as u16, length: len as u8 };
                }
            } else {
                let prefix = (code >> (len - table_bits_usize)) as usize;
                let subtable_id = match primary[prefix] {
                    Entry::SubTable { index } => index as usize,
                    _ => {
                        let id = subtables.len();
                        subtables.push(vec![Entry::Unassigned; 1usize << sub_bits]);
                        primary[prefix] = Entry::SubTable { index: id as u32 };
                        id
                    }
                };
                let rel_len = len - table_bits_usize;
                let shift = sub_bits as usize - rel_len;

                // The subtable base is the low `rel_len` bits of the
                // codeword, left-justified within `sub_bits`.
                let low_bits = code & ((1u32 << rel_len) - 1);
                let sub_base = (low_bits as usize) << shift;
                let span = 1usize << shift;
                let table = &mut subtables[subtable_id];
                for slot in sub_base..sub_base + span {
                    table[slot] = Entry::Symbol { symbol: sym as u16, length: rel_len as u8 };
                }
            }
        }

        Ok(Self {
            table_bits,
            primary,
            sub_bits,
            subtables,
        })
    }

    /// Decodes one symbol from `bs`, returning `(symbol, codeword length)`.
    pub fn decode<B: BitSource>(&self, bs: &mut B) -> CodecResult<u16> {
        let idx = bs.peek_bits(self.table_bits) as usize;
        match self.primary[idx] {
            Entry::Symbol { symbol, length } => {
                bs.consume_bits(length as u32);
                Ok(symbol)
            }
            Entry::SubTable { index } => {
                let total_bits = self.table_bits + self.sub_bits;
                let wide = bs.peek_bits(total_bits);
                let sub_idx = (wide & ((1u32 << self.sub_bits) - 1)) as usize;
                match self.subtables[index as usize][sub_idx] {
                    Entry::Symbol { symbol, length } => {
                        bs.consume_bits(self.table_bits + length as u32);
                        Ok(symbol)
                    }
                    _ => Err(CodecError::IncompleteCode),
                }
            }
            Entry::Unassigned => Err(CodecError::IncompleteCode),
        }
    }
}

/// Builds a set of canonical codeword lengths from symbol frequencies,
/// suitable for feeding to [`DecodeTable::build`] or to a canonical-code
/// bit packer. Lengths are capped at `max_len`.
pub fn lengths_from_freqs(freqs: &[u32], max_len: u8) -> Vec<u8> {
    let n = freqs.len();
    let nonzero: Vec<usize> = (0..n).filter(|&i| freqs[i] > 0).collect();
    let mut lens = vec![0u8; n];
    if nonzero.is_empty() {
        return lens;
    }
    if nonzero.len() == 1 {
        lens[nonzero[0]] = 1;
        return lens;
    }

    struct Node {
        freq: u64,
        left: i32,
        right: i32,
    }
    let mut nodes: Vec<Node> = Vec::with_capacity(nonzero.len() * 2);
    let mut heap: BinaryHeap<Reverse<(u64, usize, i32)>> = BinaryHeap::new();
    let mut seq = 0usize;
    for &sym in &nonzero {
        let idx = nodes.len() as i32;
        nodes.push(Node { freq: freqs[sym] as u64, left: -1, right: -1 });
        heap.push(Reverse((freqs[sym] as u64, seq, idx)));
        seq += 1;
    }
    while heap.len() > 1 {
        let Reverse((f1, _, i1)) = heap.pop().unwrap();
        let Reverse((f2, _, i2)) = heap.pop().unwrap();
        let idx = nodes.len() as i32;
        nodes.push(Node { freq: f1 + f2, left: i1, right: i2 });
        heap.push(Reverse((f1 + f2, seq, idx)));
        seq += 1;
    }
    let root = heap.pop().unwrap().0 .2;

    let mut depths = vec![0u8; nodes.len()];
    let mut stack = vec![(root, 0u8)];
    while let Some((idx, depth)) = stack.pop() {
        depths[idx as usize] = depth;
        let node = &nodes[idx as usize];
        if node.left >= 0 {
            stack.push((node.left, depth + 1));
            stack.push((node.right, depth + 1));
        }
    }
    for (leaf_idx, &sym) in nonzero.iter().enumerate() {
        lens[sym] = depths[leaf_idx].max(1);
    }

    limit_lengths(&mut lens, freqs, max_len);
    lens
}

/// Rebalances a set of codeword lengths so they satisfy the Kraft equality
/// exactly while staying within `max_len`. A freshly built Huffman tree
/// already satisfies the equality but may exceed `max_len` for pathological
/// frequency distributions; this nudges lengths up or down to restore both
/// properties.
fn limit_lengths(lens: &mut [u8], freqs: &[u32], max_len: u8) {
    let max_len_i = max_len as i32;
    for l in lens.iter_mut() {
        if *l as i32 > max_len_i {
            *l = max_len;
        }
    }

    let cost = |l: u8| -> i64 {
        if l == 0 {
            0
        } else {
            1i64 << (max_len_i - l as i32)
        }
    };
    let budget: i64 = 1i64 << max_len_i;
    let mut total: i64 = lens.iter().map(|&l| cost(l)).sum();

    while total > budget {
        let i = (0..lens.len())
            .filter(|&i| lens[i] > 0 && (lens[i] as i32) < max_len_i)
            .min_by_key(|&i| freqs[i])
            .expect("alphabet too small to satisfy max_len");
        let old_cost = cost(lens[i]);
        lens[i] += 1;
        total -= old_cost / 2;
    }

    while total < budget {
        let i = (0..lens.len())
            .filter(|&i| lens[i] > 1)
            .max_by_key(|&i| freqs[i])
            .expect("no symbol available to fill remaining code space");
        let old_cost = cost(lens[i]);
        lens[i] -= 1;
        total += old_cost;
    }
}

/// Builds canonical codewords `(code, length)` per symbol from a set of
/// codeword lengths, in the same MSB-first bit order the bitstream readers
/// use. Symbols with length 0 get `(0, 0)`, meaning "never emitted".
pub fn canonical_codewords(lens: &[u8], max_len: u8) -> Vec<(u32, u32)> {
    let max_len = max_len as usize;
    let mut len_counts = vec![0u32; max_len + 1];
    for &l in lens {
        len_counts[l as usize] += 1;
    }
    let mut next_code = vec![0u32; max_len + 1];
    let mut code = 0u32;
    for len in 1..=max_len {
        code = (code + len_counts[len - 1]) << 1;
        next_code[len] = code;
    }
    let mut out = vec![(0u32, 0u32); lens.len()];
    for (sym, &len) in lens.iter().enumerate() {
        if len == 0 {
            continue;
        }
        out[sym] = (next_code[len as usize], len as u32);
        next_code[len as usize] += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_symbol_code_always_decodes() {
        let lens = [1u8];
        let table = DecodeTable::build(&lens, 4, 1).unwrap();
        let data = [0xFFu8, 0xFF];
        let mut bs = ForwardBitstream::new(&data);
        assert_eq!(table.decode(&mut bs).unwrap(), 0);
        let data2 = [0x00u8, 0x00];
        let mut bs2 = ForwardBitstream::new(&data2);
        assert_eq!(table.decode(&mut bs2).unwrap(), 0);
    }

    #[test]
    fn oversubscribed_code_rejected() {
        // Two symbols both claiming length 1 leaves no room for a third.
        let lens = [1u8, 1, 1];
        assert_eq!(
            DecodeTable::build(&lens, 4, 1).unwrap_err(),
            CodecError::OversubscribedCode
        );
    }

    #[test]
    fn incomplete_code_rejected() {
        // One symbol of length 2 out of a 4-leaf space: incomplete.
        let lens = [2u8, 0, 0, 0];
        assert_eq!(
            DecodeTable::build(&lens, 4, 2).unwrap_err(),
            CodecError::IncompleteCode
        );
    }

    #[test]
    fn roundtrip_small_alphabet() {
        // Canonical code: a=0 (len 1), b=10 (len 2), c=11 (len 2).
        let lens = [1u8, 2, 2];
        let table = DecodeTable::build(&lens, 4, 2).unwrap();
        // Encode "a b c a" manually: 0 10 11 0 -> bits: 0 1 0 1 1 0
        // pack MSB-first into bytes: 0101_1000 -> 0x58, pad rest with 0.
        let data = [0b0101_1000u8, 0x00];
        let mut bs = ForwardBitstream::new(&data);
        assert_eq!(table.decode(&mut bs).unwrap(), 0);
        assert_eq!(table.decode(&mut bs).unwrap(), 1);
        assert_eq!(table.decode(&mut bs).unwrap(), 2);
        assert_eq!(table.decode(&mut bs).unwrap(), 0);
    }

    #[test]
    fn lengths_from_freqs_yield_valid_code() {
        let freqs = [100u32, 50, 25, 10, 1, 1, 1, 1];
        let lens = lengths_from_freqs(&freqs, 15);
        DecodeTable::build(&lens, 9, 15).unwrap();
    }

    #[test]
    fn lengths_from_freqs_respects_max_len() {
        // A skewed Fibonacci-like distribution tends to produce deep trees.
        let mut freqs = vec![1u32; 40];
        for i in 2..freqs.len() {
            freqs[i] = freqs[i - 1] + freqs[i - 2];
        }
        let lens = lengths_from_freqs(&freqs, 10);
        assert!(lens.iter().all(|&l| l <= 10));
        DecodeTable::build(&lens, 9, 10).unwrap();
    }

    #[test]
    fn subtable_path_is_exercised() {
        // Force a code wider than the primary table: 4 symbols of length 3
        // decoded through a table_bits=2 primary table.
        let lens = [3u8, 3, 3, 3];
        let table = DecodeTable::build(&lens, 2, 3).unwrap();
        // Canonical codes: 000,001,010,011
        let data = [0b000_001_01u8, 0b0_011_0000];
        let mut bs = ForwardBitstream::new(&data);
        assert_eq!(table.decode(&mut bs).unwrap(), 0);
        assert_eq!(table.decode(&mut bs).unwrap(), 1);
        assert_eq!(table.decode(&mut bs).unwrap(), 2);
        assert_eq!(table.decode(&mut bs).unwrap(), 3);
    }
}
