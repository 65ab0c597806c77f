//! Adaptive state shared by the LZMS decoder and encoder: sliding-window bit
//! contexts for the structural decisions, and the rebuild-on-schedule
//! Huffman codes for symbols.

use crate::bitstream::{ReverseBitWriter, ReverseBitstream};
use crate::huffman::{canonical_codewords, lengths_from_freqs, DecodeTable};
use crate::lzms::queues::{DeltaQueue, LzQueue};
use crate::lzms::range::LzmsProb;
use crate::lzms::slots::SlotTable;
use crate::lzms::{
    DELTA_POWER_REBUILD_FREQ, LENGTH_REBUILD_FREQ, LITERAL_REBUILD_FREQ, NUM_DELTA_POWERS,
    NUM_LENGTH_SLOTS, NUM_LITERAL_SYMS, NUM_OFFSET_SLOTS, OFFSET_REBUILD_FREQ,
};
use crate::CodecResult;

/// A position-dependent family of [`LzmsProb`] contexts, selected by the
/// low `N` bits of some running state (e.g. how many of the last few
/// matches were literals). Mirrors the classic LZMA "literal state" /
/// "is-match[state]" context arrays, generalized to an arbitrary bit width
/// since LZMS uses several different widths for different decisions.
#[derive(Clone)]
pub struct ContextBank<const N: usize> {
    probs: Vec<LzmsProb>,
}

impl<const N: usize> ContextBank<N> {
    pub fn new() -> Self {
        Self { probs: vec![LzmsProb::new(); 1 << N] }
    }

    pub fn get_mut(&mut self, selector: u32) -> &mut LzmsProb {
        &mut self.probs[(selector as usize) & ((1 << N) - 1)]
    }
}

impl<const N: usize> Default for ContextBank<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// An adaptive Huffman code over the reverse bitstream: frequencies accrue
/// as symbols are coded, and the canonical code is rebuilt from scratch
/// every `rebuild_freq` symbols, halving all frequencies first so the model
/// keeps tracking recent statistics rather than the whole chunk's history.
const MAX_CODE_LEN: u8 = 15;
const TABLE_BITS: u32 = 9;

pub struct AdaptiveCode {
    num_syms: usize,
    rebuild_freq: u32,
    freqs: Vec<u32>,
    since_rebuild: u32,
    table: DecodeTable,
    codewords: Vec<(u32, u32)>,
}

impl AdaptiveCode {
    pub fn new(num_syms: usize, rebuild_freq: u32) -> Self {
        let freqs = vec![1u32; num_syms];
        let lengths = lengths_from_freqs(&freqs, MAX_CODE_LEN);
        let codewords = canonical_codewords(&lengths, MAX_CODE_LEN);
        let table = DecodeTable::build(&lengths, TABLE_BITS, MAX_CODE_LEN)
            .expect("uniform frequencies are always codeable");
        Self { num_syms, rebuild_freq, freqs, since_rebuild: 0, table, codewords }
    }

    fn rebuild(&mut self) {
        let lengths = lengths_from_freqs(&self.freqs, MAX_CODE_LEN);
        self.codewords = canonical_codewords(&lengths, MAX_CODE_LEN);
        self.table = DecodeTable::build(&lengths, TABLE_BITS, MAX_CODE_LEN)
            .expect("rebuilt lengths are always codeable");
        self.since_rebuild = 0;
    }

    fn observe(&mut self, sym: u16) {
        self.freqs[sym as usize] += 1;
        self.since_rebuild += 1;
        if self.since_rebuild >= self.rebuild_freq {
            for f in &mut self.freqs {
                *f = (*f + 1) / 2;
            }
            self.rebuild();
        }
    }

    pub fn decode(&mut self, bs: &mut ReverseBitstream<'_>) -> CodecResult<u16> {
        let sym = self.table.decode(bs)?;
        self.observe(sym);
        Ok(sym)
    }

    pub fn encode(&mut self, bw: &mut ReverseBitWriter, sym: u16) {
        let (code, len) = self.codewords[sym as usize];
        bw.write_bits(code, len);
        self.observe(sym);
    }

    pub fn num_symbols(&self) -> usize {
        self.num_syms
    }
}

/// All adaptive state for one LZMS chunk, torn down and rebuilt from
/// nothing at the start of every chunk (the same per-chunk model XPRESS
/// and LZX use).
///
/// Shared by [`crate::lzms::decode`] and [`crate::lzms::encode`] so the two
/// sides can never drift out of sync on how a context selector or a code's
/// rebuild schedule is derived.
pub struct Model {
    /// Rolling low bits of the last two item kinds, selecting which
    /// structural-bit context to use.
    pub state: u32,

    pub is_match: ContextBank<4>,
    pub is_delta: ContextBank<4>,
    pub is_repeat_lz: ContextBank<4>,
    pub is_repeat_delta: ContextBank<4>,
    pub repeat_index_lz: [LzmsProb; 3],
    pub repeat_index_delta: [LzmsProb; 3],

    pub literals: AdaptiveCode,
    pub lengths: AdaptiveCode,
    pub lz_offsets: AdaptiveCode,
    pub delta_offsets: AdaptiveCode,
    pub delta_powers: AdaptiveCode,

    pub length_slots: SlotTable,
    pub offset_slots: SlotTable,

    pub lz_queue: LzQueue,
    pub delta_queue: DeltaQueue,
}

/// Which kind of item was just coded; folded into [`Model::state`].
#[derive(Copy, Clone, Eq, PartialEq)]
pub enum ItemKind {
    Literal = 0,
    LzMatch = 1,
    DeltaMatch = 2,
}

impl Model {
    pub fn new() -> Self {
        Self {
            state: 0,
            is_match: ContextBank::new(),
            is_delta: ContextBank::new(),
            is_repeat_lz: ContextBank::new(),
            is_repeat_delta: ContextBank::new(),
            repeat_index_lz: [LzmsProb::new(); 3],
            repeat_index_delta: [LzmsProb::new(); 3],
            literals: AdaptiveCode::new(NUM_LITERAL_SYMS, LITERAL_REBUILD_FREQ),
            lengths: AdaptiveCode::new(NUM_LENGTH_SLOTS, LENGTH_REBUILD_FREQ),
            lz_offsets: AdaptiveCode::new(NUM_OFFSET_SLOTS, OFFSET_REBUILD_FREQ),
            delta_offsets: AdaptiveCode::new(NUM_OFFSET_SLOTS, OFFSET_REBUILD_FREQ),
            delta_powers: AdaptiveCode::new(NUM_DELTA_POWERS, DELTA_POWER_REBUILD_FREQ),
            length_slots: SlotTable::new(NUM_LENGTH_SLOTS),
            offset_slots: SlotTable::new(NUM_OFFSET_SLOTS),
            lz_queue: LzQueue::new(),
            delta_queue: DeltaQueue::new(),
        }
    }

    /// Folds `kind` into the rolling state selector used by every
    /// structural-bit context bank.
    pub fn record_item(&mut self, kind: ItemKind) {
        self.state = ((self.state << 2) | (kind as u32)) & 0xF;
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adaptive_code_roundtrips_and_rebuilds() {
        let mut enc = AdaptiveCode::new(8, 16);
        let mut bw = ReverseBitWriter::new();
        let syms = [0u16, 1, 2, 3, 0, 0, 1, 4, 5, 6, 7, 0, 1, 2, 0, 1, 3, 4, 0, 1, 0, 2];
        for &s in &syms {
            enc.encode(&mut bw, s);
        }
        let buf = bw.finish();

        let mut dec = AdaptiveCode::new(8, 16);
        let mut rbs = ReverseBitstream::new(&buf);
        for &s in &syms {
            assert_eq!(dec.decode(&mut rbs).unwrap(), s);
        }
    }

    #[test]
    fn context_bank_selects_independent_contexts() {
        let mut bank: ContextBank<4> = ContextBank::new();
        bank.get_mut(3).record_for_test(1);
        bank.get_mut(3).record_for_test(1);
        assert_ne!(bank.get_mut(3).probability_for_test(), bank.get_mut(5).probability_for_test());
    }
}
