//! The LZMS encoder, the inverse of [`crate::lzms::decode`].
//!
//! LZ matches are found with the same hash-chain matcher the XPRESS and
//! LZX encoders use ([`crate::lz_parse`]); delta matches are only ever
//! emitted as repeats of one of the four queue-remembered
//! offset/power pairs, checked with an O(1) prediction test at every
//! position rather than a dedicated search. Searching for brand new delta
//! parameters would require scanning a two-dimensional (offset, power)
//! space per position for a compression benefit that is usually marginal;
//! the decoder still accepts an explicit delta match, this encoder just never produces
//! one.

use crate::bitstream::ReverseBitWriter;
use crate::lz_copy::lz_copy;
use crate::lz_parse::{parse, Token};
use crate::lzms::contexts::{ItemKind, Model};
use crate::lzms::queues::DeltaQueue;
use crate::lzms::range::{LzmsProb, RangeEncoder};
use crate::lzms::LENGTH_MIN_MATCH;

const LZ_MIN_MATCH: usize = 3;
const MAX_DELTA_RUN: usize = 4096;

/// Encodes one LZMS chunk.
pub fn compress(input: &[u8]) -> Vec<u8> {
    let mut model = Model::new();
    let mut rc = RangeEncoder::new();
    let mut rbw = ReverseBitWriter::new();

    let n = input.len();
    let lz_hint = build_lz_hint(input);

    let mut i = 0usize;
    while i < n {
        model.lz_queue.advance();
        model.delta_queue.advance();

        let (delta_len, delta_idx) = best_delta_repeat(input, i, &model.delta_queue);
        let lz_candidate = lz_hint[i];

        let use_delta = delta_len >= LENGTH_MIN_MATCH as usize
            && delta_len >= lz_candidate.map(|(len, _)| len).unwrap_or(0);

        if use_delta {
            rc.encode_bit(model.is_match.get_mut(model.state), 1);
            rc.encode_bit(model.is_delta.get_mut(model.state), 1);
            rc.encode_bit(model.is_repeat_delta.get_mut(model.state), 1);
            encode_repeat_index(&mut rc, &mut model.repeat_index_delta, delta_idx);
            if delta_idx != 0 {
                model.delta_queue.promote(delta_idx);
            }
            encode_length(&mut model, &mut rc, &mut rbw, delta_len);
            i += delta_len;
            model.record_item(ItemKind::DeltaMatch);
            continue;
        }

        if let Some((length, offset)) = lz_candidate {
            rc.encode_bit(model.is_match.get_mut(model.state), 1);
            rc.encode_bit(model.is_delta.get_mut(model.state), 0);

            if let Some(idx) = (0..4).find(|&idx| model.lz_queue.get(idx) == offset as u32) {
                rc.encode_bit(model.is_repeat_lz.get_mut(model.state), 1);
                encode_repeat_index(&mut rc, &mut model.repeat_index_lz, idx);
                if idx != 0 {
                    model.lz_queue.promote(idx);
                }
            } else {
                rc.encode_bit(model.is_repeat_lz.get_mut(model.state), 0);
                let (slot, extra, extra_bits) = model.offset_slots.encode_value(offset as u32 - 1);
                model.lz_offsets.encode(&mut rbw, slot);
                rc.encode_direct_bits(extra, extra_bits);
                model.lz_queue.note_new_offset(offset as u32);
            }

            encode_length(&mut model, &mut rc, &mut rbw, length);
            i += length;
            model.record_item(ItemKind::LzMatch);
            continue;
        }

        rc.encode_bit(model.is_match.get_mut(model.state), 0);
        model.literals.encode(&mut rbw, input[i] as u16);
        i += 1;
        model.record_item(ItemKind::Literal);
    }

    // The forward range-coded stream and the reverse Huffman-coded stream
    // share one buffer: the range coder's units come first, the Huffman
    // writer's bytes are appended to (and read from) the far end, mirroring
    // how the decoder's ForwardBitstream and ReverseBitstream both index
    // into the same underlying slice.
    let mut forward = rc.finish();
    let reverse = rbw.finish();
    forward.extend_from_slice(&reverse);
    forward
}

fn encode_length(model: &mut Model, rc: &mut RangeEncoder, rbw: &mut ReverseBitWriter, length: usize) {
    let value = length as u32 - LENGTH_MIN_MATCH;
    let (slot, extra, extra_bits) = model.length_slots.encode_value(value);
    model.lengths.encode(rbw, slot);
    rc.encode_direct_bits(extra, extra_bits);
}

fn encode_repeat_index(rc: &mut RangeEncoder, ctx: &mut [LzmsProb; 3], idx: usize) {
    match idx {
        0 => rc.encode_bit(&mut ctx[0], 0),
        1 => {
            rc.encode_bit(&mut ctx[0], 1);
            rc.encode_bit(&mut ctx[1], 0);
        }
        2 => {
            rc.encode_bit(&mut ctx[0], 1);
            rc.encode_bit(&mut ctx[1], 1);
            rc.encode_bit(&mut ctx[2], 0);
        }
        3 => {
            rc.encode_bit(&mut ctx[0], 1);
            rc.encode_bit(&mut ctx[1], 1);
            rc.encode_bit(&mut ctx[2], 1);
        }
        _ => unreachable!("queue has exactly four slots"),
    }
}

/// Builds a per-position hint of the match (if any) a plain greedy LZ77
/// parse would make starting at that position, so the main loop can
/// compare it against a candidate delta match without running two
/// independent parsers out of step with each other.
fn build_lz_hint(input: &[u8]) -> Vec<Option<(usize, usize)>> {
    let mut hint = vec![None; input.len()];
    let tokens = parse(input, LZ_MIN_MATCH, input.len().max(1), input.len().max(1));
    let mut pos = 0usize;
    for tok in tokens {
        match tok {
            Token::Literal(_) => pos += 1,
            Token::Match { length, offset } => {
                hint[pos] = Some((length, offset));
                pos += length;
            }
        }
    }
    hint
}

/// Checks all four delta-queue slots for how far their byte-wise
/// prediction already matches `input` starting at `pos`, returning the
/// longest run and which slot produced it.
fn best_delta_repeat(input: &[u8], pos: usize, queue: &DeltaQueue) -> (usize, usize) {
    let mut best = (0usize, 0usize);
    for idx in 0..4 {
        let (power, offset) = queue.get(idx);
        let offset = offset as u64;
        let span = offset << power;
        if span == 0 || (pos as u64) < offset + span {
            continue;
        }
        let max_len = (input.len() - pos).min(MAX_DELTA_RUN);
        let mut len = 0usize;
        while len < max_len {
            let dst = (pos + len) as u64;
            let a = input[(dst - offset) as usize];
            let b = input[(dst - span) as usize];
            let c = input[(dst - offset - span) as usize];
            if a.wrapping_add(b).wrapping_sub(c) != input[pos + len] {
                break;
            }
            len += 1;
        }
        if len > best.0 {
            best = (len, idx);
        }
    }
    best
}
