//! The LZMS item-decode loop: repeatedly decode a structural
//! decision (literal vs. LZ match vs. delta match, repeat vs. explicit
//! offset) from the range-coded stream, then the associated symbols from
//! the reverse-coded adaptive Huffman codes, until `uncompressed_size`
//! bytes have been produced.

use crate::bitstream::ReverseBitstream;
use crate::error::{CodecError, CodecResult};
use crate::lz_copy::lz_copy;
use crate::lzms::contexts::{ItemKind, Model};
use crate::lzms::range::{LzmsProb, RangeDecoder};
use crate::lzms::LENGTH_MIN_MATCH;

/// Decodes one LZMS chunk.
pub fn decompress(input: &[u8], uncompressed_size: usize) -> CodecResult<Vec<u8>> {
    let mut rc = RangeDecoder::new(input);
    let mut rbs = ReverseBitstream::new(input);
    let mut model = Model::new();
    let mut out = Vec::with_capacity(uncompressed_size);

    while out.len() < uncompressed_size {
        model.lz_queue.advance();
        model.delta_queue.advance();

        let is_match = rc.decode_bit(model.is_match.get_mut(model.state));
        if is_match == 0 {
            let byte = model.literals.decode(&mut rbs)? as u8;
            out.push(byte);
            model.record_item(ItemKind::Literal);
            continue;
        }

        let is_delta = rc.decode_bit(model.is_delta.get_mut(model.state));
        if is_delta == 0 {
            let is_repeat = rc.decode_bit(model.is_repeat_lz.get_mut(model.state));
            let offset = if is_repeat != 0 {
                let idx = decode_repeat_index(&mut rc, &mut model.repeat_index_lz);
                let offset = model.lz_queue.get(idx);
                if idx != 0 {
                    model.lz_queue.promote(idx);
                }
                offset
            } else {
                let slot = model.lz_offsets.decode(&mut rbs)?;
                let extra_bits = model.offset_slots.num_extra_bits(slot as usize);
                let extra = rc.decode_direct_bits(extra_bits);
                let value = model.offset_slots.decode_value(slot, extra);
                let offset = value + 1;
                model.lz_queue.note_new_offset(offset);
                offset
            };

            let len_slot = model.lengths.decode(&mut rbs)?;
            let len_extra_bits = model.length_slots.num_extra_bits(len_slot as usize);
            let len_extra = rc.decode_direct_bits(len_extra_bits);
            let length = (model.length_slots.decode_value(len_slot, len_extra) + LENGTH_MIN_MATCH) as usize;

            let offset = offset as usize;
            if offset == 0 || offset > out.len() {
                return Err(CodecError::OffsetOverflow);
            }
            if out.len() + length > uncompressed_size {
                return Err(CodecError::LengthOverflow);
            }
            lz_copy(&mut out, length, offset);
            model.record_item(ItemKind::LzMatch);
        } else {
            let is_repeat = rc.decode_bit(model.is_repeat_delta.get_mut(model.state));
            let (power, offset) = if is_repeat != 0 {
                let idx = decode_repeat_index(&mut rc, &mut model.repeat_index_delta);
                let pair = model.delta_queue.get(idx);
                if idx != 0 {
                    model.delta_queue.promote(idx);
                }
                pair
            } else {
                let power = model.delta_powers.decode(&mut rbs)? as u32;
                let slot = model.delta_offsets.decode(&mut rbs)?;
                let extra_bits = model.offset_slots.num_extra_bits(slot as usize);
                let extra = rc.decode_direct_bits(extra_bits);
                let offset = model.offset_slots.decode_value(slot, extra) + 1;
                model.delta_queue.note_new_pair(power, offset);
                (power, offset)
            };

            let len_slot = model.lengths.decode(&mut rbs)?;
            let len_extra_bits = model.length_slots.num_extra_bits(len_slot as usize);
            let len_extra = rc.decode_direct_bits(len_extra_bits);
            let length = (model.length_slots.decode_value(len_slot, len_extra) + LENGTH_MIN_MATCH) as usize;

            let span = (offset as u64) << power;
            let offset = offset as u64;
            if offset == 0 || span == 0 {
                return Err(CodecError::OffsetOverflow);
            }
            if out.len() + length > uncompressed_size {
                return Err(CodecError::LengthOverflow);
            }
            for _ in 0..length {
                let dst = out.len() as u64;
                if dst < offset + span {
                    return Err(CodecError::OffsetOverflow);
                }
                let a = out[(dst - offset) as usize];
                let b = out[(dst - span) as usize];
                let c = out[(dst - offset - span) as usize];
                out.push(a.wrapping_add(b).wrapping_sub(c));
            }
            model.record_item(ItemKind::DeltaMatch);
        }
    }

    Ok(out)
}

/// Decodes a 2-bit unary repeat-queue index (0..=3): reads `ctx[0]` to
/// decide between slot 0 and the rest, `ctx[1]` to decide between slot 1
/// and the rest, and `ctx[2]` to decide between slot 2 and slot 3.
pub(super) fn decode_repeat_index(
    rc: &mut RangeDecoder<'_>,
    ctx: &mut [LzmsProb; 3],
) -> usize {
    if rc.decode_bit(&mut ctx[0]) == 0 {
        return 0;
    }
    if rc.decode_bit(&mut ctx[1]) == 0 {
        return 1;
    }
    if rc.decode_bit(&mut ctx[2]) == 0 {
        2
    } else {
        3
    }
}
