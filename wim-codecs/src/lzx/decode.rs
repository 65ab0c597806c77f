use super::{position, BlockType, RecentOffsets, LEN_HEADER_EXTENDED, LEN_TREE_SYMS, MIN_MATCH, NUM_LEN_HEADERS};
use crate::bitstream::ForwardBitstream;
use crate::error::{CodecError, CodecResult};
use crate::huffman::DecodeTable;
use crate::lz_copy::lz_copy;

const MAIN_TABLE_BITS: u32 = 10;
const LEN_TABLE_BITS: u32 = 8;
const ALIGNED_TABLE_BITS: u32 = 7;
const RAW_LEN_BITS: u32 = 4;

/// Decompresses one LZX chunk, consisting of exactly one block.
pub fn decompress(input: &[u8], uncompressed_size: usize) -> CodecResult<Vec<u8>> {
    let mut bs = ForwardBitstream::new(input);
    let block_type = BlockType::from_bits(bs.read_bits(2))?;

    if block_type == BlockType::Uncompressed {
        bs.align_to_unit();
        let start = bs.byte_offset();
        let end = start
            .checked_add(uncompressed_size)
            .ok_or(CodecError::UnexpectedEof)?;
        if end > input.len() {
            return Err(CodecError::UnexpectedEof);
        }
        return Ok(input[start..end].to_vec());
    }

    let aligned_table = if block_type == BlockType::Aligned {
        let mut lens = [0u8; 8];
        for l in lens.iter_mut() {
            *l = bs.read_bits(3) as u8;
        }
        Some(DecodeTable::build(&lens, ALIGNED_TABLE_BITS, 7)?)
    } else {
        None
    };

    let num_main = super::num_main_syms(uncompressed_size);
    let mut main_lens = vec![0u8; num_main];
    for l in main_lens.iter_mut() {
        *l = bs.read_bits(RAW_LEN_BITS) as u8;
    }
    let main_table = DecodeTable::build(&main_lens, MAIN_TABLE_BITS, 15)?;

    let mut len_lens = [0u8; LEN_TREE_SYMS];
    for l in len_lens.iter_mut() {
        *l = bs.read_bits(RAW_LEN_BITS) as u8;
    }
    let len_table = DecodeTable::build(&len_lens, LEN_TABLE_BITS, 15)?;

    let mut recent = RecentOffsets::new();
    let mut out = Vec::with_capacity(uncompressed_size);

    while out.len() < uncompressed_size {
        let sym = main_table.decode(&mut bs)? as usize;
        if sym < 256 {
            out.push(sym as u8);
            continue;
        }
        let match_sym = (sym - 256) as u32;
        let slot = match_sym / NUM_LEN_HEADERS;
        let len_header = match_sym % NUM_LEN_HEADERS;

        let length = if len_header == LEN_HEADER_EXTENDED {
            let len_sym = len_table.decode(&mut bs)? as usize;
            MIN_MATCH + (NUM_LEN_HEADERS as usize - 1) + len_sym
        } else {
            MIN_MATCH + len_header as usize
        };

        let distance = if slot < 3 {
            recent.use_repeat(slot)
        } else {
            let footer_bits = position::footer_bits(slot);
            let footer = if let Some(aligned) = &aligned_table {
                if footer_bits >= 3 {
                    let high = bs.read_bits(footer_bits - 3);
                    let low = aligned.decode(&mut bs)? as u32;
                    (high << 3) | low
                } else {
                    bs.read_bits(footer_bits)
                }
            } else {
                bs.read_bits(footer_bits)
            };
            let distance = position::slot_and_footer_to_distance(slot, footer);
            recent.use_explicit(distance);
            distance
        };

        let offset = distance as usize;
        if offset == 0 || offset > out.len() {
            return Err(CodecError::OffsetOverflow);
        }
        if out.len() + length > uncompressed_size {
            return Err(CodecError::LengthOverflow);
        }
        lz_copy(&mut out, length, offset);
    }

    Ok(out)
}
