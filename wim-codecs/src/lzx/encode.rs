use super::{position, BlockType, RecentOffsets, LEN_HEADER_EXTENDED, LEN_TREE_SYMS, MAX_MATCH_LEN, MIN_MATCH, NUM_LEN_HEADERS};
use crate::bitstream::ForwardBitWriter;
use crate::huffman::{canonical_codewords, lengths_from_freqs};
use crate::lz_parse::{parse, Token};

const RAW_LEN_BITS: u32 = 4;

struct Coded {
    main_sym: u16,
    len_sym: Option<u16>,
    distance_bits: Option<(u32, u32)>,
}

/// Compresses one LZX chunk into a single block. Falls back to an
/// uncompressed block whenever the verbatim encoding would not be smaller.
pub fn compress(input: &[u8]) -> Vec<u8> {
    let verbatim = compress_verbatim(input);
    // An uncompressed block costs a 2-bit header padded out to a 16-bit
    // unit, then the literal bytes: two bytes of overhead.
    if verbatim.len() < input.len() + 2 {
        verbatim
    } else {
        compress_uncompressed(input)
    }
}

fn compress_uncompressed(input: &[u8]) -> Vec<u8> {
    let mut writer = ForwardBitWriter::new();
    writer.write_bits(BlockType::Uncompressed.to_bits(), 2);
    let mut out = writer.finish();
    out.extend_from_slice(input);
    out
}

fn compress_verbatim(input: &[u8]) -> Vec<u8> {
    let max_offset = input.len().saturating_sub(1).max(1);
    let tokens = parse(input, MIN_MATCH, MAX_MATCH_LEN, max_offset);

    let num_main = super::num_main_syms(input.len());
    let mut main_freqs = vec![0u32; num_main];
    let mut len_freqs = vec![0u32; LEN_TREE_SYMS];
    let mut coded = Vec::with_capacity(tokens.len());

    let mut recent = RecentOffsets::new();
    for tok in &tokens {
        match *tok {
            Token::Literal(b) => {
                main_freqs[b as usize] += 1;
                coded.push(Coded { main_sym: b as u16, len_sym: None, distance_bits: None });
            }
            Token::Match { length, offset } => {
                let distance = offset as u32;
                let (slot, distance_bits) = match recent.slot_for(distance) {
                    Some(slot) => {
                        recent.use_repeat(slot);
                        (slot, None)
                    }
                    None => {
                        let (slot, footer) = position::distance_to_slot_and_footer(distance);
                        recent.use_explicit(distance);
                        (slot, Some((footer, position::footer_bits(slot))))
                    }
                };

                let (len_header, len_sym) = if length - MIN_MATCH < NUM_LEN_HEADERS as usize - 1 {
                    ((length - MIN_MATCH) as u32, None)
                } else {
                    let sym = (length - MIN_MATCH - (NUM_LEN_HEADERS as usize - 1)) as u16;
                    (LEN_HEADER_EXTENDED, Some(sym))
                };

                let main_sym = 256 + slot * NUM_LEN_HEADERS + len_header;
                main_freqs[main_sym as usize] += 1;
                if let Some(sym) = len_sym {
                    len_freqs[sym as usize] += 1;
                }
                coded.push(Coded { main_sym: main_sym as u16, len_sym, distance_bits });
            }
        }
    }

    let main_lens = lengths_from_freqs(&main_freqs, 15);
    let len_lens = lengths_from_freqs(&len_freqs, 15);
    let main_codes = canonical_codewords(&main_lens, 15);
    let len_codes = canonical_codewords(&len_lens, 15);

    let mut writer = ForwardBitWriter::new();
    writer.write_bits(BlockType::Verbatim.to_bits(), 2);
    for &l in &main_lens {
        writer.write_bits(l as u32, RAW_LEN_BITS);
    }
    for &l in &len_lens {
        writer.write_bits(l as u32, RAW_LEN_BITS);
    }

    for c in &coded {
        let (code, len) = main_codes[c.main_sym as usize];
        writer.write_bits_wide(code, len);
        if let Some(sym) = c.len_sym {
            let (code, len) = len_codes[sym as usize];
            writer.write_bits_wide(code, len);
        }
        if let Some((footer, footer_bits)) = c.distance_bits {
            if footer_bits > 0 {
                writer.write_bits_wide(footer, footer_bits);
            }
        }
    }

    writer.finish()
}
