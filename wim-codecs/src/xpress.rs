//! The XPRESS codec: a single 512-symbol canonical Huffman alphabet (256
//! literals plus 256 length/offset codes), with codeword lengths carried
//! inline as a fixed nibble-packed header.
//!
//! Each chunk is compressed independently; there is no state carried
//! across chunk boundaries, which matches the 32 KiB chunk size being
//! XPRESS's entire window.

use crate::bitstream::{ForwardBitWriter, ForwardBitstream};
use crate::error::{CodecError, CodecResult};
use crate::huffman::{canonical_codewords, lengths_from_freqs, DecodeTable};
use crate::lz_copy::lz_copy;
use crate::lz_parse::{parse, Token};
use crate::{Compressor, Decompressor};

/// The fixed chunk size for XPRESS resources.
pub const CHUNK_SIZE: usize = 32 * 1024;

const NUM_SYMBOLS: usize = 512;
const TABLE_HEADER_LEN: usize = NUM_SYMBOLS / 2;
const MIN_MATCH: usize = 3;
const MAX_OFFSET_BITS: u32 = 15;
const MAX_EXTRA_LEN: usize = 0xF;
/// Largest length representable without falling back to the 16-bit
/// absolute-length escape.
const MAX_INLINE_LEN: usize = MIN_MATCH + (MAX_EXTRA_LEN - 1) + 0xFF;
const MAX_MATCH: usize = 0xFFFF;

/// Decompresses one XPRESS chunk.
pub fn decompress(input: &[u8], uncompressed_size: usize) -> CodecResult<Vec<u8>> {
    if input.len() < TABLE_HEADER_LEN {
        return Err(CodecError::UnexpectedEof);
    }
    let mut lens = [0u8; NUM_SYMBOLS];
    for i in 0..TABLE_HEADER_LEN {
        let byte = input[i];
        lens[2 * i] = byte & 0xF;
        lens[2 * i + 1] = byte >> 4;
    }
    let table = DecodeTable::build(&lens, 9, 15)?;

    let mut bs = ForwardBitstream::new(&input[TABLE_HEADER_LEN..]);
    let mut out = Vec::with_capacity(uncompressed_size);

    while out.len() < uncompressed_size {
        let sym = table.decode(&mut bs)?;
        if sym < 256 {
            out.push(sym as u8);
            continue;
        }
        let sym = sym - 256;
        let offset_bits = (sym >> 4) as u32;
        let length_code = (sym & 0xF) as usize;

        let extra = if offset_bits == 0 { 0 } else { bs.read_bits(offset_bits) };
        let offset = (1u32 << offset_bits) as usize + extra as usize;
        if offset == 0 || offset > out.len() {
            return Err(CodecError::OffsetOverflow);
        }

        let mut length = MIN_MATCH + length_code;
        if length_code == MAX_EXTRA_LEN {
            let extra_byte = bs.read_bits(8) as usize;
            if extra_byte == 0xFF {
                length = bs.read_bits(16) as usize;
            } else {
                length += extra_byte;
            }
        }
        if out.len() + length > uncompressed_size {
            return Err(CodecError::LengthOverflow);
        }
        lz_copy(&mut out, length, offset);
    }

    Ok(out)
}

/// Compresses one XPRESS chunk. The input must be no larger than
/// [`CHUNK_SIZE`].
pub fn compress(input: &[u8]) -> Vec<u8> {
    let tokens = parse(input, MIN_MATCH, MAX_MATCH, (1usize << MAX_OFFSET_BITS) - 1);

    let mut freqs = [0u32; NUM_SYMBOLS];
    let mut coded: Vec<(u16, u32)> = Vec::with_capacity(tokens.len());
    for tok in &tokens {
        match *tok {
            Token::Literal(b) => {
                freqs[b as usize] += 1;
                coded.push((b as u16, 0));
            }
            Token::Match { length, offset } => {
                let offset_bits = (usize::BITS - offset.leading_zeros() - 1) as u32;
                let extra_offset = offset as u32 - (1u32 << offset_bits);
                let (length_code, _) = encode_length(length);
                let sym = 256 + ((offset_bits as u16) << 4) + length_code as u16;
                freqs[sym as usize] += 1;
                coded.push((sym, extra_offset));
            }
        }
    }

    let lens = lengths_from_freqs(&freqs, 15);

    let mut header = Vec::with_capacity(TABLE_HEADER_LEN);
    for i in 0..TABLE_HEADER_LEN {
        header.push(lens[2 * i] | (lens[2 * i + 1] << 4));
    }

    let codewords = canonical_codewords(&lens, 15);

    let mut writer = ForwardBitWriter::new();
    for (tok, (sym, extra_offset)) in tokens.iter().zip(coded.iter()) {
        let (code, len) = codewords[*sym as usize];
        writer.write_bits_wide(code, len);
        if let Token::Match { length, offset } = *tok {
            let offset_bits = (usize::BITS - offset.leading_zeros() - 1) as u32;
            if offset_bits > 0 {
                writer.write_bits_wide(*extra_offset, offset_bits);
            }
            let (length_code, _) = encode_length(length);
            if length_code == MAX_EXTRA_LEN {
                if length > MAX_INLINE_LEN {
                    writer.write_bits(0xFF, 8);
                    writer.write_bits_wide(length as u32, 16);
                } else {
                    writer.write_bits((length - MIN_MATCH - MAX_EXTRA_LEN) as u32, 8);
                }
            }
        }
    }

    let mut out = header;
    out.extend(writer.finish());
    out
}

fn encode_length(length: usize) -> (usize, u32) {
    if length - MIN_MATCH < MAX_EXTRA_LEN {
        (length - MIN_MATCH, 0)
    } else {
        (MAX_EXTRA_LEN, 8)
    }
}

/// A stateless XPRESS decompressor, suitable for the resource engine's
/// per-chunk codec dispatch.
#[derive(Default)]
pub struct XpressDecompressor;

impl Decompressor for XpressDecompressor {
    fn decompress(&mut self, input: &[u8], uncompressed_size: usize, out: &mut Vec<u8>) -> CodecResult<()> {
        *out = decompress(input, uncompressed_size)?;
        Ok(())
    }
}

/// A stateless XPRESS compressor.
#[derive(Default)]
pub struct XpressCompressor;

impl Compressor for XpressCompressor {
    fn compress(&mut self, input: &[u8], out: &mut Vec<u8>) -> usize {
        let compressed = compress(input);
        let n = compressed.len();
        out.extend_from_slice(&compressed);
        n
    }

    fn bound(&self, input_len: usize) -> usize {
        TABLE_HEADER_LEN + input_len * 2 + 16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(data: &[u8]) {
        let compressed = compress(data);
        let decompressed = decompress(&compressed, data.len()).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn empty_chunk() {
        roundtrip(&[]);
    }

    #[test]
    fn all_literals() {
        roundtrip(b"the quick brown fox jumps over the lazy dog");
    }

    #[test]
    fn repeated_pattern() {
        let data = b"abcabcabcabcabcabcabcabcabcabcabcabc".to_vec();
        roundtrip(&data);
    }

    #[test]
    fn long_run_needs_length_extension() {
        let data = vec![b'x'; 5000];
        roundtrip(&data);
    }

    #[test]
    fn long_run_needs_absolute_length_escape() {
        let data = vec![b'y'; 70_000];
        roundtrip(&data);
    }

    #[test]
    fn mixed_binary_data() {
        let mut data = Vec::new();
        for i in 0..4096u32 {
            data.push((i % 251) as u8);
        }
        roundtrip(&data);
    }
}
