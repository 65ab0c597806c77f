//! The LZMS codec: a range-coded stream of literal/match decisions
//! interleaved with reverse-bitstream-coded adaptive Huffman symbols,
//! four-slot LRU queues for recent LZ and delta match parameters, and an
//! optional x86 call-site postprocessing pass.
//!
//! Structurally this is the most involved of the three codecs: each coded
//! item is a handful of range-coded structural bits (is this a match? a
//! delta match? a repeated offset?) followed by Huffman-coded symbols for
//! whatever the structural bits selected, plus raw extra bits locating the
//! exact offset/length within a symbol's slot. [`range`] carries the range
//! coder and its bit-history probability model; [`contexts`] carries the
//! bit-context banks and the adaptive Huffman codes; [`queues`] carries the
//! two LRU queues; [`slots`] turns slot symbols into (and back from) raw
//! integers; [`x86`] is the postprocessing filter; [`decode`] and
//! [`encode`] drive the per-item loop described above.

mod contexts;
mod decode;
mod encode;
mod queues;
mod range;
mod slots;
mod x86;

pub use decode::decompress;
pub use encode::compress;

use crate::error::CodecResult;
use crate::{Compressor, Decompressor};

/// The default chunk size for LZMS resources: independent of
/// any codec-internal limit, since LZMS carries no fixed window size of its
/// own the way XPRESS and LZX do.
pub const CHUNK_SIZE: usize = 32 * 1024;

const NUM_LITERAL_SYMS: usize = 256;
const LITERAL_REBUILD_FREQ: u32 = 1024;

const NUM_LENGTH_SLOTS: usize = 40;
const LENGTH_REBUILD_FREQ: u32 = 512;
const LENGTH_MIN_MATCH: u32 = 2;

const NUM_OFFSET_SLOTS: usize = 64;
const OFFSET_REBUILD_FREQ: u32 = 512;

const NUM_DELTA_POWERS: usize = 32;
const DELTA_POWER_REBUILD_FREQ: u32 = 256;

/// A stateless LZMS decompressor: every call rebuilds its adaptive codes,
/// bit contexts and LRU queues from nothing, matching XPRESS's and LZX's
/// per-chunk model.
#[derive(Default)]
pub struct LzmsDecompressor {
    /// Whether the x86 call-site filter was applied at compress time.
    pub x86_filter: bool,
}

impl Decompressor for LzmsDecompressor {
    fn decompress(&mut self, input: &[u8], uncompressed_size: usize, out: &mut Vec<u8>) -> CodecResult<()> {
        let mut decoded = decompress(input, uncompressed_size)?;
        if self.x86_filter {
            x86::decode(&mut decoded);
        }
        *out = decoded;
        Ok(())
    }
}

/// A stateless LZMS compressor.
pub struct LzmsCompressor {
    /// Whether to apply the x86 call-site filter before compressing.
    pub x86_filter: bool,
}

impl Default for LzmsCompressor {
    fn default() -> Self {
        Self { x86_filter: true }
    }
}

impl Compressor for LzmsCompressor {
    fn compress(&mut self, input: &[u8], out: &mut Vec<u8>) -> usize {
        let mut buf = input.to_vec();
        if self.x86_filter {
            x86::encode(&mut buf);
        }
        let compressed = compress(&buf);
        let n = compressed.len();
        out.extend_from_slice(&compressed);
        n
    }

    fn bound(&self, input_len: usize) -> usize {
        input_len + input_len / 4 + 4096
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
    fn repeated_pattern_exercises_lz_queue() {
        let data = b"abcdefgh".repeat(300);
        roundtrip(&data);
    }

    #[test]
    fn arithmetic_ramp_exercises_delta_matches() {
        // A linear ramp is perfectly predicted by a delta match with
        // offset 1 and power 0: each byte equals twice its predecessor
        // minus its predecessor's predecessor, which our byte-wise formula
        // reproduces exactly once seeded.
        let mut data = Vec::with_capacity(2048);
        let (mut a, mut b) = (1u8, 2u8);
        for _ in 0..2048 {
            data.push(a);
            let next = b.wrapping_add(b).wrapping_sub(a);
            a = b;
            b = next;
        }
        roundtrip(&data);
    }

    #[test]
    fn incompressible_data_roundtrips() {
        let mut data = Vec::new();
        let mut seed = 0x9E37_79B9u32;
        for _ in 0..4096 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            data.push((seed >> 16) as u8);
        }
        roundtrip(&data);
    }

    #[test]
    fn full_x86_roundtrip_through_compressor_trait() {
        let mut data = vec![0u8; 512];
        for block in 0..4 {
            let pos = block * 40;
            data[pos] = 0xE8;
            let rel: i32 = 20 + block as i32;
            data[pos + 1..pos + 5].copy_from_slice(&rel.to_le_bytes());
        }
        let mut compressor = LzmsCompressor::default();
        let mut compressed = Vec::new();
        compressor.compress(&data, &mut compressed);
        let mut decompressor = LzmsDecompressor { x86_filter: true };
        let mut out = Vec::new();
        decompressor.decompress(&compressed, data.len(), &mut out).unwrap();
        assert_eq!(out, data);
    }
}
