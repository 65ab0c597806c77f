//! Decoders and encoders for the compression formats used inside WIM
//! archives: LZX, XPRESS, and LZMS.
//!
//! This crate has no knowledge of the WIM container format itself; it only
//! knows how to turn a chunk of compressed bytes into a chunk of
//! uncompressed bytes (and back). The `wim-format` crate drives these
//! codecs against the chunk tables and resource framing described by the
//! container format.
//!
//! This crate is not a general-purpose compression library: the encoders
//! exist only to the extent needed to produce format-legal WIM resources,
//! and the public surface is intentionally narrow.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod bitstream;
mod error;
mod huffman;
mod lz_copy;
mod lz_parse;
pub mod lzms;
pub mod lzx;
pub mod xpress;

pub use bitstream::{ForwardBitWriter, ForwardBitstream, ReverseBitstream};
pub use error::{CodecError, CodecResult};
pub use huffman::DecodeTable;
pub use lz_copy::lz_copy;

/// Identifies which codec a compressed chunk was produced with.
///
/// This mirrors the `compression-algorithm` field of the WIM header
///; `wim-format` maps its own enum to this one at the
/// resource-engine boundary.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum CompressionFormat {
    /// No compression; chunks are stored verbatim.
    None,
    /// The XPRESS format (single 512-symbol Huffman alphabet).
    Xpress,
    /// The LZX format (three block types, recent-offset queue).
    Lzx,
    /// The LZMS format (range-coded, adaptive Huffman, LZ + delta matches).
    Lzms,
}

/// A decompressor for one [`CompressionFormat`], holding whatever
/// per-stream state a chunk decode needs to be carried to the next chunk
/// (LZX's window and recent-offset queue, LZMS's adaptive codes).
///
/// This is a "capability object": codecs plug in as tagged variants of a
/// closed enum, and callers never need to know the concrete codec type.
pub trait Decompressor {
    /// Decompresses one chunk. `uncompressed_size` is the expected output
    /// length; `out` is resized to exactly that length on success.
    fn decompress(&mut self, input: &[u8], uncompressed_size: usize, out: &mut Vec<u8>) -> CodecResult<()>;
}

/// A compressor for one [`CompressionFormat`].
pub trait Compressor {
    /// Compresses one chunk, appending format-legal output to `out`.
    /// Returns the number of bytes appended.
    fn compress(&mut self, input: &[u8], out: &mut Vec<u8>) -> usize;

    /// An upper bound on the size `compress` may emit for an input of the
    /// given length; used by callers to size chunk-table reservations.
    fn bound(&self, input_len: usize) -> usize;
}
