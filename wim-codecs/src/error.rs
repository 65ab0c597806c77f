//! The codec-layer error taxonomy.
//!
//! This is deliberately a small, closed enum rather than `anyhow::Error`:
//! codec errors are always one of a handful of "corrupt input" shapes,
//! and the resource engine in `wim-format` needs to distinguish them from
//! I/O errors without downcasting.

use std::fmt;

/// A decode or encode failure inside one of the three codecs.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum CodecError {
    /// A Huffman code table was over-subscribed (too many codewords for
    /// the lengths given).
    OversubscribedCode,
    /// A Huffman code table was under-subscribed in a way that still
    /// allows some codeword to be decoded (ambiguous / incomplete code).
    IncompleteCode,
    /// A decoded symbol was outside the valid range for its alphabet.
    InvalidSymbol,
    /// A match `length` would write past the end of the output buffer.
    LengthOverflow,
    /// A match `offset` refers to bytes that have not been produced yet.
    OffsetOverflow,
    /// The forward or reverse bitstream ran out of input before the block
    /// finished decoding.
    UnexpectedEof,
    /// The LZMS range decoder's `(range, code)` state underflowed.
    RangeDecoderUnderflow,
    /// An LZX/XPRESS block header described a block type this decoder
    /// does not recognize.
    InvalidBlockType,
    /// A compressed size or chunk size was inconsistent with the
    /// uncompressed size it claims to represent.
    InvalidChunkSize,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::OversubscribedCode => "Huffman code table is over-subscribed",
            Self::IncompleteCode => "Huffman code table is incomplete",
            Self::InvalidSymbol => "decoded symbol is out of range for its alphabet",
            Self::LengthOverflow => "match length exceeds remaining output space",
            Self::OffsetOverflow => "match offset refers to data not yet produced",
            Self::UnexpectedEof => "bitstream ended before the block finished decoding",
            Self::RangeDecoderUnderflow => "LZMS range decoder underflowed",
            Self::InvalidBlockType => "unrecognized block type",
            Self::InvalidChunkSize => "chunk size is inconsistent with uncompressed size",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for CodecError {}

/// The result type used throughout the codec crate.
pub type CodecResult<T> = Result<T, CodecError>;
