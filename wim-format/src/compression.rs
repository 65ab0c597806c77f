//! The compression-algorithm field of the WIM header, and the glue that
//! turns it into a `wim-codecs` capability object.

use wim_codecs::lzms::{LzmsCompressor, LzmsDecompressor};
use wim_codecs::lzx::{LzxCompressor, LzxDecompressor};
use wim_codecs::xpress::{XpressCompressor, XpressDecompressor};
use wim_codecs::{CompressionFormat, Compressor, Decompressor};

use crate::error::{FormatError, FormatResult};

/// The compression algorithm a WIM container (or one of its resources) uses.
///
/// This mirrors the header's `compression-algorithm` field.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
#[repr(u8)]
pub enum CompressionType {
    /// No compression.
    None = 0,
    /// XPRESS (32 KiB chunks, single 512-symbol alphabet).
    Xpress = 1,
    /// LZX (three block types, 3-entry recent-offset queue).
    Lzx = 2,
    /// LZMS (range-coded, adaptive Huffman, LZ + delta matches).
    Lzms = 3,
}

impl CompressionType {
    /// Decodes the on-disk compression-type code from the header flags.
    pub fn from_code(code: u8) -> FormatResult<Self> {
        match code {
            0 => Ok(Self::None),
            1 => Ok(Self::Xpress),
            2 => Ok(Self::Lzx),
            3 => Ok(Self::Lzms),
            other => Err(FormatError::InvalidCompressionType(other).into()),
        }
    }

    /// Encodes this compression type to the on-disk code.
    pub fn to_code(self) -> u8 {
        self as u8
    }

    /// The default chunk size used for non-solid resources of this
    /// compression type.
    pub fn default_chunk_size(self) -> u32 {
        match self {
            Self::None => 32 * 1024,
            Self::Xpress => 32 * 1024,
            Self::Lzx => 32 * 1024,
            Self::Lzms => 32 * 1024,
        }
    }

    /// The default chunk size for solid resources of this compression
    /// type. Solid resources amortize the chunk table over many blobs, so
    /// a much larger chunk size is worthwhile.
    pub const SOLID_CHUNK_SIZE: u32 = 10 * 1024 * 1024;

    /// Builds a fresh decompressor for this algorithm.
    pub fn new_decompressor(self) -> Box<dyn Decompressor + Send> {
        match self {
            Self::None => Box::new(NullCodec),
            Self::Xpress => Box::new(XpressDecompressor),
            Self::Lzx => Box::new(LzxDecompressor::default()),
            Self::Lzms => Box::new(LzmsDecompressor::default()),
        }
    }

    /// Builds a fresh compressor for this algorithm.
    pub fn new_compressor(self) -> Box<dyn Compressor + Send> {
        match self {
            Self::None => Box::new(NullCodec),
            Self::Xpress => Box::new(XpressCompressor),
            Self::Lzx => Box::new(LzxCompressor::default()),
            Self::Lzms => Box::new(LzmsCompressor::default()),
        }
    }

    /// Maps to the codec crate's format tag.
    pub fn to_codec_format(self) -> CompressionFormat {
        match self {
            Self::None => CompressionFormat::None,
            Self::Xpress => CompressionFormat::Xpress,
            Self::Lzx => CompressionFormat::Lzx,
            Self::Lzms => CompressionFormat::Lzms,
        }
    }

    /// `true` for any compression type other than `None`.
    pub fn is_compressed(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// The identity codec used for uncompressed resources: a chunk's
/// "compressed" bytes are simply its uncompressed bytes.
struct NullCodec;

impl Decompressor for NullCodec {
    fn decompress(
        &mut self,
        input: &[u8],
        uncompressed_size: usize,
        out: &mut Vec<u8>,
    ) -> wim_codecs::CodecResult<()> {
        if input.len() != uncompressed_size {
            return Err(wim_codecs::CodecError::InvalidChunkSize);
        }
        out.clear();
        out.extend_from_slice(input);
        Ok(())
    }
}

impl Compressor for NullCodec {
    fn compress(&mut self, input: &[u8], out: &mut Vec<u8>) -> usize {
        out.extend_from_slice(input);
        input.len()
    }

    fn bound(&self, input_len: usize) -> usize {
        input_len
    }
}
