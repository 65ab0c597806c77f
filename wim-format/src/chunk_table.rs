//! Per-chunk offset tables for compressed resources.
//!
//! A non-solid resource's chunk table has one entry per chunk boundary
//! *after* the first (chunk 0 always starts at offset 0 implicitly); a
//! solid resource's table has one entry per chunk, including the first,
//! and is preceded by a small alt-header naming the resource's own chunk
//! size and compression format.

use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned, LE, U32, U64};

use crate::compression::CompressionType;
use crate::error::{FormatError, FormatResult};

/// A parsed chunk table: the byte offset (relative to the start of the
/// chunk data region) at which each chunk after the first begins.
#[derive(Clone, Debug, Default)]
pub struct ChunkTable {
    /// `offsets[i]` is the start of chunk `i + 1`. Chunk 0 starts at 0
    /// implicitly and is not stored.
    offsets: Vec<u64>,
}

impl ChunkTable {
    /// Whether chunk-table entries must be 8 bytes wide instead of 4,
    /// decided by whether the resource's uncompressed size exceeds what
    /// fits in 32 bits.
    pub fn entry_is_64bit(uncompressed_size: u64) -> bool {
        uncompressed_size >= (1u64 << 32)
    }

    /// The serialized byte size of a table with `num_entries` entries.
    pub fn serialized_len(num_entries: usize, entry_is_64bit: bool) -> usize {
        num_entries * if entry_is_64bit { 8 } else { 4 }
    }

    /// Builds a chunk table from a complete set of per-chunk compressed
    /// sizes (used by the writer, which naturally produces sizes in
    /// chunk order).
    pub fn from_chunk_sizes(chunk_sizes: &[u64]) -> Self {
        let mut offsets = Vec::with_capacity(chunk_sizes.len().saturating_sub(1));
        let mut running = 0u64;
        for (i, &size) in chunk_sizes.iter().enumerate() {
            running += size;
            if i + 1 < chunk_sizes.len() {
                offsets.push(running);
            }
        }
        Self { offsets }
    }

    /// Parses a non-solid resource's chunk table: `num_chunks - 1`
    /// entries, 4 or 8 bytes wide depending on `uncompressed_size`.
    pub fn parse(bytes: &[u8], num_chunks: u64, uncompressed_size: u64) -> FormatResult<Self> {
        let num_entries = num_chunks.saturating_sub(1) as usize;
        if num_entries == 0 {
            return Ok(Self::default());
        }
        let entry_is_64bit = Self::entry_is_64bit(uncompressed_size);
        let offsets = if entry_is_64bit {
            let (entries, _) = <[U64<LE>]>::ref_from_prefix_with_elems(bytes, num_entries)
                .ok_or(FormatError::UnexpectedEof)?;
            entries.iter().map(|e| e.get()).collect()
        } else {
            let (entries, _) = <[U32<LE>]>::ref_from_prefix_with_elems(bytes, num_entries)
                .ok_or(FormatError::UnexpectedEof)?;
            entries.iter().map(|e| e.get() as u64).collect()
        };
        Ok(Self { offsets })
    }

    /// Parses a solid resource's chunk table: `num_chunks` entries
    /// (including a redundant leading zero entry for chunk 0), rather than
    /// the `num_chunks - 1` entries a non-solid table stores.
    pub fn parse_solid(bytes: &[u8], num_chunks: u64, uncompressed_size: u64) -> FormatResult<Self> {
        let num_entries = num_chunks as usize;
        if num_entries == 0 {
            return Ok(Self::default());
        }
        let entry_is_64bit = Self::entry_is_64bit(uncompressed_size);
        let mut offsets: Vec<u64> = if entry_is_64bit {
            let (entries, _) = <[U64<LE>]>::ref_from_prefix_with_elems(bytes, num_entries)
                .ok_or(FormatError::UnexpectedEof)?;
            entries.iter().map(|e| e.get()).collect()
        } else {
            let (entries, _) = <[U32<LE>]>::ref_from_prefix_with_elems(bytes, num_entries)
                .ok_or(FormatError::UnexpectedEof)?;
            entries.iter().map(|e| e.get() as u64).collect()
        };
        // entries[0] is always 0 (chunk 0's redundant start); our in-memory
        // form only stores the starts of chunk 1 and on.
        if !offsets.is_empty() {
            offsets.remove(0);
        }
        Ok(Self { offsets })
    }

    /// Serializes a solid resource's chunk table, reinserting the
    /// redundant leading zero entry for chunk 0.
    pub fn serialize_solid(&self, uncompressed_size: u64) -> Vec<u8> {
        let mut with_leading_zero = Vec::with_capacity(self.offsets.len() + 1);
        with_leading_zero.push(0u64);
        with_leading_zero.extend_from_slice(&self.offsets);
        if Self::entry_is_64bit(uncompressed_size) {
            let entries: Vec<U64<LE>> = with_leading_zero.iter().map(|&o| U64::new(o)).collect();
            entries.as_bytes().to_vec()
        } else {
            let entries: Vec<U32<LE>> = with_leading_zero.iter().map(|&o| U32::new(o as u32)).collect();
            entries.as_bytes().to_vec()
        }
    }

    /// Serializes the table (not including the solid alt-header, if any).
    pub fn serialize(&self, uncompressed_size: u64) -> Vec<u8> {
        if Self::entry_is_64bit(uncompressed_size) {
            let entries: Vec<U64<LE>> = self.offsets.iter().map(|&o| U64::new(o)).collect();
            entries.as_bytes().to_vec()
        } else {
            let entries: Vec<U32<LE>> = self.offsets.iter().map(|&o| U32::new(o as u32)).collect();
            entries.as_bytes().to_vec()
        }
    }

    /// The start offset (relative to the chunk data region) of chunk `i`.
    pub fn chunk_start(&self, i: u64) -> u64 {
        if i == 0 {
            0
        } else {
            self.offsets[(i - 1) as usize]
        }
    }

    /// The end offset of chunk `i`, given the resource's total compressed
    /// chunk-data length.
    pub fn chunk_end(&self, i: u64, chunk_data_len: u64) -> u64 {
        if (i as usize) < self.offsets.len() {
            self.offsets[i as usize]
        } else {
            chunk_data_len
        }
    }

    /// Number of chunks implied by this table's entry count (one more
    /// than the number of stored offsets).
    pub fn num_chunks(&self) -> u64 {
        self.offsets.len() as u64 + 1
    }
}

/// The alt-header that precedes a solid resource's chunk table.
#[derive(AsBytes, FromBytes, FromZeroes, Unaligned, Clone, Copy)]
#[repr(C)]
pub struct RawSolidHeader {
    /// A fixed tag distinguishing this from a non-solid chunk table,
    /// mirroring wimlib's `0x100000000` marker placed where a 32-bit
    /// resource size could never legitimately appear.
    pub marker: U64<LE>,
    pub chunk_size: U32<LE>,
    pub compression_format: U32<LE>,
    pub res_usize: U64<LE>,
}

static_assertions::const_assert_eq!(core::mem::size_of::<RawSolidHeader>(), 24);

/// Marker value placed at the front of every solid resource's alt-header.
pub const SOLID_MARKER: u64 = 0x1_0000_0000;

impl RawSolidHeader {
    /// Builds the alt-header for a solid resource.
    pub fn new(uncompressed_size: u64, chunk_size: u32, compression: CompressionType) -> Self {
        Self {
            marker: U64::new(SOLID_MARKER),
            chunk_size: U32::new(chunk_size),
            compression_format: U32::new(compression.to_code() as u32),
            res_usize: U64::new(uncompressed_size),
        }
    }

    /// Parses and validates a solid alt-header.
    pub fn parse(bytes: &[u8]) -> FormatResult<(Self, CompressionType, u32, u64)> {
        let (raw, _) = Self::ref_from_prefix(bytes).ok_or(FormatError::UnexpectedEof)?;
        if raw.marker.get() != SOLID_MARKER {
            return Err(FormatError::InvalidHeader("solid resource alt-header marker mismatch").into());
        }
        let chunk_size = raw.chunk_size.get();
        if chunk_size == 0 {
            return Err(FormatError::InvalidChunkSize(chunk_size).into());
        }
        let compression = CompressionType::from_code(raw.compression_format.get() as u8)?;
        Ok((*raw, compression, chunk_size, raw.res_usize.get()))
    }
}
