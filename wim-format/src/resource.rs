//! Resource headers and the in-memory resource descriptor.

use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned, LE, U64};

use crate::compression::CompressionType;
use crate::error::{FormatError, FormatResult};
use crate::Hash;

bitflags::bitflags! {
    /// Flags carried by a resource header.
    #[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
    pub struct ResourceFlags: u8 {
        /// The resource's bytes on disk are compressed.
        const COMPRESSED = 1 << 0;
        /// This resource is an image-metadata resource.
        const METADATA = 1 << 1;
        /// The resource's bytes are no longer referenced (a hole left by
        /// an in-place rewrite; not currently produced by the writer but
        /// recognized on read for compatibility with hand-edited files).
        const FREE = 1 << 2;
        /// This resource belongs to a spanned (multi-part) set and may
        /// not be wholly contained in this part.
        const SPANNED = 1 << 3;
        /// This is a solid resource: several blobs packed behind one
        /// compression stream.
        const SOLID = 1 << 4;
    }
}

/// The on-disk resource header. Mirrors the real WIM format's packing of
/// the flags into the top byte of an otherwise 56-bit size field.
#[derive(AsBytes, FromBytes, FromZeroes, Unaligned, Clone, Copy, Default)]
#[repr(C)]
pub struct RawResourceHeader {
    /// Low 56 bits: `size_in_wim`. Top 8 bits: [`ResourceFlags`] bits.
    size_and_flags: U64<LE>,
    offset_in_wim: U64<LE>,
    uncompressed_size: U64<LE>,
}

static_assertions::const_assert_eq!(core::mem::size_of::<RawResourceHeader>(), 24);

/// The in-memory, unpacked form of a resource header.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ResourceHeader {
    /// Byte offset of this resource's data within the WIM file.
    pub offset_in_wim: u64,
    /// Size in bytes of this resource's data as stored on disk (may be
    /// less than `uncompressed_size` when compressed).
    pub size_in_wim: u64,
    /// Size in bytes of this resource's data once decompressed.
    pub uncompressed_size: u64,
    /// Flag bits.
    pub flags: ResourceFlags,
}

impl ResourceHeader {
    /// Unpacks a raw on-disk resource header.
    pub fn from_raw(raw: &RawResourceHeader) -> Self {
        let packed = raw.size_and_flags.get();
        Self {
            offset_in_wim: raw.offset_in_wim.get(),
            size_in_wim: packed & 0x00ff_ffff_ffff_ffff,
            uncompressed_size: raw.uncompressed_size.get(),
            flags: ResourceFlags::from_bits_truncate((packed >> 56) as u8),
        }
    }

    /// Packs this header back into its on-disk representation.
    pub fn to_raw(&self) -> RawResourceHeader {
        let packed = (self.size_in_wim & 0x00ff_ffff_ffff_ffff) | ((self.flags.bits() as u64) << 56);
        RawResourceHeader {
            size_and_flags: U64::new(packed),
            offset_in_wim: U64::new(self.offset_in_wim),
            uncompressed_size: U64::new(self.uncompressed_size),
        }
    }

    /// Validates the header-level invariant `compressed ⇒ size_in_wim <
    /// uncompressed_size` unless the resource is a single uncompressed
    /// chunk equal in size to its data.
    pub fn validate(&self) -> FormatResult<()> {
        if self.flags.contains(ResourceFlags::SOLID) && !self.flags.contains(ResourceFlags::COMPRESSED) {
            return Err(FormatError::InvalidHeader("SOLID set without COMPRESSED").into());
        }
        if self.flags.contains(ResourceFlags::COMPRESSED)
            && self.size_in_wim >= self.uncompressed_size
            && self.size_in_wim != self.uncompressed_size
        {
            return Err(FormatError::InvalidHeader(
                "compressed resource's on-disk size is not smaller than its uncompressed size",
            )
            .into());
        }
        Ok(())
    }

    /// `true` if this resource's bytes are stored compressed.
    pub fn is_compressed(&self) -> bool {
        self.flags.contains(ResourceFlags::COMPRESSED)
    }

    /// `true` if this is a solid (multi-blob) resource.
    pub fn is_solid(&self) -> bool {
        self.flags.contains(ResourceFlags::SOLID)
    }

    /// The byte range `[offset_in_wim, offset_in_wim + size_in_wim)` this
    /// resource occupies in the container file.
    pub fn byte_range(&self) -> std::ops::Range<u64> {
        self.offset_in_wim..self.offset_in_wim + self.size_in_wim
    }
}

/// One blob packed inside a solid resource, located by its offset within
/// the resource's decompressed byte stream.
#[derive(Clone, Copy, Debug)]
pub struct SolidBlobEntry {
    /// The blob's content hash.
    pub hash: Hash,
    /// Offset of the blob's first byte within the resource's uncompressed
    /// data.
    pub offset_in_res: u64,
    /// Size in bytes of the blob.
    pub size: u64,
}

/// The in-memory resource descriptor.
///
/// Unlike [`ResourceHeader`], which is the compact on-disk record, this
/// carries everything the resource engine needs to open and read the
/// resource: its compression parameters and, for solid resources, the
/// list of blobs packed inside it.
#[derive(Clone, Debug)]
pub struct ResourceDescriptor {
    /// Location and size of the resource within the container.
    pub header: ResourceHeader,
    /// Compression algorithm used for this resource's chunks.
    pub compression_type: CompressionType,
    /// Chunk size used to split the resource's uncompressed data.
    pub chunk_size: u32,
    /// Whether this resource uses the pipable (chunk-table-after-data)
    /// layout.
    pub is_pipable: bool,
    /// For solid resources: the blobs packed inside, ordered by ascending
    /// `offset_in_res`, non-overlapping.
    pub solid_blobs: Vec<SolidBlobEntry>,
}

impl ResourceDescriptor {
    /// Builds a descriptor for a non-solid resource.
    pub fn simple(header: ResourceHeader, compression_type: CompressionType, chunk_size: u32) -> Self {
        Self {
            header,
            compression_type,
            chunk_size,
            is_pipable: false,
            solid_blobs: Vec::new(),
        }
    }

    /// The number of chunks the resource's uncompressed data is split
    /// into.
    pub fn num_chunks(&self) -> u64 {
        if self.header.uncompressed_size == 0 {
            0
        } else {
            (self.header.uncompressed_size + self.chunk_size as u64 - 1) / self.chunk_size as u64
        }
    }

    /// Validates that `solid_blobs` is sorted by `offset_in_res` and that
    /// no two entries overlap.
    pub fn validate_solid_layout(&self) -> FormatResult<()> {
        let mut prev_end = 0u64;
        for entry in &self.solid_blobs {
            if entry.offset_in_res < prev_end {
                return Err(FormatError::InvalidHeader(
                    "solid resource blobs overlap or are out of order",
                )
                .into());
            }
            prev_end = entry.offset_in_res + entry.size;
        }
        if prev_end > self.header.uncompressed_size {
            return Err(FormatError::InvalidHeader(
                "solid resource blobs extend past the resource's uncompressed size",
            )
            .into());
        }
        Ok(())
    }
}
