//! Framing for pipable (sequential-only) WIM resources and blobs.
//!
//! A pipable resource writes its chunk table *after* the chunk data so the
//! data can be produced incrementally to a pipe; each compressed chunk is
//! prefixed with its own size so a reader never needs to seek backward. A
//! pipable *blob* additionally carries a small header in front of its
//! resource so a sequential reader can identify the blob (hash, size,
//! flags) without having consulted a blob table first.

use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned, LE, U32, U64};

use crate::error::{FormatError, FormatResult};
use crate::resource::ResourceFlags;
use crate::Hash;

/// Magic tag identifying a pipable blob header.
pub const PIPABLE_BLOB_MAGIC: [u8; 4] = *b"pWm$";

bitflags::bitflags! {
    /// Flags carried in a pipable blob header, mirroring the subset of
    /// [`ResourceFlags`] relevant to a standalone blob in a pipe.
    #[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
    pub struct PipableBlobFlags: u32 {
        /// The blob's resource is compressed.
        const COMPRESSED = 1 << 0;
        /// This blob is an image-metadata resource.
        const METADATA = 1 << 1;
    }
}

impl From<ResourceFlags> for PipableBlobFlags {
    fn from(flags: ResourceFlags) -> Self {
        let mut out = Self::empty();
        if flags.contains(ResourceFlags::COMPRESSED) {
            out |= Self::COMPRESSED;
        }
        if flags.contains(ResourceFlags::METADATA) {
            out |= Self::METADATA;
        }
        out
    }
}

/// The on-disk pipable blob header.
#[derive(AsBytes, FromBytes, FromZeroes, Unaligned, Clone, Copy)]
#[repr(C)]
pub struct RawPipableBlobHeader {
    pub magic: [u8; 4],
    pub flags: U32<LE>,
    pub uncompressed_size: U64<LE>,
    pub hash: [u8; 20],
}

static_assertions::const_assert_eq!(core::mem::size_of::<RawPipableBlobHeader>(), 36);

/// A parsed pipable blob header.
#[derive(Clone, Copy, Debug)]
pub struct PipableBlobHeader {
    /// Flags describing the blob's resource.
    pub flags: PipableBlobFlags,
    /// Uncompressed size of the blob.
    pub uncompressed_size: u64,
    /// Content hash.
    pub hash: Hash,
}

impl PipableBlobHeader {
    /// Builds a new header.
    pub fn new(flags: PipableBlobFlags, uncompressed_size: u64, hash: Hash) -> Self {
        Self {
            flags,
            uncompressed_size,
            hash,
        }
    }

    /// Parses a header from its on-disk bytes.
    pub fn parse(bytes: &[u8]) -> FormatResult<(Self, usize)> {
        let (raw, _) =
            RawPipableBlobHeader::ref_from_prefix(bytes).ok_or(FormatError::UnexpectedEof)?;
        if raw.magic != PIPABLE_BLOB_MAGIC {
            return Err(FormatError::InvalidHeader("pipable blob header magic mismatch").into());
        }
        Ok((
            Self {
                flags: PipableBlobFlags::from_bits_truncate(raw.flags.get()),
                uncompressed_size: raw.uncompressed_size.get(),
                hash: raw.hash,
            },
            core::mem::size_of::<RawPipableBlobHeader>(),
        ))
    }

    /// Serializes this header.
    pub fn serialize(&self) -> Vec<u8> {
        RawPipableBlobHeader {
            magic: PIPABLE_BLOB_MAGIC,
            flags: U32::new(self.flags.bits()),
            uncompressed_size: U64::new(self.uncompressed_size),
            hash: self.hash,
        }
        .as_bytes()
        .to_vec()
    }
}

/// The per-chunk header that precedes every compressed chunk inside a
/// pipable resource.
#[derive(AsBytes, FromBytes, FromZeroes, Unaligned, Clone, Copy)]
#[repr(C)]
pub struct RawPipableChunkHeader {
    pub compressed_size: U32<LE>,
}

static_assertions::const_assert_eq!(core::mem::size_of::<RawPipableChunkHeader>(), 4);

impl RawPipableChunkHeader {
    /// Builds a chunk header for a chunk of the given compressed size.
    pub fn new(compressed_size: u32) -> Self {
        Self {
            compressed_size: U32::new(compressed_size),
        }
    }

    /// Parses a chunk header from the front of `bytes`.
    pub fn parse(bytes: &[u8]) -> FormatResult<(u32, usize)> {
        let (raw, _) = Self::ref_from_prefix(bytes).ok_or(FormatError::UnexpectedEof)?;
        Ok((raw.compressed_size.get(), core::mem::size_of::<Self>()))
    }
}
