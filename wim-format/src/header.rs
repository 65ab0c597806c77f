//! The WIM file header: the fixed-size record at byte 0 of every container.

use sync_file::{ReadAt, WriteAt};
use tracing::{debug, trace_span};
use uuid::Uuid;
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned, LE, U16, U32};

use crate::compression::CompressionType;
use crate::error::{FormatError, FormatResult};
use crate::resource::{RawResourceHeader, ResourceHeader};

/// Magic tag for a "normal" (seekable) WIM file.
pub const WIM_MAGIC: [u8; 8] = *b"MSWIM\0\0\0";

/// Magic tag for a pipable WIM.
pub const PWM_MAGIC: [u8; 8] = *b"PWM\0\0\0\0\0";

/// Legacy (pre-solid-resource) format version.
pub const VERSION_LEGACY: u32 = 0x0001_0d00;

/// The "solid-capable" format version.
pub const VERSION_SOLID: u32 = 0x0001_0e00;

pub(crate) const HEADER_SIZE: u32 = 208;

bitflags::bitflags! {
    /// The header's flag bitfield.
    #[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
    pub struct WimFlags: u32 {
        /// At least one resource in this container is compressed.
        const COMPRESSED = 1 << 1;
        /// The container should be treated as read-only by polite callers.
        const READONLY = 1 << 2;
        /// This file is one part of a spanned (multi-part) set.
        const SPANNED = 1 << 3;
        /// Reparse-point data should be "fixed" (path rewritten) on apply.
        const RP_FIX = 1 << 4;
        /// An in-place write is in progress; cleared only by the final
        /// header rewrite.
        const WRITE_IN_PROGRESS = 1 << 5;
        /// XPRESS is the default/declared compression algorithm.
        const COMPRESS_XPRESS = 1 << 17;
        /// LZX is the default/declared compression algorithm.
        const COMPRESS_LZX = 1 << 18;
        /// LZMS is the default/declared compression algorithm.
        const COMPRESS_LZMS = 1 << 19;
    }
}

impl WimFlags {
    /// Extracts the compression type encoded in the COMPRESS_* bits.
    pub fn compression_type(self) -> FormatResult<CompressionType> {
        if self.contains(Self::COMPRESS_LZMS) {
            Ok(CompressionType::Lzms)
        } else if self.contains(Self::COMPRESS_LZX) {
            Ok(CompressionType::Lzx)
        } else if self.contains(Self::COMPRESS_XPRESS) {
            Ok(CompressionType::Xpress)
        } else if self.contains(Self::COMPRESSED) {
            Err(FormatError::InvalidHeader(
                "COMPRESSED set but no compression algorithm bit is set",
            )
            .into())
        } else {
            Ok(CompressionType::None)
        }
    }

    /// Sets the COMPRESS_* and COMPRESSED bits to describe `ty`.
    pub fn with_compression_type(mut self, ty: CompressionType) -> Self {
        self.remove(Self::COMPRESS_XPRESS | Self::COMPRESS_LZX | Self::COMPRESS_LZMS | Self::COMPRESSED);
        match ty {
            CompressionType::None => {}
            CompressionType::Xpress => self.insert(Self::COMPRESS_XPRESS | Self::COMPRESSED),
            CompressionType::Lzx => self.insert(Self::COMPRESS_LZX | Self::COMPRESSED),
            CompressionType::Lzms => self.insert(Self::COMPRESS_LZMS | Self::COMPRESSED),
        }
        self
    }
}

/// The on-disk layout of the WIM header.
#[derive(AsBytes, FromBytes, FromZeroes, Unaligned, Clone, Copy)]
#[repr(C)]
pub struct RawWimHeader {
    pub magic: [u8; 8],
    pub header_size: U32<LE>,
    pub version: U32<LE>,
    pub flags: U32<LE>,
    pub chunk_size: U32<LE>,
    pub guid: [u8; 16],
    pub part_number: U16<LE>,
    pub total_parts: U16<LE>,
    pub image_count: U32<LE>,
    pub blob_table: RawResourceHeader,
    pub xml: RawResourceHeader,
    pub boot_metadata: RawResourceHeader,
    pub boot_index: U32<LE>,
    pub integrity: RawResourceHeader,
    pub reserved: [u8; 60],
}

static_assertions::const_assert_eq!(core::mem::size_of::<RawWimHeader>(), HEADER_SIZE as usize);

/// The in-memory, validated form of the WIM header.
#[derive(Clone, Debug)]
pub struct WimHeader {
    /// Whether this container uses the pipable (sequential-only) layout.
    pub pipable: bool,
    /// Format version (legacy or solid-capable).
    pub version: u32,
    /// Flag bitfield.
    pub flags: WimFlags,
    /// Default chunk size for non-solid resources.
    pub chunk_size: u32,
    /// The GUID shared by every part of a spanned set.
    pub guid: Uuid,
    /// 1-based part number within a spanned set.
    pub part_number: u16,
    /// Total number of parts in the spanned set (1 for a non-spanned file).
    pub total_parts: u16,
    /// Number of images in the container.
    pub image_count: u32,
    /// Location of the blob table resource.
    pub blob_table: ResourceHeader,
    /// Location of the XML metadata resource.
    pub xml: ResourceHeader,
    /// A copy of the boot image's metadata resource header, if any.
    pub boot_metadata: ResourceHeader,
    /// 1-based index of the boot image, or 0 if none.
    pub boot_index: u32,
    /// Location of the integrity table, if present.
    pub integrity: ResourceHeader,
}

impl WimHeader {
    /// Builds the header for a freshly created, empty container.
    pub fn new_empty(compression: CompressionType) -> Self {
        Self {
            pipable: false,
            version: VERSION_SOLID,
            flags: WimFlags::default().with_compression_type(compression),
            chunk_size: compression.default_chunk_size(),
            guid: Uuid::new_v4(),
            part_number: 1,
            total_parts: 1,
            image_count: 0,
            blob_table: ResourceHeader::default(),
            xml: ResourceHeader::default(),
            boot_metadata: ResourceHeader::default(),
            boot_index: 0,
            integrity: ResourceHeader::default(),
        }
    }

    /// Reads and validates the header at the start of `file`.
    pub fn read<F: ReadAt>(file: &F) -> FormatResult<Self> {
        let _span = trace_span!("WimHeader::read").entered();

        let mut raw = RawWimHeader::new_zeroed();
        file.read_exact_at(raw.as_bytes_mut(), 0)?;

        let pipable = if raw.magic == WIM_MAGIC {
            false
        } else if raw.magic == PWM_MAGIC {
            true
        } else {
            return Err(FormatError::NotAWim.into());
        };

        let version = raw.version.get();
        if version != VERSION_LEGACY && version != VERSION_SOLID {
            return Err(FormatError::UnknownVersion(version).into());
        }

        let flags = WimFlags::from_bits_truncate(raw.flags.get());
        flags.compression_type()?;

        let chunk_size = raw.chunk_size.get();
        if flags.compression_type()?.is_compressed() && (chunk_size == 0 || !chunk_size.is_power_of_two()) {
            return Err(FormatError::InvalidChunkSize(chunk_size).into());
        }

        let part_number = raw.part_number.get();
        let total_parts = raw.total_parts.get();
        if part_number == 0 || part_number > total_parts.max(1) {
            return Err(FormatError::InvalidHeader("part_number out of range").into());
        }

        debug!(
            pipable,
            version,
            chunk_size,
            part_number,
            total_parts,
            image_count = raw.image_count.get(),
            "read WIM header"
        );

        Ok(Self {
            pipable,
            version,
            flags,
            chunk_size,
            guid: Uuid::from_bytes(raw.guid),
            part_number,
            total_parts,
            image_count: raw.image_count.get(),
            blob_table: ResourceHeader::from_raw(&raw.blob_table),
            xml: ResourceHeader::from_raw(&raw.xml),
            boot_metadata: ResourceHeader::from_raw(&raw.boot_metadata),
            boot_index: raw.boot_index.get(),
            integrity: ResourceHeader::from_raw(&raw.integrity),
        })
    }

    /// Serializes this header to its on-disk representation.
    pub fn to_raw(&self) -> RawWimHeader {
        RawWimHeader {
            magic: if self.pipable { PWM_MAGIC } else { WIM_MAGIC },
            header_size: U32::new(HEADER_SIZE),
            version: U32::new(self.version),
            flags: U32::new(self.flags.bits()),
            chunk_size: U32::new(self.chunk_size),
            guid: *self.guid.as_bytes(),
            part_number: U16::new(self.part_number),
            total_parts: U16::new(self.total_parts),
            image_count: U32::new(self.image_count),
            blob_table: self.blob_table.to_raw(),
            xml: self.xml.to_raw(),
            boot_metadata: self.boot_metadata.to_raw(),
            boot_index: U32::new(self.boot_index),
            integrity: self.integrity.to_raw(),
            reserved: [0u8; 60],
        }
    }

    /// Writes this header to file offset 0.
    pub fn write<F: WriteAt>(&self, file: &F) -> FormatResult<()> {
        let raw = self.to_raw();
        file.write_all_at(raw.as_bytes(), 0)?;
        Ok(())
    }

    /// The compression type declared by the header flags.
    pub fn compression_type(&self) -> CompressionType {
        self.flags
            .compression_type()
            .expect("flags were already validated by WimHeader::read")
    }
}
