//! The blob table and content-addressed deduplication index.

use std::collections::HashMap;

use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned, LE, U16, U32};

use crate::error::{FormatError, FormatResult};
use crate::resource::{RawResourceHeader, ResourceFlags, ResourceHeader};
use crate::Hash;

/// Where a blob's bytes currently live.
#[derive(Clone, Debug)]
pub enum BlobLocation {
    /// Stored inside a resource of the container being read or written.
    /// `resource` indexes into a resource arena owned by the caller;
    /// `offset_in_res` and `size` locate the blob within a solid
    /// resource's decompressed byte stream (both zero for a non-solid
    /// resource, where the blob *is* the whole resource).
    InWim {
        /// Index into the owning container's resource arena.
        resource: usize,
        /// Offset of the blob within the resource's decompressed data.
        offset_in_res: u64,
    },
    /// Backed by a file on the local filesystem, not yet part of any WIM
    /// (e.g. freshly scanned from a capture source).
    OnDiskFile(std::path::PathBuf),
    /// Held entirely in memory.
    InMemoryBuffer(std::sync::Arc<[u8]>),
    /// Spilled to a staging file during a write that needed to buffer more
    /// data than was comfortable to keep resident.
    InStagingFile {
        /// Path to the staging file.
        path: std::path::PathBuf,
        /// Byte offset within the staging file.
        offset: u64,
    },
    /// Backed by a buffer attached by the caller through the scanner
    /// interface, identity managed by the caller.
    InAttachedBuffer(std::sync::Arc<dyn crate::blob::AttachedBufferSource>),
}

/// A lazy byte source attached by a scanner. Kept as a trait
/// rather than a concrete buffer type so the `wim` crate's scanner
/// interface can hand over streaming sources without copying them into
/// this crate's own buffer type.
pub trait AttachedBufferSource: Send + Sync + std::fmt::Debug {
    /// Reads the entire buffer.
    fn read_all(&self) -> std::io::Result<Vec<u8>>;
}

/// Where a blob's hash came from: known up front, or deferred until the
/// blob is actually read.
#[derive(Clone, Debug)]
pub enum BlobHashState {
    /// The hash is known.
    Known(Hash),
    /// The hash has not been computed yet. `back_ref` identifies the
    /// inode/stream that owns this blob so the hash can be filled in once
    /// it becomes known.
    Unhashed {
        /// An opaque identifier for the owning inode/stream, meaningful
        /// only to the `wim` crate.
        back_ref: u64,
    },
}

/// A content-addressed blob descriptor.
#[derive(Clone, Debug)]
pub struct BlobDescriptor {
    /// Identity key, once known.
    pub hash_state: BlobHashState,
    /// Size of the blob's uncompressed byte sequence.
    pub uncompressed_size: u64,
    /// Number of references from every image currently in the container.
    pub refcnt: u64,
    /// Number of references from the image set currently being written.
    pub out_refcnt: u64,
    /// Where the blob's bytes currently live.
    pub location: BlobLocation,
}

impl BlobDescriptor {
    /// The blob's hash, if known.
    pub fn hash(&self) -> Option<Hash> {
        match self.hash_state {
            BlobHashState::Known(h) => Some(h),
            BlobHashState::Unhashed { .. } => None,
        }
    }

    /// `true` if this blob's hash has not yet been computed.
    pub fn is_unhashed(&self) -> bool {
        matches!(self.hash_state, BlobHashState::Unhashed { .. })
    }
}

/// On-disk blob-table entry: a resource header, a part
/// number (for spanned sets), a reference count, and the blob's hash.
/// This mirrors the real format's 50-byte packed entry.
#[derive(AsBytes, FromBytes, FromZeroes, Unaligned, Clone, Copy)]
#[repr(C)]
pub struct RawBlobTableEntry {
    pub resource_header: RawResourceHeader,
    pub part_number: U16<LE>,
    pub ref_count: U32<LE>,
    pub hash: [u8; 20],
}

static_assertions::const_assert_eq!(core::mem::size_of::<RawBlobTableEntry>(), 50);

/// One entry as read from the on-disk blob table, before being resolved
/// into a live [`BlobDescriptor`] (resolution needs the resource arena,
/// which the blob table itself does not own).
#[derive(Clone, Copy, Debug)]
pub struct BlobTableEntry {
    /// Location, size and flags of the backing resource.
    pub resource_header: ResourceHeader,
    /// Which part of a spanned set the resource lives in.
    pub part_number: u16,
    /// Reference count recorded on disk.
    pub ref_count: u32,
    /// Content hash.
    pub hash: Hash,
}

impl BlobTableEntry {
    fn from_raw(raw: &RawBlobTableEntry) -> Self {
        Self {
            resource_header: ResourceHeader::from_raw(&raw.resource_header),
            part_number: raw.part_number.get(),
            ref_count: raw.ref_count.get(),
            hash: raw.hash,
        }
    }

    fn to_raw(self) -> RawBlobTableEntry {
        RawBlobTableEntry {
            resource_header: self.resource_header.to_raw(),
            part_number: U16::new(self.part_number),
            ref_count: U32::new(self.ref_count),
            hash: self.hash,
        }
    }

    /// `true` if the ["metadata"](ResourceFlags::METADATA) flag marks this
    /// entry as an image-metadata resource.
    pub fn is_metadata(&self) -> bool {
        self.resource_header.flags.contains(ResourceFlags::METADATA)
    }
}

/// Parses the raw bytes of an on-disk blob table.
///
/// Entries are expected ordered by increasing resource offset *within each
/// part*: a spanned set's combined table interleaves
/// entries from every part, each part restarting its own offset numbering
/// at that part's own header, so the monotonicity check is scoped per
/// `part_number` rather than applied across the whole table. Out-of-order
/// entries within a single part usually indicate a corrupt or hand-edited
/// table and are rejected rather than silently re-sorted.
pub fn parse_blob_table(bytes: &[u8]) -> FormatResult<Vec<BlobTableEntry>> {
    if bytes.len() % core::mem::size_of::<RawBlobTableEntry>() != 0 {
        return Err(FormatError::InvalidBlobTableEntry(0, "table size is not a multiple of entry size").into());
    }
    let raw_entries: &[RawBlobTableEntry] =
        <[RawBlobTableEntry]>::ref_from_bytes(bytes).ok_or(FormatError::UnexpectedEof)?;

    let mut entries = Vec::with_capacity(raw_entries.len());
    let mut prev_offset_by_part: HashMap<u16, u64> = HashMap::new();
    for (i, raw) in raw_entries.iter().enumerate() {
        let entry = BlobTableEntry::from_raw(raw);
        entry
            .resource_header
            .validate()
            .map_err(|_| FormatError::InvalidBlobTableEntry(i, "resource header invariant violated"))?;
        let prev_offset = prev_offset_by_part.entry(entry.part_number).or_insert(0);
        if entry.resource_header.offset_in_wim < *prev_offset {
            return Err(FormatError::InvalidBlobTableEntry(i, "entries are not ordered by offset within their part").into());
        }
        *prev_offset = entry.resource_header.offset_in_wim;
        entries.push(entry);
    }
    Ok(entries)
}

/// Serializes a set of blob-table entries, in the order given (callers are
/// responsible for the ascending-offset ordering requirement; see the
/// write orchestrator's final sort in `wim::write::plan`).
pub fn serialize_blob_table(entries: &[BlobTableEntry]) -> Vec<u8> {
    let raw: Vec<RawBlobTableEntry> = entries.iter().map(|e| e.to_raw()).collect();
    raw.as_bytes().to_vec()
}

/// The in-memory blob table: a hash-keyed index plus the size-uniqueness
/// index used during writes.
#[derive(Default)]
pub struct BlobTable {
    blobs: HashMap<Hash, BlobDescriptor>,
    /// Counts how many known blobs share each uncompressed size; a count
    /// of 1 means the blob is safe to stream without pre-hashing.
    size_counts: HashMap<u64, u32>,
}

impl BlobTable {
    /// Creates an empty blob table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a blob descriptor under its hash.
    ///
    /// # Panics
    /// Panics if the blob's hash is not yet known; unhashed blobs are kept
    /// by the caller until resolved and are never inserted
    /// into the hash-keyed index.
    pub fn insert(&mut self, blob: BlobDescriptor) {
        let hash = blob.hash().expect("cannot insert an unhashed blob into the blob table");
        *self.size_counts.entry(blob.uncompressed_size).or_insert(0) += 1;
        self.blobs.insert(hash, blob);
    }

    /// Looks up a blob by hash.
    pub fn get(&self, hash: &Hash) -> Option<&BlobDescriptor> {
        self.blobs.get(hash)
    }

    /// Looks up a blob by hash, mutably.
    pub fn get_mut(&mut self, hash: &Hash) -> Option<&mut BlobDescriptor> {
        self.blobs.get_mut(hash)
    }

    /// Whether a blob with this hash is already present.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.blobs.contains_key(hash)
    }

    /// Removes a blob (e.g. after discovering it duplicates another while
    /// resolving an unhashed read).
    pub fn remove(&mut self, hash: &Hash) -> Option<BlobDescriptor> {
        let removed = self.blobs.remove(hash);
        if let Some(b) = &removed {
            if let Some(count) = self.size_counts.get_mut(&b.uncompressed_size) {
                *count = count.saturating_sub(1);
            }
        }
        removed
    }

    /// Iterates all blobs.
    pub fn iter(&self) -> impl Iterator<Item = (&Hash, &BlobDescriptor)> {
        self.blobs.iter()
    }

    /// Number of blobs in the table.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// `true` if the table has no blobs.
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// `true` if `size` is unique among the blobs currently known to this
    /// table.
    pub fn is_size_unique(&self, size: u64) -> bool {
        self.size_counts.get(&size).copied().unwrap_or(0) <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(part_number: u16, offset_in_wim: u64, hash_byte: u8) -> BlobTableEntry {
        BlobTableEntry {
            resource_header: ResourceHeader {
                offset_in_wim,
                size_in_wim: 4,
                uncompressed_size: 4,
                flags: ResourceFlags::empty(),
            },
            part_number,
            ref_count: 1,
            hash: [hash_byte; 20],
        }
    }

    #[test]
    fn round_trips_a_single_part_table() {
        let entries = vec![entry(1, 208, 1), entry(1, 300, 2), entry(1, 400, 3)];
        let bytes = serialize_blob_table(&entries);
        let parsed = parse_blob_table(&bytes).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[1].resource_header.offset_in_wim, 300);
    }

    #[test]
    fn rejects_out_of_order_offsets_within_a_part() {
        let entries = vec![entry(1, 300, 1), entry(1, 208, 2)];
        let bytes = serialize_blob_table(&entries);
        assert!(parse_blob_table(&bytes).is_err());
    }

    #[test]
    fn accepts_interleaved_parts_each_monotonic_on_their_own(
    ) {
        // A spanned set's combined table interleaves entries from both
        // parts; each part restarts its own offset numbering.
        let entries = vec![entry(1, 208, 1), entry(2, 208, 2), entry(1, 300, 3), entry(2, 250, 4)];
        let bytes = serialize_blob_table(&entries);
        let parsed = parse_blob_table(&bytes).unwrap();
        assert_eq!(parsed.len(), 4);
    }

    #[test]
    fn rejects_out_of_order_offsets_within_one_part_even_when_interleaved() {
        let entries = vec![entry(1, 300, 1), entry(2, 208, 2), entry(1, 250, 3)];
        let bytes = serialize_blob_table(&entries);
        assert!(parse_blob_table(&bytes).is_err());
    }
}
