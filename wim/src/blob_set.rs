//! Blob-set planning for a write.

use std::collections::HashSet;

use wim_format::{BlobTable, Hash};

use crate::error::{Error, Result};
use crate::flags::WriteFlags;
use crate::metadata::ImageMetadata;

/// Walks every stream of every image in `images`, incrementing each
/// referenced blob's `out_refcnt` in `blob_table` by the number of
/// references it picks up from this image set.
///
/// Streams whose hash is [`wim_format::ZERO_HASH`] (empty streams) are
/// skipped; they carry no blob.
pub fn compute_out_refcounts(images: &[ImageMetadata], blob_table: &mut BlobTable) -> Result<()> {
    for image in images {
        image.iterate(|_path, dentry| {
            for stream in &dentry.streams {
                if stream.hash == wim_format::ZERO_HASH {
                    continue;
                }
                if let Some(blob) = blob_table.get_mut(&stream.hash) {
                    blob.out_refcnt += 1;
                }
            }
        });
    }
    // Second pass purely to surface a clear error for any stream whose
    // blob never made it into the table (a bug upstream in add_image, not
    // a normal runtime condition, hence the dedicated error rather than a
    // silent skip).
    for image in images {
        let mut missing = None;
        image.iterate(|_path, dentry| {
            for stream in &dentry.streams {
                if stream.hash != wim_format::ZERO_HASH && blob_table.get(&stream.hash).is_none() {
                    missing = Some(stream.hash);
                }
            }
        });
        if missing.is_some() {
            return Err(Error::NotFound.into());
        }
    }
    Ok(())
}

/// The outcome of blob-set planning: which blob hashes must actually be
/// written as fresh resource bytes this write.
pub struct BlobSetPlan {
    /// Hashes that need a new resource written for them.
    pub needs_write: Vec<Hash>,
}

/// Plans the blob set for a write.
///
/// `existing_hashes` are hashes already backed by a resource in the
/// target container (the APPEND soft filter: kept in the blob table but
/// not rewritten). `external_hashes` are hashes backed by a *different*
/// container (export/streams-ok scenarios); with
/// [`WriteFlags::SKIP_EXTERNAL_WIMS`] set, those are dropped from the
/// write entirely.
pub fn plan_blob_set(
    blob_table: &BlobTable,
    existing_hashes: &HashSet<Hash>,
    external_hashes: &HashSet<Hash>,
    flags: WriteFlags,
) -> BlobSetPlan {
    let mut needs_write = Vec::new();
    for (hash, desc) in blob_table.iter() {
        if desc.out_refcnt == 0 {
            continue;
        }
        if existing_hashes.contains(hash) {
            continue;
        }
        if flags.contains(WriteFlags::SKIP_EXTERNAL_WIMS) && external_hashes.contains(hash) {
            continue;
        }
        needs_write.push(*hash);
    }
    BlobSetPlan { needs_write }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wim_format::blob::BlobHashState;
    use wim_format::{BlobDescriptor, BlobLocation};

    fn blob(hash: Hash, out_refcnt: u64) -> BlobDescriptor {
        BlobDescriptor {
            hash_state: BlobHashState::Known(hash),
            uncompressed_size: 10,
            refcnt: 0,
            out_refcnt,
            location: BlobLocation::InMemoryBuffer(std::sync::Arc::from(vec![0u8; 10])),
        }
    }

    #[test]
    fn skips_unreferenced_and_already_present_blobs() {
        let mut table = BlobTable::new();
        table.insert(blob([1u8; 20], 1));
        table.insert(blob([2u8; 20], 0));
        table.insert(blob([3u8; 20], 2));

        let mut existing = HashSet::new();
        existing.insert([3u8; 20]);

        let plan = plan_blob_set(&table, &existing, &HashSet::new(), WriteFlags::empty());
        assert_eq!(plan.needs_write, vec![[1u8; 20]]);
    }

    #[test]
    fn skip_external_wims_drops_foreign_blobs() {
        let mut table = BlobTable::new();
        table.insert(blob([1u8; 20], 1));
        table.insert(blob([2u8; 20], 1));

        let mut external = HashSet::new();
        external.insert([2u8; 20]);

        let plan = plan_blob_set(&table, &HashSet::new(), &external, WriteFlags::SKIP_EXTERNAL_WIMS);
        assert_eq!(plan.needs_write, vec![[1u8; 20]]);
    }
}
