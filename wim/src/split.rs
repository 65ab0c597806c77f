//! `split`: partitioning an already-written container's resources across
//! several part files.
//!
//! Split moves whole physical resources, never individual blobs: each
//! still-referenced resource in the source arena (a non-solid blob's own
//! resource, or an entire solid resource together with every blob packed
//! into it) is raw-copied intact into whichever part it lands in, so a
//! blob can never straddle a part boundary even though the partitioning
//! loop only reasons about resources. Metadata resources aren't kept as
//! raw [`ResourceHeader`]s once a container is open (opening decodes them
//! into [`ImageMetadata`] trees), so part 1's metadata is rebuilt by
//! re-serializing and re-compressing each image, the same way
//! [`crate::write`]'s rebuild path does.

use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use sync_file::RandomAccessFile;
use tracing::trace_span;

use wim_format::blob::BlobTableEntry;
use wim_format::container::finalize_write;
use wim_format::reader::raw_copy_resource;
use wim_format::writer::{compress_simple_resource, write_resource};
use wim_format::{BlobLocation, Hash, ResourceHeader, WimFlags, WimHeader};

use crate::container::Wim;
use crate::error::{Error, Result};
use crate::flags::WriteFlags;
use crate::progress::{ProgressCallback, ProgressMsg};

const HEADER_SIZE: u64 = 208;

/// Part-file naming: `{base_name}.swm`, `{base_name}2.swm`, `{base_name}3.swm`, ...
fn part_path(base_name: &str, part_number: u16) -> PathBuf {
    if part_number == 1 {
        PathBuf::from(format!("{base_name}.swm"))
    } else {
        PathBuf::from(format!("{base_name}{part_number}.swm"))
    }
}

/// One blob packed into some resource still referenced by `src`'s images.
struct LiveBlob {
    hash: Hash,
    ref_count: u64,
    size: u64,
    offset_in_res: u64,
}

/// Splits `src` into part files of at most `part_size` bytes of resource
/// data each. Best-effort: a single blob larger than `part_size` still
/// gets a whole part to itself. Returns the resulting part paths in
/// part-number order; part 1 always carries every image's metadata
/// resource.
pub fn split(
    src: &Wim,
    base_name: &str,
    part_size: u64,
    flags: WriteFlags,
    mut progress: impl ProgressCallback,
) -> Result<Vec<PathBuf>> {
    let _span = trace_span!("split").entered();
    flags.validate()?;

    if part_size == 0 {
        return Err(Error::InvalidParam("split requires a nonzero part_size".into()).into());
    }
    let src_file = src
        .file
        .as_ref()
        .ok_or_else(|| Error::InvalidParam("split requires a container opened from a file".into()))?;

    // Group every still-referenced blob by the arena resource it lives in,
    // preserving each blob's offset within that resource so solid groups
    // can be re-emitted in the order `container::resolve_blob_table`
    // expects to reconstruct on the next open.
    let mut by_resource: HashMap<usize, Vec<LiveBlob>> = HashMap::new();
    for (hash, desc) in src.blob_table.iter() {
        if desc.refcnt == 0 {
            continue;
        }
        if let BlobLocation::InWim { resource, offset_in_res } = desc.location {
            by_resource.entry(resource).or_default().push(LiveBlob {
                hash: *hash,
                ref_count: desc.refcnt,
                size: desc.uncompressed_size,
                offset_in_res,
            });
        }
    }
    for blobs in by_resource.values_mut() {
        blobs.sort_by_key(|b| b.offset_in_res);
    }

    let live: HashSet<usize> = by_resource.keys().copied().collect();
    let ordered_resources: Vec<usize> = (0..src.arena.len()).filter(|i| live.contains(i)).collect();

    let mut resource_parts: Vec<Vec<usize>> = vec![Vec::new()];
    let mut cur_size = 0u64;
    for &res_idx in &ordered_resources {
        let size = src.arena[res_idx].header.size_in_wim;
        if !resource_parts.last().unwrap().is_empty() && cur_size + size > part_size {
            resource_parts.push(Vec::new());
            cur_size = 0;
        }
        resource_parts.last_mut().unwrap().push(res_idx);
        cur_size += size;
    }
    let num_parts = resource_parts.len() as u16;

    let compression = src.header.compression_type();
    let pipable = src.header.pipable;
    let mut part_paths = Vec::with_capacity(num_parts as usize);
    let mut global_entries: Vec<BlobTableEntry> = Vec::new();
    let mut opened_parts: Vec<(RandomAccessFile<std::fs::File>, WimHeader, u64)> = Vec::with_capacity(num_parts as usize);

    for (p, resources) in resource_parts.iter().enumerate() {
        let part_number = (p + 1) as u16;
        progress.on_progress(&ProgressMsg::SplitBeginPart { part_number: part_number as u32 });

        let path = part_path(base_name, part_number);
        let std_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(Error::Io)?;
        let file = RandomAccessFile::from(std_file);

        let mut header = src.header.clone();
        header.part_number = part_number;
        header.total_parts = num_parts;
        header.flags.insert(WimFlags::SPANNED);

        let mut offset = HEADER_SIZE;

        if part_number == 1 {
            for image in &src.images {
                let bytes = image.serialize();
                let hash = wim_format::sha1_hash(&bytes);
                let compressed = compress_simple_resource(&bytes, compression, src.header.chunk_size, true, pipable);
                let resource_header = write_resource(&file, offset, &compressed).map_err(Error::classify)?;
                offset += compressed.bytes.len() as u64;
                global_entries.push(BlobTableEntry {
                    resource_header,
                    part_number: 1,
                    ref_count: 1,
                    hash,
                });
            }
        }

        for &res_idx in resources {
            let old_header = src.arena[res_idx].header;
            raw_copy_resource(src_file, &old_header, &file, offset).map_err(Error::classify)?;
            let new_header = ResourceHeader {
                offset_in_wim: offset,
                size_in_wim: old_header.size_in_wim,
                uncompressed_size: old_header.uncompressed_size,
                flags: old_header.flags,
            };
            offset += new_header.size_in_wim;

            for blob in &by_resource[&res_idx] {
                let resource_header = if new_header.is_solid() {
                    ResourceHeader {
                        uncompressed_size: blob.size,
                        ..new_header
                    }
                } else {
                    new_header
                };
                global_entries.push(BlobTableEntry {
                    resource_header,
                    part_number,
                    ref_count: blob.ref_count as u32,
                    hash: blob.hash,
                });
            }
        }

        opened_parts.push((file, header, offset));
        part_paths.push(path);
        progress.on_progress(&ProgressMsg::SplitEndPart { part_number: part_number as u32 });
    }

    global_entries.sort_by_key(|e| (e.part_number, e.resource_header.offset_in_wim));

    let write_integrity = flags.contains(WriteFlags::CHECK_INTEGRITY) || src.header.integrity.uncompressed_size > 0;
    let total_bytes: u64 = opened_parts.iter().map(|(_, _, end)| *end).sum();
    let mut xml = src.xml.clone();
    xml.total_bytes = total_bytes;

    for (file, mut header, data_end) in opened_parts {
        finalize_write(&file, &mut header, &global_entries, &xml, data_end, write_integrity).map_err(Error::classify)?;
    }

    Ok(part_paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ImageSelector;
    use crate::flags::OpenFlags;
    use crate::join::join;
    use crate::progress::NullProgress;
    use crate::scanner::MemoryScanner;
    use wim_format::CompressionType;

    #[test]
    fn splits_and_rejoins_a_multi_image_container() {
        let dir = tempfile::tempdir().unwrap();
        let src_path = dir.path().join("whole.wim");

        let mut wim = Wim::create(CompressionType::Lzx);
        let mut scanner1 = MemoryScanner::new().add_file("a.txt", vec![b'a'; 9000]).add_file("b.txt", vec![b'b'; 200]);
        wim.add_image(&mut scanner1, Some("first".into()), &Default::default(), NullProgress).unwrap();
        let mut scanner2 = MemoryScanner::new().add_file("c.txt", vec![b'c'; 9000]);
        wim.add_image(&mut scanner2, Some("second".into()), &Default::default(), NullProgress).unwrap();
        wim.write(&src_path, WriteFlags::empty(), 1, NullProgress).unwrap();

        let opened = Wim::open(&src_path, OpenFlags::WRITE_ACCESS).unwrap();
        let base = dir.path().join("whole");
        let parts = split(&opened, base.to_str().unwrap(), 4096, WriteFlags::empty(), NullProgress).unwrap();
        assert!(parts.len() >= 2, "expected at least two parts for a >4KiB container split at 4096");

        let joined_path = dir.path().join("rejoined.wim");
        let joined = join(&parts, &joined_path, OpenFlags::WRITE_ACCESS, WriteFlags::empty(), 1, NullProgress).unwrap();
        assert_eq!(joined.image_count(), 2);

        let first = joined.image(&ImageSelector::Index(1)).unwrap();
        assert_eq!(first.lookup(&["a.txt".to_string()]).unwrap().streams[0].hash, opened.image(&ImageSelector::Index(1)).unwrap().lookup(&["a.txt".to_string()]).unwrap().streams[0].hash);
    }

    #[test]
    fn rejects_a_zero_part_size() {
        let wim = Wim::create(CompressionType::Lzx);
        let result = split(&wim, "x", 0, WriteFlags::empty(), NullProgress);
        assert!(result.is_err());
    }
}
