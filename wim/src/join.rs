//! `join`: reassembling a spanned set's parts into one whole container.
//!
//! A spanned set's blobs are scattered across several physical files, a
//! shape [`crate::container::Wim`] (one `blob_table`/`arena` backed by a
//! single file) cannot represent directly. Join therefore reads each
//! part with `wim-format`'s [`OpenContainer`] directly rather than
//! through [`crate::container::Wim::open`], builds a hash → location map
//! spanning every part, and replays each of part 1's images into a fresh
//! container the same way [`crate::export`] copies one image between
//! containers — just pulling bytes from whichever part actually holds
//! them instead of from one source file.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use sync_file::RandomAccessFile;
use tracing::trace_span;

use wim_format::blob::BlobTableEntry;
use wim_format::{Hash, OpenContainer, ResourceHeader, ResourceReader, ZERO_HASH};

use crate::container::{ensure_blob, Wim};
use crate::error::{Error, Result};
use crate::flags::{OpenFlags, WriteFlags};
use crate::metadata::ImageMetadata;
use crate::progress::ProgressCallback;

type PartFile = RandomAccessFile<File>;

/// Where one blob's bytes live among the joined parts.
struct BlobLoc {
    part_index: usize,
    resource_header: ResourceHeader,
    offset_in_res: u64,
}

/// Rebuilds the `hash -> location` map implied by one part's blob table,
/// grouping solid-resource members by `(part_number, offset_in_wim,
/// size_in_wim)` so a part whose physical offsets happen to collide with
/// another part's never gets merged into the same solid group (mirrors
/// `container::resolve_blob_table`, but keyed across files).
fn resolve_cross_part_locations(entries: &[BlobTableEntry], part_index: usize) -> HashMap<Hash, BlobLoc> {
    let mut map = HashMap::new();
    let mut current_key: Option<(u64, u64)> = None;
    let mut current_header = ResourceHeader::default();
    let mut cumulative = 0u64;

    for entry in entries {
        if entry.is_metadata() {
            continue;
        }
        if entry.resource_header.is_solid() {
            let key = (entry.resource_header.offset_in_wim, entry.resource_header.size_in_wim);
            if current_key != Some(key) {
                current_key = Some(key);
                current_header = entry.resource_header;
                cumulative = 0;
            }
            let offset_in_res = cumulative;
            cumulative += entry.resource_header.uncompressed_size;
            // The resource's physical location is shared by every member
            // of the group, but each entry's own `uncompressed_size` is
            // that one blob's size, not the whole resource's (the
            // convention `split` writes entries under).
            let blob_header = ResourceHeader {
                uncompressed_size: entry.resource_header.uncompressed_size,
                ..current_header
            };
            map.insert(
                entry.hash,
                BlobLoc {
                    part_index,
                    resource_header: blob_header,
                    offset_in_res,
                },
            );
        } else {
            current_key = None;
            map.insert(
                entry.hash,
                BlobLoc {
                    part_index,
                    resource_header: entry.resource_header,
                    offset_in_res: 0,
                },
            );
        }
    }
    map
}

/// Joins the spanned set named by `parts` into a fresh container written
/// to `output`. `parts` may be given in any order; every part must share
/// a GUID and the set of `part_number`s present must be exactly
/// `1..=parts.len()`.
pub fn join(
    parts: &[PathBuf],
    output: impl AsRef<Path>,
    open_flags: OpenFlags,
    write_flags: WriteFlags,
    num_threads: usize,
    progress: impl ProgressCallback,
) -> Result<Wim> {
    let _span = trace_span!("join").entered();
    write_flags.validate()?;

    if parts.is_empty() {
        return Err(Error::SplitInvalid.into());
    }

    struct OpenedPart {
        file: PartFile,
        opened: OpenContainer,
    }

    let mut opened_parts = Vec::with_capacity(parts.len());
    for path in parts {
        let std_file = File::open(path).map_err(Error::Io)?;
        let file = RandomAccessFile::from(std_file);
        let opened = OpenContainer::open(&file).map_err(Error::classify)?;
        if open_flags.contains(OpenFlags::CHECK_INTEGRITY) {
            opened.verify_integrity(&file).map_err(Error::classify)?;
        }
        opened_parts.push(OpenedPart { file, opened });
    }

    let guid = opened_parts[0].opened.header.guid;
    let total_parts = parts.len() as u16;
    let mut by_part_number: Vec<Option<usize>> = vec![None; parts.len()];
    for (i, p) in opened_parts.iter().enumerate() {
        if p.opened.header.guid != guid {
            return Err(Error::SplitInvalid.into());
        }
        let part_number = p.opened.header.part_number;
        if part_number == 0 || part_number > total_parts {
            return Err(Error::SplitInvalid.into());
        }
        let slot = &mut by_part_number[part_number as usize - 1];
        if slot.is_some() {
            return Err(Error::SplitInvalid.into());
        }
        *slot = Some(i);
    }
    let by_part_number: Vec<usize> = by_part_number.into_iter().collect::<Option<Vec<_>>>().ok_or(Error::SplitInvalid)?;

    let part1 = &opened_parts[by_part_number[0]];

    let mut hash_locations: HashMap<Hash, BlobLoc> = HashMap::new();
    for &part_index in &by_part_number {
        let locs = resolve_cross_part_locations(&opened_parts[part_index].opened.blob_table_entries, part_index);
        for (hash, loc) in locs {
            hash_locations.entry(hash).or_insert(loc);
        }
    }

    let mut dst = Wim::create(part1.opened.header.compression_type());
    dst.header.guid = guid;
    dst.header.boot_index = part1.opened.header.boot_index;
    dst.xml.total_bytes = part1.opened.xml.total_bytes;

    for entry in part1.opened.blob_table_entries.iter().filter(|e| e.is_metadata()) {
        let reader = ResourceReader::open(
            &part1.file,
            entry.resource_header,
            part1.opened.header.compression_type(),
            part1.opened.header.chunk_size,
        )
        .map_err(Error::classify)?;
        let bytes = reader.read_all().map_err(Error::classify)?;
        let image = ImageMetadata::parse(&bytes)?;

        let mut hashes = Vec::new();
        image.iterate(|_path, dentry| {
            for stream in &dentry.streams {
                if stream.hash != ZERO_HASH {
                    hashes.push(stream.hash);
                }
            }
        });

        for hash in hashes {
            if dst.blob_table.contains(&hash) {
                continue;
            }
            let loc = hash_locations.get(&hash).ok_or(Error::NotFound)?;
            let part = &opened_parts[loc.part_index];
            let reader = ResourceReader::open(
                &part.file,
                loc.resource_header,
                part.opened.header.compression_type(),
                part.opened.header.chunk_size,
            )
            .map_err(Error::classify)?;
            let bytes = reader
                .read_and_verify_blob(loc.offset_in_res, loc.resource_header.uncompressed_size, hash)
                .map_err(Error::classify)?;
            ensure_blob(&mut dst.blob_table, hash, bytes);
        }

        dst.images.push(image);
    }
    dst.xml.images = part1.opened.xml.images.clone();
    dst.dirty = true;

    dst.write(output, write_flags, num_threads, progress)?;
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ImageSelector;
    use crate::progress::NullProgress;
    use crate::scanner::MemoryScanner;
    use wim_format::CompressionType;

    #[test]
    fn rejects_an_empty_part_list() {
        let dir = tempfile::tempdir().unwrap();
        let result = join(&[], dir.path().join("out.wim"), OpenFlags::WRITE_ACCESS, WriteFlags::empty(), 1, NullProgress);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_parts_with_mismatched_guids() {
        let dir = tempfile::tempdir().unwrap();
        let path_a = dir.path().join("a.wim");
        let path_b = dir.path().join("b.wim");

        let mut wim_a = Wim::create(CompressionType::Lzx);
        let mut scanner = MemoryScanner::new().add_file("a.txt", b"one".to_vec());
        wim_a.add_image(&mut scanner, Some("a".into()), &Default::default(), NullProgress).unwrap();
        wim_a.write(&path_a, WriteFlags::empty(), 1, NullProgress).unwrap();

        let mut wim_b = Wim::create(CompressionType::Lzx);
        let mut scanner = MemoryScanner::new().add_file("b.txt", b"two".to_vec());
        wim_b.add_image(&mut scanner, Some("b".into()), &Default::default(), NullProgress).unwrap();
        wim_b.write(&path_b, WriteFlags::empty(), 1, NullProgress).unwrap();

        let out = dir.path().join("joined.wim");
        let result = join(&[path_a, path_b], out, OpenFlags::WRITE_ACCESS, WriteFlags::empty(), 1, NullProgress);
        assert!(matches!(result, Err(e) if matches!(e.downcast_ref::<Error>(), Some(Error::SplitInvalid))));
    }

    #[test]
    fn joins_a_single_part_back_into_an_equivalent_container() {
        let dir = tempfile::tempdir().unwrap();
        let src_path = dir.path().join("src.wim");

        let mut wim = Wim::create(CompressionType::Lzx);
        let mut scanner = MemoryScanner::new().add_file("a.txt", b"hello join".to_vec());
        wim.add_image(&mut scanner, Some("one".into()), &Default::default(), NullProgress).unwrap();
        wim.write(&src_path, WriteFlags::empty(), 1, NullProgress).unwrap();

        let out_path = dir.path().join("out.wim");
        let joined = join(&[src_path], &out_path, OpenFlags::WRITE_ACCESS, WriteFlags::empty(), 1, NullProgress).unwrap();
        assert_eq!(joined.image_count(), 1);

        let reopened = Wim::open(&out_path, OpenFlags::WRITE_ACCESS).unwrap();
        let image = reopened.image(&ImageSelector::Index(1)).unwrap();
        assert!(image.lookup(&["a.txt".to_string()]).is_some());
    }
}
