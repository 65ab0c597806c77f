//! `export_image`: copying one image from a source container to a
//! destination container.
//!
//! The destination keeps its own blob table; only blobs the exported
//! image actually references (and that the destination does not already
//! have, by hash) are materialized and interned. Recompression, if any,
//! happens later at [`crate::Wim::write`]/`overwrite` time like any other
//! freshly interned blob — this module never decides a compression format
//! itself.

use tracing::trace_span;

use wim_format::ZERO_HASH;

use crate::container::{ensure_blob, ImageSelector, Wim};
use crate::error::{Error, Result};
use crate::flags::WriteFlags;

/// Copies image `src_selector` from `src` into `dst`, giving it `name` and
/// `description`. Returns the new image's 1-based index in `dst`.
///
/// Every blob the image references is copied into `dst`'s blob table by
/// content hash; a blob `dst` already holds (from a previous export or
/// capture) is referenced, not duplicated, so exporting the same image
/// twice into the same destination does not grow its blob set the second
/// time. [`WriteFlags::SKIP_EXTERNAL_WIMS`] has no effect here — it only
/// governs what a later write of `dst` keeps.
pub fn export_image(
    src: &Wim,
    src_selector: &ImageSelector,
    dst: &mut Wim,
    name: Option<String>,
    description: Option<String>,
    _flags: WriteFlags,
) -> Result<u32> {
    let _span = trace_span!("export_image").entered();

    if let Some(name) = &name {
        if dst.xml.images.iter().any(|i| i.name.as_deref() == Some(name.as_str())) {
            return Err(Error::ImageNameCollision.into());
        }
    }

    let image = src.image(src_selector)?.clone();
    let src_xml = src.image_xml(src_selector)?.clone();

    let src_file = src
        .file
        .as_ref()
        .ok_or_else(|| Error::InvalidParam("source container has no backing file to export blobs from".into()))?;

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
        let bytes = src.read_blob(hash, src_file)?;
        ensure_blob(&mut dst.blob_table, hash, bytes);
    }

    let index = dst.images.len() as u32 + 1;
    dst.images.push(image);
    dst.xml.images.push(wim_format::xml::ImageXmlInfo {
        index,
        name,
        description,
        display_name: src_xml.display_name,
        dir_count: src_xml.dir_count,
        file_count: src_xml.file_count,
        total_bytes: src_xml.total_bytes,
        hard_link_bytes: src_xml.hard_link_bytes,
        creation_time: src_xml.creation_time,
        last_modification_time: src_xml.last_modification_time,
    });
    dst.dirty = true;

    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::OpenFlags;
    use crate::progress::NullProgress;
    use crate::scanner::MemoryScanner;
    use wim_format::CompressionType;

    fn wim_with_one_file(path: &std::path::Path, contents: &[u8]) -> Wim {
        let mut wim = Wim::create(CompressionType::Lzx);
        let mut scanner = MemoryScanner::new().add_file("a.txt", contents.to_vec());
        wim.add_image(&mut scanner, Some("first".into()), &Default::default(), NullProgress).unwrap();
        wim.write(path, WriteFlags::empty(), 1, NullProgress).unwrap();
        Wim::open(path, OpenFlags::WRITE_ACCESS).unwrap()
    }

    #[test]
    fn exports_an_image_and_its_blobs_into_a_fresh_container() {
        let dir = tempfile::tempdir().unwrap();
        let src_path = dir.path().join("src.wim");
        let src = wim_with_one_file(&src_path, b"hello export");

        let mut dst = Wim::create(CompressionType::Xpress);
        let new_index = export_image(&src, &ImageSelector::Index(1), &mut dst, Some("copied".into()), None, WriteFlags::empty()).unwrap();
        assert_eq!(new_index, 1);
        assert_eq!(dst.image_count(), 1);

        let image = dst.image(&ImageSelector::Index(1)).unwrap();
        let file = image.lookup(&["a.txt".to_string()]).unwrap();
        assert_eq!(dst.blob_table.get(&file.unnamed_stream_hash()).unwrap().uncompressed_size, 12);
    }

    #[test]
    fn re_exporting_into_the_same_destination_does_not_duplicate_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let src_path = dir.path().join("src.wim");
        let src = wim_with_one_file(&src_path, b"idempotent");

        let mut dst = Wim::create(CompressionType::Lzx);
        export_image(&src, &ImageSelector::Index(1), &mut dst, Some("one".into()), None, WriteFlags::empty()).unwrap();
        let blob_count_after_first = dst.blob_table.len();
        export_image(&src, &ImageSelector::Index(1), &mut dst, Some("two".into()), None, WriteFlags::empty()).unwrap();

        assert_eq!(dst.blob_table.len(), blob_count_after_first);
        assert_eq!(dst.image_count(), 2);
    }

    #[test]
    fn rejects_a_colliding_image_name() {
        let dir = tempfile::tempdir().unwrap();
        let src_path = dir.path().join("src.wim");
        let src = wim_with_one_file(&src_path, b"name collision");

        let mut dst = Wim::create(CompressionType::Lzx);
        export_image(&src, &ImageSelector::Index(1), &mut dst, Some("dup".into()), None, WriteFlags::empty()).unwrap();
        let result = export_image(&src, &ImageSelector::Index(1), &mut dst, Some("dup".into()), None, WriteFlags::empty());
        assert!(result.is_err());
    }
}
