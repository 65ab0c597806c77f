//! End-to-end scenarios driven entirely through the crate's public API.

use std::fs;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};

use wim::{CompressionType, ImageSelector, MemoryScanner, NullProgress, OpenFlags, Wim, WriteFlags};

fn sha1(data: &[u8]) -> wim_format::Hash {
    wim_format::sha1_hash(data)
}

/// Deterministic, effectively-incompressible filler: repeated SHA-1
/// chaining rather than a fixed byte, so a compressor can't shrink it well
/// below `len` (needed to force a multi-part split in scenario 4).
fn incompressible_bytes(len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut block = sha1(b"wim end-to-end seed");
    while out.len() < len {
        block = sha1(&block);
        out.extend_from_slice(&block);
    }
    out.truncate(len);
    out
}

/// Scenario 1: create an empty LZX container, add image "A" from
/// `{/readme.txt="hello\n"}`, write to a file, reopen and check the tree.
#[test]
fn scenario_1_create_add_image_write_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("x.wim");

    let mut wim = Wim::create(CompressionType::Lzx);
    let mut scanner = MemoryScanner::new().add_file("readme.txt", b"hello\n".to_vec());
    wim.add_image(&mut scanner, Some("A".into()), &Default::default(), NullProgress).unwrap();
    wim.write(&path, WriteFlags::empty(), 1, NullProgress).unwrap();

    let reopened = Wim::open(&path, OpenFlags::WRITE_ACCESS).unwrap();
    assert_eq!(reopened.image_count(), 1);
    assert_eq!(reopened.image_xml(&ImageSelector::Index(1)).unwrap().name.as_deref(), Some("A"));

    let image = reopened.image(&ImageSelector::Index(1)).unwrap();
    assert_eq!(image.root.children.len(), 1);
    let readme = image.lookup(&["readme.txt".to_string()]).unwrap();
    assert_eq!(readme.unnamed_stream_hash(), sha1(b"hello\n"));

    let extract_dir = dir.path().join("extracted");
    reopened.extract_image(&ImageSelector::Index(1), &extract_dir, NullProgress).unwrap();
    let contents = fs::read(extract_dir.join("readme.txt")).unwrap();
    assert_eq!(contents, b"hello\n");
    assert_eq!(contents.len(), 6);
}

/// Scenario 2: export image 1 of `x.wim` into a fresh XPRESS container with
/// `recompress`; same blob hash, different resource compression.
#[test]
fn scenario_2_export_with_recompress() {
    let dir = tempfile::tempdir().unwrap();
    let x_path = dir.path().join("x.wim");

    let mut x = Wim::create(CompressionType::Lzx);
    let mut scanner = MemoryScanner::new().add_file("readme.txt", b"hello\n".to_vec());
    x.add_image(&mut scanner, Some("A".into()), &Default::default(), NullProgress).unwrap();
    x.write(&x_path, WriteFlags::empty(), 1, NullProgress).unwrap();

    let x = Wim::open(&x_path, OpenFlags::WRITE_ACCESS).unwrap();
    let mut y = Wim::create(CompressionType::Xpress);
    let new_index =
        wim::export::export_image(&x, &ImageSelector::Index(1), &mut y, Some("A".into()), None, WriteFlags::RECOMPRESS).unwrap();
    assert_eq!(new_index, 1);

    let y_path = dir.path().join("y.wim");
    y.write(&y_path, WriteFlags::RECOMPRESS, 1, NullProgress).unwrap();

    let y = Wim::open(&y_path, OpenFlags::WRITE_ACCESS).unwrap();
    assert_eq!(y.image_count(), 1);
    assert_eq!(y.compression_type(), CompressionType::Xpress);

    let image = y.image(&ImageSelector::Index(1)).unwrap();
    let readme = image.lookup(&["readme.txt".to_string()]).unwrap();
    assert_eq!(readme.unnamed_stream_hash(), sha1(b"hello\n"));
}

/// Scenario 3: append image "B" (sharing `readme.txt`'s contents) and
/// overwrite in place; the blob pool dedups down to two blobs.
#[test]
fn scenario_3_append_and_overwrite_dedups_blobs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("x.wim");

    let mut wim = Wim::create(CompressionType::Lzx);
    let mut scanner = MemoryScanner::new().add_file("readme.txt", b"hello\n".to_vec());
    wim.add_image(&mut scanner, Some("A".into()), &Default::default(), NullProgress).unwrap();
    wim.write(&path, WriteFlags::empty(), 1, NullProgress).unwrap();

    let size_before = fs::metadata(&path).unwrap().len();

    let mut wim = Wim::open(&path, OpenFlags::WRITE_ACCESS).unwrap();
    let mut scanner = MemoryScanner::new().add_file("readme.txt", b"hello\n".to_vec()).add_file("notes.txt", b"hi\n".to_vec());
    wim.add_image(&mut scanner, Some("B".into()), &Default::default(), NullProgress).unwrap();
    wim.overwrite(WriteFlags::empty(), 1, NullProgress).unwrap();

    let size_after = fs::metadata(&path).unwrap().len();
    assert!(size_after > size_before, "file should grow after appending a second image");

    let reopened = Wim::open(&path, OpenFlags::WRITE_ACCESS).unwrap();
    assert_eq!(reopened.image_count(), 2);

    let mut hashes = std::collections::HashSet::new();
    for idx in [1u32, 2] {
        let image = reopened.image(&ImageSelector::Index(idx)).unwrap();
        image.iterate(|_path, dentry| {
            if dentry.unnamed_stream_hash() != wim_format::ZERO_HASH {
                hashes.insert(dentry.unnamed_stream_hash());
            }
        });
    }
    assert_eq!(hashes.len(), 2, "readme.txt's blob should be shared between both images");
}

/// Scenario 4: split a container whose XML/metadata already exceeds 4 KiB,
/// then join the parts back into an equivalent container.
#[test]
fn scenario_4_split_then_join_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("x.wim");

    let mut wim = Wim::create(CompressionType::Lzx);
    let mut scanner = MemoryScanner::new()
        .add_file("readme.txt", b"hello\n".to_vec())
        .add_file("big.bin", incompressible_bytes(20_000));
    wim.add_image(&mut scanner, Some("A".into()), &Default::default(), NullProgress).unwrap();
    wim.write(&path, WriteFlags::empty(), 1, NullProgress).unwrap();

    let opened = Wim::open(&path, OpenFlags::WRITE_ACCESS).unwrap();
    let base = dir.path().join("x");
    let parts = wim::split::split(&opened, base.to_str().unwrap(), 4096, WriteFlags::empty(), NullProgress).unwrap();
    assert!(parts.len() >= 2);

    let joined_path = dir.path().join("rejoined.wim");
    let joined = wim::join::join(&parts, &joined_path, OpenFlags::WRITE_ACCESS, WriteFlags::empty(), 1, NullProgress).unwrap();

    assert_eq!(joined.image_count(), opened.image_count());
    let joined_image = joined.image(&ImageSelector::Index(1)).unwrap();
    let original_image = opened.image(&ImageSelector::Index(1)).unwrap();
    assert_eq!(
        joined_image.lookup(&["readme.txt".to_string()]).unwrap().unnamed_stream_hash(),
        original_image.lookup(&["readme.txt".to_string()]).unwrap().unnamed_stream_hash(),
    );
    assert_eq!(
        joined_image.lookup(&["big.bin".to_string()]).unwrap().unnamed_stream_hash(),
        original_image.lookup(&["big.bin".to_string()]).unwrap().unnamed_stream_hash(),
    );
}

/// Scenario 5: an LZMS-solid resource's blobs, once extracted, still hash
/// to the values recorded in their dentries.
#[test]
fn scenario_5_lzms_solid_blobs_rehash_correctly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("solid.wim");

    let mut wim = Wim::create(CompressionType::Lzms);
    let mut scanner = MemoryScanner::new()
        .add_file("a.txt", vec![b'a'; 4000])
        .add_file("b.txt", vec![b'b'; 4000])
        .add_file("c.txt", b"small".to_vec());
    wim.add_image(&mut scanner, Some("solid".into()), &Default::default(), NullProgress).unwrap();
    wim.write(&path, WriteFlags::SOLID, 1, NullProgress).unwrap();

    let reopened = Wim::open(&path, OpenFlags::WRITE_ACCESS).unwrap();
    let extract_dir = dir.path().join("extracted");
    reopened.extract_image(&ImageSelector::Index(1), &extract_dir, NullProgress).unwrap();

    let image = reopened.image(&ImageSelector::Index(1)).unwrap();
    for (name, expected) in [("a.txt", vec![b'a'; 4000]), ("b.txt", vec![b'b'; 4000]), ("c.txt", b"small".to_vec())] {
        let dentry = image.lookup(&[name.to_string()]).unwrap();
        let on_disk = fs::read(extract_dir.join(name)).unwrap();
        assert_eq!(on_disk, expected);
        assert_eq!(dentry.unnamed_stream_hash(), sha1(&on_disk));
    }
}

/// Scenario 6: a flipped byte in the blob-data region trips
/// `check-integrity` on open, and trips a hash/decompression error on a
/// later read even when opened without that flag.
#[test]
fn scenario_6_corrupt_integrity_table_detected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("x.wim");

    let mut wim = Wim::create(CompressionType::None);
    let mut scanner = MemoryScanner::new().add_file("readme.txt", vec![b'x'; 4096]);
    wim.add_image(&mut scanner, Some("A".into()), &Default::default(), NullProgress).unwrap();
    wim.write(&path, WriteFlags::CHECK_INTEGRITY, 1, NullProgress).unwrap();

    // Blob data for a freshly rebuilt container starts immediately after
    // the 208-byte header; flip one byte well inside it.
    {
        let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(208 + 10)).unwrap();
        let mut byte = [0u8; 1];
        file.read_exact(&mut byte).unwrap();
        byte[0] ^= 0xff;
        file.seek(SeekFrom::Start(208 + 10)).unwrap();
        file.write_all(&byte).unwrap();
    }

    let checked = Wim::open(&path, OpenFlags::WRITE_ACCESS | OpenFlags::CHECK_INTEGRITY);
    assert!(checked.is_err(), "check-integrity open must reject a container with a flipped data byte");

    let unchecked = Wim::open(&path, OpenFlags::WRITE_ACCESS).unwrap();
    let extract_dir = dir.path().join("extracted");
    let result = unchecked.extract_image(&ImageSelector::Index(1), &extract_dir, NullProgress);
    assert!(result.is_err(), "reading the damaged resource must surface a hash or decompression error");
}
