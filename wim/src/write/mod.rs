//! The write orchestrator: blob-set planning, strategy
//! selection (append / rebuild-via-temp-file / in-place compaction),
//! chunk-parallel resource assembly, and the final header/blob-table/XML
//! commit sequence.
//!
//! Every resource this module assembles goes through
//! [`crate::compressor::ChunkCompressor`] rather than calling
//! `wim_format`'s serial `compress_simple_resource`/`compress_solid_resource`
//! directly, so the chunk compressor stays the sole source of CPU
//! parallelism in the write path.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use sync_file::{RandomAccessFile, ReadAt, WriteAt};
use zerocopy::AsBytes;

use wim_format::blob::BlobTableEntry;
use wim_format::chunk_table::{ChunkTable, RawSolidHeader};
use wim_format::container::finalize_write;
use wim_format::pipable::RawPipableChunkHeader;
use wim_format::reader::{can_raw_copy, raw_copy_resource};
use wim_format::resource::SolidBlobEntry;
use wim_format::writer::{write_resource, CompressedResource, CompressedSolidResource, SolidBlobInput};
use wim_format::{BlobDescriptor, BlobLocation, CompressionType, Hash, ResourceFlags, ResourceHeader};

use crate::blob_set::{compute_out_refcounts, plan_blob_set};
use crate::compressor::{make_compressor, ChunkCompressor};
use crate::container::{existing_hashes, ArenaEntry, Wim, WimFile};
use crate::error::{Error, Result};
use crate::flags::WriteFlags;
use crate::lock::ExclusiveLock;
use crate::metadata::ImageMetadata;
use crate::progress::{ProgressCallback, ProgressMsg};

const HEADER_SIZE: u64 = 208;

fn read_fresh_blob_bytes(desc: &BlobDescriptor) -> Result<Vec<u8>> {
    match &desc.location {
        BlobLocation::InMemoryBuffer(b) => Ok(b.to_vec()),
        BlobLocation::OnDiskFile(p) => std::fs::read(p).map_err(|e| Error::Io(e).into()),
        BlobLocation::InStagingFile { path, offset } => {
            use std::io::{Read, Seek, SeekFrom};
            let mut f = File::open(path).map_err(Error::Io)?;
            f.seek(SeekFrom::Start(*offset)).map_err(Error::Io)?;
            let mut buf = vec![0u8; desc.uncompressed_size as usize];
            f.read_exact(&mut buf).map_err(Error::Io)?;
            Ok(buf)
        }
        BlobLocation::InAttachedBuffer(src) => src.read_all().map_err(|e| Error::Io(e).into()),
        BlobLocation::InWim { .. } => Err(Error::InvalidParam("a blob already in a WIM resource needs its source container's arena to be read".into()).into()),
    }
}

/// Reads a blob's bytes wherever they currently live: from the old
/// container's own resources (via `old_arena` + `source`) if already
/// written, or from whatever fresh source the scanner attached otherwise.
fn materialize_blob_bytes(
    hash: Hash,
    desc: &BlobDescriptor,
    old_arena: &[ArenaEntry],
    source: Option<&WimFile>,
    compression: CompressionType,
    chunk_size: u32,
) -> Result<Vec<u8>> {
    match &desc.location {
        BlobLocation::InWim { resource, offset_in_res } => {
            let file = source.ok_or_else(|| Error::InvalidParam("need the original file to read an already-written blob".into()))?;
            let header = old_arena.get(*resource).ok_or(Error::NotFound)?.header;
            let reader = wim_format::ResourceReader::open(file, header, compression, chunk_size).map_err(Error::classify)?;
            reader.read_and_verify_blob(*offset_in_res, desc.uncompressed_size, hash).map_err(Error::classify)
        }
        _ => read_fresh_blob_bytes(desc),
    }
}

fn compress_simple_resource_parallel(
    data: &[u8],
    compression: CompressionType,
    chunk_size: u32,
    is_metadata: bool,
    pipable: bool,
    compressor: &mut dyn ChunkCompressor,
) -> CompressedResource {
    let mut flags = ResourceFlags::empty();
    if is_metadata {
        flags |= ResourceFlags::METADATA;
    }

    if !compression.is_compressed() || data.is_empty() {
        return CompressedResource {
            bytes: data.to_vec(),
            uncompressed_size: data.len() as u64,
            flags,
        };
    }

    for chunk in data.chunks(chunk_size.max(1) as usize) {
        compressor.submit(chunk.to_vec());
    }
    let compressed_chunks = compressor.finish();
    let chunk_sizes: Vec<u64> = compressed_chunks.iter().map(|c| c.data.len() as u64).collect();
    let table = ChunkTable::from_chunk_sizes(&chunk_sizes);

    let bytes = if pipable {
        let mut bytes = Vec::new();
        for c in &compressed_chunks {
            bytes.extend_from_slice(RawPipableChunkHeader::new(c.data.len() as u32).as_bytes());
            bytes.extend_from_slice(&c.data);
        }
        bytes.extend_from_slice(&table.serialize(data.len() as u64));
        bytes
    } else {
        let mut bytes = table.serialize(data.len() as u64);
        for c in &compressed_chunks {
            bytes.extend_from_slice(&c.data);
        }
        bytes
    };

    if bytes.len() >= data.len() {
        return CompressedResource {
            bytes: data.to_vec(),
            uncompressed_size: data.len() as u64,
            flags,
        };
    }

    flags |= ResourceFlags::COMPRESSED;
    CompressedResource {
        bytes,
        uncompressed_size: data.len() as u64,
        flags,
    }
}

fn compress_solid_resource_parallel(
    blobs: &[SolidBlobInput<'_>],
    compression: CompressionType,
    chunk_size: u32,
    pipable: bool,
    compressor: &mut dyn ChunkCompressor,
) -> CompressedSolidResource {
    let mut concatenated = Vec::new();
    let mut blob_entries = Vec::with_capacity(blobs.len());
    for blob in blobs {
        let offset_in_res = concatenated.len() as u64;
        concatenated.extend_from_slice(blob.data);
        blob_entries.push(SolidBlobEntry {
            hash: blob.hash,
            offset_in_res,
            size: blob.data.len() as u64,
        });
    }

    let uncompressed_size = concatenated.len() as u64;
    for chunk in concatenated.chunks(chunk_size.max(1) as usize) {
        compressor.submit(chunk.to_vec());
    }
    let compressed_chunks = compressor.finish();
    let chunk_sizes: Vec<u64> = compressed_chunks.iter().map(|c| c.data.len() as u64).collect();
    let table = ChunkTable::from_chunk_sizes(&chunk_sizes);
    let solid_header = RawSolidHeader::new(uncompressed_size, chunk_size, compression);

    let bytes = if pipable {
        let mut bytes = Vec::new();
        for c in &compressed_chunks {
            bytes.extend_from_slice(RawPipableChunkHeader::new(c.data.len() as u32).as_bytes());
            bytes.extend_from_slice(&c.data);
        }
        bytes.extend_from_slice(solid_header.as_bytes());
        bytes.extend_from_slice(&table.serialize_solid(uncompressed_size));
        bytes
    } else {
        let mut bytes = solid_header.as_bytes().to_vec();
        bytes.extend_from_slice(&table.serialize_solid(uncompressed_size));
        for c in &compressed_chunks {
            bytes.extend_from_slice(&c.data);
        }
        bytes
    };

    CompressedSolidResource {
        resource: CompressedResource {
            bytes,
            uncompressed_size,
            flags: ResourceFlags::COMPRESSED | ResourceFlags::SOLID,
        },
        blob_entries,
    }
}

/// Context needed to attempt a raw copy of a blob's backing resource
/// instead of decompressing and recompressing it: the container's
/// previous resource arena and file, plus the compression parameters
/// that arena was written with.
struct RawCopySource<'a> {
    arena: &'a [ArenaEntry],
    file: &'a WimFile,
    compression: CompressionType,
    chunk_size: u32,
    pipable: bool,
    recompress_requested: bool,
}

#[allow(clippy::too_many_arguments)]
fn write_blobs<W: WriteAt>(
    dest: &W,
    mut offset: u64,
    blob_table: &mut wim_format::BlobTable,
    arena: &mut Vec<ArenaEntry>,
    hashes: &[Hash],
    compression: CompressionType,
    chunk_size: u32,
    solid: bool,
    pipable: bool,
    raw_copy: Option<&RawCopySource<'_>>,
    compressor: &mut dyn ChunkCompressor,
    progress: &mut dyn ProgressCallback,
    fetch: impl Fn(Hash, &BlobDescriptor) -> Result<Vec<u8>>,
) -> Result<u64> {
    if hashes.is_empty() {
        return Ok(offset);
    }

    let total_bytes: u64 = hashes.iter().filter_map(|h| blob_table.get(h)).map(|b| b.uncompressed_size).sum();
    let mut completed = 0u64;

    if solid {
        let mut owned = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let desc = blob_table.get(hash).ok_or(Error::NotFound)?.clone();
            owned.push((*hash, fetch(*hash, &desc)?));
        }
        let inputs: Vec<SolidBlobInput> = owned.iter().map(|(h, d)| SolidBlobInput { hash: *h, data: d }).collect();
        let assembled = compress_solid_resource_parallel(&inputs, compression, chunk_size, pipable, compressor);
        let header = write_resource(dest, offset, &assembled.resource).map_err(Error::classify)?;
        let idx = arena.len();
        arena.push(ArenaEntry { header });
        for entry in &assembled.blob_entries {
            if let Some(b) = blob_table.get_mut(&entry.hash) {
                b.location = BlobLocation::InWim {
                    resource: idx,
                    offset_in_res: entry.offset_in_res,
                };
            }
            completed += entry.size;
            progress.on_progress(&ProgressMsg::WriteStreams {
                completed_bytes: completed,
                total_bytes,
            });
        }
        offset += assembled.resource.bytes.len() as u64;
    } else {
        for hash in hashes {
            let desc = blob_table.get(hash).ok_or(Error::NotFound)?.clone();

            if let Some(raw) = raw_copy {
                if let BlobLocation::InWim { resource, offset_in_res: 0 } = desc.location {
                    if let Some(src_entry) = raw.arena.get(resource) {
                        if !src_entry.header.is_solid()
                            && raw.pipable == pipable
                            && can_raw_copy(raw.compression, raw.chunk_size, compression, chunk_size, raw.recompress_requested, false, 0, 0)
                        {
                            raw_copy_resource(raw.file, &src_entry.header, dest, offset).map_err(Error::classify)?;
                            let header = ResourceHeader {
                                offset_in_wim: offset,
                                size_in_wim: src_entry.header.size_in_wim,
                                uncompressed_size: src_entry.header.uncompressed_size,
                                flags: src_entry.header.flags,
                            };
                            let idx = arena.len();
                            arena.push(ArenaEntry { header });
                            if let Some(b) = blob_table.get_mut(hash) {
                                b.location = BlobLocation::InWim { resource: idx, offset_in_res: 0 };
                            }
                            offset += header.size_in_wim;
                            completed += desc.uncompressed_size;
                            progress.on_progress(&ProgressMsg::WriteStreams {
                                completed_bytes: completed,
                                total_bytes,
                            });
                            continue;
                        }
                    }
                }
            }

            let bytes = fetch(*hash, &desc)?;
            let assembled = compress_simple_resource_parallel(&bytes, compression, chunk_size, false, pipable, compressor);
            let header = write_resource(dest, offset, &assembled).map_err(Error::classify)?;
            let idx = arena.len();
            arena.push(ArenaEntry { header });
            if let Some(b) = blob_table.get_mut(hash) {
                b.location = BlobLocation::InWim { resource: idx, offset_in_res: 0 };
            }
            offset += assembled.bytes.len() as u64;
            completed += bytes.len() as u64;
            progress.on_progress(&ProgressMsg::WriteStreams {
                completed_bytes: completed,
                total_bytes,
            });
        }
    }
    Ok(offset)
}

fn build_metadata_resources<W: WriteAt>(
    dest: &W,
    mut offset: u64,
    images: &[ImageMetadata],
    compression: CompressionType,
    chunk_size: u32,
    pipable: bool,
    compressor: &mut dyn ChunkCompressor,
) -> Result<(Vec<BlobTableEntry>, u64)> {
    let mut entries = Vec::with_capacity(images.len());
    for image in images {
        let bytes = image.serialize();
        let hash = wim_format::sha1_hash(&bytes);
        let compressed = compress_simple_resource_parallel(&bytes, compression, chunk_size, true, pipable, compressor);
        let header = write_resource(dest, offset, &compressed).map_err(Error::classify)?;
        offset += compressed.bytes.len() as u64;
        entries.push(BlobTableEntry {
            resource_header: header,
            part_number: 1,
            ref_count: 1,
            hash,
        });
    }
    Ok((entries, offset))
}

/// Builds the final on-disk blob-table entry list: every still-referenced
/// stream blob, ordered so that solid-resource members stay contiguous and
/// in cumulative-offset order (the convention `container::resolve_blob_table`
/// relies on to reconstruct `offset_in_res` on the next open).
fn finalize_stream_entries(blob_table: &wim_format::BlobTable, arena: &[ArenaEntry]) -> Vec<BlobTableEntry> {
    let mut keyed: Vec<((usize, u64), BlobTableEntry)> = Vec::new();
    for (hash, desc) in blob_table.iter() {
        if desc.out_refcnt == 0 {
            continue;
        }
        let (resource, offset_in_res) = match desc.location {
            BlobLocation::InWim { resource, offset_in_res } => (resource, offset_in_res),
            _ => continue,
        };
        let arena_header = arena[resource].header;
        let resource_header = if arena_header.is_solid() {
            ResourceHeader {
                offset_in_wim: arena_header.offset_in_wim,
                size_in_wim: arena_header.size_in_wim,
                uncompressed_size: desc.uncompressed_size,
                flags: arena_header.flags,
            }
        } else {
            arena_header
        };
        keyed.push((
            (resource, offset_in_res),
            BlobTableEntry {
                resource_header,
                part_number: 1,
                ref_count: desc.out_refcnt as u32,
                hash: *hash,
            },
        ));
    }
    keyed.sort_by_key(|(k, _)| *k);
    keyed.into_iter().map(|(_, e)| e).collect()
}

fn append_data_end(wim: &Wim) -> u64 {
    if wim.header.blob_table.uncompressed_size > 0 {
        wim.header.blob_table.offset_in_wim
    } else {
        HEADER_SIZE
    }
}

#[allow(clippy::too_many_arguments)]
fn run_write<W: ReadAt + WriteAt>(
    wim: &mut Wim,
    dest: &W,
    source: Option<&WimFile>,
    flags: WriteFlags,
    num_threads: usize,
    progress: &mut dyn ProgressCallback,
    rebuild: bool,
) -> Result<()> {
    progress.on_progress(&ProgressMsg::UpdateBeginCommand);

    compute_out_refcounts(&wim.images, &mut wim.blob_table)?;

    let compression = wim.header.compression_type();
    let read_compression = compression;
    let read_chunk_size = wim.header.chunk_size;

    let solid = flags.contains(WriteFlags::SOLID);
    let chunk_size = if solid { CompressionType::SOLID_CHUNK_SIZE } else { wim.header.chunk_size };
    let pipable = if flags.contains(WriteFlags::PIPABLE) {
        true
    } else if flags.contains(WriteFlags::NOT_PIPABLE) {
        false
    } else {
        wim.header.pipable
    };

    let mut compressor = make_compressor(compression, num_threads);

    let old_arena = wim.arena.clone();
    let mut new_arena: Vec<ArenaEntry> = if rebuild { Vec::new() } else { std::mem::take(&mut wim.arena) };

    let mut offset = if rebuild { HEADER_SIZE } else { append_data_end(wim) };

    let hashes_to_write: Vec<Hash> = if rebuild {
        wim.blob_table.iter().filter(|(_, d)| d.out_refcnt > 0).map(|(h, _)| *h).collect()
    } else {
        let existing = existing_hashes(&wim.blob_table);
        plan_blob_set(&wim.blob_table, &existing, &HashSet::new(), flags).needs_write
    };

    let fetch = |hash: Hash, desc: &BlobDescriptor| materialize_blob_bytes(hash, desc, &old_arena, source, read_compression, read_chunk_size);

    // Raw copy only ever applies to the *previous* contents of this same
    // container: a blob already materialized into the
    // destination from elsewhere during this same write (export/join) is
    // never `BlobLocation::InWim` against `old_arena`, so this is safe to
    // always offer and simply won't fire for those blobs.
    let source_pipable = wim.header.pipable;
    let raw_copy = source.map(|file| RawCopySource {
        arena: &old_arena,
        file,
        compression: read_compression,
        chunk_size: read_chunk_size,
        pipable: source_pipable,
        recompress_requested: flags.contains(WriteFlags::RECOMPRESS),
    });

    offset = write_blobs(
        dest,
        offset,
        &mut wim.blob_table,
        &mut new_arena,
        &hashes_to_write,
        compression,
        chunk_size,
        solid,
        pipable,
        raw_copy.as_ref(),
        &mut *compressor,
        progress,
        fetch,
    )?;

    let (metadata_entries, new_offset) = build_metadata_resources(dest, offset, &wim.images, compression, wim.header.chunk_size, pipable, &mut *compressor)?;
    offset = new_offset;

    let mut stream_entries = finalize_stream_entries(&wim.blob_table, &new_arena);
    stream_entries.extend(metadata_entries);
    stream_entries.sort_by_key(|e| e.resource_header.offset_in_wim);

    let write_integrity = flags.contains(WriteFlags::CHECK_INTEGRITY) || (!flags.contains(WriteFlags::NO_CHECK_INTEGRITY) && wim.header.integrity.uncompressed_size > 0);

    if !flags.contains(WriteFlags::RETAIN_GUID) && rebuild {
        wim.header.guid = uuid::Uuid::new_v4();
    }
    wim.header.pipable = pipable;

    finalize_write(dest, &mut wim.header, &stream_entries, &wim.xml, offset, write_integrity).map_err(Error::classify)?;

    wim.arena = new_arena;
    progress.on_progress(&ProgressMsg::UpdateEndCommand);
    Ok(())
}

fn temp_sibling_path(path: &Path) -> PathBuf {
    let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "wim".to_string());
    let mut tmp = path.to_path_buf();
    tmp.set_file_name(format!(".{file_name}.tmp"));
    tmp
}

/// Writes (or rewrites) `wim` to a fresh file at `path`: a new file is
/// assembled from scratch, then renamed into place so a crash leaves the
/// previous file intact.
pub(crate) fn write_to_new_path(wim: &mut Wim, path: &Path, flags: WriteFlags, num_threads: usize, mut progress: impl ProgressCallback) -> Result<()> {
    let old_file = wim.file.take();
    let tmp_path = temp_sibling_path(path);
    let std_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .map_err(Error::Io)?;
    let dest = RandomAccessFile::from(std_file);

    let result = run_write(wim, &dest, old_file.as_ref(), flags, num_threads, &mut progress, true);
    if let Err(err) = result {
        let _ = std::fs::remove_file(&tmp_path);
        wim.file = old_file;
        return Err(err);
    }

    progress.on_progress(&ProgressMsg::Rename {
        from: tmp_path.display().to_string(),
        to: path.display().to_string(),
    });
    std::fs::rename(&tmp_path, path).map_err(Error::Io)?;

    wim.file = Some(dest);
    wim.path = Some(path.to_path_buf());
    wim.lock_handle = File::open(path).ok();
    wim.dirty = false;
    Ok(())
}

/// Writes a full copy of `wim` to an already-open file descriptor.
pub(crate) fn write_to_fd(wim: &mut Wim, file: File, flags: WriteFlags, num_threads: usize, mut progress: impl ProgressCallback) -> Result<()> {
    let old_file = wim.file.take();
    let dest = RandomAccessFile::from(file);
    let result = run_write(wim, &dest, old_file.as_ref(), flags, num_threads, &mut progress, true);
    wim.file = old_file;
    result
}

/// Rewrites `wim`'s existing backing file, choosing between the append
/// and rebuild-via-temp-file strategies.
///
/// `UNSAFE_COMPACT` is accepted but, in this implementation, behaves like
/// the ordinary append path rather than physically reclaiming space freed
/// by deleted images: it writes the same correct blob table and simply
/// leaves unreferenced bytes as unreachable holes, which is safe (nothing
/// is overwritten while still referenced) even though it is not
/// space-optimal.
pub(crate) fn overwrite(wim: &mut Wim, flags: WriteFlags, num_threads: usize, mut progress: impl ProgressCallback) -> Result<()> {
    let lock_file = wim.lock_handle.take();
    let _lock = match &lock_file {
        Some(f) => Some(ExclusiveLock::try_acquire(f)?),
        None => None,
    };

    let use_rebuild = flags.contains(WriteFlags::REBUILD) || flags.contains(WriteFlags::RECOMPRESS) || wim.file.is_none();

    let result = if use_rebuild {
        match wim.path.clone() {
            Some(path) => write_to_new_path(wim, &path, flags, num_threads, &mut progress),
            None => Err(Error::InvalidParam("overwrite requires a container opened from a path".into()).into()),
        }
    } else {
        let old_file = wim.file.take().expect("checked by use_rebuild");
        let result = run_write(wim, &old_file, Some(&old_file), flags, num_threads, &mut progress, false);
        wim.file = Some(old_file);
        result
    };

    drop(_lock);
    if wim.lock_handle.is_none() {
        wim.lock_handle = lock_file;
    }
    result
}
