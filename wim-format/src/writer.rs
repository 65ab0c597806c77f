//! The resource engine's write path: assembling one or more
//! blobs into a compressed (or raw) resource, in either the normal
//! (table-before-data) or pipable (table-after-data) layout.

use sync_file::WriteAt;
use tracing::trace_span;
use zerocopy::AsBytes;

use crate::chunk_table::{ChunkTable, RawSolidHeader};
use crate::compression::CompressionType;
use crate::error::FormatResult;
use crate::pipable::RawPipableChunkHeader;
use crate::resource::{ResourceFlags, ResourceHeader, SolidBlobEntry};
use crate::Hash;

/// A resource assembled in memory, ready to be written at a chosen offset.
pub struct CompressedResource {
    /// The resource's on-disk bytes (table, any solid alt-header, and
    /// chunk data, in the order this layout requires).
    pub bytes: Vec<u8>,
    /// Uncompressed size of the data the resource represents.
    pub uncompressed_size: u64,
    /// Flags to record in the blob table entry pointing at this resource.
    pub flags: ResourceFlags,
}

/// A solid resource assembled in memory, along with the per-blob layout
/// needed to populate each blob's [`crate::blob::BlobLocation::InWim`].
pub struct CompressedSolidResource {
    /// The underlying resource.
    pub resource: CompressedResource,
    /// Each input blob's hash and placement within the resource's
    /// decompressed byte stream, in input order.
    pub blob_entries: Vec<SolidBlobEntry>,
}

/// One blob to be packed into a solid resource.
pub struct SolidBlobInput<'a> {
    /// The blob's content hash.
    pub hash: Hash,
    /// The blob's uncompressed bytes.
    pub data: &'a [u8],
}

/// Splits `data` into `chunk_size`-sized chunks and compresses each
/// independently (chunks never share compressor state, matching the
/// reader's per-chunk fresh decompressor).
///
/// A chunk whose compressed form is not smaller than its input is stored
/// raw instead ("rewrite uncompressed"); the reader detects this case by
/// comparing the chunk's on-disk and uncompressed lengths.
fn compress_chunks(data: &[u8], compression: CompressionType, chunk_size: u32) -> Vec<Vec<u8>> {
    let chunk_size = chunk_size.max(1) as usize;
    if data.is_empty() {
        return Vec::new();
    }
    data.chunks(chunk_size)
        .map(|chunk| {
            if !compression.is_compressed() {
                return chunk.to_vec();
            }
            let mut compressor = compression.new_compressor();
            let mut out = Vec::with_capacity(compressor.bound(chunk.len()));
            compressor.compress(chunk, &mut out);
            if out.len() >= chunk.len() {
                chunk.to_vec()
            } else {
                out
            }
        })
        .collect()
}

/// Assembles a single, non-solid resource from `data`.
///
/// If `compression` is [`CompressionType::None`], or compressing the data
/// in full would not save anything, the resource is stored raw with the
/// [`ResourceFlags::COMPRESSED`] flag cleared.
pub fn compress_simple_resource(
    data: &[u8],
    compression: CompressionType,
    chunk_size: u32,
    is_metadata: bool,
    pipable: bool,
) -> CompressedResource {
    let _span = trace_span!("compress_simple_resource").entered();

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

    let chunks = compress_chunks(data, compression, chunk_size);
    let chunk_sizes: Vec<u64> = chunks.iter().map(|c| c.len() as u64).collect();
    let table = ChunkTable::from_chunk_sizes(&chunk_sizes);

    let bytes = if pipable {
        let mut bytes = Vec::new();
        for chunk in &chunks {
            bytes.extend_from_slice(RawPipableChunkHeader::new(chunk.len() as u32).as_bytes());
            bytes.extend_from_slice(chunk);
        }
        bytes.extend_from_slice(&table.serialize(data.len() as u64));
        bytes
    } else {
        let mut bytes = table.serialize(data.len() as u64);
        for chunk in &chunks {
            bytes.extend_from_slice(chunk);
        }
        bytes
    };

    if bytes.len() >= data.len() {
        // Compressing (plus table overhead) did not pay for itself; store
        // the whole resource raw rather than a compressed form that is no
        // smaller than the input.
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

/// Assembles a solid resource packing every blob in `blobs` behind one
/// compression stream.
pub fn compress_solid_resource(
    blobs: &[SolidBlobInput<'_>],
    compression: CompressionType,
    chunk_size: u32,
    pipable: bool,
) -> CompressedSolidResource {
    let _span = trace_span!("compress_solid_resource").entered();

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
    let chunks = compress_chunks(&concatenated, compression, chunk_size);
    let chunk_sizes: Vec<u64> = chunks.iter().map(|c| c.len() as u64).collect();
    let table = ChunkTable::from_chunk_sizes(&chunk_sizes);
    let solid_header = RawSolidHeader::new(uncompressed_size, chunk_size, compression);

    let bytes = if pipable {
        let mut bytes = Vec::new();
        for chunk in &chunks {
            bytes.extend_from_slice(RawPipableChunkHeader::new(chunk.len() as u32).as_bytes());
            bytes.extend_from_slice(chunk);
        }
        bytes.extend_from_slice(solid_header.as_bytes());
        bytes.extend_from_slice(&table.serialize_solid(uncompressed_size));
        bytes
    } else {
        let mut bytes = solid_header.as_bytes().to_vec();
        bytes.extend_from_slice(&table.serialize_solid(uncompressed_size));
        for chunk in &chunks {
            bytes.extend_from_slice(chunk);
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

/// Writes an assembled resource at `offset` in `dest`, returning the
/// [`ResourceHeader`] a blob-table entry should record for it.
pub fn write_resource<W: WriteAt>(dest: &W, offset: u64, compressed: &CompressedResource) -> FormatResult<ResourceHeader> {
    dest.write_all_at(&compressed.bytes, offset)?;
    Ok(ResourceHeader {
        offset_in_wim: offset,
        size_in_wim: compressed.bytes.len() as u64,
        uncompressed_size: compressed.uncompressed_size,
        flags: compressed.flags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ResourceReader;

    fn roundtrip(data: &[u8], compression: CompressionType, chunk_size: u32, pipable: bool) {
        let compressed = compress_simple_resource(data, compression, chunk_size, false, pipable);
        let file = sync_file::RandomAccessFile::from(tempfile::tempfile().unwrap());
        let header = write_resource(&file, 0, &compressed).unwrap();

        let reader = ResourceReader::open(&file, header, compression, chunk_size).unwrap();
        let read_back = reader.read_all().unwrap();
        assert_eq!(read_back, data);
    }

    #[test]
    fn roundtrips_uncompressed_resource() {
        roundtrip(b"hello, wim", CompressionType::None, 32 * 1024, false);
    }

    #[test]
    fn roundtrips_xpress_resource_across_multiple_chunks() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        roundtrip(&data, CompressionType::Xpress, 4096, false);
    }

    #[test]
    fn roundtrips_pipable_resource() {
        let data: Vec<u8> = (0..70_000u32).map(|i| (i % 97) as u8).collect();
        roundtrip(&data, CompressionType::Xpress, 4096, true);
    }

    #[test]
    fn roundtrips_solid_resource_and_recovers_blob_layout() {
        let blob_a = vec![1u8; 5000];
        let blob_b = vec![2u8; 9000];
        let inputs = vec![
            SolidBlobInput {
                hash: crate::sha1_hash(&blob_a),
                data: &blob_a,
            },
            SolidBlobInput {
                hash: crate::sha1_hash(&blob_b),
                data: &blob_b,
            },
        ];
        let solid = compress_solid_resource(&inputs, CompressionType::Xpress, 4096, false);
        assert_eq!(solid.blob_entries[0].offset_in_res, 0);
        assert_eq!(solid.blob_entries[1].offset_in_res, blob_a.len() as u64);

        let file = sync_file::RandomAccessFile::from(tempfile::tempfile().unwrap());
        let header = write_resource(&file, 0, &solid.resource).unwrap();

        let reader = ResourceReader::open(&file, header, CompressionType::Xpress, 4096).unwrap();
        let a = reader
            .read_and_verify_blob(
                solid.blob_entries[0].offset_in_res,
                solid.blob_entries[0].size,
                solid.blob_entries[0].hash,
            )
            .unwrap();
        assert_eq!(a, blob_a);
        let b = reader
            .read_and_verify_blob(
                solid.blob_entries[1].offset_in_res,
                solid.blob_entries[1].size,
                solid.blob_entries[1].hash,
            )
            .unwrap();
        assert_eq!(b, blob_b);
    }
}
