//! The resource engine's read path: opening a resource,
//! parsing its chunk table on first access, and decompressing chunks
//! through a one-chunk cache.

use std::cell::RefCell;
use std::io::Read;

use sync_file::ReadAt;
use tracing::{trace, trace_span};

use crate::chunk_table::{ChunkTable, RawSolidHeader};
use crate::compression::CompressionType;
use crate::error::{FormatError, FormatResult};
use crate::pipable::RawPipableChunkHeader;
use crate::resource::ResourceHeader;
use crate::sha1_hash;
use crate::Hash;

/// A handle opened on one resource, ready to serve [`ResourceReader::read_range`]
/// calls.
pub struct ResourceReader<'a, F> {
    file: &'a F,
    header: ResourceHeader,
    compression_type: CompressionType,
    chunk_size: u32,
    /// Offset, relative to `header.offset_in_wim`, at which the
    /// compressed chunk *data* region starts (after any leading table and
    /// solid alt-header).
    chunk_data_start: u64,
    chunk_table: ChunkTable,
    cache: RefCell<Option<(u64, Vec<u8>)>>,
}

impl<'a, F: ReadAt> ResourceReader<'a, F> {
    /// Opens a non-solid resource, given the container's default
    /// compression type and chunk size (used when the resource itself is
    /// uncompressed or does not carry its own chunking parameters).
    pub fn open(
        file: &'a F,
        header: ResourceHeader,
        container_compression: CompressionType,
        container_chunk_size: u32,
    ) -> FormatResult<Self> {
        let _span = trace_span!("ResourceReader::open").entered();

        if header.is_solid() {
            return Self::open_solid(file, header);
        }

        if !header.is_compressed() {
            return Ok(Self {
                file,
                header,
                compression_type: CompressionType::None,
                chunk_size: container_chunk_size.max(1),
                chunk_data_start: 0,
                chunk_table: ChunkTable::default(),
                cache: RefCell::new(None),
            });
        }

        let num_chunks = header
            .uncompressed_size
            .div_ceil(container_chunk_size as u64)
            .max(1);

        let (chunk_table, chunk_data_start) = if num_chunks <= 1 {
            (ChunkTable::default(), 0)
        } else {
            let table_len =
                ChunkTable::serialized_len(num_chunks as usize - 1, ChunkTable::entry_is_64bit(header.uncompressed_size));
            let mut table_bytes = vec![0u8; table_len];
            file.read_exact_at(&mut table_bytes, header.offset_in_wim)?;
            let table = ChunkTable::parse(&table_bytes, num_chunks, header.uncompressed_size)?;
            (table, table_len as u64)
        };

        Ok(Self {
            file,
            header,
            compression_type: container_compression,
            chunk_size: container_chunk_size,
            chunk_data_start,
            chunk_table,
            cache: RefCell::new(None),
        })
    }

    fn open_solid(file: &'a F, header: ResourceHeader) -> FormatResult<Self> {
        let mut probe = vec![0u8; 24];
        file.read_exact_at(&mut probe, header.offset_in_wim)?;
        let (_, compression, chunk_size, res_usize) = RawSolidHeader::parse(&probe)?;

        let num_chunks = res_usize.div_ceil(chunk_size as u64).max(1);
        let table_len = ChunkTable::serialized_len(num_chunks as usize, ChunkTable::entry_is_64bit(res_usize));
        let mut table_bytes = vec![0u8; table_len];
        file.read_exact_at(&mut table_bytes, header.offset_in_wim + 24)?;

        let table = ChunkTable::parse_solid(&table_bytes, num_chunks, res_usize)?;

        Ok(Self {
            file,
            header: ResourceHeader {
                uncompressed_size: res_usize,
                ..header
            },
            compression_type: compression,
            chunk_size,
            chunk_data_start: 24 + table_len as u64,
            chunk_table: table,
            cache: RefCell::new(None),
        })
    }

    /// Number of chunks in this resource.
    pub fn num_chunks(&self) -> u64 {
        if self.header.uncompressed_size == 0 {
            0
        } else {
            self.header.uncompressed_size.div_ceil(self.chunk_size as u64)
        }
    }

    fn chunk_uncompressed_len(&self, chunk: u64) -> u64 {
        let start = chunk * self.chunk_size as u64;
        (self.header.uncompressed_size - start).min(self.chunk_size as u64)
    }

    fn read_chunk(&self, chunk: u64, out: &mut Vec<u8>) -> FormatResult<()> {
        let uncompressed_len = self.chunk_uncompressed_len(chunk) as usize;

        if !self.header.is_compressed() {
            out.resize(uncompressed_len, 0);
            let file_offset = self.header.offset_in_wim + chunk * self.chunk_size as u64;
            self.file.read_exact_at(out, file_offset)?;
            return Ok(());
        }

        let chunk_data_len = self.header.size_in_wim - self.chunk_data_start;
        let start = self.chunk_table.chunk_start(chunk);
        let end = self.chunk_table.chunk_end(chunk, chunk_data_len);
        if end < start {
            return Err(FormatError::InvalidHeader("chunk table entries are out of order").into());
        }
        let compressed_len = (end - start) as usize;

        let mut compressed = vec![0u8; compressed_len];
        let file_offset = self.header.offset_in_wim + self.chunk_data_start + start;
        self.file.read_exact_at(&mut compressed, file_offset)?;

        // "Rewrite uncompressed": the writer stores a chunk verbatim
        // whenever compressing it would not shrink it, so a chunk whose
        // on-disk length equals its uncompressed length is never run
        // through the codec.
        if compressed_len == uncompressed_len {
            out.clear();
            out.extend_from_slice(&compressed);
            return Ok(());
        }

        let mut decompressor = self.compression_type.new_decompressor();
        decompressor
            .decompress(&compressed, uncompressed_len, out)
            .map_err(FormatError::Decompression)?;
        Ok(())
    }

    /// Reads `len` bytes starting at `offset` (both relative to the
    /// resource's uncompressed data) into `out`.
    pub fn read_range(&self, offset: u64, len: u64, out: &mut Vec<u8>) -> FormatResult<()> {
        out.clear();
        if len == 0 {
            return Ok(());
        }
        if offset + len > self.header.uncompressed_size {
            return Err(FormatError::InvalidHeader("read_range exceeds resource size").into());
        }

        let first_chunk = offset / self.chunk_size as u64;
        let last_chunk = (offset + len - 1) / self.chunk_size as u64;

        for chunk in first_chunk..=last_chunk {
            let chunk_start = chunk * self.chunk_size as u64;
            self.with_chunk(chunk, |data| {
                let local_start = offset.max(chunk_start) - chunk_start;
                let local_end = (offset + len).min(chunk_start + data.len() as u64) - chunk_start;
                out.extend_from_slice(&data[local_start as usize..local_end as usize]);
            })?;
        }
        Ok(())
    }

    fn with_chunk(&self, chunk: u64, f: impl FnOnce(&[u8])) -> FormatResult<()> {
        {
            let cache = self.cache.borrow();
            if let Some((cached_chunk, data)) = cache.as_ref() {
                if *cached_chunk == chunk {
                    f(data);
                    return Ok(());
                }
            }
        }
        trace!(chunk, "resource chunk cache miss");
        let mut data = Vec::new();
        self.read_chunk(chunk, &mut data)?;
        f(&data);
        *self.cache.borrow_mut() = Some((chunk, data));
        Ok(())
    }

    /// Reads the resource's entire uncompressed byte stream.
    pub fn read_all(&self) -> FormatResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.header.uncompressed_size as usize);
        self.read_range(0, self.header.uncompressed_size, &mut out)?;
        Ok(out)
    }

    /// Reads a blob packed inside this (necessarily solid) resource and
    /// verifies its hash.
    pub fn read_and_verify_blob(&self, offset_in_res: u64, size: u64, expected_hash: Hash) -> FormatResult<Vec<u8>> {
        let mut out = Vec::new();
        self.read_range(offset_in_res, size, &mut out)?;
        if sha1_hash(&out) != expected_hash {
            return Err(FormatError::InvalidResourceHash.into());
        }
        Ok(out)
    }
}

/// Decides whether a resource can be byte-for-byte copied from one
/// container to another without recompression.
///
/// For solid resources, raw copy additionally requires that at least ⅔ of
/// the resource's bytes are still referenced by the write set.
pub fn can_raw_copy(
    source_compression: CompressionType,
    source_chunk_size: u32,
    dest_compression: CompressionType,
    dest_chunk_size: u32,
    recompress_requested: bool,
    is_solid: bool,
    solid_bytes_total: u64,
    solid_bytes_still_referenced: u64,
) -> bool {
    if recompress_requested {
        return false;
    }
    if source_compression != dest_compression || source_chunk_size != dest_chunk_size {
        return false;
    }
    if is_solid && solid_bytes_total > 0 {
        return solid_bytes_still_referenced * 3 >= solid_bytes_total * 2;
    }
    true
}

/// Copies a resource's raw on-disk bytes (chunk table and all) from one
/// file to another, returning the number of bytes copied.
pub fn raw_copy_resource<F: ReadAt, W: sync_file::WriteAt>(
    src: &F,
    header: &ResourceHeader,
    dst: &W,
    dst_offset: u64,
) -> FormatResult<u64> {
    let _span = trace_span!("raw_copy_resource").entered();
    const BUF_SIZE: usize = 1024 * 1024;
    let mut buf = vec![0u8; BUF_SIZE.min(header.size_in_wim.max(1) as usize)];
    let mut remaining = header.size_in_wim;
    let mut src_off = header.offset_in_wim;
    let mut dst_off = dst_offset;
    while remaining > 0 {
        let n = (remaining as usize).min(buf.len());
        src.read_exact_at(&mut buf[..n], src_off)?;
        dst.write_all_at(&buf[..n], dst_off)?;
        remaining -= n as u64;
        src_off += n as u64;
        dst_off += n as u64;
    }
    Ok(header.size_in_wim)
}

/// Decompresses an entire pipable resource from a sequential, forward-only
/// reader: every chunk is prefixed
/// with its own `{compressed_size}` header so a reader never needs the
/// trailing chunk table.
pub fn read_pipable_resource_sequential<R: Read>(
    mut reader: R,
    uncompressed_size: u64,
    compression_type: CompressionType,
    chunk_size: u32,
) -> FormatResult<Vec<u8>> {
    if !compression_type.is_compressed() {
        let mut out = vec![0u8; uncompressed_size as usize];
        reader.read_exact(&mut out)?;
        return Ok(out);
    }

    let mut out = Vec::with_capacity(uncompressed_size as usize);
    let mut decompressor = compression_type.new_decompressor();
    let mut remaining = uncompressed_size;
    let mut chunk_buf = Vec::new();
    while remaining > 0 {
        let this_uncompressed = remaining.min(chunk_size as u64) as usize;

        let mut header_bytes = [0u8; 4];
        reader.read_exact(&mut header_bytes)?;
        let (compressed_size, _) = RawPipableChunkHeader::parse(&header_bytes)?;

        let mut compressed = vec![0u8; compressed_size as usize];
        reader.read_exact(&mut compressed)?;

        decompressor
            .decompress(&compressed, this_uncompressed, &mut chunk_buf)
            .map_err(FormatError::Decompression)?;
        out.extend_from_slice(&chunk_buf);
        remaining -= this_uncompressed as u64;
    }
    Ok(out)
}
