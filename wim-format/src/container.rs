//! Container-level open/write sequencing: the order in
//! which the header, blob table, XML metadata resource and integrity
//! table are read on open and rewritten on write.

use sync_file::{ReadAt, WriteAt};
use tracing::{debug, trace_span};

use crate::blob::{parse_blob_table, serialize_blob_table, BlobTableEntry};
use crate::compression::CompressionType;
use crate::error::FormatResult;
use crate::header::{WimHeader, HEADER_SIZE};
use crate::integrity::{IntegrityTable, DEFAULT_INTEGRITY_CHUNK_SIZE};
use crate::reader::ResourceReader;
use crate::resource::ResourceHeader;
use crate::writer::{compress_simple_resource, write_resource};
use crate::xml::WimXmlData;

/// The default compression algorithm for newly created containers.
pub const DEFAULT_COMPRESSION: CompressionType = CompressionType::Lzx;

/// Everything read from an existing container's three bookkeeping
/// resources (blob table, XML metadata, integrity table), in addition to
/// the header itself.
pub struct OpenContainer {
    /// The parsed, validated file header.
    pub header: WimHeader,
    /// Every entry in the blob table, in on-disk order.
    pub blob_table_entries: Vec<BlobTableEntry>,
    /// The parsed XML metadata document.
    pub xml: WimXmlData,
}

impl OpenContainer {
    /// Opens an existing container: reads the header, then the blob table
    /// and XML metadata resources it points to ("read-open sequence").
    pub fn open<F: ReadAt>(file: &F) -> FormatResult<Self> {
        let _span = trace_span!("OpenContainer::open").entered();

        let header = WimHeader::read(file)?;

        let blob_table_entries = if header.blob_table.uncompressed_size == 0 {
            Vec::new()
        } else {
            let reader = ResourceReader::open(file, header.blob_table, header.compression_type(), header.chunk_size)?;
            parse_blob_table(&reader.read_all()?)?
        };

        let xml = if header.xml.uncompressed_size == 0 {
            WimXmlData::default()
        } else {
            let reader = ResourceReader::open(file, header.xml, header.compression_type(), header.chunk_size)?;
            WimXmlData::parse(&reader.read_all()?)?
        };

        debug!(
            images = xml.images.len(),
            blobs = blob_table_entries.len(),
            "opened WIM container"
        );

        Ok(Self {
            header,
            blob_table_entries,
            xml,
        })
    }

    /// Verifies the container's integrity table, if present, against the
    /// byte range it was computed over: from the end of the header to the
    /// end of the blob table/XML region.
    pub fn verify_integrity<F: ReadAt>(&self, file: &F) -> FormatResult<()> {
        if self.header.integrity.uncompressed_size == 0 {
            return Ok(());
        }
        let reader = ResourceReader::open(
            file,
            self.header.integrity,
            self.header.compression_type(),
            self.header.chunk_size,
        )?;
        let table = IntegrityTable::parse(&reader.read_all()?)?;
        table.verify(file, HEADER_SIZE as u64, self.header.integrity.offset_in_wim)
    }
}

/// Writes the blob table, XML metadata, and (optionally) integrity table
/// starting at `data_end`, and rewrites the header last, so that a crash
/// partway through a write leaves the previous header — and therefore the
/// previous, still-valid container — intact.
pub fn finalize_write<W: ReadAt + WriteAt>(
    file: &W,
    header: &mut WimHeader,
    blob_table_entries: &[BlobTableEntry],
    xml: &WimXmlData,
    data_end: u64,
    write_integrity: bool,
) -> FormatResult<()> {
    let _span = trace_span!("finalize_write").entered();

    let mut offset = data_end;

    let blob_table_bytes = serialize_blob_table(blob_table_entries);
    let compressed = compress_simple_resource(
        &blob_table_bytes,
        header.compression_type(),
        header.chunk_size,
        false,
        header.pipable,
    );
    header.blob_table = write_resource(file, offset, &compressed)?;
    offset += compressed.bytes.len() as u64;

    let xml_bytes = xml.to_bytes()?;
    let compressed = compress_simple_resource(&xml_bytes, header.compression_type(), header.chunk_size, false, header.pipable);
    header.xml = write_resource(file, offset, &compressed)?;
    offset += compressed.bytes.len() as u64;

    if write_integrity {
        let table = IntegrityTable::compute(file, HEADER_SIZE as u64, offset, DEFAULT_INTEGRITY_CHUNK_SIZE)?;
        let integrity_bytes = table.serialize();
        let compressed =
            compress_simple_resource(&integrity_bytes, header.compression_type(), header.chunk_size, false, header.pipable);
        header.integrity = write_resource(file, offset, &compressed)?;
    } else {
        header.integrity = ResourceHeader::default();
    }

    header.image_count = xml.images.len() as u32;
    header.write(file)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_a_freshly_finalized_empty_container() {
        let file = sync_file::RandomAccessFile::from(tempfile::tempfile().unwrap());
        let mut header = WimHeader::new_empty(CompressionType::Lzx);
        header.write(&file).unwrap();

        let xml = WimXmlData::default();
        finalize_write(&file, &mut header, &[], &xml, 208, true).unwrap();

        let opened = OpenContainer::open(&file).unwrap();
        assert_eq!(opened.blob_table_entries.len(), 0);
        assert_eq!(opened.xml.images.len(), 0);
        opened.verify_integrity(&file).unwrap();
    }
}
