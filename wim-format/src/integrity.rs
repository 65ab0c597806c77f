//! The integrity table: an optional trailing resource carrying SHA-1
//! digests over fixed-size chunks of the file body.

use sync_file::ReadAt;
use tracing::{debug, trace_span};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned, LE, U32};

use crate::error::{FormatError, FormatResult};
use crate::{sha1_hash, Hash};

/// The integrity resource's default chunk size.
pub const DEFAULT_INTEGRITY_CHUNK_SIZE: u32 = 10 * 1024 * 1024;

/// The fixed header at the start of the integrity resource's decompressed
/// data, followed by `num_entries` 20-byte SHA-1 digests.
#[derive(AsBytes, FromBytes, FromZeroes, Unaligned, Clone, Copy)]
#[repr(C)]
struct RawIntegrityHeader {
    /// Size in bytes of this header, for forward-compatible extension.
    size: U32<LE>,
    num_entries: U32<LE>,
    chunk_size: U32<LE>,
    reserved: U32<LE>,
}

static_assertions::const_assert_eq!(core::mem::size_of::<RawIntegrityHeader>(), 16);

/// A parsed integrity table.
#[derive(Clone, Debug)]
pub struct IntegrityTable {
    /// Chunk size the digests cover.
    pub chunk_size: u32,
    /// One SHA-1 digest per chunk, in file order.
    pub digests: Vec<Hash>,
}

impl IntegrityTable {
    /// Parses the decompressed bytes of an integrity resource.
    pub fn parse(bytes: &[u8]) -> FormatResult<Self> {
        let (header, rest) =
            RawIntegrityHeader::ref_from_prefix(bytes).ok_or(FormatError::UnexpectedEof)?;
        let num_entries = header.num_entries.get() as usize;
        let chunk_size = header.chunk_size.get();
        if chunk_size == 0 {
            return Err(FormatError::InvalidIntegrityTable("chunk_size is zero").into());
        }
        if rest.len() < num_entries * 20 {
            return Err(FormatError::InvalidIntegrityTable("table is truncated").into());
        }
        let digests = rest[..num_entries * 20]
            .chunks_exact(20)
            .map(|c| c.try_into().unwrap())
            .collect();
        Ok(Self { chunk_size, digests })
    }

    /// Serializes this table back to the decompressed byte form.
    pub fn serialize(&self) -> Vec<u8> {
        let header = RawIntegrityHeader {
            size: U32::new(core::mem::size_of::<RawIntegrityHeader>() as u32),
            num_entries: U32::new(self.digests.len() as u32),
            chunk_size: U32::new(self.chunk_size),
            reserved: U32::new(0),
        };
        let mut out = header.as_bytes().to_vec();
        for digest in &self.digests {
            out.extend_from_slice(digest);
        }
        out
    }

    /// Computes a fresh integrity table covering `[start, end)` of `file`,
    /// reusing no state from any prior table.
    pub fn compute<F: ReadAt>(file: &F, start: u64, end: u64, chunk_size: u32) -> FormatResult<Self> {
        let _span = trace_span!("IntegrityTable::compute").entered();
        debug!(start, end, chunk_size, "computing integrity table");

        let mut digests = Vec::new();
        let mut offset = start;
        let mut buf = vec![0u8; chunk_size as usize];
        while offset < end {
            let this_len = ((end - offset).min(chunk_size as u64)) as usize;
            let slice = &mut buf[..this_len];
            file.read_exact_at(slice, offset)?;
            digests.push(sha1_hash(slice));
            offset += this_len as u64;
        }
        Ok(Self { chunk_size, digests })
    }

    /// Verifies a previously written byte range against this table,
    /// returning an error naming the first mismatching chunk.
    pub fn verify<F: ReadAt>(&self, file: &F, start: u64, end: u64) -> FormatResult<()> {
        let _span = trace_span!("IntegrityTable::verify").entered();

        let mut offset = start;
        let mut buf = vec![0u8; self.chunk_size as usize];
        for (i, expected) in self.digests.iter().enumerate() {
            if offset >= end {
                break;
            }
            let this_len = ((end - offset).min(self.chunk_size as u64)) as usize;
            let slice = &mut buf[..this_len];
            file.read_exact_at(slice, offset)?;
            let actual = sha1_hash(slice);
            if &actual != expected {
                return Err(FormatError::IntegrityMismatch(i as u64).into());
            }
            offset += this_len as u64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_and_digests() {
        let table = IntegrityTable {
            chunk_size: 1024,
            digests: vec![[1u8; 20], [2u8; 20], [3u8; 20]],
        };
        let bytes = table.serialize();
        let parsed = IntegrityTable::parse(&bytes).unwrap();
        assert_eq!(parsed.chunk_size, table.chunk_size);
        assert_eq!(parsed.digests, table.digests);
    }

    #[test]
    fn compute_then_verify_succeeds() {
        let mut data = vec![0u8; 50_000];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let file = sync_file::RandomAccessFile::from(
            tempfile::tempfile().unwrap(),
        );
        sync_file::WriteAt::write_all_at(&file, &data, 0).unwrap();
        let table = IntegrityTable::compute(&file, 0, data.len() as u64, 4096).unwrap();
        table.verify(&file, 0, data.len() as u64).unwrap();
    }

    #[test]
    fn verify_detects_flipped_byte() {
        let data = vec![7u8; 20_000];
        let file = sync_file::RandomAccessFile::from(
            tempfile::tempfile().unwrap(),
        );
        sync_file::WriteAt::write_all_at(&file, &data, 0).unwrap();
        let table = IntegrityTable::compute(&file, 0, data.len() as u64, 4096).unwrap();

        let mut corrupted = data.clone();
        corrupted[10_000] ^= 0xFF;
        sync_file::WriteAt::write_all_at(&file, &corrupted, 0).unwrap();

        let err = table.verify(&file, 0, data.len() as u64).unwrap_err();
        assert!(err.downcast_ref::<FormatError>().is_some());
    }
}
