//! The security-descriptor table: a table of opaque
//! Windows security descriptors, indexed by dentries via `security_id`.
//!
//! ACL interpretation is Windows-specific and explicitly out of scope
//!; this crate stores and round-trips the raw descriptor
//! bytes without attempting to parse them.

use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned, LE, U32, U64};

use crate::error::{Error, Result};

/// Sentinel `security_id` meaning "no security descriptor".
pub const NO_SECURITY_ID: u32 = u32::MAX;

#[derive(AsBytes, FromBytes, FromZeroes, Unaligned, Clone, Copy)]
#[repr(C)]
struct RawSecurityHeader {
    total_length: U32<LE>,
    num_entries: U32<LE>,
}

static_assertions::const_assert_eq!(core::mem::size_of::<RawSecurityHeader>(), 8);

/// The table of opaque security descriptors carried by one image's
/// metadata resource.
#[derive(Clone, Debug, Default)]
pub struct SecurityDescriptorTable {
    descriptors: Vec<Vec<u8>>,
}

impl SecurityDescriptorTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a descriptor, returning its `security_id`. Descriptors are
    /// not deduplicated against each other; real-world captures rarely
    /// repeat an exact descriptor.
    pub fn push(&mut self, descriptor: Vec<u8>) -> u32 {
        let id = self.descriptors.len() as u32;
        self.descriptors.push(descriptor);
        id
    }

    /// Looks up a descriptor by id.
    pub fn get(&self, id: u32) -> Option<&[u8]> {
        if id == NO_SECURITY_ID {
            return None;
        }
        self.descriptors.get(id as usize).map(Vec::as_slice)
    }

    /// Number of descriptors in the table.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// `true` if the table has no descriptors.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Parses a security-descriptor table from the front of a metadata
    /// resource's decompressed bytes, returning the table and the number
    /// of bytes consumed (the caller must 8-byte-align past this before
    /// reading the root dentry, matching the real format's layout).
    pub fn parse(bytes: &[u8]) -> Result<(Self, usize)> {
        let (header, _) =
            RawSecurityHeader::ref_from_prefix(bytes).ok_or_else(|| Error::InvalidMetadataResource("truncated security header".into()))?;
        let total_length = header.total_length.get() as usize;
        let num_entries = header.num_entries.get() as usize;
        if total_length > bytes.len() {
            return Err(Error::InvalidMetadataResource("security data total_length exceeds resource size".into()).into());
        }

        let sizes_start = core::mem::size_of::<RawSecurityHeader>();
        let sizes_end = sizes_start + num_entries * 8;
        if sizes_end > total_length {
            return Err(Error::InvalidMetadataResource("security data size table overruns total_length".into()).into());
        }
        let sizes: Vec<u64> = bytes[sizes_start..sizes_end]
            .chunks_exact(8)
            .map(|c| U64::<LE>::read_from(c).unwrap().get())
            .collect();

        let mut descriptors = Vec::with_capacity(num_entries);
        let mut offset = sizes_end;
        for size in sizes {
            let size = size as usize;
            if offset + size > total_length {
                return Err(Error::InvalidMetadataResource("security descriptor overruns total_length".into()).into());
            }
            descriptors.push(bytes[offset..offset + size].to_vec());
            offset += size;
        }

        Ok((Self { descriptors }, total_length))
    }

    /// Serializes the table, padded to an 8-byte boundary as the real
    /// format requires before the root dentry follows it.
    pub fn serialize(&self) -> Vec<u8> {
        let sizes_len = self.descriptors.len() * 8;
        let descriptors_len: usize = self.descriptors.iter().map(Vec::len).sum();
        let total_length = core::mem::size_of::<RawSecurityHeader>() + sizes_len + descriptors_len;

        let mut out = Vec::with_capacity(total_length.next_multiple_of(8));
        out.extend_from_slice(
            RawSecurityHeader {
                total_length: U32::new(total_length as u32),
                num_entries: U32::new(self.descriptors.len() as u32),
            }
            .as_bytes(),
        );
        for d in &self.descriptors {
            out.extend_from_slice(&(d.len() as u64).to_le_bytes());
        }
        for d in &self.descriptors {
            out.extend_from_slice(d);
        }
        while out.len() % 8 != 0 {
            out.push(0);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_descriptors() {
        let mut table = SecurityDescriptorTable::new();
        let a = table.push(vec![1, 2, 3]);
        let b = table.push(vec![4, 5, 6, 7]);
        assert_eq!(a, 0);
        assert_eq!(b, 1);

        let bytes = table.serialize();
        assert_eq!(bytes.len() % 8, 0);
        let (parsed, _) = SecurityDescriptorTable::parse(&bytes).unwrap();
        assert_eq!(parsed.get(a), Some(&[1u8, 2, 3][..]));
        assert_eq!(parsed.get(b), Some(&[4u8, 5, 6, 7][..]));
        assert_eq!(parsed.get(NO_SECURITY_ID), None);
    }

    #[test]
    fn empty_table_round_trips() {
        let table = SecurityDescriptorTable::new();
        let bytes = table.serialize();
        let (parsed, _) = SecurityDescriptorTable::parse(&bytes).unwrap();
        assert!(parsed.is_empty());
    }
}
