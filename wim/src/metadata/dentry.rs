//! Directory entries, their streams, and the on-disk record format that
//! packs a directory's children into one contiguous, sentinel-terminated
//! run.
//!
//! Bit-exact compatibility with Microsoft's own implementation is an
//! explicit non-goal; this record format follows the real WIM dentry's
//! *shape* (fixed header, inline UTF-16 names, a run of alternate-stream
//! entries, 8-byte alignment throughout, directories addressed by
//! `subdir_offset` into the same resource) without chasing every reserved
//! field of the original.

use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned, LE, U16, U32, U64};

use crate::error::{Error, Result};
use wim_format::Hash;

bitflags::bitflags! {
    /// Windows file-attribute bits carried by a dentry.
    #[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
    pub struct FileAttributes: u32 {
        /// Read-only.
        const READONLY = 0x1;
        /// Hidden.
        const HIDDEN = 0x2;
        /// System file.
        const SYSTEM = 0x4;
        /// This entry is a directory.
        const DIRECTORY = 0x10;
        /// Changed since the last archive operation.
        const ARCHIVE = 0x20;
        /// No other attributes set.
        const NORMAL = 0x80;
        /// This entry is a reparse point (`reparse_tag` is meaningful).
        const REPARSE_POINT = 0x400;
        /// NTFS-compressed.
        const COMPRESSED = 0x800;
        /// NTFS-encrypted.
        const ENCRYPTED = 0x4000;
    }
}

/// One named stream of an entry; the default/unnamed data stream uses an
/// empty `name`.
#[derive(Clone, Debug)]
pub struct StreamEntry {
    /// Stream name; empty for the default stream.
    pub name: String,
    /// Content hash, or [`wim_format::ZERO_HASH`] for an empty stream.
    pub hash: Hash,
}

/// One directory entry: a file or directory, its attributes, its
/// streams, and (for a directory) its children.
#[derive(Clone, Debug)]
pub struct Dentry {
    /// Entry name as stored (case-preserving); empty only for the root.
    pub file_name: String,
    /// Optional 8.3 short name.
    pub short_name: Option<String>,
    /// File attributes.
    pub attributes: FileAttributes,
    /// Index into the image's [`super::security::SecurityDescriptorTable`],
    /// or [`super::security::NO_SECURITY_ID`].
    pub security_id: u32,
    /// Windows FILETIME of creation.
    pub creation_time: u64,
    /// Windows FILETIME of last access.
    pub last_access_time: u64,
    /// Windows FILETIME of last write.
    pub last_write_time: u64,
    /// Reparse tag, meaningful only when `attributes` has `REPARSE_POINT`.
    pub reparse_tag: u32,
    /// This entry's streams. The entry with `name == ""` (if any) is the
    /// default/unnamed stream; the rest are named (ADS) streams.
    pub streams: Vec<StreamEntry>,
    /// Children, populated only for directories.
    pub children: Vec<Dentry>,
}

impl Dentry {
    /// Builds an empty, unnamed directory (used for a fresh image's root).
    pub fn new_root() -> Self {
        Self {
            file_name: String::new(),
            short_name: None,
            attributes: FileAttributes::DIRECTORY,
            security_id: super::security::NO_SECURITY_ID,
            creation_time: 0,
            last_access_time: 0,
            last_write_time: 0,
            reparse_tag: 0,
            streams: Vec::new(),
            children: Vec::new(),
        }
    }

    /// `true` if this entry is a directory.
    pub fn is_directory(&self) -> bool {
        self.attributes.contains(FileAttributes::DIRECTORY)
    }

    /// The default/unnamed stream's hash, or the all-zero hash if this
    /// entry has no unnamed stream.
    pub fn unnamed_stream_hash(&self) -> Hash {
        self.streams
            .iter()
            .find(|s| s.name.is_empty())
            .map(|s| s.hash)
            .unwrap_or(wim_format::ZERO_HASH)
    }

    /// Named (non-default) streams.
    pub fn named_streams(&self) -> impl Iterator<Item = &StreamEntry> {
        self.streams.iter().filter(|s| !s.name.is_empty())
    }
}

fn encode_utf16le_nul(s: &str) -> Vec<u8> {
    let mut out: Vec<u8> = s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    out.extend_from_slice(&[0, 0]);
    out
}

fn decode_utf16le(bytes: &[u8]) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(Error::InvalidMetadataResource("odd-length UTF-16 name".into()));
    }
    let units: Vec<u16> = bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
    String::from_utf16(&units).map_err(|e| Error::InvalidMetadataResource(e.to_string()))
}

fn pad_to_8(buf: &mut Vec<u8>) {
    while buf.len() % 8 != 0 {
        buf.push(0);
    }
}

#[derive(AsBytes, FromBytes, FromZeroes, Unaligned, Clone, Copy)]
#[repr(C)]
struct RawDentryHeader {
    length: U64<LE>,
    attributes: U32<LE>,
    security_id: U32<LE>,
    subdir_offset: U64<LE>,
    creation_time: U64<LE>,
    last_access_time: U64<LE>,
    last_write_time: U64<LE>,
    unnamed_stream_hash: [u8; 20],
    reparse_tag: U64<LE>,
    streams_count: U16<LE>,
    short_name_length: U16<LE>,
    file_name_length: U16<LE>,
    reserved: U16<LE>,
}

static_assertions::const_assert_eq!(core::mem::size_of::<RawDentryHeader>(), 84);

#[derive(AsBytes, FromBytes, FromZeroes, Unaligned, Clone, Copy)]
#[repr(C)]
struct RawStreamHeader {
    length: U64<LE>,
    reserved: U64<LE>,
    hash: [u8; 20],
    name_length: U16<LE>,
    padding: [u8; 6],
}

static_assertions::const_assert_eq!(core::mem::size_of::<RawStreamHeader>(), 44);

/// Appends one dentry's self-contained record (header, names, streams —
/// everything but its children) to `buf`, returning the absolute byte
/// offset of the record's `subdir_offset` field so the caller can patch it
/// in once the children run's location is known.
pub fn append_dentry_record(buf: &mut Vec<u8>, dentry: &Dentry) -> usize {
    let mut rec = vec![0u8; core::mem::size_of::<RawDentryHeader>()];

    let file_name_bytes = encode_utf16le_nul(&dentry.file_name);
    let file_name_length = (file_name_bytes.len() - 2) as u16;
    rec.extend_from_slice(&file_name_bytes);

    let short_name_length = match &dentry.short_name {
        Some(short) => {
            let bytes = encode_utf16le_nul(short);
            let len = (bytes.len() - 2) as u16;
            rec.extend_from_slice(&bytes);
            len
        }
        None => 0,
    };

    pad_to_8(&mut rec);

    let named: Vec<&StreamEntry> = dentry.named_streams().collect();
    for stream in &named {
        let mut entry = vec![0u8; core::mem::size_of::<RawStreamHeader>()];
        let name_bytes = encode_utf16le_nul(&stream.name);
        let name_length = (name_bytes.len() - 2) as u16;
        entry.extend_from_slice(&name_bytes);
        pad_to_8(&mut entry);

        let header = RawStreamHeader {
            length: U64::new(entry.len() as u64),
            reserved: U64::new(0),
            hash: stream.hash,
            name_length: U16::new(name_length),
            padding: [0; 6],
        };
        entry[..core::mem::size_of::<RawStreamHeader>()].copy_from_slice(header.as_bytes());
        rec.extend_from_slice(&entry);
    }

    let header = RawDentryHeader {
        length: U64::new(rec.len() as u64),
        attributes: U32::new(dentry.attributes.bits()),
        security_id: U32::new(dentry.security_id),
        subdir_offset: U64::new(0),
        creation_time: U64::new(dentry.creation_time),
        last_access_time: U64::new(dentry.last_access_time),
        last_write_time: U64::new(dentry.last_write_time),
        unnamed_stream_hash: dentry.unnamed_stream_hash(),
        reparse_tag: U64::new(dentry.reparse_tag as u64),
        streams_count: U16::new(named.len() as u16),
        short_name_length: U16::new(short_name_length),
        file_name_length: U16::new(file_name_length),
        reserved: U16::new(0),
    };
    rec[..core::mem::size_of::<RawDentryHeader>()].copy_from_slice(header.as_bytes());

    let subdir_offset_field_pos = buf.len() + 16; // length(8) + attributes(4) + security_id(4)
    buf.extend_from_slice(&rec);
    subdir_offset_field_pos
}

/// Patches a previously appended record's `subdir_offset` field.
pub fn patch_subdir_offset(buf: &mut [u8], field_pos: usize, offset: u64) {
    buf[field_pos..field_pos + 8].copy_from_slice(&offset.to_le_bytes());
}

/// Parses one dentry record at `offset`, returning the dentry (with an
/// empty `children`) and its `subdir_offset` field, plus the offset just
/// past this record (`offset + header.length`).
pub fn parse_dentry_record(bytes: &[u8], offset: usize) -> Result<(Dentry, u64, usize)> {
    let (header, after_header) =
        RawDentryHeader::ref_from_prefix(&bytes[offset..]).ok_or_else(|| Error::InvalidMetadataResource("truncated dentry header".into()))?;
    let header = *header;
    let record_len = header.length.get() as usize;
    if record_len < core::mem::size_of::<RawDentryHeader>() || offset + record_len > bytes.len() {
        return Err(Error::InvalidMetadataResource("dentry length field out of range".into()));
    }

    let mut cursor = core::mem::size_of::<RawDentryHeader>();
    let file_name_length = header.file_name_length.get() as usize;
    if after_header.len() < file_name_length + 2 {
        return Err(Error::InvalidMetadataResource("dentry file name overruns record".into()));
    }
    let file_name = decode_utf16le(&after_header[..file_name_length])?;
    cursor += file_name_length + 2;

    let short_name_length = header.short_name_length.get() as usize;
    let short_name = if short_name_length > 0 {
        let start = cursor - core::mem::size_of::<RawDentryHeader>();
        let name = decode_utf16le(&after_header[start..start + short_name_length])?;
        cursor += short_name_length + 2;
        Some(name)
    } else {
        None
    };

    while cursor % 8 != 0 {
        cursor += 1;
    }

    let mut streams = Vec::new();
    let unnamed_hash = header.unnamed_stream_hash;
    if unnamed_hash != wim_format::ZERO_HASH {
        streams.push(StreamEntry {
            name: String::new(),
            hash: unnamed_hash,
        });
    }

    for _ in 0..header.streams_count.get() {
        let abs = offset + cursor;
        let (stream_header, stream_rest) =
            RawStreamHeader::ref_from_prefix(&bytes[abs..]).ok_or_else(|| Error::InvalidMetadataResource("truncated stream header".into()))?;
        let stream_header = *stream_header;
        let entry_len = stream_header.length.get() as usize;
        if entry_len < core::mem::size_of::<RawStreamHeader>() || abs + entry_len > bytes.len() {
            return Err(Error::InvalidMetadataResource("stream entry length out of range".into()));
        }
        let name_length = stream_header.name_length.get() as usize;
        if stream_rest.len() < name_length {
            return Err(Error::InvalidMetadataResource("stream name overruns entry".into()));
        }
        let name = decode_utf16le(&stream_rest[..name_length])?;
        streams.push(StreamEntry {
            name,
            hash: stream_header.hash,
        });
        cursor += entry_len;
    }

    let dentry = Dentry {
        file_name,
        short_name,
        attributes: FileAttributes::from_bits_truncate(header.attributes.get()),
        security_id: header.security_id.get(),
        creation_time: header.creation_time.get(),
        last_access_time: header.last_access_time.get(),
        last_write_time: header.last_write_time.get(),
        reparse_tag: header.reparse_tag.get() as u32,
        streams,
        children: Vec::new(),
    };

    Ok((dentry, header.subdir_offset.get(), offset + record_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_leaf_dentry_with_named_stream() {
        let dentry = Dentry {
            file_name: "readme.txt".to_string(),
            short_name: None,
            attributes: FileAttributes::NORMAL,
            security_id: super::super::security::NO_SECURITY_ID,
            creation_time: 123,
            last_access_time: 456,
            last_write_time: 789,
            reparse_tag: 0,
            streams: vec![
                StreamEntry {
                    name: String::new(),
                    hash: [9u8; 20],
                },
                StreamEntry {
                    name: "zone.identifier".to_string(),
                    hash: [8u8; 20],
                },
            ],
            children: Vec::new(),
        };

        let mut buf = Vec::new();
        let subdir_pos = append_dentry_record(&mut buf, &dentry);
        patch_subdir_offset(&mut buf, subdir_pos, 0);

        let (parsed, subdir_offset, end) = parse_dentry_record(&buf, 0).unwrap();
        assert_eq!(end, buf.len());
        assert_eq!(subdir_offset, 0);
        assert_eq!(parsed.file_name, "readme.txt");
        assert_eq!(parsed.unnamed_stream_hash(), [9u8; 20]);
        assert_eq!(parsed.named_streams().count(), 1);
        assert_eq!(parsed.named_streams().next().unwrap().name, "zone.identifier");
    }

    #[test]
    fn empty_unnamed_stream_round_trips_as_zero_hash() {
        let dentry = Dentry {
            file_name: "empty.bin".to_string(),
            short_name: None,
            attributes: FileAttributes::NORMAL,
            security_id: super::super::security::NO_SECURITY_ID,
            creation_time: 0,
            last_access_time: 0,
            last_write_time: 0,
            reparse_tag: 0,
            streams: vec![StreamEntry {
                name: String::new(),
                hash: wim_format::ZERO_HASH,
            }],
            children: Vec::new(),
        };
        let mut buf = Vec::new();
        append_dentry_record(&mut buf, &dentry);
        let (parsed, _, _) = parse_dentry_record(&buf, 0).unwrap();
        assert_eq!(parsed.streams.len(), 0);
        assert_eq!(parsed.unnamed_stream_hash(), wim_format::ZERO_HASH);
    }
}
