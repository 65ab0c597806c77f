//! Per-image metadata: the directory tree and its security-descriptor
//! table, packed into one metadata resource.

pub mod dentry;
pub mod security;

pub use dentry::{Dentry, FileAttributes, StreamEntry};
pub use security::{SecurityDescriptorTable, NO_SECURITY_ID};

use crate::error::{Error, Result};

/// One image's full metadata: its directory tree, rooted at an unnamed
/// root directory, plus the security-descriptor table its dentries index
/// into.
#[derive(Clone, Debug)]
pub struct ImageMetadata {
    /// The root directory. Always a directory; its `file_name` is always
    /// empty.
    pub root: Dentry,
    /// Security descriptors referenced by `security_id` on dentries in
    /// this tree.
    pub security: SecurityDescriptorTable,
}

impl Default for ImageMetadata {
    fn default() -> Self {
        Self {
            root: Dentry::new_root(),
            security: SecurityDescriptorTable::new(),
        }
    }
}

impl ImageMetadata {
    /// Validates the tree: the
    /// root is unnamed, sibling names are case-insensitively unique within
    /// each directory, and every `security_id` resolves in the table.
    pub fn validate(&self) -> Result<()> {
        if !self.root.file_name.is_empty() {
            return Err(Error::InvalidMetadataResource("root dentry must be unnamed".into()).into());
        }
        self.validate_dentry(&self.root)
    }

    fn validate_dentry(&self, dentry: &Dentry) -> Result<()> {
        if dentry.security_id != NO_SECURITY_ID && self.security.get(dentry.security_id).is_none() {
            return Err(Error::InvalidSecurityData.into());
        }
        let mut seen = std::collections::HashSet::new();
        for child in &dentry.children {
            if child.file_name.is_empty() {
                return Err(Error::InvalidMetadataResource("non-root dentry with empty name".into()).into());
            }
            if !seen.insert(child.file_name.to_lowercase()) {
                return Err(Error::InvalidMetadataResource(format!(
                    "duplicate sibling name (case-insensitive): {}",
                    child.file_name
                ))
                .into());
            }
            self.validate_dentry(child)?;
        }
        Ok(())
    }

    /// Looks up an entry by its `/`-free path components from the root.
    pub fn lookup(&self, path: &[String]) -> Option<&Dentry> {
        let mut current = &self.root;
        for component in path {
            current = current.children.iter().find(|c| c.file_name.eq_ignore_ascii_case(component))?;
        }
        Some(current)
    }

    /// Visits every entry in the tree (pre-order, root first) passing each
    /// entry's full path and the entry itself to `visit`.
    pub fn iterate(&self, mut visit: impl FnMut(&[String], &Dentry)) {
        let mut path = Vec::new();
        self.iterate_inner(&self.root, &mut path, &mut visit);
    }

    fn iterate_inner(&self, dentry: &Dentry, path: &mut Vec<String>, visit: &mut impl FnMut(&[String], &Dentry)) {
        visit(path, dentry);
        for child in &dentry.children {
            path.push(child.file_name.clone());
            self.iterate_inner(child, path, visit);
            path.pop();
        }
    }

    /// Serializes the full metadata resource body: security-descriptor
    /// table, 8-byte padding, then the dentry tree with each directory's
    /// children packed into a sentinel-terminated run addressed by
    /// `subdir_offset`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = self.security.serialize();
        debug_assert_eq!(buf.len() % 8, 0);
        write_directory_entry(&mut buf, &self.root);
        buf
    }

    /// Parses a metadata resource body previously produced by
    /// [`Self::serialize`] (or, in shape, by the real WIM format).
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let (security, sec_len) = SecurityDescriptorTable::parse(bytes)?;
        let root_offset = sec_len.next_multiple_of(8);
        if root_offset > bytes.len() {
            return Err(Error::InvalidMetadataResource("no room for root dentry".into()).into());
        }
        let (mut root, subdir_offset, _) = dentry::parse_dentry_record(bytes, root_offset)?;
        if root.is_directory() {
            root.children = read_children(bytes, subdir_offset)?;
        }
        let metadata = Self { root, security };
        metadata.validate()?;
        Ok(metadata)
    }
}

fn write_directory_entry(buf: &mut Vec<u8>, dentry: &Dentry) {
    let subdir_field_pos = dentry::append_dentry_record(buf, dentry);
    if dentry.is_directory() {
        let children_offset = buf.len() as u64;
        dentry::patch_subdir_offset(buf, subdir_field_pos, children_offset);
        for child in &dentry.children {
            write_directory_entry(buf, child);
        }
        buf.extend_from_slice(&0u64.to_le_bytes());
    }
}

fn read_children(bytes: &[u8], offset: u64) -> Result<Vec<Dentry>> {
    let mut children = Vec::new();
    let mut cursor = offset as usize;
    loop {
        if cursor + 8 > bytes.len() {
            return Err(Error::InvalidMetadataResource("children run missing terminator".into()).into());
        }
        if bytes[cursor..cursor + 8] == [0u8; 8] {
            break;
        }
        let (mut child, child_subdir_offset, next) = dentry::parse_dentry_record(bytes, cursor)?;
        if child.is_directory() {
            child.children = read_children(bytes, child_subdir_offset)?;
        }
        children.push(child);
        cursor = next;
    }
    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, hash: u8) -> Dentry {
        Dentry {
            file_name: name.to_string(),
            short_name: None,
            attributes: FileAttributes::NORMAL,
            security_id: NO_SECURITY_ID,
            creation_time: 0,
            last_access_time: 0,
            last_write_time: 0,
            reparse_tag: 0,
            streams: vec![StreamEntry {
                name: String::new(),
                hash: [hash; 20],
            }],
            children: Vec::new(),
        }
    }

    fn dir(name: &str, children: Vec<Dentry>) -> Dentry {
        Dentry {
            file_name: name.to_string(),
            short_name: None,
            attributes: FileAttributes::DIRECTORY,
            security_id: NO_SECURITY_ID,
            creation_time: 0,
            last_access_time: 0,
            last_write_time: 0,
            reparse_tag: 0,
            streams: Vec::new(),
            children,
        }
    }

    #[test]
    fn round_trips_a_small_tree() {
        let mut root = Dentry::new_root();
        root.children = vec![file("a.txt", 1), dir("sub", vec![file("b.txt", 2)])];
        let metadata = ImageMetadata { root, security: SecurityDescriptorTable::new() };
        metadata.validate().unwrap();

        let bytes = metadata.serialize();
        let parsed = ImageMetadata::parse(&bytes).unwrap();

        assert_eq!(parsed.root.children.len(), 2);
        let a = parsed.lookup(&["a.txt".to_string()]).unwrap();
        assert_eq!(a.unnamed_stream_hash(), [1u8; 20]);
        let b = parsed.lookup(&["sub".to_string(), "b.txt".to_string()]).unwrap();
        assert_eq!(b.unnamed_stream_hash(), [2u8; 20]);
    }

    #[test]
    fn rejects_duplicate_sibling_names_case_insensitively() {
        let mut root = Dentry::new_root();
        root.children = vec![file("A.txt", 1), file("a.txt", 2)];
        let metadata = ImageMetadata { root, security: SecurityDescriptorTable::new() };
        assert!(metadata.validate().is_err());
    }

    #[test]
    fn rejects_dangling_security_id() {
        let mut root = Dentry::new_root();
        let mut f = file("a.txt", 1);
        f.security_id = 0;
        root.children = vec![f];
        let metadata = ImageMetadata { root, security: SecurityDescriptorTable::new() };
        assert!(metadata.validate().is_err());
    }

    #[test]
    fn iterate_visits_every_entry() {
        let mut root = Dentry::new_root();
        root.children = vec![file("a.txt", 1), dir("sub", vec![file("b.txt", 2)])];
        let metadata = ImageMetadata { root, security: SecurityDescriptorTable::new() };

        let mut paths = Vec::new();
        metadata.iterate(|path, _| paths.push(path.join("/")));
        assert!(paths.contains(&"".to_string()));
        assert!(paths.contains(&"a.txt".to_string()));
        assert!(paths.contains(&"sub".to_string()));
        assert!(paths.contains(&"sub/b.txt".to_string()));
    }

    #[test]
    fn empty_tree_round_trips() {
        let metadata = ImageMetadata::default();
        let bytes = metadata.serialize();
        let parsed = ImageMetadata::parse(&bytes).unwrap();
        assert!(parsed.root.children.is_empty());
    }
}
