//! The scanner interface consumed by [`crate::Wim::add_image`].
//!
//! A directory-tree scanner and a path/attribute model are assumed to
//! exist outside this crate (NTFS capture, Windows ACL handling, and
//! locale-aware filesystem walking are out of scope for this library);
//! this module defines only the small interface the blob engine needs
//! from one. [`MemoryScanner`] is a trivial in-memory implementation used
//! by this crate's own tests and usable by callers who already have their
//! tree in memory (e.g. extracted from another archive format).

use std::sync::Arc;

use crate::metadata::FileAttributes;

/// A lazy byte source for one stream, optionally carrying an
/// already-known hash.
pub trait ByteSource: Send + Sync {
    /// Reads the entire stream.
    fn read_all(&self) -> std::io::Result<Vec<u8>>;

    /// The stream's length, if cheaply knowable without reading it.
    fn len_hint(&self) -> Option<u64> {
        None
    }

    /// The stream's SHA-1 hash, if already known (e.g. carried over from
    /// another WIM image being re-captured), sparing the engine a hash
    /// pass on first read.
    fn known_hash(&self) -> Option<wim_format::Hash> {
        None
    }
}

/// A named stream (empty name for the default/unnamed stream) delivered
/// by a scanner.
pub struct ScannedStream {
    /// Stream name; empty for the entry's default data stream.
    pub name: String,
    /// The stream's bytes.
    pub source: Arc<dyn ByteSource>,
}

/// One filesystem entry delivered by a scanner.
pub struct ScannedEntry {
    /// Path components from the image root, e.g. `["dir", "file.txt"]`.
    pub path: Vec<String>,
    /// File attributes.
    pub attributes: FileAttributes,
    /// Windows FILETIME of creation.
    pub creation_time: u64,
    /// Windows FILETIME of last access.
    pub last_access_time: u64,
    /// Windows FILETIME of last write.
    pub last_write_time: u64,
    /// Opaque security descriptor bytes, if captured.
    pub security_descriptor: Option<Vec<u8>>,
    /// Reparse tag, if this entry is a reparse point.
    pub reparse_tag: u32,
    /// Named and unnamed data streams.
    pub streams: Vec<ScannedStream>,
}

impl ScannedEntry {
    /// `true` if this entry should become a directory dentry (no stream
    /// data of its own).
    pub fn is_directory(&self) -> bool {
        self.attributes.contains(FileAttributes::DIRECTORY)
    }
}

/// Capture-time configuration passed to a scanner by
/// [`crate::Wim::add_image`].
#[derive(Clone, Debug, Default)]
pub struct CaptureConfig {
    /// Glob-style patterns for paths to exclude from the capture.
    pub exclusion_patterns: Vec<String>,
    /// If set, don't cross filesystem/mount-point boundaries while
    /// scanning (meaningful only to scanners backed by a real filesystem).
    pub one_file_system: bool,
}

/// The scanner interface consumed by the blob engine.
///
/// The engine has no intrinsic knowledge of any filesystem; it only walks
/// whatever a [`ScannerSource`] hands it.
pub trait ScannerSource {
    /// Produces every entry to include in the image, in an order where
    /// each entry's parent directory (if any) appears before it.
    fn scan(&mut self, config: &CaptureConfig) -> std::io::Result<Vec<ScannedEntry>>;
}

/// A plain in-memory byte source, for building images without a real
/// filesystem.
pub struct InMemorySource(pub Vec<u8>);

impl ByteSource for InMemorySource {
    fn read_all(&self) -> std::io::Result<Vec<u8>> {
        Ok(self.0.clone())
    }

    fn len_hint(&self) -> Option<u64> {
        Some(self.0.len() as u64)
    }
}

/// A trivial [`ScannerSource`] backed by an explicit list of entries,
/// useful for tests and for callers assembling a tree programmatically.
#[derive(Default)]
pub struct MemoryScanner {
    entries: Vec<ScannedEntry>,
}

impl MemoryScanner {
    /// Creates an empty scanner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a plain file at `path` (components split on `/`) with the
    /// given unnamed-stream contents.
    pub fn add_file(mut self, path: &str, data: impl Into<Vec<u8>>) -> Self {
        self.entries.push(ScannedEntry {
            path: path.split('/').map(str::to_string).collect(),
            attributes: FileAttributes::NORMAL,
            creation_time: 0,
            last_access_time: 0,
            last_write_time: 0,
            security_descriptor: None,
            reparse_tag: 0,
            streams: vec![ScannedStream {
                name: String::new(),
                source: Arc::new(InMemorySource(data.into())),
            }],
        });
        self
    }

    /// Adds an empty directory at `path`.
    pub fn add_directory(mut self, path: &str) -> Self {
        self.entries.push(ScannedEntry {
            path: path.split('/').map(str::to_string).collect(),
            attributes: FileAttributes::DIRECTORY,
            creation_time: 0,
            last_access_time: 0,
            last_write_time: 0,
            security_descriptor: None,
            reparse_tag: 0,
            streams: Vec::new(),
        });
        self
    }
}

impl ScannerSource for MemoryScanner {
    fn scan(&mut self, _config: &CaptureConfig) -> std::io::Result<Vec<ScannedEntry>> {
        Ok(std::mem::take(&mut self.entries))
    }
}
