//! The on-disk WIM container layout: the file header, the compressed
//! resource engine (chunk tables, solid resources, pipable framing, raw
//! copy), the blob table and content-addressed deduplication index, the
//! XML metadata resource envelope, and the integrity table.
//!
//! This crate has no knowledge of what a WIM *image* looks like (directory
//! trees, security descriptors, per-image XML records); that lives in the
//! `wim` crate, which drives this crate's resource engine and blob table
//! to store and retrieve image metadata resources like any other blob.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod blob;
pub mod chunk_table;
pub mod compression;
pub mod container;
pub mod error;
pub mod header;
pub mod integrity;
pub mod pipable;
pub mod reader;
pub mod resource;
pub mod writer;
pub mod xml;

pub use blob::{BlobDescriptor, BlobLocation, BlobTable};
pub use compression::CompressionType;
pub use container::{OpenContainer, DEFAULT_COMPRESSION};
pub use error::{FormatError, FormatResult};
pub use header::{WimFlags, WimHeader};
pub use reader::ResourceReader;
pub use resource::{ResourceDescriptor, ResourceFlags, ResourceHeader};
pub use writer::{compress_simple_resource, compress_solid_resource, write_resource};

use sha1::{Digest, Sha1};

/// A SHA-1 digest, used as the content-addressing key for every blob.
pub type Hash = [u8; 20];

/// The all-zero hash that stands for "no blob; this stream is empty".
pub const ZERO_HASH: Hash = [0u8; 20];

/// Computes the SHA-1 digest of a byte sequence.
///
/// This is the single place that names the process-wide SHA-1 backend
///; every
/// other piece of the crate calls through this function instead of
/// instantiating `Sha1` directly.
pub fn sha1_hash(data: &[u8]) -> Hash {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// An incremental SHA-1 hasher, for streaming hash-as-you-read of
/// unhashed blobs.
#[derive(Default)]
pub struct StreamingHasher(Sha1);

impl StreamingHasher {
    /// Creates a fresh hasher.
    pub fn new() -> Self {
        Self(Sha1::new())
    }

    /// Feeds more bytes into the hash.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finalizes the hash.
    pub fn finish(self) -> Hash {
        self.0.finalize().into()
    }
}
