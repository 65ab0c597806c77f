//! The format-layer error taxonomy.
//!
//! These are the errors that can arise from the bytes of a WIM file being
//! structurally wrong, as opposed to I/O failures or codec-level corruption
//! (which are wrapped as their own variants so the `wim` crate's public
//! `Error` enum can classify them without downcasting an opaque
//! `anyhow::Error`).

use thiserror::Error;

/// A structural or semantic problem with the bytes of a WIM container.
#[derive(Error, Debug)]
pub enum FormatError {
    /// The file does not start with a recognized WIM magic.
    #[error("not a WIM file")]
    NotAWim,
    /// The header's version field is not one this crate understands.
    #[error("unsupported WIM version: 0x{0:08x}")]
    UnknownVersion(u32),
    /// The header failed a structural sanity check.
    #[error("invalid WIM header: {0}")]
    InvalidHeader(&'static str),
    /// A resource's chunk size was zero, not a power of two, or otherwise
    /// nonsensical.
    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(u32),
    /// The header's compression-algorithm code is not recognized.
    #[error("invalid compression type code: {0}")]
    InvalidCompressionType(u8),
    /// The integrity table failed to parse.
    #[error("invalid integrity table: {0}")]
    InvalidIntegrityTable(&'static str),
    /// A blob-table entry failed a structural or ordering check.
    #[error("invalid blob table entry at index {0}: {1}")]
    InvalidBlobTableEntry(usize, &'static str),
    /// The XML metadata resource failed to parse as WIM XML.
    #[error("invalid metadata resource: {0}")]
    InvalidMetadataResource(String),
    /// A resource's computed hash did not match its recorded blob hash.
    #[error("resource hash mismatch")]
    InvalidResourceHash,
    /// A chunk failed to decompress.
    #[error("decompression failed: {0}")]
    Decompression(#[from] wim_codecs::CodecError),
    /// The file ended before a structure that was supposed to be there.
    #[error("unexpected end of file")]
    UnexpectedEof,
    /// A requested resource, blob, or chunk could not be located.
    #[error("resource not found")]
    NotFound,
    /// Integrity verification found a mismatched chunk digest.
    #[error("integrity check failed at chunk {0}")]
    IntegrityMismatch(u64),
    /// An I/O error from the underlying file.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The result type used throughout this crate's fallible operations.
///
/// Internal helpers return plain `anyhow::Result`, matching the rest of
/// this workspace's style; [`FormatError`] is used only where a caller
/// needs a *typed* error to classify (the `wim` crate's public `Error`
/// enum downcasts an `anyhow::Error` via `err.downcast_ref::<FormatError>()`
/// at its API boundary).
pub type FormatResult<T> = anyhow::Result<T>;
