//! The public error taxonomy: a closed enum every public entry point
//! returns, so a CLI wrapper can map errors to exit codes without ever
//! downcasting an opaque `anyhow::Error` itself.
//!
//! Internally, this crate (like `wim-format` and `wim-codecs`) propagates
//! `anyhow::Error` through its helpers. [`Error::classify`] is the single
//! place that turns one of those into a member of this enum, by
//! downcasting into the lower crates' own typed errors where possible.

use wim_codecs::CodecError;
use wim_format::FormatError;

/// The library's closed, public error type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wraps a `std::io::Error` from a failed file operation.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The file does not start with a recognized WIM magic.
    #[error("not a WIM file")]
    NotAWim,
    /// The header's version field is not understood.
    #[error("unsupported WIM version")]
    UnknownVersion,
    /// A structural problem in the header, a resource header, the blob
    /// table, or the XML metadata resource.
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    /// An invalid chunk size was encountered.
    #[error("invalid chunk size")]
    InvalidChunkSize,
    /// An unrecognized compression-type code was encountered.
    #[error("invalid compression type")]
    InvalidCompressionType,
    /// The integrity table is structurally invalid.
    #[error("invalid integrity table")]
    InvalidIntegrityTable,
    /// A blob-table entry is structurally invalid.
    #[error("invalid blob table entry")]
    InvalidLookupTableEntry,
    /// The XML metadata resource is not well-formed WIM XML.
    #[error("invalid metadata resource: {0}")]
    InvalidMetadataResource(String),
    /// A resource's bytes did not hash to its recorded blob hash.
    #[error("resource hash mismatch")]
    InvalidResourceHash,
    /// A security descriptor failed validation.
    #[error("invalid security data")]
    InvalidSecurityData,
    /// A chunk failed to decompress.
    #[error("decompression failed: {0}")]
    Decompression(CodecError),
    /// The file ended before an expected structure.
    #[error("unexpected end of file")]
    UnexpectedEof,
    /// A caller-supplied parameter or flag combination is invalid.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),
    /// A requested image does not exist.
    #[error("invalid image index or name")]
    InvalidImage,
    /// An image name collides with one already present.
    #[error("image name already in use")]
    ImageNameCollision,
    /// An image-count-related invariant was violated (e.g. deleting the
    /// only image from a container that must keep at least one).
    #[error("invalid image count")]
    ImageCount,
    /// A requested resource, blob, or chunk could not be located.
    #[error("resource not found")]
    NotFound,
    /// Split output naming or part sizing was invalid.
    #[error("invalid split parameters")]
    SplitInvalid,
    /// The requested split/join combination is not supported.
    #[error("unsupported split/join operation")]
    SplitUnsupported,
    /// A pipable-only operation was requested on a non-pipable container.
    #[error("container is not pipable")]
    NotPipable,
    /// A pipable WIM failed to parse as a pipable WIM.
    #[error("invalid pipable WIM")]
    InvalidPipableWim,
    /// A write was attempted on a handle opened read-only.
    #[error("WIM is read-only")]
    WimIsReadonly,
    /// The container's advisory lock is already held.
    #[error("container is already locked")]
    AlreadyLocked,
    /// Integrity verification found a mismatched chunk digest.
    #[error("integrity check failed")]
    Integrity,
    /// The operation was cancelled by the progress callback.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Classifies an opaque `anyhow::Error` raised by a lower crate into
    /// this enum, downcasting into [`FormatError`] or [`CodecError`] where
    /// possible and falling back to [`Error::Io`]/a generic message
    /// otherwise.
    pub fn classify(err: anyhow::Error) -> Self {
        if let Some(fmt_err) = err.downcast_ref::<FormatError>() {
            return match fmt_err {
                FormatError::NotAWim => Error::NotAWim,
                FormatError::UnknownVersion(_) => Error::UnknownVersion,
                FormatError::InvalidHeader(msg) => Error::InvalidHeader(msg.to_string()),
                FormatError::InvalidChunkSize(_) => Error::InvalidChunkSize,
                FormatError::InvalidCompressionType(_) => Error::InvalidCompressionType,
                FormatError::InvalidIntegrityTable(_) => Error::InvalidIntegrityTable,
                FormatError::InvalidBlobTableEntry(_, _) => Error::InvalidLookupTableEntry,
                FormatError::InvalidMetadataResource(msg) => Error::InvalidMetadataResource(msg.clone()),
                FormatError::InvalidResourceHash => Error::InvalidResourceHash,
                FormatError::Decompression(_) => Error::UnexpectedEof,
                FormatError::UnexpectedEof => Error::UnexpectedEof,
                FormatError::NotFound => Error::NotFound,
                FormatError::IntegrityMismatch(_) => Error::Integrity,
                FormatError::Io(_) => Error::Io(std::io::Error::new(std::io::ErrorKind::Other, err.to_string())),
            };
        }
        if let Some(codec_err) = err.downcast_ref::<CodecError>() {
            return Error::Decompression(codec_err.clone());
        }
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            return Error::Io(std::io::Error::new(io_err.kind(), io_err.to_string()));
        }
        Error::InvalidParam(err.to_string())
    }

    /// Maps this error to a CLI exit code: `0` success (never returned
    /// from here), `1` caller-visible library error, `2` usage error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidParam(_)
            | Error::InvalidImage
            | Error::ImageNameCollision
            | Error::ImageCount
            | Error::SplitInvalid
            | Error::SplitUnsupported
            | Error::NotPipable
            | Error::WimIsReadonly => 2,
            _ => 1,
        }
    }
}

/// The result type used throughout this crate's internal fallible
/// helpers, matching the rest of the workspace's `anyhow`-everywhere
/// style; [`Error`] is reconstructed from this only at public API
/// boundaries.
pub type Result<T> = anyhow::Result<T>;
