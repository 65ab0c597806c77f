//! A content-addressed, image-oriented archive library for the Windows
//! Imaging Format (WIM): open/create containers, capture and extract
//! images, append/rebuild/compact writes, and split/join/export across
//! spanned sets.
//!
//! This crate owns everything a WIM *image* needs that the bare container
//! format does not: directory trees, security descriptors, per-image XML
//! records, the write orchestrator that turns a set of images into
//! on-disk resources, and split/join/export across spanned sets. It
//! drives [`wim_format`]'s resource engine and blob table the way any
//! other blob consumer would.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod blob_set;
pub mod compressor;
pub mod config;
pub mod container;
pub mod error;
pub mod export;
pub mod flags;
pub mod join;
pub mod lock;
pub mod metadata;
pub mod progress;
pub mod scanner;
pub mod split;
mod write;

pub use container::{ImageSelector, Wim};
pub use error::Error;
pub use flags::{OpenFlags, WriteFlags};
pub use metadata::{Dentry, FileAttributes, ImageMetadata, StreamEntry};
pub use progress::{CancellationState, NullProgress, ProgressCallback, ProgressMsg};
pub use scanner::{ByteSource, CaptureConfig, InMemorySource, MemoryScanner, ScannedEntry, ScannedStream, ScannerSource};

pub use wim_format::CompressionType;
