//! The progress callback: a tagged union of progress messages, delivered
//! synchronously by whichever operation is running.
//!
//! The callback is invoked from the calling thread (scan, write, extract,
//! split/join all call it directly; the parallel compressor's worker
//! threads never touch it). Returning a non-zero value requests
//! cancellation, checked at the next safe point.

/// One message delivered to a [`ProgressCallback`].
#[derive(Clone, Debug)]
pub enum ProgressMsg {
    /// A directory-tree scan is starting.
    ScanBegin {
        /// Root path being scanned (informational).
        source: String,
    },
    /// One entry was discovered during a scan.
    ScanDentry {
        /// Path of the discovered entry.
        path: String,
    },
    /// A directory-tree scan finished.
    ScanEnd {
        /// Number of entries discovered.
        count: u64,
    },
    /// Blob data is being written; `completed_bytes` is monotonically
    /// non-decreasing within one resource.
    WriteStreams {
        /// Bytes of uncompressed blob data written so far.
        completed_bytes: u64,
        /// Total bytes of uncompressed blob data to write.
        total_bytes: u64,
    },
    /// The integrity table is being verified on open.
    VerifyIntegrity {
        /// Chunks verified so far.
        completed_chunks: u64,
        /// Total chunks to verify.
        total_chunks: u64,
    },
    /// The integrity table is being computed on write.
    CalcIntegrity {
        /// Chunks hashed so far.
        completed_chunks: u64,
        /// Total chunks to hash.
        total_chunks: u64,
    },
    /// Extraction of an image is starting.
    ExtractBegin {
        /// Destination path.
        target: String,
    },
    /// Blob data is being extracted.
    ExtractStreams {
        /// Bytes extracted so far.
        completed_bytes: u64,
        /// Total bytes to extract.
        total_bytes: u64,
    },
    /// One directory entry was extracted.
    ExtractDentry {
        /// Path of the extracted entry.
        path: String,
    },
    /// Timestamps are being applied during extraction.
    ExtractTimestamps,
    /// Extraction of an image finished.
    ExtractEnd {
        /// Destination path.
        target: String,
    },
    /// The output file is being renamed into place (rebuild strategy).
    Rename {
        /// Temporary path.
        from: String,
        /// Final path.
        to: String,
    },
    /// A split part is starting.
    SplitBeginPart {
        /// 1-based part number.
        part_number: u32,
    },
    /// A split part finished.
    SplitEndPart {
        /// 1-based part number.
        part_number: u32,
    },
    /// An update/overwrite command is starting.
    UpdateBeginCommand,
    /// An update/overwrite command finished.
    UpdateEndCommand,
}

/// A progress callback: invoked synchronously with each message; returning
/// `true` requests cancellation of the current top-level operation.
pub trait ProgressCallback {
    /// Handles one progress message. Return `true` to cancel.
    fn on_progress(&mut self, msg: &ProgressMsg) -> bool;
}

impl<F: FnMut(&ProgressMsg) -> bool> ProgressCallback for F {
    fn on_progress(&mut self, msg: &ProgressMsg) -> bool {
        self(msg)
    }
}

/// A callback that never cancels and ignores every message, for callers
/// with no progress UI.
#[derive(Default)]
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn on_progress(&mut self, _msg: &ProgressMsg) -> bool {
        false
    }
}

/// Tracks a cooperative cancellation request raised by a progress callback.
#[derive(Default)]
pub struct CancellationState {
    cancelled: bool,
}

impl CancellationState {
    /// Records a cancellation request.
    pub fn request(&mut self) {
        self.cancelled = true;
    }

    /// `true` once a cancellation request has been recorded.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}
