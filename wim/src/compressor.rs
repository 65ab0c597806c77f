//! The chunk-compressor capability object: the sole source of CPU
//! parallelism in the write orchestrator.
//!
//! Chunks are submitted in order and compressed results are retrieved in
//! the same order they were submitted, regardless of which worker thread
//! finished first.

use std::collections::{BinaryHeap, VecDeque};
use std::cmp::Reverse;

use wim_codecs::CompressionFormat;
use wim_format::CompressionType;

/// One compressed chunk, alongside the uncompressed length the reader
/// needs to size its decompression buffer.
pub struct CompressedChunk {
    /// Compressed bytes, or a verbatim copy of the input when compression
    /// did not shrink it.
    pub data: Vec<u8>,
    /// Length of the chunk before compression.
    pub uncompressed_len: usize,
}

/// A capability object that turns a stream of uncompressed chunks into a
/// stream of [`CompressedChunk`]s, in submission order.
pub trait ChunkCompressor: Send {
    /// Number of worker threads backing this compressor (1 for
    /// [`SerialCompressor`]).
    fn num_threads(&self) -> usize;

    /// Submits one uncompressed chunk. May block if the compressor's
    /// internal queue is full (backpressure).
    fn submit(&mut self, chunk: Vec<u8>);

    /// Returns the next compressed chunk if one is ready, without
    /// blocking.
    fn try_recv(&mut self) -> Option<CompressedChunk>;

    /// Blocks until every chunk submitted so far has been compressed and
    /// retrieved, returning them in submission order.
    fn finish(&mut self) -> Vec<CompressedChunk>;
}

fn compress_one(compression: CompressionType, chunk: &[u8]) -> CompressedChunk {
    if !compression.is_compressed() {
        return CompressedChunk {
            data: chunk.to_vec(),
            uncompressed_len: chunk.len(),
        };
    }
    let mut compressor = compression.new_compressor();
    let mut out = Vec::with_capacity(compressor.bound(chunk.len()));
    compressor.compress(chunk, &mut out);
    if out.len() >= chunk.len() {
        CompressedChunk {
            data: chunk.to_vec(),
            uncompressed_len: chunk.len(),
        }
    } else {
        CompressedChunk {
            data: out,
            uncompressed_len: chunk.len(),
        }
    }
}

/// A compressor that does all work on the calling thread, one chunk at a
/// time.
pub struct SerialCompressor {
    compression: CompressionType,
    ready: VecDeque<CompressedChunk>,
}

impl SerialCompressor {
    /// Creates a serial compressor for `compression`.
    pub fn new(compression: CompressionType) -> Self {
        Self {
            compression,
            ready: VecDeque::new(),
        }
    }
}

impl ChunkCompressor for SerialCompressor {
    fn num_threads(&self) -> usize {
        1
    }

    fn submit(&mut self, chunk: Vec<u8>) {
        self.ready.push_back(compress_one(self.compression, &chunk));
    }

    fn try_recv(&mut self) -> Option<CompressedChunk> {
        self.ready.pop_front()
    }

    fn finish(&mut self) -> Vec<CompressedChunk> {
        self.ready.drain(..).collect()
    }
}

struct IndexedChunk {
    index: u64,
    chunk: CompressedChunk,
}

/// A compressor backed by a `rayon` thread pool: worker threads pull
/// chunks off a bounded `crossbeam-channel` queue, compress them, and push
/// results (tagged with their submission index) onto a second queue; this
/// compressor reorders results back into submission order before handing
/// them to the caller.
pub struct ParallelCompressor {
    pool: rayon::ThreadPool,
    compression: CompressionType,
    work_tx: crossbeam_channel::Sender<(u64, Vec<u8>)>,
    result_rx: crossbeam_channel::Receiver<IndexedChunk>,
    next_submit: u64,
    next_expected: u64,
    reorder_buffer: BinaryHeap<Reverse<HeapEntry>>,
    in_flight: usize,
    num_threads: usize,
}

struct HeapEntry(IndexedChunk);

impl Eq for HeapEntry {}
impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.index == other.0.index
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.index.cmp(&other.0.index)
    }
}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl ParallelCompressor {
    /// Builds a parallel compressor with `num_threads` workers and a queue
    /// depth of `2 * num_threads`.
    pub fn new(compression: CompressionType, num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let queue_depth = 2 * num_threads;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .expect("failed to build chunk-compressor thread pool");

        let (work_tx, work_rx) = crossbeam_channel::bounded::<(u64, Vec<u8>)>(queue_depth);
        let (result_tx, result_rx) = crossbeam_channel::bounded::<IndexedChunk>(queue_depth);

        for _ in 0..num_threads {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            pool.spawn(move || {
                while let Ok((index, chunk)) = work_rx.recv() {
                    let compressed = compress_one(compression, &chunk);
                    if result_tx.send(IndexedChunk { index, chunk: compressed }).is_err() {
                        break;
                    }
                }
            });
        }

        Self {
            pool,
            compression,
            work_tx,
            result_rx,
            next_submit: 0,
            next_expected: 0,
            reorder_buffer: BinaryHeap::new(),
            in_flight: 0,
            num_threads,
        }
    }

    fn drain_ready_into_buffer(&mut self, blocking: bool) {
        loop {
            let received = if blocking && self.in_flight > 0 {
                self.result_rx.recv().ok()
            } else {
                self.result_rx.try_recv().ok()
            };
            match received {
                Some(indexed) => {
                    self.in_flight -= 1;
                    self.reorder_buffer.push(Reverse(HeapEntry(indexed)));
                    if !blocking {
                        break;
                    }
                }
                None => break,
            }
            if blocking {
                // Stop once the chunk we actually need has arrived.
                if let Some(Reverse(top)) = self.reorder_buffer.peek() {
                    if top.0.index == self.next_expected {
                        break;
                    }
                }
            }
        }
    }

    fn pop_next_in_order(&mut self) -> Option<CompressedChunk> {
        if let Some(Reverse(top)) = self.reorder_buffer.peek() {
            if top.0.index == self.next_expected {
                let Reverse(entry) = self.reorder_buffer.pop().unwrap();
                self.next_expected += 1;
                return Some(entry.0.chunk);
            }
        }
        None
    }
}

impl ChunkCompressor for ParallelCompressor {
    fn num_threads(&self) -> usize {
        self.num_threads
    }

    fn submit(&mut self, chunk: Vec<u8>) {
        let index = self.next_submit;
        self.next_submit += 1;
        self.in_flight += 1;
        // `send` blocks once the bounded queue is full, which is this
        // compressor's backpressure.
        if self.work_tx.send((index, chunk)).is_err() {
            panic!("chunk-compressor worker pool terminated unexpectedly");
        }
    }

    fn try_recv(&mut self) -> Option<CompressedChunk> {
        self.drain_ready_into_buffer(false);
        self.pop_next_in_order()
    }

    fn finish(&mut self) -> Vec<CompressedChunk> {
        let mut out = Vec::new();
        while self.next_expected < self.next_submit {
            self.drain_ready_into_buffer(true);
            while let Some(chunk) = self.pop_next_in_order() {
                out.push(chunk);
            }
        }
        out
    }
}

/// Resolves a [`ChunkCompressor`] from a `write(..., num_threads)` value:
/// `1` selects [`SerialCompressor`], anything greater selects
/// [`ParallelCompressor`]; `0` means "use all available cores".
pub fn make_compressor(compression: CompressionType, num_threads: usize) -> Box<dyn ChunkCompressor> {
    let resolved = if num_threads == 0 {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    } else {
        num_threads
    };
    if resolved <= 1 {
        Box::new(SerialCompressor::new(compression))
    } else {
        Box::new(ParallelCompressor::new(compression, resolved))
    }
}

/// Unused outside this module but kept to document the codec-format
/// mapping this compressor relies on existing for every [`CompressionType`].
#[allow(dead_code)]
fn _assert_format_mapping_exists(c: CompressionType) -> CompressionFormat {
    c.to_codec_format()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_compressor_preserves_order() {
        let mut c = SerialCompressor::new(CompressionType::None);
        for i in 0..5u8 {
            c.submit(vec![i; 10]);
        }
        let results = c.finish();
        assert_eq!(results.len(), 5);
        for (i, chunk) in results.iter().enumerate() {
            assert_eq!(chunk.data, vec![i as u8; 10]);
        }
    }

    #[test]
    fn parallel_compressor_preserves_order() {
        let mut c = ParallelCompressor::new(CompressionType::Xpress, 4);
        let chunks: Vec<Vec<u8>> = (0..40u8).map(|i| vec![i; 4096]).collect();
        for chunk in &chunks {
            c.submit(chunk.clone());
        }
        let results = c.finish();
        assert_eq!(results.len(), chunks.len());
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.uncompressed_len, 4096);
            let mut decompressor = CompressionType::Xpress.new_decompressor();
            let mut out = Vec::new();
            let is_raw = result.data.len() == result.uncompressed_len;
            if is_raw {
                assert_eq!(result.data, chunks[i]);
            } else {
                decompressor.decompress(&result.data, result.uncompressed_len, &mut out).unwrap();
                assert_eq!(out, chunks[i]);
            }
        }
    }
}
