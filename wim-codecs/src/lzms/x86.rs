//! x86 call-instruction postprocessing for LZMS chunks, the same family of
//! transform as [`crate::lzx::e8`] but with a history-bucketed gate: each
//! bucket of call sites tracks how often a translation at that bucket has
//! recently looked "plausible", and the filter only acts on
//! buckets that currently look active. This lets the filter skip over
//! regions of a chunk that are not x86 code without a separate format flag.
//!
//! Buckets are keyed by the call site's **position** in the chunk
//! (`(pos >> 12) & (NUM_BUCKETS - 1)`), not by the bytes found at the call
//! site. An earlier draft of this filter tried to bucket by the would-be
//! absolute call target recovered from the 4 bytes following the `0xE8`
//! opcode, but that is not invertible: at decode time, before the inverse
//! transform runs, those bytes may hold either the original relative
//! displacement or the previously-written absolute target depending on
//! whether an enclosing bucket was active, so the encoder and decoder would
//! not always agree on which bucket a given call site falls in. Position is
//! available identically on both sides regardless of transform state.

const NUM_BUCKETS: usize = 256;
const BUCKET_SHIFT: u32 = 12;

/// Size of the chunk window within which a translated target must land for
/// a site to be treated as a real call (mirrors LZX's `FILTER_SPAN`, though
/// LZMS applies no such span restriction upstream beyond requiring the
/// decoded target to fit in 32 bits after translation).
const MIN_ACTIVATIONS_TO_STAY_ON: i32 = -4;

/// Tracks recent hit/miss history per position bucket, gating whether the
/// filter treats a given `0xE8` site as a genuine call.
struct BucketHistory {
    counters: [i32; NUM_BUCKETS],
}

impl BucketHistory {
    fn new() -> Self {
        Self { counters: [0; NUM_BUCKETS] }
    }

    fn bucket_of(pos: usize) -> usize {
        (pos >> BUCKET_SHIFT) % NUM_BUCKETS
    }

    fn is_active(&self, pos: usize) -> bool {
        self.counters[Self::bucket_of(pos)] >= MIN_ACTIVATIONS_TO_STAY_ON
    }

    fn record(&mut self, pos: usize, plausible: bool) {
        let c = &mut self.counters[Self::bucket_of(pos)];
        if plausible {
            *c = (*c + 1).min(16);
        } else {
            *c -= 1;
        }
    }
}

fn is_plausible_target(target: i32) -> bool {
    target >= -(16 * 1024 * 1024) && target <= 16 * 1024 * 1024
}

/// Applies the forward (compress-time) x86 transform in place: active-bucket
/// `0xE8` call sites have their relative displacement rewritten to an
/// absolute chunk offset.
pub fn encode(data: &mut [u8]) {
    let mut history = BucketHistory::new();
    let mut i = 0usize;
    while i + 5 <= data.len() {
        if data[i] == 0xE8 {
            let rel = i32::from_le_bytes([data[i + 1], data[i + 2], data[i + 3], data[i + 4]]);
            let active = history.is_active(i);
            if active {
                let abs = rel.wrapping_add(i as i32 + 5);
                let plausible = is_plausible_target(abs);
                if plausible {
                    data[i + 1..i + 5].copy_from_slice(&abs.to_le_bytes());
                }
                history.record(i, plausible);
            } else {
                history.record(i, is_plausible_target(rel));
            }
            i += 5;
        } else {
            i += 1;
        }
    }
}

/// Inverts [`encode`].
pub fn decode(data: &mut [u8]) {
    let mut history = BucketHistory::new();
    let mut i = 0usize;
    while i + 5 <= data.len() {
        if data[i] == 0xE8 {
            let stored = i32::from_le_bytes([data[i + 1], data[i + 2], data[i + 3], data[i + 4]]);
            let active = history.is_active(i);
            if active {
                let plausible = is_plausible_target(stored);
                if plausible {
                    let rel = stored.wrapping_sub(i as i32 + 5);
                    data[i + 1..i + 5].copy_from_slice(&rel.to_le_bytes());
                }
                history.record(i, plausible);
            } else {
                history.record(i, is_plausible_target(stored));
            }
            i += 5;
        } else {
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_is_untouched() {
        let mut data = Vec::new();
        encode(&mut data);
        assert!(data.is_empty());
    }

    #[test]
    fn no_call_opcodes_means_no_change() {
        let mut data = vec![0x90u8; 64];
        let original = data.clone();
        encode(&mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn roundtrips_on_data_with_call_instructions() {
        let mut data = vec![0x90u8; 4096];
        // Plant several 0xE8 call sites with small, plausible relative
        // displacements, repeated so the position bucket activates.
        for block in 0..6 {
            let pos = block * 32;
            data[pos] = 0xE8;
            let rel: i32 = 100 + block as i32;
            data[pos + 1..pos + 5].copy_from_slice(&rel.to_le_bytes());
        }
        let original = data.clone();
        encode(&mut data);
        decode(&mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn roundtrips_on_incompressible_random_like_data() {
        let mut data = Vec::with_capacity(2048);
        let mut seed = 12345u32;
        for _ in 0..2048 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            data.push((seed >> 16) as u8);
        }
        let original = data.clone();
        encode(&mut data);
        decode(&mut data);
        assert_eq!(data, original);
    }
}
