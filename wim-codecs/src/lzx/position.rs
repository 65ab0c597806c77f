//! LZX position-slot tables.
//!
//! Position slots 0, 1 and 2 are reserved as "use recent offset N"
//! signals; slot >= 3 carries `footer_bits(slot)` extra raw bits that,
//! added to `base_position(slot)`, give a distance (after subtracting 2 to
//! account for the three reserved slots).

/// Number of extra bits following a position-slot symbol with this slot id.
pub fn footer_bits(slot: u32) -> u32 {
    if slot < 4 {
        0
    } else {
        (slot - 2) / 2
    }
}

/// The smallest distance value represented by a given position slot,
/// before the footer bits and the `-2` reserved-slot adjustment.
pub fn base_position(slot: u32) -> u32 {
    let mut base = 0u32;
    for s in 0..slot {
        base += 1 << footer_bits(s);
    }
    base
}

/// The number of position slots needed to address every distance up to
/// `window_size` (exclusive), given the `-2` adjustment used to turn a
/// slot+footer pair into an actual match distance.
pub fn num_position_slots(window_size: usize) -> u32 {
    let mut slot = 3u32;
    loop {
        let max_for_slot = base_position(slot + 1).saturating_sub(2);
        if (max_for_slot as usize) >= window_size.saturating_sub(1) {
            return slot + 1;
        }
        slot += 1;
        if slot > 512 {
            // Defensive bound; no realistic window size needs this many.
            return slot;
        }
    }
}

/// Converts a position slot and raw footer bits into a match distance.
/// The caller must have already handled slots 0..2 as recent-offset
/// signals; this is only valid for `slot >= 3`.
pub fn slot_and_footer_to_distance(slot: u32, footer: u32) -> u32 {
    debug_assert!(slot >= 3);
    base_position(slot) + footer - 2
}

/// Finds the position slot and footer-bit value for an explicit match
/// distance (`distance >= 1`).
pub fn distance_to_slot_and_footer(distance: u32) -> (u32, u32) {
    debug_assert!(distance >= 1);
    let target = distance + 2;
    let mut slot = 3u32;
    loop {
        let lo = base_position(slot);
        let hi = base_position(slot + 1);
        if target >= lo && target < hi {
            return (slot, target - lo);
        }
        slot += 1;
        if slot > 512 {
            // Should never happen for in-range distances.
            return (slot, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_footer_bits_prefix() {
        let expected = [0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4];
        for (slot, &fb) in expected.iter().enumerate() {
            assert_eq!(footer_bits(slot as u32), fb);
        }
    }

    #[test]
    fn known_base_position_prefix() {
        let expected = [0, 1, 2, 3, 4, 6, 8, 12, 16, 24, 32, 48];
        for (slot, &bp) in expected.iter().enumerate() {
            assert_eq!(base_position(slot as u32), bp);
        }
    }

    #[test]
    fn distance_roundtrip() {
        for distance in [1u32, 2, 3, 4, 5, 100, 4096, 32767] {
            let (slot, footer) = distance_to_slot_and_footer(distance);
            assert!(footer < (1 << footer_bits(slot)));
            assert_eq!(slot_and_footer_to_distance(slot, footer), distance);
        }
    }

    #[test]
    fn slot_count_covers_window() {
        let slots = num_position_slots(32768);
        let max_distance = base_position(slots) + (1 << footer_bits(slots - 1)) - 1 - 2;
        assert!(max_distance as usize >= 32767);
    }
}
