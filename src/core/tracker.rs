//! Pointer identity assignment for drivers that do not report tracking ids.
//!
//! Downstream consumers key gesture state off pointer ids, so when the
//! driver is silent the reader has to decide which pointer in this frame is
//! the "same finger" as one in the previous frame. The strategy is
//! injectable; the default matches by proximity.

use crate::core::bits::BitSet32;
use crate::core::codes::MAX_POINTER_ID;
use crate::core::device::touch::TouchData;

/// Strategy that rewrites `current`'s ids so each pointer keeps the id it
/// carried in `last` when it is plausibly the same finger.
///
/// Implementations must be deterministic and must leave `id_bits`,
/// `id_to_index`, and every `pointers[..].id` mutually consistent, with all
/// ids in `0..=MAX_POINTER_ID`.
pub trait PointerTracker: Send + Sync {
    fn assign_ids(&self, current: &mut TouchData, last: &TouchData);
}

/// Default tracker: greedy nearest-neighbor matching.
///
/// Candidate pairs are ordered by squared (x, y) distance, ties broken by
/// pressure-and-size similarity and then by slot order, and consumed
/// greedily so each last-frame id is handed to at most one current pointer.
/// Unmatched pointers receive the lowest id not already in use this frame.
#[derive(Debug, Default)]
pub struct ProximityTracker;

struct Candidate {
    distance_sq: i64,
    similarity: i64,
    current_index: usize,
    last_id: u32,
}

impl PointerTracker for ProximityTracker {
    fn assign_ids(&self, current: &mut TouchData, last: &TouchData) {
        current.id_bits.clear();
        if current.pointer_count == 0 {
            return;
        }

        let mut candidates = Vec::with_capacity(current.pointer_count * last.pointer_count);
        let mut last_ids = last.id_bits;
        while !last_ids.is_empty() {
            let last_id = last_ids.first_marked_bit();
            last_ids.clear_bit(last_id);
            let last_pointer = &last.pointers[last.id_to_index[last_id as usize]];

            for current_index in 0..current.pointer_count {
                let pointer = &current.pointers[current_index];
                let dx = (pointer.x - last_pointer.x) as i64;
                let dy = (pointer.y - last_pointer.y) as i64;
                let similarity = (pointer.pressure - last_pointer.pressure).abs() as i64
                    + (pointer.size - last_pointer.size).abs() as i64;
                candidates.push(Candidate {
                    distance_sq: dx * dx + dy * dy,
                    similarity,
                    current_index,
                    last_id,
                });
            }
        }

        candidates.sort_by_key(|c| (c.distance_sq, c.similarity, c.current_index, c.last_id));

        let mut matched_current = 0u32;
        let mut used_ids = BitSet32::new();
        for candidate in &candidates {
            if matched_current & (1 << candidate.current_index) != 0
                || used_ids.has_bit(candidate.last_id)
            {
                continue;
            }
            matched_current |= 1 << candidate.current_index;
            used_ids.mark_bit(candidate.last_id);
            current.assign_id(candidate.current_index, candidate.last_id);
        }

        // Pointers with no plausible predecessor take the lowest free id.
        for current_index in 0..current.pointer_count {
            if matched_current & (1 << current_index) != 0 {
                continue;
            }
            let mut id = 0;
            while id <= MAX_POINTER_ID && used_ids.has_bit(id) {
                id += 1;
            }
            debug_assert!(id <= MAX_POINTER_ID);
            used_ids.mark_bit(id);
            current.assign_id(current_index, id);
        }
    }
}
