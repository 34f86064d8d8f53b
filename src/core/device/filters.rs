//! Touch stream conditioning: glitch suppression and smoothing applied to
//! the normalized frame before virtual-key handling and dispatch.
//!
//! All three filters are deterministic. The bounce and jump filters rewrite
//! pointer data and therefore invalidate driver-supplied ids for the frame;
//! the averaging filter runs after id assignment and never changes ids.

use crate::core::codes::MAX_POINTER_ID;
use crate::core::device::touch::TouchScreenState;

/// Fraction of an axis range a pointer may credibly travel in one frame.
/// Anything larger is treated as a sensor glitch by the bounce filter.
const BOUNCE_SLOP_DIVISOR: i32 = 4;

/// Consecutive frames the jump filter may replay while debouncing a
/// pointer-count flicker.
const JUMP_TRANSITION_DROP_LIMIT: u32 = 3;

/// Samples retained per pointer id for position smoothing.
const AVERAGING_HISTORY_SIZE: usize = 5;

/// Raw-coordinate travel beyond which a sample restarts its smoothing
/// history instead of being averaged into it.
const AVERAGING_DISTANCE_LIMIT: i64 = 75;

/// Debounce state for the jump filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct JumpFilterState {
    transition_drops: u32,
}

impl JumpFilterState {
    pub fn reset(&mut self) {
        self.transition_drops = 0;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct AveragingSlot {
    count: usize,
    next: usize,
    x: [i32; AVERAGING_HISTORY_SIZE],
    y: [i32; AVERAGING_HISTORY_SIZE],
}

impl AveragingSlot {
    fn restart(&mut self, x: i32, y: i32) {
        self.x[0] = x;
        self.y[0] = y;
        self.count = 1;
        self.next = 1 % AVERAGING_HISTORY_SIZE;
    }

    fn push(&mut self, x: i32, y: i32) {
        self.x[self.next] = x;
        self.y[self.next] = y;
        self.next = (self.next + 1) % AVERAGING_HISTORY_SIZE;
        if self.count < AVERAGING_HISTORY_SIZE {
            self.count += 1;
        }
    }

    fn mean(&self) -> (i32, i32) {
        let mut sum_x: i64 = 0;
        let mut sum_y: i64 = 0;
        for i in 0..self.count {
            sum_x += self.x[i] as i64;
            sum_y += self.y[i] as i64;
        }
        ((sum_x / self.count as i64) as i32, (sum_y / self.count as i64) as i32)
    }
}

/// Per-pointer-id smoothing histories for the averaging filter.
#[derive(Debug, Clone, Copy)]
pub struct AveragingFilterState {
    slots: [AveragingSlot; MAX_POINTER_ID as usize + 1],
}

impl Default for AveragingFilterState {
    fn default() -> Self {
        Self {
            slots: [AveragingSlot::default(); MAX_POINTER_ID as usize + 1],
        }
    }
}

impl AveragingFilterState {
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.count = 0;
            slot.next = 0;
        }
    }
}

impl TouchScreenState {
    /// Suppress single-frame position spikes.
    ///
    /// When the pointer count is stable but a pointer's inter-frame travel
    /// exceeds what one frame can credibly cover, the stale last-frame
    /// sample is rewritten to the current position so no motion is
    /// synthesized from the glitch. Returns true when any sample was
    /// rewritten, which invalidates driver ids for the frame.
    pub fn apply_bounce_filter(&mut self) -> bool {
        if self.current_touch.pointer_count != self.last_touch.pointer_count
            || self.current_touch.pointer_count == 0
        {
            return false;
        }

        let (x_slop, y_slop) = match (&self.params.x_axis, &self.params.y_axis) {
            (Some(x_axis), Some(y_axis)) => (
                (x_axis.range() / BOUNCE_SLOP_DIVISOR).max(1),
                (y_axis.range() / BOUNCE_SLOP_DIVISOR).max(1),
            ),
            // Unknown geometry: no credible travel bound exists.
            _ => return false,
        };

        let mut applied = false;
        for index in 0..self.current_touch.pointer_count {
            let current = &self.current_touch.pointers[index];
            let last = &mut self.last_touch.pointers[index];
            if (current.x - last.x).abs() > x_slop || (current.y - last.y).abs() > y_slop {
                tracing::debug!(
                    "Touch bounce: pointer index {} leapt ({}, {}) -> ({}, {}), rewriting history",
                    index,
                    last.x,
                    last.y,
                    current.x,
                    current.y
                );
                last.x = current.x;
                last.y = current.y;
                applied = true;
            }
        }
        applied
    }

    /// Debounce spurious pointer-count flicker.
    ///
    /// A transition between two nonzero pointer counts is replayed from the
    /// previous frame for up to [`JUMP_TRANSITION_DROP_LIMIT`] consecutive
    /// frames; a transition that persists longer is accepted as real.
    /// Transitions to or from zero pointers always pass (gesture start and
    /// end must not be delayed). Returns true when the frame was replaced.
    pub fn apply_jump_filter(&mut self) -> bool {
        let current_count = self.current_touch.pointer_count;
        let last_count = self.last_touch.pointer_count;

        if current_count == last_count || current_count == 0 || last_count == 0 {
            self.jump_filter.transition_drops = 0;
            return false;
        }

        if self.jump_filter.transition_drops < JUMP_TRANSITION_DROP_LIMIT {
            self.jump_filter.transition_drops += 1;
            tracing::debug!(
                "Touch jump: pointer count {} -> {}, replaying previous frame ({}/{})",
                last_count,
                current_count,
                self.jump_filter.transition_drops,
                JUMP_TRANSITION_DROP_LIMIT
            );
            self.current_touch.copy_from(&self.last_touch);
            return true;
        }

        self.jump_filter.transition_drops = 0;
        false
    }

    /// Smooth pointer positions over a short per-id history.
    ///
    /// A sample within [`AVERAGING_DISTANCE_LIMIT`] raw units of the running
    /// average is folded into the history window and replaced by the window
    /// mean; a sample beyond it restarts the history (fast motion must not
    /// be lagged). Requires valid ids, so it runs after id assignment.
    pub fn apply_averaging_filter(&mut self) {
        let mut ids = self.current_touch.id_bits;
        while !ids.is_empty() {
            let id = ids.first_marked_bit();
            ids.clear_bit(id);

            let index = self.current_touch.id_to_index[id as usize];
            let pointer = &mut self.current_touch.pointers[index];
            let slot = &mut self.averaging_filter.slots[id as usize];

            if self.last_touch.id_bits.has_bit(id) && slot.count > 0 {
                let (mean_x, mean_y) = slot.mean();
                let dx = (pointer.x - mean_x) as i64;
                let dy = (pointer.y - mean_y) as i64;
                if dx * dx + dy * dy <= AVERAGING_DISTANCE_LIMIT * AVERAGING_DISTANCE_LIMIT {
                    slot.push(pointer.x, pointer.y);
                    let (mean_x, mean_y) = slot.mean();
                    pointer.x = mean_x;
                    pointer.y = mean_y;
                } else {
                    slot.restart(pointer.x, pointer.y);
                }
            } else {
                slot.restart(pointer.x, pointer.y);
            }
        }
    }
}
