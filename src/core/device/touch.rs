//! Touch-screen sub-state: frame accumulators for the single- and
//! multi-pointer protocols, the normalized per-frame pointer set, virtual
//! key geometry, and the precalculated coordinate mapping.

use crate::core::bits::BitSet32;
use crate::core::codes::{MAX_POINTERS, MAX_POINTER_ID};
use crate::core::device::filters::{AveragingFilterState, JumpFilterState};
use crate::core::traits::AbsAxisInfo;

/// One normalized pointer in raw touch coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pointer {
    pub id: u32,
    pub x: i32,
    pub y: i32,
    pub pressure: i32,
    pub size: i32,
}

/// The normalized pointer set for one frame.
///
/// Invariant: for every id `i` in `id_bits`, `pointers[id_to_index[i]].id == i`
/// and `id_to_index[i] < pointer_count`. Slots beyond `pointer_count` and
/// mappings for unmarked ids are stale and must not be read.
#[derive(Debug, Clone)]
pub struct TouchData {
    pub pointer_count: usize,
    pub pointers: [Pointer; MAX_POINTERS],
    pub id_to_index: [usize; MAX_POINTER_ID as usize + 1],
    pub id_bits: BitSet32,
}

impl Default for TouchData {
    fn default() -> Self {
        Self {
            pointer_count: 0,
            pointers: [Pointer::default(); MAX_POINTERS],
            id_to_index: [0; MAX_POINTER_ID as usize + 1],
            id_bits: BitSet32::new(),
        }
    }
}

impl TouchData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget all pointers. Slot contents are left stale; only the count and
    /// the id set are authoritative.
    pub fn clear(&mut self) {
        self.pointer_count = 0;
        self.id_bits.clear();
    }

    pub fn copy_from(&mut self, other: &TouchData) {
        self.pointer_count = other.pointer_count;
        self.pointers = other.pointers;
        self.id_to_index = other.id_to_index;
        self.id_bits = other.id_bits;
    }

    /// Record `id` for the pointer at `index`, keeping the id set and the
    /// id-to-index mapping consistent.
    pub fn assign_id(&mut self, index: usize, id: u32) {
        self.pointers[index].id = id;
        self.id_to_index[id as usize] = index;
        self.id_bits.mark_bit(id);
    }
}

// ============================================================================
// Single-touch protocol
// ============================================================================

/// Scratch state absorbing fragmented single-touch events between frame
/// boundaries. `fields` records which members were written this frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleTouchAccumulator {
    pub fields: u32,
    pub btn_touch: bool,
    pub abs_x: i32,
    pub abs_y: i32,
    pub abs_pressure: i32,
    pub abs_tool_width: i32,
}

impl SingleTouchAccumulator {
    pub const FIELD_BTN_TOUCH: u32 = 1 << 0;
    pub const FIELD_ABS_X: u32 = 1 << 1;
    pub const FIELD_ABS_Y: u32 = 1 << 2;
    pub const FIELD_ABS_PRESSURE: u32 = 1 << 3;
    pub const FIELD_ABS_TOOL_WIDTH: u32 = 1 << 4;

    pub fn clear(&mut self) {
        self.fields = 0;
    }

    pub fn is_dirty(&self) -> bool {
        self.fields != 0
    }
}

/// Last applied single-touch values. Axes not present in a frame retain
/// their previous values here.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleTouchValues {
    pub down: bool,
    pub x: i32,
    pub y: i32,
    pub pressure: i32,
    pub size: i32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SingleTouchState {
    pub accumulator: SingleTouchAccumulator,
    pub current: SingleTouchValues,
}

impl SingleTouchState {
    pub fn reset(&mut self) {
        self.accumulator.clear();
        self.current = SingleTouchValues::default();
    }
}

// ============================================================================
// Multi-touch protocol
// ============================================================================

/// Scratch state for one pointer slot of a multi-touch frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiTouchPointer {
    pub fields: u32,
    pub abs_mt_position_x: i32,
    pub abs_mt_position_y: i32,
    pub abs_mt_touch_major: i32,
    pub abs_mt_width_major: i32,
    pub abs_mt_tracking_id: i32,
}

impl MultiTouchPointer {
    pub const FIELD_ABS_MT_POSITION_X: u32 = 1 << 0;
    pub const FIELD_ABS_MT_POSITION_Y: u32 = 1 << 1;
    pub const FIELD_ABS_MT_TOUCH_MAJOR: u32 = 1 << 2;
    pub const FIELD_ABS_MT_WIDTH_MAJOR: u32 = 1 << 3;
    pub const FIELD_ABS_MT_TRACKING_ID: u32 = 1 << 4;

    pub fn clear(&mut self) {
        self.fields = 0;
    }
}

/// Absorbs one multi-touch frame: a pointer boundary marker finalizes the
/// slot at `pointer_count` and opens the next one.
///
/// Carries one slot beyond the pointer cap so an overflowing frame can keep
/// absorbing (and discarding) data without corrupting accepted slots.
#[derive(Debug, Clone, Copy)]
pub struct MultiTouchAccumulator {
    pub pointer_count: usize,
    pub pointers: [MultiTouchPointer; MAX_POINTERS + 1],
}

impl Default for MultiTouchAccumulator {
    fn default() -> Self {
        Self {
            pointer_count: 0,
            pointers: [MultiTouchPointer::default(); MAX_POINTERS + 1],
        }
    }
}

impl MultiTouchAccumulator {
    pub fn clear(&mut self) {
        self.pointer_count = 0;
        self.pointers[0].clear();
    }

    /// A frame is dirty when it finalized at least one pointer, or when the
    /// open slot absorbed data without a pointer boundary. The latter covers
    /// lift-off reports that carry only a zero touch-major packet.
    pub fn is_dirty(&self) -> bool {
        self.pointer_count != 0 || self.pointers[0].fields != 0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MultiTouchState {
    pub accumulator: MultiTouchAccumulator,
}

impl MultiTouchState {
    pub fn reset(&mut self) {
        self.accumulator.clear();
    }
}

// ============================================================================
// Shared touch-screen state
// ============================================================================

/// Axis calibration and filter switches fixed at configuration time.
/// `None` axes are invalid: the driver reported no usable range.
#[derive(Debug, Clone, Copy, Default)]
pub struct TouchParams {
    pub x_axis: Option<AbsAxisInfo>,
    pub y_axis: Option<AbsAxisInfo>,
    pub pressure_axis: Option<AbsAxisInfo>,
    pub size_axis: Option<AbsAxisInfo>,
    pub use_bounce_filter: bool,
    pub use_jump_filter: bool,
    pub use_averaging_filter: bool,
}

/// Cached origin and scale per axis so mapping a pointer is two ops.
#[derive(Debug, Clone, Copy)]
pub struct TouchPrecalculated {
    pub x_origin: i32,
    pub x_scale: f32,
    pub y_origin: i32,
    pub y_scale: f32,
    pub pressure_origin: i32,
    pub pressure_scale: f32,
    pub size_origin: i32,
    pub size_scale: f32,
}

impl Default for TouchPrecalculated {
    fn default() -> Self {
        Self {
            x_origin: 0,
            x_scale: 1.0,
            y_origin: 0,
            y_scale: 1.0,
            pressure_origin: 0,
            pressure_scale: 1.0,
            size_origin: 0,
            size_scale: 1.0,
        }
    }
}

/// A rectangle in raw touch coordinates, on the bezel outside the display's
/// active area, that produces key events instead of touches.
#[derive(Debug, Clone, Copy)]
pub struct VirtualKey {
    pub key_code: i32,
    pub scan_code: i32,
    /// Layout flags resolved together with the key code.
    pub flags: u32,
    pub hit_left: i32,
    pub hit_top: i32,
    pub hit_right: i32,
    pub hit_bottom: i32,
}

impl VirtualKey {
    pub fn is_hit(&self, x: i32, y: i32) -> bool {
        x >= self.hit_left && x <= self.hit_right && y >= self.hit_top && y <= self.hit_bottom
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VirtualKeyStatus {
    #[default]
    Up,
    Down,
    /// The touch left the key's rectangle (or grew a second pointer) after
    /// the DOWN was delivered; the release was reported as canceled.
    Canceled,
}

/// The virtual key currently being tracked, if any.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentVirtualKey {
    pub status: VirtualKeyStatus,
    pub key_code: i32,
    pub scan_code: i32,
    pub down_time: i64,
}

/// Per-device touch pipeline state shared by both touch protocols.
#[derive(Debug, Clone, Default)]
pub struct TouchScreenState {
    pub params: TouchParams,
    pub precalculated: TouchPrecalculated,
    pub virtual_keys: Vec<VirtualKey>,
    pub current_virtual_key: CurrentVirtualKey,
    pub current_touch: TouchData,
    pub last_touch: TouchData,
    /// Timestamp of the initial pointer-down of the current gesture.
    pub down_time: i64,
    pub jump_filter: JumpFilterState,
    pub averaging_filter: AveragingFilterState,
}

impl TouchScreenState {
    /// Clear runtime state; parameters, precalculated factors, and virtual
    /// key geometry survive (they depend only on configuration).
    pub fn reset(&mut self) {
        self.current_virtual_key = CurrentVirtualKey::default();
        self.current_touch.clear();
        self.last_touch.clear();
        self.down_time = 0;
        self.jump_filter.reset();
        self.averaging_filter.reset();
    }

    /// The virtual key whose rectangle contains the sole current pointer's
    /// raw coordinates, if any.
    pub fn find_virtual_key_hit(&self) -> Option<&VirtualKey> {
        if self.current_touch.pointer_count == 0 {
            return None;
        }
        let pointer = &self.current_touch.pointers[0];
        self.virtual_keys
            .iter()
            .find(|key| key.is_hit(pointer.x, pointer.y))
    }
}
