//! Event types, axis opcodes, key codes, and the flag vocabularies shared
//! between the reader and its collaborators.

use bitflags::bitflags;

// ============================================================================
// Raw event types
// ============================================================================

/// Synchronization markers (`scan_code` carries the sub-opcode).
pub const EV_SYN: u16 = 0x00;
/// Key and button transitions.
pub const EV_KEY: u16 = 0x01;
/// Relative axis motion (trackballs).
pub const EV_REL: u16 = 0x02;
/// Absolute axis motion (digitizers).
pub const EV_ABS: u16 = 0x03;
/// Switch state changes (lid, headset jack).
pub const EV_SW: u16 = 0x05;

/// Synthetic event type announcing a newly attached device.
pub const DEVICE_ADDED: u16 = 0x1000;
/// Synthetic event type announcing a detached device.
pub const DEVICE_REMOVED: u16 = 0x2000;

// ============================================================================
// Sub-opcodes (delivered in `scan_code`)
// ============================================================================

/// Frame boundary: all data for the current update has been delivered.
pub const SYN_REPORT: i32 = 0x00;
/// Multi-touch pointer boundary: all data for one pointer has been delivered.
pub const SYN_MT_REPORT: i32 = 0x02;

pub const REL_X: i32 = 0x00;
pub const REL_Y: i32 = 0x01;

pub const ABS_X: i32 = 0x00;
pub const ABS_Y: i32 = 0x01;
pub const ABS_PRESSURE: i32 = 0x18;
pub const ABS_TOOL_WIDTH: i32 = 0x1c;
pub const ABS_MT_TOUCH_MAJOR: i32 = 0x30;
pub const ABS_MT_WIDTH_MAJOR: i32 = 0x32;
pub const ABS_MT_POSITION_X: i32 = 0x35;
pub const ABS_MT_POSITION_Y: i32 = 0x36;
pub const ABS_MT_TRACKING_ID: i32 = 0x39;

pub const BTN_MOUSE: i32 = 0x110;
pub const BTN_TOUCH: i32 = 0x14a;

// ============================================================================
// Key codes
// ============================================================================

pub const KEYCODE_DPAD_UP: i32 = 19;
pub const KEYCODE_DPAD_DOWN: i32 = 20;
pub const KEYCODE_DPAD_LEFT: i32 = 21;
pub const KEYCODE_DPAD_RIGHT: i32 = 22;
pub const KEYCODE_ALT_LEFT: i32 = 57;
pub const KEYCODE_ALT_RIGHT: i32 = 58;
pub const KEYCODE_SHIFT_LEFT: i32 = 59;
pub const KEYCODE_SHIFT_RIGHT: i32 = 60;
pub const KEYCODE_SYM: i32 = 63;

// ============================================================================
// Display rotation
// ============================================================================

pub const ROTATION_0: i32 = 0;
pub const ROTATION_90: i32 = 1;
pub const ROTATION_180: i32 = 2;
pub const ROTATION_270: i32 = 3;

// ============================================================================
// Limits
// ============================================================================

/// Maximum simultaneous pointers carried through one touch frame.
pub const MAX_POINTERS: usize = 10;
/// Largest pointer id; ids must fit a [`BitSet32`](crate::core::bits::BitSet32).
pub const MAX_POINTER_ID: u32 = 31;

/// Raw units a trackball must travel to count as one arrow-key step.
pub const TRACKBALL_MOVEMENT_THRESHOLD: i32 = 6;

// ============================================================================
// Outgoing event vocabulary
// ============================================================================

pub const KEY_EVENT_ACTION_DOWN: i32 = 0;
pub const KEY_EVENT_ACTION_UP: i32 = 1;

pub const MOTION_EVENT_ACTION_DOWN: i32 = 0;
pub const MOTION_EVENT_ACTION_UP: i32 = 1;
pub const MOTION_EVENT_ACTION_MOVE: i32 = 2;
pub const MOTION_EVENT_ACTION_POINTER_DOWN: i32 = 5;
pub const MOTION_EVENT_ACTION_POINTER_UP: i32 = 6;
/// The index of the pointer going up/down rides in the action's high bits.
pub const MOTION_EVENT_ACTION_POINTER_INDEX_SHIFT: i32 = 8;

pub const MOTION_EVENT_EDGE_FLAG_NONE: i32 = 0;
pub const MOTION_EVENT_EDGE_FLAG_LEFT: i32 = 1;
pub const MOTION_EVENT_EDGE_FLAG_RIGHT: i32 = 2;
pub const MOTION_EVENT_EDGE_FLAG_TOP: i32 = 4;
pub const MOTION_EVENT_EDGE_FLAG_BOTTOM: i32 = 8;

/// Answers for the exported scan/key/switch state queries.
pub const KEY_STATE_UNKNOWN: i32 = -1;
pub const KEY_STATE_UP: i32 = 0;
pub const KEY_STATE_DOWN: i32 = 1;
/// The queried code matches the currently-down virtual key.
pub const KEY_STATE_VIRTUAL: i32 = 2;

/// Input source of an outgoing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventNature {
    Key = 1,
    Touch = 2,
    Trackball = 3,
}

bitflags! {
    /// Device capability bits reported by the event source.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeviceClasses: u32 {
        const KEYBOARD = 0x01;
        /// Keyboard with a full alphabetic layout.
        const ALPHAKEY = 0x02;
        const TOUCHSCREEN = 0x04;
        const TRACKBALL = 0x08;
        /// Touchscreen speaking the multi-pointer protocol.
        const MULTI_TOUCH = 0x10;
        const DPAD = 0x20;
    }
}

bitflags! {
    /// Modifier key state. The LEFT/RIGHT bits track physical keys; ALT and
    /// SHIFT are summary bits recomputed from them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MetaState: u32 {
        const SHIFT = 0x01;
        const ALT = 0x02;
        const SYM = 0x04;
        const ALT_LEFT = 0x10;
        const ALT_RIGHT = 0x20;
        const SHIFT_LEFT = 0x40;
        const SHIFT_RIGHT = 0x80;
    }
}

bitflags! {
    /// Flags attached to an outgoing key event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KeyEventFlags: u32 {
        const WOKE_HERE = 0x01;
        const SOFT_KEYBOARD = 0x02;
        const KEEP_TOUCH_MODE = 0x04;
        const FROM_SYSTEM = 0x08;
        const EDITOR_ACTION = 0x10;
        /// The key press was invalidated after its DOWN was delivered.
        const CANCELED = 0x20;
        /// Synthesized from a bezel touch rather than a physical switch.
        const VIRTUAL_HARD_KEY = 0x40;
    }
}

bitflags! {
    /// Per-event flags flowing from the key layout and the policy toward the
    /// dispatcher. Low bits are layout-defined and pass through untouched.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PolicyFlags: u32 {
        const WOKE_HERE = 0x1000_0000;
        const BRIGHT_HERE = 0x2000_0000;

        const _ = !0;
    }
}

bitflags! {
    /// Action bits returned by the policy's intercept hooks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PolicyActions: u32 {
        /// Deliver the event; without this bit the event is dropped.
        const DISPATCH = 0x01;
        const APP_SWITCH_COMING = 0x02;
        const WOKE_HERE = 0x04;
        const BRIGHT_HERE = 0x08;
    }
}

// ============================================================================
// Key helpers
// ============================================================================

/// Fold one modifier key transition into a meta state, keeping the ALT and
/// SHIFT summary bits consistent with their LEFT/RIGHT sources. Non-modifier
/// key codes leave the state untouched.
pub fn update_meta_state(key_code: i32, down: bool, old_meta_state: MetaState) -> MetaState {
    let mask = match key_code {
        KEYCODE_ALT_LEFT => MetaState::ALT_LEFT,
        KEYCODE_ALT_RIGHT => MetaState::ALT_RIGHT,
        KEYCODE_SHIFT_LEFT => MetaState::SHIFT_LEFT,
        KEYCODE_SHIFT_RIGHT => MetaState::SHIFT_RIGHT,
        KEYCODE_SYM => MetaState::SYM,
        _ => return old_meta_state,
    };

    let mut meta = if down {
        old_meta_state | mask
    } else {
        old_meta_state & !mask & !(MetaState::ALT | MetaState::SHIFT)
    };

    if meta.intersects(MetaState::ALT_LEFT | MetaState::ALT_RIGHT) {
        meta |= MetaState::ALT;
    }
    if meta.intersects(MetaState::SHIFT_LEFT | MetaState::SHIFT_RIGHT) {
        meta |= MetaState::SHIFT;
    }

    meta
}

// Key codes enumerated counter-clockwise with the unrotated code first.
const KEY_CODE_ROTATIONS: [[i32; 4]; 4] = [
    [
        KEYCODE_DPAD_DOWN,
        KEYCODE_DPAD_RIGHT,
        KEYCODE_DPAD_UP,
        KEYCODE_DPAD_LEFT,
    ],
    [
        KEYCODE_DPAD_RIGHT,
        KEYCODE_DPAD_UP,
        KEYCODE_DPAD_LEFT,
        KEYCODE_DPAD_DOWN,
    ],
    [
        KEYCODE_DPAD_UP,
        KEYCODE_DPAD_LEFT,
        KEYCODE_DPAD_DOWN,
        KEYCODE_DPAD_RIGHT,
    ],
    [
        KEYCODE_DPAD_LEFT,
        KEYCODE_DPAD_DOWN,
        KEYCODE_DPAD_RIGHT,
        KEYCODE_DPAD_UP,
    ],
];

/// Remap a directional key code for the current display rotation so that
/// "up" on the pad stays "up" on the rotated screen. Non-directional codes
/// pass through unchanged, as does everything at rotation 0.
pub fn rotate_key_code(key_code: i32, orientation: i32) -> i32 {
    if orientation != ROTATION_0 {
        for row in &KEY_CODE_ROTATIONS {
            if key_code == row[0] {
                if let Some(rotated) = row.get(orientation as usize) {
                    return *rotated;
                }
            }
        }
    }
    key_code
}
