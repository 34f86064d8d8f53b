//! Contracts between the reader core and its collaborators: the raw event
//! source, the policy arbiter, and the downstream dispatcher.
//!
//! All three are consumed as `Arc<dyn Trait>` so the reader thread can own
//! event processing while external threads poll the exported state.

use crate::core::codes::{
    DeviceClasses, EventNature, KeyEventFlags, MetaState, PolicyActions, PolicyFlags,
};

/// One raw event as delivered by the event source.
///
/// `when` is overwritten with a monotonic timestamp on receipt; the value the
/// source supplies is only a fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawEvent {
    pub device_id: i32,
    pub kind: u16,
    pub scan_code: i32,
    pub key_code: i32,
    pub flags: u32,
    pub value: i32,
    /// Nanoseconds, monotonic.
    pub when: i64,
}

/// Calibration for one absolute axis as reported by the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AbsAxisInfo {
    pub min_value: i32,
    pub max_value: i32,
    /// Center-flat zone; values within it read as the center.
    pub flat: i32,
    /// Noise filter tolerance.
    pub fuzz: i32,
}

impl AbsAxisInfo {
    pub fn range(&self) -> i32 {
        self.max_value - self.min_value
    }
}

/// Display geometry and rotation as reported by the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayInfo {
    pub width: i32,
    pub height: i32,
    /// One of the `ROTATION_*` values.
    pub orientation: i32,
}

/// A virtual key layout entry in display coordinates. The reader translates
/// the center/size rectangle into raw touch coordinates at configuration
/// time.
#[derive(Debug, Clone, Copy)]
pub struct VirtualKeyDefinition {
    pub scan_code: i32,
    pub center_x: i32,
    pub center_y: i32,
    pub width: i32,
    pub height: i32,
}

/// Mapped position of one pointer in display coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PointerCoords {
    pub x: f32,
    pub y: f32,
    pub pressure: f32,
    pub size: f32,
}

/// Derived classification of the currently attached devices, exported for
/// external pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputConfiguration {
    pub touch_screen: TouchScreenConfig,
    pub keyboard: KeyboardConfig,
    pub navigation: NavigationConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TouchScreenConfig {
    #[default]
    NoTouch,
    Finger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyboardConfig {
    #[default]
    NoKeys,
    Qwerty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NavigationConfig {
    #[default]
    NoNav,
    Dpad,
    Trackball,
}

/// The raw hardware event source.
///
/// `next_event` blocks until an event is available; everything else is
/// synchronous and callable from any thread.
pub trait EventSource: Send + Sync {
    /// Block until the next raw event is available.
    fn next_event(&self) -> RawEvent;

    fn device_classes(&self, device_id: i32) -> DeviceClasses;

    fn device_name(&self, device_id: i32) -> String;

    /// Driver-reported range for an absolute axis, or `None` when the device
    /// does not report one.
    fn absolute_axis_info(&self, device_id: i32, axis: i32) -> Option<AbsAxisInfo>;

    /// Map a hardware scan code through the device's key layout to a key
    /// code and its layout flags.
    fn map_scan_code(&self, device_id: i32, scan_code: i32) -> Option<(i32, u32)>;

    /// Suppress a device by name before it is ever opened.
    fn add_excluded_device(&self, name: &str);

    fn scan_code_state(&self, device_id: i32, classes: DeviceClasses, scan_code: i32) -> i32;

    fn key_code_state(&self, device_id: i32, classes: DeviceClasses, key_code: i32) -> i32;

    fn switch_state(&self, device_id: i32, classes: DeviceClasses, switch_code: i32) -> i32;

    /// For each key code, set the matching flag byte if any device can
    /// produce it. Returns false when the query could not be answered.
    fn has_keys(&self, key_codes: &[i32], out_flags: &mut [u8]) -> bool;
}

/// The policy arbiter consulted before anything reaches the dispatcher.
pub trait ReaderPolicy: Send + Sync {
    /// Geometry of the given display, or `None` when it is not yet known.
    fn display_info(&self, display_id: i32) -> Option<DisplayInfo>;

    /// Virtual key layout for the named device; empty when it has none.
    fn virtual_key_definitions(&self, device_name: &str) -> Vec<VirtualKeyDefinition>;

    /// Device names that must never produce input.
    fn excluded_device_names(&self) -> Vec<String>;

    /// Enable the bounce and averaging touch filters.
    fn filter_touch_events(&self) -> bool;

    /// Enable the jump touch filter.
    fn filter_jumpy_touch_events(&self) -> bool;

    #[allow(clippy::too_many_arguments)]
    fn intercept_key(
        &self,
        when: i64,
        device_id: i32,
        down: bool,
        key_code: i32,
        scan_code: i32,
        policy_flags: PolicyFlags,
    ) -> PolicyActions;

    fn intercept_touch(&self, when: i64) -> PolicyActions;

    fn intercept_trackball(
        &self,
        when: i64,
        down_changed: bool,
        down: bool,
        delta_changed: bool,
    ) -> PolicyActions;

    fn intercept_switch(&self, when: i64, switch_code: i32, switch_value: i32) -> PolicyActions;

    /// Haptic feedback hook fired when a virtual key goes down.
    fn virtual_key_down_feedback(&self);
}

/// The downstream sink for normalized events.
///
/// Implementations are expected to be non-blocking or bounded; the reader
/// offers no backpressure.
pub trait InputDispatcher: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    fn notify_key(
        &self,
        when: i64,
        device_id: i32,
        nature: EventNature,
        policy_flags: PolicyFlags,
        action: i32,
        flags: KeyEventFlags,
        key_code: i32,
        scan_code: i32,
        meta_state: MetaState,
        down_time: i64,
    );

    /// `pointer_ids` and `pointer_coords` run in parallel; their shared
    /// length is the pointer count.
    #[allow(clippy::too_many_arguments)]
    fn notify_motion(
        &self,
        when: i64,
        device_id: i32,
        nature: EventNature,
        policy_flags: PolicyFlags,
        action: i32,
        meta_state: MetaState,
        edge_flags: i32,
        pointer_ids: &[i32],
        pointer_coords: &[PointerCoords],
        x_precision: f32,
        y_precision: f32,
        down_time: i64,
    );

    fn notify_app_switch_coming(&self, when: i64);

    fn notify_configuration_changed(&self, when: i64);
}
