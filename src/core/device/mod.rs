//! Per-device state: class bits, sub-state for each device kind, and the
//! id-keyed registry owned by the reader thread.

pub mod filters;
pub mod keyboard;
pub mod touch;
pub mod trackball;

use std::collections::HashMap;

use crate::core::codes::DeviceClasses;
use keyboard::KeyboardState;
use touch::{MultiTouchState, SingleTouchState, TouchScreenState};
use trackball::TrackballState;

/// One attached input device.
///
/// A device carries every sub-state; the ones not matching its class bits
/// are inert and never touched. Devices are created and mutated only on the
/// reader thread.
#[derive(Debug)]
pub struct Device {
    pub id: i32,
    pub classes: DeviceClasses,
    pub name: String,
    /// Set when the device reports no input classes; such a device never
    /// produces events.
    pub ignored: bool,
    pub keyboard: KeyboardState,
    pub trackball: TrackballState,
    pub single_touch: SingleTouchState,
    pub multi_touch: MultiTouchState,
    pub touch_screen: TouchScreenState,
}

impl Device {
    pub fn new(id: i32, classes: DeviceClasses, name: String) -> Self {
        Self {
            id,
            classes,
            name,
            ignored: false,
            keyboard: KeyboardState::default(),
            trackball: TrackballState::default(),
            single_touch: SingleTouchState::default(),
            multi_touch: MultiTouchState::default(),
            touch_screen: TouchScreenState::default(),
        }
    }

    pub fn is_keyboard(&self) -> bool {
        self.classes.contains(DeviceClasses::KEYBOARD)
    }

    pub fn is_alpha_key(&self) -> bool {
        self.classes.contains(DeviceClasses::ALPHAKEY)
    }

    pub fn is_trackball(&self) -> bool {
        self.classes.contains(DeviceClasses::TRACKBALL)
    }

    pub fn is_dpad(&self) -> bool {
        self.classes.contains(DeviceClasses::DPAD)
    }

    /// Touchscreen speaking the one-pointer protocol only.
    pub fn is_single_touch_screen(&self) -> bool {
        self.classes
            .intersection(DeviceClasses::TOUCHSCREEN | DeviceClasses::MULTI_TOUCH)
            == DeviceClasses::TOUCHSCREEN
    }

    pub fn is_multi_touch_screen(&self) -> bool {
        self.classes.contains(DeviceClasses::MULTI_TOUCH)
    }

    pub fn is_touch_screen(&self) -> bool {
        self.classes
            .intersects(DeviceClasses::TOUCHSCREEN | DeviceClasses::MULTI_TOUCH)
    }

    /// Clear all runtime state. Configuration-derived state (axis
    /// parameters, precalculated factors, virtual key geometry) survives.
    pub fn reset(&mut self) {
        self.keyboard.reset();
        self.trackball.reset();
        self.single_touch.reset();
        self.multi_touch.reset();
        self.touch_screen.reset();
    }
}

/// The set of attached devices, keyed by device id.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<i32, Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, device_id: i32) -> bool {
        self.devices.contains_key(&device_id)
    }

    pub fn get(&self, device_id: i32) -> Option<&Device> {
        self.devices.get(&device_id)
    }

    pub fn get_mut(&mut self, device_id: i32) -> Option<&mut Device> {
        self.devices.get_mut(&device_id)
    }

    /// Look up a device that is allowed to produce events.
    pub fn non_ignored_mut(&mut self, device_id: i32) -> Option<&mut Device> {
        self.devices.get_mut(&device_id).filter(|d| !d.ignored)
    }

    pub fn insert(&mut self, device: Device) {
        self.devices.insert(device.id, device);
    }

    pub fn remove(&mut self, device_id: i32) -> Option<Device> {
        self.devices.remove(&device_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Device> {
        self.devices.values_mut()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_predicates() {
        let touch = Device::new(1, DeviceClasses::TOUCHSCREEN, "ts".into());
        assert!(touch.is_touch_screen());
        assert!(touch.is_single_touch_screen());
        assert!(!touch.is_multi_touch_screen());

        let multi = Device::new(
            2,
            DeviceClasses::TOUCHSCREEN | DeviceClasses::MULTI_TOUCH,
            "mt".into(),
        );
        assert!(multi.is_touch_screen());
        assert!(!multi.is_single_touch_screen());
        assert!(multi.is_multi_touch_screen());

        let keyboard = Device::new(3, DeviceClasses::KEYBOARD | DeviceClasses::DPAD, "kbd".into());
        assert!(keyboard.is_keyboard());
        assert!(keyboard.is_dpad());
        assert!(!keyboard.is_touch_screen());
    }

    #[test]
    fn test_registry_ignored_lookup() {
        let mut registry = DeviceRegistry::new();
        let mut device = Device::new(1, DeviceClasses::empty(), "ghost".into());
        device.ignored = true;
        registry.insert(device);

        assert!(registry.contains(1));
        assert!(registry.get(1).is_some());
        assert!(registry.non_ignored_mut(1).is_none());
        assert!(registry.non_ignored_mut(2).is_none());
    }

    #[test]
    fn test_reset_preserves_configuration() {
        let mut device = Device::new(1, DeviceClasses::TOUCHSCREEN, "ts".into());
        device.touch_screen.precalculated.x_scale = 0.5;
        device.touch_screen.down_time = 99;
        device.keyboard.down_time = 42;

        device.reset();

        assert_eq!(device.touch_screen.precalculated.x_scale, 0.5);
        assert_eq!(device.touch_screen.down_time, 0);
        assert_eq!(device.keyboard.down_time, 0);
    }
}
