//! The input reader: pulls raw events from the event source on a dedicated
//! thread, reassembles them into per-device frames, and turns frames into
//! normalized key and motion notifications for the dispatcher.
//!
//! Everything except the exported-state mirror is owned exclusively by the
//! reader thread; external threads may only call the `current_*` query
//! methods, which serialize on the mirror lock.

use std::sync::{Arc, Mutex};

use crate::core::bits::BitSet32;
use crate::core::codes::{
    update_meta_state, rotate_key_code, DeviceClasses, EventNature, KeyEventFlags, MetaState,
    PolicyActions, PolicyFlags, ABS_MT_POSITION_X, ABS_MT_POSITION_Y, ABS_MT_TOUCH_MAJOR,
    ABS_MT_TRACKING_ID, ABS_MT_WIDTH_MAJOR, ABS_PRESSURE, ABS_TOOL_WIDTH, ABS_X, ABS_Y, BTN_MOUSE,
    BTN_TOUCH, DEVICE_ADDED, DEVICE_REMOVED, EV_ABS, EV_KEY, EV_REL, EV_SW, EV_SYN,
    KEY_EVENT_ACTION_DOWN, KEY_EVENT_ACTION_UP, KEY_STATE_VIRTUAL, MAX_POINTERS, MAX_POINTER_ID,
    MOTION_EVENT_ACTION_DOWN, MOTION_EVENT_ACTION_MOVE, MOTION_EVENT_ACTION_POINTER_DOWN,
    MOTION_EVENT_ACTION_POINTER_INDEX_SHIFT, MOTION_EVENT_ACTION_POINTER_UP,
    MOTION_EVENT_ACTION_UP, MOTION_EVENT_EDGE_FLAG_BOTTOM, MOTION_EVENT_EDGE_FLAG_LEFT,
    MOTION_EVENT_EDGE_FLAG_NONE, MOTION_EVENT_EDGE_FLAG_RIGHT, MOTION_EVENT_EDGE_FLAG_TOP,
    REL_X, REL_Y, ROTATION_90, ROTATION_180, ROTATION_270, SYN_MT_REPORT, SYN_REPORT,
    TRACKBALL_MOVEMENT_THRESHOLD,
};
use crate::core::device::touch::{
    CurrentVirtualKey, MultiTouchPointer, Pointer, SingleTouchAccumulator, VirtualKey,
    VirtualKeyStatus,
};
use crate::core::device::trackball::TrackballAccumulator;
use crate::core::device::{Device, DeviceRegistry};
use crate::core::tracker::{PointerTracker, ProximityTracker};
use crate::core::traits::{
    AbsAxisInfo, EventSource, InputConfiguration, InputDispatcher, KeyboardConfig,
    NavigationConfig, PointerCoords, RawEvent, ReaderPolicy, TouchScreenConfig,
};

/// Snapshot of derived state readable by external pollers.
struct ExportedState {
    /// Key code of the currently-down virtual key, or -1.
    virtual_key_code: i32,
    virtual_scan_code: i32,
    configuration: InputConfiguration,
}

/// Which frame a touch dispatch reads its pointer data from.
#[derive(Clone, Copy)]
enum TouchFrame {
    Current,
    Last,
}

pub struct InputReader {
    event_source: Arc<dyn EventSource>,
    policy: Arc<dyn ReaderPolicy>,
    dispatcher: Arc<dyn InputDispatcher>,
    tracker: Box<dyn PointerTracker>,

    devices: DeviceRegistry,

    display_width: i32,
    display_height: i32,
    display_orientation: i32,

    /// OR of every keyboard's meta state; `None` after any device or meta
    /// change, recomputed on demand.
    global_meta: Option<MetaState>,

    exported: Mutex<ExportedState>,
}

impl InputReader {
    pub fn new(
        event_source: Arc<dyn EventSource>,
        policy: Arc<dyn ReaderPolicy>,
        dispatcher: Arc<dyn InputDispatcher>,
    ) -> Self {
        let reader = Self {
            event_source,
            policy,
            dispatcher,
            tracker: Box::new(ProximityTracker),
            devices: DeviceRegistry::new(),
            display_width: -1,
            display_height: -1,
            display_orientation: -1,
            global_meta: None,
            exported: Mutex::new(ExportedState {
                virtual_key_code: -1,
                virtual_scan_code: -1,
                configuration: InputConfiguration::default(),
            }),
        };
        reader.configure_excluded_devices();
        reader.update_exported_virtual_key_state();
        reader
    }

    /// Replace the pointer identity strategy used when the driver does not
    /// supply tracking ids.
    pub fn with_tracker(mut self, tracker: Box<dyn PointerTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    /// Pull one raw event, re-stamp it, and run it through the pipeline.
    /// Blocks until the event source produces an event. Meant to be called
    /// in a tight loop from a dedicated thread.
    pub fn loop_once(&mut self) {
        let mut raw = self.event_source.next_event();

        // Every consumer downstream compares timestamps across devices, so
        // events are re-stamped into one monotonic timebase on receipt.
        if let Ok(now) = nix::time::clock_gettime(nix::time::ClockId::CLOCK_MONOTONIC) {
            raw.when = now.tv_sec() * 1_000_000_000 + now.tv_nsec();
        }

        tracing::trace!(
            "Input event: device=0x{:x} type=0x{:x} scancode={} keycode={} value={}",
            raw.device_id,
            raw.kind,
            raw.scan_code,
            raw.key_code,
            raw.value
        );

        self.process(&raw);
    }

    pub(crate) fn process(&mut self, raw: &RawEvent) {
        match raw.kind {
            DEVICE_ADDED => self.handle_device_added(raw),
            DEVICE_REMOVED => self.handle_device_removed(raw),
            EV_SYN => self.handle_sync(raw),
            EV_KEY => self.handle_key(raw),
            EV_REL => self.handle_relative_motion(raw),
            EV_ABS => self.handle_absolute_motion(raw),
            EV_SW => self.handle_switch(raw),
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Device lifecycle
    // ------------------------------------------------------------------

    fn handle_device_added(&mut self, raw: &RawEvent) {
        if self.devices.contains(raw.device_id) {
            tracing::warn!(
                "Ignoring spurious device added event for device id {}",
                raw.device_id
            );
            return;
        }
        self.add_device(raw.when, raw.device_id);
    }

    fn handle_device_removed(&mut self, raw: &RawEvent) {
        if !self.devices.contains(raw.device_id) {
            tracing::warn!(
                "Ignoring spurious device removed event for device id {}",
                raw.device_id
            );
            return;
        }
        self.remove_device(raw.when, raw.device_id);
    }

    fn add_device(&mut self, when: i64, device_id: i32) {
        let classes = self.event_source.device_classes(device_id);
        let name = self.event_source.device_name(device_id);
        let mut device = Device::new(device_id, classes, name);

        if !classes.is_empty() {
            tracing::info!(
                "Device added: id=0x{:x}, name={}, classes={:#04x}",
                device.id,
                device.name,
                device.classes.bits()
            );
            configure_device(
                &mut device,
                self.display_width,
                self.display_height,
                self.policy.as_ref(),
                self.event_source.as_ref(),
            );
        } else {
            tracing::info!(
                "Device added: id=0x{:x}, name={} (ignored non-input device)",
                device.id,
                device.name
            );
            device.ignored = true;
        }

        device.reset();
        let ignored = device.ignored;
        self.devices.insert(device);

        if !ignored {
            self.on_configuration_changed(when);
        }
    }

    fn remove_device(&mut self, when: i64, device_id: i32) {
        let Some(device) = self.devices.remove(device_id) else {
            return;
        };

        if !device.ignored {
            tracing::info!(
                "Device removed: id=0x{:x}, name={}, classes={:#04x}",
                device.id,
                device.name,
                device.classes.bits()
            );
            self.on_configuration_changed(when);
        } else {
            tracing::info!(
                "Device removed: id=0x{:x}, name={} (ignored non-input device)",
                device.id,
                device.name
            );
        }
    }

    fn on_configuration_changed(&mut self, when: i64) {
        // Global meta state depends on the set of attached keyboards.
        self.global_meta = None;

        self.update_exported_virtual_key_state();
        self.update_exported_input_configuration();

        self.dispatcher.notify_configuration_changed(when);
    }

    // ------------------------------------------------------------------
    // Raw event accumulation
    // ------------------------------------------------------------------

    fn handle_sync(&mut self, raw: &RawEvent) {
        let when = raw.when;
        let device_id = raw.device_id;

        if raw.scan_code == SYN_MT_REPORT {
            // Pointer boundary: the driver delivered all data for one pointer.
            let Some(device) = self.devices.non_ignored_mut(device_id) else {
                return;
            };
            if device.is_multi_touch_screen() {
                let accumulator = &mut device.multi_touch.accumulator;
                let index = accumulator.pointer_count;
                if accumulator.pointers[index].fields != 0 {
                    if index == MAX_POINTERS {
                        tracing::warn!(
                            "Multi-touch driver reported more than the maximum of {} pointers",
                            MAX_POINTERS
                        );
                    } else {
                        accumulator.pointer_count = index + 1;
                    }
                }
                let open = accumulator.pointer_count;
                accumulator.pointers[open].clear();
            }
        } else if raw.scan_code == SYN_REPORT {
            // Frame boundary: run the state-changed handler for every dirty
            // accumulator, then clear it.
            let (multi_dirty, single_dirty, trackball_dirty) = {
                let Some(device) = self.devices.non_ignored_mut(device_id) else {
                    return;
                };
                (
                    device.is_multi_touch_screen() && device.multi_touch.accumulator.is_dirty(),
                    device.is_single_touch_screen() && device.single_touch.accumulator.is_dirty(),
                    device.trackball.accumulator.is_dirty(),
                )
            };

            if multi_dirty {
                self.on_multi_touch_changed(when, device_id);
                if let Some(device) = self.devices.get_mut(device_id) {
                    device.multi_touch.accumulator.clear();
                }
            } else if single_dirty {
                self.on_single_touch_changed(when, device_id);
                if let Some(device) = self.devices.get_mut(device_id) {
                    device.single_touch.accumulator.clear();
                }
            }

            if trackball_dirty {
                self.on_trackball_changed(when, device_id);
                if let Some(device) = self.devices.get_mut(device_id) {
                    device.trackball.accumulator.clear();
                }
            }
        }
    }

    fn handle_key(&mut self, raw: &RawEvent) {
        let down = raw.value != 0;

        let is_keyboard = {
            let Some(device) = self.devices.non_ignored_mut(raw.device_id) else {
                return;
            };

            // Touch and trackball buttons are frame data, not key events.
            if device.is_single_touch_screen() && raw.scan_code == BTN_TOUCH {
                let accumulator = &mut device.single_touch.accumulator;
                accumulator.fields |= SingleTouchAccumulator::FIELD_BTN_TOUCH;
                accumulator.btn_touch = down;
                return;
            }
            if device.is_trackball() && raw.scan_code == BTN_MOUSE {
                let accumulator = &mut device.trackball.accumulator;
                accumulator.fields |= TrackballAccumulator::FIELD_BTN_MOUSE;
                accumulator.btn_mouse = down;
                return;
            }

            device.is_keyboard()
        };

        if is_keyboard {
            self.on_key(
                raw.when,
                raw.device_id,
                down,
                raw.key_code,
                raw.scan_code,
                PolicyFlags::from_bits_retain(raw.flags),
            );
        }
    }

    fn handle_relative_motion(&mut self, raw: &RawEvent) {
        let Some(device) = self.devices.non_ignored_mut(raw.device_id) else {
            return;
        };
        if !device.is_trackball() {
            return;
        }

        let accumulator = &mut device.trackball.accumulator;
        match raw.scan_code {
            REL_X => {
                accumulator.fields |= TrackballAccumulator::FIELD_REL_X;
                accumulator.rel_x = raw.value;
            }
            REL_Y => {
                accumulator.fields |= TrackballAccumulator::FIELD_REL_Y;
                accumulator.rel_y = raw.value;
            }
            _ => {}
        }
    }

    fn handle_absolute_motion(&mut self, raw: &RawEvent) {
        let Some(device) = self.devices.non_ignored_mut(raw.device_id) else {
            return;
        };

        if device.is_multi_touch_screen() {
            let accumulator = &mut device.multi_touch.accumulator;
            let pointer = &mut accumulator.pointers[accumulator.pointer_count];
            match raw.scan_code {
                ABS_MT_POSITION_X => {
                    pointer.fields |= MultiTouchPointer::FIELD_ABS_MT_POSITION_X;
                    pointer.abs_mt_position_x = raw.value;
                }
                ABS_MT_POSITION_Y => {
                    pointer.fields |= MultiTouchPointer::FIELD_ABS_MT_POSITION_Y;
                    pointer.abs_mt_position_y = raw.value;
                }
                ABS_MT_TOUCH_MAJOR => {
                    pointer.fields |= MultiTouchPointer::FIELD_ABS_MT_TOUCH_MAJOR;
                    pointer.abs_mt_touch_major = raw.value;
                }
                ABS_MT_WIDTH_MAJOR => {
                    pointer.fields |= MultiTouchPointer::FIELD_ABS_MT_WIDTH_MAJOR;
                    pointer.abs_mt_width_major = raw.value;
                }
                ABS_MT_TRACKING_ID => {
                    pointer.fields |= MultiTouchPointer::FIELD_ABS_MT_TRACKING_ID;
                    pointer.abs_mt_tracking_id = raw.value;
                }
                _ => {}
            }
        } else if device.is_single_touch_screen() {
            let accumulator = &mut device.single_touch.accumulator;
            match raw.scan_code {
                ABS_X => {
                    accumulator.fields |= SingleTouchAccumulator::FIELD_ABS_X;
                    accumulator.abs_x = raw.value;
                }
                ABS_Y => {
                    accumulator.fields |= SingleTouchAccumulator::FIELD_ABS_Y;
                    accumulator.abs_y = raw.value;
                }
                ABS_PRESSURE => {
                    accumulator.fields |= SingleTouchAccumulator::FIELD_ABS_PRESSURE;
                    accumulator.abs_pressure = raw.value;
                }
                ABS_TOOL_WIDTH => {
                    accumulator.fields |= SingleTouchAccumulator::FIELD_ABS_TOOL_WIDTH;
                    accumulator.abs_tool_width = raw.value;
                }
                _ => {}
            }
        }
    }

    fn handle_switch(&mut self, raw: &RawEvent) {
        if self.devices.non_ignored_mut(raw.device_id).is_none() {
            return;
        }
        self.on_switch(raw.when, raw.scan_code, raw.value);
    }

    // ------------------------------------------------------------------
    // Keyboard and switch paths
    // ------------------------------------------------------------------

    fn on_key(
        &mut self,
        when: i64,
        device_id: i32,
        down: bool,
        key_code: i32,
        scan_code: i32,
        mut policy_flags: PolicyFlags,
    ) {
        // Key codes are rotated with the display, so its orientation must be
        // current before anything else.
        if !self.refresh_display_properties() {
            return;
        }

        let (meta_changed, meta_state, down_time) = {
            let Some(device) = self.devices.get_mut(device_id) else {
                return;
            };
            let old_meta = device.keyboard.meta_state;
            let new_meta = update_meta_state(key_code, down, old_meta);
            let changed = old_meta != new_meta;
            if changed {
                device.keyboard.meta_state = new_meta;
            }
            if down {
                device.keyboard.down_time = when;
            }
            (changed, new_meta, device.keyboard.down_time)
        };
        if meta_changed {
            self.global_meta = None;
        }

        // Known limitation: if the orientation changes between DOWN and UP of
        // the same physical key, the UP is reported under the newly rotated
        // code.
        let key_code = rotate_key_code(key_code, self.display_orientation);

        let policy_actions =
            self.policy
                .intercept_key(when, device_id, down, key_code, scan_code, policy_flags);
        if !self.apply_policy_actions(when, policy_actions, &mut policy_flags) {
            return; // event dropped
        }

        let action = if down {
            KEY_EVENT_ACTION_DOWN
        } else {
            KEY_EVENT_ACTION_UP
        };
        let mut flags = KeyEventFlags::FROM_SYSTEM;
        if policy_actions.contains(PolicyActions::WOKE_HERE) {
            flags |= KeyEventFlags::WOKE_HERE;
        }

        self.dispatcher.notify_key(
            when,
            device_id,
            EventNature::Key,
            policy_flags,
            action,
            flags,
            key_code,
            scan_code,
            meta_state,
            down_time,
        );
    }

    fn on_switch(&mut self, when: i64, switch_code: i32, switch_value: i32) {
        let policy_actions = self.policy.intercept_switch(when, switch_code, switch_value);
        let mut policy_flags = PolicyFlags::empty();
        self.apply_policy_actions(when, policy_actions, &mut policy_flags);
    }

    // ------------------------------------------------------------------
    // Touch state changes
    // ------------------------------------------------------------------

    fn on_multi_touch_changed(&mut self, when: i64, device_id: i32) {
        const REQUIRED_FIELDS: u32 = MultiTouchPointer::FIELD_ABS_MT_POSITION_X
            | MultiTouchPointer::FIELD_ABS_MT_POSITION_Y
            | MultiTouchPointer::FIELD_ABS_MT_TOUCH_MAJOR
            | MultiTouchPointer::FIELD_ABS_MT_WIDTH_MAJOR;

        if !self.refresh_display_properties() {
            return;
        }

        let have_pointer_ids = {
            let Some(device) = self.devices.get_mut(device_id) else {
                return;
            };
            let (multi_touch, touch_screen) = (&device.multi_touch, &mut device.touch_screen);
            let in_count = multi_touch.accumulator.pointer_count;
            let out = &mut touch_screen.current_touch;
            out.clear();

            let mut out_count = 0;
            let mut have_ids = true;

            for in_index in 0..in_count {
                let pointer = &multi_touch.accumulator.pointers[in_index];
                let fields = pointer.fields;

                if fields & REQUIRED_FIELDS != REQUIRED_FIELDS {
                    tracing::debug!(
                        "Pointers: missing required multi-touch fields: index={}, fields={:#x}",
                        in_index,
                        fields
                    );
                }

                if pointer.abs_mt_touch_major <= 0 {
                    // Pointer is not down. Drop it.
                    continue;
                }

                out.pointers[out_count] = Pointer {
                    id: 0,
                    x: pointer.abs_mt_position_x,
                    y: pointer.abs_mt_position_y,
                    pressure: pointer.abs_mt_touch_major,
                    size: pointer.abs_mt_width_major,
                };

                if have_ids {
                    if fields & MultiTouchPointer::FIELD_ABS_MT_TRACKING_ID != 0 {
                        let id = pointer.abs_mt_tracking_id;
                        if id < 0 || id as u32 > MAX_POINTER_ID {
                            tracing::debug!(
                                "Pointers: ignoring driver id {} above the supported maximum {}",
                                id,
                                MAX_POINTER_ID
                            );
                            have_ids = false;
                        } else {
                            out.assign_id(out_count, id as u32);
                        }
                    } else {
                        have_ids = false;
                    }
                }

                out_count += 1;
            }

            out.pointer_count = out_count;
            have_ids
        };

        self.on_touch_screen_changed(when, device_id, have_pointer_ids);
    }

    fn on_single_touch_changed(&mut self, when: i64, device_id: i32) {
        if !self.refresh_display_properties() {
            return;
        }

        {
            let Some(device) = self.devices.get_mut(device_id) else {
                return;
            };
            let accumulator = device.single_touch.accumulator;
            let fields = accumulator.fields;

            let current = &mut device.single_touch.current;
            if fields & SingleTouchAccumulator::FIELD_BTN_TOUCH != 0 {
                current.down = accumulator.btn_touch;
            }
            if fields & SingleTouchAccumulator::FIELD_ABS_X != 0 {
                current.x = accumulator.abs_x;
            }
            if fields & SingleTouchAccumulator::FIELD_ABS_Y != 0 {
                current.y = accumulator.abs_y;
            }
            if fields & SingleTouchAccumulator::FIELD_ABS_PRESSURE != 0 {
                current.pressure = accumulator.abs_pressure;
            }
            if fields & SingleTouchAccumulator::FIELD_ABS_TOOL_WIDTH != 0 {
                current.size = accumulator.abs_tool_width;
            }
            let current = *current;

            let out = &mut device.touch_screen.current_touch;
            out.clear();
            if current.down {
                out.pointer_count = 1;
                out.pointers[0] = Pointer {
                    id: 0,
                    x: current.x,
                    y: current.y,
                    pressure: current.pressure,
                    size: current.size,
                };
                out.assign_id(0, 0);
            }
        }

        // The single-touch protocol has exactly one pointer with a fixed id.
        self.on_touch_screen_changed(when, device_id, true);
    }

    fn on_touch_screen_changed(&mut self, when: i64, device_id: i32, mut have_pointer_ids: bool) {
        let policy_actions = self.policy.intercept_touch(when);
        let mut policy_flags = PolicyFlags::empty();
        if !self.apply_policy_actions(when, policy_actions, &mut policy_flags) {
            // The frame is dropped; the next accepted frame must not diff
            // against it.
            if let Some(device) = self.devices.get_mut(device_id) {
                device.touch_screen.last_touch.clear();
            }
            return;
        }

        let saved_touch = {
            let tracker = &self.tracker;
            let Some(device) = self.devices.get_mut(device_id) else {
                return;
            };
            let touch_screen = &mut device.touch_screen;

            if touch_screen.params.use_bounce_filter && touch_screen.apply_bounce_filter() {
                have_pointer_ids = false;
            }
            if touch_screen.params.use_jump_filter && touch_screen.apply_jump_filter() {
                have_pointer_ids = false;
            }

            if !have_pointer_ids {
                tracker.assign_ids(&mut touch_screen.current_touch, &touch_screen.last_touch);
            }

            // The pre-averaging copy becomes the reference frame for the next
            // cycle; averaged output must not feed back into itself.
            let saved = touch_screen.current_touch.clone();
            if touch_screen.params.use_averaging_filter {
                touch_screen.apply_averaging_filter();
            }
            saved
        };

        if !self.consume_virtual_key_touches(when, device_id, policy_flags) {
            self.dispatch_touches(when, device_id, policy_flags);
        }

        if let Some(device) = self.devices.get_mut(device_id) {
            device.touch_screen.last_touch.copy_from(&saved_touch);
        }
    }

    // ------------------------------------------------------------------
    // Virtual keys
    // ------------------------------------------------------------------

    /// Run the virtual-key state machine over the current frame. Returns
    /// true when the frame was consumed and must not produce touch events.
    fn consume_virtual_key_touches(
        &mut self,
        when: i64,
        device_id: i32,
        policy_flags: PolicyFlags,
    ) -> bool {
        let (consumed, emit) = {
            let Some(device) = self.devices.get_mut(device_id) else {
                return false;
            };
            let touch_screen = &mut device.touch_screen;
            let pointer_count = touch_screen.current_touch.pointer_count;

            match touch_screen.current_virtual_key.status {
                VirtualKeyStatus::Canceled => {
                    if pointer_count == 0 {
                        // Pointer went up after the canceled press.
                        touch_screen.current_virtual_key.status = VirtualKeyStatus::Up;
                    }
                    (true, None)
                }

                VirtualKeyStatus::Down => {
                    if pointer_count == 0 {
                        // Pointer went up while the virtual key was down.
                        touch_screen.current_virtual_key.status = VirtualKeyStatus::Up;
                        tracing::debug!(
                            "Virtual key up: keyCode={}, scanCode={}",
                            touch_screen.current_virtual_key.key_code,
                            touch_screen.current_virtual_key.scan_code
                        );
                        (
                            true,
                            Some((
                                KEY_EVENT_ACTION_UP,
                                KeyEventFlags::FROM_SYSTEM | KeyEventFlags::VIRTUAL_HARD_KEY,
                            )),
                        )
                    } else if pointer_count == 1
                        && touch_screen
                            .find_virtual_key_hit()
                            .is_some_and(|hit| {
                                hit.key_code == touch_screen.current_virtual_key.key_code
                            })
                    {
                        // Pointer is still within the key's rectangle.
                        (true, None)
                    } else {
                        // Pointer left the key area, or a second pointer went
                        // down. Report the release as canceled.
                        touch_screen.current_virtual_key.status = VirtualKeyStatus::Canceled;
                        tracing::debug!(
                            "Virtual key canceled: keyCode={}, scanCode={}",
                            touch_screen.current_virtual_key.key_code,
                            touch_screen.current_virtual_key.scan_code
                        );
                        (
                            true,
                            Some((
                                KEY_EVENT_ACTION_UP,
                                KeyEventFlags::FROM_SYSTEM
                                    | KeyEventFlags::VIRTUAL_HARD_KEY
                                    | KeyEventFlags::CANCELED,
                            )),
                        )
                    }
                }

                VirtualKeyStatus::Up => {
                    if pointer_count == 1 && touch_screen.last_touch.pointer_count == 0 {
                        // Pointer just went down; check for a virtual key hit.
                        if let Some(hit) = touch_screen.find_virtual_key_hit() {
                            let (key_code, scan_code) = (hit.key_code, hit.scan_code);
                            touch_screen.current_virtual_key = CurrentVirtualKey {
                                status: VirtualKeyStatus::Down,
                                key_code,
                                scan_code,
                                down_time: when,
                            };
                            tracing::debug!(
                                "Virtual key down: keyCode={}, scanCode={}",
                                key_code,
                                scan_code
                            );
                            (
                                true,
                                Some((
                                    KEY_EVENT_ACTION_DOWN,
                                    KeyEventFlags::FROM_SYSTEM | KeyEventFlags::VIRTUAL_HARD_KEY,
                                )),
                            )
                        } else {
                            (false, None)
                        }
                    } else {
                        (false, None)
                    }
                }
            }
        };

        if let Some((action, flags)) = emit {
            self.dispatch_virtual_key(when, device_id, policy_flags, action, flags);
        }
        consumed
    }

    fn dispatch_virtual_key(
        &mut self,
        when: i64,
        device_id: i32,
        mut policy_flags: PolicyFlags,
        key_event_action: i32,
        key_event_flags: KeyEventFlags,
    ) {
        self.update_exported_virtual_key_state();

        let Some((key_code, scan_code, down_time)) = self.devices.get(device_id).map(|device| {
            let key = &device.touch_screen.current_virtual_key;
            (key.key_code, key.scan_code, key.down_time)
        }) else {
            return;
        };
        let meta_state = self.global_meta_state();

        let down = key_event_action == KEY_EVENT_ACTION_DOWN;
        if down {
            self.policy.virtual_key_down_feedback();
        }

        let policy_actions =
            self.policy
                .intercept_key(when, device_id, down, key_code, scan_code, policy_flags);
        if self.apply_policy_actions(when, policy_actions, &mut policy_flags) {
            self.dispatcher.notify_key(
                when,
                device_id,
                EventNature::Key,
                policy_flags,
                key_event_action,
                key_event_flags,
                key_code,
                scan_code,
                meta_state,
                down_time,
            );
        }
    }

    // ------------------------------------------------------------------
    // Touch dispatch
    // ------------------------------------------------------------------

    fn dispatch_touches(&mut self, when: i64, device_id: i32, policy_flags: PolicyFlags) {
        let Some((current_bits, last_bits, current_count, last_count)) =
            self.devices.get(device_id).map(|device| {
                let touch_screen = &device.touch_screen;
                (
                    touch_screen.current_touch.id_bits,
                    touch_screen.last_touch.id_bits,
                    touch_screen.current_touch.pointer_count,
                    touch_screen.last_touch.pointer_count,
                )
            })
        else {
            return;
        };

        if current_count == 0 && last_count == 0 {
            return; // nothing to do
        }

        if current_bits == last_bits {
            // No id changes: one move event. The dispatcher batches moves
            // downstream.
            self.dispatch_touch(
                when,
                device_id,
                policy_flags,
                TouchFrame::Current,
                current_bits,
                MOTION_EVENT_ACTION_MOVE,
            );
            return;
        }

        // Pointers may go up and down in the same frame when the driver
        // reports ids. Release first, then press, ascending id within each
        // group.
        let mut up_ids = last_bits.difference(current_bits);
        let mut down_ids = current_bits.difference(last_bits);
        let mut active_ids = last_bits;

        while !up_ids.is_empty() {
            let up_id = up_ids.first_marked_bit();
            up_ids.clear_bit(up_id);
            let old_active_ids = active_ids;
            active_ids.clear_bit(up_id);

            let action = if active_ids.is_empty() {
                MOTION_EVENT_ACTION_UP
            } else {
                MOTION_EVENT_ACTION_POINTER_UP
                    | ((up_id as i32) << MOTION_EVENT_ACTION_POINTER_INDEX_SHIFT)
            };
            self.dispatch_touch(
                when,
                device_id,
                policy_flags,
                TouchFrame::Last,
                old_active_ids,
                action,
            );
        }

        while !down_ids.is_empty() {
            let down_id = down_ids.first_marked_bit();
            down_ids.clear_bit(down_id);
            let old_active_ids = active_ids;
            active_ids.mark_bit(down_id);

            let action = if old_active_ids.is_empty() {
                if let Some(device) = self.devices.get_mut(device_id) {
                    device.touch_screen.down_time = when;
                }
                MOTION_EVENT_ACTION_DOWN
            } else {
                MOTION_EVENT_ACTION_POINTER_DOWN
                    | ((down_id as i32) << MOTION_EVENT_ACTION_POINTER_INDEX_SHIFT)
            };
            self.dispatch_touch(
                when,
                device_id,
                policy_flags,
                TouchFrame::Current,
                active_ids,
                action,
            );
        }
    }

    /// Map the pointers named by `id_bits` into display coordinates and emit
    /// one motion event. Pointers are walked in ascending id order, which
    /// fixes their order in the outgoing event.
    fn dispatch_touch(
        &mut self,
        when: i64,
        device_id: i32,
        policy_flags: PolicyFlags,
        frame: TouchFrame,
        id_bits: BitSet32,
        action: i32,
    ) {
        let (oriented_width, oriented_height) = match self.display_orientation {
            ROTATION_90 | ROTATION_270 => (self.display_height, self.display_width),
            _ => (self.display_width, self.display_height),
        };
        let meta_state = self.global_meta_state();

        let Some(device) = self.devices.get(device_id) else {
            return;
        };
        let touch_screen = &device.touch_screen;
        let touch = match frame {
            TouchFrame::Current => &touch_screen.current_touch,
            TouchFrame::Last => &touch_screen.last_touch,
        };
        let precalculated = &touch_screen.precalculated;

        let mut pointer_ids = [0i32; MAX_POINTERS];
        let mut pointer_coords = [PointerCoords::default(); MAX_POINTERS];
        let mut pointer_count = 0;

        let mut ids = id_bits;
        while !ids.is_empty() {
            let id = ids.first_marked_bit();
            ids.clear_bit(id);
            let index = touch.id_to_index[id as usize];
            let pointer = &touch.pointers[index];

            let mut x = (pointer.x - precalculated.x_origin) as f32 * precalculated.x_scale;
            let mut y = (pointer.y - precalculated.y_origin) as f32 * precalculated.y_scale;
            let pressure =
                (pointer.pressure - precalculated.pressure_origin) as f32
                    * precalculated.pressure_scale;
            let size = (pointer.size - precalculated.size_origin) as f32 * precalculated.size_scale;

            match self.display_orientation {
                ROTATION_90 => {
                    let x_temp = x;
                    x = y;
                    y = self.display_width as f32 - x_temp;
                }
                ROTATION_180 => {
                    x = self.display_width as f32 - x;
                    y = self.display_height as f32 - y;
                }
                ROTATION_270 => {
                    let x_temp = x;
                    x = self.display_height as f32 - y;
                    y = x_temp;
                }
                _ => {}
            }

            pointer_ids[pointer_count] = id as i32;
            pointer_coords[pointer_count] = PointerCoords {
                x,
                y,
                pressure,
                size,
            };
            pointer_count += 1;
        }

        // Edge flags are global to the event; only the initial down reports
        // them, from its first pointer.
        let mut edge_flags = MOTION_EVENT_EDGE_FLAG_NONE;
        if action == MOTION_EVENT_ACTION_DOWN && pointer_count > 0 {
            let first = &pointer_coords[0];
            if first.x <= 0.0 {
                edge_flags |= MOTION_EVENT_EDGE_FLAG_LEFT;
            } else if first.x >= oriented_width as f32 {
                edge_flags |= MOTION_EVENT_EDGE_FLAG_RIGHT;
            }
            if first.y <= 0.0 {
                edge_flags |= MOTION_EVENT_EDGE_FLAG_TOP;
            } else if first.y >= oriented_height as f32 {
                edge_flags |= MOTION_EVENT_EDGE_FLAG_BOTTOM;
            }
        }

        self.dispatcher.notify_motion(
            when,
            device_id,
            EventNature::Touch,
            policy_flags,
            action,
            meta_state,
            edge_flags,
            &pointer_ids[..pointer_count],
            &pointer_coords[..pointer_count],
            0.0,
            0.0,
            touch_screen.down_time,
        );
    }

    // ------------------------------------------------------------------
    // Trackball
    // ------------------------------------------------------------------

    fn on_trackball_changed(&mut self, when: i64, device_id: i32) {
        const DELTA_FIELDS: u32 =
            TrackballAccumulator::FIELD_REL_X | TrackballAccumulator::FIELD_REL_Y;

        if !self.refresh_display_properties() {
            return;
        }

        let Some((accumulator, down_changed, down, precalculated, down_time)) =
            self.devices.get_mut(device_id).map(|device| {
                let accumulator = device.trackball.accumulator;
                let down_changed =
                    accumulator.fields & TrackballAccumulator::FIELD_BTN_MOUSE != 0;
                let down = if down_changed {
                    if accumulator.btn_mouse {
                        device.trackball.down = true;
                        device.trackball.down_time = when;
                        true
                    } else {
                        device.trackball.down = false;
                        false
                    }
                } else {
                    device.trackball.down
                };
                (
                    accumulator,
                    down_changed,
                    down,
                    device.trackball.precalculated,
                    device.trackball.down_time,
                )
            })
        else {
            return;
        };

        let delta_changed = accumulator.fields & DELTA_FIELDS != 0;
        let policy_actions = self
            .policy
            .intercept_trackball(when, down_changed, down, delta_changed);
        let mut policy_flags = PolicyFlags::empty();
        if !self.apply_policy_actions(when, policy_actions, &mut policy_flags) {
            return; // event dropped
        }

        let action = if down_changed {
            if down {
                MOTION_EVENT_ACTION_DOWN
            } else {
                MOTION_EVENT_ACTION_UP
            }
        } else {
            MOTION_EVENT_ACTION_MOVE
        };

        let mut coords = PointerCoords {
            x: if accumulator.fields & TrackballAccumulator::FIELD_REL_X != 0 {
                accumulator.rel_x as f32 * precalculated.x_scale
            } else {
                0.0
            },
            y: if accumulator.fields & TrackballAccumulator::FIELD_REL_Y != 0 {
                accumulator.rel_y as f32 * precalculated.y_scale
            } else {
                0.0
            },
            pressure: 1.0,
            size: 0.0,
        };

        // Deltas rotate with sign flips rather than translation.
        match self.display_orientation {
            ROTATION_90 => {
                let x_temp = coords.x;
                coords.x = coords.y;
                coords.y = -x_temp;
            }
            ROTATION_180 => {
                coords.x = -coords.x;
                coords.y = -coords.y;
            }
            ROTATION_270 => {
                let x_temp = coords.x;
                coords.x = -coords.y;
                coords.y = x_temp;
            }
            _ => {}
        }

        let meta_state = self.global_meta_state();
        self.dispatcher.notify_motion(
            when,
            device_id,
            EventNature::Trackball,
            policy_flags,
            action,
            meta_state,
            MOTION_EVENT_EDGE_FLAG_NONE,
            &[0],
            &[coords],
            precalculated.x_precision,
            precalculated.y_precision,
            down_time,
        );
    }

    // ------------------------------------------------------------------
    // Policy adapter
    // ------------------------------------------------------------------

    /// Interpret the action bits returned by any policy intercept call.
    /// Returns whether the event may be dispatched.
    fn apply_policy_actions(
        &self,
        when: i64,
        policy_actions: PolicyActions,
        policy_flags: &mut PolicyFlags,
    ) -> bool {
        if policy_actions.contains(PolicyActions::APP_SWITCH_COMING) {
            self.dispatcher.notify_app_switch_coming(when);
        }
        if policy_actions.contains(PolicyActions::WOKE_HERE) {
            *policy_flags |= PolicyFlags::WOKE_HERE;
        }
        if policy_actions.contains(PolicyActions::BRIGHT_HERE) {
            *policy_flags |= PolicyFlags::BRIGHT_HERE;
        }
        policy_actions.contains(PolicyActions::DISPATCH)
    }

    // ------------------------------------------------------------------
    // Display properties
    // ------------------------------------------------------------------

    fn reset_display_properties(&mut self) {
        self.display_width = -1;
        self.display_height = -1;
        self.display_orientation = -1;
    }

    /// Query the policy for current display geometry. On failure the cached
    /// properties are reset and the triggering event must be dropped.
    fn refresh_display_properties(&mut self) -> bool {
        match self.policy.display_info(0) {
            Some(info) => {
                if info.width != self.display_width || info.height != self.display_height {
                    tracing::debug!(
                        "Display size changed from {}x{} to {}x{}, updating device configuration",
                        self.display_width,
                        self.display_height,
                        info.width,
                        info.height
                    );
                    self.display_width = info.width;
                    self.display_height = info.height;

                    let policy = Arc::clone(&self.policy);
                    let source = Arc::clone(&self.event_source);
                    for device in self.devices.iter_mut() {
                        configure_device_for_display_size(
                            device,
                            info.width,
                            info.height,
                            policy.as_ref(),
                            source.as_ref(),
                        );
                    }
                }
                if info.orientation != self.display_orientation {
                    tracing::debug!("Display orientation changed to {}", info.orientation);
                    self.display_orientation = info.orientation;
                }
                true
            }
            None => {
                self.reset_display_properties();
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Global meta state
    // ------------------------------------------------------------------

    fn global_meta_state(&mut self) -> MetaState {
        match self.global_meta {
            Some(meta) => meta,
            None => {
                let mut meta = MetaState::empty();
                for device in self.devices.iter() {
                    if device.is_keyboard() {
                        meta |= device.keyboard.meta_state;
                    }
                }
                self.global_meta = Some(meta);
                meta
            }
        }
    }

    // ------------------------------------------------------------------
    // Exported state mirror
    // ------------------------------------------------------------------

    fn configure_excluded_devices(&self) {
        for name in self.policy.excluded_device_names() {
            self.event_source.add_excluded_device(&name);
        }
    }

    fn update_exported_virtual_key_state(&self) {
        let mut key_code = -1;
        let mut scan_code = -1;
        for device in self.devices.iter() {
            if device.is_touch_screen()
                && device.touch_screen.current_virtual_key.status == VirtualKeyStatus::Down
            {
                key_code = device.touch_screen.current_virtual_key.key_code;
                scan_code = device.touch_screen.current_virtual_key.scan_code;
            }
        }

        let mut exported = self.exported.lock().unwrap();
        exported.virtual_key_code = key_code;
        exported.virtual_scan_code = scan_code;
    }

    fn update_exported_input_configuration(&self) {
        let mut configuration = InputConfiguration::default();
        for device in self.devices.iter() {
            let classes = device.classes;
            if classes.contains(DeviceClasses::TOUCHSCREEN) {
                configuration.touch_screen = TouchScreenConfig::Finger;
            }
            if classes.contains(DeviceClasses::ALPHAKEY) {
                configuration.keyboard = KeyboardConfig::Qwerty;
            }
            if classes.contains(DeviceClasses::TRACKBALL) {
                configuration.navigation = NavigationConfig::Trackball;
            } else if classes.contains(DeviceClasses::DPAD) {
                configuration.navigation = NavigationConfig::Dpad;
            }
        }

        self.exported.lock().unwrap().configuration = configuration;
    }

    /// The currently-down virtual key as `(key_code, scan_code)`, if any.
    /// Callable from any thread.
    pub fn current_virtual_key(&self) -> Option<(i32, i32)> {
        let exported = self.exported.lock().unwrap();
        (exported.virtual_key_code != -1)
            .then(|| (exported.virtual_key_code, exported.virtual_scan_code))
    }

    /// The derived device classification. Callable from any thread.
    pub fn current_input_configuration(&self) -> InputConfiguration {
        self.exported.lock().unwrap().configuration
    }

    /// State of a scan code, preferring the currently-down virtual key over
    /// the hardware state. Callable from any thread.
    pub fn current_scan_code_state(
        &self,
        device_id: i32,
        classes: DeviceClasses,
        scan_code: i32,
    ) -> i32 {
        {
            let exported = self.exported.lock().unwrap();
            if exported.virtual_scan_code == scan_code {
                return KEY_STATE_VIRTUAL;
            }
        }
        self.event_source.scan_code_state(device_id, classes, scan_code)
    }

    /// State of a key code, preferring the currently-down virtual key over
    /// the hardware state. Callable from any thread.
    pub fn current_key_code_state(
        &self,
        device_id: i32,
        classes: DeviceClasses,
        key_code: i32,
    ) -> i32 {
        {
            let exported = self.exported.lock().unwrap();
            if exported.virtual_key_code == key_code {
                return KEY_STATE_VIRTUAL;
            }
        }
        self.event_source.key_code_state(device_id, classes, key_code)
    }

    /// Callable from any thread.
    pub fn current_switch_state(
        &self,
        device_id: i32,
        classes: DeviceClasses,
        switch_code: i32,
    ) -> i32 {
        self.event_source.switch_state(device_id, classes, switch_code)
    }

    /// Callable from any thread.
    pub fn has_keys(&self, key_codes: &[i32], out_flags: &mut [u8]) -> bool {
        self.event_source.has_keys(key_codes, out_flags)
    }
}

// ----------------------------------------------------------------------
// Device configuration
// ----------------------------------------------------------------------

fn configure_device(
    device: &mut Device,
    display_width: i32,
    display_height: i32,
    policy: &dyn ReaderPolicy,
    source: &dyn EventSource,
) {
    if device.is_multi_touch_screen() {
        let params = &mut device.touch_screen.params;
        params.x_axis = configure_axis(source, device.id, ABS_MT_POSITION_X, "X");
        params.y_axis = configure_axis(source, device.id, ABS_MT_POSITION_Y, "Y");
        params.pressure_axis = configure_axis(source, device.id, ABS_MT_TOUCH_MAJOR, "Pressure");
        params.size_axis = configure_axis(source, device.id, ABS_MT_WIDTH_MAJOR, "Size");
    } else if device.is_single_touch_screen() {
        let params = &mut device.touch_screen.params;
        params.x_axis = configure_axis(source, device.id, ABS_X, "X");
        params.y_axis = configure_axis(source, device.id, ABS_Y, "Y");
        params.pressure_axis = configure_axis(source, device.id, ABS_PRESSURE, "Pressure");
        params.size_axis = configure_axis(source, device.id, ABS_TOOL_WIDTH, "Size");
    }

    if device.is_touch_screen() {
        let touch_screen = &mut device.touch_screen;
        touch_screen.params.use_bounce_filter = policy.filter_touch_events();
        touch_screen.params.use_averaging_filter = policy.filter_touch_events();
        touch_screen.params.use_jump_filter = policy.filter_jumpy_touch_events();

        match touch_screen.params.pressure_axis {
            Some(axis) => {
                touch_screen.precalculated.pressure_origin = axis.min_value;
                touch_screen.precalculated.pressure_scale = 1.0 / axis.range() as f32;
            }
            None => {
                touch_screen.precalculated.pressure_origin = 0;
                touch_screen.precalculated.pressure_scale = 1.0;
            }
        }
        match touch_screen.params.size_axis {
            Some(axis) => {
                touch_screen.precalculated.size_origin = axis.min_value;
                touch_screen.precalculated.size_scale = 1.0 / axis.range() as f32;
            }
            None => {
                touch_screen.precalculated.size_origin = 0;
                touch_screen.precalculated.size_scale = 1.0;
            }
        }
    }

    if device.is_trackball() {
        let precalculated = &mut device.trackball.precalculated;
        precalculated.x_precision = TRACKBALL_MOVEMENT_THRESHOLD as f32;
        precalculated.y_precision = TRACKBALL_MOVEMENT_THRESHOLD as f32;
        precalculated.x_scale = 1.0 / TRACKBALL_MOVEMENT_THRESHOLD as f32;
        precalculated.y_scale = 1.0 / TRACKBALL_MOVEMENT_THRESHOLD as f32;
    }

    configure_device_for_display_size(device, display_width, display_height, policy, source);
}

fn configure_device_for_display_size(
    device: &mut Device,
    display_width: i32,
    display_height: i32,
    policy: &dyn ReaderPolicy,
    source: &dyn EventSource,
) {
    if !device.is_touch_screen() {
        return;
    }

    let mut load_virtual_keys = false;
    {
        let touch_screen = &mut device.touch_screen;
        match (touch_screen.params.x_axis, touch_screen.params.y_axis) {
            (Some(x_axis), Some(y_axis)) => {
                touch_screen.precalculated.x_origin = x_axis.min_value;
                touch_screen.precalculated.y_origin = y_axis.min_value;

                if display_width < 0 {
                    tracing::debug!(
                        "Skipping part of touch screen configuration: display size unknown"
                    );
                    touch_screen.precalculated.x_scale = 1.0;
                    touch_screen.precalculated.y_scale = 1.0;
                } else {
                    touch_screen.precalculated.x_scale =
                        display_width as f32 / x_axis.range() as f32;
                    touch_screen.precalculated.y_scale =
                        display_height as f32 / y_axis.range() as f32;
                    load_virtual_keys = true;
                }
            }
            _ => {
                touch_screen.precalculated.x_origin = 0;
                touch_screen.precalculated.x_scale = 1.0;
                touch_screen.precalculated.y_origin = 0;
                touch_screen.precalculated.y_scale = 1.0;
            }
        }
    }

    if load_virtual_keys {
        tracing::info!(
            "Device configured for display size: id=0x{:x}, name={}",
            device.id,
            device.name
        );
        configure_virtual_keys(device, display_width, display_height, policy, source);
    }
}

/// Translate the policy's virtual key layout (display coordinates) into hit
/// rectangles in raw touch coordinates. Keys whose scan code has no layout
/// mapping are dropped.
fn configure_virtual_keys(
    device: &mut Device,
    display_width: i32,
    display_height: i32,
    policy: &dyn ReaderPolicy,
    source: &dyn EventSource,
) {
    device.touch_screen.virtual_keys.clear();

    let definitions = policy.virtual_key_definitions(&device.name);
    if definitions.is_empty() {
        return;
    }

    let (Some(x_axis), Some(y_axis)) =
        (device.touch_screen.params.x_axis, device.touch_screen.params.y_axis)
    else {
        return;
    };
    let touch_left = x_axis.min_value;
    let touch_top = y_axis.min_value;
    let touch_width = x_axis.range();
    let touch_height = y_axis.range();

    device.touch_screen.virtual_keys.reserve(definitions.len());
    for definition in definitions {
        let Some((key_code, flags)) = source.map_scan_code(device.id, definition.scan_code) else {
            tracing::warn!(
                "  VirtualKey {}: could not obtain key code, ignoring",
                definition.scan_code
            );
            continue;
        };

        let half_width = definition.width / 2;
        let half_height = definition.height / 2;
        let key = VirtualKey {
            key_code,
            scan_code: definition.scan_code,
            flags,
            hit_left: (definition.center_x - half_width) * touch_width / display_width + touch_left,
            hit_right: (definition.center_x + half_width) * touch_width / display_width
                + touch_left,
            hit_top: (definition.center_y - half_height) * touch_height / display_height
                + touch_top,
            hit_bottom: (definition.center_y + half_height) * touch_height / display_height
                + touch_top,
        };

        tracing::info!(
            "  VirtualKey {}: keyCode={} hit=({}, {})-({}, {})",
            key.scan_code,
            key.key_code,
            key.hit_left,
            key.hit_top,
            key.hit_right,
            key.hit_bottom
        );
        device.touch_screen.virtual_keys.push(key);
    }
}

fn configure_axis(
    source: &dyn EventSource,
    device_id: i32,
    axis: i32,
    name: &str,
) -> Option<AbsAxisInfo> {
    match source.absolute_axis_info(device_id, axis) {
        Some(info) if info.range() != 0 => {
            tracing::info!(
                "  {}: min={} max={} flat={} fuzz={}",
                name,
                info.min_value,
                info.max_value,
                info.flat,
                info.fuzz
            );
            Some(info)
        }
        _ => {
            tracing::info!("  {}: unknown axis values, marking as invalid", name);
            None
        }
    }
}
