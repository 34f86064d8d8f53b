use crate::core::codes::MetaState;

/// Keyboard sub-state: the modifier bits currently held on this device and
/// the timestamp of the most recent key-down.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyboardState {
    pub meta_state: MetaState,
    pub down_time: i64,
}

impl KeyboardState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
