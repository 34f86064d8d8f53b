//! Convenience re-exports for embedders.

pub use crate::core::bits::BitSet32;
pub use crate::core::codes::{
    DeviceClasses, EventNature, KeyEventFlags, MetaState, PolicyActions, PolicyFlags,
};
pub use crate::core::reader::InputReader;
pub use crate::core::tracker::{PointerTracker, ProximityTracker};
pub use crate::core::traits::{
    AbsAxisInfo, DisplayInfo, EventSource, InputConfiguration, InputDispatcher, PointerCoords,
    RawEvent, ReaderPolicy, VirtualKeyDefinition,
};
