pub mod bits;
pub mod codes;
pub mod device;
pub mod reader;
pub mod tracker;
pub mod traits;

// Re-export key types for convenience
pub use bits::BitSet32;
pub use reader::InputReader;
pub use tracker::{PointerTracker, ProximityTracker};
pub use traits::{EventSource, InputDispatcher, RawEvent, ReaderPolicy};
