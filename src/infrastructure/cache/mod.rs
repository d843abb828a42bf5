pub mod registry;

pub use registry::{CacheRegistry, CacheSnapshot, SnapshotEntry};
