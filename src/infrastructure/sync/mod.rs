pub mod broadcaster;
pub mod dedup;
pub mod keyed_lock;
pub mod optimistic;

pub use broadcaster::{StateSyncBroadcaster, Subscription};
pub use dedup::RequestDeduplicator;
pub use keyed_lock::{KeyedMutex, KeyedSemaphore};
pub use optimistic::{CancelHandle, OptimisticUpdateLedger, RollbackFn};
