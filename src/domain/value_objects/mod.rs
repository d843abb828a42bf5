pub mod item_id;
pub mod item_kind;
pub mod partition;
pub mod update_id;
pub mod user_id;

pub use item_id::ItemId;
pub use item_kind::ItemKind;
pub use partition::{PartitionKey, PartitionKind};
pub use update_id::OptimisticUpdateId;
pub use user_id::UserId;
