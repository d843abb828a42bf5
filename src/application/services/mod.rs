pub mod cache_service;
pub mod engagement_service;
pub mod follow_service;
pub mod item_service;
pub mod notification_service;
pub mod refresh_service;
mod remote_outcome;
pub mod session_service;

pub use cache_service::{CacheAction, CacheRollback, CacheService};
pub use engagement_service::EngagementService;
pub use follow_service::FollowService;
pub use item_service::ItemService;
pub use notification_service::NotificationService;
pub use refresh_service::{RefreshReport, RefreshService};
pub use session_service::SessionService;
