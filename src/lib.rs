// モジュール定義
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod shared;
pub mod state;

pub use application::events::{StateEvent, ToastEvent, ToastLevel};
pub use application::ports::{
    PushKeys, PushKind, PushNotification, PushSender, PushSubscription, RemoteChange,
    RemoteGateway,
};
pub use application::services::{
    CacheAction, CacheRollback, CacheService, EngagementService, FollowService, ItemService,
    NotificationService, RefreshReport, RefreshService, SessionService,
};
pub use shared::config::AppConfig;
pub use shared::error::{AppError, Result};
pub use state::AppState;

/// ログ設定の初期化。UI シェル側の起動処理から一度だけ呼ぶ。
pub fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kondate_core=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
