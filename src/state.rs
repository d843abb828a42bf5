use std::sync::Arc;
use std::time::Duration;

use crate::application::events::StateEvent;
use crate::application::ports::{PushSender, RemoteGateway};
use crate::application::services::{
    CacheService, EngagementService, FollowService, ItemService, NotificationService,
    RefreshService, SessionService,
};
use crate::infrastructure::cache::CacheRegistry;
use crate::infrastructure::remote::{HttpPushSender, HttpRemoteGateway};
use crate::infrastructure::sync::{OptimisticUpdateLedger, StateSyncBroadcaster};
use crate::shared::config::AppConfig;
use crate::shared::error::AppError;
use crate::shared::metrics::CoreMetrics;

/// アプリケーション全体の状態を束ねる合成ルート。
///
/// サービスは全てここで明示的に組み立てて注入する。グローバルは持たない。
/// 破棄するときは `shutdown` で未確定の更新を巻き戻してから落とすこと。
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub metrics: Arc<CoreMetrics>,
    pub broadcaster: StateSyncBroadcaster<StateEvent>,
    pub registry: CacheRegistry,
    pub ledger: Arc<OptimisticUpdateLedger>,
    pub cache_service: Arc<CacheService>,
    pub engagement_service: Arc<EngagementService>,
    pub follow_service: Arc<FollowService>,
    pub item_service: Arc<ItemService>,
    pub session_service: Arc<SessionService>,
    pub notification_service: Arc<NotificationService>,
    pub refresh_service: Arc<RefreshService>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self, AppError> {
        config.validate().map_err(AppError::ConfigurationError)?;
        let gateway: Arc<dyn RemoteGateway> = Arc::new(HttpRemoteGateway::new(&config.remote)?);
        let push: Arc<dyn PushSender> = Arc::new(HttpPushSender::new(&config.push)?);
        Ok(Self::with_gateways(config, gateway, push))
    }

    /// テストや別実装の注入用
    pub fn with_gateways(
        config: AppConfig,
        gateway: Arc<dyn RemoteGateway>,
        push: Arc<dyn PushSender>,
    ) -> Self {
        let metrics = Arc::new(CoreMetrics::new());
        let broadcaster: StateSyncBroadcaster<StateEvent> = StateSyncBroadcaster::new();
        let registry = CacheRegistry::new(config.cache.detail_capacity, Arc::clone(&metrics));
        let ledger = OptimisticUpdateLedger::new(
            Duration::from_millis(config.sync.optimistic_timeout_ms),
            Arc::clone(&metrics),
        );
        let debounce = Duration::from_millis(config.sync.debounce_ms);

        let cache_service = Arc::new(CacheService::new(registry.clone(), broadcaster.clone()));
        let engagement_service = Arc::new(EngagementService::new(
            Arc::clone(&gateway),
            Arc::clone(&cache_service),
            registry.clone(),
            Arc::clone(&ledger),
            broadcaster.clone(),
            debounce,
            Arc::clone(&metrics),
        ));
        let follow_service = Arc::new(FollowService::new(
            Arc::clone(&gateway),
            Arc::clone(&cache_service),
            Arc::clone(&ledger),
            broadcaster.clone(),
            debounce,
        ));
        let item_service = Arc::new(ItemService::new(
            Arc::clone(&gateway),
            registry.clone(),
            Arc::clone(&cache_service),
            Arc::clone(&ledger),
            broadcaster.clone(),
            config.cache.clone(),
        ));
        let session_service = Arc::new(SessionService::new(
            Arc::clone(&gateway),
            Arc::clone(&follow_service),
            registry.clone(),
            Arc::clone(&ledger),
            broadcaster.clone(),
        ));
        let notification_service = Arc::new(NotificationService::new(push, config.push.enabled));
        let refresh_service = RefreshService::new(
            gateway,
            registry.clone(),
            Arc::clone(&ledger),
            broadcaster.clone(),
            config.cache.feed_page_size,
            Duration::from_secs(config.sync.refresh_interval_secs),
        );

        Self {
            config,
            metrics,
            broadcaster,
            registry,
            ledger,
            cache_service,
            engagement_service,
            follow_service,
            item_service,
            session_service,
            notification_service,
            refresh_service,
        }
    }

    pub async fn shutdown(&self) {
        self.session_service.shutdown().await;
    }
}
