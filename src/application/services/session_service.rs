use super::follow_service::FollowService;
use crate::application::events::StateEvent;
use crate::application::ports::{RemoteChange, RemoteGateway};
use crate::domain::value_objects::UserId;
use crate::infrastructure::cache::CacheRegistry;
use crate::infrastructure::sync::{OptimisticUpdateLedger, StateSyncBroadcaster};
use crate::shared::error::AppError;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// 閲覧者セッションのライフサイクル。
///
/// start でフォロー集合のロードとリアルタイム購読を開き、shutdown で
/// 未確定の楽観的更新を巻き戻してから全キャッシュを破棄する。
/// 状態は全てセッション単位で、次回 start 時にリモートから再構築される。
pub struct SessionService {
    viewer: RwLock<Option<UserId>>,
    gateway: Arc<dyn RemoteGateway>,
    follow_service: Arc<FollowService>,
    registry: CacheRegistry,
    ledger: Arc<OptimisticUpdateLedger>,
    broadcaster: StateSyncBroadcaster<StateEvent>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionService {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        follow_service: Arc<FollowService>,
        registry: CacheRegistry,
        ledger: Arc<OptimisticUpdateLedger>,
        broadcaster: StateSyncBroadcaster<StateEvent>,
    ) -> Self {
        Self {
            viewer: RwLock::new(None),
            gateway,
            follow_service,
            registry,
            ledger,
            broadcaster,
            listener: Mutex::new(None),
        }
    }

    pub async fn start(&self, viewer: UserId) -> Result<(), AppError> {
        self.stop_listener().await;

        let loaded = self.follow_service.load(&viewer).await?;
        info!(viewer = %viewer, follows = loaded, "session started");

        let receiver = self.gateway.subscribe_changes(&viewer).await?;
        let handle = self.spawn_listener(receiver);
        *self.listener.lock().await = Some(handle);
        *self.viewer.write().await = Some(viewer);
        Ok(())
    }

    pub async fn viewer(&self) -> Result<UserId, AppError> {
        self.viewer
            .read()
            .await
            .clone()
            .ok_or_else(|| AppError::Unauthorized("No active session".to_string()))
    }

    pub async fn is_active(&self) -> bool {
        self.viewer.read().await.is_some()
    }

    /// セッション終了。残っている楽観的更新は全て巻き戻す。
    pub async fn shutdown(&self) {
        let rolled_back = self.ledger.rollback_all().await;
        if rolled_back > 0 {
            warn!(count = rolled_back, "rolled back pending updates on shutdown");
        }
        self.stop_listener().await;
        self.follow_service.clear().await;
        self.registry.clear().await;
        self.broadcaster.clear();
        *self.viewer.write().await = None;
        info!("session shut down");
    }

    fn spawn_listener(
        &self,
        mut receiver: tokio::sync::mpsc::Receiver<RemoteChange>,
    ) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let broadcaster = self.broadcaster.clone();
        let follow_service = Arc::clone(&self.follow_service);

        tokio::spawn(async move {
            while let Some(change) = receiver.recv().await {
                match change {
                    RemoteChange::ItemPatched {
                        item_id,
                        likes_count,
                        comments_count,
                        thumbnail_index,
                    } => {
                        // 確定済みの値なのでスナップショットは捨てる
                        let (_, after) = registry
                            .update_item(&item_id, |item| {
                                item.likes_count = likes_count;
                                item.comments_count = comments_count;
                                if thumbnail_index < item.image_urls.len() {
                                    item.thumbnail_index = thumbnail_index;
                                }
                            })
                            .await;
                        if let Some(item) = after {
                            broadcaster.notify(
                                &StateEvent::item_key(&item_id),
                                StateEvent::ItemUpdated(item),
                            );
                        }
                    }
                    RemoteChange::FollowPatched { target, following } => {
                        follow_service.apply_remote_change(&target, following).await;
                    }
                }
            }
            info!("remote change listener terminated");
        })
    }

    async fn stop_listener(&self) {
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
        }
    }
}
