use crate::application::events::StateEvent;
use crate::application::ports::RemoteGateway;
use crate::domain::value_objects::{PartitionKey, PartitionKind, UserId};
use crate::infrastructure::cache::CacheRegistry;
use crate::infrastructure::sync::{KeyedSemaphore, OptimisticUpdateLedger, StateSyncBroadcaster};
use crate::shared::error::AppError;
use crate::shared::metrics::current_unix_ms;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub refreshed_partitions: usize,
    pub failed_partitions: usize,
    pub pending_update_ids: Vec<String>,
    pub emitted_at: u64,
}

/// 既知のリストパーティションを定期的にリモートから引き直すジョブ。
///
/// 自動ロールバック後に成功した再試行などで残るリモートとのずれは、
/// ここで吸収される。gate により同時実行は 1 本に抑える。
pub struct RefreshService {
    gateway: Arc<dyn RemoteGateway>,
    registry: CacheRegistry,
    ledger: Arc<OptimisticUpdateLedger>,
    broadcaster: StateSyncBroadcaster<StateEvent>,
    page_size: u32,
    interval: Duration,
    gate: Mutex<()>,
    semaphore: KeyedSemaphore,
}

/// 1 回のリフレッシュで同時に引き直すパーティション数の上限
const MAX_CONCURRENT_FETCHES: usize = 4;

impl RefreshService {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        registry: CacheRegistry,
        ledger: Arc<OptimisticUpdateLedger>,
        broadcaster: StateSyncBroadcaster<StateEvent>,
        page_size: u32,
        interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            registry,
            ledger,
            broadcaster,
            page_size,
            interval,
            gate: Mutex::new(()),
            semaphore: KeyedSemaphore::new(),
        })
    }

    pub async fn refresh_once(&self, viewer: &UserId) -> Result<RefreshReport, AppError> {
        let _guard = self.gate.lock().await;

        let keys = self.registry.list_keys().await;
        // セマフォで同時取得数を抑えつつ並行に引き直す
        let results = futures::future::join_all(keys.iter().map(|key| {
            self.semaphore
                .with_permit("refresh", MAX_CONCURRENT_FETCHES, || {
                    self.refresh_partition(viewer, key)
                })
        }))
        .await;

        let mut refreshed = 0usize;
        let mut failed = 0usize;
        for (key, result) in keys.iter().zip(results) {
            match result {
                Ok(true) => refreshed += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(partition = %key, error = %err, "partition refresh failed");
                    failed += 1;
                }
            }
        }

        let report = RefreshReport {
            refreshed_partitions: refreshed,
            failed_partitions: failed,
            pending_update_ids: self
                .ledger
                .pending_ids()
                .await
                .into_iter()
                .map(|id| id.to_string())
                .collect(),
            emitted_at: current_unix_ms(),
        };
        debug!(
            refreshed = report.refreshed_partitions,
            failed = report.failed_partitions,
            pending = report.pending_update_ids.len(),
            "refresh pass complete"
        );
        Ok(report)
    }

    async fn refresh_partition(
        &self,
        viewer: &UserId,
        key: &PartitionKey,
    ) -> Result<bool, AppError> {
        let items = match key.kind() {
            PartitionKind::HomeFeed => {
                self.gateway
                    .fetch_home_feed(viewer, key.page().unwrap_or(0), self.page_size)
                    .await?
            }
            PartitionKind::RecipeBook => {
                // 他の閲覧者のスコープはこのセッションでは更新しない
                if key.scope() != Some(viewer.as_str()) {
                    return Ok(false);
                }
                self.gateway
                    .fetch_recipe_book(viewer, key.page().unwrap_or(0), self.page_size)
                    .await?
            }
            PartitionKind::ProfileItems => {
                let profile = key
                    .scope()
                    .and_then(|scope| UserId::new(scope.to_string()).ok())
                    .ok_or_else(|| {
                        AppError::Internal(format!("profile partition without scope: {key}"))
                    })?;
                self.gateway.fetch_profile_items(viewer, &profile).await?
            }
            _ => return Ok(false),
        };

        // 再取得した確定値を流す。変わっていないアイテムは等価スキップされる。
        for item in &items {
            self.broadcaster.notify(
                &StateEvent::item_key(&item.id),
                StateEvent::ItemUpdated(item.clone()),
            );
        }
        self.registry.put_list(key.clone(), items).await?;
        Ok(true)
    }

    /// 定期実行タスクを起動する。返ったハンドルを abort すれば止まる。
    pub fn spawn_periodic(self: &Arc<Self>, viewer: UserId) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.interval);
            // 起動直後の即時 tick は読み捨てる
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = service.refresh_once(&viewer).await {
                    warn!(error = %err, "periodic refresh failed");
                }
            }
        })
    }
}
