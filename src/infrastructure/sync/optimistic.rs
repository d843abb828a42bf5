use crate::domain::value_objects::OptimisticUpdateId;
use crate::shared::metrics::CoreMetrics;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// ロールバック処理。登録時点の状態を復元する Future を返す。
pub type RollbackFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// 遅延して返ってきたリモート応答が、すでにロールバック済みの更新を
/// 再適用しないか確認するためのハンドル。
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

struct LedgerEntry {
    payload: serde_json::Value,
    rollback: RollbackFn,
    cancel: CancelHandle,
    registered_at: DateTime<Utc>,
}

/// 未確認の楽観的更新の台帳。
///
/// 各エントリは confirm か rollback のどちらか一方で終端する。タイムアウトと
/// confirm/rollback が競合した場合、先にエントリを削除した側が勝ち、
/// 残りは no-op になる。
pub struct OptimisticUpdateLedger {
    entries: Mutex<HashMap<OptimisticUpdateId, LedgerEntry>>,
    timeout: Duration,
    metrics: Arc<CoreMetrics>,
}

impl OptimisticUpdateLedger {
    pub fn new(timeout: Duration, metrics: Arc<CoreMetrics>) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            timeout,
            metrics,
        })
    }

    /// エントリを登録し、未確認のまま放置された場合の自動ロールバックを予約する
    pub async fn register(
        self: &Arc<Self>,
        payload: serde_json::Value,
        rollback: RollbackFn,
    ) -> (OptimisticUpdateId, CancelHandle) {
        let id = OptimisticUpdateId::generate();
        let cancel = CancelHandle::new();

        {
            let mut entries = self.entries.lock().await;
            entries.insert(
                id.clone(),
                LedgerEntry {
                    payload,
                    rollback,
                    cancel: cancel.clone(),
                    registered_at: Utc::now(),
                },
            );
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let timer_id = id.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(ledger) = weak.upgrade() {
                ledger.expire(&timer_id).await;
            }
        });

        (id, cancel)
    }

    /// リモート成功の確定。エントリを削除し、タイマーは空振りになる。
    pub async fn confirm(&self, id: &OptimisticUpdateId) -> bool {
        let removed = self.entries.lock().await.remove(id);
        match removed {
            Some(_) => {
                self.metrics.optimistic.record_success();
                debug!(update_id = %id, "optimistic update confirmed");
                true
            }
            None => false,
        }
    }

    /// 明示的なロールバック。クロージャは存在チェックに守られて一度だけ走る。
    pub async fn rollback(&self, id: &OptimisticUpdateId) -> bool {
        let removed = self.entries.lock().await.remove(id);
        match removed {
            Some(entry) => {
                entry.cancel.cancel();
                (entry.rollback)().await;
                self.metrics.optimistic.record_failure();
                debug!(update_id = %id, "optimistic update rolled back");
                true
            }
            None => false,
        }
    }

    async fn expire(&self, id: &OptimisticUpdateId) {
        let removed = self.entries.lock().await.remove(id);
        if let Some(entry) = removed {
            warn!(
                update_id = %id,
                payload = %entry.payload,
                "optimistic update timed out without confirmation, rolling back"
            );
            entry.cancel.cancel();
            (entry.rollback)().await;
            self.metrics.optimistic.record_failure();
        }
    }

    /// 終了処理用。残っているエントリを全てロールバックする。
    pub async fn rollback_all(&self) -> usize {
        let drained: Vec<(OptimisticUpdateId, LedgerEntry)> =
            self.entries.lock().await.drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            warn!(update_id = %id, "rolling back pending optimistic update on teardown");
            entry.cancel.cancel();
            (entry.rollback)().await;
            self.metrics.optimistic.record_failure();
        }
        count
    }

    /// max_age より古い取り残しをロールバックする
    pub async fn cleanup(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());
        let stale: Vec<(OptimisticUpdateId, LedgerEntry)> = {
            let mut entries = self.entries.lock().await;
            let ids: Vec<OptimisticUpdateId> = entries
                .iter()
                .filter(|(_, entry)| entry.registered_at < cutoff)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|entry| (id, entry)))
                .collect()
        };
        let count = stale.len();
        for (id, entry) in stale {
            warn!(update_id = %id, "cleaning up stale optimistic update");
            entry.cancel.cancel();
            (entry.rollback)().await;
            self.metrics.optimistic.record_failure();
        }
        count
    }

    pub async fn pending_ids(&self) -> Vec<OptimisticUpdateId> {
        self.entries.lock().await.keys().cloned().collect()
    }

    pub async fn pending_count(&self) -> usize {
        self.entries.lock().await.len()
    }
}
