use super::cache_service::{CacheAction, CacheService};
use super::remote_outcome::settle_remote;
use crate::application::events::StateEvent;
use crate::application::ports::RemoteGateway;
use crate::domain::entities::{Comment, CommentDraft, FeedItem};
use crate::domain::value_objects::{ItemId, UserId};
use crate::infrastructure::cache::CacheRegistry;
use crate::infrastructure::sync::{
    KeyedMutex, OptimisticUpdateLedger, RequestDeduplicator, StateSyncBroadcaster,
};
use crate::shared::error::AppError;
use crate::shared::metrics::CoreMetrics;
use crate::shared::rate_limiter::RateLimiter;
use std::sync::Arc;
use std::time::Duration;

/// いいね・コメントのユーザー操作を楽観的に適用するサービス。
///
/// 流れ: ローカルの全コピーを先に書き換え → 台帳に登録 → リモート変更 →
/// 成功で confirm、失敗とタイムアウトで全コピー巻き戻し + トースト。
pub struct EngagementService {
    gateway: Arc<dyn RemoteGateway>,
    cache: Arc<CacheService>,
    registry: CacheRegistry,
    ledger: Arc<OptimisticUpdateLedger>,
    broadcaster: StateSyncBroadcaster<StateEvent>,
    comment_dedup: Arc<RequestDeduplicator<Comment>>,
    locks: KeyedMutex,
    debouncer: Arc<RateLimiter>,
    metrics: Arc<CoreMetrics>,
}

impl EngagementService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        cache: Arc<CacheService>,
        registry: CacheRegistry,
        ledger: Arc<OptimisticUpdateLedger>,
        broadcaster: StateSyncBroadcaster<StateEvent>,
        debounce_window: Duration,
        metrics: Arc<CoreMetrics>,
    ) -> Self {
        Self {
            gateway,
            cache,
            registry,
            ledger,
            broadcaster,
            comment_dedup: Arc::new(RequestDeduplicator::new()),
            locks: KeyedMutex::new(),
            debouncer: Arc::new(RateLimiter::debouncer(debounce_window)),
            metrics,
        }
    }

    /// いいねのトグル。戻り値は操作後に「いいね済みか」。
    /// 同一アイテムへの操作はキー付きミューテックスで投入順に直列化する。
    pub async fn toggle_like(&self, viewer: &UserId, item_id: &ItemId) -> Result<bool, AppError> {
        self.debouncer
            .check_and_record(&format!("like:{viewer}:{item_id}"), "Like is on cooldown")
            .await?;

        self.locks
            .with_lock(&format!("engage:{item_id}"), || {
                self.toggle_like_locked(viewer, item_id)
            })
            .await
    }

    async fn toggle_like_locked(
        &self,
        viewer: &UserId,
        item_id: &ItemId,
    ) -> Result<bool, AppError> {
        let current = self.current_item(viewer, item_id).await?;
        let action = if current.is_liked {
            CacheAction::LikeRemove {
                item_id: item_id.clone(),
            }
        } else {
            CacheAction::LikeAdd {
                item_id: item_id.clone(),
            }
        };
        let liking = !current.is_liked;

        let rollback = self.cache.apply(&action).await?;
        let (update_id, cancel) = self
            .ledger
            .register(action.payload(), rollback.into_rollback_fn())
            .await;

        let result = if liking {
            self.gateway.insert_like(viewer, item_id).await
        } else {
            self.gateway.delete_like(viewer, item_id).await
        };

        settle_remote(
            &self.ledger,
            &self.broadcaster,
            &update_id,
            &cancel,
            result,
            // 二重いいねの一意制約違反は成功と同じ
            liking,
            "Could not update like",
        )
        .await?;

        Ok(liking)
    }

    /// コメント投稿。同一キー（アイテム + 投稿者 + 本文先頭）の連投は
    /// 1 回のリモート呼び出しに束ねられ、全員が同じ結果を受け取る。
    pub async fn add_comment(
        &self,
        viewer: &UserId,
        draft: CommentDraft,
    ) -> Result<Comment, AppError> {
        let key = draft.dedup_key(viewer);
        if self.comment_dedup.is_in_flight(&key).await {
            self.metrics.record_dedup_join();
        }

        let gateway = Arc::clone(&self.gateway);
        let cache = Arc::clone(&self.cache);
        let ledger = Arc::clone(&self.ledger);
        let broadcaster = self.broadcaster.clone();
        let viewer = viewer.clone();

        self.comment_dedup
            .run(&key, async move {
                Self::submit_comment(gateway, cache, ledger, broadcaster, viewer, draft).await
            })
            .await
    }

    async fn submit_comment(
        gateway: Arc<dyn RemoteGateway>,
        cache: Arc<CacheService>,
        ledger: Arc<OptimisticUpdateLedger>,
        broadcaster: StateSyncBroadcaster<StateEvent>,
        viewer: UserId,
        draft: CommentDraft,
    ) -> Result<Comment, AppError> {
        let action = CacheAction::CommentAdd {
            item_id: draft.item_id.clone(),
        };
        let rollback = cache.apply(&action).await?;
        let (update_id, cancel) = ledger
            .register(action.payload(), rollback.into_rollback_fn())
            .await;

        let (outcome, comment) = match gateway
            .insert_comment(&viewer, &draft.item_id, &draft.content)
            .await
        {
            Ok(comment) => (Ok(()), Some(comment)),
            Err(err) => (Err(err), None),
        };

        settle_remote(
            &ledger,
            &broadcaster,
            &update_id,
            &cancel,
            outcome,
            false,
            "Could not post comment",
        )
        .await?;

        comment.ok_or_else(|| {
            AppError::Internal("comment row missing after confirmed submit".to_string())
        })
    }

    pub async fn delete_comment(
        &self,
        viewer: &UserId,
        item_id: &ItemId,
        comment_id: &str,
    ) -> Result<(), AppError> {
        let action = CacheAction::CommentRemove {
            item_id: item_id.clone(),
        };
        let rollback = self.cache.apply(&action).await?;
        let (update_id, cancel) = self
            .ledger
            .register(action.payload(), rollback.into_rollback_fn())
            .await;

        let result = match self.gateway.delete_comment(viewer, comment_id).await {
            // 既に消えているなら削除済みと同じ
            Err(AppError::NotFound(_)) => Ok(()),
            other => other,
        };

        settle_remote(
            &self.ledger,
            &self.broadcaster,
            &update_id,
            &cancel,
            result,
            false,
            "Could not delete comment",
        )
        .await
    }

    async fn current_item(&self, viewer: &UserId, item_id: &ItemId) -> Result<FeedItem, AppError> {
        if let Some(item) = self.registry.peek_item(item_id).await {
            return Ok(item);
        }
        let item = self.gateway.fetch_item(viewer, item_id).await?;
        self.registry.put_detail(item.clone()).await;
        Ok(item)
    }
}
