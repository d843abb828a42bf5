use super::cache_service::{CacheAction, CacheService};
use super::remote_outcome::settle_remote;
use crate::application::events::StateEvent;
use crate::application::ports::RemoteGateway;
use crate::domain::value_objects::UserId;
use crate::infrastructure::sync::{OptimisticUpdateLedger, StateSyncBroadcaster};
use crate::shared::error::AppError;
use crate::shared::rate_limiter::RateLimiter;
use futures::FutureExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// 閲覧者のフォロー集合を持つドメインストア。
///
/// 集合はセッション開始時に一度だけロードし、以後は楽観的に書き換える。
/// 関係ごとの遷移は
/// `not-following → following-pending → following-confirmed`、
/// 失敗時は `following-pending → not-following`（unfollow は対称）。
pub struct FollowService {
    follows: Arc<RwLock<HashSet<UserId>>>,
    gateway: Arc<dyn RemoteGateway>,
    cache: Arc<CacheService>,
    ledger: Arc<OptimisticUpdateLedger>,
    broadcaster: StateSyncBroadcaster<StateEvent>,
    debouncer: RateLimiter,
}

impl FollowService {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        cache: Arc<CacheService>,
        ledger: Arc<OptimisticUpdateLedger>,
        broadcaster: StateSyncBroadcaster<StateEvent>,
        debounce_window: Duration,
    ) -> Self {
        Self {
            follows: Arc::new(RwLock::new(HashSet::new())),
            gateway,
            cache,
            ledger,
            broadcaster,
            debouncer: RateLimiter::debouncer(debounce_window),
        }
    }

    /// リモートの follows テーブルから集合を読み直す
    pub async fn load(&self, viewer: &UserId) -> Result<usize, AppError> {
        let follows = self.gateway.fetch_follows(viewer).await?;
        let mut guard = self.follows.write().await;
        guard.clear();
        guard.extend(follows);
        Ok(guard.len())
    }

    pub async fn is_following(&self, target: &UserId) -> bool {
        self.follows.read().await.contains(target)
    }

    pub async fn follow_set(&self) -> HashSet<UserId> {
        self.follows.read().await.clone()
    }

    pub async fn follow(&self, viewer: &UserId, target: &UserId) -> Result<(), AppError> {
        if viewer == target {
            return Err(AppError::InvalidInput(
                "Cannot follow yourself".to_string(),
            ));
        }
        self.debouncer
            .check_and_record(
                &format!("follow:{viewer}:{target}"),
                "Follow is on cooldown",
            )
            .await?;

        {
            let mut follows = self.follows.write().await;
            if !follows.insert(target.clone()) {
                debug!(target = %target, "already following");
                return Ok(());
            }
        }
        self.broadcast_follow(target, true);

        let action = CacheAction::FollowAdd {
            user_id: target.clone(),
        };
        let cache_rollback = self.cache.apply(&action).await?;

        let follows = Arc::clone(&self.follows);
        let broadcaster = self.broadcaster.clone();
        let rollback_target = target.clone();
        let rollback = Box::new(move || {
            async move {
                follows.write().await.remove(&rollback_target);
                broadcaster.notify(
                    &StateEvent::follow_key(&rollback_target),
                    StateEvent::FollowChanged {
                        target: rollback_target.clone(),
                        following: false,
                    },
                );
                cache_rollback.rollback().await;
            }
            .boxed()
        });

        let (update_id, cancel) = self.ledger.register(action.payload(), rollback).await;
        let result = self.gateway.insert_follow(viewer, target).await;

        settle_remote(
            &self.ledger,
            &self.broadcaster,
            &update_id,
            &cancel,
            result,
            // 既にフォロー済みの一意制約違反は成功と同じ
            true,
            "Could not follow user",
        )
        .await
    }

    pub async fn unfollow(&self, viewer: &UserId, target: &UserId) -> Result<(), AppError> {
        self.debouncer
            .check_and_record(
                &format!("follow:{viewer}:{target}"),
                "Follow is on cooldown",
            )
            .await?;

        {
            let mut follows = self.follows.write().await;
            if !follows.remove(target) {
                debug!(target = %target, "not following");
                return Ok(());
            }
        }
        self.broadcast_follow(target, false);

        let action = CacheAction::FollowRemove {
            user_id: target.clone(),
        };
        let cache_rollback = self.cache.apply(&action).await?;

        let follows = Arc::clone(&self.follows);
        let broadcaster = self.broadcaster.clone();
        let rollback_target = target.clone();
        let rollback = Box::new(move || {
            async move {
                follows.write().await.insert(rollback_target.clone());
                broadcaster.notify(
                    &StateEvent::follow_key(&rollback_target),
                    StateEvent::FollowChanged {
                        target: rollback_target.clone(),
                        following: true,
                    },
                );
                cache_rollback.rollback().await;
            }
            .boxed()
        });

        let (update_id, cancel) = self.ledger.register(action.payload(), rollback).await;
        let result = self.gateway.delete_follow(viewer, target).await;

        settle_remote(
            &self.ledger,
            &self.broadcaster,
            &update_id,
            &cancel,
            result,
            false,
            "Could not unfollow user",
        )
        .await
    }

    /// リアルタイム購読で届いた確定済みの変更を反映する（台帳は通さない）
    pub async fn apply_remote_change(&self, target: &UserId, following: bool) {
        let changed = {
            let mut follows = self.follows.write().await;
            if following {
                follows.insert(target.clone())
            } else {
                follows.remove(target)
            }
        };
        if !changed {
            return;
        }
        self.broadcast_follow(target, following);
        let action = if following {
            CacheAction::FollowAdd {
                user_id: target.clone(),
            }
        } else {
            CacheAction::FollowRemove {
                user_id: target.clone(),
            }
        };
        // リモート発の確定状態なのでロールバックは捨てる
        match self.cache.apply(&action).await {
            Ok(_rollback) => {}
            Err(err) => debug!(error = %err, "remote follow change not applied to caches"),
        }
    }

    /// セッション終了時に集合を空に戻す
    pub async fn clear(&self) {
        self.follows.write().await.clear();
    }

    fn broadcast_follow(&self, target: &UserId, following: bool) {
        self.broadcaster.notify(
            &StateEvent::follow_key(target),
            StateEvent::FollowChanged {
                target: target.clone(),
                following,
            },
        );
    }
}
