use crate::application::events::StateEvent;
use crate::domain::value_objects::{ItemId, UserId};
use crate::infrastructure::cache::{CacheRegistry, CacheSnapshot};
use crate::infrastructure::sync::{RollbackFn, StateSyncBroadcaster};
use crate::shared::error::AppError;
use futures::FutureExt;
use serde::Serialize;

/// ファンアウト対象となる意味的アクション
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CacheAction {
    LikeAdd { item_id: ItemId },
    LikeRemove { item_id: ItemId },
    FollowAdd { user_id: UserId },
    FollowRemove { user_id: UserId },
    ThumbnailChange { item_id: ItemId, index: usize },
    CommentAdd { item_id: ItemId },
    CommentRemove { item_id: ItemId },
}

impl CacheAction {
    /// 台帳に残す記録用ペイロード
    pub fn payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// apply が返す巻き戻しハンドル。変更前の全パーティションの値を抱えている。
pub struct CacheRollback {
    registry: CacheRegistry,
    broadcaster: StateSyncBroadcaster<StateEvent>,
    snapshot: CacheSnapshot,
}

impl CacheRollback {
    pub fn is_noop(&self) -> bool {
        self.snapshot.is_empty()
    }

    pub fn touched(&self) -> usize {
        self.snapshot.len()
    }

    /// 全パーティションを変更前の値に戻し、復元後の状態を購読者へ流す
    pub async fn rollback(self) {
        let restored = self.registry.restore(self.snapshot).await;
        for item in restored {
            let key = StateEvent::item_key(&item.id);
            self.broadcaster.notify(&key, StateEvent::ItemUpdated(item));
        }
    }

    /// 楽観的更新台帳に渡すクロージャへ変換する
    pub fn into_rollback_fn(self) -> RollbackFn {
        Box::new(move || self.rollback().boxed())
    }
}

/// セマンティックなユーザー操作を全キャッシュパーティションへ展開する
/// ファンアウトライタ。
pub struct CacheService {
    registry: CacheRegistry,
    broadcaster: StateSyncBroadcaster<StateEvent>,
}

impl CacheService {
    pub fn new(registry: CacheRegistry, broadcaster: StateSyncBroadcaster<StateEvent>) -> Self {
        Self {
            registry,
            broadcaster,
        }
    }

    /// アクションのデルタを計算し、対象アイテム/ユーザーのコピーを持つ
    /// 全パーティションへ書き込む。戻り値のロールバックで元に戻せる。
    pub async fn apply(&self, action: &CacheAction) -> Result<CacheRollback, AppError> {
        match action {
            CacheAction::LikeAdd { item_id } => {
                Ok(self.apply_item(item_id, |item| item.mark_liked()).await)
            }
            CacheAction::LikeRemove { item_id } => {
                Ok(self.apply_item(item_id, |item| item.mark_unliked()).await)
            }
            CacheAction::CommentAdd { item_id } => {
                Ok(self
                    .apply_item(item_id, |item| item.increment_comments())
                    .await)
            }
            CacheAction::CommentRemove { item_id } => {
                Ok(self
                    .apply_item(item_id, |item| item.decrement_comments())
                    .await)
            }
            CacheAction::ThumbnailChange { item_id, index } => {
                // どのコピーでも画像リストは同じなので 1 件で検証できる
                if let Some(copy) = self.registry.peek_item(item_id).await {
                    if *index >= copy.image_urls.len() {
                        return Err(AppError::InvalidInput(format!(
                            "Thumbnail index {} out of range for {} images",
                            index,
                            copy.image_urls.len()
                        )));
                    }
                }
                let index = *index;
                Ok(self
                    .apply_item(item_id, move |item| {
                        let _ = item.set_thumbnail(index);
                    })
                    .await)
            }
            CacheAction::FollowAdd { user_id } => Ok(self.apply_author(user_id, true).await),
            CacheAction::FollowRemove { user_id } => Ok(self.apply_author(user_id, false).await),
        }
    }

    async fn apply_item<F>(&self, item_id: &ItemId, mutate: F) -> CacheRollback
    where
        F: Fn(&mut crate::domain::entities::FeedItem),
    {
        let (snapshot, after) = self.registry.update_item(item_id, mutate).await;
        if let Some(item) = after {
            let key = StateEvent::item_key(&item.id);
            self.broadcaster.notify(&key, StateEvent::ItemUpdated(item));
        }
        self.rollback_for(snapshot)
    }

    async fn apply_author(&self, user_id: &UserId, following: bool) -> CacheRollback {
        let (snapshot, updated) = self
            .registry
            .update_author(
                user_id,
                |item| item.author.set_following(following),
                |liker| liker.set_following(following),
            )
            .await;
        for item in updated {
            let key = StateEvent::item_key(&item.id);
            self.broadcaster.notify(&key, StateEvent::ItemUpdated(item));
        }
        self.rollback_for(snapshot)
    }

    fn rollback_for(&self, snapshot: CacheSnapshot) -> CacheRollback {
        CacheRollback {
            registry: self.registry.clone(),
            broadcaster: self.broadcaster.clone(),
            snapshot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Author, FeedItem};
    use crate::domain::value_objects::{ItemKind, PartitionKey};
    use crate::shared::metrics::CoreMetrics;
    use std::sync::Arc;

    fn id(value: &str) -> ItemId {
        ItemId::new(value.to_string()).unwrap()
    }

    fn user(value: &str) -> UserId {
        UserId::new(value.to_string()).unwrap()
    }

    fn sample_item(item_id: &str, author_id: &str, likes: u32) -> FeedItem {
        let author = Author::new(user(author_id), format!("user_{author_id}"));
        let mut item = FeedItem::new(
            id(item_id),
            author,
            ItemKind::Recipe,
            "Nikujaga".to_string(),
            "Stewed".to_string(),
        )
        .with_images(vec!["a.jpg".to_string(), "b.jpg".to_string()]);
        item.likes_count = likes;
        item
    }

    fn service() -> (CacheService, CacheRegistry, StateSyncBroadcaster<StateEvent>) {
        let registry = CacheRegistry::new(16, Arc::new(CoreMetrics::new()));
        let broadcaster: StateSyncBroadcaster<StateEvent> = StateSyncBroadcaster::new();
        (
            CacheService::new(registry.clone(), broadcaster.clone()),
            registry,
            broadcaster,
        )
    }

    #[tokio::test]
    async fn test_like_add_fans_out_and_rolls_back() {
        let (service, registry, _broadcaster) = service();
        registry
            .put_list(PartitionKey::home_feed(0), vec![sample_item("i1", "u1", 3)])
            .await
            .unwrap();
        registry.put_detail(sample_item("i1", "u1", 3)).await;

        let rollback = service
            .apply(&CacheAction::LikeAdd { item_id: id("i1") })
            .await
            .unwrap();
        assert_eq!(rollback.touched(), 2);

        let detail = registry.get_detail(&id("i1")).await.unwrap();
        assert!(detail.is_liked);
        assert_eq!(detail.likes_count, 4);

        rollback.rollback().await;
        let detail = registry.get_detail(&id("i1")).await.unwrap();
        assert!(!detail.is_liked);
        assert_eq!(detail.likes_count, 3);
    }

    #[tokio::test]
    async fn test_apply_with_no_copies_is_noop() {
        let (service, _registry, _broadcaster) = service();
        let rollback = service
            .apply(&CacheAction::LikeAdd { item_id: id("ghost") })
            .await
            .unwrap();
        assert!(rollback.is_noop());
        rollback.rollback().await;
    }

    #[tokio::test]
    async fn test_thumbnail_change_rejects_out_of_range() {
        let (service, registry, _broadcaster) = service();
        registry.put_detail(sample_item("i1", "u1", 0)).await;

        let result = service
            .apply(&CacheAction::ThumbnailChange {
                item_id: id("i1"),
                index: 2,
            })
            .await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));

        // 何も変わっていない
        let detail = registry.get_detail(&id("i1")).await.unwrap();
        assert_eq!(detail.thumbnail_index, 0);
    }

    #[tokio::test]
    async fn test_thumbnail_change_propagates_to_every_copy() {
        let (service, registry, _broadcaster) = service();
        registry
            .put_list(PartitionKey::home_feed(0), vec![sample_item("i1", "u1", 0)])
            .await
            .unwrap();
        registry.put_detail(sample_item("i1", "u1", 0)).await;

        service
            .apply(&CacheAction::ThumbnailChange {
                item_id: id("i1"),
                index: 1,
            })
            .await
            .unwrap();

        let feed = registry.get_list(&PartitionKey::home_feed(0)).await.unwrap();
        assert_eq!(feed[0].thumbnail_index, 1);
        assert_eq!(feed[0].display_image_urls()[0], "b.jpg");
        let detail = registry.get_detail(&id("i1")).await.unwrap();
        assert_eq!(detail.thumbnail_index, 1);
    }

    #[tokio::test]
    async fn test_follow_add_notifies_item_subscribers() {
        let (service, registry, broadcaster) = service();
        registry
            .put_list(PartitionKey::home_feed(0), vec![sample_item("i1", "u9", 0)])
            .await
            .unwrap();

        let key = StateEvent::item_key(&id("i1"));
        let (_subscription, mut rx) = broadcaster.subscribe(&key);

        service
            .apply(&CacheAction::FollowAdd { user_id: user("u9") })
            .await
            .unwrap();

        match rx.recv().await {
            Some(StateEvent::ItemUpdated(item)) => assert!(item.author.is_following),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
