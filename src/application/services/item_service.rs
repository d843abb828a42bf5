use super::cache_service::{CacheAction, CacheService};
use super::remote_outcome::settle_remote;
use crate::application::events::StateEvent;
use crate::application::ports::RemoteGateway;
use crate::domain::entities::{Author, FeedItem};
use crate::domain::value_objects::{ItemId, PartitionKey, UserId};
use crate::infrastructure::cache::CacheRegistry;
use crate::infrastructure::sync::{KeyedMutex, OptimisticUpdateLedger, StateSyncBroadcaster};
use crate::shared::config::CacheConfig;
use crate::shared::error::AppError;
use std::sync::Arc;

/// フィード各面のロードとサムネイル変更フロー。
///
/// リモートから取得した行はそのままパーティションに流し込む。閲覧者ごとの
/// 投影（is_liked/is_following）はゲートウェイ側で埋めて返ってくる。
pub struct ItemService {
    gateway: Arc<dyn RemoteGateway>,
    registry: CacheRegistry,
    cache: Arc<CacheService>,
    ledger: Arc<OptimisticUpdateLedger>,
    broadcaster: StateSyncBroadcaster<StateEvent>,
    locks: KeyedMutex,
    config: CacheConfig,
}

impl ItemService {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        registry: CacheRegistry,
        cache: Arc<CacheService>,
        ledger: Arc<OptimisticUpdateLedger>,
        broadcaster: StateSyncBroadcaster<StateEvent>,
        config: CacheConfig,
    ) -> Self {
        Self {
            gateway,
            registry,
            cache,
            ledger,
            broadcaster,
            locks: KeyedMutex::new(),
            config,
        }
    }

    pub async fn load_home_feed(
        &self,
        viewer: &UserId,
        page: u32,
    ) -> Result<Vec<FeedItem>, AppError> {
        let items = self
            .gateway
            .fetch_home_feed(viewer, page, self.config.feed_page_size)
            .await?;
        self.registry
            .put_list(PartitionKey::home_feed(page), items.clone())
            .await?;
        Ok(items)
    }

    pub async fn load_recipe_book(
        &self,
        viewer: &UserId,
        page: u32,
    ) -> Result<Vec<FeedItem>, AppError> {
        let items = self
            .gateway
            .fetch_recipe_book(viewer, page, self.config.feed_page_size)
            .await?;
        self.registry
            .put_list(PartitionKey::recipe_book(viewer, page), items.clone())
            .await?;
        Ok(items)
    }

    pub async fn load_profile_items(
        &self,
        viewer: &UserId,
        profile: &UserId,
    ) -> Result<Vec<FeedItem>, AppError> {
        let items = self.gateway.fetch_profile_items(viewer, profile).await?;
        self.registry
            .put_list(PartitionKey::profile_items(profile), items.clone())
            .await?;
        Ok(items)
    }

    /// 詳細画面用。キャッシュ優先で、無ければリモートから引く。
    pub async fn load_item(&self, viewer: &UserId, item_id: &ItemId) -> Result<FeedItem, AppError> {
        if let Some(item) = self.registry.get_detail(item_id).await {
            return Ok(item);
        }
        let item = self.gateway.fetch_item(viewer, item_id).await?;
        self.registry.put_detail(item.clone()).await;
        self.broadcaster.notify(
            &StateEvent::item_key(item_id),
            StateEvent::ItemUpdated(item.clone()),
        );
        Ok(item)
    }

    pub async fn load_likers(
        &self,
        viewer: &UserId,
        item_id: &ItemId,
    ) -> Result<Vec<Author>, AppError> {
        let likers = self.gateway.fetch_likers(viewer, item_id).await?;
        self.registry.put_likers(item_id, likers.clone()).await;
        Ok(likers)
    }

    /// サムネイル変更。範囲外 index はどのパーティションにも触れずに拒否する。
    /// 同一アイテムの変更はキー付きミューテックスで投入順に直列化する。
    pub async fn change_thumbnail(
        &self,
        viewer: &UserId,
        item_id: &ItemId,
        index: usize,
    ) -> Result<(), AppError> {
        self.locks
            .with_lock(&format!("engage:{item_id}"), || {
                self.change_thumbnail_locked(viewer, item_id, index)
            })
            .await
    }

    async fn change_thumbnail_locked(
        &self,
        viewer: &UserId,
        item_id: &ItemId,
        index: usize,
    ) -> Result<(), AppError> {
        // 検証に使うコピーを確実に持っておく
        if self.registry.peek_item(item_id).await.is_none() {
            let item = self.gateway.fetch_item(viewer, item_id).await?;
            self.registry.put_detail(item).await;
        }

        let action = CacheAction::ThumbnailChange {
            item_id: item_id.clone(),
            index,
        };
        let rollback = self.cache.apply(&action).await?;
        let (update_id, cancel) = self
            .ledger
            .register(action.payload(), rollback.into_rollback_fn())
            .await;

        let result = self.gateway.update_thumbnail(viewer, item_id, index).await;

        settle_remote(
            &self.ledger,
            &self.broadcaster,
            &update_id,
            &cancel,
            result,
            false,
            "Could not change thumbnail",
        )
        .await
    }
}
