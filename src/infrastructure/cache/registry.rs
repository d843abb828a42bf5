use crate::domain::entities::{Author, FeedItem};
use crate::domain::value_objects::{ItemId, PartitionKey, PartitionKind, UserId};
use crate::shared::error::AppError;
use crate::shared::metrics::CoreMetrics;
use lru::LruCache;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// ファンアウト書き込み前に退避した 1 エントリ分の原本
#[derive(Debug, Clone)]
pub enum SnapshotEntry {
    Item {
        key: PartitionKey,
        before: FeedItem,
    },
    Liker {
        item_id: ItemId,
        before: Author,
    },
}

/// ファンアウト 1 回分のプリイメージ。restore に渡すと全パーティションが
/// 変更前の値に戻る。対象 0 件なら restore は no-op。
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    entries: Vec<SnapshotEntry>,
}

impl CacheSnapshot {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

struct RegistryInner {
    lists: HashMap<PartitionKey, Vec<FeedItem>>,
    detail: LruCache<ItemId, FeedItem>,
    likers: HashMap<ItemId, Vec<Author>>,
    /// item id → そのアイテムのコピーを持つパーティション
    item_index: HashMap<ItemId, HashSet<PartitionKey>>,
    /// author id → その投稿者のコピー（アイテムまたはいいね欄の行）を持つパーティション
    author_index: HashMap<UserId, HashSet<PartitionKey>>,
}

impl RegistryInner {
    fn index_item(&mut self, key: &PartitionKey, item: &FeedItem) {
        self.item_index
            .entry(item.id.clone())
            .or_default()
            .insert(key.clone());
        self.author_index
            .entry(item.author.id.clone())
            .or_default()
            .insert(key.clone());
    }

    fn unindex_item(&mut self, key: &PartitionKey, item_id: &ItemId, author_id: &UserId) {
        if let Some(keys) = self.item_index.get_mut(item_id) {
            keys.remove(key);
            if keys.is_empty() {
                self.item_index.remove(item_id);
            }
        }
        if let Some(keys) = self.author_index.get_mut(author_id) {
            keys.remove(key);
            if keys.is_empty() {
                self.author_index.remove(author_id);
            }
        }
    }

    fn unindex_liker(&mut self, key: &PartitionKey, author_id: &UserId) {
        if let Some(keys) = self.author_index.get_mut(author_id) {
            keys.remove(key);
            if keys.is_empty() {
                self.author_index.remove(author_id);
            }
        }
    }
}

/// 全キャッシュパーティションを 1 か所で持つレジストリ。
///
/// パーティション登録と同時に item/author の位置インデックスを維持するので、
/// ファンアウト書き込みは走査ではなく直接参照になる。新しい画面のキャッシュを
/// ここ以外に作らない限り、同期漏れは起きない。
pub struct CacheRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    metrics: Arc<CoreMetrics>,
}

impl Clone for CacheRegistry {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl CacheRegistry {
    pub fn new(detail_capacity: usize, metrics: Arc<CoreMetrics>) -> Self {
        let capacity = NonZeroUsize::new(detail_capacity.max(1))
            .expect("detail capacity is clamped to at least 1");
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                lists: HashMap::new(),
                detail: LruCache::new(capacity),
                likers: HashMap::new(),
                item_index: HashMap::new(),
                author_index: HashMap::new(),
            })),
            metrics: Arc::clone(&metrics),
        }
    }

    /// ページ付きリストパーティションを丸ごと差し替える
    pub async fn put_list(&self, key: PartitionKey, items: Vec<FeedItem>) -> Result<(), AppError> {
        if !key.kind().is_list() {
            return Err(AppError::InvalidInput(format!(
                "{} is not a list partition",
                key.kind()
            )));
        }
        let mut inner = self.inner.write().await;
        if let Some(old_items) = inner.lists.remove(&key) {
            for item in &old_items {
                inner.unindex_item(&key, &item.id, &item.author.id);
            }
        }
        for item in &items {
            inner.index_item(&key, item);
        }
        inner.lists.insert(key, items);
        Ok(())
    }

    pub async fn get_list(&self, key: &PartitionKey) -> Option<Vec<FeedItem>> {
        let inner = self.inner.read().await;
        match inner.lists.get(key) {
            Some(items) => {
                self.metrics.record_cache_hit();
                Some(items.clone())
            }
            None => {
                self.metrics.record_cache_miss();
                None
            }
        }
    }

    pub async fn put_detail(&self, item: FeedItem) {
        let key = PartitionKey::item_detail(&item.id);
        let mut inner = self.inner.write().await;
        inner.index_item(&key, &item);
        let item_id = item.id.clone();
        if let Some((evicted_id, evicted)) = inner.detail.push(item_id.clone(), item) {
            // push は同一キーの置き換えでも古い値を返すので、追い出しのときだけ
            // インデックスを外す
            if evicted_id != item_id {
                let evicted_key = PartitionKey::item_detail(&evicted_id);
                inner.unindex_item(&evicted_key, &evicted_id, &evicted.author.id);
                debug!(item_id = %evicted_id, "evicted item detail from cache");
            }
        }
    }

    pub async fn get_detail(&self, item_id: &ItemId) -> Option<FeedItem> {
        let mut inner = self.inner.write().await;
        match inner.detail.get(item_id) {
            Some(item) => {
                self.metrics.record_cache_hit();
                Some(item.clone())
            }
            None => {
                self.metrics.record_cache_miss();
                None
            }
        }
    }

    /// アイテムの「いいねした人」一覧を差し替える
    pub async fn put_likers(&self, item_id: &ItemId, likers: Vec<Author>) {
        let key = PartitionKey::likers(item_id);
        let mut inner = self.inner.write().await;
        if let Some(old_likers) = inner.likers.remove(item_id) {
            for liker in &old_likers {
                inner.unindex_liker(&key, &liker.id);
            }
        }
        for liker in &likers {
            inner
                .author_index
                .entry(liker.id.clone())
                .or_default()
                .insert(key.clone());
        }
        inner.likers.insert(item_id.clone(), likers);
    }

    pub async fn get_likers(&self, item_id: &ItemId) -> Option<Vec<Author>> {
        let inner = self.inner.read().await;
        match inner.likers.get(item_id) {
            Some(likers) => {
                self.metrics.record_cache_hit();
                Some(likers.clone())
            }
            None => {
                self.metrics.record_cache_miss();
                None
            }
        }
    }

    /// アイテムのコピーを持つ全パーティションに同じ変換を適用する。
    /// 戻り値は復元用スナップショットと、適用後の代表コピー。
    pub async fn update_item<F>(&self, item_id: &ItemId, mutate: F) -> (CacheSnapshot, Option<FeedItem>)
    where
        F: Fn(&mut FeedItem),
    {
        let mut inner = self.inner.write().await;
        let keys: Vec<PartitionKey> = inner
            .item_index
            .get(item_id)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();

        let mut snapshot = CacheSnapshot::default();
        let mut after: Option<FeedItem> = None;

        for key in keys {
            match key.kind() {
                PartitionKind::ItemDetail => {
                    if let Some(item) = inner.detail.peek_mut(item_id) {
                        snapshot.entries.push(SnapshotEntry::Item {
                            key: key.clone(),
                            before: item.clone(),
                        });
                        mutate(item);
                        after = Some(item.clone());
                    }
                }
                kind if kind.is_list() => {
                    if let Some(items) = inner.lists.get_mut(&key) {
                        for item in items.iter_mut().filter(|item| &item.id == item_id) {
                            snapshot.entries.push(SnapshotEntry::Item {
                                key: key.clone(),
                                before: item.clone(),
                            });
                            mutate(item);
                            after = Some(item.clone());
                        }
                    }
                }
                _ => {}
            }
        }

        (snapshot, after)
    }

    /// 投稿者のコピーを持つ全パーティションに同じ変換を適用する。
    /// アイテムに埋め込まれた author と、いいね欄の行の両方が対象。
    pub async fn update_author<F, G>(
        &self,
        user_id: &UserId,
        mutate_item: F,
        mutate_liker: G,
    ) -> (CacheSnapshot, Vec<FeedItem>)
    where
        F: Fn(&mut FeedItem),
        G: Fn(&mut Author),
    {
        let mut inner = self.inner.write().await;
        let keys: Vec<PartitionKey> = inner
            .author_index
            .get(user_id)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();

        let mut snapshot = CacheSnapshot::default();
        let mut updated: HashMap<ItemId, FeedItem> = HashMap::new();

        for key in keys {
            match key.kind() {
                PartitionKind::Likers => {
                    let item_id = key
                        .scope()
                        .and_then(|scope| ItemId::new(scope.to_string()).ok());
                    if let Some(item_id) = item_id {
                        if let Some(likers) = inner.likers.get_mut(&item_id) {
                            for liker in likers.iter_mut().filter(|liker| &liker.id == user_id) {
                                snapshot.entries.push(SnapshotEntry::Liker {
                                    item_id: item_id.clone(),
                                    before: liker.clone(),
                                });
                                mutate_liker(liker);
                            }
                        }
                    }
                }
                PartitionKind::ItemDetail => {
                    let item_id = key
                        .scope()
                        .and_then(|scope| ItemId::new(scope.to_string()).ok());
                    if let Some(item_id) = item_id {
                        if let Some(item) = inner.detail.peek_mut(&item_id) {
                            if &item.author.id == user_id {
                                snapshot.entries.push(SnapshotEntry::Item {
                                    key: key.clone(),
                                    before: item.clone(),
                                });
                                mutate_item(item);
                                updated.insert(item.id.clone(), item.clone());
                            }
                        }
                    }
                }
                kind if kind.is_list() => {
                    if let Some(items) = inner.lists.get_mut(&key) {
                        for item in items.iter_mut().filter(|item| &item.author.id == user_id) {
                            snapshot.entries.push(SnapshotEntry::Item {
                                key: key.clone(),
                                before: item.clone(),
                            });
                            mutate_item(item);
                            updated.insert(item.id.clone(), item.clone());
                        }
                    }
                }
                _ => {}
            }
        }

        (snapshot, updated.into_values().collect())
    }

    /// スナップショットを書き戻して変更前の状態に復元する。
    /// 既に消えた位置（追い出し済みページなど）はスキップ。
    /// 戻り値は復元後のアイテム状態（通知用、item id ごとに 1 件）。
    pub async fn restore(&self, snapshot: CacheSnapshot) -> Vec<FeedItem> {
        let mut inner = self.inner.write().await;
        let mut restored: HashMap<ItemId, FeedItem> = HashMap::new();

        for entry in snapshot.entries {
            match entry {
                SnapshotEntry::Item { key, before } => match key.kind() {
                    PartitionKind::ItemDetail => {
                        if let Some(item) = inner.detail.peek_mut(&before.id) {
                            *item = before.clone();
                            restored.insert(before.id.clone(), before);
                        } else {
                            debug!(partition = %key, "restore target already evicted");
                        }
                    }
                    kind if kind.is_list() => {
                        if let Some(items) = inner.lists.get_mut(&key) {
                            if let Some(item) =
                                items.iter_mut().find(|item| item.id == before.id)
                            {
                                *item = before.clone();
                                restored.insert(before.id.clone(), before);
                            }
                        } else {
                            debug!(partition = %key, "restore target partition is gone");
                        }
                    }
                    _ => {}
                },
                SnapshotEntry::Liker { item_id, before } => {
                    if let Some(likers) = inner.likers.get_mut(&item_id) {
                        if let Some(liker) =
                            likers.iter_mut().find(|liker| liker.id == before.id)
                        {
                            *liker = before;
                        }
                    }
                }
            }
        }

        restored.into_values().collect()
    }

    pub async fn invalidate(&self, key: &PartitionKey) {
        let mut inner = self.inner.write().await;
        match key.kind() {
            PartitionKind::ItemDetail => {
                let item_id = key
                    .scope()
                    .and_then(|scope| ItemId::new(scope.to_string()).ok());
                if let Some(item_id) = item_id {
                    if let Some(item) = inner.detail.pop(&item_id) {
                        inner.unindex_item(key, &item.id, &item.author.id);
                    }
                }
            }
            PartitionKind::Likers => {
                let item_id = key
                    .scope()
                    .and_then(|scope| ItemId::new(scope.to_string()).ok());
                if let Some(item_id) = item_id {
                    if let Some(likers) = inner.likers.remove(&item_id) {
                        for liker in &likers {
                            inner.unindex_liker(key, &liker.id);
                        }
                    }
                }
            }
            _ => {
                if let Some(items) = inner.lists.remove(key) {
                    for item in &items {
                        inner.unindex_item(key, &item.id, &item.author.id);
                    }
                }
            }
        }
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.lists.clear();
        inner.detail.clear();
        inner.likers.clear();
        inner.item_index.clear();
        inner.author_index.clear();
    }

    /// リストパーティションのキー一覧（バックグラウンド再取得用）
    pub async fn list_keys(&self) -> Vec<PartitionKey> {
        self.inner.read().await.lists.keys().cloned().collect()
    }

    /// LRU の順序を動かさずに任意のコピーを 1 件返す
    pub async fn peek_item(&self, item_id: &ItemId) -> Option<FeedItem> {
        let inner = self.inner.read().await;
        if let Some(item) = inner.detail.peek(item_id) {
            return Some(item.clone());
        }
        let keys = inner.item_index.get(item_id)?;
        for key in keys {
            if key.kind().is_list() {
                if let Some(item) = inner
                    .lists
                    .get(key)
                    .and_then(|items| items.iter().find(|item| &item.id == item_id))
                {
                    return Some(item.clone());
                }
            }
        }
        None
    }

    pub async fn locations_of(&self, item_id: &ItemId) -> HashSet<PartitionKey> {
        self.inner
            .read()
            .await
            .item_index
            .get(item_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::ItemKind;

    fn author(id: &str) -> Author {
        Author::new(UserId::new(id.to_string()).unwrap(), format!("user_{id}"))
    }

    fn item(id: &str, author_id: &str, likes: u32) -> FeedItem {
        let mut item = FeedItem::new(
            ItemId::new(id.to_string()).unwrap(),
            author(author_id),
            ItemKind::Recipe,
            format!("Recipe {id}"),
            "content".to_string(),
        )
        .with_images(vec!["a.jpg".to_string(), "b.jpg".to_string()]);
        item.likes_count = likes;
        item
    }

    fn registry() -> CacheRegistry {
        CacheRegistry::new(8, Arc::new(CoreMetrics::new()))
    }

    fn id(value: &str) -> ItemId {
        ItemId::new(value.to_string()).unwrap()
    }

    fn user(value: &str) -> UserId {
        UserId::new(value.to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_update_item_fans_out_to_all_partitions() {
        let registry = registry();
        registry
            .put_list(
                PartitionKey::home_feed(0),
                vec![item("i1", "u1", 3), item("i2", "u2", 0)],
            )
            .await
            .unwrap();
        registry
            .put_list(
                PartitionKey::recipe_book(&user("viewer"), 0),
                vec![item("i1", "u1", 3)],
            )
            .await
            .unwrap();
        registry.put_detail(item("i1", "u1", 3)).await;

        let (snapshot, after) = registry
            .update_item(&id("i1"), |item| item.mark_liked())
            .await;
        assert_eq!(snapshot.len(), 3);
        assert_eq!(after.unwrap().likes_count, 4);

        let feed = registry.get_list(&PartitionKey::home_feed(0)).await.unwrap();
        assert_eq!(feed[0].likes_count, 4);
        assert!(feed[0].is_liked);
        assert_eq!(feed[1].likes_count, 0);

        let detail = registry.get_detail(&id("i1")).await.unwrap();
        assert_eq!(detail.likes_count, 4);
    }

    #[tokio::test]
    async fn test_restore_returns_every_partition_to_pre_mutation_state() {
        let registry = registry();
        registry
            .put_list(PartitionKey::home_feed(0), vec![item("i1", "u1", 3)])
            .await
            .unwrap();
        registry
            .put_list(
                PartitionKey::profile_items(&user("u1")),
                vec![item("i1", "u1", 3)],
            )
            .await
            .unwrap();
        registry.put_detail(item("i1", "u1", 3)).await;

        let (snapshot, _) = registry
            .update_item(&id("i1"), |item| item.mark_liked())
            .await;
        let restored = registry.restore(snapshot).await;
        assert_eq!(restored.len(), 1);

        for key in [
            PartitionKey::home_feed(0),
            PartitionKey::profile_items(&user("u1")),
        ] {
            let items = registry.get_list(&key).await.unwrap();
            assert_eq!(items[0].likes_count, 3);
            assert!(!items[0].is_liked);
        }
        let detail = registry.get_detail(&id("i1")).await.unwrap();
        assert_eq!(detail.likes_count, 3);
        assert!(!detail.is_liked);
    }

    #[tokio::test]
    async fn test_update_item_with_no_copies_is_noop() {
        let registry = registry();
        let (snapshot, after) = registry
            .update_item(&id("missing"), |item| item.mark_liked())
            .await;
        assert!(snapshot.is_empty());
        assert!(after.is_none());
        let restored = registry.restore(snapshot).await;
        assert!(restored.is_empty());
    }

    #[tokio::test]
    async fn test_update_author_touches_items_and_likers() {
        let registry = registry();
        registry
            .put_list(PartitionKey::home_feed(0), vec![item("i1", "u9", 0)])
            .await
            .unwrap();
        registry
            .put_likers(&id("i5"), vec![author("u9"), author("u2")])
            .await;

        let (snapshot, updated) = registry
            .update_author(
                &user("u9"),
                |item| item.author.set_following(true),
                |liker| liker.set_following(true),
            )
            .await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(updated.len(), 1);

        let feed = registry.get_list(&PartitionKey::home_feed(0)).await.unwrap();
        assert!(feed[0].author.is_following);

        let likers = registry.get_likers(&id("i5")).await.unwrap();
        assert!(likers.iter().find(|liker| liker.id == user("u9")).unwrap().is_following);
        assert!(!likers.iter().find(|liker| liker.id == user("u2")).unwrap().is_following);
    }

    #[tokio::test]
    async fn test_put_list_replacement_reindexes() {
        let registry = registry();
        let key = PartitionKey::home_feed(0);
        registry
            .put_list(key.clone(), vec![item("i1", "u1", 0)])
            .await
            .unwrap();
        registry
            .put_list(key.clone(), vec![item("i2", "u2", 0)])
            .await
            .unwrap();

        assert!(registry.locations_of(&id("i1")).await.is_empty());
        assert!(registry.locations_of(&id("i2")).await.contains(&key));
    }

    #[tokio::test]
    async fn test_detail_eviction_drops_index() {
        let registry = CacheRegistry::new(2, Arc::new(CoreMetrics::new()));
        registry.put_detail(item("i1", "u1", 0)).await;
        registry.put_detail(item("i2", "u2", 0)).await;
        registry.put_detail(item("i3", "u3", 0)).await;

        // i1 が追い出されている
        assert!(registry.locations_of(&id("i1")).await.is_empty());
        assert!(!registry.locations_of(&id("i3")).await.is_empty());
    }

    #[tokio::test]
    async fn test_put_list_rejects_non_list_kind() {
        let registry = registry();
        let result = registry
            .put_list(PartitionKey::item_detail(&id("i1")), vec![])
            .await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }
}
