use async_trait::async_trait;
use kondate_core::domain::entities::{Author, Comment, FeedItem};
use kondate_core::domain::value_objects::{ItemId, ItemKind, UserId};
use kondate_core::shared::error::AppError;
use kondate_core::{AppConfig, RemoteChange, RemoteGateway};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};

pub fn user(value: &str) -> UserId {
    UserId::new(value.to_string()).unwrap()
}

pub fn item_id(value: &str) -> ItemId {
    ItemId::new(value.to_string()).unwrap()
}

pub fn make_item(id: &str, author_id: &str, likes: u32) -> FeedItem {
    let author = Author::new(user(author_id), format!("user_{author_id}"));
    let mut item = FeedItem::new(
        item_id(id),
        author,
        ItemKind::Recipe,
        format!("Recipe {id}"),
        "Simmer everything".to_string(),
    )
    .with_images(vec![
        "one.jpg".to_string(),
        "two.jpg".to_string(),
        "three.jpg".to_string(),
    ]);
    item.likes_count = likes;
    item
}

/// テスト用のインメモリリモート。失敗や遅延を注入できる。
pub struct TestRemoteGateway {
    items: RwLock<Vec<FeedItem>>,
    likes: RwLock<HashSet<(String, String)>>,
    follows: RwLock<HashSet<(String, String)>>,
    fail_mutations: AtomicBool,
    mutation_delay_ms: AtomicUsize,
    pub like_calls: AtomicUsize,
    pub follow_calls: AtomicUsize,
    pub comment_calls: AtomicUsize,
    comment_seq: AtomicUsize,
    change_tx: Mutex<Option<mpsc::Sender<RemoteChange>>>,
}

impl TestRemoteGateway {
    pub fn new(items: Vec<FeedItem>) -> Arc<Self> {
        Arc::new(Self {
            items: RwLock::new(items),
            likes: RwLock::new(HashSet::new()),
            follows: RwLock::new(HashSet::new()),
            fail_mutations: AtomicBool::new(false),
            mutation_delay_ms: AtomicUsize::new(0),
            like_calls: AtomicUsize::new(0),
            follow_calls: AtomicUsize::new(0),
            comment_calls: AtomicUsize::new(0),
            comment_seq: AtomicUsize::new(0),
            change_tx: Mutex::new(None),
        })
    }

    pub fn set_fail_mutations(&self, fail: bool) {
        self.fail_mutations.store(fail, Ordering::SeqCst);
    }

    pub fn set_mutation_delay(&self, delay: Duration) {
        self.mutation_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub async fn set_remote_likes(&self, id: &ItemId, likes: u32) {
        let mut items = self.items.write().await;
        if let Some(item) = items.iter_mut().find(|item| &item.id == id) {
            item.likes_count = likes;
        }
    }

    pub async fn is_liked_remotely(&self, viewer: &UserId, id: &ItemId) -> bool {
        self.likes
            .read()
            .await
            .contains(&(viewer.to_string(), id.to_string()))
    }

    pub async fn is_followed_remotely(&self, viewer: &UserId, target: &UserId) -> bool {
        self.follows
            .read()
            .await
            .contains(&(viewer.to_string(), target.to_string()))
    }

    pub async fn push_change(&self, change: RemoteChange) {
        if let Some(tx) = self.change_tx.lock().await.as_ref() {
            tx.send(change).await.unwrap();
        }
    }

    async fn before_mutation(&self) -> Result<(), AppError> {
        let delay = self.mutation_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(AppError::Network("injected failure".to_string()));
        }
        Ok(())
    }

    async fn project(&self, viewer: &UserId, mut item: FeedItem) -> FeedItem {
        let likes = self.likes.read().await;
        let follows = self.follows.read().await;
        item.is_liked = likes.contains(&(viewer.to_string(), item.id.to_string()));
        item.author.is_following =
            follows.contains(&(viewer.to_string(), item.author.id.to_string()));
        item
    }
}

#[async_trait]
impl RemoteGateway for TestRemoteGateway {
    async fn fetch_home_feed(
        &self,
        viewer: &UserId,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<FeedItem>, AppError> {
        let items = self.items.read().await.clone();
        let start = (page * page_size) as usize;
        let mut result = Vec::new();
        for item in items.into_iter().skip(start).take(page_size as usize) {
            result.push(self.project(viewer, item).await);
        }
        Ok(result)
    }

    async fn fetch_recipe_book(
        &self,
        viewer: &UserId,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<FeedItem>, AppError> {
        // テストでは保存レシピ = レシピ種別の全アイテム
        let items = self.items.read().await.clone();
        let start = (page * page_size) as usize;
        let mut result = Vec::new();
        for item in items
            .into_iter()
            .filter(|item| item.kind == ItemKind::Recipe)
            .skip(start)
            .take(page_size as usize)
        {
            result.push(self.project(viewer, item).await);
        }
        Ok(result)
    }

    async fn fetch_profile_items(
        &self,
        viewer: &UserId,
        profile: &UserId,
    ) -> Result<Vec<FeedItem>, AppError> {
        let items = self.items.read().await.clone();
        let mut result = Vec::new();
        for item in items
            .into_iter()
            .filter(|item| &item.author.id == profile)
        {
            result.push(self.project(viewer, item).await);
        }
        Ok(result)
    }

    async fn fetch_item(&self, viewer: &UserId, id: &ItemId) -> Result<FeedItem, AppError> {
        let item = self
            .items
            .read()
            .await
            .iter()
            .find(|item| &item.id == id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Item {id} not found")))?;
        Ok(self.project(viewer, item).await)
    }

    async fn fetch_likers(
        &self,
        viewer: &UserId,
        id: &ItemId,
    ) -> Result<Vec<Author>, AppError> {
        let likes = self.likes.read().await.clone();
        let follows = self.follows.read().await;
        let mut likers = Vec::new();
        for (liker, liked_item) in likes {
            if liked_item == id.to_string() {
                let mut author = Author::new(user(&liker), format!("user_{liker}"));
                author.is_following =
                    follows.contains(&(viewer.to_string(), liker.clone()));
                likers.push(author);
            }
        }
        Ok(likers)
    }

    async fn fetch_follows(&self, viewer: &UserId) -> Result<Vec<UserId>, AppError> {
        Ok(self
            .follows
            .read()
            .await
            .iter()
            .filter(|(follower, _)| follower == viewer.as_str())
            .map(|(_, followee)| user(followee))
            .collect())
    }

    async fn insert_like(&self, viewer: &UserId, id: &ItemId) -> Result<(), AppError> {
        self.like_calls.fetch_add(1, Ordering::SeqCst);
        self.before_mutation().await?;
        let mut likes = self.likes.write().await;
        if !likes.insert((viewer.to_string(), id.to_string())) {
            return Err(AppError::Constraint("duplicate like".to_string()));
        }
        Ok(())
    }

    async fn delete_like(&self, viewer: &UserId, id: &ItemId) -> Result<(), AppError> {
        self.like_calls.fetch_add(1, Ordering::SeqCst);
        self.before_mutation().await?;
        self.likes
            .write()
            .await
            .remove(&(viewer.to_string(), id.to_string()));
        Ok(())
    }

    async fn insert_follow(&self, viewer: &UserId, target: &UserId) -> Result<(), AppError> {
        self.follow_calls.fetch_add(1, Ordering::SeqCst);
        self.before_mutation().await?;
        let mut follows = self.follows.write().await;
        if !follows.insert((viewer.to_string(), target.to_string())) {
            return Err(AppError::Constraint("duplicate follow".to_string()));
        }
        Ok(())
    }

    async fn delete_follow(&self, viewer: &UserId, target: &UserId) -> Result<(), AppError> {
        self.follow_calls.fetch_add(1, Ordering::SeqCst);
        self.before_mutation().await?;
        self.follows
            .write()
            .await
            .remove(&(viewer.to_string(), target.to_string()));
        Ok(())
    }

    async fn update_thumbnail(
        &self,
        _viewer: &UserId,
        id: &ItemId,
        index: usize,
    ) -> Result<(), AppError> {
        self.before_mutation().await?;
        let mut items = self.items.write().await;
        let item = items
            .iter_mut()
            .find(|item| &item.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Item {id} not found")))?;
        item.set_thumbnail(index).map_err(AppError::InvalidInput)?;
        Ok(())
    }

    async fn insert_comment(
        &self,
        viewer: &UserId,
        id: &ItemId,
        content: &str,
    ) -> Result<Comment, AppError> {
        self.comment_calls.fetch_add(1, Ordering::SeqCst);
        self.before_mutation().await?;
        let seq = self.comment_seq.fetch_add(1, Ordering::SeqCst);
        Ok(Comment {
            id: format!("c{seq}"),
            item_id: id.clone(),
            author: Author::new(viewer.clone(), format!("user_{viewer}")),
            content: content.to_string(),
            created_at: chrono::Utc::now(),
        })
    }

    async fn delete_comment(&self, _viewer: &UserId, _comment_id: &str) -> Result<(), AppError> {
        self.before_mutation().await?;
        Ok(())
    }

    async fn subscribe_changes(
        &self,
        _viewer: &UserId,
    ) -> Result<mpsc::Receiver<RemoteChange>, AppError> {
        let (tx, rx) = mpsc::channel(16);
        *self.change_tx.lock().await = Some(tx);
        Ok(rx)
    }
}

/// ダミーのプッシュ送信先
pub struct NullPushSender;

#[async_trait]
impl kondate_core::PushSender for NullPushSender {
    async fn send(
        &self,
        _subscription: &kondate_core::PushSubscription,
        _notification: &kondate_core::PushNotification,
    ) -> Result<(), AppError> {
        Ok(())
    }
}

/// テスト向けの短いタイムアウト設定
pub fn test_config(optimistic_timeout_ms: u64) -> AppConfig {
    let mut config = AppConfig::default();
    config.sync.optimistic_timeout_ms = optimistic_timeout_ms;
    // テストでは連打抑制を無効にする
    config.sync.debounce_ms = 0;
    config
}
