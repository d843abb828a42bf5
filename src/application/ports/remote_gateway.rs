use crate::domain::entities::{Author, Comment, FeedItem};
use crate::domain::value_objects::{ItemId, UserId};
use crate::shared::error::AppError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// リアルタイム購読で届く変更通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteChange {
    /// アイテムの集計値・サムネイルの更新
    ItemPatched {
        item_id: ItemId,
        likes_count: u32,
        comments_count: u32,
        thumbnail_index: usize,
    },
    /// 閲覧者のフォロー関係の変更（別端末での操作など）
    FollowPatched { target: UserId, following: bool },
}

/// リモートサービス（行 CRUD + バッチ RPC + 変更購読）へのポート。
///
/// 返ってくる `FeedItem`/`Author` は閲覧者ごとの投影
/// （`is_liked`/`is_following`）を埋めた状態で渡すこと。
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn fetch_home_feed(
        &self,
        viewer: &UserId,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<FeedItem>, AppError>;

    async fn fetch_recipe_book(
        &self,
        viewer: &UserId,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<FeedItem>, AppError>;

    async fn fetch_profile_items(
        &self,
        viewer: &UserId,
        profile: &UserId,
    ) -> Result<Vec<FeedItem>, AppError>;

    async fn fetch_item(&self, viewer: &UserId, item: &ItemId) -> Result<FeedItem, AppError>;

    async fn fetch_likers(&self, viewer: &UserId, item: &ItemId)
        -> Result<Vec<Author>, AppError>;

    /// 閲覧者がフォローしている user id の一覧
    async fn fetch_follows(&self, viewer: &UserId) -> Result<Vec<UserId>, AppError>;

    async fn insert_like(&self, viewer: &UserId, item: &ItemId) -> Result<(), AppError>;

    async fn delete_like(&self, viewer: &UserId, item: &ItemId) -> Result<(), AppError>;

    async fn insert_follow(&self, viewer: &UserId, target: &UserId) -> Result<(), AppError>;

    async fn delete_follow(&self, viewer: &UserId, target: &UserId) -> Result<(), AppError>;

    async fn update_thumbnail(
        &self,
        viewer: &UserId,
        item: &ItemId,
        index: usize,
    ) -> Result<(), AppError>;

    async fn insert_comment(
        &self,
        viewer: &UserId,
        item: &ItemId,
        content: &str,
    ) -> Result<Comment, AppError>;

    async fn delete_comment(&self, viewer: &UserId, comment_id: &str) -> Result<(), AppError>;

    /// 変更通知の購読を開く。receiver を drop すれば購読終了。
    async fn subscribe_changes(
        &self,
        viewer: &UserId,
    ) -> Result<mpsc::Receiver<RemoteChange>, AppError>;
}
