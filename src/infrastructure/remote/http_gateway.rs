use super::error::RemoteApiError;
use crate::application::ports::{RemoteChange, RemoteGateway};
use crate::domain::entities::{Author, Comment, FeedItem};
use crate::domain::value_objects::{ItemId, ItemKind, UserId};
use crate::shared::config::RemoteConfig;
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// PostgREST 互換 API 越しのリモートゲートウェイ。
///
/// 行の取得は REST、閲覧者ごとの投影（いいね済み/フォロー中）の解決は
/// バッチ RPC、変更購読はカーソル付き RPC のポーリングで賄う。
pub struct HttpRemoteGateway {
    client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
struct AuthorRow {
    id: String,
    username: String,
    display_name: Option<String>,
    avatar_url: Option<String>,
}

impl AuthorRow {
    fn into_author(self, follows: &HashSet<String>) -> Result<Author, AppError> {
        let is_following = follows.contains(&self.id);
        let id = UserId::new(self.id).map_err(AppError::ValidationError)?;
        Ok(Author {
            id,
            username: self.username,
            display_name: self.display_name,
            avatar_url: self.avatar_url,
            is_following,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ItemRow {
    id: String,
    kind: String,
    title: String,
    content: String,
    image_urls: Vec<String>,
    thumbnail_index: i64,
    likes_count: i64,
    comments_count: i64,
    created_at: DateTime<Utc>,
    author: AuthorRow,
}

impl ItemRow {
    fn into_feed_item(
        self,
        liked: &HashSet<String>,
        follows: &HashSet<String>,
    ) -> Result<FeedItem, AppError> {
        let is_liked = liked.contains(&self.id);
        let id = ItemId::new(self.id).map_err(AppError::ValidationError)?;
        let kind: ItemKind = self.kind.parse().map_err(AppError::ValidationError)?;
        let author = self.author.into_author(follows)?;
        let image_count = self.image_urls.len();
        Ok(FeedItem {
            id,
            author,
            kind,
            title: self.title,
            content: self.content,
            image_urls: self.image_urls,
            thumbnail_index: (self.thumbnail_index.max(0) as usize).min(image_count.saturating_sub(1)),
            likes_count: self.likes_count.max(0) as u32,
            comments_count: self.comments_count.max(0) as u32,
            is_liked,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RecipeBookRow {
    item: ItemRow,
}

#[derive(Debug, Deserialize)]
struct LikerRow {
    author: AuthorRow,
}

#[derive(Debug, Deserialize)]
struct FollowRow {
    followee_id: String,
}

#[derive(Debug, Deserialize)]
struct CommentRow {
    id: String,
    item_id: String,
    content: String,
    created_at: DateTime<Utc>,
    author: AuthorRow,
}

const ITEM_SELECT: &str = "id,kind,title,content,image_urls,thumbnail_index,likes_count,comments_count,created_at,author:users(id,username,display_name,avatar_url)";

impl HttpRemoteGateway {
    pub fn new(config: &RemoteConfig) -> Result<Self, AppError> {
        let mut headers = header::HeaderMap::new();
        if !config.api_key.is_empty() {
            let value = header::HeaderValue::from_str(&config.api_key)
                .map_err(|err| AppError::ConfigurationError(err.to_string()))?;
            headers.insert("apikey", value);
            let bearer = header::HeaderValue::from_str(&format!("Bearer {}", config.api_key))
                .map_err(|err| AppError::ConfigurationError(err.to_string()))?;
            headers.insert(header::AUTHORIZATION, bearer);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_secs(config.change_poll_interval_secs),
        })
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, function)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, AppError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RemoteApiError::from_status(status, body).into())
    }

    /// バッチ RPC でいいね済みアイテム id を引く
    async fn liked_item_ids(
        &self,
        viewer: &UserId,
        item_ids: &[String],
    ) -> Result<HashSet<String>, AppError> {
        if item_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let response = self
            .client
            .post(self.rpc_url("likes_for_items"))
            .json(&json!({ "viewer_id": viewer.as_str(), "item_ids": item_ids }))
            .send()
            .await?;
        let ids: Vec<String> = Self::check(response).await?.json().await?;
        Ok(ids.into_iter().collect())
    }

    /// バッチ RPC でフォロー中の投稿者 id を引く
    async fn followed_author_ids(
        &self,
        viewer: &UserId,
        author_ids: &[String],
    ) -> Result<HashSet<String>, AppError> {
        if author_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let response = self
            .client
            .post(self.rpc_url("follows_for_authors"))
            .json(&json!({ "viewer_id": viewer.as_str(), "author_ids": author_ids }))
            .send()
            .await?;
        let ids: Vec<String> = Self::check(response).await?.json().await?;
        Ok(ids.into_iter().collect())
    }

    async fn hydrate_items(
        &self,
        viewer: &UserId,
        rows: Vec<ItemRow>,
    ) -> Result<Vec<FeedItem>, AppError> {
        let item_ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();
        let author_ids: Vec<String> = rows
            .iter()
            .map(|row| row.author.id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let liked = self.liked_item_ids(viewer, &item_ids).await?;
        let follows = self.followed_author_ids(viewer, &author_ids).await?;

        rows.into_iter()
            .map(|row| row.into_feed_item(&liked, &follows))
            .collect()
    }

    async fn fetch_item_rows(
        &self,
        query: &[(&str, String)],
    ) -> Result<Vec<ItemRow>, AppError> {
        let response = self
            .client
            .get(self.rest_url("items"))
            .query(query)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

#[async_trait]
impl RemoteGateway for HttpRemoteGateway {
    async fn fetch_home_feed(
        &self,
        viewer: &UserId,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<FeedItem>, AppError> {
        let rows = self
            .fetch_item_rows(&[
                ("select", ITEM_SELECT.to_string()),
                ("order", "created_at.desc".to_string()),
                ("limit", page_size.to_string()),
                ("offset", (page * page_size).to_string()),
            ])
            .await?;
        self.hydrate_items(viewer, rows).await
    }

    async fn fetch_recipe_book(
        &self,
        viewer: &UserId,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<FeedItem>, AppError> {
        let response = self
            .client
            .get(self.rest_url("recipe_book"))
            .query(&[
                ("select", format!("item:items({ITEM_SELECT})")),
                ("user_id", format!("eq.{viewer}")),
                ("order", "created_at.desc".to_string()),
                ("limit", page_size.to_string()),
                ("offset", (page * page_size).to_string()),
            ])
            .send()
            .await?;
        let rows: Vec<RecipeBookRow> = Self::check(response).await?.json().await?;
        self.hydrate_items(viewer, rows.into_iter().map(|row| row.item).collect())
            .await
    }

    async fn fetch_profile_items(
        &self,
        viewer: &UserId,
        profile: &UserId,
    ) -> Result<Vec<FeedItem>, AppError> {
        let rows = self
            .fetch_item_rows(&[
                ("select", ITEM_SELECT.to_string()),
                ("author_id", format!("eq.{profile}")),
                ("order", "created_at.desc".to_string()),
            ])
            .await?;
        self.hydrate_items(viewer, rows).await
    }

    async fn fetch_item(&self, viewer: &UserId, item: &ItemId) -> Result<FeedItem, AppError> {
        let rows = self
            .fetch_item_rows(&[
                ("select", ITEM_SELECT.to_string()),
                ("id", format!("eq.{item}")),
                ("limit", "1".to_string()),
            ])
            .await?;
        let hydrated = self.hydrate_items(viewer, rows).await?;
        hydrated
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("Item {item} not found")))
    }

    async fn fetch_likers(
        &self,
        viewer: &UserId,
        item: &ItemId,
    ) -> Result<Vec<Author>, AppError> {
        let response = self
            .client
            .get(self.rest_url("likes"))
            .query(&[
                (
                    "select",
                    "author:users(id,username,display_name,avatar_url)".to_string(),
                ),
                ("item_id", format!("eq.{item}")),
                ("order", "created_at.desc".to_string()),
            ])
            .send()
            .await?;
        let rows: Vec<LikerRow> = Self::check(response).await?.json().await?;
        let author_ids: Vec<String> = rows.iter().map(|row| row.author.id.clone()).collect();
        let follows = self.followed_author_ids(viewer, &author_ids).await?;
        rows.into_iter()
            .map(|row| row.author.into_author(&follows))
            .collect()
    }

    async fn fetch_follows(&self, viewer: &UserId) -> Result<Vec<UserId>, AppError> {
        let response = self
            .client
            .get(self.rest_url("follows"))
            .query(&[
                ("select", "followee_id".to_string()),
                ("follower_id", format!("eq.{viewer}")),
            ])
            .send()
            .await?;
        let rows: Vec<FollowRow> = Self::check(response).await?.json().await?;
        rows.into_iter()
            .map(|row| UserId::new(row.followee_id).map_err(AppError::ValidationError))
            .collect()
    }

    async fn insert_like(&self, viewer: &UserId, item: &ItemId) -> Result<(), AppError> {
        let response = self
            .client
            .post(self.rest_url("likes"))
            .header("Prefer", "return=minimal")
            .json(&json!({ "user_id": viewer.as_str(), "item_id": item.as_str() }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_like(&self, viewer: &UserId, item: &ItemId) -> Result<(), AppError> {
        let response = self
            .client
            .delete(self.rest_url("likes"))
            .query(&[
                ("user_id", format!("eq.{viewer}")),
                ("item_id", format!("eq.{item}")),
            ])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn insert_follow(&self, viewer: &UserId, target: &UserId) -> Result<(), AppError> {
        let response = self
            .client
            .post(self.rest_url("follows"))
            .header("Prefer", "return=minimal")
            .json(&json!({ "follower_id": viewer.as_str(), "followee_id": target.as_str() }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_follow(&self, viewer: &UserId, target: &UserId) -> Result<(), AppError> {
        let response = self
            .client
            .delete(self.rest_url("follows"))
            .query(&[
                ("follower_id", format!("eq.{viewer}")),
                ("followee_id", format!("eq.{target}")),
            ])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn update_thumbnail(
        &self,
        viewer: &UserId,
        item: &ItemId,
        index: usize,
    ) -> Result<(), AppError> {
        let response = self
            .client
            .patch(self.rest_url("items"))
            .query(&[
                ("id", format!("eq.{item}")),
                // RLS で投稿者本人に限定されるが、意図を明示しておく
                ("author_id", format!("eq.{viewer}")),
            ])
            .json(&json!({ "thumbnail_index": index }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn insert_comment(
        &self,
        viewer: &UserId,
        item: &ItemId,
        content: &str,
    ) -> Result<Comment, AppError> {
        let response = self
            .client
            .post(self.rest_url("comments"))
            .header("Prefer", "return=representation")
            .query(&[(
                "select",
                "id,item_id,content,created_at,author:users(id,username,display_name,avatar_url)",
            )])
            .json(&json!({
                "user_id": viewer.as_str(),
                "item_id": item.as_str(),
                "content": content,
            }))
            .send()
            .await?;
        let mut rows: Vec<CommentRow> = Self::check(response).await?.json().await?;
        let row = rows
            .pop()
            .ok_or_else(|| AppError::Remote("Empty comment representation".to_string()))?;
        Ok(Comment {
            id: row.id,
            item_id: ItemId::new(row.item_id).map_err(AppError::ValidationError)?,
            author: row.author.into_author(&HashSet::new())?,
            content: row.content,
            created_at: row.created_at,
        })
    }

    async fn delete_comment(&self, viewer: &UserId, comment_id: &str) -> Result<(), AppError> {
        let response = self
            .client
            .delete(self.rest_url("comments"))
            .query(&[
                ("id", format!("eq.{comment_id}")),
                ("user_id", format!("eq.{viewer}")),
            ])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn subscribe_changes(
        &self,
        viewer: &UserId,
    ) -> Result<mpsc::Receiver<RemoteChange>, AppError> {
        let (tx, rx) = mpsc::channel(64);
        let client = self.client.clone();
        let url = self.rpc_url("changes_since");
        let viewer = viewer.clone();
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let mut cursor = Utc::now();
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    debug!("change subscription receiver dropped, stopping poll");
                    break;
                }
                let request = client
                    .post(&url)
                    .json(&json!({ "viewer_id": viewer.as_str(), "since": cursor }));
                let changes: Vec<RemoteChange> = match request.send().await {
                    Ok(response) => match Self::check(response).await {
                        Ok(ok) => match ok.json().await {
                            Ok(changes) => changes,
                            Err(err) => {
                                warn!(error = %err, "failed to decode remote changes");
                                continue;
                            }
                        },
                        Err(err) => {
                            warn!(error = %err, "change poll rejected");
                            continue;
                        }
                    },
                    Err(err) => {
                        warn!(error = %err, "change poll failed");
                        continue;
                    }
                };
                cursor = Utc::now();
                for change in changes {
                    if tx.send(change).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}
