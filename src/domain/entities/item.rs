use super::author::Author;
use crate::domain::value_objects::{ItemId, ItemKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// フィードに表示されるアイテム（レシピまたは投稿）。
///
/// `likes_count`/`comments_count` は集計値、`is_liked` と
/// `author.is_following` は閲覧者ごとにセッション単位で再計算される投影。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: ItemId,
    pub author: Author,
    pub kind: ItemKind,
    pub title: String,
    pub content: String,
    pub image_urls: Vec<String>,
    pub thumbnail_index: usize,
    pub likes_count: u32,
    pub comments_count: u32,
    pub is_liked: bool,
    pub created_at: DateTime<Utc>,
}

impl FeedItem {
    pub fn new(id: ItemId, author: Author, kind: ItemKind, title: String, content: String) -> Self {
        Self {
            id,
            author,
            kind,
            title,
            content,
            image_urls: Vec::new(),
            thumbnail_index: 0,
            likes_count: 0,
            comments_count: 0,
            is_liked: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_images(mut self, image_urls: Vec<String>) -> Self {
        self.image_urls = image_urls;
        self
    }

    pub fn mark_liked(&mut self) {
        if !self.is_liked {
            self.is_liked = true;
            self.likes_count += 1;
        }
    }

    pub fn mark_unliked(&mut self) {
        if self.is_liked {
            self.is_liked = false;
            if self.likes_count > 0 {
                self.likes_count -= 1;
            }
        }
    }

    pub fn increment_comments(&mut self) {
        self.comments_count += 1;
    }

    pub fn decrement_comments(&mut self) {
        if self.comments_count > 0 {
            self.comments_count -= 1;
        }
    }

    /// サムネイルを差し替える。範囲外は拒否し、何も変更しない。
    pub fn set_thumbnail(&mut self, index: usize) -> Result<(), String> {
        if index >= self.image_urls.len() {
            return Err(format!(
                "Thumbnail index {} out of range for {} images",
                index,
                self.image_urls.len()
            ));
        }
        self.thumbnail_index = index;
        Ok(())
    }

    /// サムネイルを先頭にした表示用の画像リスト
    pub fn display_image_urls(&self) -> Vec<String> {
        if self.thumbnail_index == 0 || self.thumbnail_index >= self.image_urls.len() {
            return self.image_urls.clone();
        }
        let mut urls = Vec::with_capacity(self.image_urls.len());
        urls.push(self.image_urls[self.thumbnail_index].clone());
        for (i, url) in self.image_urls.iter().enumerate() {
            if i != self.thumbnail_index {
                urls.push(url.clone());
            }
        }
        urls
    }
}
