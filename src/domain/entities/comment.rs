use super::author::Author;
use crate::domain::value_objects::{ItemId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub item_id: ItemId,
    pub author: Author,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// 送信前のコメント本文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentDraft {
    pub item_id: ItemId,
    pub content: String,
}

const DEDUP_PREFIX_LEN: usize = 32;

impl CommentDraft {
    pub fn new(item_id: ItemId, content: String) -> Result<Self, String> {
        if content.trim().is_empty() {
            return Err("Comment content cannot be empty".to_string());
        }
        Ok(Self { item_id, content })
    }

    /// 連投を 1 リクエストに束ねるためのキー（アイテム + 投稿者 + 本文先頭）
    pub fn dedup_key(&self, viewer: &UserId) -> String {
        let prefix: String = self.content.chars().take(DEDUP_PREFIX_LEN).collect();
        format!("comment:{}:{}:{}", self.item_id, viewer, prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewer() -> UserId {
        UserId::new("u1".to_string()).unwrap()
    }

    #[test]
    fn test_draft_rejects_empty_content() {
        let item = ItemId::new("i1".to_string()).unwrap();
        assert!(CommentDraft::new(item, "   ".to_string()).is_err());
    }

    #[test]
    fn test_dedup_key_ignores_tail_differences() {
        let item = ItemId::new("i1".to_string()).unwrap();
        let long = "a".repeat(40);
        let longer = format!("{}extra", "a".repeat(40));
        let first = CommentDraft::new(item.clone(), long).unwrap();
        let second = CommentDraft::new(item, longer).unwrap();
        assert_eq!(first.dedup_key(&viewer()), second.dedup_key(&viewer()));
    }
}
