use crate::domain::value_objects::UserId;
use serde::{Deserialize, Serialize};

/// フィードに埋め込まれる投稿者情報。
/// `is_following` は閲覧者ごとの投影で、正規レコードの一部ではない。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: UserId,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_following: bool,
}

impl Author {
    pub fn new(id: UserId, username: String) -> Self {
        Self {
            id,
            username,
            display_name: None,
            avatar_url: None,
            is_following: false,
        }
    }

    pub fn with_display_name(mut self, display_name: String) -> Self {
        self.display_name = Some(display_name);
        self
    }

    pub fn set_following(&mut self, following: bool) {
        self.is_following = following;
    }
}
