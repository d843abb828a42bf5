use crate::domain::entities::FeedItem;
use crate::domain::value_objects::UserId;
use serde::Serialize;

/// ブロードキャスタで UI へ流す状態イベント
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    ItemUpdated(FeedItem),
    FollowChanged { target: UserId, following: bool },
    Toast(ToastEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToastEvent {
    pub level: ToastLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastLevel {
    Info,
    Error,
}

impl StateEvent {
    /// アイテム状態イベントのキー
    pub fn item_key(item_id: &crate::domain::value_objects::ItemId) -> String {
        format!("item:{item_id}")
    }

    /// フォロー状態イベントのキー
    pub fn follow_key(target: &UserId) -> String {
        format!("follow:{target}")
    }

    /// トーストのキー（全画面共通）
    pub const TOAST_KEY: &'static str = "toast";
}

impl ToastEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: ToastLevel::Error,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: ToastLevel::Info,
            message: message.into(),
        }
    }
}
