use super::{ItemId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// キャッシュパーティションの種別。
///
/// パーティションは種別 + 判別子の構造化キーで引く。新しい画面を足すときは
/// 種別を増やすだけでファンアウト用インデックスに乗る。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionKind {
    HomeFeed,
    RecipeBook,
    ProfileItems,
    ItemDetail,
    Likers,
}

impl PartitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionKind::HomeFeed => "home_feed",
            PartitionKind::RecipeBook => "recipe_book",
            PartitionKind::ProfileItems => "profile_items",
            PartitionKind::ItemDetail => "item_detail",
            PartitionKind::Likers => "likers",
        }
    }

    /// ページ付きリストを持つ種別かどうか
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            PartitionKind::HomeFeed | PartitionKind::RecipeBook | PartitionKind::ProfileItems
        )
    }
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 単一パーティションを指す構造化キー
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    kind: PartitionKind,
    scope: Option<String>,
    page: Option<u32>,
}

impl PartitionKey {
    pub fn home_feed(page: u32) -> Self {
        Self {
            kind: PartitionKind::HomeFeed,
            scope: None,
            page: Some(page),
        }
    }

    pub fn recipe_book(viewer: &UserId, page: u32) -> Self {
        Self {
            kind: PartitionKind::RecipeBook,
            scope: Some(viewer.to_string()),
            page: Some(page),
        }
    }

    pub fn profile_items(profile: &UserId) -> Self {
        Self {
            kind: PartitionKind::ProfileItems,
            scope: Some(profile.to_string()),
            page: None,
        }
    }

    pub fn item_detail(item: &ItemId) -> Self {
        Self {
            kind: PartitionKind::ItemDetail,
            scope: Some(item.to_string()),
            page: None,
        }
    }

    pub fn likers(item: &ItemId) -> Self {
        Self {
            kind: PartitionKind::Likers,
            scope: Some(item.to_string()),
            page: None,
        }
    }

    pub fn kind(&self) -> PartitionKind {
        self.kind
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn page(&self) -> Option<u32> {
        self.page
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(scope) = &self.scope {
            write!(f, ":{}", scope)?;
        }
        if let Some(page) = self.page {
            write!(f, ":p{}", page)?;
        }
        Ok(())
    }
}
