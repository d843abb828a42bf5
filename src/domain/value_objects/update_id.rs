use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 楽観的更新 1 件を識別する ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptimisticUpdateId(String);

impl OptimisticUpdateId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(value: String) -> Result<Self, String> {
        if value.trim().is_empty() {
            return Err("Optimistic update id cannot be empty".to_string());
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OptimisticUpdateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<OptimisticUpdateId> for String {
    fn from(id: OptimisticUpdateId) -> Self {
        id.0
    }
}
