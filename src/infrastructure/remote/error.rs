use crate::shared::error::AppError;
use reqwest::StatusCode;
use thiserror::Error;

/// PostgREST 応答のステータス分類
#[derive(Debug, Error)]
pub enum RemoteApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Remote rejected request: {0}")]
    Rejected(String),
}

impl RemoteApiError {
    pub fn from_status(status: StatusCode, body: String) -> Self {
        let message = format!("{status}: {body}");
        match status.as_u16() {
            401 | 403 => RemoteApiError::Unauthorized(message),
            404 => RemoteApiError::NotFound(message),
            409 => RemoteApiError::Conflict(message),
            _ => RemoteApiError::Rejected(message),
        }
    }
}

impl From<RemoteApiError> for AppError {
    fn from(err: RemoteApiError) -> Self {
        match err {
            RemoteApiError::Unauthorized(msg) => AppError::Unauthorized(msg),
            RemoteApiError::NotFound(msg) => AppError::NotFound(msg),
            RemoteApiError::Conflict(msg) => AppError::Constraint(msg),
            RemoteApiError::Rejected(msg) => AppError::Remote(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let conflict = RemoteApiError::from_status(StatusCode::CONFLICT, "dup".to_string());
        assert!(matches!(AppError::from(conflict), AppError::Constraint(_)));

        let denied = RemoteApiError::from_status(StatusCode::FORBIDDEN, "rls".to_string());
        assert!(matches!(AppError::from(denied), AppError::Unauthorized(_)));

        let server = RemoteApiError::from_status(
            StatusCode::INTERNAL_SERVER_ERROR,
            "boom".to_string(),
        );
        assert!(matches!(AppError::from(server), AppError::Remote(_)));
    }
}
