use crate::shared::error::AppError;
use std::future::Future;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

pub const DEFAULT_RETRY_BASE_MS: u64 = 200;

/// 一時的な失敗に限って指数バックオフで再試行する汎用ヘルパー。
///
/// キャッシュ層はここでの再試行を関知しない。自動ロールバック後に
/// 再試行が成功した場合のずれは定期リフレッシュが拾う前提。
pub async fn with_backoff<R, Fut, F>(max_retries: u32, mut op: F) -> Result<R, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R, AppError>>,
{
    let strategy = ExponentialBackoff::from_millis(DEFAULT_RETRY_BASE_MS)
        .map(jitter)
        .take(max_retries as usize);
    RetryIf::spawn(strategy, || op(), |err: &AppError| err.retryable()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let result = with_backoff(5, || {
            let attempts = attempts.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AppError::Network("flaky".to_string()))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_validation_errors() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let result: Result<u32, _> = with_backoff(5, || {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(AppError::InvalidInput("bad".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(AppError::InvalidInput(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
