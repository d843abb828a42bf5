use crate::shared::error::AppError;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// キーごとのスライディングウィンドウ制限。連打抑制にも使う。
pub struct RateLimiter {
    requests: Mutex<HashMap<String, Vec<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            requests: Mutex::new(HashMap::new()),
            max_requests,
            window,
        }
    }

    /// デバウンス用途: ウィンドウ内 1 回のみ許可
    pub fn debouncer(window: Duration) -> Self {
        Self::new(1, window)
    }

    pub async fn check_and_record(&self, key: &str, message: &str) -> Result<(), AppError> {
        if self.window.is_zero() {
            return Ok(());
        }
        let mut guard = self.requests.lock().await;
        let now = Instant::now();
        let entries = guard.entry(key.to_string()).or_default();
        entries.retain(|instant| now.duration_since(*instant) < self.window);
        if entries.len() >= self.max_requests {
            return Err(AppError::RateLimited(message.to_string()));
        }
        entries.push(now);
        Ok(())
    }

    /// 溜まった古いキーを捨てる
    pub async fn prune(&self) {
        let mut guard = self.requests.lock().await;
        let now = Instant::now();
        guard.retain(|_, entries| {
            entries.retain(|instant| now.duration_since(*instant) < self.window);
            !entries.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_debouncer_suppresses_second_call() {
        let limiter = RateLimiter::debouncer(Duration::from_millis(200));
        assert!(limiter.check_and_record("like:u1:i1", "too fast").await.is_ok());
        assert!(limiter
            .check_and_record("like:u1:i1", "too fast")
            .await
            .is_err());
        // 別キーは独立
        assert!(limiter.check_and_record("like:u1:i2", "too fast").await.is_ok());
    }

    #[tokio::test]
    async fn test_window_expires() {
        let limiter = RateLimiter::debouncer(Duration::from_millis(30));
        assert!(limiter.check_and_record("k", "busy").await.is_ok());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(limiter.check_and_record("k", "busy").await.is_ok());
    }

    #[tokio::test]
    async fn test_zero_window_never_limits() {
        let limiter = RateLimiter::debouncer(Duration::ZERO);
        for _ in 0..5 {
            assert!(limiter.check_and_record("k", "busy").await.is_ok());
        }
    }
}
