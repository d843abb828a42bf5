use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
    pub cache: CacheConfig,
    pub push: PushConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout_secs: u64,
    pub change_poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// 未確認の楽観的更新を自動ロールバックするまでの時間
    pub optimistic_timeout_ms: u64,
    /// 同一アクションの連打を抑制するウィンドウ
    pub debounce_ms: u64,
    pub refresh_interval_secs: u64,
    pub max_retry: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub feed_page_size: u32,
    pub detail_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    pub endpoint: String,
    pub enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            remote: RemoteConfig {
                base_url: "http://localhost:54321".to_string(),
                api_key: String::new(),
                request_timeout_secs: 30,
                change_poll_interval_secs: 15,
            },
            sync: SyncConfig {
                optimistic_timeout_ms: 5000,
                debounce_ms: 1000,
                refresh_interval_secs: 300, // 5 minutes
                max_retry: 3,
            },
            cache: CacheConfig {
                feed_page_size: 20,
                detail_capacity: 256,
            },
            push: PushConfig {
                endpoint: String::new(),
                enabled: false,
            },
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        // 既定値
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("KONDATE_REMOTE_URL") {
            if !v.trim().is_empty() {
                cfg.remote.base_url = v.trim().to_string();
            }
        }
        if let Ok(v) = std::env::var("KONDATE_REMOTE_API_KEY") {
            cfg.remote.api_key = v;
        }
        if let Ok(v) = std::env::var("KONDATE_REMOTE_TIMEOUT_SECS") {
            if let Some(value) = parse_u64(&v) {
                cfg.remote.request_timeout_secs = value.max(1);
            }
        }
        if let Ok(v) = std::env::var("KONDATE_REMOTE_POLL_INTERVAL_SECS") {
            if let Some(value) = parse_u64(&v) {
                cfg.remote.change_poll_interval_secs = value.max(1);
            }
        }

        if let Ok(v) = std::env::var("KONDATE_SYNC_OPTIMISTIC_TIMEOUT_MS") {
            if let Some(value) = parse_u64(&v) {
                cfg.sync.optimistic_timeout_ms = value.max(1);
            }
        }
        if let Ok(v) = std::env::var("KONDATE_SYNC_DEBOUNCE_MS") {
            if let Some(value) = parse_u64(&v) {
                cfg.sync.debounce_ms = value;
            }
        }
        if let Ok(v) = std::env::var("KONDATE_SYNC_REFRESH_INTERVAL_SECS") {
            if let Some(value) = parse_u64(&v) {
                cfg.sync.refresh_interval_secs = value.max(1);
            }
        }
        if let Ok(v) = std::env::var("KONDATE_SYNC_MAX_RETRY") {
            if let Some(value) = parse_u64(&v) {
                cfg.sync.max_retry = value as u32;
            }
        }

        if let Ok(v) = std::env::var("KONDATE_CACHE_FEED_PAGE_SIZE") {
            if let Some(value) = parse_u64(&v) {
                cfg.cache.feed_page_size = (value as u32).max(1);
            }
        }
        if let Ok(v) = std::env::var("KONDATE_CACHE_DETAIL_CAPACITY") {
            if let Some(value) = parse_u64(&v) {
                cfg.cache.detail_capacity = (value as usize).max(1);
            }
        }

        if let Ok(v) = std::env::var("KONDATE_PUSH_ENDPOINT") {
            if !v.trim().is_empty() {
                cfg.push.endpoint = v.trim().to_string();
                cfg.push.enabled = true;
            }
        }
        if let Ok(v) = std::env::var("KONDATE_PUSH_ENABLED") {
            cfg.push.enabled = parse_bool(&v, cfg.push.enabled);
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.remote.base_url.trim().is_empty() {
            return Err("Remote base_url must not be empty".to_string());
        }
        if self.sync.optimistic_timeout_ms == 0 {
            return Err("Sync optimistic_timeout_ms must be greater than 0".to_string());
        }
        if self.cache.feed_page_size == 0 {
            return Err("Cache feed_page_size must be greater than 0".to_string());
        }
        if self.cache.detail_capacity == 0 {
            return Err("Cache detail_capacity must be greater than 0".to_string());
        }
        if self.push.enabled && self.push.endpoint.trim().is_empty() {
            return Err("Push endpoint must be set when push is enabled".to_string());
        }
        Ok(())
    }
}

fn parse_bool(s: &str, default: bool) -> bool {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.sync.optimistic_timeout_ms, 5000);
        assert_eq!(cfg.sync.debounce_ms, 1000);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut cfg = AppConfig::default();
        cfg.cache.detail_capacity = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_requires_push_endpoint_when_enabled() {
        let mut cfg = AppConfig::default();
        cfg.push.enabled = true;
        cfg.push.endpoint = String::new();
        assert!(cfg.validate().is_err());
    }
}
