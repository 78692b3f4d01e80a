//! Fixed-Window Rate Limiting
//!
//! Counts requests per `(identifier, path)` in clock-aligned windows of
//! `window_seconds`. Two interchangeable stores hold the counters:
//! - [`LocalStore`]: in-process DashMap, swept opportunistically
//! - [`DistributedStore`]: Redis keys with atomic increment + expiry
//!
//! Both feed the same post-increment count through [`decide`], so allow/deny
//! is identical for the same call sequence. Store failures fail open.

pub mod distributed;
pub mod local;

pub use distributed::DistributedStore;
pub use local::LocalStore;

use redis::RedisError;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::cache::{RedisClient, RedisConfig};
use crate::config::RateLimitSettings;
use crate::metrics;

/// Quota information returned alongside every decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimitInfo {
    pub remaining: u64,
    /// Unix seconds at which the current window ends
    pub reset_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub limited: bool,
    pub info: RateLimitInfo,
}

impl RateLimitDecision {
    /// Allowed with zeroed info; used when the store fails
    pub fn fail_open() -> Self {
        Self {
            limited: false,
            info: RateLimitInfo::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("redis store error: {0}")]
    Redis(#[from] RedisError),
}

/// Decision for a post-increment `count` against `max_requests`
pub fn decide(count: u64, max_requests: u64, window_index: u64, window_secs: u64) -> RateLimitDecision {
    RateLimitDecision {
        limited: count > max_requests,
        info: RateLimitInfo {
            remaining: max_requests.saturating_sub(count),
            reset_at: (window_index + 1) * window_secs,
        },
    }
}

pub enum RateLimitStore {
    Local(LocalStore),
    Distributed(DistributedStore),
}

impl RateLimitStore {
    pub fn name(&self) -> &'static str {
        match self {
            RateLimitStore::Local(_) => "local",
            RateLimitStore::Distributed(_) => "redis",
        }
    }

    async fn increment(
        &self,
        identifier: &str,
        path: &str,
        window_index: u64,
        window_secs: u64,
        now_secs: u64,
    ) -> Result<u64, RateLimitError> {
        match self {
            RateLimitStore::Local(store) => {
                Ok(store.increment(identifier, path, window_index, now_secs))
            }
            RateLimitStore::Distributed(store) => {
                Ok(store.increment(identifier, path, window_index, window_secs).await?)
            }
        }
    }
}

pub struct RateLimiter {
    settings: RateLimitSettings,
    store: RateLimitStore,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings, store: RateLimitStore) -> Self {
        Self { settings, store }
    }

    /// Redis store when `redis_url` is set, local store otherwise
    pub fn from_settings(settings: RateLimitSettings) -> Result<Self, RateLimitError> {
        let store = match settings.redis_url.as_deref() {
            Some(url) if !url.trim().is_empty() => {
                let client = RedisClient::new(RedisConfig {
                    url: url.to_string(),
                    timeout_ms: settings.backend_timeout_ms,
                    ..Default::default()
                })?;
                tracing::info!("Rate limiter using distributed store");
                RateLimitStore::Distributed(DistributedStore::new(client))
            }
            _ => {
                tracing::info!("Rate limiter using local store");
                RateLimitStore::Local(LocalStore::new(settings.sweep_interval_secs))
            }
        };
        Ok(Self::new(settings, store))
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn backend(&self) -> &'static str {
        self.store.name()
    }

    pub async fn is_rate_limited(&self, identifier: &str, path: &str) -> RateLimitDecision {
        let now_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.is_rate_limited_at(identifier, path, now_secs).await
    }

    pub async fn is_rate_limited_at(
        &self,
        identifier: &str,
        path: &str,
        now_secs: u64,
    ) -> RateLimitDecision {
        let window_secs = self.settings.window_seconds.max(1);
        let window_index = now_secs / window_secs;
        let max_requests = self.settings.max_requests_for(path);

        match self
            .store
            .increment(identifier, path, window_index, window_secs, now_secs)
            .await
        {
            Ok(count) => decide(count, max_requests, window_index, window_secs),
            Err(e) => {
                tracing::warn!(
                    backend = self.store.name(),
                    identifier,
                    path,
                    error = %e,
                    "Rate limit check failed, allowing request"
                );
                metrics::record_rate_limit_backend_error(self.store.name());
                RateLimitDecision::fail_open()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(max: u64) -> RateLimitSettings {
        RateLimitSettings {
            window_seconds: 60,
            default_max_requests: 100,
            path_limits: HashMap::from([("/api/v1/chat/analyze".to_string(), max)]),
            redis_url: None,
            ..Default::default()
        }
    }

    #[test]
    fn test_decide() {
        assert_eq!(
            decide(3, 5, 10, 60),
            RateLimitDecision {
                limited: false,
                info: RateLimitInfo {
                    remaining: 2,
                    reset_at: 660
                }
            }
        );
        let over = decide(7, 5, 0, 60);
        assert!(over.limited);
        assert_eq!(over.info.remaining, 0);
    }

    #[tokio::test]
    async fn test_twenty_allowed_then_denied() {
        let limiter = RateLimiter::from_settings(settings(20)).unwrap();
        assert_eq!(limiter.backend(), "local");

        for i in 0..20u64 {
            let decision = limiter
                .is_rate_limited_at("ip:1.2.3.4", "/api/v1/chat/analyze", 0)
                .await;
            assert!(!decision.limited);
            assert_eq!(decision.info.remaining, 19 - i);
            assert_eq!(decision.info.reset_at, 60);
        }

        let denied = limiter
            .is_rate_limited_at("ip:1.2.3.4", "/api/v1/chat/analyze", 5)
            .await;
        assert!(denied.limited);
        assert_eq!(denied.info.remaining, 0);
        assert_eq!(denied.info.reset_at, 60);
    }

    #[tokio::test]
    async fn test_counter_resets_at_window_boundary() {
        let limiter = RateLimiter::from_settings(settings(2)).unwrap();
        let path = "/api/v1/chat/analyze";

        for _ in 0..3 {
            limiter.is_rate_limited_at("user:u1", path, 59).await;
        }
        assert!(limiter.is_rate_limited_at("user:u1", path, 59).await.limited);

        let next_window = limiter.is_rate_limited_at("user:u1", path, 60).await;
        assert!(!next_window.limited);
        assert_eq!(next_window.info.remaining, 1);
        assert_eq!(next_window.info.reset_at, 120);
    }

    #[tokio::test]
    async fn test_default_limit_for_unlisted_path() {
        let limiter = RateLimiter::from_settings(settings(1)).unwrap();
        let decision = limiter.is_rate_limited_at("ip:9.9.9.9", "/other", 0).await;
        assert_eq!(decision.info.remaining, 99);
    }

    #[tokio::test]
    async fn test_identifiers_and_paths_are_independent() {
        let limiter = RateLimiter::from_settings(settings(1)).unwrap();
        let path = "/api/v1/chat/analyze";

        assert!(!limiter.is_rate_limited_at("ip:1.1.1.1", path, 0).await.limited);
        assert!(limiter.is_rate_limited_at("ip:1.1.1.1", path, 0).await.limited);
        assert!(!limiter.is_rate_limited_at("user:1.1.1.1", path, 0).await.limited);
        assert!(!limiter.is_rate_limited_at("ip:1.1.1.1", "/other", 0).await.limited);
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let mut config = settings(1);
        config.redis_url = Some("redis://127.0.0.1:1".to_string());
        config.backend_timeout_ms = 200;
        let limiter = RateLimiter::from_settings(config).unwrap();
        assert_eq!(limiter.backend(), "redis");

        for _ in 0..3 {
            let decision = limiter
                .is_rate_limited_at("ip:1.2.3.4", "/api/v1/chat/analyze", 0)
                .await;
            assert_eq!(decision, RateLimitDecision::fail_open());
        }
    }
}
