//! Redis Connection Management
//!
//! Lazily connected client with retry and an overall operation timeout. The
//! distributed rate-limit store is its only consumer, and it fails open on any
//! error returned here, so no operation may block past `timeout_ms`.

use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// INCR the key; set its expiry only when this call created it
const INCR_WITH_EXPIRY: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Redis connection configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,
    /// Upper bound for one operation, retries included
    pub timeout_ms: u64,
    /// Maximum retry attempts for operations
    pub max_retries: u32,
    /// Retry delay in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            timeout_ms: 10_000,
            max_retries: 3,
            retry_delay_ms: 100,
        }
    }
}

/// Redis client wrapper with connection management
pub struct RedisClient {
    config: RedisConfig,
    connection: Arc<RwLock<Option<ConnectionManager>>>,
    client: Client,
    incr_script: Script,
}

impl std::fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisClient {
    /// Build the client without connecting; the first operation connects
    pub fn new(config: RedisConfig) -> Result<Self, RedisError> {
        let client = Client::open(config.url.as_str())?;

        Ok(Self {
            config,
            connection: Arc::new(RwLock::new(None)),
            client,
            incr_script: Script::new(INCR_WITH_EXPIRY),
        })
    }

    /// Shared connection, connecting on first use or after a reset
    async fn get_connection(&self) -> Result<ConnectionManager, RedisError> {
        if let Some(conn) = self.connection.read().await.as_ref() {
            return Ok(conn.clone());
        }

        let mut slot = self.connection.write().await;
        // Another caller may have connected while we waited for the lock
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        tracing::info!("Establishing Redis connection to {}", self.config.url);
        let manager = ConnectionManager::new(self.client.clone()).await?;
        *slot = Some(manager.clone());
        tracing::info!("Redis connection established");
        Ok(manager)
    }

    /// Execute operation with retry logic, bounded by the configured timeout
    pub async fn with_retry<F, Fut, T>(&self, operation: F) -> Result<T, RedisError>
    where
        F: FnMut(ConnectionManager) -> Fut,
        Fut: std::future::Future<Output = Result<T, RedisError>>,
    {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        match tokio::time::timeout(timeout, self.retry_loop(operation)).await {
            Ok(result) => result,
            Err(_) => Err(RedisError::from((
                redis::ErrorKind::IoError,
                "Redis operation timed out",
            ))),
        }
    }

    async fn retry_loop<F, Fut, T>(&self, mut operation: F) -> Result<T, RedisError>
    where
        F: FnMut(ConnectionManager) -> Fut,
        Fut: std::future::Future<Output = Result<T, RedisError>>,
    {
        let mut last_error = None;

        for attempt in 0..self.config.max_retries {
            let result = match self.get_connection().await {
                Ok(conn) => operation(conn).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(
                        "Redis operation failed (attempt {}/{}): {}",
                        attempt + 1,
                        self.config.max_retries,
                        e
                    );
                    last_error = Some(e);

                    if attempt + 1 < self.config.max_retries {
                        self.reset_connection().await;
                        self.backoff(attempt).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            RedisError::from((redis::ErrorKind::IoError, "Max retries exceeded"))
        }))
    }

    /// Drop the shared connection so the next attempt reconnects
    async fn reset_connection(&self) {
        *self.connection.write().await = None;
    }

    async fn backoff(&self, attempt: u32) {
        tokio::time::sleep(Duration::from_millis(
            self.config.retry_delay_ms * (attempt as u64 + 1),
        ))
        .await;
    }

    /// Atomically increment `key`, setting `ttl_secs` expiry on first write
    pub async fn incr_with_expiry(&self, key: &str, ttl_secs: u64) -> Result<u64, RedisError> {
        let script = &self.incr_script;
        let count: i64 = self
            .with_retry(|mut conn| {
                let key = key.to_string();
                async move { script.key(&key).arg(ttl_secs).invoke_async(&mut conn).await }
            })
            .await?;
        Ok(count.max(0) as u64)
    }

    #[cfg(test)]
    async fn is_available(&self) -> bool {
        self.with_retry(|mut conn| async move {
            let result: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(result == "PONG")
        })
        .await
        .unwrap_or(false)
    }
}
