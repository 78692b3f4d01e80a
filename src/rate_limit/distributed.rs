//! Redis-backed counter store shared between instances

use redis::RedisError;

use crate::cache::RedisClient;

pub struct DistributedStore {
    client: RedisClient,
}

impl DistributedStore {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }

    /// One key per identifier, path and window; expires with the window
    pub fn key(identifier: &str, path: &str, window_index: u64) -> String {
        format!("rl:{identifier}:{path}:{window_index}")
    }

    pub async fn increment(
        &self,
        identifier: &str,
        path: &str,
        window_index: u64,
        window_secs: u64,
    ) -> Result<u64, RedisError> {
        let key = Self::key(identifier, path, window_index);
        self.client.incr_with_expiry(&key, window_secs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(
            DistributedStore::key("ip:1.2.3.4", "/api/v1/health", 28_000_000),
            "rl:ip:1.2.3.4:/api/v1/health:28000000"
        );
    }
}
