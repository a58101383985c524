//! Judge-result documents kept in Redis as JSON

use anyhow::Context;
use async_trait::async_trait;
use redis::AsyncCommands;
use uuid::Uuid;

use super::JudgeResultStore;
use crate::error::StoreError;
use crate::jobs::JudgeResult;

/// Judge result document key prefix
pub const JUDGE_RESULT_PREFIX: &str = "judge:result:";

/// Result documents, one key per judge run, never expired
#[derive(Clone)]
pub struct RedisResultStore {
    client: redis::Client,
}

impl RedisResultStore {
    /// Validates the URL only; connections are opened per call
    pub fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        Ok(self
            .client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis")?)
    }
}

fn result_key(id: &str) -> String {
    format!("{}{}", JUDGE_RESULT_PREFIX, id)
}

#[async_trait]
impl JudgeResultStore for RedisResultStore {
    async fn insert(&self, result: &JudgeResult) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let json = serde_json::to_string(result).context("Failed to encode judge result")?;

        self.connection()
            .await?
            .set::<_, _, ()>(result_key(&id), json)
            .await
            .with_context(|| format!("Failed to store judge result {}", id))?;

        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<JudgeResult>, StoreError> {
        let json: Option<String> = self
            .connection()
            .await?
            .get(result_key(id))
            .await
            .with_context(|| format!("Failed to load judge result {}", id))?;

        json.map(|json| {
            serde_json::from_str(&json)
                .with_context(|| format!("Corrupt judge result {}", id))
                .map_err(StoreError::from)
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_key() {
        assert_eq!(result_key("abc"), "judge:result:abc");
    }

    #[test]
    fn test_url_is_checked_up_front() {
        assert!(RedisResultStore::new("redis://localhost:6379").is_ok());
        assert!(matches!(
            RedisResultStore::new("not a url"),
            Err(StoreError::Backend(_))
        ));
    }
}
