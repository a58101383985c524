//! Process configuration
//!
//! Everything comes from environment variables (a `.env` file is loaded by
//! the binary first). Every value has a default suitable for local runs.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use crate::runner::RunLimits;

/// Bus configuration shared by coordinator and workers
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    pub redis_url: String,
    /// Stream carrying judge jobs
    pub topic: String,
    /// Consumer group the workers join
    pub group: String,
    /// How long `request` waits for a reply
    pub reply_timeout: Duration,
    /// How long one `next_job` poll blocks
    pub poll_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".into(),
            topic: "judge:jobs".into(),
            group: "judge-workers".into(),
            reply_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(5000),
        }
    }
}

impl TransportConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let default = Self::default();
        Ok(Self {
            redis_url: env_or("REDIS_URL", default.redis_url),
            topic: env_or("JUDGE_TOPIC", default.topic),
            group: env_or("JUDGE_GROUP", default.group),
            reply_timeout: Duration::from_secs(env_parse(
                "JUDGE_REPLY_TIMEOUT_SECS",
                default.reply_timeout.as_secs(),
            )?),
            poll_interval: Duration::from_millis(env_parse(
                "JUDGE_POLL_INTERVAL_MS",
                default.poll_interval.as_millis() as u64,
            )?),
        })
    }
}

/// Execution settings of a worker
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Key into the language table
    pub language: String,
    pub limits: RunLimits,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            language: "python".into(),
            limits: RunLimits::new(2000, 256),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let default = Self::default();
        let default_memory_mb = default.limits.memory_limit_bytes / (1024 * 1024);
        Ok(Self {
            language: env_or("JUDGE_LANGUAGE", default.language),
            limits: RunLimits::new(
                env_parse(
                    "JUDGE_TIME_LIMIT_MS",
                    default.limits.time_limit.as_millis() as u64,
                )?,
                env_parse("JUDGE_MEMORY_LIMIT_MB", default_memory_mb)?,
            ),
        })
    }
}

/// MinIO/S3 location of submitted source code
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub endpoint: String,
    pub port: u16,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub use_ssl: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost".into(),
            port: 9000,
            access_key: "minioadmin".into(),
            secret_key: "minioadmin".into(),
            bucket: "judge-submissions".into(),
            use_ssl: false,
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let default = Self::default();
        Ok(Self {
            endpoint: env_or("MINIO_ENDPOINT", default.endpoint),
            port: env_parse("MINIO_PORT", default.port)?,
            access_key: env_or("MINIO_ACCESS_KEY", default.access_key),
            secret_key: env_or("MINIO_SECRET_KEY", default.secret_key),
            bucket: env_or("MINIO_BUCKET", default.bucket),
            use_ssl: std::env::var("MINIO_USE_SSL")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(default.use_ssl),
        })
    }

    pub fn endpoint_url(&self) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.endpoint, self.port)
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let transport = TransportConfig::default();
        assert_eq!(transport.topic, "judge:jobs");
        assert_eq!(transport.group, "judge-workers");
        assert_eq!(transport.reply_timeout, Duration::from_secs(60));

        let worker = WorkerConfig::default();
        assert_eq!(worker.language, "python");
        assert_eq!(worker.limits, RunLimits::new(2000, 256));
    }

    #[test]
    fn test_storage_endpoint_url() {
        let mut storage = StorageConfig::default();
        assert_eq!(storage.endpoint_url(), "http://localhost:9000");
        assert_eq!(storage.bucket, "judge-submissions");

        storage.endpoint = "minio.internal".into();
        storage.port = 443;
        storage.use_ssl = true;
        assert_eq!(storage.endpoint_url(), "https://minio.internal:443");
    }

    #[test]
    fn test_env_parse() {
        std::env::set_var("JUDGE_TEST_PARSE_OK", " 750 ");
        std::env::set_var("JUDGE_TEST_PARSE_BAD", "fast");

        assert_eq!(env_parse::<u64>("JUDGE_TEST_PARSE_OK", 1).unwrap(), 750);
        assert_eq!(env_parse::<u64>("JUDGE_TEST_PARSE_UNSET", 9).unwrap(), 9);
        let err = env_parse::<u64>("JUDGE_TEST_PARSE_BAD", 1).unwrap_err();
        assert!(err.to_string().contains("JUDGE_TEST_PARSE_BAD"));
    }
}
