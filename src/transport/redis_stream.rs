//! Redis transport
//!
//! - Jobs are appended to a stream (the topic) with fields `payload` and `reply_to`
//! - Workers read through a consumer group, so each entry goes to one worker
//! - Replies are pushed to the per-request `reply_to` list the producer BLPOPs on
//! - Worker ID allocation and lease management names each group consumer

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Delivery, JobSource, JudgeTransport};
use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::jobs::{JudgeJob, JudgeResult};

/// Redis key constants
pub mod keys {
    /// Worker lease key prefix for distributed worker ID allocation
    pub const WORKER_LEASE_PREFIX: &str = "judge:worker:lease:";

    /// Reply list key prefix, one list per request
    pub const REPLY_PREFIX: &str = "judge:reply:";

    /// Stream entry fields
    pub const FIELD_PAYLOAD: &str = "payload";
    pub const FIELD_REPLY_TO: &str = "reply_to";
}

/// Configuration constants
const MAX_WORKERS: u32 = 64;
const WORKER_LEASE_TTL_SECS: u64 = 120;
const REPLY_EXPIRY_SECS: i64 = 300;
/// BLPOP treats 0 as "forever"
const MIN_REPLY_WAIT_SECS: f64 = 0.01;

/// Producer side: enqueue a job and wait on its reply list
#[derive(Clone)]
pub struct RedisTransport {
    client: redis::Client,
    topic: String,
    reply_timeout: Duration,
}

impl RedisTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        Ok(Self {
            client: redis::Client::open(config.redis_url.as_str())?,
            topic: config.topic.clone(),
            reply_timeout: config.reply_timeout,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl JudgeTransport for RedisTransport {
    async fn request(&self, job: &JudgeJob) -> Result<JudgeResult, TransportError> {
        let payload = serde_json::to_string(job)?;
        let reply_to = format!("{}{}", keys::REPLY_PREFIX, Uuid::new_v4());

        // Dedicated connection: BLPOP would stall every other command multiplexed on it
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let entry_id: String = conn
            .xadd(
                &self.topic,
                "*",
                &[
                    (keys::FIELD_PAYLOAD, payload.as_str()),
                    (keys::FIELD_REPLY_TO, reply_to.as_str()),
                ],
            )
            .await?;
        debug!(
            "Enqueued submission_id={} as {} on {}",
            job.submission_id, entry_id, self.topic
        );

        let wait = self.reply_timeout.as_secs_f64().max(MIN_REPLY_WAIT_SECS);
        let reply: Option<(String, String)> = conn.blpop(&reply_to, wait).await?;

        match reply {
            Some((_, json)) => Ok(serde_json::from_str(&json)?),
            None => Err(TransportError::Timeout(self.reply_timeout)),
        }
    }
}

/// Worker side: a named member of the consumer group
pub struct RedisJobSource {
    worker_id: u32,
    client: redis::Client,
    conn: MultiplexedConnection,
    topic: String,
    group: String,
    consumer: String,
    poll_interval: Duration,
    lease_handle: JoinHandle<()>,
}

impl RedisJobSource {
    /// Connect, claim a worker ID and join the consumer group.
    ///
    /// The group is created (with the stream) if missing, starting from the
    /// beginning of the stream so jobs queued before any worker started are kept.
    pub async fn connect(config: &TransportConfig) -> Result<Self, TransportError> {
        let client = redis::Client::open(config.redis_url.as_str())?;

        let mut conn = get_connection_with_retry(&client).await;
        info!("Connected to Redis at {}", config.redis_url);

        let worker_id = allocate_worker_id(&client).await?;
        info!(
            "Allocated worker_id={} (lease {}s)",
            worker_id, WORKER_LEASE_TTL_SECS
        );
        let lease_handle = spawn_lease_heartbeat(client.clone(), worker_id);

        ensure_group(&mut conn, &config.topic, &config.group).await?;
        let consumer = format!("{}-{}", config.group, worker_id);
        info!(
            "Joined group {} on {} as {}",
            config.group, config.topic, consumer
        );

        Ok(Self {
            worker_id,
            client,
            conn,
            topic: config.topic.clone(),
            group: config.group.clone(),
            consumer,
            poll_interval: config.poll_interval,
            lease_handle,
        })
    }

    /// Get the allocated worker ID
    pub fn worker_id(&self) -> u32 {
        self.worker_id
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Reconnect to Redis and make sure the group still exists
    async fn reconnect(&mut self) -> Result<(), TransportError> {
        self.conn = get_connection_with_retry(&self.client).await;
        ensure_group(&mut self.conn, &self.topic, &self.group).await
    }

    async fn ack(&mut self, entry_id: &str) -> Result<(), TransportError> {
        self.conn
            .xack::<_, _, _, ()>(&self.topic, &self.group, &[entry_id])
            .await?;
        Ok(())
    }

    async fn push_reply(&mut self, reply_to: &str, json: &str) -> Result<(), TransportError> {
        if let Err(e) = self.conn.rpush::<_, _, ()>(reply_to, json).await {
            warn!("Failed to push reply: {}. Reconnecting...", e);
            self.reconnect().await?;
            self.conn.rpush::<_, _, ()>(reply_to, json).await?;
        }

        // Nobody may be waiting any more; don't let the list linger
        let _ = self.conn.expire::<_, ()>(reply_to, REPLY_EXPIRY_SECS).await;

        Ok(())
    }
}

#[async_trait]
impl JobSource for RedisJobSource {
    async fn next_job(&mut self) -> Result<Delivery, TransportError> {
        let opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(1)
            .block(self.poll_interval.as_millis() as usize);

        let reply: Option<StreamReadReply> =
            match self.conn.xread_options(&[&self.topic], &[">"], &opts).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("Redis XREADGROUP failed: {}. Reconnecting...", e);
                    self.reconnect().await?;
                    return Err(e.into());
                }
            };

        let Some(entry) = reply
            .and_then(|r| r.keys.into_iter().next())
            .and_then(|k| k.ids.into_iter().next())
        else {
            return Err(TransportError::Timeout(self.poll_interval));
        };

        match decode_entry(&entry) {
            Ok((job, reply_to)) => Ok(Delivery {
                job,
                reply_to,
                receipt: Some(entry.id),
            }),
            Err(e) => {
                warn!("Dropping malformed stream entry {}: {}", entry.id, e);
                // Still answer when possible so the producer doesn't wait out its timeout
                if let Some(reply_to) = entry.get::<String>(keys::FIELD_REPLY_TO) {
                    let result = JudgeResult::server_error(format!("malformed job: {}", e));
                    let json = serde_json::to_string(&result)?;
                    self.push_reply(&reply_to, &json).await?;
                }
                self.ack(&entry.id).await?;
                Err(e)
            }
        }
    }

    async fn reply(
        &mut self,
        delivery: Delivery,
        result: &JudgeResult,
    ) -> Result<(), TransportError> {
        let json = serde_json::to_string(result)?;
        self.push_reply(&delivery.reply_to, &json).await?;

        if let Some(entry_id) = &delivery.receipt {
            self.ack(entry_id).await?;
        }

        Ok(())
    }
}

impl Drop for RedisJobSource {
    fn drop(&mut self) {
        self.lease_handle.abort();
    }
}

fn decode_entry(entry: &StreamId) -> Result<(JudgeJob, String), TransportError> {
    let payload: String = entry.get(keys::FIELD_PAYLOAD).ok_or_else(|| {
        TransportError::Malformed(format!("entry {} has no {}", entry.id, keys::FIELD_PAYLOAD))
    })?;
    let reply_to: String = entry.get(keys::FIELD_REPLY_TO).ok_or_else(|| {
        TransportError::Malformed(format!("entry {} has no {}", entry.id, keys::FIELD_REPLY_TO))
    })?;

    Ok((serde_json::from_str(&payload)?, reply_to))
}

/// Create the consumer group, tolerating one that already exists
async fn ensure_group(
    conn: &mut MultiplexedConnection,
    topic: &str,
    group: &str,
) -> Result<(), TransportError> {
    match conn
        .xgroup_create_mkstream::<_, _, _, ()>(topic, group, "0")
        .await
    {
        Ok(()) => Ok(()),
        Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Get a Redis connection, retrying until one succeeds
async fn get_connection_with_retry(client: &redis::Client) -> MultiplexedConnection {
    loop {
        match client.get_multiplexed_async_connection().await {
            Ok(conn) => return conn,
            Err(e) => {
                warn!(
                    "Failed to connect to Redis: {}. Retrying in 3 seconds...",
                    e
                );
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        }
    }
}

/// Allocate a unique worker ID using Redis SET NX with expiration
async fn allocate_worker_id(client: &redis::Client) -> Result<u32, TransportError> {
    loop {
        let mut conn = get_connection_with_retry(client).await;

        for worker_id in 0..MAX_WORKERS {
            let key = format!("{}{}", keys::WORKER_LEASE_PREFIX, worker_id);
            let claimed: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg("claimed")
                .arg("NX")
                .arg("EX")
                .arg(WORKER_LEASE_TTL_SECS as usize)
                .query_async(&mut conn)
                .await?;

            if claimed.is_some() {
                return Ok(worker_id);
            }
        }

        warn!(
            "No free worker_id (0-{}). Retrying in 1 second...",
            MAX_WORKERS - 1
        );
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

/// Spawn a background task to keep the worker lease alive
fn spawn_lease_heartbeat(client: redis::Client, worker_id: u32) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(WORKER_LEASE_TTL_SECS / 2);

        loop {
            tokio::time::sleep(interval).await;

            let mut conn = get_connection_with_retry(&client).await;
            let key = format!("{}{}", keys::WORKER_LEASE_PREFIX, worker_id);
            if let Err(e) = redis::cmd("EXPIRE")
                .arg(&key)
                .arg(WORKER_LEASE_TTL_SECS as usize)
                .query_async::<()>(&mut conn)
                .await
            {
                warn!("Failed to refresh worker lease {}: {}", worker_id, e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::Value;
    use std::collections::HashMap;

    fn entry(fields: &[(&str, &str)]) -> StreamId {
        StreamId {
            id: "1-0".into(),
            map: fields
                .iter()
                .map(|(k, v)| (k.to_string(), Value::BulkString(v.as_bytes().to_vec())))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn test_decode_entry() {
        let job = JudgeJob {
            submission_id: 12,
            source_code: "print(input())".into(),
            testcases: vec![],
        };
        let payload = serde_json::to_string(&job).unwrap();

        let (decoded, reply_to) = decode_entry(&entry(&[
            (keys::FIELD_PAYLOAD, &payload),
            (keys::FIELD_REPLY_TO, "judge:reply:abc"),
        ]))
        .unwrap();

        assert_eq!(decoded, job);
        assert_eq!(reply_to, "judge:reply:abc");
    }

    #[test]
    fn test_decode_entry_missing_field() {
        let err = decode_entry(&entry(&[(keys::FIELD_REPLY_TO, "judge:reply:abc")])).unwrap_err();
        assert!(matches!(err, TransportError::Malformed(_)));
    }

    #[test]
    fn test_decode_entry_bad_payload() {
        let err = decode_entry(&entry(&[
            (keys::FIELD_PAYLOAD, "{not json"),
            (keys::FIELD_REPLY_TO, "judge:reply:abc"),
        ]))
        .unwrap_err();
        assert!(matches!(err, TransportError::Codec(_)));
    }

    #[test]
    fn test_transport_rejects_bad_url() {
        let config = TransportConfig {
            redis_url: "not a url".into(),
            ..TransportConfig::default()
        };
        assert!(RedisTransport::new(&config).is_err());
    }
}
