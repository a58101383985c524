//! Job transport - request/reply over a consumer-group bus
//!
//! The coordinator side sends a `JudgeJob` and blocks until exactly one
//! worker of the group replies or the reply deadline passes. The worker side
//! pulls jobs one at a time and must answer every job it took, even when it
//! could not judge it.
//!
//! Backends:
//! - `redis_stream`: Redis streams + per-request reply lists (multi-process)
//! - `memory`: in-process channels (embedded worker, tests)

pub mod memory;
pub mod redis_stream;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::jobs::{JudgeJob, JudgeResult};

/// A job taken from the bus, plus what the worker needs to answer it
#[derive(Debug, Clone)]
pub struct Delivery {
    pub job: JudgeJob,
    /// Correlation key the requester waits on
    pub reply_to: String,
    /// Backend acknowledgement handle (stream entry id for Redis)
    pub receipt: Option<String>,
}

/// Producer side
#[async_trait]
pub trait JudgeTransport: Send + Sync {
    /// Send `job` to one worker and wait for its result.
    ///
    /// Fails with `TransportError::Timeout` when no reply arrives in time.
    /// The job is not withdrawn on timeout; a worker may still run it.
    async fn request(&self, job: &JudgeJob) -> Result<JudgeResult, TransportError>;
}

/// Worker side
#[async_trait]
pub trait JobSource: Send {
    /// Wait up to one poll interval for the next job.
    ///
    /// `TransportError::Timeout` here is routine: poll again.
    async fn next_job(&mut self) -> Result<Delivery, TransportError>;

    /// Answer a delivery. Called exactly once per delivery.
    async fn reply(
        &mut self,
        delivery: Delivery,
        result: &JudgeResult,
    ) -> Result<(), TransportError>;
}
