//! Worker loop: poll, execute, reply
//!
//! One job at a time per worker. Scale out by running more workers against
//! the same consumer group.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::TransportError;
use crate::jobs::judger::process_judge_job;
use crate::runner::{RunLimits, Runner};
use crate::transport::JobSource;

/// Back-off after a transport failure other than an idle poll
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub struct Worker<S> {
    source: S,
    runner: Arc<dyn Runner>,
    limits: RunLimits,
}

impl<S: JobSource> Worker<S> {
    pub fn new(source: S, runner: Arc<dyn Runner>, limits: RunLimits) -> Self {
        Self {
            source,
            runner,
            limits,
        }
    }

    /// Take and answer at most one job.
    ///
    /// Returns `Ok(false)` when the poll interval passed without a job.
    pub async fn poll_once(&mut self) -> Result<bool, TransportError> {
        let delivery = match self.source.next_job().await {
            Ok(delivery) => delivery,
            Err(TransportError::Timeout(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        info!(
            "Received judge job: submission_id={}, testcases={}",
            delivery.job.submission_id,
            delivery.job.testcases.len()
        );

        let result = process_judge_job(self.runner.as_ref(), &self.limits, &delivery.job).await;
        let submission_id = delivery.job.submission_id;

        self.source.reply(delivery, &result).await?;
        info!("Judge job completed: submission_id={}", submission_id);

        Ok(true)
    }

    /// Serve jobs until the transport closes
    pub async fn run(mut self) -> Result<(), TransportError> {
        info!("Waiting for jobs...");

        loop {
            match self.poll_once().await {
                Ok(_) => {}
                Err(TransportError::Closed) => {
                    warn!("Job transport closed, worker stopping");
                    return Ok(());
                }
                Err(e @ TransportError::Malformed(_)) | Err(e @ TransportError::Codec(_)) => {
                    warn!("Skipped undecodable job: {}", e);
                }
                Err(e) => {
                    error!("Worker transport failure: {}", e);
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }
    }
}
