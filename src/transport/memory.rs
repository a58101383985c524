//! In-process transport
//!
//! Used when the worker runs embedded in the coordinator's process. Every
//! clone of `MemoryJobSource` shares one receiver, so clones compete for jobs
//! the same way members of a consumer group do.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::debug;
use uuid::Uuid;

use super::{Delivery, JobSource, JudgeTransport};
use crate::error::TransportError;
use crate::jobs::{JudgeJob, JudgeResult};

type ReplySlots = Arc<Mutex<HashMap<String, oneshot::Sender<JudgeResult>>>>;

/// Create a connected producer/consumer pair
pub fn channel(
    reply_timeout: Duration,
    poll_interval: Duration,
) -> (MemoryTransport, MemoryJobSource) {
    let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
    let replies = ReplySlots::default();

    let transport = MemoryTransport {
        jobs: jobs_tx,
        replies: replies.clone(),
        reply_timeout,
    };
    let source = MemoryJobSource {
        jobs: Arc::new(Mutex::new(jobs_rx)),
        replies,
        poll_interval,
    };

    (transport, source)
}

#[derive(Clone)]
pub struct MemoryTransport {
    jobs: mpsc::UnboundedSender<Delivery>,
    replies: ReplySlots,
    reply_timeout: Duration,
}

#[async_trait]
impl JudgeTransport for MemoryTransport {
    async fn request(&self, job: &JudgeJob) -> Result<JudgeResult, TransportError> {
        let reply_to = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.replies.lock().await.insert(reply_to.clone(), tx);

        let delivery = Delivery {
            job: job.clone(),
            reply_to: reply_to.clone(),
            receipt: None,
        };
        if self.jobs.send(delivery).is_err() {
            self.replies.lock().await.remove(&reply_to);
            return Err(TransportError::Closed);
        }

        match tokio::time::timeout(self.reply_timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.replies.lock().await.remove(&reply_to);
                Err(TransportError::Timeout(self.reply_timeout))
            }
        }
    }
}

#[derive(Clone)]
pub struct MemoryJobSource {
    jobs: Arc<Mutex<mpsc::UnboundedReceiver<Delivery>>>,
    replies: ReplySlots,
    poll_interval: Duration,
}

#[async_trait]
impl JobSource for MemoryJobSource {
    async fn next_job(&mut self) -> Result<Delivery, TransportError> {
        let next = tokio::time::timeout(self.poll_interval, async {
            self.jobs.lock().await.recv().await
        })
        .await;

        match next {
            Ok(Some(delivery)) => Ok(delivery),
            Ok(None) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout(self.poll_interval)),
        }
    }

    async fn reply(
        &mut self,
        delivery: Delivery,
        result: &JudgeResult,
    ) -> Result<(), TransportError> {
        match self.replies.lock().await.remove(&delivery.reply_to) {
            Some(slot) => {
                if slot.send(result.clone()).is_err() {
                    debug!("Requester for {} is gone", delivery.reply_to);
                }
            }
            None => debug!(
                "No one waiting on {} (submission_id={})",
                delivery.reply_to, delivery.job.submission_id
            ),
        }
        Ok(())
    }
}
