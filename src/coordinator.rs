//! Judge coordinator
//!
//! Turns a stored submission into a judge job, waits for a worker's result
//! and folds the score into submission finality and contest standings.
//!
//! A failing step aborts `dispatch` without retry or rollback; the submission
//! simply stays `Unprocessed` until someone dispatches it again.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::config::{StorageConfig, TransportConfig};
use crate::core::{contest_score_delta, is_new_final, score};
use crate::error::{DispatchError, StoreError};
use crate::jobs::JudgeJob;
use crate::store::redis_results::RedisResultStore;
use crate::store::s3::StorageClient;
use crate::store::{
    submission_object_key, BlobStore, ContestStore, FinalityKey, JudgeResultStore, Judgement,
    MemoryStore, ProblemStore, SubmissionMetadata, SubmissionStatus, SubmissionStore,
    TestcaseStore,
};
use crate::transport::redis_stream::RedisTransport;
use crate::transport::JudgeTransport;

const SOURCE_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Store backends, picked once at startup
#[derive(Clone)]
pub struct Stores {
    pub blobs: Arc<dyn BlobStore>,
    pub submissions: Arc<dyn SubmissionStore>,
    pub testcases: Arc<dyn TestcaseStore>,
    pub results: Arc<dyn JudgeResultStore>,
    pub problems: Arc<dyn ProblemStore>,
    pub contests: Arc<dyn ContestStore>,
}

impl Stores {
    /// Every store served by one in-process backend
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            blobs: store.clone(),
            submissions: store.clone(),
            testcases: store.clone(),
            results: store.clone(),
            problems: store.clone(),
            contests: store,
        }
    }

    /// Source code on S3/MinIO and judge results in Redis.
    /// Submissions, testcases, problems and contests stay in `metadata`.
    pub fn with_shared_backends(
        storage: &StorageConfig,
        redis_url: &str,
        metadata: Arc<MemoryStore>,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            blobs: Arc::new(StorageClient::new(storage)),
            results: Arc::new(RedisResultStore::new(redis_url)?),
            ..Self::in_memory(metadata)
        })
    }
}

/// A submission as received from a user, before judging
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub id: i64,
    pub problem_id: i64,
    pub user_id: i64,
    pub contest_id: i64,
    pub file_name: String,
    pub language: String,
    pub public: bool,
    pub source_code: String,
}

/// What one successful dispatch did
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub submission_id: i64,
    pub judge_result_id: String,
    pub score: i32,
    pub previous_best_score: i32,
    pub is_final: bool,
    /// Applied to the contest standing, if any
    pub contest_delta: Option<i64>,
    /// Set when the worker reported an internal failure
    pub server_error: Option<String>,
}

pub struct Coordinator {
    stores: Stores,
    transport: Arc<dyn JudgeTransport>,
    finality_locks: KeyedLocks<FinalityKey>,
}

impl Coordinator {
    pub fn new(stores: Stores, transport: Arc<dyn JudgeTransport>) -> Self {
        Self {
            stores,
            transport,
            finality_locks: KeyedLocks::default(),
        }
    }

    /// Coordinator that sends jobs over the Redis bus to remote workers
    pub fn with_redis(
        transport: &TransportConfig,
        storage: &StorageConfig,
        metadata: Arc<MemoryStore>,
    ) -> anyhow::Result<Self> {
        let stores = Stores::with_shared_backends(storage, &transport.redis_url, metadata)?;
        let transport = RedisTransport::new(transport)?;
        info!("Coordinator using the Redis bus on {}", transport.topic());
        Ok(Self::new(stores, Arc::new(transport)))
    }

    /// Store a new submission's code and metadata, ready for `dispatch`
    pub async fn accept_submission(
        &self,
        submission: NewSubmission,
    ) -> Result<SubmissionMetadata, StoreError> {
        let key = submission_object_key(submission.user_id, submission.problem_id, submission.id);
        self.stores
            .blobs
            .upload(&key, submission.source_code.into_bytes(), SOURCE_CONTENT_TYPE)
            .await?;

        let metadata = SubmissionMetadata {
            id: submission.id,
            problem_id: submission.problem_id,
            user_id: submission.user_id,
            contest_id: submission.contest_id,
            file_name: submission.file_name,
            score: 0,
            judge_result_id: None,
            status: SubmissionStatus::Unprocessed,
            language: submission.language,
            is_final: false,
            public: submission.public,
            created_at: Utc::now(),
        };
        self.stores.submissions.insert(metadata.clone()).await?;

        info!(
            "Accepted submission_id={} (problem_id={}, user_id={}, contest_id={})",
            metadata.id, metadata.problem_id, metadata.user_id, metadata.contest_id
        );
        Ok(metadata)
    }

    /// Judge one submission end to end.
    ///
    /// `contest_id` 0 means the submission counts for no contest.
    pub async fn dispatch(
        &self,
        submission_id: i64,
        contest_id: i64,
    ) -> Result<DispatchReport, DispatchError> {
        let submission = self
            .stores
            .submissions
            .get(submission_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("submission {}", submission_id)))?;

        if submission.contest_id != contest_id {
            warn!(
                "submission_id={} is stored with contest_id={} but dispatched for contest_id={}",
                submission_id, submission.contest_id, contest_id
            );
        }

        let object_key =
            submission_object_key(submission.user_id, submission.problem_id, submission.id);
        let source = self.stores.blobs.download(&object_key).await?;
        let testcases = self
            .stores
            .testcases
            .get_all_tests_of_problem(submission.problem_id)
            .await?;

        let job = JudgeJob {
            submission_id,
            source_code: String::from_utf8_lossy(&source.bytes).into_owned(),
            testcases,
        };

        info!(
            "Dispatching submission_id={} with {} testcases",
            submission_id,
            job.testcases.len()
        );
        let result = self.transport.request(&job).await?;

        if let Some(e) = &result.server_error {
            warn!("Worker reported an error for submission_id={}: {}", submission_id, e);
        }

        let judge_result_id = self.stores.results.insert(&result).await?;
        let current_score = score(result.verdicts());

        let key = FinalityKey {
            problem_id: submission.problem_id,
            user_id: submission.user_id,
            contest_id,
        };

        // Read previous best, commit, and apply the delta as one unit per key
        let _guard = self.finality_locks.lock(key).await;

        let previous_final = self.stores.submissions.get_final_submission(&key).await?;
        // Score the standing currently reflects
        let previous_best_score = previous_final.as_ref().map(|s| s.score).unwrap_or(0);

        // A re-judged final submission competes with its best sibling, not with itself
        let runner_up = match &previous_final {
            Some(prev) if prev.id == submission_id => {
                self.stores
                    .submissions
                    .get_best_submission(&key, submission_id)
                    .await?
            }
            _ => None,
        };
        let competing_score = match (&previous_final, &runner_up) {
            (Some(prev), _) if prev.id != submission_id => prev.score,
            (_, Some(best)) => best.score,
            _ => 0,
        };

        let is_final = is_new_final(competing_score, current_score);
        let (final_submission_id, new_best_score) = if is_final {
            (Some(submission_id), Some(current_score))
        } else {
            match &runner_up {
                Some(best) => (Some(best.id), Some(best.score)),
                None => (None, None),
            }
        };

        debug!(
            "submission_id={}: score={}, competing={}, previous_best={}, final={:?}",
            submission_id, current_score, competing_score, previous_best_score, final_submission_id
        );

        let judgement = Judgement {
            score: current_score,
            judge_result_id: judge_result_id.clone(),
            final_submission_id,
        };
        self.stores
            .submissions
            .commit_judgement(submission_id, &key, &judgement)
            .await?;

        // Counted on every judged attempt, correct or not
        self.stores
            .problems
            .increment_solve_count(submission.problem_id)
            .await?;

        let contest_delta = match new_best_score {
            Some(best) if contest_id != 0 => {
                let delta = contest_score_delta(best, previous_best_score);
                self.stores
                    .contests
                    .add_user_score_delta(contest_id, submission.user_id, delta)
                    .await?;
                Some(delta)
            }
            _ => None,
        };

        info!(
            "Dispatch completed: submission_id={}, score={}, final={}, contest_delta={:?}",
            submission_id, current_score, is_final, contest_delta
        );

        Ok(DispatchReport {
            submission_id,
            judge_result_id,
            score: current_score,
            previous_best_score,
            is_final,
            contest_delta,
            server_error: result.server_error,
        })
    }
}

/// One async mutex per key, created on demand
struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash> KeyedLocks<K> {
    async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Entries nobody holds or waits on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(key).or_default().clone()
        };
        lock.lock_owned().await
    }
}
