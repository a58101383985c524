//! External collaborators of the coordinator
//!
//! One trait per entity; the backend for each is chosen once at startup.
//! Backends:
//! - `s3`: blob store on S3/MinIO
//! - `redis_results`: judge-result documents in Redis
//! - `memory`: every trait, in-process (embedded deployment, tests)

pub mod memory;
pub mod redis_results;
pub mod s3;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::jobs::{JudgeResult, Testcase};

pub use memory::MemoryStore;

/// Object key of a submission's source code
pub fn submission_object_key(user_id: i64, problem_id: i64, submission_id: i64) -> String {
    format!("submissions/{}/{}/{}", user_id, problem_id, submission_id)
}

/// Stored object with its content type
#[derive(Debug, Clone, PartialEq)]
pub struct BlobObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    #[default]
    Unprocessed,
    Processing,
    Processed,
}

/// Submission row as kept by the metadata store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionMetadata {
    pub id: i64,
    pub problem_id: i64,
    pub user_id: i64,
    /// 0 when the submission is not part of a contest
    pub contest_id: i64,
    pub file_name: String,
    /// 0..=100
    pub score: i32,
    pub judge_result_id: Option<String>,
    pub status: SubmissionStatus,
    pub language: String,
    pub is_final: bool,
    pub public: bool,
    pub created_at: DateTime<Utc>,
}

impl SubmissionMetadata {
    pub fn finality_key(&self) -> FinalityKey {
        FinalityKey {
            problem_id: self.problem_id,
            user_id: self.user_id,
            contest_id: self.contest_id,
        }
    }
}

/// Submissions sharing a key compete for being the final one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FinalityKey {
    pub problem_id: i64,
    pub user_id: i64,
    pub contest_id: i64,
}

/// What one judge cycle writes
#[derive(Debug, Clone, PartialEq)]
pub struct Judgement {
    pub score: i32,
    pub judge_result_id: String,
    /// Submission that is final for the key afterwards; `None` leaves finality as it is
    pub final_submission_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContestUserStanding {
    pub contest_id: i64,
    pub user_id: i64,
    pub score: i64,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError>;

    async fn download(&self, key: &str) -> Result<BlobObject, StoreError>;
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn insert(&self, submission: SubmissionMetadata) -> Result<(), StoreError>;

    async fn get(&self, id: i64) -> Result<Option<SubmissionMetadata>, StoreError>;

    /// The submission currently marked final for `key`, if any
    async fn get_final_submission(
        &self,
        key: &FinalityKey,
    ) -> Result<Option<SubmissionMetadata>, StoreError>;

    /// Best processed submission under `key` other than `excluding`.
    ///
    /// Ties go to the most recently created one.
    async fn get_best_submission(
        &self,
        key: &FinalityKey,
        excluding: i64,
    ) -> Result<Option<SubmissionMetadata>, StoreError>;

    /// Record a judgement as one atomic write.
    ///
    /// Submission `id` becomes `Processed` with the given score and result id.
    /// When `judgement.final_submission_id` is set, that submission becomes the
    /// only final one under `key`. Fails with `NotFound` for an unknown id.
    async fn commit_judgement(
        &self,
        id: i64,
        key: &FinalityKey,
        judgement: &Judgement,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TestcaseStore: Send + Sync {
    /// Every testcase of a problem, in judging order
    async fn get_all_tests_of_problem(
        &self,
        problem_id: i64,
    ) -> Result<Vec<Testcase>, StoreError>;
}

#[async_trait]
pub trait JudgeResultStore: Send + Sync {
    /// Persist a result document and return its id
    async fn insert(&self, result: &JudgeResult) -> Result<String, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<JudgeResult>, StoreError>;
}

#[async_trait]
pub trait ProblemStore: Send + Sync {
    async fn increment_solve_count(&self, problem_id: i64) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ContestStore: Send + Sync {
    /// Add `delta` to the user's standing, creating it at 0 first if missing
    async fn add_user_score_delta(
        &self,
        contest_id: i64,
        user_id: i64,
        delta: i64,
    ) -> Result<(), StoreError>;
}
