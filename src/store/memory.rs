//! In-process backend for every store trait
//!
//! All state sits behind one lock, which makes `commit_judgement` atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    BlobObject, BlobStore, ContestStore, ContestUserStanding, FinalityKey, JudgeResultStore,
    Judgement, ProblemStore, SubmissionMetadata, SubmissionStatus, SubmissionStore, TestcaseStore,
};
use crate::error::StoreError;
use crate::jobs::{JudgeResult, Testcase};

#[derive(Default)]
struct State {
    blobs: HashMap<String, BlobObject>,
    submissions: HashMap<i64, SubmissionMetadata>,
    testcases: Vec<Testcase>,
    results: HashMap<String, JudgeResult>,
    solve_counts: HashMap<i64, u64>,
    standings: HashMap<(i64, i64), i64>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_testcase(&self, testcase: Testcase) {
        self.state.lock().await.testcases.push(testcase);
    }

    pub async fn submission(&self, id: i64) -> Option<SubmissionMetadata> {
        self.state.lock().await.submissions.get(&id).cloned()
    }

    pub async fn result(&self, id: &str) -> Option<JudgeResult> {
        self.state.lock().await.results.get(id).cloned()
    }

    pub async fn solve_count(&self, problem_id: i64) -> u64 {
        self.state
            .lock()
            .await
            .solve_counts
            .get(&problem_id)
            .copied()
            .unwrap_or(0)
    }

    pub async fn standing(&self, contest_id: i64, user_id: i64) -> Option<ContestUserStanding> {
        self.state
            .lock()
            .await
            .standings
            .get(&(contest_id, user_id))
            .map(|&score| ContestUserStanding {
                contest_id,
                user_id,
                score,
            })
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let object = BlobObject {
            bytes,
            content_type: content_type.to_string(),
        };
        self.state.lock().await.blobs.insert(key.to_string(), object);
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<BlobObject, StoreError> {
        self.state
            .lock()
            .await
            .blobs
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("object {}", key)))
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn insert(&self, submission: SubmissionMetadata) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .submissions
            .insert(submission.id, submission);
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<SubmissionMetadata>, StoreError> {
        Ok(self.submission(id).await)
    }

    async fn get_final_submission(
        &self,
        key: &FinalityKey,
    ) -> Result<Option<SubmissionMetadata>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .submissions
            .values()
            .find(|s| s.is_final && s.finality_key() == *key)
            .cloned())
    }

    async fn get_best_submission(
        &self,
        key: &FinalityKey,
        excluding: i64,
    ) -> Result<Option<SubmissionMetadata>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .submissions
            .values()
            .filter(|s| {
                s.id != excluding
                    && s.status == SubmissionStatus::Processed
                    && s.finality_key() == *key
            })
            .max_by_key(|s| (s.score, s.created_at, s.id))
            .cloned())
    }

    async fn commit_judgement(
        &self,
        id: i64,
        key: &FinalityKey,
        judgement: &Judgement,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;

        if let Some(final_id) = judgement.final_submission_id {
            if !state.submissions.contains_key(&final_id) {
                return Err(StoreError::NotFound(format!("submission {}", final_id)));
            }
        }

        let submission = state
            .submissions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("submission {}", id)))?;
        submission.status = SubmissionStatus::Processed;
        submission.score = judgement.score;
        submission.judge_result_id = Some(judgement.judge_result_id.clone());

        if let Some(final_id) = judgement.final_submission_id {
            for other in state.submissions.values_mut() {
                if other.finality_key() == *key || other.id == final_id {
                    other.is_final = other.id == final_id;
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl TestcaseStore for MemoryStore {
    async fn get_all_tests_of_problem(
        &self,
        problem_id: i64,
    ) -> Result<Vec<Testcase>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .testcases
            .iter()
            .filter(|tc| tc.problem_id == problem_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl JudgeResultStore for MemoryStore {
    async fn insert(&self, result: &JudgeResult) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        self.state
            .lock()
            .await
            .results
            .insert(id.clone(), result.clone());
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<JudgeResult>, StoreError> {
        Ok(self.result(id).await)
    }
}

#[async_trait]
impl ProblemStore for MemoryStore {
    async fn increment_solve_count(&self, problem_id: i64) -> Result<(), StoreError> {
        *self
            .state
            .lock()
            .await
            .solve_counts
            .entry(problem_id)
            .or_insert(0) += 1;
        Ok(())
    }
}

#[async_trait]
impl ContestStore for MemoryStore {
    async fn add_user_score_delta(
        &self,
        contest_id: i64,
        user_id: i64,
        delta: i64,
    ) -> Result<(), StoreError> {
        *self
            .state
            .lock()
            .await
            .standings
            .entry((contest_id, user_id))
            .or_insert(0) += delta;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn submission(id: i64, is_final: bool) -> SubmissionMetadata {
        SubmissionMetadata {
            id,
            problem_id: 1,
            user_id: 2,
            contest_id: 3,
            file_name: "main.py".into(),
            score: 0,
            judge_result_id: None,
            status: SubmissionStatus::Unprocessed,
            language: "python".into(),
            is_final,
            public: false,
            created_at: Utc::now(),
        }
    }

    fn judgement(score: i32, final_submission_id: Option<i64>) -> Judgement {
        Judgement {
            score,
            judge_result_id: "r".into(),
            final_submission_id,
        }
    }

    #[tokio::test]
    async fn test_commit_final_unmarks_siblings_only() {
        let store = MemoryStore::new();
        SubmissionStore::insert(&store, submission(1, true)).await.unwrap();
        SubmissionStore::insert(&store, submission(2, false)).await.unwrap();
        let mut other_problem = submission(3, true);
        other_problem.problem_id = 9;
        SubmissionStore::insert(&store, other_problem).await.unwrap();

        let key = submission(2, false).finality_key();
        store.commit_judgement(2, &key, &judgement(80, Some(2))).await.unwrap();

        assert!(!store.submission(1).await.unwrap().is_final);
        assert!(store.submission(3).await.unwrap().is_final);

        let committed = store.submission(2).await.unwrap();
        assert!(committed.is_final);
        assert_eq!(committed.score, 80);
        assert_eq!(committed.status, SubmissionStatus::Processed);
        assert_eq!(committed.judge_result_id.as_deref(), Some("r"));

        let current = store.get_final_submission(&key).await.unwrap().unwrap();
        assert_eq!(current.id, 2);
    }

    #[tokio::test]
    async fn test_commit_non_final_leaves_siblings() {
        let store = MemoryStore::new();
        SubmissionStore::insert(&store, submission(1, true)).await.unwrap();
        SubmissionStore::insert(&store, submission(2, false)).await.unwrap();

        let key = submission(2, false).finality_key();
        store.commit_judgement(2, &key, &judgement(10, None)).await.unwrap();

        assert!(store.submission(1).await.unwrap().is_final);
        assert!(!store.submission(2).await.unwrap().is_final);
    }

    #[tokio::test]
    async fn test_commit_unknown_submission() {
        let store = MemoryStore::new();
        let key = submission(1, false).finality_key();
        let err = store
            .commit_judgement(1, &key, &judgement(10, Some(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_commit_can_promote_a_sibling() {
        let store = MemoryStore::new();
        SubmissionStore::insert(&store, submission(1, true)).await.unwrap();
        SubmissionStore::insert(&store, submission(2, false)).await.unwrap();

        let key = submission(1, false).finality_key();
        store.commit_judgement(1, &key, &judgement(0, Some(2))).await.unwrap();

        let rejudged = store.submission(1).await.unwrap();
        assert!(!rejudged.is_final);
        assert_eq!(rejudged.score, 0);
        assert!(store.submission(2).await.unwrap().is_final);

        let err = store
            .commit_judgement(1, &key, &judgement(0, Some(99)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_best_submission_skips_excluded_and_unprocessed() {
        let store = MemoryStore::new();
        let key = submission(1, false).finality_key();
        for (id, score) in [(1, 90), (2, 40), (3, 70)] {
            let mut s = submission(id, false);
            s.score = score;
            s.status = SubmissionStatus::Processed;
            SubmissionStore::insert(&store, s).await.unwrap();
        }
        let mut pending = submission(4, false);
        pending.score = 100;
        SubmissionStore::insert(&store, pending).await.unwrap();

        let best = store.get_best_submission(&key, 1).await.unwrap().unwrap();
        assert_eq!(best.id, 3);

        let mut other_user = key;
        other_user.user_id = 99;
        assert!(store.get_best_submission(&other_user, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_contest_deltas_accumulate() {
        let store = MemoryStore::new();
        store.add_user_score_delta(5, 6, 50).await.unwrap();
        store.add_user_score_delta(5, 6, 30).await.unwrap();
        store.add_user_score_delta(5, 6, -10).await.unwrap();

        assert_eq!(store.standing(5, 6).await.unwrap().score, 70);
        assert!(store.standing(5, 7).await.is_none());
    }

    #[tokio::test]
    async fn test_blob_roundtrip_keeps_content_type() {
        let store = MemoryStore::new();
        store
            .upload("k", b"print(1)".to_vec(), "text/x-python")
            .await
            .unwrap();

        let object = store.download("k").await.unwrap();
        assert_eq!(object.content_type, "text/x-python");
        assert!(matches!(
            store.download("missing").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_testcases_filtered_in_order() {
        let store = MemoryStore::new();
        for (id, problem_id) in [(3, 1), (1, 2), (2, 1)] {
            store
                .add_testcase(Testcase {
                    id,
                    problem_id,
                    input: String::new(),
                    expected_output: String::new(),
                })
                .await;
        }

        let ids: Vec<i64> = store
            .get_all_tests_of_problem(1)
            .await
            .unwrap()
            .iter()
            .map(|tc| tc.id)
            .collect();
        assert_eq!(ids, vec![3, 2]);
    }
}
