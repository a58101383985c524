//! Wire messages exchanged between the coordinator and workers.
//!
//! Field names follow the bus contract shared with independently deployed
//! workers, so they are renamed explicitly rather than derived.

pub mod judger;

use serde::{Deserialize, Serialize};

use crate::core::Verdict;

/// One (input, expected output) pair of a problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Testcase {
    pub id: i64,
    #[serde(rename = "problemID")]
    pub problem_id: i64,
    pub input: String,
    #[serde(rename = "expectedOutput")]
    pub expected_output: String,
}

/// Job sent to a worker: the code plus every testcase, in judging order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeJob {
    #[serde(rename = "submissionID")]
    pub submission_id: i64,
    #[serde(rename = "sourceCode")]
    pub source_code: String,
    pub testcases: Vec<Testcase>,
}

/// Outcome of one testcase. Index-aligned with `JudgeJob::testcases`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    #[serde(rename = "testcaseID")]
    pub testcase_id: i64,
    #[serde(rename = "submissionID")]
    pub submission_id: i64,
    #[serde(rename = "runnerStdout")]
    pub runner_stdout: String,
    #[serde(rename = "runnerStderr")]
    pub runner_stderr: String,
    pub verdict: Verdict,
}

/// Reply to a `JudgeJob`, persisted as-is as a judge-run document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JudgeResult {
    #[serde(rename = "serverError")]
    pub server_error: Option<String>,
    #[serde(rename = "testOutcomes")]
    pub test_outcomes: Vec<TestOutcome>,
}

impl JudgeResult {
    /// Result for a job the worker could not process at all
    pub fn server_error(message: impl Into<String>) -> Self {
        Self {
            server_error: Some(message.into()),
            test_outcomes: vec![],
        }
    }

    pub fn verdicts(&self) -> impl Iterator<Item = Verdict> + '_ {
        self.test_outcomes.iter().map(|o| o.verdict)
    }
}
