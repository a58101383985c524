//! Judger module for processing submission judge jobs
//!
//! Runs every testcase of a job in order, one at a time, and classifies each
//! run. A failure on one testcase never stops the remaining ones.

use tracing::{debug, info, warn};

use super::{JudgeJob, JudgeResult, TestOutcome};
use crate::core::{score, Verdict};
use crate::runner::{RunLimits, Runner};

/// Process a judge job. Always yields a result so the worker can reply.
pub async fn process_judge_job(
    runner: &dyn Runner,
    limits: &RunLimits,
    job: &JudgeJob,
) -> JudgeResult {
    let mut test_outcomes = Vec::with_capacity(job.testcases.len());
    let mut failures = Vec::new();

    for tc in &job.testcases {
        let outcome = match runner
            .run_one_test(limits, &job.source_code, tc.input.as_bytes())
            .await
        {
            Ok(run) => {
                let runner_stdout = run.stdout_lossy();
                let verdict = classify(run.verdict, &runner_stdout, &tc.expected_output);
                TestOutcome {
                    testcase_id: tc.id,
                    submission_id: job.submission_id,
                    runner_stdout,
                    runner_stderr: run.stderr_lossy(),
                    verdict,
                }
            }
            Err(e) => {
                warn!(
                    "Execution failed: submission_id={}, testcase_id={}: {}",
                    job.submission_id, tc.id, e
                );
                failures.push(format!("testcase {}: {}", tc.id, e));
                TestOutcome {
                    testcase_id: tc.id,
                    submission_id: job.submission_id,
                    runner_stdout: String::new(),
                    runner_stderr: String::new(),
                    verdict: Verdict::Unknown,
                }
            }
        };

        debug!(
            "submission_id={}, testcase_id={}, verdict={}",
            job.submission_id, tc.id, outcome.verdict
        );
        test_outcomes.push(outcome);
    }

    let server_error = (!failures.is_empty()).then(|| failures.join("; "));

    info!(
        "Job summary: submission_id={}, testcases={}, score={}, failures={}",
        job.submission_id,
        test_outcomes.len(),
        score(test_outcomes.iter().map(|o| o.verdict)),
        failures.len()
    );

    JudgeResult {
        server_error,
        test_outcomes,
    }
}

/// Final verdict of a run. Only a clean exit is checked against the answer.
pub fn classify(run_verdict: Verdict, stdout: &str, expected: &str) -> Verdict {
    match run_verdict {
        Verdict::Ok if compare_output(stdout, expected) => Verdict::Ok,
        Verdict::Ok => Verdict::Wrong,
        other => other,
    }
}

/// Compare program output with expected output.
///
/// Leading and trailing whitespace is ignored; everything in between must match exactly.
pub fn compare_output(actual: &str, expected: &str) -> bool {
    actual.trim() == expected.trim()
}
