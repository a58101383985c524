//! Submission scoring and finality rules.
//!
//! Pure functions, no I/O. The coordinator is the only caller that turns
//! their results into store writes.

use crate::core::verdict::Verdict;

/// Maximum score of a submission
pub const MAX_SCORE: i32 = 100;

/// Percentage of outcomes with verdict OK, floored. Empty input scores 0.
pub fn score<I>(verdicts: I) -> i32
where
    I: IntoIterator<Item = Verdict>,
{
    let (correct, total) = verdicts
        .into_iter()
        .fold((0i64, 0i64), |(correct, total), v| {
            (correct + i64::from(v.is_ok()), total + 1)
        });

    if total == 0 {
        return 0;
    }

    (i64::from(MAX_SCORE) * correct / total) as i32
}

/// Whether a freshly judged submission replaces the current final one.
///
/// Only a strictly better previous score keeps the old submission final;
/// ties go to the newer submission. "No previous submission" is passed as 0.
pub fn is_new_final(previous_best_score: i32, current_score: i32) -> bool {
    previous_best_score <= current_score
}

/// Change to apply to a contest standing when a submission becomes final.
pub fn contest_score_delta(current_score: i32, previous_best_score: i32) -> i64 {
    i64::from(current_score) - i64::from(previous_best_score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use Verdict::*;

    #[test]
    fn test_score_empty() {
        assert_eq!(score([]), 0);
    }

    #[test]
    fn test_score_floors() {
        assert_eq!(score([Ok, Wrong, Ok, Ok]), 75);
        assert_eq!(score([Ok, Ok, Wrong]), 66);
        assert_eq!(score([Ok, Wrong, Wrong]), 33);
    }

    #[test]
    fn test_score_extremes() {
        assert_eq!(score([Wrong, Wrong]), 0);
        assert_eq!(score([Ok]), 100);
        assert_eq!(score([TimeLimit, RuntimeError, Unknown]), 0);
    }

    #[test]
    fn test_is_new_final() {
        assert!(is_new_final(50, 50));
        assert!(!is_new_final(70, 50));
        assert!(is_new_final(0, 0));
        assert!(is_new_final(40, 66));
    }

    #[test]
    fn test_contest_score_delta() {
        assert_eq!(contest_score_delta(80, 50), 30);
        assert_eq!(contest_score_delta(66, 0), 66);
        assert_eq!(contest_score_delta(50, 50), 0);
    }
}
