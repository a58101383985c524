pub mod languages;
pub mod scoring;
pub mod verdict;

pub use scoring::{contest_score_delta, is_new_final, score};
pub use verdict::Verdict;
