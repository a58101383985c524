//! Judging pipeline: a coordinator that dispatches submissions over a job
//! bus, workers that execute them against testcases, and the scoring and
//! finality rules applied to the results.

pub mod config;
pub mod coordinator;
pub mod core;
pub mod error;
pub mod jobs;
pub mod runner;
pub mod store;
pub mod transport;
pub mod worker;
