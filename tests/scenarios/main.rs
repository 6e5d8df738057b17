//! Scenario-based tests for jobflow


mod cache_restore;
mod cancellation;
mod concurrency;
mod conditions;
mod fail_fast;
mod failure_handling;
mod matrix;
mod post_run;
mod success_chain;
