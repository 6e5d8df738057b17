//! Core domain models for jobflow
//!
//! This module defines the fundamental data structures that represent
//! pipelines, jobs, matrix instances and their configuration.

pub mod cache_key;
pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod job;
pub mod matrix;
pub mod pipeline;
pub mod state;

pub use cache_key::{CacheKeyChain, CacheKeyContext, CacheKeySpec};
pub use condition::{Condition, Eligibility};
pub use context::*;
pub use error::*;
pub use graph::JobGraph;
pub use job::*;
pub use matrix::{Expansion, MatrixSpec};
pub use pipeline::*;
pub use state::*;
