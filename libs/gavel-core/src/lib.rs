//! Judging engine for competitive programming workflows: compile solutions
//! and companion programs through a content-addressed cache, run them under
//! time and memory limits with two-grained cancellation, interpret raw
//! process results into verdicts, compare outputs with tiered whitespace
//! tolerance, and hunt counterexamples with a generator / brute-force loop.

pub mod cache;
pub mod cancel;
pub mod compare;
pub mod compiler;
pub mod config;
pub mod error;
pub mod exec;
pub mod interpret;
pub mod langs;
pub mod outcome;
pub mod runner;
pub mod session;
mod stress;
pub mod types;
pub mod verdict;


pub use error::{Error, Result};
