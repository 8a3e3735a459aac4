//! claude-usage-exporter - claude.ai quota utilization as Prometheus metrics
//!
//! This library polls the usage endpoint for each configured account on an
//! adaptive schedule and records what it sees through the `metrics` facade.

pub mod app;
pub mod cli;
pub mod config;
pub mod core;
pub mod fetcher;
pub mod internal_metrics;
pub mod scheduler;
pub mod task_manager;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export core types for convenience
pub use core::*;
