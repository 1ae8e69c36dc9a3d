//! Benchmark execution for the map service.
//!
//! This module provides:
//! - Benchmark and workload configuration
//! - A runner that drives every worker through each benchmark
//! - HdrHistogram-based metrics collection
//! - Report generation

pub mod config;
pub mod metrics;
pub mod report;
pub mod runner;

pub use config::{BenchmarkConfig, BenchmarkKind, ServerConfig, WorkloadConfig};
pub use metrics::MetricsCollector;
pub use report::BenchmarkReport;
pub use runner::BenchmarkRunner;
