//! Benchmark runner: drives every worker through each benchmark.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use tokio::time::Instant;

use super::config::BenchmarkKind;
use super::metrics::{MetricsCollector, MetricsSnapshot};
use super::report::BenchmarkReport;
use crate::error::{BenchError, Result};
use crate::suite::{MapBenchmarkSuite, Worker};

/// How long resource sampling waits between samples
const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Per-worker loop bounds
#[derive(Debug, Clone, Copy)]
struct Limits {
    duration: Duration,
    iterations: Option<u64>,
    warmup: u64,
}

impl Limits {
    fn done(&self, completed: u64, deadline: Instant) -> bool {
        if let Some(max) = self.iterations {
            if completed >= max {
                return true;
            }
        }
        !self.duration.is_zero() && Instant::now() >= deadline
    }
}

/// Runs the configured benchmarks of a suite
pub struct BenchmarkRunner {
    suite: MapBenchmarkSuite,
}

impl BenchmarkRunner {
    pub fn new(suite: MapBenchmarkSuite) -> Self {
        Self { suite }
    }

    /// Provision, then run each benchmark across all workers.
    ///
    /// Only an invalid configuration or a provisioning failure is returned as
    /// an error; everything after that is reported per benchmark.
    pub async fn run(&self) -> Result<BenchmarkReport> {
        let config = self.suite.config();
        let started_at = Utc::now();

        config.validate().map_err(BenchError::Config)?;
        self.suite.setup_suite().await?;

        let mut workers = (0..config.workers)
            .map(|id| self.suite.setup_worker(id))
            .collect::<Result<Vec<Worker>>>()?;

        let mut results = Vec::new();
        for &kind in &config.benchmarks {
            println!("\nRunning {} with {} worker(s)...", kind, workers.len());
            let (snapshot, returned) = self.run_benchmark(kind, workers).await;
            workers = returned;
            println!(
                "  ops/s: {:.1}, p50: {:.2}ms, p99: {:.2}ms, success: {:.1}%, timeouts: {}",
                snapshot.ops_per_second,
                snapshot.latency_p50,
                snapshot.latency_p99,
                snapshot.success_rate,
                snapshot.timeout_count
            );
            results.push((kind, snapshot));
        }

        Ok(BenchmarkReport::from_results(config, started_at, results))
    }

    /// Run one benchmark on every worker in parallel and hand the workers back
    pub async fn run_benchmark(
        &self,
        kind: BenchmarkKind,
        workers: Vec<Worker>,
    ) -> (MetricsSnapshot, Vec<Worker>) {
        let config = self.suite.config();
        let limits = Limits {
            duration: config.duration(),
            iterations: config.iterations,
            warmup: config.warmup_iterations,
        };
        let metrics = Arc::new(MetricsCollector::new());

        let sampler = {
            let metrics = metrics.clone();
            tokio::spawn(async move {
                let mut system = System::new();
                let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
                loop {
                    ticker.tick().await;
                    metrics.sample_resources(&mut system);
                }
            })
        };

        let worker_count = workers.len();
        metrics.start();
        let handles: Vec<_> = workers
            .into_iter()
            .map(|worker| tokio::spawn(drive_worker(worker, kind, limits, metrics.clone())))
            .collect();

        let mut returned = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(worker) => returned.push(worker),
                Err(e) => {
                    tracing::error!(
                        benchmark = %kind,
                        error = %e,
                        "Worker task failed, worker removed from the pool"
                    );
                    metrics.record_abort();
                }
            }
        }
        if returned.len() < worker_count {
            tracing::warn!(
                benchmark = %kind,
                workers = returned.len(),
                lost = worker_count - returned.len(),
                "Continuing with a reduced worker pool"
            );
        }
        metrics.stop();
        sampler.abort();

        (metrics.snapshot(), returned)
    }
}

/// Take one worker through setup, warmup, measured iterations and teardown
async fn drive_worker(
    mut worker: Worker,
    kind: BenchmarkKind,
    limits: Limits,
    metrics: Arc<MetricsCollector>,
) -> Worker {
    if let Err(e) = worker.setup(kind).await {
        tracing::warn!(
            worker = worker.id(),
            benchmark = %kind,
            error = %e,
            "Benchmark setup failed"
        );
        metrics.record_setup_failure();
        worker.teardown(kind).await;
        return worker;
    }

    for _ in 0..limits.warmup {
        if let Err(e) = worker.run_iteration(kind).await {
            if e.is_fatal() {
                tracing::warn!(
                    worker = worker.id(),
                    benchmark = %kind,
                    error = %e,
                    "Worker aborted during warmup"
                );
                metrics.record_abort();
                worker.teardown(kind).await;
                return worker;
            }
        }
    }

    let deadline = Instant::now() + limits.duration;
    let mut completed = 0u64;
    while !limits.done(completed, deadline) {
        let start = Instant::now();
        match worker.run_iteration(kind).await {
            Ok(items) => metrics.record_success(start.elapsed(), items),
            Err(e) if e.is_fatal() => {
                tracing::warn!(
                    worker = worker.id(),
                    benchmark = %kind,
                    error = %e,
                    "Worker aborted"
                );
                metrics.record_abort();
                break;
            }
            Err(e) => {
                tracing::debug!(
                    worker = worker.id(),
                    benchmark = %kind,
                    error = %e,
                    "Iteration failed"
                );
                metrics.record_error(&e);
            }
        }
        completed += 1;
    }

    worker.teardown(kind).await;
    tracing::debug!(
        worker = worker.id(),
        benchmark = %kind,
        iterations = completed,
        "Worker finished"
    );
    worker
}
