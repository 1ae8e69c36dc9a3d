//! Metrics collection using HdrHistogram for accurate percentile calculations.

use hdrhistogram::Histogram;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use sysinfo::System;

use crate::error::{BenchError, ErrorKind};

/// Upper latency bound: 10 minutes in microseconds
const MAX_LATENCY_US: u64 = 600_000_000;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Thread-safe metrics collector for one benchmark
pub struct MetricsCollector {
    /// Iteration latency (microseconds), successful iterations only
    latency_histogram: Mutex<Histogram<u64>>,
    success_count: AtomicU64,
    /// Iterations that returned a service error
    operation_errors: AtomicU64,
    /// Iterations whose bounded wait elapsed
    timeouts: AtomicU64,
    /// Workers whose benchmark setup failed
    setup_failures: AtomicU64,
    /// Workers stopped early by a fatal error
    aborted_workers: AtomicU64,
    /// Items processed by successful iterations (entries scanned, etc.)
    items: AtomicU64,
    cpu_samples: Mutex<Vec<f32>>,
    memory_samples: Mutex<Vec<u64>>,
    start_time: Mutex<Option<Instant>>,
    end_time: Mutex<Option<Instant>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        // 3 significant figures
        let histogram = Histogram::new_with_bounds(1, MAX_LATENCY_US, 3)
            .expect("latency histogram bounds are valid");
        Self {
            latency_histogram: Mutex::new(histogram),
            success_count: AtomicU64::new(0),
            operation_errors: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            setup_failures: AtomicU64::new(0),
            aborted_workers: AtomicU64::new(0),
            items: AtomicU64::new(0),
            cpu_samples: Mutex::new(Vec::new()),
            memory_samples: Mutex::new(Vec::new()),
            start_time: Mutex::new(None),
            end_time: Mutex::new(None),
        }
    }

    /// Mark the start of the benchmark
    pub fn start(&self) {
        *lock(&self.start_time) = Some(Instant::now());
    }

    /// Mark the end of the benchmark
    pub fn stop(&self) {
        *lock(&self.end_time) = Some(Instant::now());
    }

    /// Record a successful iteration
    pub fn record_success(&self, latency: Duration, items: u64) {
        let latency_us = (latency.as_micros() as u64).clamp(1, MAX_LATENCY_US);
        let _ = lock(&self.latency_histogram).record(latency_us);
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.items.fetch_add(items, Ordering::Relaxed);
    }

    /// Record a failed iteration by its error kind
    pub fn record_error(&self, error: &BenchError) {
        match error.kind() {
            ErrorKind::Timeout => self.timeouts.fetch_add(1, Ordering::Relaxed),
            _ => self.operation_errors.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_setup_failure(&self) {
        self.setup_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abort(&self) {
        self.aborted_workers.fetch_add(1, Ordering::Relaxed);
    }

    /// Take one CPU and memory sample
    pub fn sample_resources(&self, system: &mut System) {
        system.refresh_cpu_usage();
        system.refresh_memory();
        lock(&self.cpu_samples).push(system.global_cpu_usage());
        lock(&self.memory_samples).push(system.used_memory());
    }

    pub fn success_count(&self) -> u64 {
        self.success_count.load(Ordering::Relaxed)
    }

    /// Failed iterations of any kind
    pub fn error_count(&self) -> u64 {
        self.operation_errors.load(Ordering::Relaxed) + self.timeouts.load(Ordering::Relaxed)
    }

    pub fn timeout_count(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn setup_failures(&self) -> u64 {
        self.setup_failures.load(Ordering::Relaxed)
    }

    pub fn aborted_workers(&self) -> u64 {
        self.aborted_workers.load(Ordering::Relaxed)
    }

    pub fn items(&self) -> u64 {
        self.items.load(Ordering::Relaxed)
    }

    pub fn total_iterations(&self) -> u64 {
        self.success_count() + self.error_count()
    }

    /// Get the success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.total_iterations();
        if total == 0 {
            return 100.0;
        }
        (self.success_count() as f64 / total as f64) * 100.0
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        let start = *lock(&self.start_time);
        let end = *lock(&self.end_time);
        match (start, end) {
            (Some(s), Some(e)) => e.duration_since(s),
            (Some(s), None) => s.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// Successful iterations per second
    pub fn ops_per_second(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.success_count() as f64 / elapsed
    }

    /// Get latency percentile in milliseconds
    pub fn latency_percentile(&self, percentile: f64) -> f64 {
        lock(&self.latency_histogram).value_at_percentile(percentile) as f64 / 1000.0
    }

    /// Mean latency in milliseconds
    pub fn latency_mean(&self) -> f64 {
        lock(&self.latency_histogram).mean() / 1000.0
    }

    /// Create a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (avg_cpu, max_cpu) = {
            let samples = lock(&self.cpu_samples);
            let max = samples.iter().copied().fold(0.0f32, f32::max);
            let avg = if samples.is_empty() {
                0.0
            } else {
                samples.iter().sum::<f32>() / samples.len() as f32
            };
            (avg, max)
        };
        let (avg_memory_mb, max_memory_mb) = {
            let samples = lock(&self.memory_samples);
            let to_mb = |bytes: u64| bytes as f64 / (1024.0 * 1024.0);
            let max = samples.iter().copied().max().map(to_mb).unwrap_or(0.0);
            let avg = if samples.is_empty() {
                0.0
            } else {
                samples.iter().map(|b| to_mb(*b)).sum::<f64>() / samples.len() as f64
            };
            (avg, max)
        };

        MetricsSnapshot {
            success_count: self.success_count(),
            error_count: self.error_count(),
            timeout_count: self.timeout_count(),
            setup_failures: self.setup_failures(),
            aborted_workers: self.aborted_workers(),
            items: self.items(),
            success_rate: self.success_rate(),
            ops_per_second: self.ops_per_second(),
            latency_mean: self.latency_mean(),
            latency_p50: self.latency_percentile(50.0),
            latency_p95: self.latency_percentile(95.0),
            latency_p99: self.latency_percentile(99.0),
            latency_max: self.latency_percentile(100.0),
            elapsed_secs: self.elapsed().as_secs_f64(),
            avg_cpu,
            max_cpu,
            avg_memory_mb,
            max_memory_mb,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of metrics at a point in time
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub success_count: u64,
    pub error_count: u64,
    pub timeout_count: u64,
    pub setup_failures: u64,
    pub aborted_workers: u64,
    pub items: u64,
    pub success_rate: f64,
    pub ops_per_second: f64,
    pub latency_mean: f64,
    pub latency_p50: f64,
    pub latency_p95: f64,
    pub latency_p99: f64,
    pub latency_max: f64,
    pub elapsed_secs: f64,
    pub avg_cpu: f32,
    pub max_cpu: f32,
    pub avg_memory_mb: f64,
    pub max_memory_mb: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MapError;

    #[test]
    fn test_metrics_collector() {
        let collector = MetricsCollector::new();
        collector.start();

        collector.record_success(Duration::from_millis(100), 1);
        collector.record_success(Duration::from_millis(150), 1);
        collector.record_success(Duration::from_millis(200), 40);

        collector.record_error(&BenchError::Operation(MapError::KeyNotFound("k".to_string())));
        collector.record_error(&BenchError::EventTimeout);

        collector.stop();

        assert_eq!(collector.success_count(), 3);
        assert_eq!(collector.error_count(), 2);
        assert_eq!(collector.timeout_count(), 1);
        assert_eq!(collector.total_iterations(), 5);
        assert_eq!(collector.items(), 42);
        assert!((collector.success_rate() - 60.0).abs() < 0.01);

        let p50 = collector.latency_percentile(50.0);
        assert!((p50 - 150.0).abs() < 1.0);
    }

    #[test]
    fn test_setup_failures_are_not_iterations() {
        let collector = MetricsCollector::new();
        collector.record_setup_failure();
        collector.record_abort();

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.setup_failures, 1);
        assert_eq!(snapshot.aborted_workers, 1);
        assert_eq!(snapshot.error_count, 0);
        assert_eq!(snapshot.success_rate, 100.0);
    }

    #[test]
    fn test_resource_samples() {
        let collector = MetricsCollector::new();
        let mut system = System::new();
        collector.sample_resources(&mut system);
        collector.sample_resources(&mut system);

        let snapshot = collector.snapshot();
        assert!(snapshot.max_cpu >= snapshot.avg_cpu);
        assert!(snapshot.max_memory_mb >= snapshot.avg_memory_mb);
    }
}
