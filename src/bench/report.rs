//! Report generation for benchmark results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::config::{BenchmarkConfig, BenchmarkKind, WorkloadConfig};
use super::metrics::MetricsSnapshot;

/// Complete run report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub host: String,
    pub workers: usize,
    pub workload: WorkloadConfig,
    /// Results per benchmark, in run order
    pub results: Vec<BenchmarkResult>,
}

/// Results for a single benchmark
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub benchmark: String,
    pub ops_per_second: f64,
    pub latency_mean_ms: f64,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    pub latency_max_ms: f64,
    pub success_rate: f64,
    pub iterations: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub setup_failures: u64,
    pub aborted_workers: u64,
    pub items: u64,
    pub elapsed_secs: f64,
    pub avg_cpu: f32,
    pub max_cpu: f32,
    pub avg_memory_mb: f64,
    pub max_memory_mb: f64,
}

impl BenchmarkResult {
    fn from_snapshot(kind: BenchmarkKind, snapshot: &MetricsSnapshot) -> Self {
        Self {
            benchmark: kind.name().to_string(),
            ops_per_second: snapshot.ops_per_second,
            latency_mean_ms: snapshot.latency_mean,
            latency_p50_ms: snapshot.latency_p50,
            latency_p95_ms: snapshot.latency_p95,
            latency_p99_ms: snapshot.latency_p99,
            latency_max_ms: snapshot.latency_max,
            success_rate: snapshot.success_rate,
            iterations: snapshot.success_count + snapshot.error_count,
            errors: snapshot.error_count,
            timeouts: snapshot.timeout_count,
            setup_failures: snapshot.setup_failures,
            aborted_workers: snapshot.aborted_workers,
            items: snapshot.items,
            elapsed_secs: snapshot.elapsed_secs,
            avg_cpu: snapshot.avg_cpu,
            max_cpu: snapshot.max_cpu,
            avg_memory_mb: snapshot.avg_memory_mb,
            max_memory_mb: snapshot.max_memory_mb,
        }
    }

    /// Whether any iteration or worker failed
    pub fn has_failures(&self) -> bool {
        self.errors > 0 || self.setup_failures > 0 || self.aborted_workers > 0
    }
}

impl BenchmarkReport {
    /// Create a report from per-benchmark results
    pub fn from_results(
        config: &BenchmarkConfig,
        started_at: DateTime<Utc>,
        results: Vec<(BenchmarkKind, MetricsSnapshot)>,
    ) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            run_id: Uuid::new_v4(),
            started_at,
            host,
            workers: config.workers,
            workload: config.workload.clone(),
            results: results
                .iter()
                .map(|(kind, snapshot)| BenchmarkResult::from_snapshot(*kind, snapshot))
                .collect(),
        }
    }

    pub fn has_failures(&self) -> bool {
        self.results.iter().any(BenchmarkResult::has_failures)
    }

    /// Print the report as an ASCII table
    pub fn print_table(&self) {
        println!();
        println!("╔══════════════════════════════════════════════════════════════════════════════════════════════════════╗");
        println!("║                                    MAP BENCHMARK RESULTS                                             ║");
        println!("╚══════════════════════════════════════════════════════════════════════════════════════════════════════╝");
        println!(
            "Run {} on {} at {} | workers: {} | keys: {}x{} | values: {}x{}",
            self.run_id,
            self.host,
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.workers,
            self.workload.key_count,
            self.workload.key_length,
            self.workload.value_count,
            self.workload.value_length,
        );
        println!();
        println!("┌────────────┬──────────┬──────────┬──────────┬──────────┬──────────┬──────────┬──────────┬──────────────┐");
        println!("│ Benchmark  │  ops/s   │  p50(ms) │  p95(ms) │  p99(ms) │ Success% │ Timeouts │ CPU(avg) │  Memory(MB)  │");
        println!("├────────────┼──────────┼──────────┼──────────┼──────────┼──────────┼──────────┼──────────┼──────────────┤");

        for result in &self.results {
            println!(
                "│ {:<10} │ {:>8.1} │ {:>8.2} │ {:>8.2} │ {:>8.2} │ {:>7.1}% │ {:>8} │ {:>6.1}%  │ {:>6.0}/{:<6.0} │",
                result.benchmark,
                result.ops_per_second,
                result.latency_p50_ms,
                result.latency_p95_ms,
                result.latency_p99_ms,
                result.success_rate,
                result.timeouts,
                result.avg_cpu,
                result.avg_memory_mb,
                result.max_memory_mb
            );
        }

        println!("└────────────┴──────────┴──────────┴──────────┴──────────┴──────────┴──────────┴──────────┴──────────────┘");
        println!();

        let degraded = self
            .results
            .iter()
            .filter(|r| r.setup_failures > 0 || r.aborted_workers > 0);
        for result in degraded {
            println!(
                "{}: {} worker(s) failed setup, {} aborted",
                result.benchmark, result.setup_failures, result.aborted_workers
            );
        }
    }

    /// Export the report as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Print a compact summary
    pub fn print_summary(&self) {
        println!("\n=== Benchmark Summary ===");
        for result in &self.results {
            println!(
                "{}: {:.1} ops/s, p99 {:.2}ms, {} iterations, {} errors ({} timeouts)",
                result.benchmark,
                result.ops_per_second,
                result.latency_p99_ms,
                result.iterations,
                result.errors,
                result.timeouts
            );
        }

        let fastest = self.results.iter().max_by(|a, b| {
            a.ops_per_second
                .partial_cmp(&b.ops_per_second)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if let Some(fastest) = fastest {
            println!("Fastest: {} ({:.1} ops/s)", fastest.benchmark, fastest.ops_per_second);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(success: u64, errors: u64, timeouts: u64, ops: f64) -> MetricsSnapshot {
        MetricsSnapshot {
            success_count: success,
            error_count: errors,
            timeout_count: timeouts,
            success_rate: if success + errors == 0 {
                100.0
            } else {
                success as f64 / (success + errors) as f64 * 100.0
            },
            ops_per_second: ops,
            latency_p50: 1.2,
            latency_p95: 3.4,
            latency_p99: 5.6,
            ..Default::default()
        }
    }

    #[test]
    fn test_report_generation() {
        let config = BenchmarkConfig::default();
        let report = BenchmarkReport::from_results(
            &config,
            Utc::now(),
            vec![
                (BenchmarkKind::Put, snapshot(1000, 0, 0, 5000.0)),
                (BenchmarkKind::Event, snapshot(90, 10, 10, 300.0)),
            ],
        );

        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].benchmark, "MapPut");
        assert_eq!(report.results[1].iterations, 100);
        assert_eq!(report.results[1].timeouts, 10);
        assert!(!report.results[0].has_failures());
        assert!(report.has_failures());
        assert!(!report.host.is_empty());
    }

    #[test]
    fn test_report_json() {
        let config = BenchmarkConfig::default();
        let report = BenchmarkReport::from_results(
            &config,
            Utc::now(),
            vec![(BenchmarkKind::Get, snapshot(10, 0, 0, 100.0))],
        );

        let json: serde_json::Value = serde_json::from_str(&report.to_json()).unwrap();
        assert_eq!(json["results"][0]["benchmark"], "MapGet");
        assert_eq!(json["workload"]["key_count"], 1000);
        assert_eq!(json["run_id"], report.run_id.to_string());
    }
}
