//! Configuration structs for benchmarking.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Benchmark to execute against the map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BenchmarkKind {
    Put,
    Get,
    Event,
    Entries,
}

impl BenchmarkKind {
    pub const ALL: [BenchmarkKind; 4] = [
        BenchmarkKind::Put,
        BenchmarkKind::Get,
        BenchmarkKind::Event,
        BenchmarkKind::Entries,
    ];

    /// Benchmark name, also used as the name of the map it runs against
    pub fn name(&self) -> &'static str {
        match self {
            BenchmarkKind::Put => "MapPut",
            BenchmarkKind::Get => "MapGet",
            BenchmarkKind::Event => "MapEvent",
            BenchmarkKind::Entries => "MapEntries",
        }
    }
}

impl std::fmt::Display for BenchmarkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for BenchmarkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "put" | "mapput" => Ok(BenchmarkKind::Put),
            "get" | "mapget" => Ok(BenchmarkKind::Get),
            "event" | "events" | "mapevent" => Ok(BenchmarkKind::Event),
            "entries" | "scan" | "mapentries" => Ok(BenchmarkKind::Entries),
            _ => Err(format!("Unknown benchmark: {}", s)),
        }
    }
}

/// Dimensions of the key and value candidate sets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Length of each generated key
    pub key_length: usize,
    /// Number of distinct keys to draw from
    pub key_count: usize,
    /// Length of each generated value in bytes
    pub value_length: usize,
    /// Number of distinct values to draw from
    pub value_count: usize,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            key_length: 8,
            key_count: 1000,
            value_length: 128,
            value_count: 1,
        }
    }
}

impl WorkloadConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.key_length == 0 {
            anyhow::bail!("key-length must be greater than zero");
        }
        if self.key_count == 0 {
            anyhow::bail!("key-count must be greater than zero");
        }
        if self.value_length == 0 {
            anyhow::bail!("value-length must be greater than zero");
        }
        if self.value_count == 0 {
            anyhow::bail!("value-count must be greater than zero");
        }
        Ok(())
    }
}

/// Parameters for installing the map service and its storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    /// Chart for the service controller
    pub controller_chart: String,
    /// Chart for the storage cluster
    pub database_chart: String,
    /// Number of storage clusters
    pub clusters: u32,
    /// Number of partitions
    pub partitions: u32,
    /// Replicas per cluster
    pub replicas: u32,
    /// Storage replica image
    pub image: String,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            controller_chart: "map-controller".to_string(),
            database_chart: "map-database".to_string(),
            clusters: 3,
            partitions: 10,
            replicas: 3,
            image: "local-replica:latest".to_string(),
        }
    }
}

/// Configuration for the map service test double
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind
    pub host: String,
    /// Port to listen on (0 for random)
    pub port: u16,
    /// Simulated latency per operation in milliseconds
    pub latency_ms: u64,
    /// Error rate (0.0 to 1.0)
    pub error_rate: f64,
    /// Whether mutations emit change notifications
    pub emit_events: bool,
    /// Databases created at startup
    pub databases: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            latency_ms: 0,
            error_rate: 0.0,
            emit_events: true,
            databases: vec!["map-database".to_string()],
        }
    }
}

/// Configuration for a benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Key/value dimensions
    pub workload: WorkloadConfig,
    /// Benchmarks to run, in order
    pub benchmarks: Vec<BenchmarkKind>,
    /// Number of parallel workers
    pub workers: usize,
    /// Duration per benchmark in seconds
    pub duration_secs: u64,
    /// Optional cap on measured iterations per worker
    pub iterations: Option<u64>,
    /// Unmeasured iterations per worker before measuring
    pub warmup_iterations: u64,
    /// Release name the service controller is discovered by
    pub controller_release: String,
    /// Release name of the storage cluster, also the database name
    pub database: String,
    /// Bound on waiting for a change notification, in milliseconds
    pub event_timeout_ms: u64,
    /// Bound on waiting for each scanned entry, in milliseconds
    pub scan_timeout_ms: u64,
    /// Bound on each setup call, in milliseconds
    pub setup_timeout_ms: u64,
    /// Provisioning parameters
    pub provision: ProvisionConfig,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            workload: WorkloadConfig::default(),
            benchmarks: BenchmarkKind::ALL.to_vec(),
            workers: 1,
            duration_secs: 10,
            iterations: None,
            warmup_iterations: 0,
            controller_release: "map-controller".to_string(),
            database: "map-database".to_string(),
            event_timeout_ms: 10_000,
            scan_timeout_ms: 10_000,
            setup_timeout_ms: 10_000,
            provision: ProvisionConfig::default(),
        }
    }
}

impl BenchmarkConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn event_timeout(&self) -> Duration {
        Duration::from_millis(self.event_timeout_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_timeout_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.workload.validate()?;
        if self.workers == 0 {
            anyhow::bail!("workers must be greater than zero");
        }
        if self.benchmarks.is_empty() {
            anyhow::bail!("at least one benchmark must be selected");
        }
        if self.iterations.is_none() && self.duration_secs == 0 {
            anyhow::bail!("either a duration or an iteration count is required");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benchmark_kind_parse() {
        assert_eq!("put".parse::<BenchmarkKind>(), Ok(BenchmarkKind::Put));
        assert_eq!("MapGet".parse::<BenchmarkKind>(), Ok(BenchmarkKind::Get));
        assert_eq!("EVENT".parse::<BenchmarkKind>(), Ok(BenchmarkKind::Event));
        assert_eq!("scan".parse::<BenchmarkKind>(), Ok(BenchmarkKind::Entries));
        assert!("delete".parse::<BenchmarkKind>().is_err());
    }

    #[test]
    fn test_benchmark_names() {
        assert_eq!(BenchmarkKind::Put.to_string(), "MapPut");
        assert_eq!(BenchmarkKind::Entries.name(), "MapEntries");
    }

    #[test]
    fn test_defaults() {
        let config = BenchmarkConfig::default();
        assert_eq!(config.workload.key_length, 8);
        assert_eq!(config.workload.key_count, 1000);
        assert_eq!(config.workload.value_length, 128);
        assert_eq!(config.workload.value_count, 1);
        assert_eq!(config.event_timeout(), Duration::from_secs(10));
        assert_eq!(config.scan_timeout(), Duration::from_secs(10));
        assert_eq!(config.setup_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_empty_workload() {
        let mut config = BenchmarkConfig::default();
        config.workload.key_count = 0;
        assert!(config.validate().is_err());

        let mut config = BenchmarkConfig::default();
        config.workers = 0;
        assert!(config.validate().is_err());

        let config = BenchmarkConfig {
            duration_secs: 0,
            iterations: Some(10),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
