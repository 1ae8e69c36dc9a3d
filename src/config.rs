//! Command-line and environment configuration.
//!
//! Every option can also be set through the environment (or a `.env` file);
//! the command line wins.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::time::Duration;

use crate::bench::config::{
    BenchmarkConfig, BenchmarkKind, ProvisionConfig, ServerConfig, WorkloadConfig,
};

/// Port `serve` listens on when none is given
pub const DEFAULT_SERVE_PORT: u16 = 5679;

/// Map Bench - benchmark harness for a replicated key-value map service
#[derive(Parser, Debug)]
#[command(name = "map-bench", author, version, about, long_about = None)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Benchmark a deployed map service
    Run {
        #[command(flatten)]
        bench: BenchArgs,

        #[command(flatten)]
        provision: ProvisionArgs,

        /// Service address; skips cluster discovery when set
        #[arg(short = 'a', long, env = "MAP_ADDRESS")]
        address: Option<String>,

        /// Namespace for installs and discovery
        #[arg(short = 'n', long, env = "NAMESPACE")]
        namespace: Option<String>,
    },

    /// Start an in-process map service and benchmark it over HTTP
    Standalone {
        #[command(flatten)]
        bench: BenchArgs,

        #[command(flatten)]
        server: ServerArgs,
    },

    /// Serve the map service test double until interrupted
    Serve {
        #[command(flatten)]
        server: ServerArgs,
    },
}

/// Key and value candidate set dimensions
#[derive(Args, Debug, Clone)]
pub struct WorkloadArgs {
    /// Length of each generated key
    #[arg(long, env = "KEY_LENGTH", default_value = "8")]
    pub key_length: usize,

    /// Number of distinct keys
    #[arg(long, env = "KEY_COUNT", default_value = "1000")]
    pub key_count: usize,

    /// Length of each generated value in bytes
    #[arg(long, env = "VALUE_LENGTH", default_value = "128")]
    pub value_length: usize,

    /// Number of distinct values
    #[arg(long, env = "VALUE_COUNT", default_value = "1")]
    pub value_count: usize,
}

impl From<&WorkloadArgs> for WorkloadConfig {
    fn from(args: &WorkloadArgs) -> Self {
        Self {
            key_length: args.key_length,
            key_count: args.key_count,
            value_length: args.value_length,
            value_count: args.value_count,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct BenchArgs {
    #[command(flatten)]
    pub workload: WorkloadArgs,

    /// Benchmarks to run (comma-separated: put, get, event, entries)
    #[arg(
        short = 'b',
        long,
        env = "BENCHMARKS",
        default_value = "put,get,event,entries",
        value_delimiter = ','
    )]
    pub benchmarks: Vec<BenchmarkKind>,

    /// Number of parallel workers
    #[arg(short = 'w', long, env = "WORKERS", default_value = "1")]
    pub workers: usize,

    /// Duration per benchmark in seconds
    #[arg(short = 'd', long, env = "DURATION", default_value = "10")]
    pub duration: u64,

    /// Cap on measured iterations per worker
    #[arg(short = 'i', long, env = "ITERATIONS")]
    pub iterations: Option<u64>,

    /// Unmeasured iterations per worker
    #[arg(long, env = "WARMUP", default_value = "0")]
    pub warmup: u64,

    /// Database name (storage cluster release)
    #[arg(long, env = "DATABASE", default_value = "map-database")]
    pub database: String,

    /// Service controller release
    #[arg(long, env = "CONTROLLER_RELEASE", default_value = "map-controller")]
    pub controller_release: String,

    /// Bound on waiting for a change notification (ms)
    #[arg(long, env = "EVENT_TIMEOUT_MS", default_value = "10000")]
    pub event_timeout_ms: u64,

    /// Bound on waiting for each scanned entry (ms)
    #[arg(long, env = "SCAN_TIMEOUT_MS", default_value = "10000")]
    pub scan_timeout_ms: u64,

    /// Bound on each setup call (ms)
    #[arg(long, env = "SETUP_TIMEOUT_MS", default_value = "10000")]
    pub setup_timeout_ms: u64,

    /// HTTP connect timeout (ms)
    #[arg(long, env = "CONNECT_TIMEOUT_MS", default_value = "5000")]
    pub connect_timeout_ms: u64,

    /// HTTP request timeout (ms)
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

impl BenchArgs {
    pub fn to_config(&self, provision: ProvisionConfig) -> BenchmarkConfig {
        BenchmarkConfig {
            workload: WorkloadConfig::from(&self.workload),
            benchmarks: self.benchmarks.clone(),
            workers: self.workers,
            duration_secs: self.duration,
            iterations: self.iterations,
            warmup_iterations: self.warmup,
            controller_release: self.controller_release.clone(),
            database: self.database.clone(),
            event_timeout_ms: self.event_timeout_ms,
            scan_timeout_ms: self.scan_timeout_ms,
            setup_timeout_ms: self.setup_timeout_ms,
            provision,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ProvisionArgs {
    /// Install the service and storage charts before running
    #[arg(long, env = "PROVISION")]
    pub provision: bool,

    #[arg(long, env = "CONTROLLER_CHART", default_value = "map-controller")]
    pub controller_chart: String,

    #[arg(long, env = "DATABASE_CHART", default_value = "map-database")]
    pub database_chart: String,

    /// Storage clusters
    #[arg(long, env = "CLUSTERS", default_value = "3")]
    pub clusters: u32,

    /// Partitions
    #[arg(long, env = "PARTITIONS", default_value = "10")]
    pub partitions: u32,

    /// Replicas per cluster
    #[arg(long, env = "REPLICAS", default_value = "3")]
    pub replicas: u32,

    /// Storage replica image
    #[arg(long, env = "REPLICA_IMAGE", default_value = "local-replica:latest")]
    pub image: String,
}

impl From<&ProvisionArgs> for ProvisionConfig {
    fn from(args: &ProvisionArgs) -> Self {
        Self {
            controller_chart: args.controller_chart.clone(),
            database_chart: args.database_chart.clone(),
            clusters: args.clusters,
            partitions: args.partitions,
            replicas: args.replicas,
            image: args.image.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Host to bind
    #[arg(short = 'H', long, env = "SERVER_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short = 'p', long, env = "SERVER_PORT")]
    pub port: Option<u16>,

    /// Simulated latency per operation (ms)
    #[arg(long, env = "SERVER_LATENCY_MS", default_value = "0")]
    pub latency_ms: u64,

    /// Fraction of operations that fail (0.0 to 1.0)
    #[arg(long, env = "SERVER_ERROR_RATE", default_value = "0.0", value_parser = parse_rate)]
    pub error_rate: f64,

    /// Do not emit change notifications
    #[arg(long, env = "SERVER_NO_EVENTS")]
    pub no_events: bool,

    /// Databases to create (comma-separated)
    #[arg(long, env = "SERVER_DATABASES", default_value = "map-database", value_delimiter = ',')]
    pub databases: Vec<String>,
}

impl ServerArgs {
    pub fn to_config(&self, default_port: u16) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port.unwrap_or(default_port),
            latency_ms: self.latency_ms,
            error_rate: self.error_rate,
            emit_events: !self.no_events,
            databases: self.databases.clone(),
        }
    }
}

fn parse_rate(s: &str) -> Result<f64, String> {
    let rate: f64 = s.parse().map_err(|_| format!("invalid rate: {}", s))?;
    if !(0.0..=1.0).contains(&rate) {
        return Err(format!("rate must be between 0.0 and 1.0, got {}", rate));
    }
    Ok(rate)
}
