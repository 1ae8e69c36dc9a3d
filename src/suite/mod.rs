//! Benchmark suite lifecycle.
//!
//! A run goes through suite setup once, worker setup once per worker, then for
//! each benchmark a setup, running and teardown phase per worker. Suite setup
//! failures abort the run; benchmark setup failures only abort that benchmark
//! for that worker.

pub mod scanner;
pub mod watcher;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::bench::config::{BenchmarkConfig, BenchmarkKind};
use crate::client::{Connector, Map};
use crate::discovery::Discovery;
use crate::error::{BenchError, Result};
use crate::provision::{suite_charts, Provisioner};
use crate::workload::Workload;

pub use scanner::EntryScanner;
pub use watcher::EventWatcher;

/// Lifecycle phase of one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    SuiteInit,
    WorkerInit,
    BenchmarkInit,
    Running,
    BenchmarkTeardown,
}

/// Shared suite definition; hands out workers
#[derive(Clone)]
pub struct MapBenchmarkSuite {
    config: Arc<BenchmarkConfig>,
    provisioner: Arc<dyn Provisioner>,
    discovery: Arc<dyn Discovery>,
    connector: Arc<dyn Connector>,
}

impl MapBenchmarkSuite {
    pub fn new(
        config: BenchmarkConfig,
        provisioner: Arc<dyn Provisioner>,
        discovery: Arc<dyn Discovery>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            provisioner,
            discovery,
            connector,
        }
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// Install the service controller and its storage cluster
    pub async fn setup_suite(&self) -> Result<()> {
        for request in suite_charts(&self.config) {
            self.provisioner
                .install(&request)
                .await
                .map_err(BenchError::Provisioning)?;
        }
        tracing::info!(database = %self.config.database, "Suite provisioned");
        Ok(())
    }

    /// Build a worker with its own workload generator.
    ///
    /// Empty key or value candidate sets are a [`BenchError::Config`].
    pub fn setup_worker(&self, id: usize) -> Result<Worker> {
        self.config.workload.validate().map_err(BenchError::Config)?;
        Ok(Worker {
            id,
            config: Arc::clone(&self.config),
            discovery: Arc::clone(&self.discovery),
            connector: Arc::clone(&self.connector),
            workload: Workload::new(&self.config.workload),
            phase: Phase::WorkerInit,
            map: None,
            watcher: None,
        })
    }
}

/// One parallel benchmark worker.
///
/// Owns its workload, map handle and notification subscription; nothing here
/// is shared with other workers.
pub struct Worker {
    id: usize,
    config: Arc<BenchmarkConfig>,
    discovery: Arc<dyn Discovery>,
    connector: Arc<dyn Connector>,
    workload: Workload,
    phase: Phase,
    map: Option<Box<dyn Map>>,
    watcher: Option<EventWatcher>,
}

impl Worker {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn workload(&self) -> &Workload {
        &self.workload
    }

    /// Whether a map handle is currently held
    pub fn has_map(&self) -> bool {
        self.map.is_some()
    }

    /// Run the generic and the benchmark-specific setup steps.
    ///
    /// On error the map handle, if it was acquired, is still held and must be
    /// released with [`Worker::teardown`].
    pub async fn setup(&mut self, kind: BenchmarkKind) -> Result<()> {
        self.setup_benchmark(kind).await?;
        match kind {
            BenchmarkKind::Event => self.setup_event_benchmark().await?,
            BenchmarkKind::Get => self.setup_get_benchmark().await?,
            BenchmarkKind::Entries => self.setup_entries_benchmark().await?,
            BenchmarkKind::Put => {}
        }
        self.phase = Phase::Running;
        Ok(())
    }

    /// Resolve the service, connect and open the benchmark's map
    pub async fn setup_benchmark(&mut self, kind: BenchmarkKind) -> Result<()> {
        self.phase = Phase::BenchmarkInit;
        let setup_timeout = self.config.setup_timeout();

        let release = &self.config.controller_release;
        let address = bounded(setup_timeout, "discovery", self.discovery.resolve(release))
            .await?
            .map_err(|e| BenchError::Setup(format!("discovery of {} failed: {}", release, e)))?
            .ok_or_else(|| BenchError::Setup(format!("no address found for {}", release)))?;

        let client = bounded(setup_timeout, "connect", self.connector.connect(&address))
            .await?
            .map_err(|e| BenchError::Setup(format!("connect to {} failed: {}", address, e)))?;

        let database = bounded(
            setup_timeout,
            "get database",
            client.get_database(&self.config.database),
        )
        .await?
        .map_err(|e| BenchError::Setup(format!("get database failed: {}", e)))?;

        let map = bounded(setup_timeout, "get map", database.get_map(kind.name()))
            .await?
            .map_err(|e| BenchError::Setup(format!("get map {} failed: {}", kind.name(), e)))?;

        tracing::debug!(
            worker = self.id,
            map = kind.name(),
            address = %address,
            "Opened benchmark map"
        );
        self.map = Some(map);
        Ok(())
    }

    /// Subscribe before the first mutation so no notification is missed
    pub async fn setup_event_benchmark(&mut self) -> Result<()> {
        let watcher = EventWatcher::subscribe(opened(&self.map)?).await?;
        self.watcher = Some(watcher);
        Ok(())
    }

    /// Seed every key candidate so reads hit
    pub async fn setup_get_benchmark(&mut self) -> Result<()> {
        self.seed_entries().await
    }

    /// Seed one entry per key candidate
    pub async fn setup_entries_benchmark(&mut self) -> Result<()> {
        self.seed_entries().await
    }

    async fn seed_entries(&mut self) -> Result<()> {
        let setup_timeout = self.config.setup_timeout();
        let keys = self.workload.keys().as_slice().to_vec();
        let map = opened(&self.map)?;
        for key in &keys {
            let value = self.workload.next_value();
            bounded(setup_timeout, "seed entry", map.put(key, value))
                .await?
                .map_err(|e| BenchError::Setup(format!("seeding {} failed: {}", key, e)))?;
        }
        tracing::debug!(worker = self.id, entries = keys.len(), "Seeded entries");
        Ok(())
    }

    /// Execute one iteration; returns the number of items it processed
    pub async fn run_iteration(&mut self, kind: BenchmarkKind) -> Result<u64> {
        match kind {
            BenchmarkKind::Put => self.put().await.map(|_| 1),
            BenchmarkKind::Get => self.get().await.map(|_| 1),
            BenchmarkKind::Event => self.put_and_observe().await.map(|_| 1),
            BenchmarkKind::Entries => self.scan_all().await,
        }
    }

    /// Write the next key and value
    pub async fn put(&mut self) -> Result<()> {
        let key = self.workload.next_key();
        let value = self.workload.next_value();
        opened(&self.map)?.put(&key, value).await?;
        Ok(())
    }

    /// Read the next key; a missing key is an ordinary failure
    pub async fn get(&mut self) -> Result<()> {
        let key = self.workload.next_key();
        opened(&self.map)?.get(&key).await?;
        Ok(())
    }

    /// Write, then wait for one change notification
    pub async fn put_and_observe(&mut self) -> Result<()> {
        let deadline = self.config.event_timeout();
        self.put().await?;
        let watcher = self.watcher.as_mut().ok_or_else(not_initialized)?;
        watcher.wait_next(deadline).await?;
        Ok(())
    }

    /// Enumerate the whole map
    pub async fn scan_all(&mut self) -> Result<u64> {
        let scanner = EntryScanner::new(self.config.scan_timeout());
        scanner.scan(opened(&self.map)?).await
    }

    /// Drop the subscription and close the map handle, if one is held.
    ///
    /// Close errors are logged and not escalated.
    pub async fn teardown(&mut self, kind: BenchmarkKind) {
        self.phase = Phase::BenchmarkTeardown;
        self.watcher = None;
        if let Some(map) = self.map.take() {
            if let Err(e) = map.close().await {
                tracing::warn!(
                    worker = self.id,
                    map = kind.name(),
                    error = %e,
                    "Failed to close map"
                );
            }
        }
    }
}

fn opened(map: &Option<Box<dyn Map>>) -> Result<&dyn Map> {
    map.as_deref().ok_or_else(not_initialized)
}

fn not_initialized() -> BenchError {
    BenchError::Setup("benchmark is not initialized".to_string())
}

/// Bound a setup call; elapsing is a setup failure
async fn bounded<F, T>(limit: Duration, step: &str, future: F) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| BenchError::Setup(format!("{} timed out after {:?}", step, limit)))
}
