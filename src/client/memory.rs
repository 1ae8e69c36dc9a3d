//! In-process map service.
//!
//! Backs both the HTTP test double in [`crate::server`] and direct, in-process
//! benchmark runs. Cloning a [`MemoryService`] shares its state.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::{
    Client, Connector, Database, Entry, EntryStream, EventKind, EventStream, Map, MapEvent,
};
use crate::bench::config::ServerConfig;
use crate::error::MapError;

/// Notifications buffered per subscriber before it starts lagging
const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Behaviour knobs for the in-process service
#[derive(Debug, Clone)]
pub struct MemoryOptions {
    /// Delay applied before every operation
    pub latency: Duration,
    /// Probability that an operation fails with `Unavailable`
    pub error_rate: f64,
    /// Whether mutations publish change notifications
    pub emit_events: bool,
    /// Per-subscriber notification buffer
    pub event_capacity: usize,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            error_rate: 0.0,
            emit_events: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl From<&ServerConfig> for MemoryOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            latency: Duration::from_millis(config.latency_ms),
            error_rate: config.error_rate,
            emit_events: config.emit_events,
            ..Default::default()
        }
    }
}

struct MapData {
    entries: BTreeMap<String, Entry>,
    version: u64,
}

/// State of one map, shared by every handle opened on it
pub struct MapState {
    data: Mutex<MapData>,
    events: broadcast::Sender<MapEvent>,
    emit_events: bool,
}

impl MapState {
    fn new(options: &MemoryOptions) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        Self {
            data: Mutex::new(MapData {
                entries: BTreeMap::new(),
                version: 0,
            }),
            events,
            emit_events: options.emit_events,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MapData> {
        // Entries stay consistent even if a holder panicked mid-insert
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, event: MapEvent) {
        if self.emit_events {
            // No subscribers is not an error
            let _ = self.events.send(event);
        }
    }

    pub fn put(&self, key: &str, value: Bytes) -> Option<Entry> {
        let mut data = self.lock();
        data.version += 1;
        let entry = Entry {
            key: key.to_string(),
            value,
            version: data.version,
        };
        let previous = data.entries.insert(key.to_string(), entry.clone());
        let kind = if previous.is_some() {
            EventKind::Updated
        } else {
            EventKind::Inserted
        };
        self.publish(MapEvent {
            kind,
            key: entry.key,
            value: Some(entry.value),
            version: entry.version,
        });
        previous
    }

    pub fn get(&self, key: &str) -> Option<Entry> {
        self.lock().entries.get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Entry> {
        let mut data = self.lock();
        let removed = data.entries.remove(key)?;
        data.version += 1;
        self.publish(MapEvent {
            kind: EventKind::Removed,
            key: removed.key.clone(),
            value: None,
            version: data.version,
        });
        Some(removed)
    }

    /// Entries live right now, in key order
    pub fn snapshot(&self) -> Vec<Entry> {
        self.lock().entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> EventStream {
        event_stream(self.events.subscribe())
    }
}

fn event_stream(mut receiver: broadcast::Receiver<MapEvent>) -> EventStream {
    async_stream::stream! {
        loop {
            match receiver.recv().await {
                Ok(event) => yield Ok::<_, MapError>(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Watch subscriber lagged, notifications dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
    .boxed()
}

#[derive(Default)]
struct DatabaseState {
    maps: DashMap<String, Arc<MapState>>,
}

struct Inner {
    options: MemoryOptions,
    databases: DashMap<String, Arc<DatabaseState>>,
    maps_opened: AtomicU64,
    maps_closed: AtomicU64,
}

/// Thread-safe in-memory map service
#[derive(Clone)]
pub struct MemoryService {
    inner: Arc<Inner>,
}

impl MemoryService {
    /// Create a service with no databases
    pub fn new(options: MemoryOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                databases: DashMap::new(),
                maps_opened: AtomicU64::new(0),
                maps_closed: AtomicU64::new(0),
            }),
        }
    }

    /// Create a database if it does not exist yet
    pub fn create_database(&self, name: &str) {
        self.inner
            .databases
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(DatabaseState::default()));
    }

    pub fn has_database(&self, name: &str) -> bool {
        self.inner.databases.contains_key(name)
    }

    /// Open (creating on first use) a map and count the handle
    pub fn open_map(&self, database: &str, map: &str) -> Result<Arc<MapState>, MapError> {
        let db = self
            .inner
            .databases
            .get(database)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| MapError::DatabaseNotFound(database.to_string()))?;

        let state = db
            .maps
            .entry(map.to_string())
            .or_insert_with(|| Arc::new(MapState::new(&self.inner.options)))
            .clone();

        self.inner.maps_opened.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(database, map, "Opened map");
        Ok(state)
    }

    /// Look up an existing map without counting a handle
    pub fn map_state(&self, database: &str, map: &str) -> Option<Arc<MapState>> {
        let db = self.inner.databases.get(database)?;
        let state = db.maps.get(map)?;
        Some(state.value().clone())
    }

    pub fn record_close(&self) {
        self.inner.maps_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of map handles opened so far
    pub fn maps_opened(&self) -> u64 {
        self.inner.maps_opened.load(Ordering::Relaxed)
    }

    /// Number of map handles closed so far
    pub fn maps_closed(&self) -> u64 {
        self.inner.maps_closed.load(Ordering::Relaxed)
    }

    /// Apply configured latency and error injection
    pub async fn simulate(&self) -> Result<(), MapError> {
        let options = &self.inner.options;
        if !options.latency.is_zero() {
            tokio::time::sleep(options.latency).await;
        }

        let fail = options.error_rate > 0.0 && rand::thread_rng().gen::<f64>() < options.error_rate;
        if fail {
            return Err(MapError::Unavailable("Simulated error".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryService {
    fn default() -> Self {
        Self::new(MemoryOptions::default())
    }
}

#[async_trait]
impl Connector for MemoryService {
    async fn connect(&self, address: &str) -> Result<Box<dyn Client>, MapError> {
        self.simulate().await?;
        tracing::debug!(address, "Connected to in-process map service");
        Ok(Box::new(MemoryClient {
            service: self.clone(),
        }))
    }
}

struct MemoryClient {
    service: MemoryService,
}

#[async_trait]
impl Client for MemoryClient {
    async fn get_database(&self, name: &str) -> Result<Box<dyn Database>, MapError> {
        self.service.simulate().await?;
        if !self.service.has_database(name) {
            return Err(MapError::DatabaseNotFound(name.to_string()));
        }
        Ok(Box::new(MemoryDatabase {
            service: self.service.clone(),
            name: name.to_string(),
        }))
    }
}

struct MemoryDatabase {
    service: MemoryService,
    name: String,
}

#[async_trait]
impl Database for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_map(&self, name: &str) -> Result<Box<dyn Map>, MapError> {
        self.service.simulate().await?;
        let state = self.service.open_map(&self.name, name)?;
        Ok(Box::new(MemoryMap {
            service: self.service.clone(),
            name: name.to_string(),
            state,
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryMap {
    service: MemoryService,
    name: String,
    state: Arc<MapState>,
    closed: AtomicBool,
}

impl MemoryMap {
    async fn ready(&self) -> Result<(), MapError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MapError::Closed);
        }
        self.service.simulate().await
    }
}

#[async_trait]
impl Map for MemoryMap {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<Option<Entry>, MapError> {
        self.ready().await?;
        Ok(self.state.put(key, value))
    }

    async fn get(&self, key: &str) -> Result<Entry, MapError> {
        self.ready().await?;
        self.state
            .get(key)
            .ok_or_else(|| MapError::KeyNotFound(key.to_string()))
    }

    async fn remove(&self, key: &str) -> Result<Option<Entry>, MapError> {
        self.ready().await?;
        Ok(self.state.remove(key))
    }

    async fn watch(&self) -> Result<EventStream, MapError> {
        self.ready().await?;
        Ok(self.state.subscribe())
    }

    async fn entries(&self) -> Result<EntryStream, MapError> {
        self.ready().await?;
        let snapshot = self.state.snapshot();
        Ok(stream::iter(snapshot.into_iter().map(Ok)).boxed())
    }

    async fn close(&self) -> Result<(), MapError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.service.record_close();
            tracing::debug!(map = %self.name, "Closed map");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn open(service: &MemoryService, map: &str) -> Box<dyn Map> {
        service.create_database("db");
        let client = service.connect("memory").await.unwrap();
        let database = client.get_database("db").await.unwrap();
        database.get_map(map).await.unwrap()
    }

    #[tokio::test]
    async fn test_put_then_get_returns_latest() {
        let service = MemoryService::default();
        let map = open(&service, "m").await;

        assert!(map.put("k", Bytes::from_static(b"v1")).await.unwrap().is_none());
        let previous = map.put("k", Bytes::from_static(b"v2")).await.unwrap();
        assert_eq!(previous.unwrap().value, Bytes::from_static(b"v1"));

        let entry = map.get("k").await.unwrap();
        assert_eq!(entry.value, Bytes::from_static(b"v2"));
        assert_eq!(entry.version, 2);
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let service = MemoryService::default();
        let map = open(&service, "m").await;
        assert_eq!(
            map.get("nope").await.unwrap_err(),
            MapError::KeyNotFound("nope".to_string())
        );
    }

    #[tokio::test]
    async fn test_unknown_database() {
        let service = MemoryService::default();
        let client = service.connect("memory").await.unwrap();
        let err = client.get_database("missing").await.err().unwrap();
        assert_eq!(err, MapError::DatabaseNotFound("missing".to_string()));
    }

    #[tokio::test]
    async fn test_handles_share_state() {
        let service = MemoryService::default();
        let a = open(&service, "shared").await;
        let b = open(&service, "shared").await;

        a.put("k", Bytes::from_static(b"v")).await.unwrap();
        assert_eq!(b.get("k").await.unwrap().value, Bytes::from_static(b"v"));
        assert_eq!(service.maps_opened(), 2);
    }

    #[tokio::test]
    async fn test_close_is_counted_once() {
        let service = MemoryService::default();
        let map = open(&service, "m").await;

        map.close().await.unwrap();
        map.close().await.unwrap();
        assert_eq!(service.maps_closed(), 1);
        assert_eq!(map.get("k").await.unwrap_err(), MapError::Closed);
    }

    #[tokio::test]
    async fn test_watch_sees_mutations() {
        let service = MemoryService::default();
        let map = open(&service, "m").await;
        let mut events = map.watch().await.unwrap();

        map.put("k", Bytes::from_static(b"v")).await.unwrap();
        map.put("k", Bytes::from_static(b"w")).await.unwrap();
        map.remove("k").await.unwrap();

        let kinds: Vec<EventKind> = events
            .by_ref()
            .take(3)
            .map(|event| event.unwrap().kind)
            .collect()
            .await;
        assert_eq!(
            kinds,
            vec![EventKind::Inserted, EventKind::Updated, EventKind::Removed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_service_emits_nothing() {
        let service = MemoryService::new(MemoryOptions {
            emit_events: false,
            ..Default::default()
        });
        let map = open(&service, "m").await;
        let mut events = map.watch().await.unwrap();

        map.put("k", Bytes::from_static(b"v")).await.unwrap();
        let waited = tokio::time::timeout(Duration::from_secs(1), events.next()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_entries_terminates() {
        let service = MemoryService::default();
        let map = open(&service, "m").await;

        let empty: Vec<_> = map.entries().await.unwrap().collect().await;
        assert!(empty.is_empty());

        for i in 0..5 {
            map.put(&format!("k{}", i), Bytes::from_static(b"v")).await.unwrap();
        }
        let entries: Vec<_> = map.entries().await.unwrap().collect().await;
        assert_eq!(entries.len(), 5);
        assert!(entries.iter().all(|e| e.is_ok()));
    }

    #[tokio::test]
    async fn test_error_injection() {
        let service = MemoryService::new(MemoryOptions {
            error_rate: 1.0,
            ..Default::default()
        });
        let err = service.connect("memory").await.err().unwrap();
        assert!(matches!(err, MapError::Unavailable(_)));
    }
}
