//! Map client contract.
//!
//! A worker reaches a map in three hops: connect to the service, open a
//! database, open a named map. Streams returned by [`Map::watch`] and
//! [`Map::entries`] are owned by the caller and closed by dropping them.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::MapError;

pub use http::HttpConnector;
pub use memory::{MemoryOptions, MemoryService};

/// One key/value pair stored in a map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    pub value: Bytes,
    pub version: u64,
}

/// Kind of mutation a change notification reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Inserted,
    Updated,
    Removed,
}

/// Change notification emitted after a mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapEvent {
    pub kind: EventKind,
    pub key: String,
    pub value: Option<Bytes>,
    pub version: u64,
}

/// Live change notifications; ends when the subscription is lost
pub type EventStream = BoxStream<'static, Result<MapEvent, MapError>>;

/// Entries live at scan start; ends after the last entry
pub type EntryStream = BoxStream<'static, Result<Entry, MapError>>;

/// Opens client connections to a map service
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Box<dyn Client>, MapError>;
}

/// A connection to a map service
#[async_trait]
pub trait Client: Send + Sync {
    async fn get_database(&self, name: &str) -> Result<Box<dyn Database>, MapError>;
}

/// A database holding named maps
#[async_trait]
pub trait Database: Send + Sync {
    fn name(&self) -> &str;

    async fn get_map(&self, name: &str) -> Result<Box<dyn Map>, MapError>;
}

/// Handle on one named map
#[async_trait]
pub trait Map: Send + Sync {
    fn name(&self) -> &str;

    /// Write `value` under `key`, returning the replaced entry
    async fn put(&self, key: &str, value: Bytes) -> Result<Option<Entry>, MapError>;

    /// Read the entry under `key`; absent keys are [`MapError::KeyNotFound`]
    async fn get(&self, key: &str) -> Result<Entry, MapError>;

    /// Delete the entry under `key`, returning it
    async fn remove(&self, key: &str) -> Result<Option<Entry>, MapError>;

    /// Subscribe to change notifications. The subscription is live once this returns.
    async fn watch(&self) -> Result<EventStream, MapError>;

    /// Open a one-shot stream over every entry live at call time
    async fn entries(&self) -> Result<EntryStream, MapError>;

    /// Release the handle; later calls fail with [`MapError::Closed`]
    async fn close(&self) -> Result<(), MapError>;
}
