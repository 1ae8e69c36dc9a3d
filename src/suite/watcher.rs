//! Bounded waits on a map's change notifications.

use futures::StreamExt;
use std::time::Duration;

use crate::client::{EventStream, Map, MapEvent};
use crate::error::{BenchError, MapError, Result};

/// Owned subscription to one map's change notifications.
///
/// The subscription is live from construction, so mutations issued after
/// [`EventWatcher::subscribe`] returns are never missed. Dropping the watcher
/// closes the underlying stream.
pub struct EventWatcher {
    events: EventStream,
}

impl EventWatcher {
    /// Subscribe to `map`. Failure is a [`BenchError::Subscription`].
    pub async fn subscribe(map: &dyn Map) -> Result<Self> {
        let events = map.watch().await.map_err(BenchError::Subscription)?;
        tracing::debug!(map = map.name(), "Subscribed to change notifications");
        Ok(Self::from_stream(events))
    }

    pub fn from_stream(events: EventStream) -> Self {
        Self { events }
    }

    /// Wait for the next notification, at most `deadline`.
    ///
    /// Takes exactly one notification per call; anything else already queued
    /// stays for the next call.
    pub async fn wait_next(&mut self, deadline: Duration) -> Result<MapEvent> {
        match tokio::time::timeout(deadline, self.events.next()).await {
            Ok(Some(Ok(event))) => Ok(event),
            Ok(Some(Err(e))) => Err(BenchError::Subscription(e)),
            Ok(None) => Err(BenchError::Subscription(MapError::Closed)),
            Err(_) => Err(BenchError::EventTimeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Connector, EventKind, MemoryOptions, MemoryService};
    use bytes::Bytes;
    use futures::stream;
    use tokio::time::Instant;

    async fn open(service: &MemoryService) -> Box<dyn Map> {
        service.create_database("db");
        let client = service.connect("memory").await.unwrap();
        let database = client.get_database("db").await.unwrap();
        database.get_map("events").await.unwrap()
    }

    #[tokio::test]
    async fn test_receives_notification_after_put() {
        let service = MemoryService::default();
        let map = open(&service).await;
        let mut watcher = EventWatcher::subscribe(map.as_ref()).await.unwrap();

        map.put("k", Bytes::from_static(b"v")).await.unwrap();
        let event = watcher.wait_next(Duration::from_secs(10)).await.unwrap();
        assert_eq!(event.kind, EventKind::Inserted);
        assert_eq!(event.key, "k");
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_service_times_out_after_bound() {
        let service = MemoryService::new(MemoryOptions {
            emit_events: false,
            ..Default::default()
        });
        let map = open(&service).await;
        let mut watcher = EventWatcher::subscribe(map.as_ref()).await.unwrap();

        map.put("k", Bytes::from_static(b"v")).await.unwrap();
        let start = Instant::now();
        let err = watcher.wait_next(Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, BenchError::EventTimeout));
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_one_notification_per_wait() {
        let service = MemoryService::default();
        let map = open(&service).await;
        let mut watcher = EventWatcher::subscribe(map.as_ref()).await.unwrap();

        map.put("a", Bytes::from_static(b"1")).await.unwrap();
        map.put("b", Bytes::from_static(b"2")).await.unwrap();

        assert_eq!(watcher.wait_next(Duration::from_secs(1)).await.unwrap().key, "a");
        assert_eq!(watcher.wait_next(Duration::from_secs(1)).await.unwrap().key, "b");
    }

    #[tokio::test]
    async fn test_closed_stream_is_subscription_failure() {
        let mut watcher = EventWatcher::from_stream(stream::empty().boxed());
        let err = watcher.wait_next(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, BenchError::Subscription(MapError::Closed)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_subscribe_on_closed_map_fails() {
        let service = MemoryService::default();
        let map = open(&service).await;
        map.close().await.unwrap();

        let err = EventWatcher::subscribe(map.as_ref()).await.err().unwrap();
        assert!(matches!(err, BenchError::Subscription(_)));
    }
}
