//! Full-map enumeration under a per-entry deadline.

use futures::StreamExt;
use std::time::Duration;

use crate::client::{EntryStream, Map};
use crate::error::{BenchError, Result};

/// Drains one entries stream per scan
#[derive(Debug, Clone, Copy)]
pub struct EntryScanner {
    item_timeout: Duration,
}

impl EntryScanner {
    pub fn new(item_timeout: Duration) -> Self {
        Self { item_timeout }
    }

    /// Open a fresh entries stream on `map` and drain it
    pub async fn scan(&self, map: &dyn Map) -> Result<u64> {
        let entries = map.entries().await?;
        self.drain(entries).await
    }

    /// Count entries until the stream ends.
    ///
    /// Each entry must arrive within the item timeout, otherwise the scan fails
    /// with [`BenchError::EventTimeout`]. End of stream is success.
    pub async fn drain(&self, mut entries: EntryStream) -> Result<u64> {
        let mut count = 0u64;
        loop {
            match tokio::time::timeout(self.item_timeout, entries.next()).await {
                Ok(Some(Ok(_entry))) => count += 1,
                Ok(Some(Err(e))) => return Err(BenchError::Operation(e)),
                Ok(None) => return Ok(count),
                Err(_) => return Err(BenchError::EventTimeout),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Connector, Entry, MemoryService};
    use crate::error::MapError;
    use bytes::Bytes;
    use futures::stream;
    use tokio::time::Instant;

    async fn open(service: &MemoryService) -> Box<dyn Map> {
        service.create_database("db");
        let client = service.connect("memory").await.unwrap();
        let database = client.get_database("db").await.unwrap();
        database.get_map("entries").await.unwrap()
    }

    #[tokio::test]
    async fn test_scan_counts_seeded_entries() {
        let service = MemoryService::default();
        let map = open(&service).await;
        for i in 0..25 {
            map.put(&format!("key-{}", i), Bytes::from_static(b"v"))
                .await
                .unwrap();
        }

        let scanner = EntryScanner::new(Duration::from_secs(10));
        assert_eq!(scanner.scan(map.as_ref()).await.unwrap(), 25);
    }

    #[tokio::test]
    async fn test_scan_empty_map_terminates() {
        let service = MemoryService::default();
        let map = open(&service).await;

        let scanner = EntryScanner::new(Duration::from_secs(10));
        assert_eq!(scanner.scan(map.as_ref()).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_stream_times_out() {
        let entry = Entry {
            key: "k".to_string(),
            value: Bytes::new(),
            version: 1,
        };
        let stalled: EntryStream = stream::iter(vec![Ok(entry)])
            .chain(stream::pending())
            .boxed();

        let start = Instant::now();
        let err = EntryScanner::new(Duration::from_secs(10))
            .drain(stalled)
            .await
            .unwrap_err();
        assert!(matches!(err, BenchError::EventTimeout));
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_stream_error_is_operation_failure() {
        let failing: EntryStream =
            stream::iter(vec![Err(MapError::Unavailable("gone".to_string()))]).boxed();
        let err = EntryScanner::new(Duration::from_secs(1))
            .drain(failing)
            .await
            .unwrap_err();
        assert!(matches!(err, BenchError::Operation(MapError::Unavailable(_))));
        assert!(!err.is_fatal());
    }
}
