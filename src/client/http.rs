//! HTTP client for a networked map service.
//!
//! Unary operations carry a per-request timeout. Watch and scan streams do
//! not: their lifetime is bounded by the caller, which drops them.

use anyhow::Context;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt};
use reqwest::{Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{Client, Connector, Database, Entry, EntryStream, EventStream, Map, MapEvent};
use crate::error::MapError;

/// Response body of a put
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutResponse {
    pub previous: Option<Entry>,
}

/// Response body of a remove
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveResponse {
    pub removed: Option<Entry>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

struct Shared {
    client: reqwest::Client,
    base: Url,
    request_timeout: Duration,
}

impl Shared {
    fn endpoint(&self, segments: &[&str]) -> Result<Url, MapError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| MapError::Invalid(format!("{} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// Connects to map services over HTTP
pub struct HttpConnector {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl HttpConnector {
    /// Create a connector with connection pooling
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(64)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            request_timeout,
        })
    }
}

/// Accepts `host:port` or a full `http://` URL
fn parse_base_url(address: &str) -> Result<Url, MapError> {
    let candidate = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };
    Url::parse(&candidate).map_err(|e| MapError::Invalid(format!("bad address {}: {}", address, e)))
}

/// Pass successful responses through; decode error bodies into [`MapError`]
async fn check(response: Response) -> Result<Response, MapError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let err = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => MapError::from_wire(status, &parsed.error.error_type, parsed.error.message),
        Err(_) => MapError::from_wire(status, "", body),
    };
    tracing::debug!(status = %status, error = %err, "Map service returned an error");
    Err(err)
}

fn decode_line<T: DeserializeOwned>(line: &[u8]) -> Result<Option<T>, MapError> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(line)
        .map(Some)
        .map_err(|e| MapError::Transport(format!("Malformed stream item: {}", e)))
}

/// Decode a newline-delimited JSON response body item by item
fn ndjson_stream<T>(response: Response) -> BoxStream<'static, Result<T, MapError>>
where
    T: DeserializeOwned + Send + 'static,
{
    async_stream::try_stream! {
        let mut chunks = response.bytes_stream();
        let mut buffer = BytesMut::new();

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(MapError::from)?;
            buffer.extend_from_slice(&chunk);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line = buffer.split_to(pos + 1);
                if let Some(item) = decode_line::<T>(&line[..pos])? {
                    yield item;
                }
            }
        }

        // Trailing item without a final newline
        if let Some(item) = decode_line::<T>(&buffer)? {
            yield item;
        }
    }
    .boxed()
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(&self, address: &str) -> Result<Box<dyn Client>, MapError> {
        let shared = Arc::new(Shared {
            client: self.client.clone(),
            base: parse_base_url(address)?,
            request_timeout: self.request_timeout,
        });

        let url = shared.endpoint(&["health"])?;
        let response = shared
            .client
            .get(url)
            .timeout(shared.request_timeout)
            .send()
            .await?;
        check(response).await?;

        tracing::debug!(address, "Connected to map service");
        Ok(Box::new(HttpClient { shared }))
    }
}

struct HttpClient {
    shared: Arc<Shared>,
}

#[async_trait]
impl Client for HttpClient {
    async fn get_database(&self, name: &str) -> Result<Box<dyn Database>, MapError> {
        let url = self.shared.endpoint(&["v1", "databases", name])?;
        let response = self
            .shared
            .client
            .get(url)
            .timeout(self.shared.request_timeout)
            .send()
            .await?;
        check(response).await?;

        Ok(Box::new(HttpDatabase {
            shared: self.shared.clone(),
            name: name.to_string(),
        }))
    }
}

struct HttpDatabase {
    shared: Arc<Shared>,
    name: String,
}

#[async_trait]
impl Database for HttpDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_map(&self, name: &str) -> Result<Box<dyn Map>, MapError> {
        let url = self
            .shared
            .endpoint(&["v1", "databases", self.name.as_str(), "maps", name])?;
        let response = self
            .shared
            .client
            .post(url)
            .timeout(self.shared.request_timeout)
            .send()
            .await?;
        check(response).await?;

        Ok(Box::new(HttpMap {
            shared: self.shared.clone(),
            database: self.name.clone(),
            name: name.to_string(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct HttpMap {
    shared: Arc<Shared>,
    database: String,
    name: String,
    closed: AtomicBool,
}

impl HttpMap {
    fn url(&self, tail: &[&str]) -> Result<Url, MapError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MapError::Closed);
        }
        self.path(tail)
    }

    fn path(&self, tail: &[&str]) -> Result<Url, MapError> {
        let mut segments = vec![
            "v1",
            "databases",
            self.database.as_str(),
            "maps",
            self.name.as_str(),
        ];
        segments.extend_from_slice(tail);
        self.shared.endpoint(&segments)
    }
}

#[async_trait]
impl Map for HttpMap {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<Option<Entry>, MapError> {
        let url = self.url(&["keys", key])?;
        let response = self
            .shared
            .client
            .put(url)
            .timeout(self.shared.request_timeout)
            .header("Content-Type", "application/octet-stream")
            .body(value)
            .send()
            .await?;
        let body: PutResponse = check(response).await?.json().await?;
        Ok(body.previous)
    }

    async fn get(&self, key: &str) -> Result<Entry, MapError> {
        let url = self.url(&["keys", key])?;
        let response = self
            .shared
            .client
            .get(url)
            .timeout(self.shared.request_timeout)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn remove(&self, key: &str) -> Result<Option<Entry>, MapError> {
        let url = self.url(&["keys", key])?;
        let response = self
            .shared
            .client
            .delete(url)
            .timeout(self.shared.request_timeout)
            .send()
            .await?;
        let body: RemoveResponse = check(response).await?.json().await?;
        Ok(body.removed)
    }

    async fn watch(&self) -> Result<EventStream, MapError> {
        let url = self.url(&["events"])?;
        let response = self.shared.client.get(url).send().await?;
        let response = check(response).await?;
        Ok(ndjson_stream::<MapEvent>(response))
    }

    async fn entries(&self) -> Result<EntryStream, MapError> {
        let url = self.url(&["entries"])?;
        let response = self.shared.client.get(url).send().await?;
        let response = check(response).await?;
        Ok(ndjson_stream::<Entry>(response))
    }

    async fn close(&self) -> Result<(), MapError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let url = self.path(&["close"])?;
        let response = self
            .shared
            .client
            .post(url)
            .timeout(self.shared.request_timeout)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}
