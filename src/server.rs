//! Map service test double served over HTTP.
//!
//! Exposes a [`MemoryService`] with configurable latency, error injection and
//! change notifications, so benchmarks can run against a real network hop.

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;

use crate::bench::config::ServerConfig;
use crate::client::http::{PutResponse, RemoveResponse};
use crate::client::memory::MapState;
use crate::client::{Entry, MemoryOptions, MemoryService};
use crate::error::MapError;

/// HTTP map service for benchmarking
pub struct MapServer {
    config: ServerConfig,
    service: MemoryService,
    shutdown_tx: Option<oneshot::Sender<()>>,
    port: u16,
}

impl MapServer {
    /// Create a new server with the configured databases
    pub fn new(config: ServerConfig) -> Self {
        let service = MemoryService::new(MemoryOptions::from(&config));
        for database in &config.databases {
            service.create_database(database);
        }

        Self {
            config,
            service,
            shutdown_tx: None,
            port: 0,
        }
    }

    /// Start the server and return the actual port
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        self.port = port;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let app = router(self.service.clone());

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        tracing::info!(port, "Map service listening");
        Ok(port)
    }

    /// Get the server's port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address clients connect to
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.port)
    }

    /// Service backing this server
    pub fn service(&self) -> &MemoryService {
        &self.service
    }

    /// Stop the server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MapServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Routes of the map service
pub fn router(service: MemoryService) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/databases/:database", get(database_handler))
        .route("/v1/databases/:database/maps/:map", post(open_map_handler))
        .route("/v1/databases/:database/maps/:map/close", post(close_map_handler))
        .route("/v1/databases/:database/maps/:map/events", get(watch_handler))
        .route("/v1/databases/:database/maps/:map/entries", get(entries_handler))
        .route(
            "/v1/databases/:database/maps/:map/keys/:key",
            put(put_handler).get(get_handler).delete(remove_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Resolve a map that some client has opened
fn lookup(service: &MemoryService, database: &str, map: &str) -> Result<Arc<MapState>, MapError> {
    if !service.has_database(database) {
        return Err(MapError::DatabaseNotFound(database.to_string()));
    }
    service
        .map_state(database, map)
        .ok_or_else(|| MapError::Invalid(format!("map {} is not open", map)))
}

/// Stream items as newline-delimited JSON
fn ndjson_response<T>(items: BoxStream<'static, Result<T, MapError>>) -> Response
where
    T: Serialize + Send + 'static,
{
    let body = items.map(|item| {
        let item = item.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let mut line = serde_json::to_vec(&item)?;
        line.push(b'\n');
        Ok::<_, std::io::Error>(Bytes::from(line))
    });

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(body),
    )
        .into_response()
}

async fn health_handler() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

async fn database_handler(
    State(service): State<MemoryService>,
    Path(database): Path<String>,
) -> Result<Json<Value>, MapError> {
    service.simulate().await?;
    if !service.has_database(&database) {
        return Err(MapError::DatabaseNotFound(database));
    }
    Ok(Json(json!({"database": database})))
}

async fn open_map_handler(
    State(service): State<MemoryService>,
    Path((database, map)): Path<(String, String)>,
) -> Result<Json<Value>, MapError> {
    service.simulate().await?;
    service.open_map(&database, &map)?;
    Ok(Json(json!({"database": database, "map": map})))
}

async fn close_map_handler(
    State(service): State<MemoryService>,
    Path((database, map)): Path<(String, String)>,
) -> Result<Json<Value>, MapError> {
    lookup(&service, &database, &map)?;
    service.record_close();
    tracing::debug!(database = %database, map = %map, "Closed map");
    Ok(Json(json!({"closed": true})))
}

async fn put_handler(
    State(service): State<MemoryService>,
    Path((database, map, key)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<Json<PutResponse>, MapError> {
    service.simulate().await?;
    let state = lookup(&service, &database, &map)?;
    Ok(Json(PutResponse {
        previous: state.put(&key, body),
    }))
}

async fn get_handler(
    State(service): State<MemoryService>,
    Path((database, map, key)): Path<(String, String, String)>,
) -> Result<Json<Entry>, MapError> {
    service.simulate().await?;
    let state = lookup(&service, &database, &map)?;
    state.get(&key).map(Json).ok_or(MapError::KeyNotFound(key))
}

async fn remove_handler(
    State(service): State<MemoryService>,
    Path((database, map, key)): Path<(String, String, String)>,
) -> Result<Json<RemoveResponse>, MapError> {
    service.simulate().await?;
    let state = lookup(&service, &database, &map)?;
    Ok(Json(RemoveResponse {
        removed: state.remove(&key),
    }))
}

async fn watch_handler(
    State(service): State<MemoryService>,
    Path((database, map)): Path<(String, String)>,
) -> Result<Response, MapError> {
    service.simulate().await?;
    let state = lookup(&service, &database, &map)?;
    // Subscribe before the response head goes out
    let events = state.subscribe();
    Ok(ndjson_response(events))
}

async fn entries_handler(
    State(service): State<MemoryService>,
    Path((database, map)): Path<(String, String)>,
) -> Result<Response, MapError> {
    service.simulate().await?;
    let state = lookup(&service, &database, &map)?;
    let snapshot = state.snapshot();
    tracing::debug!(database = %database, map = %map, entries = snapshot.len(), "Scanning map");
    Ok(ndjson_response(stream::iter(snapshot.into_iter().map(Ok)).boxed()))
}
