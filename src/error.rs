// Error handling module
// Defines map client errors, benchmark error kinds and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Errors returned by a map service, local or remote
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MapError {
    /// The requested key has no entry
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// The requested database does not exist
    #[error("Database not found: {0}")]
    DatabaseNotFound(String),

    /// The map handle was closed
    #[error("Map is closed")]
    Closed,

    /// The service refused or could not serve the request
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The request was malformed
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// Network or protocol failure between client and service
    #[error("Transport error: {0}")]
    Transport(String),

    /// Internal service error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MapError {
    /// Wire name of the error type
    pub fn type_name(&self) -> &'static str {
        match self {
            MapError::KeyNotFound(_) => "key_not_found",
            MapError::DatabaseNotFound(_) => "database_not_found",
            MapError::Closed => "closed",
            MapError::Unavailable(_) => "unavailable",
            MapError::Invalid(_) => "invalid",
            MapError::Transport(_) => "transport",
            MapError::Internal(_) => "internal",
        }
    }

    /// HTTP status used when the error crosses the wire
    pub fn status(&self) -> StatusCode {
        match self {
            MapError::KeyNotFound(_) | MapError::DatabaseNotFound(_) => StatusCode::NOT_FOUND,
            MapError::Closed => StatusCode::GONE,
            MapError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            MapError::Invalid(_) => StatusCode::BAD_REQUEST,
            MapError::Transport(_) => StatusCode::BAD_GATEWAY,
            MapError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Rebuild an error from a wire type name and message.
    ///
    /// Unknown type names fall back to the HTTP status class.
    pub fn from_wire(status: StatusCode, error_type: &str, message: String) -> Self {
        match error_type {
            "key_not_found" => MapError::KeyNotFound(message),
            "database_not_found" => MapError::DatabaseNotFound(message),
            "closed" => MapError::Closed,
            "unavailable" => MapError::Unavailable(message),
            "invalid" => MapError::Invalid(message),
            "transport" => MapError::Transport(message),
            "internal" => MapError::Internal(message),
            _ if status == StatusCode::SERVICE_UNAVAILABLE => MapError::Unavailable(message),
            _ if status.is_client_error() => MapError::Invalid(message),
            _ => MapError::Internal(format!("{} - {}", status, message)),
        }
    }

    fn message(&self) -> String {
        match self {
            MapError::KeyNotFound(m)
            | MapError::DatabaseNotFound(m)
            | MapError::Unavailable(m)
            | MapError::Invalid(m)
            | MapError::Transport(m)
            | MapError::Internal(m) => m.clone(),
            MapError::Closed => "map is closed".to_string(),
        }
    }
}

impl From<reqwest::Error> for MapError {
    fn from(err: reqwest::Error) -> Self {
        MapError::Transport(err.to_string())
    }
}

impl IntoResponse for MapError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, "Map operation failed");
        }

        let body = Json(json!({
            "error": {
                "message": self.message(),
                "type": self.type_name(),
            }
        }));

        (status, body).into_response()
    }
}

/// Failure classes a benchmark run distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Provisioning,
    Setup,
    Operation,
    Subscription,
    Timeout,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Config => write!(f, "config"),
            ErrorKind::Provisioning => write!(f, "provisioning"),
            ErrorKind::Setup => write!(f, "setup"),
            ErrorKind::Operation => write!(f, "operation"),
            ErrorKind::Subscription => write!(f, "subscription"),
            ErrorKind::Timeout => write!(f, "timeout"),
        }
    }
}

/// Errors surfaced by the benchmark lifecycle
#[derive(Error, Debug)]
pub enum BenchError {
    /// The run configuration is unusable; nothing is started
    #[error("Invalid configuration: {0}")]
    Config(#[source] anyhow::Error),

    /// Installing the service or its storage failed; aborts the whole run
    #[error("Provisioning failed: {0}")]
    Provisioning(#[source] anyhow::Error),

    /// Discovery, connection or map acquisition failed; aborts one benchmark for one worker
    #[error("Setup failed: {0}")]
    Setup(String),

    /// A benchmarked operation failed; reported per iteration
    #[error("Operation failed: {0}")]
    Operation(#[from] MapError),

    /// The change subscription could not be established or was lost
    #[error("Subscription failed: {0}")]
    Subscription(#[source] MapError),

    /// A bounded wait elapsed without the expected event
    #[error("event timeout")]
    EventTimeout,
}

impl BenchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BenchError::Config(_) => ErrorKind::Config,
            BenchError::Provisioning(_) => ErrorKind::Provisioning,
            BenchError::Setup(_) => ErrorKind::Setup,
            BenchError::Operation(_) => ErrorKind::Operation,
            BenchError::Subscription(_) => ErrorKind::Subscription,
            BenchError::EventTimeout => ErrorKind::Timeout,
        }
    }

    /// Fatal errors end the current benchmark for the worker (or the run, for provisioning).
    /// Everything else is an ordinary failed iteration.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BenchError::Operation(_) | BenchError::EventTimeout)
    }
}

/// Result type alias for benchmark operations
pub type Result<T> = std::result::Result<T, BenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = MapError::KeyNotFound("abc".to_string());
        assert_eq!(err.to_string(), "Key not found: abc");

        let err = MapError::Closed;
        assert_eq!(err.to_string(), "Map is closed");

        let err = BenchError::EventTimeout;
        assert_eq!(err.to_string(), "event timeout");

        let err = BenchError::Operation(MapError::Unavailable("busy".to_string()));
        assert_eq!(err.to_string(), "Operation failed: Service unavailable: busy");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(BenchError::EventTimeout.kind(), ErrorKind::Timeout);
        assert_eq!(
            BenchError::Setup("no address".to_string()).kind(),
            ErrorKind::Setup
        );
        assert_eq!(
            BenchError::Subscription(MapError::Closed).kind(),
            ErrorKind::Subscription
        );
        assert_eq!(
            BenchError::Provisioning(anyhow::anyhow!("helm failed")).kind(),
            ErrorKind::Provisioning
        );
        assert_eq!(
            BenchError::Config(anyhow::anyhow!("no keys")).kind(),
            ErrorKind::Config
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(!BenchError::EventTimeout.is_fatal());
        assert!(!BenchError::Operation(MapError::Closed).is_fatal());
        assert!(BenchError::Subscription(MapError::Closed).is_fatal());
        assert!(BenchError::Setup("x".to_string()).is_fatal());
        assert!(BenchError::Provisioning(anyhow::anyhow!("x")).is_fatal());
    }

    #[test]
    fn test_wire_round_trip_preserves_kind() {
        let errors = vec![
            MapError::KeyNotFound("k".to_string()),
            MapError::DatabaseNotFound("db".to_string()),
            MapError::Closed,
            MapError::Unavailable("busy".to_string()),
            MapError::Invalid("bad".to_string()),
            MapError::Internal("boom".to_string()),
        ];
        for err in errors {
            let rebuilt = MapError::from_wire(err.status(), err.type_name(), err.message());
            assert_eq!(rebuilt, err);
        }
    }

    #[test]
    fn test_from_wire_unknown_type_uses_status() {
        let err = MapError::from_wire(StatusCode::SERVICE_UNAVAILABLE, "", "down".to_string());
        assert_eq!(err, MapError::Unavailable("down".to_string()));

        let err = MapError::from_wire(StatusCode::UNPROCESSABLE_ENTITY, "", "nope".to_string());
        assert_eq!(err, MapError::Invalid("nope".to_string()));
    }

    #[tokio::test]
    async fn test_error_response_conversion() {
        let response = MapError::KeyNotFound("k".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = MapError::Closed.into_response();
        assert_eq!(response.status(), StatusCode::GONE);

        let response = MapError::Unavailable("x".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = MapError::Internal("x".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
