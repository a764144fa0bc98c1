//! Error types for the streaming engine

use std::fmt;

use thiserror::Error;

use crate::connection::ConnectionId;
use crate::transport::Transport;

/// Resource whose ceiling was hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Registry population
    Connections,
    /// Filters on one connection
    Filters,
    /// Ingestion queue
    IngestQueue,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connections => "connections",
            Self::Filters => "filters",
            Self::IngestQueue => "ingest queue",
        })
    }
}

/// Coarse classification callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CapacityExceeded,
    NotFound,
    Validation,
    Transport,
    NotRunning,
    State,
}

/// Errors that can occur in the streaming engine
#[derive(Error, Debug)]
pub enum StreamError {
    /// A configured ceiling was reached
    #[error("{resource} capacity exceeded (max {max})")]
    CapacityExceeded { resource: Resource, max: usize },

    /// Unknown connection on an administrative call
    #[error("connection not found: {id}")]
    ConnectionNotFound { id: ConnectionId },

    /// Unknown filter name on a connection
    #[error("filter not found: {name}")]
    FilterNotFound { name: String },

    /// Structurally invalid input (filter, control message)
    #[error("validation failed: {0}")]
    Validation(String),

    /// Read/write failure on a connection's channel
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed JSON on the wire
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    /// Call made while the streamer is stopped
    #[error("streamer not running")]
    NotRunning,

    /// Start called on a running streamer
    #[error("streamer already running")]
    AlreadyRunning,
}

impl StreamError {
    /// Create a Validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a Transport error
    pub fn transport(message: impl fmt::Display) -> Self {
        Self::Transport(message.to_string())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Self::ConnectionNotFound { .. } | Self::FilterNotFound { .. } => ErrorKind::NotFound,
            Self::Validation(_) | Self::Json(_) => ErrorKind::Validation,
            Self::Transport(_) => ErrorKind::Transport,
            Self::NotRunning => ErrorKind::NotRunning,
            Self::AlreadyRunning => ErrorKind::State,
        }
    }

    /// Short machine-readable code used in `error` envelopes
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::CapacityExceeded => "capacity_exceeded",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::Transport => "transport",
            ErrorKind::NotRunning => "not_running",
            ErrorKind::State => "invalid_state",
        }
    }
}

/// Result type for streaming operations
pub type Result<T> = std::result::Result<T, StreamError>;

/// Rejected connection attempt
///
/// Hands the channel back so the calling layer can report the failure
/// (e.g. as service unavailable) and close it.
#[derive(Error)]
#[error("{error}")]
pub struct ConnectError {
    /// Why registration failed
    pub error: StreamError,
    /// The unregistered channel
    pub transport: Transport,
}

impl fmt::Debug for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectError")
            .field("error", &self.error)
            .field("remote_addr", &self.transport.remote_addr())
            .finish()
    }
}
