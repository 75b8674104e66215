//! Error types for postrust-pubsub.

use thiserror::Error;

/// Result type for pub/sub operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the pub/sub client.
#[derive(Error, Debug)]
pub enum Error {
    /// A connection attempt failed (transient; the supervisor retries).
    #[error("connection error: {0}")]
    Connection(String),

    /// Reconnection was abandoned after exhausting `retry_limit` attempts.
    #[error("Connect failed after {attempts} retries, giving up")]
    RetriesExhausted { attempts: u32 },

    /// An underlying database error that isn't the `LOCKED` sentinel.
    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A handler was already installed where the protocol allows only one.
    #[error("a release handler is already installed for this lock")]
    HandlerAlreadyInstalled,

    /// Configuration was missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The pub/sub instance was used after `close()`/`destroy()` without reconnecting.
    #[error("pub/sub instance is closed")]
    Closed,
}
