//! Broker error types

use thiserror::Error;

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors surfaced by the creation broker.
///
/// `Conflict`, `UnknownResponse` and `PoolExhausted` are structured
/// rejections that map to specific NAK codes on the wire; they are never
/// silently dropped. `Malformed` covers undecodable frames and payloads.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// A log with this name has already been admitted
    #[error("log already exists")]
    Conflict,

    /// A response arrived for an unknown or already-acknowledged request
    #[error("unknown or already-acknowledged request id {0}")]
    UnknownResponse(i64),

    /// No database connection became free within the retry budget
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Frame or payload that could not be decoded
    #[error("malformed input: {0}")]
    Malformed(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BrokerError {
    /// Map a database failure, folding unique-constraint violations into
    /// the structured `Conflict` rejection
    pub(crate) fn from_db(error: libsql::Error) -> Self {
        let message = error.to_string();
        if message.contains("UNIQUE constraint failed") {
            Self::Conflict
        } else {
            Self::Database(message)
        }
    }
}
