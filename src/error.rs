//! Error types

use crate::protocol::DbError;
use std::io;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Client error
///
/// Errors are `Clone` because a single connection failure is delivered to the
/// connect waiter and to every queued query.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Transport failure before or after authentication
    #[error("connection error: {0}")]
    Connection(String),

    /// The connection was closed (by the server, by EOF, or by `close()`)
    #[error("connection closed")]
    ConnectionClosed,

    /// Authentication failed (unsupported mechanism, nonce or signature mismatch, ...)
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Malformed message or unexpected message sequencing
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Backend-reported ErrorResponse for a single query
    #[error("query failed: {0}")]
    Query(Box<DbError>),

    /// Caller misuse (bad placeholder index, non-finite number, ...)
    #[error("usage error: {0}")]
    Usage(String),

    /// Invalid configuration or connection string
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error leaves the connection unusable.
    ///
    /// Query and usage errors are isolated to one request; everything else
    /// tears the connection down.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Query(_) | Error::Usage(_))
    }

    /// Stable label for logs and metrics
    pub fn category(&self) -> &'static str {
        match self {
            Error::Connection(_) => "connection",
            Error::ConnectionClosed => "connection_closed",
            Error::Authentication(_) => "authentication",
            Error::Protocol(_) => "protocol",
            Error::Query(_) => "query",
            Error::Usage(_) => "usage",
            Error::Config(_) => "config",
        }
    }

    /// Backend error details, if this is a query error
    pub fn db_error(&self) -> Option<&DbError> {
        match self {
            Error::Query(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Error::ConnectionClosed,
            _ => Error::Connection(err.to_string()),
        }
    }
}

impl From<DbError> for Error {
    fn from(err: DbError) -> Self {
        Error::Query(Box::new(err))
    }
}
