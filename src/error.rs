//! Error taxonomy for the core.
//!
//! One `thiserror`-derived enum covers the connect driver, query driver,
//! pool, and migration runner, plus the mechanical conversions the FFI and
//! JSON boundaries need.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// libpq could not allocate a `PGconn`.
    #[error("failed to allocate PGconn")]
    ConnAllocateFailed,

    /// `PQconnectPoll` terminated in `PGRES_POLLING_FAILED`.
    #[error("connect failed: {message}")]
    ConnectFailed { message: String },

    /// Send returned 0, consume returned 0, or the result status indicates
    /// an error.
    #[error("query failed: {message}")]
    QueryFailed { message: String },

    /// `PQflush` returned -1, or the socket wait itself failed.
    #[error("network error: {message}")]
    NetworkError { message: String },

    /// The migrations directory does not exist or is not a directory.
    #[error("invalid migrations directory: {path}")]
    InvalidMigrationsDir { path: String },

    /// A header lookup by name or a converter found nothing to return.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// Invalid configuration value.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("network IO error")]
    Io(#[from] std::io::Error),

    #[error("connection string contained an interior NUL byte")]
    Nul(#[from] std::ffi::NulError),

    #[error("configuration JSON error")]
    Json(#[from] serde_json::Error),

    /// The connection pool's actor task has shut down.
    #[error("connection pool closed")]
    PoolClosed,
}

impl Error {
    pub fn connect_failed<S: Into<String>>(message: S) -> Self {
        Self::ConnectFailed {
            message: message.into(),
        }
    }

    pub fn query_failed<S: Into<String>>(message: S) -> Self {
        Self::QueryFailed {
            message: message.into(),
        }
    }

    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Stable category name used in log messages.
    pub fn category(&self) -> &'static str {
        match self {
            Error::ConnAllocateFailed => "conn_allocate_failed",
            Error::ConnectFailed { .. } => "connect_failed",
            Error::QueryFailed { .. } => "query_failed",
            Error::NetworkError { .. } => "network_error",
            Error::InvalidMigrationsDir { .. } => "invalid_migrations_dir",
            Error::NotFound { .. } => "not_found",
            Error::Configuration { .. } => "configuration",
            Error::Io(_) => "io",
            Error::Nul(_) => "nul",
            Error::Json(_) => "json",
            Error::PoolClosed => "pool_closed",
        }
    }
}
