//! Async PostgreSQL client core built directly on libpq's non-blocking API.
//!
//! Connections are driven by hand through `PQconnectPoll`/`PQsendQueryParams`
//! rather than through libpq's blocking calls, with Tokio's reactor standing
//! in for select/poll. The crate never installs a `tracing` subscriber of
//! its own — wire one up in the binary that embeds this crate.

pub mod config;
pub mod connection;
pub mod error;
pub mod ids;
pub mod migration;
pub mod options;
pub mod pool;
pub mod query;
pub mod result;
pub mod transaction;
pub mod value;

mod connect;
mod query_driver;
mod socket;

pub use connection::Connection;
pub use error::{Error, Result};
pub use migration::Migrator;
pub use options::ConnectionOptions;
pub use pool::{ConnectionFactory, ConnectionHandle, ConnectionPool, PgConnectionFactory, PoolConnection, PoolMax, PoolStats};
pub use query::{BindParams, Query};
pub use result::{ColumnDescriptor, Header, PgResult, Row, RowIter};
pub use transaction::TransactionLevel;
pub use value::{AbstractField, Field, FieldConverter, FieldView, Format};
