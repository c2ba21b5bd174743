//! Owns a libpq handle and socket; exposes connect/query/transaction
//! operations.
//!
//! A `Connection` is single-owner: it is never placed behind a shared
//! reference while live, so only one task ever drives its query state
//! machine at a time, upheld by Rust's normal ownership rules rather than a
//! runtime lock.

use std::future::Future;

use libpq_sys::PGconn;

use crate::connect::{self, Connected};
use crate::error::{Error, Result};
use crate::ids::next_connection_id;
use crate::query::{BindParams, Query};
use crate::query_driver;
use crate::result::PgResult;
use crate::socket::PgSocket;
use crate::transaction::TransactionLevel;

/// A single PostgreSQL connection driven over libpq's non-blocking API.
pub struct Connection {
    id: u64,
    conn_str: String,
    native: Option<NativeConn>,
    in_transaction: bool,
}

struct NativeConn {
    conn: *mut PGconn,
    socket: PgSocket,
}

// Safety: the raw `PGconn*` is only ever touched from whichever task
// currently owns this `Connection`; it is never shared across tasks
// concurrently, only moved.
unsafe impl Send for NativeConn {}

impl Connection {
    /// Creates a not-yet-connected `Connection` for `conn_str` (a full
    /// libpq connection string).
    pub fn new(conn_str: impl Into<String>) -> Self {
        let id = next_connection_id();
        let conn_str = conn_str.into();
        tracing::trace!(conn.id = id, "connection created");
        Self {
            id,
            conn_str,
            native: None,
            in_transaction: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn conn_str(&self) -> &str {
        &self.conn_str
    }

    /// `ready = handle present ∧ socket present ∧ PQstatus = OK ∧ no open
    /// transaction`. A connection left with `BEGIN` sent but neither `END`
    /// nor `ROLLBACK` run — e.g. a `transaction()` call cancelled mid-body,
    /// which drops `run`'s future without ever reaching its rollback path —
    /// is not ready: callers (the pool in particular) must disconnect it
    /// rather than hand someone else a connection with a dangling open
    /// transaction.
    pub fn is_ready(&self) -> bool {
        match &self.native {
            Some(native) => connect::status_ok(native.conn) && !self.in_transaction,
            None => false,
        }
    }

    /// Runs the connect driver to completion. On success this connection's
    /// `is_ready()` becomes true; on failure the connection is left
    /// disconnected, as it started.
    pub async fn connect(&mut self) -> Result<()> {
        let Connected { conn, socket } = connect::connect(&self.conn_str, self.id).await?;
        self.native = Some(NativeConn { conn, socket });
        Ok(())
    }

    /// Runs one query to completion, returning every result libpq hands
    /// back (a multi-statement command can produce more than one).
    pub async fn query(&mut self, query: &Query) -> Result<Vec<PgResult>> {
        let native = self
            .native
            .as_ref()
            .ok_or_else(|| Error::network("connection is not ready"))?;

        match query_driver::run_query(native.conn, &native.socket, query, self.id).await {
            Ok(results) => Ok(results),
            Err(e) => {
                // Any query failure except the cooperative-cancellation
                // path (handled by the caller simply dropping this
                // future) disconnects the connection so the pool never
                // recycles a half-broken one.
                self.disconnect();
                Err(e)
            }
        }
    }

    /// Convenience: builds a `Query` from SQL text and positional
    /// parameters bound through the converter layer, then submits it.
    pub async fn query_with<P: BindParams>(&mut self, sql: &str, params: P) -> Result<Vec<PgResult>> {
        let query = Query::with_params(sql, params.into_fields());
        self.query(&query).await
    }

    pub async fn start_transaction(&mut self, level: TransactionLevel) -> Result<Vec<PgResult>> {
        tracing::trace!(conn.id = self.id, "start transaction");
        let cmd = format!("BEGIN TRANSACTION ISOLATION LEVEL {};", level.as_sql());
        let results = self.query(&Query::new(cmd)).await?;
        self.in_transaction = true;
        Ok(results)
    }

    pub async fn commit(&mut self) -> Result<Vec<PgResult>> {
        tracing::trace!(conn.id = self.id, "commit transaction");
        let results = self.query(&Query::new("END;")).await?;
        self.in_transaction = false;
        Ok(results)
    }

    pub async fn rollback(&mut self) -> Result<Vec<PgResult>> {
        tracing::trace!(conn.id = self.id, "rollback transaction");
        let results = self.query(&Query::new("ROLLBACK;")).await?;
        self.in_transaction = false;
        Ok(results)
    }

    /// Wraps `body` in `BEGIN ... COMMIT`/`ROLLBACK`, passing `body` a
    /// reborrow of this connection to run queries against. See
    /// `crate::transaction` for the combinator's contract.
    pub async fn transaction<F, T>(&mut self, level: TransactionLevel, body: F) -> Result<T>
    where
        F: AsyncFnOnce(&mut Connection) -> Result<T>,
    {
        crate::transaction::run(self, level, body).await
    }

    /// Closes the socket and finishes libpq. Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(native) = self.native.take() {
            tracing::info!(conn.id = self.id, "connection disconnected");
            unsafe { libpq_sys::PQfinish(native.conn) };
            // `native.socket`'s drop does not close the fd (libpq just
            // did, via PQfinish); it only deregisters from the reactor.
        }
        self.in_transaction = false;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
        tracing::trace!(conn.id = self.id, "connection destroyed");
    }
}
