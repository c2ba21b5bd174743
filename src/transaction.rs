//! Wraps a user-supplied async operation in `BEGIN ... COMMIT`/`ROLLBACK`
//! with guaranteed termination on every exit path.

use std::future::Future;

use crate::connection::Connection;
use crate::error::Result;

/// Isolation level for `Connection::transaction`. `Serializable` is the
/// default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionLevel {
    #[default]
    Serializable,
    RepeatableRead,
    ReadCommitted,
    ReadUncommitted,
}

impl TransactionLevel {
    pub fn as_sql(self) -> &'static str {
        match self {
            TransactionLevel::Serializable => "SERIALIZABLE",
            TransactionLevel::RepeatableRead => "REPEATABLE READ",
            TransactionLevel::ReadCommitted => "READ COMMITTED",
            TransactionLevel::ReadUncommitted => "READ UNCOMMITTED",
        }
    }
}

/// Runs `body` inside a transaction on `conn`.
///
/// Exactly one of `END` or `ROLLBACK` is issued along every path: success
/// commits and returns the body's value; failure rolls back and
/// re-surfaces the body's error (a rollback-specific failure is logged but
/// never replaces the original error).
///
/// `body` receives a reborrow of `conn` rather than capturing it, since a
/// closure capturing `&mut Connection` could not coexist with the `&mut
/// Connection` this function itself holds for the duration of the call.
pub(crate) async fn run<F, T>(conn: &mut Connection, level: TransactionLevel, body: F) -> Result<T>
where
    F: AsyncFnOnce(&mut Connection) -> Result<T>,
{
    conn.start_transaction(level).await?;

    match body(conn).await {
        Ok(value) => {
            conn.commit().await?;
            Ok(value)
        }
        Err(body_err) => {
            if let Err(rollback_err) = conn.rollback().await {
                tracing::warn!(
                    conn.id = conn.id(),
                    error = %rollback_err,
                    "rollback failed after body error; original error still reported"
                );
            }
            Err(body_err)
        }
    }
}
