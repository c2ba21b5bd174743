//! Drives one parameterized query to completion: a four-state machine
//! (`starting -> writing -> reading -> done`) built from
//! `PQsendQueryParams`, `PQflush`, `PQconsumeInput`, `PQisBusy`, and a
//! drain loop over `PQgetResult`.

use libpq_sys::PGconn;

use crate::error::{Error, Result};
use crate::query::Query;
use crate::result::PgResult;
use crate::socket::PgSocket;

/// Runs the send/flush/read/drain protocol for `query` against `conn`.
///
/// On any failure except allocation at the FFI boundary, the caller is
/// expected to disconnect the owning `Connection` — this driver does not
/// own the connection's lifecycle, only one query's worth of I/O.
pub(crate) async fn run_query(
    conn: *mut PGconn,
    socket: &PgSocket,
    query: &Query,
    log_id: u64,
) -> Result<Vec<PgResult>> {
    tracing::trace!(conn.id = log_id, "sending query");

    let raw_params = query.raw_params();
    let sent = unsafe {
        libpq_sys::PQsendQueryParams(
            conn,
            query.command_cstr().as_ptr(),
            raw_params.len(),
            std::ptr::null(),
            raw_params.values_ptr(),
            raw_params.lengths_ptr(),
            raw_params.formats_ptr(),
            0,
        )
    };
    if sent != 1 {
        let message = error_message(conn);
        tracing::error!(conn.id = log_id, %message, "send query failed");
        return Err(Error::query_failed(message));
    }

    // writing
    loop {
        let flush_res = unsafe { libpq_sys::PQflush(conn) };
        match flush_res {
            -1 => {
                let message = error_message(conn);
                tracing::error!(conn.id = log_id, %message, "query flush failed");
                return Err(Error::network(message));
            }
            1 => {
                socket.wait_writable().await?;
                continue;
            }
            _ => break, // 0: fully flushed, move on to reading
        }
    }

    // reading
    loop {
        if unsafe { libpq_sys::PQconsumeInput(conn) } == 0 {
            let message = error_message(conn);
            tracing::error!(conn.id = log_id, %message, "consume input failed");
            return Err(Error::query_failed(message));
        }

        if unsafe { libpq_sys::PQisBusy(conn) } == 0 {
            tracing::debug!(conn.id = log_id, "query complete");
            let mut results = Vec::new();
            loop {
                let raw = unsafe { libpq_sys::PQgetResult(conn) };
                if raw.is_null() {
                    break;
                }
                results.push(unsafe { PgResult::from_raw(raw) });
            }
            // A successful send that drains zero results (a connection
            // torn down between send and read) is a non-fatal anomaly,
            // not an error — the caller's next query surfaces it.
            return Ok(results);
        }

        socket.wait_readable().await?;
    }
}

fn error_message(conn: *mut PGconn) -> String {
    unsafe {
        let ptr = libpq_sys::PQerrorMessage(conn);
        if ptr.is_null() {
            String::new()
        } else {
            std::ffi::CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    }
}
