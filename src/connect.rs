//! Drives one non-blocking connect attempt to completion: `PQconnectdbParams`
//! with the connection string bound to the single `dbname` keyword (libpq
//! documents that `dbname` may itself be a full connection string), then a
//! `PQconnectPoll` loop translated onto socket-readiness waits.

use std::ffi::CString;
use std::os::fd::RawFd;

use libpq_sys::{ConnStatusType, PGconn, PostgresPollingStatusType};

use crate::error::{Error, Result};
use crate::socket::PgSocket;

/// The outcome of a successful connect: the raw handle plus the socket
/// registered around its final fd.
pub(crate) struct Connected {
    pub(crate) conn: *mut PGconn,
    pub(crate) socket: PgSocket,
}

// Safety: ownership of `conn` moves to the caller once `connect` returns;
// nothing else touches it concurrently.
unsafe impl Send for Connected {}

/// Runs the full connect protocol against `conn_str` (a complete libpq
/// connection string, not a literal database name).
// Safety: ownership of the wrapped pointer moves with the wrapper; nothing
// else touches it concurrently while it is held across an await point.
struct SendConn(*mut PGconn);
unsafe impl Send for SendConn {}

pub(crate) async fn connect(conn_str: &str, log_id: u64) -> Result<Connected> {
    let raw = {
        let keywords = [c"dbname".as_ptr(), std::ptr::null()];
        let conn_str_c = CString::new(conn_str)
            .map_err(|_| Error::connect_failed("connection string contains NUL"))?;
        let values = [conn_str_c.as_ptr(), std::ptr::null()];

        SendConn(unsafe { libpq_sys::PQconnectdbParams(keywords.as_ptr(), values.as_ptr(), 1) })
    };
    if raw.0.is_null() {
        return Err(Error::ConnAllocateFailed);
    }

    let mut socket = match PgSocket::new(current_fd(raw.0)) {
        Ok(s) => s,
        Err(e) => {
            unsafe { libpq_sys::PQfinish(raw.0) };
            return Err(e);
        }
    };

    loop {
        let status = unsafe { libpq_sys::PQconnectPoll(raw.0) };

        if status != PostgresPollingStatusType::PGRES_POLLING_FAILED {
            let fd = current_fd(raw.0);
            if fd != socket.raw_fd() {
                tracing::debug!(conn.id = log_id, "connection socket changed during connect");
                socket = match PgSocket::new(fd) {
                    Ok(s) => s,
                    Err(e) => {
                        unsafe { libpq_sys::PQfinish(raw.0) };
                        return Err(e);
                    }
                };
            }
        }

        match status {
            PostgresPollingStatusType::PGRES_POLLING_READING => {
                if let Err(e) = socket.wait_readable().await {
                    unsafe { libpq_sys::PQfinish(raw.0) };
                    return Err(e);
                }
            }
            PostgresPollingStatusType::PGRES_POLLING_WRITING => {
                if let Err(e) = socket.wait_writable().await {
                    unsafe { libpq_sys::PQfinish(raw.0) };
                    return Err(e);
                }
            }
            PostgresPollingStatusType::PGRES_POLLING_OK => {
                tracing::info!(conn.id = log_id, "connection established");
                return Ok(Connected { conn: raw.0, socket });
            }
            _ => {
                let message = error_message(raw.0);
                tracing::error!(conn.id = log_id, %message, "connect failed");
                unsafe { libpq_sys::PQfinish(raw.0) };
                return Err(Error::connect_failed(message));
            }
        }
    }
}

fn current_fd(conn: *mut PGconn) -> RawFd {
    unsafe { libpq_sys::PQsocket(conn) }
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

/// Returns whether `conn`'s status is `CONNECTION_OK`, used by
/// `Connection::is_ready`.
pub(crate) fn status_ok(conn: *mut PGconn) -> bool {
    unsafe { libpq_sys::PQstatus(conn) == ConnStatusType::CONNECTION_OK }
}
