//! An async socket bound to libpq's raw file descriptor.
//!
//! libpq owns the actual socket; this type only ever asks the OS "is this
//! fd readable/writable yet". Tokio's `AsyncFd` is the right tool here: it
//! registers a raw fd with the reactor without taking ownership of the
//! fd's lifecycle.

use std::os::fd::RawFd;

use tokio::io::unix::AsyncFd;

use crate::error::Result;

/// Wraps libpq's connection fd for readiness waits. Does not close the fd
/// on drop — libpq owns it and closes it via `PQfinish`.
pub struct PgSocket {
    inner: AsyncFd<BorrowedRawFd>,
}

/// A `RawFd` that intentionally implements `AsRawFd` without owning or
/// closing it, since `PQfinish` is responsible for the real close.
struct BorrowedRawFd(RawFd);

impl std::os::fd::AsRawFd for BorrowedRawFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl PgSocket {
    /// Registers `fd` with the reactor. Returns an error if the fd cannot
    /// be registered (e.g. the reactor is not running on this task).
    pub fn new(fd: RawFd) -> Result<Self> {
        Ok(Self {
            inner: AsyncFd::new(BorrowedRawFd(fd))?,
        })
    }

    pub fn raw_fd(&self) -> RawFd {
        self.inner.get_ref().0
    }

    /// Awaits read-readiness, then clears readiness so the next wait
    /// actually blocks until the OS reports new data.
    pub async fn wait_readable(&self) -> Result<()> {
        let mut guard = self.inner.readable().await?;
        guard.clear_ready();
        Ok(())
    }

    /// Awaits write-readiness, then clears readiness.
    pub async fn wait_writable(&self) -> Result<()> {
        let mut guard = self.inner.writable().await?;
        guard.clear_ready();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registers_and_waits_on_a_pipe() {
        let (read_fd, write_fd) = {
            let mut fds = [0i32; 2];
            let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
            assert_eq!(rc, 0);
            unsafe {
                let flags = libc::fcntl(fds[0], libc::F_GETFL, 0);
                libc::fcntl(fds[0], libc::F_SETFL, flags | libc::O_NONBLOCK);
                let flags = libc::fcntl(fds[1], libc::F_GETFL, 0);
                libc::fcntl(fds[1], libc::F_SETFL, flags | libc::O_NONBLOCK);
            }
            (fds[0], fds[1])
        };

        let read_socket = PgSocket::new(read_fd).unwrap();
        unsafe {
            libc::write(write_fd, b"x".as_ptr() as *const libc::c_void, 1);
        }
        read_socket.wait_readable().await.unwrap();

        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }
}
