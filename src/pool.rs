//! Bounded, self-refilling set of live connections with a FIFO waiter
//! queue, safe recycling on release, and a background replenishment loop.
//!
//! All pool state (`idle`, `waiters`, `live_count`) lives on a single Tokio
//! task driven by an `mpsc` command channel, so every mutation runs
//! serialized with no mutex anywhere in the hot path. `ConnectionPool`
//! itself is a cheap `Clone` handle around that channel's sender, the same
//! shape `sqlx::Pool` uses for its own shared pool handle.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::connection::Connection;
use crate::error::{Error, Result};

/// Ceiling on live connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMax {
    Bounded(usize),
    Unbounded,
}

impl PoolMax {
    fn allows(self, live_count: usize) -> bool {
        match self {
            PoolMax::Bounded(n) => live_count < n,
            PoolMax::Unbounded => true,
        }
    }
}

/// A point-in-time snapshot of pool bookkeeping, useful for tests and
/// diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub live_count: usize,
    pub idle_count: usize,
    pub waiting: usize,
}

/// Something that can produce a ready `Connection`-shaped value. The
/// default is `PgConnectionFactory`, which drives a real libpq connect;
/// tests substitute a fake that never touches a socket.
pub trait ConnectionFactory: Clone + Send + Sync + 'static {
    type Connection: PoolConnection;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection>> + Send;
}

/// The subset of `Connection`'s surface the pool needs to manage one.
pub trait PoolConnection: Send + 'static {
    fn id(&self) -> u64;
    fn is_ready(&self) -> bool;
}

impl PoolConnection for Connection {
    fn id(&self) -> u64 {
        Connection::id(self)
    }

    fn is_ready(&self) -> bool {
        Connection::is_ready(self)
    }
}

/// Builds real libpq connections for a fixed connection string.
#[derive(Clone)]
pub struct PgConnectionFactory {
    conn_str: String,
}

impl PgConnectionFactory {
    pub fn new(conn_str: impl Into<String>) -> Self {
        Self {
            conn_str: conn_str.into(),
        }
    }
}

impl ConnectionFactory for PgConnectionFactory {
    type Connection = Connection;

    async fn connect(&self) -> Result<Connection> {
        let mut conn = Connection::new(self.conn_str.clone());
        conn.connect().await?;
        Ok(conn)
    }
}

enum PoolCmd<C: PoolConnection> {
    Get(oneshot::Sender<ConnectionHandle<C>>),
    Ready(C),
    Lost,
    Stats(oneshot::Sender<PoolStats>),
}

/// A shared pool handle. Cloning is cheap (it clones an `mpsc::Sender`);
/// the pool's background actor task runs until every clone — and the
/// original — are dropped.
pub struct ConnectionPool<F: ConnectionFactory> {
    cmd_tx: mpsc::UnboundedSender<PoolCmd<F::Connection>>,
}

impl<F: ConnectionFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
        }
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Creates a pool and spawns its actor task, which immediately starts
    /// working toward `live_count >= min`.
    pub fn new(factory: F, min: usize, max: PoolMax) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let weak_tx = cmd_tx.downgrade();
        tokio::spawn(run_actor(cmd_rx, weak_tx, factory, min, max));
        Self { cmd_tx }
    }

    /// Acquires a connection, waiting in FIFO order if none are idle.
    pub async fn get(&self) -> Result<ConnectionHandle<F::Connection>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(PoolCmd::Get(reply_tx))
            .map_err(|_| Error::PoolClosed)?;
        reply_rx.await.map_err(|_| Error::PoolClosed)
    }

    /// Snapshot of `live_count`/`idle_count`/`waiting`, for diagnostics and
    /// tests.
    pub async fn stats(&self) -> Result<PoolStats> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(PoolCmd::Stats(reply_tx))
            .map_err(|_| Error::PoolClosed)?;
        reply_rx.await.map_err(|_| Error::PoolClosed)
    }
}

impl ConnectionPool<PgConnectionFactory> {
    /// Convenience constructor for the common case: pool real libpq
    /// connections built from one connection string.
    pub fn connect(conn_str: impl Into<String>, min: usize, max: PoolMax) -> Self {
        Self::new(PgConnectionFactory::new(conn_str), min, max)
    }
}

/// A connection checked out of the pool. Dropping it recycles the
/// connection if it is still ready, or destroys it and notifies the pool
/// of the loss — idempotently and safely from any task, since the drop
/// path is a non-blocking send on an unbounded channel, never an await.
pub struct ConnectionHandle<C: PoolConnection> {
    inner: Option<C>,
    weak_tx: mpsc::WeakUnboundedSender<PoolCmd<C>>,
}

impl<C: PoolConnection> ConnectionHandle<C> {
    fn into_inner(mut self) -> C {
        self.inner.take().expect("handle already consumed")
    }
}

impl<C: PoolConnection> std::ops::Deref for ConnectionHandle<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.inner.as_ref().expect("handle used after release")
    }
}

impl<C: PoolConnection> std::ops::DerefMut for ConnectionHandle<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.inner.as_mut().expect("handle used after release")
    }
}

impl<C: PoolConnection> Drop for ConnectionHandle<C> {
    fn drop(&mut self) {
        let Some(conn) = self.inner.take() else {
            return;
        };
        let ready = conn.is_ready();
        match self.weak_tx.upgrade() {
            Some(tx) if ready => {
                let _ = tx.send(PoolCmd::Ready(conn));
            }
            Some(tx) => {
                tracing::warn!(conn.id = conn.id(), "connection not ready, dropping and notifying pool");
                drop(conn);
                let _ = tx.send(PoolCmd::Lost);
            }
            None => drop(conn), // pool is gone; nothing left to notify
        }
    }
}

fn make_handle<C: PoolConnection>(
    conn: C,
    weak_tx: &mpsc::WeakUnboundedSender<PoolCmd<C>>,
) -> ConnectionHandle<C> {
    ConnectionHandle {
        inner: Some(conn),
        weak_tx: weak_tx.clone(),
    }
}

/// Hands `conn` to the oldest waiting acquirer, or stores it idle if the
/// idle set is under `min`, or drops it as surplus. Returns `true` if the
/// connection was kept alive in some form (handed out or idled).
fn place_ready_connection<C: PoolConnection>(
    mut conn: C,
    idle: &mut HashMap<u64, C>,
    waiters: &mut VecDeque<oneshot::Sender<ConnectionHandle<C>>>,
    weak_tx: &mpsc::WeakUnboundedSender<PoolCmd<C>>,
    min: usize,
) -> bool {
    while let Some(waiter) = waiters.pop_front() {
        match waiter.send(make_handle(conn, weak_tx)) {
            Ok(()) => return true,
            // The acquirer's future was dropped (cancellation); reclaim
            // the connection and offer it to the next waiter in line.
            Err(handle) => conn = handle.into_inner(),
        }
    }
    if idle.len() < min {
        idle.insert(conn.id(), conn);
        true
    } else {
        tracing::trace!(conn.id = conn.id(), "pool full, dropping surplus connection");
        false
    }
}

/// Reports a spawned connect attempt's outcome back to the actor, if it's
/// still around to hear it. Holding only a weak sender here is what lets
/// the actor task — and therefore this spawned task's eventual send —
/// wind down once every external `ConnectionPool` handle is dropped,
/// instead of the actor's own fan-out keeping the channel open forever.
fn report_outcome<C: PoolConnection>(weak_tx: &mpsc::WeakUnboundedSender<PoolCmd<C>>, cmd: PoolCmd<C>) {
    if let Some(tx) = weak_tx.upgrade() {
        let _ = tx.send(cmd);
    }
}

fn spawn_create_once<F: ConnectionFactory>(
    factory: &F,
    weak_tx: &mpsc::WeakUnboundedSender<PoolCmd<F::Connection>>,
) {
    let factory = factory.clone();
    let weak_tx = weak_tx.clone();
    tokio::spawn(async move {
        match factory.connect().await {
            Ok(conn) => report_outcome(&weak_tx, PoolCmd::Ready(conn)),
            Err(e) => {
                tracing::error!(error = %e, "connection creation failed");
                report_outcome(&weak_tx, PoolCmd::Lost);
            }
        }
    });
}

/// Like `spawn_create_once`, but used by the replenishment path: on
/// failure it sleeps 3s before reporting the loss, so the next
/// replenishment attempt is naturally rate-limited instead of spinning
/// against an unavailable database.
fn spawn_replenish_attempt<F: ConnectionFactory>(
    factory: F,
    weak_tx: mpsc::WeakUnboundedSender<PoolCmd<F::Connection>>,
) {
    tokio::spawn(async move {
        match factory.connect().await {
            Ok(conn) => report_outcome(&weak_tx, PoolCmd::Ready(conn)),
            Err(e) => {
                tracing::error!(error = %e, "replenishment attempt failed, retrying in 3s");
                tokio::time::sleep(Duration::from_secs(3)).await;
                report_outcome(&weak_tx, PoolCmd::Lost);
            }
        }
    });
}

/// Spawns one more connect attempt if `live_count` is still below `min`.
/// Reserves the slot synchronously (incrementing `live_count`) so a burst
/// of calls can never spawn more attempts than are actually needed to
/// reach `min` — no "currently filling" flag is needed because the
/// reservation itself is what prevents a storm.
fn maybe_refill<F: ConnectionFactory>(
    live_count: &mut usize,
    min: usize,
    max: PoolMax,
    factory: &F,
    weak_tx: &mpsc::WeakUnboundedSender<PoolCmd<F::Connection>>,
) {
    if *live_count < min && max.allows(*live_count) {
        spawn_replenish_attempt(factory.clone(), weak_tx.clone());
        *live_count += 1;
    }
}

/// Owns all mutable pool state and runs until every external
/// `ConnectionPool` handle referencing `weak_tx`'s channel is dropped. The
/// actor never keeps a strong sender for itself — only `weak_tx`, used to
/// hand results from its own spawned connect attempts back to the
/// `cmd_rx.recv()` loop below — so the last external drop reliably closes
/// the channel and ends this task, instead of the actor's own handle
/// keeping it open forever.
async fn run_actor<F: ConnectionFactory>(
    mut cmd_rx: mpsc::UnboundedReceiver<PoolCmd<F::Connection>>,
    weak_tx: mpsc::WeakUnboundedSender<PoolCmd<F::Connection>>,
    factory: F,
    min: usize,
    max: PoolMax,
) {
    let mut idle: HashMap<u64, F::Connection> = HashMap::new();
    let mut waiters: VecDeque<oneshot::Sender<ConnectionHandle<F::Connection>>> = VecDeque::new();
    let mut live_count: usize = 0;

    maybe_refill(&mut live_count, min, max, &factory, &weak_tx);

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            PoolCmd::Get(reply) => {
                if let Some(&id) = idle.keys().next() {
                    let conn = idle.remove(&id).expect("key just observed present");
                    let _ = reply.send(make_handle(conn, &weak_tx));
                } else {
                    waiters.push_back(reply);
                    if max.allows(live_count) {
                        live_count += 1;
                        spawn_create_once(&factory, &weak_tx);
                    }
                }
            }
            PoolCmd::Ready(conn) => {
                if !place_ready_connection(conn, &mut idle, &mut waiters, &weak_tx, min) {
                    live_count = live_count.saturating_sub(1);
                }
                maybe_refill(&mut live_count, min, max, &factory, &weak_tx);
            }
            PoolCmd::Lost => {
                live_count = live_count.saturating_sub(1);
                tracing::debug!(live_count, idle = idle.len(), "connection lost");
                maybe_refill(&mut live_count, min, max, &factory, &weak_tx);
            }
            PoolCmd::Stats(reply) => {
                let _ = reply.send(PoolStats {
                    live_count,
                    idle_count: idle.len(),
                    waiting: waiters.len(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use super::*;

    #[derive(Clone)]
    struct FakeFactory {
        next_id: Arc<AtomicU64>,
        fail_next: Arc<std::sync::atomic::AtomicBool>,
    }

    impl FakeFactory {
        fn new() -> Self {
            Self {
                next_id: Arc::new(AtomicU64::new(1)),
                fail_next: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            }
        }
    }

    struct FakeConnection {
        id: u64,
        ready: bool,
    }

    impl PoolConnection for FakeConnection {
        fn id(&self) -> u64 {
            self.id
        }

        fn is_ready(&self) -> bool {
            self.ready
        }
    }

    impl ConnectionFactory for FakeFactory {
        type Connection = FakeConnection;

        async fn connect(&self) -> Result<FakeConnection> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(Error::connect_failed("simulated failure"));
            }
            Ok(FakeConnection {
                id: self.next_id.fetch_add(1, Ordering::SeqCst),
                ready: true,
            })
        }
    }

    async fn wait_for_live_count<F: ConnectionFactory>(pool: &ConnectionPool<F>, at_least: usize) -> PoolStats {
        for _ in 0..200 {
            let stats = pool.stats().await.unwrap();
            if stats.live_count >= at_least {
                return stats;
            }
            tokio::task::yield_now().await;
        }
        panic!("live_count never reached {at_least}");
    }

    #[tokio::test]
    async fn pool_fills_to_min_on_startup() {
        let pool = ConnectionPool::new(FakeFactory::new(), 2, PoolMax::Unbounded);
        wait_for_live_count(&pool, 2).await;
    }

    #[tokio::test]
    async fn get_respects_max_bound_and_reuses_released_connection() {
        let pool = ConnectionPool::new(FakeFactory::new(), 0, PoolMax::Bounded(2));

        let h1 = pool.get().await.unwrap();
        let h2 = pool.get().await.unwrap();
        assert_ne!(h1.id(), h2.id());

        let stats = pool.stats().await.unwrap();
        assert_eq!(stats.live_count, 2);

        let pool2 = pool.clone();
        let third = tokio::spawn(async move { pool2.get().await });

        // give the spawned waiter a chance to enqueue
        tokio::task::yield_now().await;
        let stats = pool.stats().await.unwrap();
        assert_eq!(stats.waiting, 1);

        let released_id = h1.id();
        drop(h1);

        let h3 = third.await.unwrap().unwrap();
        assert_eq!(h3.id(), released_id);

        drop(h2);
        drop(h3);
    }

    #[tokio::test]
    async fn waiters_are_served_fifo() {
        let pool = ConnectionPool::new(FakeFactory::new(), 0, PoolMax::Bounded(1));
        let only = pool.get().await.unwrap();

        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();
        // Enqueue A strictly before B by sending directly on the pool's
        // own command channel, sidestepping executor scheduling order.
        pool.cmd_tx.send(PoolCmd::Get(tx_a)).unwrap();
        pool.cmd_tx.send(PoolCmd::Get(tx_b)).unwrap();

        tokio::task::yield_now().await;
        assert_eq!(pool.stats().await.unwrap().waiting, 2);

        drop(only);

        let a = rx_a.await.unwrap();
        assert!(rx_b.try_recv().is_err(), "B must not be served before A");
        drop(a);
        let _b = rx_b.await.unwrap();
    }

    #[tokio::test]
    async fn fifth_acquire_blocks_until_one_is_released() {
        let pool = ConnectionPool::new(FakeFactory::new(), 2, PoolMax::Bounded(4));
        wait_for_live_count(&pool, 4).await;

        let mut handles = Vec::new();
        for _ in 0..4 {
            handles.push(pool.get().await.unwrap());
        }
        assert_eq!(pool.stats().await.unwrap().live_count, 4);

        let pool2 = pool.clone();
        let fifth = tokio::spawn(async move { pool2.get().await });
        tokio::task::yield_now().await;
        assert_eq!(pool.stats().await.unwrap().waiting, 1, "fifth acquire must block");

        let released_id = handles[0].id();
        drop(handles.remove(0));

        let fifth = fifth.await.unwrap().unwrap();
        assert_eq!(fifth.id(), released_id, "fifth acquire reuses the released connection");
    }

    #[tokio::test]
    async fn lost_connection_triggers_replenishment() {
        let pool = ConnectionPool::new(FakeFactory::new(), 1, PoolMax::Unbounded);
        wait_for_live_count(&pool, 1).await;

        let mut h = pool.get().await.unwrap();
        h.ready = false;
        drop(h); // Drop sees is_ready() == false and reports the loss

        for _ in 0..200 {
            if pool.stats().await.unwrap().live_count == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }

        wait_for_live_count(&pool, 1).await;
    }
}
