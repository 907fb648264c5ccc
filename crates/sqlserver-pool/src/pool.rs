//! The bounded connection pool.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::manager::{ErrorDisposition, Manager};

/// A bounded pool of connections produced by a [`Manager`].
///
/// At most `max_connections` connections are live at any moment; callers
/// past that bound park in a FIFO waiter queue. The internal mutex guards
/// O(1) bookkeeping only — no I/O ever happens under it.
pub struct Pool<M: Manager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: Manager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct PoolInner<M: Manager> {
    manager: M,
    config: PoolConfig,
    state: Mutex<PoolState<M::Connection>>,
    /// Signalled when the last live connection drains after shutdown.
    drained: Notify,
}

struct PoolState<C> {
    idle: VecDeque<Parked<C>>,
    live: u32,
    waiters: VecDeque<oneshot::Sender<Option<C>>>,
    closed: bool,
}

struct Parked<C> {
    conn: C,
    since: Instant,
}

/// A point-in-time view of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Connections parked idle.
    pub idle: u32,
    /// Connections currently leased out.
    pub in_use: u32,
    /// Total live connections.
    pub live: u32,
    /// Configured ceiling.
    pub max: u32,
}

enum Plan<C> {
    Idle(C),
    Create,
    Wait(oneshot::Receiver<Option<C>>),
}

impl<M: Manager> Pool<M> {
    /// Build a pool and start its background reaper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(manager: M, config: PoolConfig) -> Result<Self, PoolError<M::Error>> {
        config.validate()?;

        let inner = Arc::new(PoolInner {
            manager,
            config,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                live: 0,
                waiters: VecDeque::new(),
                closed: false,
            }),
            drained: Notify::new(),
        });

        tokio::spawn(reaper(Arc::downgrade(&inner)));

        // Pre-warm the idle set; the reaper maintains it afterwards.
        let warm = inner.config.min_idle.min(inner.config.max_connections);
        if warm > 0 {
            inner.state.lock().live += warm;
            let warm_inner = Arc::clone(&inner);
            tokio::spawn(async move {
                fill_idle(&warm_inner, warm).await;
            });
        }

        Ok(Self { inner })
    }

    /// The pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// The manager's view of an error, for retry decisions.
    #[must_use]
    pub fn classify(&self, error: &M::Error) -> ErrorDisposition {
        self.inner.manager.classify(error)
    }

    /// Current occupancy.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            idle: state.idle.len() as u32,
            in_use: state.live - state.idle.len() as u32,
            live: state.live,
            max: self.inner.config.max_connections,
        }
    }

    /// Whether [`Pool::shutdown`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Lease a connection.
    ///
    /// Pops an idle connection (validating it first when configured), opens
    /// a new one below the ceiling, or parks in the waiter queue until a
    /// release or the acquire timeout.
    pub async fn acquire(&self) -> Result<Lease<M>, PoolError<M::Error>> {
        let deadline = tokio::time::Instant::now() + self.inner.config.acquire_timeout;

        loop {
            let plan = {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(PoolError::Closed);
                }
                if let Some(parked) = state.idle.pop_front() {
                    Plan::Idle(parked.conn)
                } else if state.live < self.inner.config.max_connections {
                    state.live += 1;
                    Plan::Create
                } else {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(tx);
                    Plan::Wait(rx)
                }
            };

            match plan {
                Plan::Idle(mut conn) => {
                    if !self.inner.manager.is_open(&conn) {
                        tracing::debug!("discarding dead idle connection");
                        self.inner.discard(conn);
                        continue;
                    }
                    if self.inner.config.validate_on_acquire {
                        if let Err(error) = self.inner.manager.validate(&mut conn).await {
                            tracing::warn!(%error, "idle connection failed validation");
                            self.inner.discard(conn);
                            continue;
                        }
                    }
                    return Ok(Lease::new(conn, Arc::clone(&self.inner)));
                }
                Plan::Create => match self.inner.manager.create().await {
                    Ok(conn) => {
                        tracing::debug!("opened new pooled connection");
                        return Ok(Lease::new(conn, Arc::clone(&self.inner)));
                    }
                    Err(error) => {
                        self.inner.forget_one();
                        return Err(PoolError::Create(error));
                    }
                },
                Plan::Wait(rx) => {
                    tracing::trace!("pool at capacity, waiting for a release");
                    match tokio::time::timeout_at(deadline, rx).await {
                        // Direct hand-off from a releasing lease.
                        Ok(Ok(Some(conn))) => {
                            return Ok(Lease::new(conn, Arc::clone(&self.inner)));
                        }
                        // Capacity freed (a connection was discarded); retry.
                        Ok(Ok(None)) => continue,
                        // Sender dropped, e.g. shutdown drained the queue.
                        Ok(Err(_)) => continue,
                        Err(_) => {
                            return Err(PoolError::AcquireTimeout(
                                self.inner.config.acquire_timeout,
                            ));
                        }
                    }
                }
            }
        }
    }

    /// Refuse new leases, drain waiters, close idles, and wait until every
    /// outstanding lease has been returned and dropped.
    pub async fn shutdown(&self) {
        let idles = {
            let mut state = self.inner.state.lock();
            if state.closed {
                None
            } else {
                state.closed = true;
                // Dropping the senders wakes every waiter, which then
                // observes `closed` and fails with `PoolError::Closed`.
                state.waiters.clear();
                let idles: Vec<_> = state.idle.drain(..).collect();
                state.live -= idles.len() as u32;
                Some(idles)
            }
        };
        drop(idles);
        tracing::info!("pool shutting down");

        loop {
            let notified = self.inner.drained.notified();
            if self.inner.state.lock().live == 0 {
                break;
            }
            notified.await;
        }
    }
}

impl<M: Manager> PoolInner<M> {
    /// Drop a connection and free its capacity slot, waking one waiter.
    fn discard(&self, conn: M::Connection) {
        drop(conn);
        self.forget_one();
    }

    /// Release a capacity slot without a connection to hand over.
    fn forget_one(&self) {
        let (waiter, drained) = {
            let mut state = self.state.lock();
            state.live -= 1;
            let waiter = state.waiters.pop_front();
            (waiter, state.closed && state.live == 0)
        };
        if let Some(tx) = waiter {
            let _ = tx.send(None);
        }
        if drained {
            self.drained.notify_waiters();
        }
    }

    /// Take a connection back from a lease.
    fn release(&self, conn: M::Connection, healthy: bool) {
        if !healthy || !self.manager.is_open(&conn) {
            tracing::debug!("discarding unhealthy connection on release");
            self.discard(conn);
            return;
        }

        let mut state = self.state.lock();
        if state.closed {
            state.live -= 1;
            let drained = state.live == 0;
            drop(state);
            drop(conn);
            if drained {
                self.drained.notify_waiters();
            }
            return;
        }

        // Serve waiters directly, in arrival order; fall back to parking.
        let mut conn = conn;
        loop {
            match state.waiters.pop_front() {
                Some(tx) => match tx.send(Some(conn)) {
                    Ok(()) => return,
                    // The waiter gave up (timeout); take the connection back.
                    Err(rejected) => {
                        let Some(back) = rejected else { return };
                        conn = back;
                    }
                },
                None => {
                    state.idle.push_back(Parked {
                        conn,
                        since: Instant::now(),
                    });
                    return;
                }
            }
        }
    }
}

/// Background task closing expired idles and keeping `min_idle` warm.
async fn reaper<M: Manager>(inner: Weak<PoolInner<M>>) {
    let interval = match inner.upgrade() {
        Some(strong) => strong.config.reap_interval(),
        None => return,
    };

    loop {
        tokio::time::sleep(interval).await;
        let Some(inner) = inner.upgrade() else { return };

        let (expired, deficit) = {
            let mut state = inner.state.lock();
            if state.closed {
                return;
            }

            let mut expired = Vec::new();
            if let Some(idle_timeout) = inner.config.idle_timeout {
                while let Some(parked) = state.idle.front() {
                    if parked.since.elapsed() > idle_timeout {
                        if let Some(parked) = state.idle.pop_front() {
                            expired.push(parked.conn);
                        }
                    } else {
                        break;
                    }
                }
            }
            state.live -= expired.len() as u32;

            let warm = state.idle.len() as u32;
            let headroom = inner.config.max_connections - state.live;
            let deficit = inner.config.min_idle.saturating_sub(warm).min(headroom);
            state.live += deficit;
            (expired, deficit)
        };

        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "reaped idle connections");
        }
        drop(expired);

        fill_idle(&inner, deficit).await;
    }
}

/// Open `count` connections and park them idle. The capacity slots must
/// already be reserved in `live`.
async fn fill_idle<M: Manager>(inner: &Arc<PoolInner<M>>, count: u32) {
    for _ in 0..count {
        match inner.manager.create().await {
            Ok(conn) => {
                let mut state = inner.state.lock();
                if state.closed {
                    drop(state);
                    drop(conn);
                    inner.forget_one();
                } else {
                    state.idle.push_back(Parked {
                        conn,
                        since: Instant::now(),
                    });
                }
            }
            Err(error) => {
                tracing::warn!(%error, "failed to open warm idle connection");
                inner.forget_one();
            }
        }
    }
}

/// An exclusively leased connection.
///
/// Dropping the lease returns the connection to the pool; a poisoned lease
/// (or one whose connection no longer reports open) is discarded instead.
pub struct Lease<M: Manager> {
    conn: Option<M::Connection>,
    inner: Arc<PoolInner<M>>,
    poisoned: bool,
}

impl<M: Manager> Lease<M> {
    fn new(conn: M::Connection, inner: Arc<PoolInner<M>>) -> Self {
        Self {
            conn: Some(conn),
            inner,
            poisoned: false,
        }
    }

    /// Mark the connection as unusable; it will be discarded on drop.
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    /// Whether the lease has been poisoned.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}

// The connection is always Some until Drop takes it.
#[allow(clippy::expect_used)]
impl<M: Manager> std::ops::Deref for Lease<M> {
    type Target = M::Connection;

    fn deref(&self) -> &M::Connection {
        self.conn.as_ref().expect("lease holds a connection")
    }
}

#[allow(clippy::expect_used)]
impl<M: Manager> std::ops::DerefMut for Lease<M> {
    fn deref_mut(&mut self) -> &mut M::Connection {
        self.conn.as_mut().expect("lease holds a connection")
    }
}

impl<M: Manager> Drop for Lease<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.inner.release(conn, !self.poisoned);
        }
    }
}

impl<M: Manager> std::fmt::Debug for Lease<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

impl<M: Manager> std::fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status();
        f.debug_struct("Pool").field("status", &status).finish_non_exhaustive()
    }
}
