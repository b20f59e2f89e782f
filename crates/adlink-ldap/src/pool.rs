//! Bounded connection pool.
//!
//! A semaphore with `max_connections` permits gates checkouts: a caller holds
//! a permit for as long as it holds a connection, and a new connection is only
//! opened by a permit holder that found the idle list empty. Live connections
//! therefore never exceed the bound.
//!
//! Checked-out connections are returned by dropping the [`PoolGuard`]. Idle
//! connections past `idle_timeout` are closed by a background reaper and on
//! checkout; those past `health_check_after` are pinged before reuse.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use adlink_core::config::PoolSettings;
use adlink_core::error::{DirectoryError, DirectoryResult};

use crate::discovery::Endpoint;

/// A connection the pool can manage.
#[async_trait]
pub trait PooledConnection: Send + 'static {
    /// Cheap liveness check.
    async fn ping(&mut self) -> DirectoryResult<()>;

    /// Release server-side resources. Errors are not interesting here.
    async fn close(&mut self);
}

/// Opens authenticated connections.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: PooledConnection;

    async fn connect(&self, endpoint: &Endpoint) -> DirectoryResult<Self::Connection>;
}

/// Pool occupancy snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub max: usize,
    /// Open connections, idle or checked out.
    pub live: usize,
    pub idle: usize,
    /// Permits held by callers, including checkouts still connecting.
    pub checked_out: usize,
}

struct IdleConnection<C> {
    conn: C,
    endpoint: usize,
    created_at: Instant,
    last_used: Instant,
}

struct PoolInner<F: ConnectionFactory> {
    factory: F,
    endpoints: Vec<Endpoint>,
    settings: PoolSettings,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConnection<F::Connection>>>,
    live: AtomicUsize,
    penalties: Mutex<HashMap<usize, Instant>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<F: ConnectionFactory> PoolInner<F> {
    fn destroy(&self, mut conn: F::Connection) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { conn.close().await });
        }
    }

    fn give_back(&self, conn: F::Connection, endpoint: usize, created_at: Instant, healthy: bool) {
        if !healthy || self.closed.load(Ordering::SeqCst) {
            debug!(endpoint = %self.endpoints[endpoint], healthy, "Destroying returned connection");
            self.destroy(conn);
            return;
        }
        lock(&self.idle).push_back(IdleConnection {
            conn,
            endpoint,
            created_at,
            last_used: Instant::now(),
        });
    }

    fn penalized(&self, index: usize, now: Instant) -> bool {
        lock(&self.penalties)
            .get(&index)
            .is_some_and(|until| *until > now)
    }

    /// Open a connection, trying endpoints in rank order. Recently failed
    /// endpoints are tried last.
    async fn connect_any(&self) -> DirectoryResult<(F::Connection, usize)> {
        let now = Instant::now();
        let (fresh, penalized): (Vec<usize>, Vec<usize>) =
            (0..self.endpoints.len()).partition(|i| !self.penalized(*i, now));

        let mut last_error = None;
        for index in fresh.into_iter().chain(penalized) {
            let endpoint = &self.endpoints[index];
            match self.factory.connect(endpoint).await {
                Ok(conn) => {
                    lock(&self.penalties).remove(&index);
                    self.live.fetch_add(1, Ordering::SeqCst);
                    debug!(endpoint = %endpoint, "Opened pooled connection");
                    return Ok((conn, index));
                }
                // Another endpoint would reject the same credentials.
                Err(e @ DirectoryError::Authentication { .. }) => return Err(e),
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "Endpoint unavailable");
                    lock(&self.penalties)
                        .insert(index, Instant::now() + self.settings.endpoint_penalty());
                    last_error = Some(e);
                }
            }
        }

        Err(DirectoryError::PoolExhausted {
            message: match last_error {
                Some(e) => format!("all {} endpoints failed, last error: {e}", self.endpoints.len()),
                None => "no endpoints configured".to_string(),
            },
        })
    }

    /// Close idle connections past the idle timeout.
    async fn reap(&self) -> usize {
        let idle_timeout = self.settings.idle_timeout();
        let expired: Vec<_> = {
            let mut idle = lock(&self.idle);
            let (expired, keep): (Vec<_>, Vec<_>) = idle
                .drain(..)
                .partition(|c| c.last_used.elapsed() >= idle_timeout);
            idle.extend(keep);
            expired
        };

        let count = expired.len();
        for mut idle in expired {
            self.live.fetch_sub(1, Ordering::SeqCst);
            idle.conn.close().await;
        }
        if count > 0 {
            debug!(count, "Closed idle connections");
        }
        count
    }
}

/// Pool of connections to a ranked list of endpoints.
pub struct ConnectionPool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Create an empty pool. Connections are opened on demand.
    ///
    /// When called inside a Tokio runtime an idle reaper task is started; it
    /// stops on [`close`](Self::close) or when the last pool handle drops.
    pub fn new(factory: F, endpoints: Vec<Endpoint>, settings: PoolSettings) -> Self {
        let inner = Arc::new(PoolInner {
            factory,
            endpoints,
            permits: Arc::new(Semaphore::new(settings.max_connections)),
            settings,
            idle: Mutex::new(VecDeque::new()),
            live: AtomicUsize::new(0),
            penalties: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let interval = (inner.settings.idle_timeout() / 2)
                .clamp(Duration::from_secs(1), Duration::from_secs(60));
            handle.spawn(reaper(Arc::downgrade(&inner), inner.shutdown.clone(), interval));
        }

        Self { inner }
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.inner.endpoints
    }

    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    /// Check out a connection, waiting up to the configured checkout timeout.
    pub async fn checkout(&self, cancel: &CancellationToken) -> DirectoryResult<PoolGuard<F>> {
        self.checkout_timeout(self.inner.settings.checkout_timeout(), cancel)
            .await
    }

    /// Check out a connection, waiting at most `timeout` for a free slot.
    ///
    /// Fails with `PoolTimeout` when the pool stays at capacity, `Cancelled`
    /// when `cancel` fires while waiting, and `PoolExhausted` when no
    /// endpoint accepts a new connection or the pool is closed.
    #[instrument(skip(self, cancel), level = "debug")]
    pub async fn checkout_timeout(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> DirectoryResult<PoolGuard<F>> {
        let acquire = tokio::time::timeout(timeout, Arc::clone(&self.inner.permits).acquire_owned());
        let permit = tokio::select! {
            () = cancel.cancelled() => return Err(DirectoryError::Cancelled),
            acquired = acquire => match acquired {
                Err(_) => {
                    return Err(DirectoryError::PoolTimeout {
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    })
                }
                Ok(Err(_)) => return Err(pool_closed()),
                Ok(Ok(permit)) => permit,
            },
        };

        let idle_timeout = self.inner.settings.idle_timeout();
        let ping_after = self.inner.settings.health_check_after();

        loop {
            let Some(mut idle) = lock(&self.inner.idle).pop_back() else {
                break;
            };
            let age = idle.last_used.elapsed();
            if age >= idle_timeout {
                self.inner.destroy(idle.conn);
                continue;
            }
            if age >= ping_after {
                if let Err(e) = idle.conn.ping().await {
                    debug!(error = %e, "Idle connection failed health check");
                    self.inner.destroy(idle.conn);
                    continue;
                }
            }
            return Ok(PoolGuard::new(self, idle.conn, idle.endpoint, idle.created_at, permit));
        }

        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(pool_closed());
        }
        let (conn, endpoint) = self.inner.connect_any().await?;
        Ok(PoolGuard::new(self, conn, endpoint, Instant::now(), permit))
    }

    /// Check out a connection and run `operation` on it.
    ///
    /// The connection is destroyed instead of returned when the operation
    /// fails at the transport level, or when `cancel` fires while the request
    /// is in flight and the connection state is unknown.
    pub async fn run<T, Op>(
        &self,
        name: &'static str,
        cancel: &CancellationToken,
        operation: &Op,
    ) -> DirectoryResult<T>
    where
        Op: for<'c> Fn(&'c mut F::Connection) -> BoxFuture<'c, DirectoryResult<T>>,
    {
        let mut conn = self.checkout(cancel).await?;
        let outcome = tokio::select! {
            () = cancel.cancelled() => None,
            result = operation(&mut *conn) => Some(result),
        };
        match outcome {
            None => {
                debug!(operation = name, endpoint = %conn.endpoint(), "Abandoning connection after cancellation");
                conn.mark_unhealthy();
                Err(DirectoryError::Cancelled)
            }
            Some(Err(e)) => {
                if matches!(
                    e,
                    DirectoryError::Connection { .. } | DirectoryError::Timeout { .. }
                ) {
                    conn.mark_unhealthy();
                }
                debug!(operation = name, endpoint = %conn.endpoint(), error = %e, "Directory operation failed");
                Err(e)
            }
            Some(Ok(value)) => Ok(value),
        }
    }

    /// Close idle connections past the idle timeout now.
    pub async fn evict_idle(&self) -> usize {
        self.inner.reap().await
    }

    /// Stop handing out connections and close every idle one. Checked-out
    /// connections are closed when returned.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.permits.close();
        self.inner.shutdown.cancel();

        let drained: Vec<_> = lock(&self.inner.idle).drain(..).collect();
        let count = drained.len();
        for mut idle in drained {
            self.inner.live.fetch_sub(1, Ordering::SeqCst);
            idle.conn.close().await;
        }
        info!(closed = count, "Connection pool closed");
    }

    pub fn stats(&self) -> PoolStats {
        let max = self.inner.settings.max_connections;
        PoolStats {
            max,
            live: self.inner.live.load(Ordering::SeqCst),
            idle: lock(&self.inner.idle).len(),
            checked_out: max.saturating_sub(self.inner.permits.available_permits()),
        }
    }
}

fn pool_closed() -> DirectoryError {
    DirectoryError::PoolExhausted {
        message: "pool is closed".to_string(),
    }
}

async fn reaper<F: ConnectionFactory>(
    pool: Weak<PoolInner<F>>,
    shutdown: CancellationToken,
    interval: Duration,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => return,
            () = tokio::time::sleep(interval) => {}
        }
        let Some(inner) = pool.upgrade() else {
            return;
        };
        inner.reap().await;
    }
}

/// A checked-out connection. Dropping it returns the connection to the pool,
/// or destroys it when marked unhealthy.
pub struct PoolGuard<F: ConnectionFactory> {
    conn: Option<F::Connection>,
    endpoint: usize,
    created_at: Instant,
    healthy: bool,
    pool: Arc<PoolInner<F>>,
    // Released after the connection is back on the idle list.
    _permit: OwnedSemaphorePermit,
}

impl<F: ConnectionFactory> PoolGuard<F> {
    fn new(
        pool: &ConnectionPool<F>,
        conn: F::Connection,
        endpoint: usize,
        created_at: Instant,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            conn: Some(conn),
            endpoint,
            created_at,
            healthy: true,
            pool: Arc::clone(&pool.inner),
            _permit: permit,
        }
    }

    /// Destroy the connection instead of reusing it.
    pub fn mark_unhealthy(&mut self) {
        self.healthy = false;
    }

    /// Endpoint the connection is attached to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.pool.endpoints[self.endpoint]
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for PoolGuard<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolGuard")
            .field("endpoint", self.endpoint())
            .field("age", &self.age())
            .field("healthy", &self.healthy)
            .finish_non_exhaustive()
    }
}

impl<F: ConnectionFactory> Deref for PoolGuard<F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection is present until drop")
    }
}

impl<F: ConnectionFactory> DerefMut for PoolGuard<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection is present until drop")
    }
}

impl<F: ConnectionFactory> Drop for PoolGuard<F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool
                .give_back(conn, self.endpoint, self.created_at, self.healthy);
        }
    }
}
