//! Connection pool for easybase-rdbc
//!
//! A statement borrows a connection for one round trip. A transaction
//! borrows one for its whole lifetime, so its `BEGIN`..`COMMIT` never
//! interleaves with statements issued by other tasks.
//!
//! ```rust,ignore
//! use easybase_rdbc::pool::{ConnectionPool, PoolConfig};
//! use easybase_rdbc::postgres::PgConnectionFactory;
//!
//! let pool = ConnectionPool::open(
//!     PoolConfig::new("postgres://localhost/easybase").with_max_size(8),
//!     Arc::new(PgConnectionFactory),
//! )
//! .await?;
//!
//! let conn = pool.get().await?;
//! conn.execute("SELECT 1", &[]).await?;
//! // back in the pool once `conn` is dropped
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, Transaction};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// Pool sizing and recycling
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Settings for each physical connection
    pub connection: ConnectionConfig,
    /// Connections opened eagerly by [`ConnectionPool::open`]
    pub min_idle: usize,
    /// Upper bound on open connections
    pub max_size: usize,
    /// How long [`ConnectionPool::get`] waits for a free slot
    pub acquire_timeout: Duration,
    /// Connections older than this are closed instead of reused
    pub max_lifetime: Duration,
    /// Connections idle longer than this are closed instead of reused
    pub idle_timeout: Duration,
    /// Ping idle connections before handing them out
    pub test_on_borrow: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            min_idle: 1,
            max_size: 10,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(30 * 60),
            idle_timeout: Duration::from_secs(10 * 60),
            test_on_borrow: true,
        }
    }
}

impl PoolConfig {
    /// Pool over connections to `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self::from_connection(ConnectionConfig::new(url))
    }

    /// Pool over connections built from `connection`
    pub fn from_connection(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            ..Default::default()
        }
    }

    /// Eagerly opened connections
    pub fn with_min_idle(mut self, min_idle: usize) -> Self {
        self.min_idle = min_idle;
        self
    }

    /// Upper bound on open connections (at least one)
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size.max(1);
        self
    }

    /// Acquire deadline
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Ping on borrow
    pub fn with_test_on_borrow(mut self, test: bool) -> Self {
        self.test_on_borrow = test;
        self
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Physical connections opened
    pub created: u64,
    /// Physical connections closed or discarded
    pub closed: u64,
    /// Successful acquisitions
    pub acquired: u64,
    /// Acquisitions that timed out
    pub exhausted: u64,
    /// Idle connections that failed the borrow ping
    pub failed_checks: u64,
    /// Connections currently open
    pub open: usize,
    /// Connections currently idle
    pub idle: usize,
}

#[derive(Debug, Default)]
struct Counters {
    created: AtomicU64,
    closed: AtomicU64,
    acquired: AtomicU64,
    exhausted: AtomicU64,
    failed_checks: AtomicU64,
}

struct IdleConnection {
    conn: Arc<dyn Connection>,
    created_at: Instant,
    idle_since: Instant,
}

/// Bounded pool of connections opened through a [`ConnectionFactory`]
pub struct ConnectionPool {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    /// LIFO so the most recently used connection is reused first
    idle: Mutex<Vec<IdleConnection>>,
    slots: Arc<Semaphore>,
    open: AtomicUsize,
    closed: AtomicBool,
    counters: Counters,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.config)
            .field("open", &self.open.load(Ordering::Relaxed))
            .field("idle", &self.idle.lock().len())
            .finish()
    }
}

impl ConnectionPool {
    /// Create the pool and open `min_idle` connections
    ///
    /// Fails when the first eager connection cannot be opened, so a bad
    /// URL or unreachable server surfaces at startup.
    pub async fn open(config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> Result<Arc<Self>> {
        let pool = Arc::new(Self {
            slots: Arc::new(Semaphore::new(config.max_size.max(1))),
            idle: Mutex::new(Vec::with_capacity(config.max_size)),
            open: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            counters: Counters::default(),
            config,
            factory,
        });

        let warm = pool.config.min_idle.min(pool.config.max_size);
        for n in 0..warm {
            match pool.create().await {
                Ok(conn) => pool.idle.lock().push(IdleConnection {
                    conn,
                    created_at: Instant::now(),
                    idle_since: Instant::now(),
                }),
                Err(e) if n == 0 => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Could not open idle connection");
                    break;
                }
            }
        }
        debug!(
            idle = pool.idle.lock().len(),
            max = pool.config.max_size,
            "Connection pool ready"
        );
        Ok(pool)
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Borrow a connection, waiting up to `acquire_timeout` for a free slot
    pub async fn get(self: &Arc<Self>) -> Result<PooledConnection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::PoolExhausted("pool is closed".into()));
        }

        let permit = tokio::time::timeout(
            self.config.acquire_timeout,
            Arc::clone(&self.slots).acquire_owned(),
        )
        .await
        .map_err(|_| {
            self.counters.exhausted.fetch_add(1, Ordering::Relaxed);
            Error::PoolExhausted(format!(
                "no connection free after {:?}",
                self.config.acquire_timeout
            ))
        })?
        .map_err(|_| Error::PoolExhausted("pool is closed".into()))?;

        let (conn, created_at) = match self.take_idle().await {
            Some(entry) => entry,
            None => (self.create().await?, Instant::now()),
        };
        self.counters.acquired.fetch_add(1, Ordering::Relaxed);

        Ok(PooledConnection {
            conn,
            created_at,
            pool: Arc::clone(self),
            discard: false,
            _permit: permit,
        })
    }

    /// Begin a transaction on a connection held until commit or rollback
    pub async fn begin(self: &Arc<Self>) -> Result<Box<dyn Transaction>> {
        let conn = self.get().await?;
        let tx = conn.begin().await?;
        Ok(Box::new(PooledTransaction {
            tx: Some(tx),
            conn: Some(conn),
        }))
    }

    /// Close idle connections and refuse further borrowing
    ///
    /// Borrowed connections are closed when they come back.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.slots.close();
        let drained: Vec<IdleConnection> = std::mem::take(&mut *self.idle.lock());
        for entry in drained {
            let _ = entry.conn.close().await;
            self.forget();
        }
    }

    /// Current counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.counters.created.load(Ordering::Relaxed),
            closed: self.counters.closed.load(Ordering::Relaxed),
            acquired: self.counters.acquired.load(Ordering::Relaxed),
            exhausted: self.counters.exhausted.load(Ordering::Relaxed),
            failed_checks: self.counters.failed_checks.load(Ordering::Relaxed),
            open: self.open.load(Ordering::Relaxed),
            idle: self.idle.lock().len(),
        }
    }

    async fn create(&self) -> Result<Arc<dyn Connection>> {
        let conn: Arc<dyn Connection> =
            Arc::from(self.factory.connect(&self.config.connection).await?);
        self.open.fetch_add(1, Ordering::AcqRel);
        self.counters.created.fetch_add(1, Ordering::Relaxed);
        Ok(conn)
    }

    /// Pop idle connections until one is fresh and answers the ping
    async fn take_idle(&self) -> Option<(Arc<dyn Connection>, Instant)> {
        loop {
            let entry = self.idle.lock().pop()?;
            if entry.created_at.elapsed() > self.config.max_lifetime
                || entry.idle_since.elapsed() > self.config.idle_timeout
            {
                let _ = entry.conn.close().await;
                self.forget();
                continue;
            }
            if self.config.test_on_borrow && !entry.conn.is_valid().await {
                self.counters.failed_checks.fetch_add(1, Ordering::Relaxed);
                self.forget();
                continue;
            }
            return Some((entry.conn, entry.created_at));
        }
    }

    fn forget(&self) {
        self.open.fetch_sub(1, Ordering::AcqRel);
        self.counters.closed.fetch_add(1, Ordering::Relaxed);
    }

    fn give_back(&self, conn: Arc<dyn Connection>, created_at: Instant) {
        if self.closed.load(Ordering::Acquire) {
            self.forget();
            return;
        }
        self.idle.lock().push(IdleConnection {
            conn,
            created_at,
            idle_since: Instant::now(),
        });
    }
}

/// A borrowed connection, returned to its pool on drop
pub struct PooledConnection {
    conn: Arc<dyn Connection>,
    created_at: Instant,
    pool: Arc<ConnectionPool>,
    discard: bool,
    /// Released after the connection is back in the idle list
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("age", &self.created_at.elapsed())
            .field("discard", &self.discard)
            .finish()
    }
}

impl PooledConnection {
    /// Drop the connection instead of returning it
    pub fn discard(mut self) {
        self.discard = true;
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.discard {
            self.pool.forget();
        } else {
            self.pool.give_back(Arc::clone(&self.conn), self.created_at);
        }
    }
}

/// Transaction pinned to one pooled connection
///
/// A transaction dropped without commit or rollback takes its connection
/// with it: the server aborts the transaction when the connection closes,
/// and no other borrower ever sees it half-finished.
struct PooledTransaction {
    tx: Option<Box<dyn Transaction>>,
    conn: Option<PooledConnection>,
}

impl PooledTransaction {
    fn inner(&self) -> Result<&dyn Transaction> {
        self.tx
            .as_deref()
            .ok_or_else(|| Error::unavailable("transaction already finished"))
    }

    fn release(&mut self, healthy: bool) {
        if let Some(conn) = self.conn.take() {
            if healthy {
                drop(conn);
            } else {
                conn.discard();
            }
        }
    }
}

#[async_trait]
impl Transaction for PooledTransaction {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.inner()?.query(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.inner()?.execute(sql, params).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        let tx = this
            .tx
            .take()
            .ok_or_else(|| Error::unavailable("transaction already finished"))?;
        let result = tx.commit().await;
        this.release(result.is_ok());
        result
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut this = self;
        let tx = this
            .tx
            .take()
            .ok_or_else(|| Error::unavailable("transaction already finished"))?;
        let result = tx.rollback().await;
        this.release(result.is_ok());
        result
    }
}

impl Drop for PooledTransaction {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.release(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_builder() {
        let config = PoolConfig::new("postgres://localhost/test")
            .with_min_idle(2)
            .with_max_size(0)
            .with_acquire_timeout(Duration::from_millis(250))
            .with_test_on_borrow(false);

        assert_eq!(config.connection.url, "postgres://localhost/test");
        assert_eq!(config.min_idle, 2);
        assert_eq!(config.max_size, 1);
        assert_eq!(config.acquire_timeout, Duration::from_millis(250));
        assert!(!config.test_on_borrow);
    }

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_size, 10);
        assert_eq!(config.min_idle, 1);
        assert!(config.test_on_borrow);
        assert_eq!(PoolStats::default().open, 0);
    }
}
