//! Single-connection lifecycle management.
//!
//! A [`ConnectionManager`] owns at most one live connection produced by a
//! [`Connector`]. Operations borrow it through a [`Session`], which holds the
//! manager's async mutex for its whole lifetime, so operations on one
//! manager never interleave on the wire.

use async_trait::async_trait;
use parking_lot::Mutex;
use polystore_core::{StoreError, StoreResult};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{MappedMutexGuard, Mutex as AsyncMutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Opens, pings and closes connections to one backend.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The live connection type.
    type Connection: Send + 'static;

    /// Human-readable target, used in logs. Must not contain secrets.
    fn describe(&self) -> String;

    /// Upper bound for a single connect attempt.
    fn connect_timeout(&self) -> Duration;

    /// Opens a new connection.
    async fn connect(&self) -> StoreResult<Self::Connection>;

    /// Returns whether the connection still answers.
    async fn ping(&self, conn: &mut Self::Connection) -> bool;

    /// Closes a connection gracefully.
    async fn close(&self, conn: Self::Connection) -> StoreResult<()>;

    /// Starts a transaction.
    async fn begin(&self, _conn: &mut Self::Connection) -> StoreResult<()> {
        Ok(())
    }

    /// Commits the open transaction.
    async fn commit(&self, _conn: &mut Self::Connection) -> StoreResult<()> {
        Ok(())
    }

    /// Rolls back the open transaction.
    async fn rollback(&self, _conn: &mut Self::Connection) -> StoreResult<()> {
        Ok(())
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Lazily connected, single-connection manager.
pub struct ConnectionManager<K: Connector> {
    connector: K,
    slot: AsyncMutex<Option<K::Connection>>,
    state: Mutex<ConnectionState>,
    lost: AtomicBool,
    in_transaction: AtomicBool,
}

impl<K: Connector> ConnectionManager<K> {
    /// Creates a manager. No connection is opened until first use.
    #[must_use]
    pub fn new(connector: K) -> Self {
        Self {
            connector,
            slot: AsyncMutex::new(None),
            state: Mutex::new(ConnectionState::Disconnected),
            lost: AtomicBool::new(false),
            in_transaction: AtomicBool::new(false),
        }
    }

    /// Returns the connector.
    #[must_use]
    pub fn connector(&self) -> &K {
        &self.connector
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Whether a transaction is open on the current connection.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    /// Flags the current connection as lost. The next [`acquire`](Self::acquire)
    /// discards it and reconnects once.
    pub fn mark_lost(&self, reason: &StoreError) {
        if !self.lost.swap(true, Ordering::SeqCst) {
            warn!(target_db = %self.connector.describe(), error = %reason, "Connection lost");
        }
    }

    /// Opens the connection now instead of on first use.
    pub async fn connect(&self) -> StoreResult<()> {
        self.acquire().await.map(drop)
    }

    /// Borrows the connection, connecting first if needed.
    pub async fn acquire(&self) -> StoreResult<Session<'_, K>> {
        let mut guard = self.slot.lock().await;

        if self.lost.swap(false, Ordering::SeqCst) {
            if let Some(conn) = guard.take() {
                if let Err(e) = self.connector.close(conn).await {
                    debug!(target_db = %self.connector.describe(), error = %e, "Ignoring close error on lost connection");
                }
            }
            self.in_transaction.store(false, Ordering::SeqCst);
            self.set_state(ConnectionState::Disconnected);
        }

        if guard.is_none() {
            *guard = Some(self.open_connection().await?);
        }

        let conn = MutexGuard::try_map(guard, Option::as_mut)
            .map_err(|_| StoreError::internal("connection slot is empty after connect"))?;

        Ok(Session { conn, manager: self })
    }

    async fn open_connection(&self) -> StoreResult<K::Connection> {
        let target = self.connector.describe();
        let timeout = self.connector.connect_timeout();
        self.set_state(ConnectionState::Connecting);
        info!(target_db = %target, "Connecting...");

        let result = match tokio::time::timeout(timeout, self.connector.connect()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::connection(format!(
                "connect to {} timed out after {:?}",
                target, timeout
            ))),
        };

        match result {
            Ok(conn) => {
                self.set_state(ConnectionState::Connected);
                info!(target_db = %target, "Connection established");
                Ok(conn)
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                error!(target_db = %target, error = %e, "Failed to connect");
                Err(match e {
                    StoreError::Connection(_) => e,
                    other => StoreError::connection(other.to_string()),
                })
            }
        }
    }

    /// Pings the current connection without opening a new one.
    pub async fn is_connected(&self) -> bool {
        let mut guard = self.slot.lock().await;
        if self.lost.load(Ordering::SeqCst) {
            return false;
        }
        match guard.as_mut() {
            Some(conn) => {
                let alive = self.connector.ping(conn).await;
                if !alive {
                    self.mark_lost(&StoreError::connection("ping failed"));
                }
                alive
            }
            None => false,
        }
    }

    /// Closes the connection. An open transaction is rolled back first.
    pub async fn close(&self) -> StoreResult<()> {
        let mut guard = self.slot.lock().await;
        let Some(mut conn) = guard.take() else {
            return Ok(());
        };

        if self.in_transaction.swap(false, Ordering::SeqCst) && !self.lost.load(Ordering::SeqCst) {
            warn!(target_db = %self.connector.describe(), "Rolling back open transaction before close");
            if let Err(e) = self.connector.rollback(&mut conn).await {
                warn!(error = %e, "Rollback before close failed");
            }
        }
        self.lost.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);

        info!(target_db = %self.connector.describe(), "Closing connection");
        self.connector.close(conn).await
    }
}

impl<K: Connector> fmt::Debug for ConnectionManager<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("target", &self.connector.describe())
            .field("state", &self.state())
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

/// Exclusive access to the live connection.
pub struct Session<'a, K: Connector> {
    conn: MappedMutexGuard<'a, K::Connection>,
    manager: &'a ConnectionManager<K>,
}

impl<K: Connector> Session<'_, K> {
    /// The live connection.
    pub fn conn(&mut self) -> &mut K::Connection {
        &mut self.conn
    }

    /// Passes `result` through, marking the connection lost on a
    /// connection error.
    pub fn track<T>(&self, result: StoreResult<T>) -> StoreResult<T> {
        if let Err(e) = &result {
            if e.is_connection_error() {
                self.manager.mark_lost(e);
            }
        }
        result
    }

    /// Whether a transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.manager.in_transaction()
    }

    /// Starts a transaction unless one is already open.
    pub async fn begin(&mut self) -> StoreResult<()> {
        if self.in_transaction() {
            return Ok(());
        }
        let manager = self.manager;
        let result = manager.connector.begin(&mut self.conn).await;
        self.track(result)?;
        manager.in_transaction.store(true, Ordering::SeqCst);
        debug!(target_db = %manager.connector.describe(), "Transaction started");
        Ok(())
    }

    /// Commits the open transaction, if any.
    pub async fn commit(&mut self) -> StoreResult<()> {
        if !self.in_transaction() {
            return Ok(());
        }
        let manager = self.manager;
        let result = manager.connector.commit(&mut self.conn).await;
        manager.in_transaction.store(false, Ordering::SeqCst);
        self.track(result)?;
        debug!(target_db = %manager.connector.describe(), "Transaction committed");
        Ok(())
    }

    /// Rolls back the open transaction, if any.
    pub async fn rollback(&mut self) -> StoreResult<()> {
        if !self.in_transaction() {
            return Ok(());
        }
        let manager = self.manager;
        let result = manager.connector.rollback(&mut self.conn).await;
        manager.in_transaction.store(false, Ordering::SeqCst);
        self.track(result)?;
        warn!(target_db = %manager.connector.describe(), "Transaction rolled back");
        Ok(())
    }
}
