//! Resilient access to the durable image/alias store.
//!
//! One physical connection, owned exclusively by [`Store`] and serialized
//! behind an async mutex. Every operation probes the connection first and
//! reconnects with exponential backoff when the probe fails, so transient
//! outages cost latency rather than crashes. A single shared connection
//! (not a pool) is deliberate: the workload is a low-throughput chat bot,
//! and the [`Backend`] seam lets a pooled implementation be substituted
//! later without touching callers.

use std::path::PathBuf;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::StoreError;

/// Liveness probe timeout. SQLite answers a probe statement immediately;
/// network backends should honor this when validating the connection.
const PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// First backoff delay; doubles on every consecutive failure.
const BASE_DELAY: Duration = Duration::from_millis(1000);

/// Consecutive reconnect attempts before an operation fails for good.
const MAX_CONNECT_TRIES: u32 = 6;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tagged_image (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    filename    TEXT    NOT NULL,
    owner_id    INTEGER NOT NULL,
    group_id    INTEGER NOT NULL,
    operator_id INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tagged_owner_group
    ON tagged_image(owner_id, group_id);
CREATE TABLE IF NOT EXISTS alias (
    name     TEXT    NOT NULL,
    owner_id INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alias_name ON alias(name);
";

/// Connection factory plus liveness probe.
///
/// The seam between the reconnect state machine and the physical
/// connection: production uses [`SqliteBackend`], tests substitute a fake
/// to drive the backoff schedule without a real database.
pub trait Backend: Send {
    type Conn: Send;

    fn connect(&mut self) -> Result<Self::Conn, StoreError>;

    /// Cheap check that the connection is still usable, bounded by
    /// `timeout`.
    fn is_valid(&mut self, conn: &mut Self::Conn, timeout: Duration) -> bool;
}

/// Opens SQLite connections and bootstraps the schema on each connect.
pub struct SqliteBackend {
    path: PathBuf,
}

impl SqliteBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Backend for SqliteBackend {
    type Conn = Connection;

    fn connect(&mut self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }

    fn is_valid(&mut self, conn: &mut Connection, _timeout: Duration) -> bool {
        // A probe statement, not conn state: a file that vanished or a
        // corrupted handle fails here and triggers the reconnect path.
        conn.query_row("SELECT 1", [], |_| Ok(())).is_ok()
    }
}

/// Probe-then-operate state machine around one connection.
///
/// DISCONNECTED → CONNECTING → CONNECTED, with the error counter pinned at
/// its ceiling once retries are exhausted: every later call fails fast
/// until the connection recovers by external means.
pub(crate) struct Connector<B: Backend> {
    backend: B,
    conn: Option<B::Conn>,
    error_counter: u32,
}

impl<B: Backend> Connector<B> {
    /// Starts DISCONNECTED; the first `ensure_live` goes through the
    /// backoff path unless a connection is installed first.
    pub(crate) fn new(backend: B) -> Self {
        Self {
            backend,
            conn: None,
            error_counter: 0,
        }
    }

    /// Adopt an already-established connection (the eager connect at
    /// startup, made outside so its error can be surfaced directly).
    pub(crate) fn install(&mut self, conn: B::Conn) {
        self.conn = Some(conn);
        self.error_counter = 0;
    }

    /// Ensure `self.conn` holds a live connection.
    ///
    /// Probe failure sleeps `BASE_DELAY * 2^error_counter`, bumps the
    /// counter and tries a fresh connect; success resets the counter to
    /// zero so the next failure episode restarts from the base delay.
    /// Once the counter reaches the ceiling the call fails without another
    /// attempt and the counter stays pinned there.
    pub(crate) async fn ensure_live(&mut self) -> Result<(), StoreError> {
        loop {
            let valid = match self.conn.as_mut() {
                Some(conn) => self.backend.is_valid(conn, PROBE_TIMEOUT),
                None => false,
            };
            if valid {
                return Ok(());
            }
            if self.error_counter >= MAX_CONNECT_TRIES {
                return Err(StoreError::ConnectionExhausted);
            }
            let delay = BASE_DELAY * 2u32.pow(self.error_counter);
            self.error_counter += 1;
            warn!(
                attempt = self.error_counter,
                delay_ms = delay.as_millis() as u64,
                "store connection lost, reconnecting after backoff"
            );
            tokio::time::sleep(delay).await;
            match self.backend.connect() {
                Ok(conn) => {
                    self.conn = Some(conn);
                    self.error_counter = 0;
                    info!("store reconnected");
                }
                Err(e) => {
                    self.conn = None;
                    warn!(attempt = self.error_counter, error = %e, "store reconnect failed");
                }
            }
        }
    }

    pub(crate) fn conn_mut(&mut self) -> Option<&mut B::Conn> {
        self.conn.as_mut()
    }

    pub(crate) fn take_conn(&mut self) -> Option<B::Conn> {
        self.conn.take()
    }
}

/// The four logical operations the engine needs from the durable store.
///
/// Each exists in two forms: a `try_*` form returning `Result` (so "not
/// found" and "operation failed" stay distinguishable) and a legacy
/// sentinel form (`bool` / empty list / `0`) that logs and swallows the
/// error, matching the contract the dispatch layer was written against.
pub struct Store {
    inner: Mutex<Connector<SqliteBackend>>,
}

impl Store {
    /// Open the store, connecting eagerly and bootstrapping the schema.
    ///
    /// An unreachable database at startup is a configuration problem and
    /// surfaces as an error rather than entering the backoff loop.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let mut backend = SqliteBackend::new(path);
        let conn = backend.connect()?;
        let mut connector = Connector::new(backend);
        connector.install(conn);
        Ok(Self {
            inner: Mutex::new(connector),
        })
    }

    /// Serialize probe-reconnect-execute on the single connection.
    ///
    /// Backoff sleeps happen while the lock is held: no statement may run
    /// on a connection that is being replaced. The sequence is not
    /// cancellable mid-flight; callers that need a deadline wrap the whole
    /// call in their own timeout.
    async fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_live().await?;
        let conn = inner.conn_mut().ok_or(StoreError::ConnectionExhausted)?;
        f(conn)
    }

    pub async fn try_insert_tagged_image(
        &self,
        owner_id: i64,
        operator_id: i64,
        group_id: i64,
        filename: &str,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "INSERT INTO tagged_image (filename, owner_id, group_id, operator_id) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![filename, owner_id, group_id, operator_id],
            )?;
            if n == 1 {
                Ok(())
            } else {
                Err(StoreError::RowCount(n))
            }
        })
        .await
    }

    /// True iff exactly one row was durably written. Never raises.
    pub async fn insert_tagged_image(
        &self,
        owner_id: i64,
        operator_id: i64,
        group_id: i64,
        filename: &str,
    ) -> bool {
        match self
            .try_insert_tagged_image(owner_id, operator_id, group_id, filename)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(owner_id, group_id, filename, error = %e, "insert tagged image failed");
                false
            }
        }
    }

    pub async fn try_list_tagged_images(
        &self,
        owner_id: i64,
        group_id: i64,
    ) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT filename FROM tagged_image WHERE owner_id = ?1 AND group_id = ?2",
            )?;
            let rows = stmt.query_map(params![owner_id, group_id], |row| row.get(0))?;
            let mut files = Vec::new();
            for row in rows {
                files.push(row?);
            }
            Ok(files)
        })
        .await
    }

    /// Filenames tagged to `owner_id` in `group_id`; empty on any failure.
    pub async fn list_tagged_images(&self, owner_id: i64, group_id: i64) -> Vec<String> {
        match self.try_list_tagged_images(owner_id, group_id).await {
            Ok(files) => files,
            Err(e) => {
                warn!(owner_id, group_id, error = %e, "list tagged images failed");
                Vec::new()
            }
        }
    }

    pub async fn try_bind_alias(&self, owner_id: i64, alias: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "INSERT INTO alias (name, owner_id) VALUES (?1, ?2)",
                params![alias, owner_id],
            )?;
            if n == 1 {
                Ok(())
            } else {
                Err(StoreError::RowCount(n))
            }
        })
        .await
    }

    /// Bind `alias` to `owner_id`. No uniqueness is enforced here:
    /// duplicate aliases may coexist and lookup takes the oldest binding.
    pub async fn bind_alias(&self, owner_id: i64, alias: &str) -> bool {
        match self.try_bind_alias(owner_id, alias).await {
            Ok(()) => true,
            Err(e) => {
                warn!(owner_id, alias, error = %e, "bind alias failed");
                false
            }
        }
    }

    pub async fn try_resolve_alias(&self, alias: &str) -> Result<Option<i64>, StoreError> {
        self.with_conn(|conn| {
            let owner = conn
                .query_row(
                    "SELECT owner_id FROM alias WHERE name = ?1 ORDER BY rowid LIMIT 1",
                    params![alias],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(owner)
        })
        .await
    }

    /// Owner bound to `alias`, or `0` for both "no such alias" and "lookup
    /// failed". Callers cannot tell the two apart through this form; use
    /// [`Store::try_resolve_alias`] where the distinction matters.
    pub async fn resolve_alias(&self, alias: &str) -> i64 {
        match self.try_resolve_alias(alias).await {
            Ok(Some(owner)) => owner,
            Ok(None) => 0,
            Err(e) => {
                warn!(alias, error = %e, "resolve alias failed");
                0
            }
        }
    }

    /// Release the connection. Safe to call more than once.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(conn) = inner.take_conn() {
            if let Err((_conn, e)) = conn.close() {
                warn!(error = %e, "closing store connection failed");
            }
        }
    }
}
