use std::sync::Arc;

use async_trait::async_trait;
use bb8::PooledConnection;
use rusqlite::Connection;
use tokio::sync::Mutex;

use crate::dialect::Dialect;
use crate::error::CrudError;
use crate::results::ResultSet;
use crate::session::{AsyncSession, Session, already_open, not_open};
use crate::types::QueryAndParams;

use super::config::{SQLITE_PRAGMAS, SharedSqliteConnection, SqliteManager, open_connection, run_blocking};
use super::query::{build_result_set, execute_dml};

/// Blocking session over a rusqlite connection.
///
/// Whether a transaction is open is read from the connection's autocommit flag.
pub struct SqliteSession {
    conn: Connection,
}

impl SqliteSession {
    /// Open (or create) a database file.
    ///
    /// # Errors
    /// Returns `CrudError::SqliteError` if the file cannot be opened.
    pub fn open(db_path: &str) -> Result<Self, CrudError> {
        Ok(Self {
            conn: open_connection(db_path)?,
        })
    }

    /// # Errors
    /// Returns `CrudError::SqliteError` if the database cannot be created.
    pub fn open_in_memory() -> Result<Self, CrudError> {
        Self::open(":memory:")
    }

    /// Wrap an existing connection, applying the session pragmas.
    ///
    /// # Errors
    /// Returns `CrudError::SqliteError` if a pragma fails.
    pub fn from_connection(conn: Connection) -> Result<Self, CrudError> {
        conn.execute_batch(SQLITE_PRAGMAS)?;
        Ok(Self { conn })
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    #[must_use]
    pub fn into_inner(self) -> Connection {
        self.conn
    }
}

impl std::fmt::Debug for SqliteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSession")
            .field("in_transaction", &!self.conn.is_autocommit())
            .finish_non_exhaustive()
    }
}

impl Session for SqliteSession {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn query(&mut self, query: &QueryAndParams) -> Result<ResultSet, CrudError> {
        build_result_set(&self.conn, query)
    }

    fn execute(&mut self, query: &QueryAndParams) -> Result<usize, CrudError> {
        execute_dml(&self.conn, query)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), CrudError> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn begin(&mut self) -> Result<(), CrudError> {
        if self.in_transaction() {
            return Err(already_open());
        }
        self.execute_batch("BEGIN")
    }

    fn commit(&mut self) -> Result<(), CrudError> {
        if !self.in_transaction() {
            return Err(not_open());
        }
        self.execute_batch("COMMIT")
    }

    fn rollback(&mut self) -> Result<(), CrudError> {
        if !self.in_transaction() {
            return Err(not_open());
        }
        self.execute_batch("ROLLBACK")
    }
}

/// Async session over a shared rusqlite connection; every call runs on tokio's blocking pool.
pub struct AsyncSqliteSession {
    handle: SharedSqliteConnection,
    // keeps a pooled checkout alive until the session is dropped
    lease: Option<PooledConnection<'static, SqliteManager>>,
    in_tx: bool,
}

impl AsyncSqliteSession {
    /// Open (or create) a database file.
    ///
    /// # Errors
    /// Returns `CrudError::SqliteError` if the file cannot be opened.
    pub async fn open(db_path: &str) -> Result<Self, CrudError> {
        let path = db_path.to_string();
        let conn = tokio::task::spawn_blocking(move || open_connection(&path))
            .await
            .map_err(|e| CrudError::ConnectionError(format!("sqlite open task failed: {e}")))??;
        Ok(Self::from_shared(Arc::new(Mutex::new(conn))))
    }

    /// # Errors
    /// Returns `CrudError::SqliteError` if the database cannot be created.
    pub async fn open_in_memory() -> Result<Self, CrudError> {
        Self::open(":memory:").await
    }

    /// Wrap a shared connection; a handle locked elsewhere is assumed idle.
    #[must_use]
    pub fn from_shared(handle: SharedSqliteConnection) -> Self {
        let in_tx = handle.try_lock().is_ok_and(|conn| !conn.is_autocommit());
        Self {
            handle,
            lease: None,
            in_tx,
        }
    }

    /// Wrap a connection checked out of a [`SqliteManager`] pool.
    ///
    /// The connection may come back with a transaction still open (a cancelled `BEGIN`), so the
    /// flag is read from the connection rather than assumed.
    pub async fn from_pooled(conn: PooledConnection<'static, SqliteManager>) -> Self {
        let handle = Arc::clone(&*conn);
        let in_tx = !handle.lock().await.is_autocommit();
        Self {
            handle,
            lease: Some(conn),
            in_tx,
        }
    }

    #[must_use]
    pub fn shared(&self) -> SharedSqliteConnection {
        Arc::clone(&self.handle)
    }

    // runs `func` and refreshes the transaction flag from the connection
    async fn run<R, F>(&mut self, func: F) -> Result<R, CrudError>
    where
        F: FnOnce(&mut Connection) -> Result<R, CrudError> + Send + 'static,
        R: Send + 'static,
    {
        let (result, in_tx) = run_blocking(Arc::clone(&self.handle), move |conn| {
            let result = func(conn);
            Ok((result, !conn.is_autocommit()))
        })
        .await?;
        self.in_tx = in_tx;
        result
    }
}

impl std::fmt::Debug for AsyncSqliteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncSqliteSession")
            .field("pooled", &self.lease.is_some())
            .field("in_transaction", &self.in_tx)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AsyncSession for AsyncSqliteSession {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn query(&mut self, query: &QueryAndParams) -> Result<ResultSet, CrudError> {
        let query = query.clone();
        self.run(move |conn| build_result_set(conn, &query)).await
    }

    async fn execute(&mut self, query: &QueryAndParams) -> Result<usize, CrudError> {
        let query = query.clone();
        self.run(move |conn| execute_dml(conn, &query)).await
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<(), CrudError> {
        let sql = sql.to_string();
        self.run(move |conn| Ok(conn.execute_batch(&sql)?)).await
    }

    fn in_transaction(&self) -> bool {
        self.in_tx
    }

    async fn begin(&mut self) -> Result<(), CrudError> {
        if self.in_tx {
            return Err(already_open());
        }
        self.execute_batch("BEGIN").await
    }

    async fn commit(&mut self) -> Result<(), CrudError> {
        if !self.in_tx {
            return Err(not_open());
        }
        self.execute_batch("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), CrudError> {
        if !self.in_tx {
            return Err(not_open());
        }
        self.execute_batch("ROLLBACK").await
    }
}

impl Drop for AsyncSqliteSession {
    fn drop(&mut self) {
        // roll back an abandoned transaction before the connection goes back to the pool
        if self.in_tx
            && let Ok(guard) = self.handle.try_lock()
        {
            let _ = guard.execute_batch("ROLLBACK");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::runtime::Runtime;

    #[test]
    fn pooled_session_sees_a_leftover_transaction() -> Result<(), Box<dyn std::error::Error>> {
        let rt = Runtime::new()?;
        rt.block_on(async {
            let pool = SqliteManager::new(":memory:").build_pool().await?;

            let first = AsyncSqliteSession::from_pooled(pool.get_owned().await?).await;
            assert!(!first.in_transaction());
            // open a transaction behind the session's back, as a cancelled BEGIN would
            first.shared().lock().await.execute_batch("BEGIN")?;
            drop(first);

            let mut second = AsyncSqliteSession::from_pooled(pool.get_owned().await?).await;
            assert!(second.in_transaction());
            assert!(second.begin().await.is_err());
            second.rollback().await?;
            assert!(!second.in_transaction());
            Ok::<(), Box<dyn std::error::Error>>(())
        })
    }
}
