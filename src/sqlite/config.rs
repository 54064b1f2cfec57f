use std::future::Future;
use std::sync::Arc;

use bb8::{ManageConnection, Pool};
use rusqlite::Connection;
use tokio::sync::Mutex;
use tokio::task::spawn_blocking;

use crate::error::CrudError;

/// A rusqlite connection shared between the async session and the blocking pool.
pub type SharedSqliteConnection = Arc<Mutex<Connection>>;

pub(crate) const SQLITE_PRAGMAS: &str = "PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;";

/// bb8 manager for `SQLite` connections.
#[derive(Debug, Clone)]
pub struct SqliteManager {
    pub(crate) db_path: String,
}

impl SqliteManager {
    #[must_use]
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    /// Build a pool from this manager.
    ///
    /// An in-memory database lives and dies with its connection, so it gets a single-connection
    /// pool.
    ///
    /// # Errors
    /// Returns `CrudError::ConnectionError` if the first connection cannot be opened.
    pub async fn build_pool(self) -> Result<Pool<SqliteManager>, CrudError> {
        let max_size = if self.is_memory() { 1 } else { 10 };
        Pool::builder()
            .max_size(max_size)
            .build(self)
            .await
            .map_err(|e| CrudError::ConnectionError(format!("sqlite pool error: {e}")))
    }

    fn is_memory(&self) -> bool {
        self.db_path == ":memory:" || self.db_path.is_empty()
    }
}

/// Open a connection and apply the session pragmas.
///
/// # Errors
/// Returns `CrudError::SqliteError` if the file cannot be opened or a pragma fails.
pub fn open_connection(db_path: &str) -> Result<Connection, CrudError> {
    let conn = if db_path == ":memory:" || db_path.is_empty() {
        Connection::open_in_memory()?
    } else {
        Connection::open(db_path)?
    };
    conn.execute_batch(SQLITE_PRAGMAS)?;
    Ok(conn)
}

impl ManageConnection for SqliteManager {
    type Connection = SharedSqliteConnection;
    type Error = CrudError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let path = self.db_path.clone();
        async move {
            let conn = spawn_blocking(move || open_connection(&path))
                .await
                .map_err(|e| CrudError::ConnectionError(format!("sqlite open task failed: {e}")))??;
            Ok(Arc::new(Mutex::new(conn)))
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        let conn = Arc::clone(conn);
        async move {
            let guard = conn.lock().await;
            guard.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        }
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Run `func` against the connection on tokio's blocking pool.
///
/// # Errors
/// Returns the closure's error, or `CrudError::ExecutionError` if the blocking task panicked.
pub(crate) async fn run_blocking<F, R>(conn: SharedSqliteConnection, func: F) -> Result<R, CrudError>
where
    F: FnOnce(&mut Connection) -> Result<R, CrudError> + Send + 'static,
    R: Send + 'static,
{
    spawn_blocking(move || {
        let mut guard = conn.blocking_lock();
        func(&mut guard)
    })
    .await
    .map_err(|e| CrudError::ExecutionError(format!("sqlite blocking task failed: {e}")))?
}
