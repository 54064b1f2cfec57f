//! Pools and the backend-neutral async session they hand out.

use async_trait::async_trait;
#[cfg(any(feature = "postgres", feature = "sqlite"))]
use bb8::Pool;

use crate::dialect::Dialect;
use crate::error::CrudError;
use crate::results::ResultSet;
use crate::session::AsyncSession;
use crate::types::QueryAndParams;

#[cfg(feature = "postgres")]
use crate::postgres::{PgManager, PgSession};
#[cfg(feature = "sqlite")]
use crate::sqlite::{AsyncSqliteSession, SqliteManager};

/// Connection pool for one database.
#[derive(Clone)]
pub enum CrudPool {
    #[cfg(feature = "postgres")]
    Postgres(Pool<PgManager>),
    #[cfg(feature = "sqlite")]
    Sqlite(Pool<SqliteManager>),
}

impl std::fmt::Debug for CrudPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(pool) => f.debug_tuple("Postgres").field(&pool.state().connections).finish(),
            #[cfg(feature = "sqlite")]
            Self::Sqlite(pool) => f.debug_tuple("Sqlite").field(&pool.state().connections).finish(),
        }
    }
}

/// A pool plus the dialect its sessions speak.
///
/// ```rust,no_run
/// use sql_crud_utils::prelude::*;
///
/// # async fn demo() -> Result<(), CrudError> {
/// let pool = ConfigAndPool::new_sqlite("app.db").await?;
/// let mut session = pool.session().await?;
/// let query = QueryAndParams::new_without_params("SELECT 1 AS one");
/// let row = nonblocking::get_result_from_query(&mut session, &query).await?;
/// # let _ = row;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct ConfigAndPool {
    pub pool: CrudPool,
    pub dialect: Dialect,
}

impl ConfigAndPool {
    /// Pool `SQLite` connections to `db_path` (`:memory:` yields a single shared connection).
    ///
    /// # Errors
    /// Returns `CrudError::ConnectionError` if the first connection cannot be opened.
    #[cfg(feature = "sqlite")]
    pub async fn new_sqlite(db_path: impl Into<String>) -> Result<Self, CrudError> {
        let pool = SqliteManager::new(db_path).build_pool().await?;
        Ok(Self {
            pool: CrudPool::Sqlite(pool),
            dialect: Dialect::Sqlite,
        })
    }

    /// Pool Postgres clients for `pg_config`.
    ///
    /// # Errors
    /// Returns `CrudError::ConfigError` when dbname, host or user is missing, or
    /// `CrudError::ConnectionError` if pool creation fails.
    #[cfg(feature = "postgres")]
    pub async fn new_postgres(pg_config: tokio_postgres::Config) -> Result<Self, CrudError> {
        if pg_config.get_dbname().is_none() {
            return Err(CrudError::ConfigError("dbname is required".to_string()));
        }
        if pg_config.get_hosts().is_empty() {
            return Err(CrudError::ConfigError("host is required".to_string()));
        }
        if pg_config.get_user().is_none() {
            return Err(CrudError::ConfigError("user is required".to_string()));
        }
        let pool = PgManager::new(pg_config).build_pool().await?;
        Ok(Self {
            pool: CrudPool::Postgres(pool),
            dialect: Dialect::Postgresql,
        })
    }

    /// Check out a session.
    ///
    /// # Errors
    /// Returns `CrudError::ConnectionError` if the pool cannot provide a connection.
    pub async fn session(&self) -> Result<AnySession, CrudError> {
        match &self.pool {
            #[cfg(feature = "postgres")]
            CrudPool::Postgres(pool) => {
                let conn = pool.get_owned().await.map_err(|e| {
                    CrudError::ConnectionError(format!("postgres checkout error: {e}"))
                })?;
                Ok(AnySession::Postgres(PgSession::from_pooled(conn)))
            }
            #[cfg(feature = "sqlite")]
            CrudPool::Sqlite(pool) => {
                let conn = pool.get_owned().await.map_err(|e| {
                    CrudError::ConnectionError(format!("sqlite checkout error: {e}"))
                })?;
                Ok(AnySession::Sqlite(AsyncSqliteSession::from_pooled(conn).await))
            }
        }
    }
}

/// An async session on whichever backend a pool was built for.
#[derive(Debug)]
pub enum AnySession {
    #[cfg(feature = "postgres")]
    Postgres(PgSession),
    #[cfg(feature = "sqlite")]
    Sqlite(AsyncSqliteSession),
}

macro_rules! dispatch {
    ($self:expr, $s:ident => $body:expr) => {
        match $self {
            #[cfg(feature = "postgres")]
            AnySession::Postgres($s) => $body,
            #[cfg(feature = "sqlite")]
            AnySession::Sqlite($s) => $body,
        }
    };
}

#[async_trait]
impl AsyncSession for AnySession {
    fn dialect(&self) -> Dialect {
        dispatch!(self, s => s.dialect())
    }

    async fn query(&mut self, query: &QueryAndParams) -> Result<ResultSet, CrudError> {
        dispatch!(self, s => s.query(query).await)
    }

    async fn execute(&mut self, query: &QueryAndParams) -> Result<usize, CrudError> {
        dispatch!(self, s => s.execute(query).await)
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<(), CrudError> {
        dispatch!(self, s => s.execute_batch(sql).await)
    }

    fn in_transaction(&self) -> bool {
        dispatch!(self, s => s.in_transaction())
    }

    async fn begin(&mut self) -> Result<(), CrudError> {
        dispatch!(self, s => s.begin().await)
    }

    async fn commit(&mut self) -> Result<(), CrudError> {
        dispatch!(self, s => s.commit().await)
    }

    async fn rollback(&mut self) -> Result<(), CrudError> {
        dispatch!(self, s => s.rollback().await)
    }
}
