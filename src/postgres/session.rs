use async_trait::async_trait;
use bb8::PooledConnection;
use tokio::runtime::Handle;
use tokio_postgres::Client;
use tracing::debug;

use crate::dialect::Dialect;
use crate::error::CrudError;
use crate::results::ResultSet;
use crate::session::{AsyncSession, already_open, not_open};
use crate::types::QueryAndParams;

use super::config::PgManager;
use super::params::as_pg_params;
use super::query::build_result_set;

enum PgClient {
    Pooled(PooledConnection<'static, PgManager>),
    Owned(Client),
}

impl PgClient {
    fn client(&self) -> &Client {
        match self {
            PgClient::Pooled(conn) => &**conn,
            PgClient::Owned(client) => client,
        }
    }
}

/// Async session over a Postgres client.
///
/// Transactions are driven with explicit `BEGIN`/`COMMIT`/`ROLLBACK`; a session dropped with a
/// transaction still open issues a best-effort `ROLLBACK` on the current runtime.
pub struct PgSession {
    client: Option<PgClient>,
    in_tx: bool,
}

impl PgSession {
    #[must_use]
    pub fn from_pooled(conn: PooledConnection<'static, PgManager>) -> Self {
        Self {
            client: Some(PgClient::Pooled(conn)),
            in_tx: false,
        }
    }

    /// Wrap a client whose connection task the caller already spawned.
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self {
            client: Some(PgClient::Owned(client)),
            in_tx: false,
        }
    }

    fn client(&self) -> Result<&Client, CrudError> {
        self.client
            .as_ref()
            .map(PgClient::client)
            .ok_or_else(|| CrudError::ConnectionError("postgres client already released".into()))
    }

    async fn batch(&self, sql: &str) -> Result<(), CrudError> {
        debug!(sql, "postgres batch");
        self.client()?.batch_execute(sql).await?;
        Ok(())
    }
}

impl std::fmt::Debug for PgSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgSession")
            .field("in_transaction", &self.in_tx)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AsyncSession for PgSession {
    fn dialect(&self) -> Dialect {
        Dialect::Postgresql
    }

    async fn query(&mut self, query: &QueryAndParams) -> Result<ResultSet, CrudError> {
        debug!(sql = %query.query, params = query.params.len(), "postgres query");
        let client = self.client()?;
        let stmt = client.prepare(&query.query).await?;
        let rows = client.query(&stmt, &as_pg_params(&query.params)).await?;
        build_result_set(&stmt, &rows)
    }

    async fn execute(&mut self, query: &QueryAndParams) -> Result<usize, CrudError> {
        debug!(sql = %query.query, params = query.params.len(), "postgres execute");
        let rows = self
            .client()?
            .execute(query.query.as_str(), &as_pg_params(&query.params))
            .await?;
        usize::try_from(rows).map_err(|e| {
            CrudError::ExecutionError(format!("postgres affected rows conversion error: {e}"))
        })
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<(), CrudError> {
        self.batch(sql).await
    }

    fn in_transaction(&self) -> bool {
        self.in_tx
    }

    async fn begin(&mut self) -> Result<(), CrudError> {
        if self.in_tx {
            return Err(already_open());
        }
        self.batch("BEGIN").await?;
        self.in_tx = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), CrudError> {
        if !self.in_tx {
            return Err(not_open());
        }
        // Postgres ends the transaction whether COMMIT succeeds or not
        self.in_tx = false;
        self.batch("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), CrudError> {
        if !self.in_tx {
            return Err(not_open());
        }
        self.in_tx = false;
        self.batch("ROLLBACK").await
    }
}

impl Drop for PgSession {
    fn drop(&mut self) {
        if self.in_tx
            && let Some(client) = self.client.take()
            && let Ok(handle) = Handle::try_current()
        {
            handle.spawn(async move {
                let _ = client.client().simple_query("ROLLBACK").await;
            });
        }
    }
}
