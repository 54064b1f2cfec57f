use std::future::Future;

use bb8::{ManageConnection, Pool};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, warn};

use crate::error::CrudError;

/// bb8 manager for Postgres clients.
#[derive(Debug, Clone)]
pub struct PgManager {
    pub(crate) config: tokio_postgres::Config,
}

impl PgManager {
    #[must_use]
    pub fn new(config: tokio_postgres::Config) -> Self {
        Self { config }
    }

    /// Build a pool from this manager.
    ///
    /// # Errors
    /// Returns `CrudError::ConnectionError` if pool creation fails.
    pub async fn build_pool(self) -> Result<Pool<PgManager>, CrudError> {
        Pool::builder()
            .build(self)
            .await
            .map_err(|e| CrudError::ConnectionError(format!("postgres pool error: {e}")))
    }
}

impl ManageConnection for PgManager {
    type Connection = Client;
    type Error = tokio_postgres::Error;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let cfg = self.config.clone();
        async move {
            debug!(
                hosts = ?cfg.get_hosts(),
                db = ?cfg.get_dbname(),
                user = ?cfg.get_user(),
                "postgres connect"
            );
            let (client, connection) = cfg.connect(NoTls).await?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    warn!(error = %e, "postgres connection closed with error");
                }
            });
            Ok(client)
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move { conn.simple_query("SELECT 1").await.map(|_| ()) }
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.is_closed()
    }
}
