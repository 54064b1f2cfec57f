use postgresql_embedded::PostgreSQL;
use tokio_postgres::Config;

use crate::error::CrudError;

/// A throwaway Postgres server with one database created for the caller.
pub struct EmbeddedPostgres {
    pub postgresql: PostgreSQL,
    /// Connection settings for the created database, credentials included.
    pub config: Config,
}

impl EmbeddedPostgres {
    /// Install the bundled binaries, start a server and create `dbname` on it.
    ///
    /// # Errors
    /// Returns `CrudError::ConnectionError` if the server cannot be set up, started or provisioned.
    pub async fn start(dbname: &str) -> Result<Self, CrudError> {
        let mut postgresql = PostgreSQL::default();
        postgresql.setup().await.map_err(embedded_error)?;
        postgresql.start().await.map_err(embedded_error)?;
        postgresql
            .create_database(dbname)
            .await
            .map_err(embedded_error)?;

        let settings = postgresql.settings();
        let mut config = Config::new();
        config
            .host(settings.host.as_str())
            .port(settings.port)
            .user(settings.username.as_str())
            .password(settings.password.as_str())
            .dbname(dbname);
        Ok(Self { postgresql, config })
    }

    /// # Errors
    /// Returns `CrudError::ConnectionError` if the server does not shut down cleanly.
    pub async fn stop(self) -> Result<(), CrudError> {
        self.postgresql.stop().await.map_err(embedded_error)
    }
}

fn embedded_error(e: postgresql_embedded::Error) -> CrudError {
    CrudError::ConnectionError(format!("embedded postgres: {e}"))
}
