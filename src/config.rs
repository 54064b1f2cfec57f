//! Process-wide settings read from the environment.

use std::env;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::error::CrudError;

/// Environment variable naming the dialect used for upserts.
pub const SQL_DIALECT_VAR: &str = "SQL_DIALECT";

/// Settings shared by every CRUD call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrudConfig {
    /// Dialect forced by `SQL_DIALECT`; `None` means "use the session's own".
    pub dialect: Option<Dialect>,
}

impl CrudConfig {
    /// Load a local `.env` (a missing file is fine) and read `SQL_DIALECT`.
    ///
    /// # Errors
    /// Returns `CrudError::ConfigError` if `SQL_DIALECT` names an unsupported dialect.
    pub fn from_env() -> Result<Self, CrudError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse from any key lookup.
    ///
    /// ```rust
    /// use sql_crud_utils::config::CrudConfig;
    /// use sql_crud_utils::dialect::Dialect;
    ///
    /// let cfg = CrudConfig::from_lookup(|_| Some("Postgres".to_string()))?;
    /// assert_eq!(cfg.dialect, Some(Dialect::Postgresql));
    /// # Ok::<(), sql_crud_utils::error::CrudError>(())
    /// ```
    ///
    /// # Errors
    /// Returns `CrudError::ConfigError` if `SQL_DIALECT` names an unsupported dialect.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CrudError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let dialect = match lookup(SQL_DIALECT_VAR) {
            Some(raw) if !raw.trim().is_empty() => Some(raw.parse::<Dialect>()?),
            _ => None,
        };
        Ok(Self { dialect })
    }

    /// The dialect upserts are rendered for on a session speaking `session_dialect`.
    ///
    /// # Errors
    /// Returns `CrudError::ConfigError` when `SQL_DIALECT` names a different dialect than the
    /// session's, since the rendered statement could not run there.
    pub fn upsert_dialect(&self, session_dialect: Dialect) -> Result<Dialect, CrudError> {
        match self.dialect {
            Some(configured) if configured != session_dialect => Err(CrudError::ConfigError(format!(
                "{SQL_DIALECT_VAR} is {configured} but the session speaks {session_dialect}"
            ))),
            Some(configured) => Ok(configured),
            None => Ok(session_dialect),
        }
    }
}

static GLOBAL: OnceLock<Result<CrudConfig, String>> = OnceLock::new();

/// The process-wide configuration, resolved on first use and cached (failures included).
///
/// # Errors
/// Returns `CrudError::ConfigError` if `SQL_DIALECT` was invalid when first read.
pub fn global() -> Result<&'static CrudConfig, CrudError> {
    GLOBAL
        .get_or_init(|| CrudConfig::from_env().map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|e| CrudError::ConfigError(e.clone()))
}
