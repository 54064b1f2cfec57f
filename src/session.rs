//! Session traits the CRUD helpers run against.
//!
//! Statements handed to a session are already rendered for its [`Dialect`]; caller-written `$n`
//! queries are translated before they get here.

use async_trait::async_trait;

use crate::dialect::Dialect;
use crate::error::CrudError;
use crate::results::ResultSet;
use crate::types::QueryAndParams;

/// A blocking database session.
///
/// Transactions are opened with [`Session::begin`] and tracked by the session; statements run
/// outside one are auto-committed by the backend.
pub trait Session {
    fn dialect(&self) -> Dialect;

    /// Run a statement that returns rows.
    ///
    /// # Errors
    /// Returns the driver error when preparation or execution fails.
    fn query(&mut self, query: &QueryAndParams) -> Result<ResultSet, CrudError>;

    /// Run a statement and return the affected row count.
    ///
    /// # Errors
    /// Returns the driver error when preparation or execution fails.
    fn execute(&mut self, query: &QueryAndParams) -> Result<usize, CrudError>;

    /// Run one or more parameterless statements.
    ///
    /// # Errors
    /// Returns the driver error of the first failing statement.
    fn execute_batch(&mut self, sql: &str) -> Result<(), CrudError>;

    fn in_transaction(&self) -> bool;

    /// # Errors
    /// Fails when a transaction is already open or the backend refuses `BEGIN`.
    fn begin(&mut self) -> Result<(), CrudError>;

    /// # Errors
    /// Fails when no transaction is open or the backend refuses `COMMIT`.
    fn commit(&mut self) -> Result<(), CrudError>;

    /// # Errors
    /// Fails when no transaction is open or the backend refuses `ROLLBACK`.
    fn rollback(&mut self) -> Result<(), CrudError>;

    /// # Errors
    /// Returns the driver error.
    fn savepoint(&mut self, name: &str) -> Result<(), CrudError> {
        self.execute_batch(&format!("SAVEPOINT {name}"))
    }

    /// # Errors
    /// Returns the driver error.
    fn release_savepoint(&mut self, name: &str) -> Result<(), CrudError> {
        self.execute_batch(&format!("RELEASE SAVEPOINT {name}"))
    }

    /// Undo everything since `name` and drop the savepoint.
    ///
    /// # Errors
    /// Returns the driver error.
    fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), CrudError> {
        self.execute_batch(&format!(
            "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"
        ))
    }
}

/// The non-blocking counterpart of [`Session`]; every statement is awaited.
#[async_trait]
pub trait AsyncSession: Send {
    fn dialect(&self) -> Dialect;

    /// # Errors
    /// Returns the driver error when preparation or execution fails.
    async fn query(&mut self, query: &QueryAndParams) -> Result<ResultSet, CrudError>;

    /// # Errors
    /// Returns the driver error when preparation or execution fails.
    async fn execute(&mut self, query: &QueryAndParams) -> Result<usize, CrudError>;

    /// # Errors
    /// Returns the driver error of the first failing statement.
    async fn execute_batch(&mut self, sql: &str) -> Result<(), CrudError>;

    fn in_transaction(&self) -> bool;

    /// # Errors
    /// Fails when a transaction is already open or the backend refuses `BEGIN`.
    async fn begin(&mut self) -> Result<(), CrudError>;

    /// # Errors
    /// Fails when no transaction is open or the backend refuses `COMMIT`.
    async fn commit(&mut self) -> Result<(), CrudError>;

    /// # Errors
    /// Fails when no transaction is open or the backend refuses `ROLLBACK`.
    async fn rollback(&mut self) -> Result<(), CrudError>;

    /// # Errors
    /// Returns the driver error.
    async fn savepoint(&mut self, name: &str) -> Result<(), CrudError> {
        self.execute_batch(&format!("SAVEPOINT {name}")).await
    }

    /// # Errors
    /// Returns the driver error.
    async fn release_savepoint(&mut self, name: &str) -> Result<(), CrudError> {
        self.execute_batch(&format!("RELEASE SAVEPOINT {name}"))
            .await
    }

    /// # Errors
    /// Returns the driver error.
    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), CrudError> {
        self.execute_batch(&format!(
            "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"
        ))
        .await
    }
}

pub(crate) fn already_open() -> CrudError {
    CrudError::ExecutionError("a transaction is already open on this session".into())
}

pub(crate) fn not_open() -> CrudError {
    CrudError::ExecutionError("no transaction is open on this session".into())
}
