//! Caller-facing transaction scopes.
//!
//! The body runs inside `BEGIN`; it is committed when the body returns `Ok` and rolled back when
//! it returns `Err`. CRUD helpers called inside the body nest through savepoints, so a failed
//! helper does not poison the caller's transaction.

use std::future::Future;
use std::pin::Pin;

use tracing::{error, warn};

use crate::error::CrudError;
use crate::session::{AsyncSession, Session};

/// Future returned by an [`a_transaction`] body.
pub type TxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CrudError>> + Send + 'a>>;

/// Run `body` in a transaction on a blocking session.
///
/// ```rust,no_run
/// use sql_crud_utils::prelude::*;
/// # fn demo() -> Result<(), CrudError> {
/// let mut session = SqliteSession::open_in_memory()?;
/// transaction(&mut session, |tx| {
///     tx.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)")?;
///     tx.execute(&QueryAndParams::new_without_params("INSERT INTO t DEFAULT VALUES"))
/// })?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
/// `CrudError::Transaction` with operation `"begin"` when a transaction is already open,
/// `"transaction"` wrapping the body's error after rollback, or `"commit"` when the commit fails.
pub fn transaction<S, T, F>(session: &mut S, body: F) -> Result<T, CrudError>
where
    S: Session + ?Sized,
    F: FnOnce(&mut S) -> Result<T, CrudError>,
{
    session
        .begin()
        .map_err(|e| CrudError::transaction("begin", e))?;
    match body(session) {
        Ok(value) => {
            session
                .commit()
                .map_err(|e| CrudError::transaction("commit", e))?;
            Ok(value)
        }
        Err(err) => {
            error!(error = %err, "transaction body failed, rolling back");
            if session.in_transaction()
                && let Err(rollback_err) = session.rollback()
            {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(CrudError::transaction("transaction", err))
        }
    }
}

/// Run `body` in a transaction on an async session.
///
/// ```rust,no_run
/// use sql_crud_utils::prelude::*;
/// # async fn demo(mut session: AnySession) -> Result<(), CrudError> {
/// let count = a_transaction(&mut session, |tx| {
///     Box::pin(async move {
///         tx.execute(&QueryAndParams::new_without_params("DELETE FROM audit_log")).await
///     })
/// })
/// .await?;
/// # let _ = count;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
/// Same as [`transaction`].
pub async fn a_transaction<S, T, F>(session: &mut S, body: F) -> Result<T, CrudError>
where
    S: AsyncSession + ?Sized,
    F: for<'a> FnOnce(&'a mut S) -> TxFuture<'a, T>,
{
    session
        .begin()
        .await
        .map_err(|e| CrudError::transaction("begin", e))?;
    let outcome = body(&mut *session).await;
    match outcome {
        Ok(value) => {
            session
                .commit()
                .await
                .map_err(|e| CrudError::transaction("commit", e))?;
            Ok(value)
        }
        Err(err) => {
            error!(error = %err, "transaction body failed, rolling back");
            if session.in_transaction()
                && let Err(rollback_err) = session.rollback().await
            {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(CrudError::transaction("transaction", err))
        }
    }
}
