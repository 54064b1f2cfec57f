//! CRUD helpers over an [`AsyncSession`]; the same operations as [`super::blocking`], awaited.

use tracing::{error, info, warn};

use crate::config::{self, CrudConfig};
use crate::error::CrudError;
use crate::model::{Model, Relationship};
use crate::results::{CustomDbRow, ResultSet};
use crate::session::AsyncSession;
use crate::types::{FieldMap, QueryAndParams, RowValues};

use super::{
    BulkInsertFailure, FailedRow, LoadOptions, RowsQuery, UpsertPlan, WRITE_SAVEPOINT, WriteScope,
    apply_changes, attach_related, check_changes, eager_relationships, native_query, new_from_maps,
    plan_delete, plan_get_row, plan_get_rows, plan_id_list, plan_insert, plan_lookup, plan_related,
    plan_reread_inserted, plan_update, plan_upsert, prepare_insert, rows_to_models,
};

async fn open_scope<S: AsyncSession + ?Sized>(session: &mut S) -> Result<WriteScope, CrudError> {
    if session.in_transaction() {
        session.savepoint(WRITE_SAVEPOINT).await?;
        Ok(WriteScope::Savepoint)
    } else {
        session
            .begin()
            .await
            .map_err(|e| CrudError::transaction("begin", e))?;
        Ok(WriteScope::Transaction)
    }
}

async fn close_scope<S: AsyncSession + ?Sized, T>(
    session: &mut S,
    scope: WriteScope,
    operation: &str,
    result: Result<T, CrudError>,
) -> Result<T, CrudError> {
    match result {
        Ok(value) => {
            match scope {
                WriteScope::Transaction => session
                    .commit()
                    .await
                    .map_err(|e| CrudError::transaction("commit", e))?,
                WriteScope::Savepoint => session.release_savepoint(WRITE_SAVEPOINT).await?,
            }
            Ok(value)
        }
        Err(err) => {
            error!(operation, error = %err, "write failed, rolling back");
            let undo = match scope {
                WriteScope::Transaction => session.rollback().await,
                WriteScope::Savepoint => session.rollback_to_savepoint(WRITE_SAVEPOINT).await,
            };
            if let Err(rollback_err) = undo {
                warn!(operation, error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

async fn load_relationships<M: Model, S: AsyncSession + ?Sized>(
    session: &mut S,
    rels: &[&'static Relationship],
    rows: &mut [M],
) -> Result<(), CrudError> {
    for rel in rels {
        let related = match plan_related(session.dialect(), rel, rows) {
            Some(query) => session.query(&query).await?,
            None => ResultSet::default(),
        };
        attach_related(rel, rows, related)?;
    }
    Ok(())
}

async fn insert_in_scope<M: Model, S: AsyncSession + ?Sized>(
    session: &mut S,
    row: &M,
) -> Result<M, CrudError> {
    let dialect = session.dialect();
    let Some(query) = plan_insert(dialect, std::slice::from_ref(row)) else {
        return Err(CrudError::ExecutionError(format!(
            "could not build an insert for {}",
            M::TABLE_NAME
        )));
    };
    let rs = if dialect.supports_returning() {
        session.query(&query).await?
    } else {
        session.execute(&query).await?;
        session.query(&plan_reread_inserted(dialect, row)).await?
    };
    match rs.results.first() {
        Some(stored) => M::from_row(stored),
        None => Err(CrudError::ExecutionError(format!(
            "insert into {} returned no row",
            M::TABLE_NAME
        ))),
    }
}

async fn insert_one_scoped<M: Model, S: AsyncSession + ?Sized>(
    session: &mut S,
    row: &M,
    operation: &str,
) -> Result<M, CrudError> {
    let scope = open_scope(session).await?;
    let result = insert_in_scope(session, row).await;
    close_scope(session, scope, operation, result).await
}

/// Fetch one record by primary key.
///
/// # Errors
/// Returns the driver error, or `CrudError::Validation` for an unknown relationship in `load`.
pub async fn get_row<M: Model, S: AsyncSession + ?Sized>(
    session: &mut S,
    id: impl Into<RowValues>,
    load: &LoadOptions,
) -> Result<Option<M>, CrudError> {
    let rels = eager_relationships::<M>(load)?;
    let query = plan_get_row::<M>(session.dialect(), id.into());
    let rs = session.query(&query).await?;
    let mut rows = rows_to_models::<M>(&rs)?;
    load_relationships(session, &rels, &mut rows).await?;
    Ok(rows.into_iter().next())
}

/// Filtered, sorted, paginated listing.
///
/// # Errors
/// Returns `CrudError::Validation` for malformed filters or arguments, else the driver error.
pub async fn get_rows<M: Model, S: AsyncSession + ?Sized>(
    session: &mut S,
    query: &RowsQuery,
) -> Result<Vec<M>, CrudError> {
    let (statement, rels) = plan_get_rows::<M>(session.dialect(), query)?;
    let rs = session.query(&statement).await?;
    let mut rows = rows_to_models::<M>(&rs)?;
    load_relationships(session, &rels, &mut rows).await?;
    Ok(rows)
}

/// Return the first record matching `lookup`, or insert one built from `lookup` then `defaults`.
///
/// # Errors
/// Returns `CrudError::Validation` for unknown columns or a failed model check, else the driver
/// error of the lookup or insert.
pub async fn get_one_or_create<M: Model + Default, S: AsyncSession + ?Sized>(
    session: &mut S,
    lookup: &FieldMap,
    defaults: &FieldMap,
    load: &LoadOptions,
) -> Result<(M, bool), CrudError> {
    let rels = eager_relationships::<M>(load)?;
    let query = plan_lookup::<M>(session.dialect(), lookup)?;
    let rs = session.query(&query).await?;
    let (mut row, created) = match rs.results.first() {
        Some(found) => (M::from_row(found)?, false),
        None => {
            let fresh = new_from_maps::<M>(lookup, defaults)?;
            (write_row(session, fresh).await?, true)
        }
    };
    load_relationships(session, &rels, std::slice::from_mut(&mut row)).await?;
    Ok((row, created))
}

/// Insert one record and return it as stored.
///
/// # Errors
/// Returns `CrudError::Validation` when the model check fails, else the driver error.
pub async fn write_row<M: Model, S: AsyncSession + ?Sized>(
    session: &mut S,
    mut row: M,
) -> Result<M, CrudError> {
    prepare_insert(&mut row)?;
    insert_one_scoped(session, &row, "write_row").await
}

/// Insert many records in one statement, falling back to one insert per row when that fails.
///
/// # Errors
/// Returns the failed rows with their causes next to the ones that did get inserted.
pub async fn insert_data_rows<M: Model, S: AsyncSession + ?Sized>(
    session: &mut S,
    mut rows: Vec<M>,
) -> Result<Vec<M>, BulkInsertFailure<M>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let dialect = session.dialect();
    let prepared = rows.iter_mut().try_for_each(prepare_insert);

    if prepared.is_ok()
        && dialect.supports_returning()
        && let Some(query) = plan_insert(dialect, &rows)
    {
        let batch = match open_scope(session).await {
            Ok(scope) => {
                let result = match session.query(&query).await {
                    Ok(rs) => rows_to_models::<M>(&rs),
                    Err(e) => Err(e),
                };
                close_scope(session, scope, "insert_data_rows", result).await
            }
            Err(e) => Err(e),
        };
        match batch {
            Ok(inserted) => return Ok(inserted),
            Err(err) => info!(
                table = M::TABLE_NAME,
                rows = rows.len(),
                error = %err,
                "bulk insert failed, retrying row by row"
            ),
        }
    }

    let mut inserted = Vec::with_capacity(rows.len());
    let mut failed = Vec::new();
    for (index, mut row) in rows.into_iter().enumerate() {
        let outcome = match prepare_insert(&mut row) {
            Ok(()) => insert_one_scoped(session, &row, "insert_data_rows").await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(stored) => inserted.push(stored),
            Err(error) => failed.push(FailedRow { index, row, error }),
        }
    }
    if failed.is_empty() {
        Ok(inserted)
    } else {
        Err(BulkInsertFailure { inserted, failed })
    }
}

async fn update_in_scope<M: Model, S: AsyncSession + ?Sized>(
    session: &mut S,
    id: RowValues,
    changes: &FieldMap,
) -> Result<M, CrudError> {
    let dialect = session.dialect();
    let existing = session.query(&plan_get_row::<M>(dialect, id.clone())).await?;
    let Some(current) = existing.results.first() else {
        return Err(CrudError::not_found::<M>(&id));
    };
    let (updated, set) = apply_changes::<M>(current, changes)?;
    session.execute(&plan_update::<M>(dialect, id, set)).await?;
    let stored = session
        .query(&plan_get_row::<M>(dialect, updated.primary_key()))
        .await?;
    match stored.results.first() {
        Some(row) => M::from_row(row),
        None => Ok(updated),
    }
}

/// Apply a partial update to the record with primary key `id` and return the stored result.
///
/// # Errors
/// Returns `CrudError::RecordNotFound` when no such record exists, `CrudError::Validation` for
/// unknown columns or a failed model check, else the driver error.
pub async fn update_row<M: Model, S: AsyncSession + ?Sized>(
    session: &mut S,
    id: impl Into<RowValues>,
    changes: &FieldMap,
) -> Result<M, CrudError> {
    check_changes::<M>(changes)?;
    let id = id.into();
    let scope = open_scope(session).await?;
    let result = update_in_scope::<M, S>(session, id, changes).await;
    close_scope(session, scope, "update_row", result).await
}

/// Delete the record with primary key `id`.
///
/// # Errors
/// Returns `CrudError::RecordNotFound` when nothing was deleted, else the driver error.
pub async fn delete_row<M: Model, S: AsyncSession + ?Sized>(
    session: &mut S,
    id: impl Into<RowValues>,
) -> Result<(), CrudError> {
    let id = id.into();
    let query = plan_delete::<M>(session.dialect(), id.clone());
    let scope = open_scope(session).await?;
    let result = match session.execute(&query).await {
        Ok(0) => Err(CrudError::not_found::<M>(&id)),
        Ok(_) => Ok(()),
        Err(e) => Err(e),
    };
    close_scope(session, scope, "delete_row", result).await
}

/// Every record whose primary key is in `ids`; an empty list reads nothing.
///
/// # Errors
/// Returns the driver error.
pub async fn get_rows_within_id_list<M: Model, S: AsyncSession + ?Sized>(
    session: &mut S,
    ids: &[RowValues],
) -> Result<Vec<M>, CrudError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let query = plan_id_list::<M>(session.dialect(), ids);
    let rs = session.query(&query).await?;
    rows_to_models(&rs)
}

async fn upsert_in_scope<M: Model, S: AsyncSession + ?Sized>(
    session: &mut S,
    plan: &UpsertPlan,
    statement: &QueryAndParams,
    dialect: crate::dialect::Dialect,
) -> Result<Vec<M>, CrudError> {
    if dialect.supports_returning() {
        let rs = session
            .query(statement)
            .await
            .map_err(|e| CrudError::query_execution(&statement.query, e))?;
        return rows_to_models(&rs);
    }
    session
        .execute(statement)
        .await
        .map_err(|e| CrudError::query_execution(&statement.query, e))?;
    let mut stored = Vec::with_capacity(plan.rows.len());
    for reread in plan.reread::<M>(dialect) {
        let rs = session.query(&reread).await?;
        stored.extend(rows_to_models::<M>(&rs)?);
    }
    Ok(stored)
}

/// Insert-or-update every mapping in one statement, rendered for the configured dialect.
///
/// # Errors
/// Returns `CrudError::Validation` for an inconsistent payload, `CrudError::ConfigError` for a bad
/// `SQL_DIALECT` or one that differs from the session's, or `CrudError::QueryExecution` wrapping
/// the driver error.
pub async fn bulk_upsert_mappings<M: Model, S: AsyncSession + ?Sized>(
    session: &mut S,
    payload: &[FieldMap],
    conflict_keys: Option<&[&str]>,
) -> Result<Vec<M>, CrudError> {
    bulk_upsert_mappings_with::<M, S>(session, config::global()?, payload, conflict_keys).await
}

/// [`bulk_upsert_mappings`] with an explicit configuration instead of the process-wide one.
///
/// # Errors
/// Same as [`bulk_upsert_mappings`].
pub async fn bulk_upsert_mappings_with<M: Model, S: AsyncSession + ?Sized>(
    session: &mut S,
    config: &CrudConfig,
    payload: &[FieldMap],
    conflict_keys: Option<&[&str]>,
) -> Result<Vec<M>, CrudError> {
    let dialect = config.upsert_dialect(session.dialect())?;
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    let plan = plan_upsert::<M>(payload, conflict_keys)?;
    let statement = plan.statement(M::TABLE_NAME, dialect)?;

    let scope = open_scope(session).await?;
    let result = upsert_in_scope::<M, S>(session, &plan, &statement, dialect).await;
    close_scope(session, scope, "bulk_upsert_mappings", result).await
}

/// Run a caller-written `$n` query and return its first row.
///
/// # Errors
/// Returns `CrudError::ParameterError` for placeholders without a parameter, or
/// `CrudError::QueryExecution` wrapping the driver error.
pub async fn get_result_from_query<S: AsyncSession + ?Sized>(
    session: &mut S,
    query: &QueryAndParams,
) -> Result<Option<CustomDbRow>, CrudError> {
    let native = native_query(session.dialect(), query)?;
    let rs = session
        .query(&native)
        .await
        .map_err(|e| CrudError::query_execution(&query.query, e))?;
    Ok(rs.results.into_iter().next())
}

/// Run a caller-written `$n` query expected to match at most one `M`.
///
/// # Errors
/// Returns `CrudError::MultipleRecords` when more than one row comes back.
pub async fn get_one_from_query<M: Model, S: AsyncSession + ?Sized>(
    session: &mut S,
    query: &QueryAndParams,
) -> Result<Option<M>, CrudError> {
    let native = native_query(session.dialect(), query)?;
    let rs = session
        .query(&native)
        .await
        .map_err(|e| CrudError::query_execution(&query.query, e))?;
    match rs.results.as_slice() {
        [] => Ok(None),
        [row] => M::from_row(row).map(Some),
        many => Err(CrudError::multiple_found::<M>(many.len(), None)),
    }
}
