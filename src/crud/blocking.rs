//! CRUD helpers over a blocking [`Session`].
//!
//! ```rust,no_run
//! use sql_crud_utils::prelude::*;
//! # fn demo<M: Model>() -> Result<(), CrudError> {
//! let mut session = SqliteSession::open("app.db")?;
//! let first: Option<M> = blocking::get_row(&mut session, 1, &LoadOptions::none())?;
//! # let _ = first;
//! # Ok(())
//! # }
//! ```

use tracing::{error, info, warn};

use crate::config::{self, CrudConfig};
use crate::error::CrudError;
use crate::model::{Model, Relationship};
use crate::results::CustomDbRow;
use crate::session::Session;
use crate::types::{FieldMap, QueryAndParams, RowValues};

use super::{
    BulkInsertFailure, FailedRow, LoadOptions, RowsQuery, WRITE_SAVEPOINT, WriteScope, apply_changes,
    attach_related, check_changes, eager_relationships, native_query, new_from_maps, plan_delete,
    plan_get_row, plan_get_rows, plan_id_list, plan_insert, plan_lookup, plan_related,
    plan_reread_inserted, plan_update, plan_upsert, prepare_insert, rows_to_models,
};

fn open_scope<S: Session + ?Sized>(session: &mut S) -> Result<WriteScope, CrudError> {
    if session.in_transaction() {
        session.savepoint(WRITE_SAVEPOINT)?;
        Ok(WriteScope::Savepoint)
    } else {
        session
            .begin()
            .map_err(|e| CrudError::transaction("begin", e))?;
        Ok(WriteScope::Transaction)
    }
}

/// End the scope: keep the work on success, undo it on failure.
fn close_scope<S: Session + ?Sized, T>(
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
                    .map_err(|e| CrudError::transaction("commit", e))?,
                WriteScope::Savepoint => session.release_savepoint(WRITE_SAVEPOINT)?,
            }
            Ok(value)
        }
        Err(err) => {
            error!(operation, error = %err, "write failed, rolling back");
            let undo = match scope {
                WriteScope::Transaction => session.rollback(),
                WriteScope::Savepoint => session.rollback_to_savepoint(WRITE_SAVEPOINT),
            };
            if let Err(rollback_err) = undo {
                warn!(operation, error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

fn write_scope<S, T, F>(session: &mut S, operation: &str, body: F) -> Result<T, CrudError>
where
    S: Session + ?Sized,
    F: FnOnce(&mut S) -> Result<T, CrudError>,
{
    let scope = open_scope(session)?;
    let result = body(session);
    close_scope(session, scope, operation, result)
}

fn load_relationships<M: Model, S: Session + ?Sized>(
    session: &mut S,
    rels: &[&'static Relationship],
    rows: &mut [M],
) -> Result<(), CrudError> {
    for rel in rels {
        let related = match plan_related(session.dialect(), rel, rows) {
            Some(query) => session.query(&query)?,
            None => Default::default(),
        };
        attach_related(rel, rows, related)?;
    }
    Ok(())
}

fn insert_in_scope<M: Model, S: Session + ?Sized>(session: &mut S, row: &M) -> Result<M, CrudError> {
    let dialect = session.dialect();
    let Some(query) = plan_insert(dialect, std::slice::from_ref(row)) else {
        return Err(CrudError::ExecutionError(format!(
            "could not build an insert for {}",
            M::TABLE_NAME
        )));
    };
    let rs = if dialect.supports_returning() {
        session.query(&query)?
    } else {
        session.execute(&query)?;
        session.query(&plan_reread_inserted(dialect, row))?
    };
    match rs.results.first() {
        Some(stored) => M::from_row(stored),
        None => Err(CrudError::ExecutionError(format!(
            "insert into {} returned no row",
            M::TABLE_NAME
        ))),
    }
}

/// Fetch one record by primary key.
///
/// # Errors
/// Returns the driver error, or `CrudError::Validation` for an unknown relationship in `load`.
pub fn get_row<M: Model, S: Session + ?Sized>(
    session: &mut S,
    id: impl Into<RowValues>,
    load: &LoadOptions,
) -> Result<Option<M>, CrudError> {
    let rels = eager_relationships::<M>(load)?;
    let rs = session.query(&plan_get_row::<M>(session.dialect(), id.into()))?;
    let mut rows = rows_to_models::<M>(&rs)?;
    load_relationships(session, &rels, &mut rows)?;
    Ok(rows.into_iter().next())
}

/// Filtered, sorted, paginated listing.
///
/// # Errors
/// Returns `CrudError::Validation` for malformed filters or arguments, else the driver error.
pub fn get_rows<M: Model, S: Session + ?Sized>(
    session: &mut S,
    query: &RowsQuery,
) -> Result<Vec<M>, CrudError> {
    let (statement, rels) = plan_get_rows::<M>(session.dialect(), query)?;
    let rs = session.query(&statement)?;
    let mut rows = rows_to_models::<M>(&rs)?;
    load_relationships(session, &rels, &mut rows)?;
    Ok(rows)
}

/// Return the first record matching `lookup`, or insert one built from `lookup` then `defaults`.
///
/// The flag is `true` when a record was created.
///
/// # Errors
/// Returns `CrudError::Validation` for unknown columns or a failed model check, else the driver
/// error of the lookup or insert.
pub fn get_one_or_create<M: Model + Default, S: Session + ?Sized>(
    session: &mut S,
    lookup: &FieldMap,
    defaults: &FieldMap,
    load: &LoadOptions,
) -> Result<(M, bool), CrudError> {
    let rels = eager_relationships::<M>(load)?;
    let rs = session.query(&plan_lookup::<M>(session.dialect(), lookup)?)?;
    let (mut row, created) = match rs.results.first() {
        Some(found) => (M::from_row(found)?, false),
        None => (write_row(session, new_from_maps::<M>(lookup, defaults)?)?, true),
    };
    load_relationships(session, &rels, std::slice::from_mut(&mut row))?;
    Ok((row, created))
}

/// Insert one record and return it as stored.
///
/// # Errors
/// Returns `CrudError::Validation` when the model check fails, else the driver error.
pub fn write_row<M: Model, S: Session + ?Sized>(session: &mut S, mut row: M) -> Result<M, CrudError> {
    prepare_insert(&mut row)?;
    write_scope(session, "write_row", |s| insert_in_scope(s, &row))
}

/// Insert many records in one statement, falling back to one insert per row when that fails.
///
/// # Errors
/// Returns the failed rows with their causes next to the ones that did get inserted.
pub fn insert_data_rows<M: Model, S: Session + ?Sized>(
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
        let batch = write_scope(session, "insert_data_rows", |s| {
            let rs = s.query(&query)?;
            rows_to_models::<M>(&rs)
        });
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
        let outcome = prepare_insert(&mut row)
            .and_then(|()| write_scope(session, "insert_data_rows", |s| insert_in_scope(s, &row)));
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

/// Apply a partial update to the record with primary key `id` and return the stored result.
///
/// # Errors
/// Returns `CrudError::RecordNotFound` when no such record exists, `CrudError::Validation` for
/// unknown columns or a failed model check, else the driver error.
pub fn update_row<M: Model, S: Session + ?Sized>(
    session: &mut S,
    id: impl Into<RowValues>,
    changes: &FieldMap,
) -> Result<M, CrudError> {
    check_changes::<M>(changes)?;
    let id = id.into();
    write_scope(session, "update_row", |s| {
        let dialect = s.dialect();
        let existing = s.query(&plan_get_row::<M>(dialect, id.clone()))?;
        let Some(current) = existing.results.first() else {
            return Err(CrudError::not_found::<M>(&id));
        };
        let (updated, set) = apply_changes::<M>(current, changes)?;
        s.execute(&plan_update::<M>(dialect, id, set))?;
        let stored = s.query(&plan_get_row::<M>(dialect, updated.primary_key()))?;
        match stored.results.first() {
            Some(row) => M::from_row(row),
            None => Ok(updated),
        }
    })
}

/// Delete the record with primary key `id`.
///
/// # Errors
/// Returns `CrudError::RecordNotFound` when nothing was deleted, else the driver error.
pub fn delete_row<M: Model, S: Session + ?Sized>(
    session: &mut S,
    id: impl Into<RowValues>,
) -> Result<(), CrudError> {
    let id = id.into();
    write_scope(session, "delete_row", |s| {
        let affected = s.execute(&plan_delete::<M>(s.dialect(), id.clone()))?;
        if affected == 0 {
            return Err(CrudError::not_found::<M>(&id));
        }
        Ok(())
    })
}

/// Every record whose primary key is in `ids`; an empty list reads nothing.
///
/// # Errors
/// Returns the driver error.
pub fn get_rows_within_id_list<M: Model, S: Session + ?Sized>(
    session: &mut S,
    ids: &[RowValues],
) -> Result<Vec<M>, CrudError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let rs = session.query(&plan_id_list::<M>(session.dialect(), ids))?;
    rows_to_models(&rs)
}

/// Insert-or-update every mapping in one statement, rendered for the configured dialect.
///
/// Every mapping must carry the same keys. `conflict_keys` defaults to the primary key.
///
/// # Errors
/// Returns `CrudError::Validation` for an inconsistent payload, `CrudError::ConfigError` for a bad
/// `SQL_DIALECT` or one that differs from the session's, or `CrudError::QueryExecution` wrapping
/// the driver error.
pub fn bulk_upsert_mappings<M: Model, S: Session + ?Sized>(
    session: &mut S,
    payload: &[FieldMap],
    conflict_keys: Option<&[&str]>,
) -> Result<Vec<M>, CrudError> {
    bulk_upsert_mappings_with::<M, S>(session, config::global()?, payload, conflict_keys)
}

/// [`bulk_upsert_mappings`] with an explicit configuration instead of the process-wide one.
///
/// # Errors
/// Same as [`bulk_upsert_mappings`].
pub fn bulk_upsert_mappings_with<M: Model, S: Session + ?Sized>(
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

    write_scope(session, "bulk_upsert_mappings", |s| {
        if dialect.supports_returning() {
            let rs = s
                .query(&statement)
                .map_err(|e| CrudError::query_execution(&statement.query, e))?;
            return rows_to_models(&rs);
        }
        s.execute(&statement)
            .map_err(|e| CrudError::query_execution(&statement.query, e))?;
        let mut stored = Vec::with_capacity(payload.len());
        for reread in plan.reread::<M>(dialect) {
            let rs = s.query(&reread)?;
            stored.extend(rows_to_models::<M>(&rs)?);
        }
        Ok(stored)
    })
}

/// Run a caller-written `$n` query and return its first row.
///
/// # Errors
/// Returns `CrudError::ParameterError` for placeholders without a parameter, or
/// `CrudError::QueryExecution` wrapping the driver error.
pub fn get_result_from_query<S: Session + ?Sized>(
    session: &mut S,
    query: &QueryAndParams,
) -> Result<Option<CustomDbRow>, CrudError> {
    let native = native_query(session.dialect(), query)?;
    let rs = session
        .query(&native)
        .map_err(|e| CrudError::query_execution(&query.query, e))?;
    Ok(rs.results.into_iter().next())
}

/// Run a caller-written `$n` query expected to match at most one `M`.
///
/// # Errors
/// Returns `CrudError::MultipleRecords` when more than one row comes back.
pub fn get_one_from_query<M: Model, S: Session + ?Sized>(
    session: &mut S,
    query: &QueryAndParams,
) -> Result<Option<M>, CrudError> {
    let native = native_query(session.dialect(), query)?;
    let rs = session
        .query(&native)
        .map_err(|e| CrudError::query_execution(&query.query, e))?;
    match rs.results.as_slice() {
        [] => Ok(None),
        [row] => M::from_row(row).map(Some),
        many => Err(CrudError::multiple_found::<M>(many.len(), None)),
    }
}
