use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::{Connection, ToSql};
use tracing::debug;

use crate::error::CrudError;
use crate::results::ResultSet;
use crate::types::{QueryAndParams, RowValues};

use super::params::Params;

/// Extract a `RowValues` from a `SQLite` row.
///
/// # Errors
/// Returns `CrudError::SqliteError` if the value cannot be read.
pub fn sqlite_extract_value(row: &rusqlite::Row, idx: usize) -> Result<RowValues, CrudError> {
    let value: Value = row.get(idx)?;
    Ok(match value {
        Value::Null => RowValues::Null,
        Value::Integer(i) => RowValues::Int(i),
        Value::Real(f) => RowValues::Float(f),
        Value::Text(s) => RowValues::Text(s),
        Value::Blob(b) => RowValues::Blob(b),
    })
}

/// Run a row-returning statement and collect every row.
///
/// # Errors
/// Returns `CrudError::SqliteError` if preparation, binding or stepping fails.
pub fn build_result_set(conn: &Connection, query: &QueryAndParams) -> Result<ResultSet, CrudError> {
    debug!(sql = %query.query, params = query.params.len(), "sqlite query");
    let mut stmt = conn.prepare_cached(&query.query)?;
    let params = Params::convert(&query.params);
    let param_refs: Vec<&dyn ToSql> = params.as_refs();

    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let col_count = column_names.len();

    let mut result_set = ResultSet::with_capacity(10);
    result_set.set_column_names(Arc::new(column_names));

    let mut rows_iter = stmt.query(&param_refs[..])?;
    while let Some(row) = rows_iter.next()? {
        let mut row_values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            row_values.push(sqlite_extract_value(row, i)?);
        }
        result_set.add_row_values(row_values);
    }

    Ok(result_set)
}

/// Run a statement and return the number of changed rows.
///
/// # Errors
/// Returns `CrudError::SqliteError` if preparation or execution fails.
pub fn execute_dml(conn: &Connection, query: &QueryAndParams) -> Result<usize, CrudError> {
    debug!(sql = %query.query, params = query.params.len(), "sqlite execute");
    let mut stmt = conn.prepare_cached(&query.query)?;
    let params = Params::convert(&query.params);
    let param_refs: Vec<&dyn ToSql> = params.as_refs();
    Ok(stmt.execute(&param_refs[..])?)
}
