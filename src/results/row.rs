use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CrudError;
use crate::types::RowValues;

/// A row from a database query result
///
/// This struct represents a single row from a database query result,
/// with access to both the column names and the values.
#[derive(Debug, Clone)]
pub struct CustomDbRow {
    /// The column names for this row (shared across all rows in a result set)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row
    pub rows: Vec<RowValues>,
    // shared name -> index map, built once per result set
    #[doc(hidden)]
    pub(crate) column_index_cache: Arc<HashMap<String, usize>>,
}

impl CustomDbRow {
    /// Create a new database row
    ///
    /// # Arguments
    ///
    /// * `column_names` - The column names
    /// * `rows` - The values for this row
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, rows: Vec<RowValues>) -> Self {
        let cache = Arc::new(index_columns(&column_names));
        Self {
            column_names,
            rows,
            column_index_cache: cache,
        }
    }

    /// Get the index of a column by name
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        if let Some(&idx) = self.column_index_cache.get(column_name) {
            return Some(idx);
        }

        self.column_names.iter().position(|col| col == column_name)
    }

    /// Get a value from the row by column name
    ///
    /// # Returns
    ///
    /// The value at the column, or None if the column wasn't found
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        self.get_column_index(column_name)
            .and_then(|idx| self.rows.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.rows.get(index)
    }

    /// Get a value that must be present, for use in `Model::from_row`.
    ///
    /// # Errors
    /// Returns `CrudError::ExecutionError` when the result does not carry `column_name`.
    pub fn require(&self, column_name: &str) -> Result<&RowValues, CrudError> {
        self.get(column_name).ok_or_else(|| {
            CrudError::ExecutionError(format!("column '{column_name}' missing from result row"))
        })
    }

    /// Read an integer column; `NULL` reads as `None`.
    ///
    /// # Errors
    /// Returns `CrudError::ParameterError` when the stored value is not an integer.
    pub fn opt_int(&self, column_name: &str) -> Result<Option<i64>, CrudError> {
        match self.require(column_name)? {
            RowValues::Null => Ok(None),
            RowValues::Int(i) => Ok(Some(*i)),
            other => Err(mismatch(column_name, "int", other)),
        }
    }

    /// Read a text column; `NULL` reads as `None`.
    ///
    /// # Errors
    /// Returns `CrudError::ParameterError` when the stored value is not text.
    pub fn opt_text(&self, column_name: &str) -> Result<Option<String>, CrudError> {
        match self.require(column_name)? {
            RowValues::Null => Ok(None),
            RowValues::Text(s) => Ok(Some(s.clone())),
            other => Err(mismatch(column_name, "text", other)),
        }
    }

    /// Read a float column; integers widen.
    ///
    /// # Errors
    /// Returns `CrudError::ParameterError` when the stored value is not numeric.
    pub fn opt_float(&self, column_name: &str) -> Result<Option<f64>, CrudError> {
        match self.require(column_name)? {
            RowValues::Null => Ok(None),
            other => other
                .as_float()
                .map(Some)
                .ok_or_else(|| mismatch(column_name, "float", other)),
        }
    }

    /// Read a boolean column; SQLite stores these as 0/1.
    ///
    /// # Errors
    /// Returns `CrudError::ParameterError` when the stored value is not boolean-like.
    pub fn opt_bool(&self, column_name: &str) -> Result<Option<bool>, CrudError> {
        match self.require(column_name)? {
            RowValues::Null => Ok(None),
            other => other
                .as_bool()
                .copied()
                .map(Some)
                .ok_or_else(|| mismatch(column_name, "bool", other)),
        }
    }

    /// Read a timestamp column; text layouts are parsed.
    ///
    /// # Errors
    /// Returns `CrudError::ParameterError` when the stored value is not a timestamp.
    pub fn opt_timestamp(
        &self,
        column_name: &str,
    ) -> Result<Option<chrono::NaiveDateTime>, CrudError> {
        match self.require(column_name)? {
            RowValues::Null => Ok(None),
            other => other
                .as_timestamp()
                .map(Some)
                .ok_or_else(|| mismatch(column_name, "timestamp", other)),
        }
    }
}

pub(crate) fn index_columns(column_names: &[String]) -> HashMap<String, usize> {
    column_names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), i))
        .collect()
}

fn mismatch(column: &str, expected: &str, got: &RowValues) -> CrudError {
    CrudError::ParameterError(format!(
        "column '{column}': expected {expected}, found {}",
        got.kind_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> CustomDbRow {
        CustomDbRow::new(
            Arc::new(vec!["id".into(), "name".into(), "flag".into()]),
            vec![RowValues::Int(7), RowValues::Null, RowValues::Int(1)],
        )
    }

    #[test]
    fn typed_accessors() {
        let r = row();
        assert_eq!(r.opt_int("id").ok(), Some(Some(7)));
        assert_eq!(r.opt_text("name").ok(), Some(None));
        assert_eq!(r.opt_bool("flag").ok(), Some(Some(true)));
        assert!(r.opt_text("id").is_err());
        assert!(r.require("missing").is_err());
    }
}
