use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::types::RowValues;

/// Errors surfaced by sessions, CRUD helpers and transaction scopes.
#[derive(Debug, Error)]
pub enum CrudError {
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PostgresError(#[from] tokio_postgres::Error),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    /// A primary-key lookup matched nothing.
    #[error("{model} with {pk_field}={id} not found")]
    RecordNotFound {
        model: &'static str,
        id: String,
        pk_field: &'static str,
    },

    /// A single-result query matched more than one row.
    #[error("Expected 1 {model}, found {count}{}", filters_suffix(.filters))]
    MultipleRecords {
        model: &'static str,
        count: usize,
        filters: Option<String>,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    BulkOperation(#[from] BulkOperationError),

    /// Commit/rollback failed, or an error escaped a transaction scope.
    #[error("Transaction operation '{operation}' failed: {source}")]
    Transaction {
        operation: &'static str,
        #[source]
        source: Box<CrudError>,
    },

    #[error("Query execution failed: {source}\nQuery: {query}")]
    QueryExecution {
        query: String,
        #[source]
        source: Box<CrudError>,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Parameter conversion error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Unimplemented feature: {0}")]
    Unimplemented(String),

    #[error("Other database error: {0}")]
    Other(String),
}

fn filters_suffix(filters: &Option<String>) -> String {
    match filters {
        Some(f) => format!(" (filters: {f})"),
        None => String::new(),
    }
}

impl CrudError {
    /// Build a `RecordNotFound` for model `M`.
    #[must_use]
    pub fn not_found<M: crate::model::Model>(id: &RowValues) -> Self {
        CrudError::RecordNotFound {
            model: M::TABLE_NAME,
            id: id.to_string(),
            pk_field: M::PRIMARY_KEY,
        }
    }

    /// Build a `MultipleRecords` for model `M`.
    #[must_use]
    pub fn multiple_found<M: crate::model::Model>(count: usize, filters: Option<String>) -> Self {
        CrudError::MultipleRecords {
            model: M::TABLE_NAME,
            count,
            filters,
        }
    }

    /// Build a single-field validation error.
    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        CrudError::Validation(ValidationError::field(field, message))
    }

    pub(crate) fn transaction(operation: &'static str, source: CrudError) -> Self {
        CrudError::Transaction {
            operation,
            source: Box::new(source),
        }
    }

    pub(crate) fn query_execution(query: &str, source: CrudError) -> Self {
        // keep messages readable for very long generated statements
        let query = query.chars().take(200).collect();
        CrudError::QueryExecution {
            query,
            source: Box::new(source),
        }
    }

    /// True when the error is a missing-row condition.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, CrudError::RecordNotFound { .. })
    }
}

/// Supplied values failed model-level validation before persistence.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationError {
    pub field: Option<String>,
    pub value: Option<RowValues>,
    pub message: String,
    /// Per-field messages when several fields failed at once.
    pub errors: BTreeMap<String, String>,
}

impl ValidationError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_value(mut self, value: RowValues) -> Self {
        self.value = Some(value);
        self
    }

    #[must_use]
    pub fn with_errors(mut self, errors: BTreeMap<String, String>) -> Self {
        self.errors = errors;
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => {
                write!(f, "Validation failed for field '{field}': {}", self.message)?;
                if let Some(value) = &self.value {
                    write!(f, " (value: {value:?})")?;
                }
            }
            None => write!(f, "Validation failed: {}", self.message)?,
        }
        for (field, error) in &self.errors {
            write!(f, "\n  - {field}: {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// One failed item of a bulk operation.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItemError {
    /// Position of the item in the submitted batch.
    pub index: usize,
    pub cause: String,
}

/// Summary of a bulk insert/upsert that did not fully succeed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BulkOperationError {
    pub total: usize,
    pub failed: usize,
    pub successful: usize,
    pub errors: Vec<BulkItemError>,
}

impl BulkOperationError {
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successful as f64 / self.total as f64 * 100.0
        }
    }

    /// Indices of the items that failed, in submission order.
    #[must_use]
    pub fn failed_indices(&self) -> Vec<usize> {
        self.errors.iter().map(|e| e.index).collect()
    }

    #[must_use]
    pub fn error_summary(&self) -> String {
        let mut summary = format!("{self}");
        for (i, err) in self.errors.iter().enumerate() {
            summary.push_str(&format!("\n  {}. [item {}] {}", i + 1, err.index, err.cause));
        }
        summary
    }
}

impl fmt::Display for BulkOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bulk operation failed: {}/{} records failed ({:.1}% success rate)",
            self.failed,
            self.total,
            self.success_rate()
        )
    }
}

impl std::error::Error for BulkOperationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_error_reports_rate_and_items() {
        let err = BulkOperationError {
            total: 4,
            failed: 1,
            successful: 3,
            errors: vec![BulkItemError {
                index: 2,
                cause: "UNIQUE constraint failed".into(),
            }],
        };
        assert_eq!(
            err.to_string(),
            "Bulk operation failed: 1/4 records failed (75.0% success rate)"
        );
        assert_eq!(err.failed_indices(), vec![2]);
        assert!(err.error_summary().contains("[item 2] UNIQUE constraint failed"));
    }

    #[test]
    fn validation_display_lists_fields() {
        let mut errors = BTreeMap::new();
        errors.insert("name".to_string(), "must not be empty".to_string());
        let err = ValidationError::new("2 fields invalid").with_errors(errors);
        assert_eq!(
            err.to_string(),
            "Validation failed: 2 fields invalid\n  - name: must not be empty"
        );

        let err = ValidationError::field("value", "negative").with_value(RowValues::Int(-1));
        assert_eq!(
            err.to_string(),
            "Validation failed for field 'value': negative (value: Int(-1))"
        );
    }

    #[test]
    fn multiple_records_message_includes_filters() {
        let err = CrudError::MultipleRecords {
            model: "mockmodel",
            count: 3,
            filters: Some("name = 'a'".into()),
        };
        assert_eq!(err.to_string(), "Expected 1 mockmodel, found 3 (filters: name = 'a')");
    }
}
