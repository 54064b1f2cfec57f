use std::fmt;

use crate::error::{BulkItemError, BulkOperationError, CrudError};

/// A row that could not be inserted on its own.
#[derive(Debug)]
pub struct FailedRow<M> {
    /// Position in the input.
    pub index: usize,
    pub row: M,
    pub error: CrudError,
}

/// Outcome of `insert_data_rows` when at least one row failed.
///
/// The rows in `inserted` are persisted (subject to any outer transaction); the rows in `failed`
/// are handed back with their error so the caller can fix and retry them.
#[derive(Debug)]
pub struct BulkInsertFailure<M> {
    pub inserted: Vec<M>,
    pub failed: Vec<FailedRow<M>>,
}

impl<M> BulkInsertFailure<M> {
    #[must_use]
    pub fn total(&self) -> usize {
        self.inserted.len() + self.failed.len()
    }

    #[must_use]
    pub fn failed_indices(&self) -> Vec<usize> {
        self.failed.iter().map(|f| f.index).collect()
    }
}

impl<M> fmt::Display for BulkInsertFailure<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} rows failed to insert",
            self.failed.len(),
            self.total()
        )?;
        if let Some(first) = self.failed.first() {
            write!(f, " (row {}: {})", first.index, first.error)?;
        }
        Ok(())
    }
}

impl<M: fmt::Debug> std::error::Error for BulkInsertFailure<M> {}

impl<M> From<BulkInsertFailure<M>> for CrudError {
    fn from(failure: BulkInsertFailure<M>) -> Self {
        let total = failure.total();
        let successful = failure.inserted.len();
        let errors: Vec<BulkItemError> = failure
            .failed
            .into_iter()
            .map(|f| BulkItemError {
                index: f.index,
                cause: f.error.to_string(),
            })
            .collect();
        CrudError::BulkOperation(BulkOperationError {
            total,
            failed: errors.len(),
            successful,
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_into_bulk_operation_error() {
        let failure = BulkInsertFailure {
            inserted: vec!["a", "c"],
            failed: vec![FailedRow {
                index: 1,
                row: "b",
                error: CrudError::validation("name", "must not be empty"),
            }],
        };
        assert_eq!(failure.failed_indices(), vec![1]);
        assert!(failure.to_string().starts_with("1 of 3 rows failed"));

        let CrudError::BulkOperation(err) = CrudError::from(failure) else {
            panic!("expected a bulk operation error");
        };
        assert_eq!(err.total, 3);
        assert_eq!(err.successful, 2);
        assert_eq!(err.failed_indices(), vec![1]);
    }
}
