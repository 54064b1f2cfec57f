//! Convenient imports for common functionality.

pub use crate::config::CrudConfig;
pub use crate::crud::{
    BulkInsertFailure, FailedRow, LoadOptions, RowsQuery, TextMatch, blocking, nonblocking,
};
pub use crate::dialect::Dialect;
pub use crate::error::{BulkOperationError, CrudError, ValidationError};
pub use crate::filter::{FilterArg, Filters, UnknownKeyPolicy, translate};
pub use crate::mixins::{AuditFields, Auditable, SoftDeletable, SoftDeleteFields};
pub use crate::model::{Column, ColumnKind, LoadStrategy, Model, Relationship};
pub use crate::results::{CustomDbRow, ResultSet};
pub use crate::session::{AsyncSession, Session};
pub use crate::transaction::{TxFuture, a_transaction, transaction};
pub use crate::translation::{PlaceholderStyle, translate_placeholders};
pub use crate::types::{FieldMap, QueryAndParams, RowValues, field_map};

#[cfg(any(feature = "postgres", feature = "sqlite"))]
pub use crate::pool::{AnySession, ConfigAndPool};
#[cfg(feature = "postgres")]
pub use crate::postgres::PgSession;
#[cfg(feature = "sqlite")]
pub use crate::sqlite::{AsyncSqliteSession, SqliteSession};
