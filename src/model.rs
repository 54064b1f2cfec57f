//! The record contract CRUD helpers are generic over.
//!
//! A model is any caller-defined struct that can describe its table, hand out its column values
//! and rebuild itself from a result row. The crate never creates or migrates schemas.

use std::fmt::Debug;

use crate::error::{CrudError, ValidationError};
use crate::mixins::AuditFields;
use crate::results::CustomDbRow;
use crate::types::{FieldMap, RowValues};

/// Storage class of a column; drives filter value coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Int,
    Float,
    Text,
    Bool,
    Timestamp,
    Json,
    Blob,
}

/// Column metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

impl Column {
    #[must_use]
    pub const fn new(name: &'static str, kind: ColumnKind) -> Self {
        Self { name, kind }
    }

    #[must_use]
    pub const fn int(name: &'static str) -> Self {
        Self::new(name, ColumnKind::Int)
    }

    #[must_use]
    pub const fn float(name: &'static str) -> Self {
        Self::new(name, ColumnKind::Float)
    }

    #[must_use]
    pub const fn text(name: &'static str) -> Self {
        Self::new(name, ColumnKind::Text)
    }

    #[must_use]
    pub const fn bool(name: &'static str) -> Self {
        Self::new(name, ColumnKind::Bool)
    }

    #[must_use]
    pub const fn timestamp(name: &'static str) -> Self {
        Self::new(name, ColumnKind::Timestamp)
    }

    #[must_use]
    pub const fn json(name: &'static str) -> Self {
        Self::new(name, ColumnKind::Json)
    }

    #[must_use]
    pub const fn blob(name: &'static str) -> Self {
        Self::new(name, ColumnKind::Blob)
    }
}

/// How a declared relationship is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadStrategy {
    /// One extra `SELECT ... WHERE remote IN (...)` per relationship after the parent query.
    #[default]
    Selectin,
    /// Not loaded; the caller fetches related rows when needed.
    Lazy,
}

/// A one-to-many (or many-to-one) link between the model's table and `target_table`.
///
/// Related rows are those where `target_table.remote_column = self.local_column`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relationship {
    pub name: &'static str,
    pub target_table: &'static str,
    pub local_column: &'static str,
    pub remote_column: &'static str,
}

/// A persisted record type.
///
/// ```rust
/// use sql_crud_utils::prelude::*;
///
/// #[derive(Debug, Default, Clone)]
/// struct Tag {
///     id: Option<i64>,
///     label: String,
/// }
///
/// impl Model for Tag {
///     const TABLE_NAME: &'static str = "tag";
///     const COLUMNS: &'static [Column] = &[Column::int("id"), Column::text("label")];
///
///     fn to_values(&self) -> FieldMap {
///         field_map([("id", RowValues::from(self.id)), ("label", self.label.clone().into())])
///     }
///
///     fn from_row(row: &CustomDbRow) -> Result<Self, CrudError> {
///         Ok(Self {
///             id: row.opt_int("id")?,
///             label: row.opt_text("label")?.unwrap_or_default(),
///         })
///     }
///
///     fn set_field(&mut self, column: &str, value: RowValues) -> Result<(), CrudError> {
///         match column {
///             "id" => self.id = value.as_int().copied(),
///             "label" => self.label = value.as_text().unwrap_or_default().to_string(),
///             other => return Err(CrudError::validation(other, "unknown column")),
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Model: Sized + Send + Sync + Debug + 'static {
    const TABLE_NAME: &'static str;

    /// Single-column primary key.
    const PRIMARY_KEY: &'static str = "id";

    const COLUMNS: &'static [Column];

    const RELATIONSHIPS: &'static [Relationship] = &[];

    /// Every column value, including the primary key (`Null` before the first insert).
    fn to_values(&self) -> FieldMap;

    /// Rebuild the record from a result row.
    ///
    /// # Errors
    /// Returns an error when a column is missing or holds an unexpected type.
    fn from_row(row: &CustomDbRow) -> Result<Self, CrudError>;

    /// Assign one column value; used when building a record from filters and defaults.
    ///
    /// # Errors
    /// Returns `CrudError::Validation` for unknown columns or unusable values.
    fn set_field(&mut self, column: &str, value: RowValues) -> Result<(), CrudError>;

    /// Model-level checks run before every insert and update.
    ///
    /// # Errors
    /// Returns the first failed check.
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }

    /// Receive eagerly loaded rows for relationship `name`.
    ///
    /// # Errors
    /// The default refuses, so models declaring relationships must override it.
    fn attach_related(&mut self, name: &str, rows: Vec<CustomDbRow>) -> Result<(), CrudError> {
        let _ = rows;
        Err(CrudError::Unimplemented(format!(
            "{} does not accept related rows for '{name}'",
            Self::TABLE_NAME
        )))
    }

    /// Audit columns stamped by the write helpers, when the model carries them.
    fn audit_fields_mut(&mut self) -> Option<&mut AuditFields> {
        None
    }

    fn column(name: &str) -> Option<&'static Column> {
        Self::COLUMNS.iter().find(|c| c.name == name)
    }

    fn relationship(name: &str) -> Option<&'static Relationship> {
        Self::RELATIONSHIPS.iter().find(|r| r.name == name)
    }

    fn primary_key(&self) -> RowValues {
        self.to_values()
            .remove(Self::PRIMARY_KEY)
            .unwrap_or(RowValues::Null)
    }

    /// Column values for an `INSERT`, leaving out a `Null` primary key so the database assigns it.
    fn insert_values(&self) -> FieldMap {
        let mut values = self.to_values();
        if values.get(Self::PRIMARY_KEY).is_some_and(RowValues::is_null) {
            values.remove(Self::PRIMARY_KEY);
        }
        values
    }
}

/// Check that every key of `values` is a declared column of `M`.
pub(crate) fn check_columns<'a, M: Model>(
    keys: impl IntoIterator<Item = &'a String>,
) -> Result<(), CrudError> {
    for key in keys {
        if M::column(key).is_none() {
            return Err(CrudError::validation(
                key.clone(),
                format!("{} has no column '{key}'", M::TABLE_NAME),
            ));
        }
    }
    Ok(())
}

/// Key used to group related rows; values of different backends compare by their text form.
pub(crate) fn join_key(value: &RowValues) -> Option<String> {
    match value {
        RowValues::Null => None,
        other => Some(other.to_string()),
    }
}
