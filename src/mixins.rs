//! Reusable column groups: audit timestamps and soft deletion.
//!
//! A model embeds [`AuditFields`] and/or [`SoftDeleteFields`], lists their column constants in
//! `Model::COLUMNS`, and merges their values into `to_values` / `from_row`. The two groups are
//! independent; a model may carry both.

use chrono::{DateTime, Utc};

use crate::error::CrudError;
use crate::model::Column;
use crate::results::CustomDbRow;
use crate::types::{FieldMap, RowValues};

fn utc(row: &CustomDbRow, column: &str) -> Result<Option<DateTime<Utc>>, CrudError> {
    Ok(row.opt_timestamp(column)?.map(|ts| ts.and_utc()))
}

/// Who created/changed a record and when.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditFields {
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

impl Default for AuditFields {
    fn default() -> Self {
        Self {
            created_at: Utc::now(),
            updated_at: None,
            created_by: None,
            updated_by: None,
        }
    }
}

impl AuditFields {
    pub const CREATED_AT: &'static str = "created_at";
    pub const UPDATED_AT: &'static str = "updated_at";
    pub const CREATED_BY: &'static str = "created_by";
    pub const UPDATED_BY: &'static str = "updated_by";

    pub const COLUMNS: [Column; 4] = [
        Column::timestamp(Self::CREATED_AT),
        Column::timestamp(Self::UPDATED_AT),
        Column::text(Self::CREATED_BY),
        Column::text(Self::UPDATED_BY),
    ];

    #[must_use]
    pub fn created_by(user: impl Into<String>) -> Self {
        Self {
            created_by: Some(user.into()),
            ..Self::default()
        }
    }

    /// Set `created_at` to now; called by the insert helpers.
    pub fn touch_created(&mut self) {
        self.created_at = Utc::now();
    }

    /// Set `updated_at` to now; called by the update helpers.
    pub fn touch_updated(&mut self) {
        self.updated_at = Some(Utc::now());
    }

    pub fn write_values(&self, values: &mut FieldMap) {
        values.insert(Self::CREATED_AT.into(), self.created_at.into());
        values.insert(Self::UPDATED_AT.into(), self.updated_at.into());
        values.insert(Self::CREATED_BY.into(), self.created_by.clone().into());
        values.insert(Self::UPDATED_BY.into(), self.updated_by.clone().into());
    }

    /// # Errors
    /// Returns an error when an audit column is missing or mistyped.
    pub fn from_row(row: &CustomDbRow) -> Result<Self, CrudError> {
        Ok(Self {
            created_at: utc(row, Self::CREATED_AT)?.ok_or_else(|| {
                CrudError::ExecutionError(format!("{} is NULL", Self::CREATED_AT))
            })?,
            updated_at: utc(row, Self::UPDATED_AT)?,
            created_by: row.opt_text(Self::CREATED_BY)?,
            updated_by: row.opt_text(Self::UPDATED_BY)?,
        })
    }
}

/// Access to a model's audit group.
pub trait Auditable {
    fn audit(&self) -> &AuditFields;
    fn audit_mut(&mut self) -> &mut AuditFields;

    fn created_at(&self) -> DateTime<Utc> {
        self.audit().created_at
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.audit().updated_at
    }

    /// Record `user` as the last modifier.
    fn mark_updated_by(&mut self, user: impl Into<String>) {
        self.audit_mut().updated_by = Some(user.into());
    }
}

/// Deletion marker kept on the row instead of removing it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SoftDeleteFields {
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
    pub is_deleted: bool,
}

impl SoftDeleteFields {
    pub const DELETED_AT: &'static str = "deleted_at";
    pub const DELETED_BY: &'static str = "deleted_by";
    pub const IS_DELETED: &'static str = "is_deleted";

    pub const COLUMNS: [Column; 3] = [
        Column::timestamp(Self::DELETED_AT),
        Column::text(Self::DELETED_BY),
        Column::bool(Self::IS_DELETED),
    ];

    pub fn mark_deleted(&mut self, user: Option<String>) {
        self.is_deleted = true;
        self.deleted_at = Some(Utc::now());
        self.deleted_by = user;
    }

    pub fn clear(&mut self) {
        self.is_deleted = false;
        self.deleted_at = None;
        self.deleted_by = None;
    }

    /// The group as a partial update, for persisting with `update_row`.
    #[must_use]
    pub fn changes(&self) -> FieldMap {
        let mut values = FieldMap::new();
        self.write_values(&mut values);
        values
    }

    pub fn write_values(&self, values: &mut FieldMap) {
        values.insert(Self::DELETED_AT.into(), self.deleted_at.into());
        values.insert(Self::DELETED_BY.into(), self.deleted_by.clone().into());
        values.insert(Self::IS_DELETED.into(), RowValues::Bool(self.is_deleted));
    }

    /// # Errors
    /// Returns an error when a soft-delete column is missing or mistyped.
    pub fn from_row(row: &CustomDbRow) -> Result<Self, CrudError> {
        Ok(Self {
            deleted_at: utc(row, Self::DELETED_AT)?,
            deleted_by: row.opt_text(Self::DELETED_BY)?,
            is_deleted: row.opt_bool(Self::IS_DELETED)?.unwrap_or(false),
        })
    }
}

/// Soft-delete behaviour for a model carrying [`SoftDeleteFields`].
///
/// Only the in-memory record changes; write it back with `update_row(.., &fields.changes())`.
pub trait SoftDeletable {
    fn soft_delete_fields(&self) -> &SoftDeleteFields;
    fn soft_delete_fields_mut(&mut self) -> &mut SoftDeleteFields;

    fn soft_delete(&mut self, user: Option<&str>) {
        self.soft_delete_fields_mut()
            .mark_deleted(user.map(str::to_string));
    }

    fn restore(&mut self) {
        self.soft_delete_fields_mut().clear();
    }

    fn is_deleted(&self) -> bool {
        self.soft_delete_fields().is_deleted
    }
}
