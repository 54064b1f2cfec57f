//! CRUD helpers over any [`Model`].
//!
//! [`blocking`] and [`nonblocking`] expose the same operations with the same semantics; the
//! statements both run are planned here so the two surfaces cannot drift apart.
//!
//! Write helpers run inside a write scope: a fresh transaction when the session is idle, or a
//! savepoint when the caller already opened one. A failed write rolls its scope back before the
//! error is returned.

pub mod blocking;
mod bulk;
pub mod nonblocking;

use std::collections::{BTreeSet, HashMap};

pub use bulk::{BulkInsertFailure, FailedRow};

use crate::dialect::{Dialect, UpsertSpec};
use crate::error::CrudError;
use crate::filter::{CompareOp, FilterArg, Filters, Predicate, escape_like, translate};
use crate::mixins::SoftDeleteFields;
use crate::model::{ColumnKind, Model, Relationship, check_columns, join_key};
use crate::results::{CustomDbRow, ResultSet};
use crate::statement::{self, SqlBuilder};
use crate::translation::translate_query;
use crate::types::{FieldMap, QueryAndParams, RowValues};

pub(crate) const WRITE_SAVEPOINT: &str = "crud_write";

/// How a write helper isolated its statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteScope {
    /// The helper opened (and must end) the transaction.
    Transaction,
    /// The caller's transaction is open; the helper owns a savepoint inside it.
    Savepoint,
}

/// Relationships to load eagerly alongside the requested rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOptions {
    eager: Vec<String>,
}

impl LoadOptions {
    /// Load nothing beyond the rows themselves.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Load each named relationship with one extra `IN (...)` query.
    #[must_use]
    pub fn selectin<I, S>(relationships: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            eager: relationships.into_iter().map(Into::into).collect(),
        }
    }

    fn resolve<M: Model>(&self) -> Result<Vec<&'static Relationship>, CrudError> {
        self.eager
            .iter()
            .map(|name| {
                M::relationship(name).ok_or_else(|| {
                    CrudError::validation(
                        name.clone(),
                        format!("{} has no relationship '{name}'", M::TABLE_NAME),
                    )
                })
            })
            .collect()
    }
}

/// Substring search on one text column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMatch {
    pub field: String,
    pub term: String,
}

/// Arguments of `get_rows`.
///
/// ```rust
/// use sql_crud_utils::prelude::*;
///
/// let query = RowsQuery::new(Filters::new().with("value__gte", 10))
///     .sort_by("value", true)
///     .page(2, 25);
/// assert_eq!(query.offset(), 25);
/// ```
#[derive(Debug, Clone)]
pub struct RowsQuery {
    pub filters: Filters,
    pub sort_field: Option<String>,
    pub sort_desc: bool,
    /// 1-based page number.
    pub page: u64,
    pub page_size: u64,
    pub text_match: Option<TextMatch>,
    /// Skip rows whose `is_deleted` flag is set.
    pub exclude_deleted: bool,
}

impl Default for RowsQuery {
    fn default() -> Self {
        Self {
            filters: Filters::new(),
            sort_field: None,
            sort_desc: false,
            page: 1,
            page_size: 100,
            text_match: None,
            exclude_deleted: false,
        }
    }
}

impl RowsQuery {
    #[must_use]
    pub fn new(filters: Filters) -> Self {
        Self {
            filters,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn sort_by(mut self, field: impl Into<String>, desc: bool) -> Self {
        self.sort_field = Some(field.into());
        self.sort_desc = desc;
        self
    }

    #[must_use]
    pub fn page(mut self, page: u64, page_size: u64) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn text_match(mut self, field: impl Into<String>, term: impl Into<String>) -> Self {
        self.text_match = Some(TextMatch {
            field: field.into(),
            term: term.into(),
        });
        self
    }

    #[must_use]
    pub fn exclude_deleted(mut self, exclude: bool) -> Self {
        self.exclude_deleted = exclude;
        self
    }

    /// Rows skipped before the requested page.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.page_size)
    }
}

pub(crate) fn plan_get_row<M: Model>(dialect: Dialect, id: RowValues) -> QueryAndParams {
    statement::select_by_column(dialect, M::TABLE_NAME, M::PRIMARY_KEY, id)
}

/// `SELECT` for `get_rows` plus the relationships to load afterwards.
pub(crate) fn plan_get_rows<M: Model>(
    dialect: Dialect,
    query: &RowsQuery,
) -> Result<(QueryAndParams, Vec<&'static Relationship>), CrudError> {
    if query.page == 0 {
        return Err(CrudError::validation("page", "pages are numbered from 1"));
    }
    if query.page_size == 0 {
        return Err(CrudError::validation("page_size", "page size must be positive"));
    }

    let translated = translate::<M>(&query.filters)?;
    let mut predicates = translated.predicates.clone();

    if let Some(TextMatch { field, term }) = &query.text_match {
        match M::column(field) {
            Some(col) if col.kind == ColumnKind::Text => predicates.push(Predicate::Compare {
                column: field.clone(),
                op: CompareOp::ILike,
                value: RowValues::Text(format!("%{}%", escape_like(term))),
            }),
            Some(_) => return Err(CrudError::validation(field.clone(), "text match needs a text column")),
            None => {
                return Err(CrudError::validation(
                    field.clone(),
                    format!("{} has no column '{field}'", M::TABLE_NAME),
                ));
            }
        }
    }

    if query.exclude_deleted {
        if M::column(SoftDeleteFields::IS_DELETED).is_none() {
            return Err(CrudError::validation(
                SoftDeleteFields::IS_DELETED,
                format!("{} does not support soft delete", M::TABLE_NAME),
            ));
        }
        predicates.push(Predicate::Compare {
            column: SoftDeleteFields::IS_DELETED.to_string(),
            op: CompareOp::Eq,
            value: RowValues::Bool(false),
        });
    }

    let sort_field = match &query.sort_field {
        Some(field) if M::column(field).is_none() => {
            return Err(CrudError::validation(
                field.clone(),
                format!("cannot sort {} by unknown column '{field}'", M::TABLE_NAME),
            ));
        }
        Some(field) => field.as_str(),
        None => M::PRIMARY_KEY,
    };

    let mut b = SqlBuilder::new(dialect);
    b.push("SELECT * FROM ").push_ident(M::TABLE_NAME);
    b.push_where(&predicates);
    b.push(" ORDER BY ").push_ident(sort_field);
    b.push(if query.sort_desc { " DESC" } else { " ASC" });
    if sort_field != M::PRIMARY_KEY {
        // ties on the sort column still page deterministically
        b.push(", ").push_ident(M::PRIMARY_KEY).push(" ASC");
    }
    b.push(&format!(" LIMIT {} OFFSET {}", query.page_size, query.offset()));

    Ok((b.finish(), translated.eager().collect()))
}

/// Equality lookup used by `get_one_or_create`.
pub(crate) fn plan_lookup<M: Model>(dialect: Dialect, lookup: &FieldMap) -> Result<QueryAndParams, CrudError> {
    let filters: Filters = lookup
        .iter()
        .map(|(k, v)| (k.clone(), FilterArg::Value(v.clone())))
        .collect();
    let translated = translate::<M>(&filters)?;
    let mut b = SqlBuilder::new(dialect);
    b.push("SELECT * FROM ").push_ident(M::TABLE_NAME);
    b.push_where(&translated.predicates);
    b.push(" ORDER BY ").push_ident(M::PRIMARY_KEY);
    b.push(" LIMIT 1");
    Ok(b.finish())
}

/// Build a fresh record for `get_one_or_create`: lookup values first, then defaults.
pub(crate) fn new_from_maps<M: Model + Default>(lookup: &FieldMap, defaults: &FieldMap) -> Result<M, CrudError> {
    check_columns::<M>(lookup.keys().chain(defaults.keys()))?;
    let mut row = M::default();
    for (column, value) in lookup.iter().chain(defaults.iter()) {
        row.set_field(column, value.clone())?;
    }
    Ok(row)
}

/// Validate and stamp `created_at` before an insert.
pub(crate) fn prepare_insert<M: Model>(row: &mut M) -> Result<(), CrudError> {
    row.validate()?;
    if let Some(audit) = row.audit_fields_mut() {
        audit.touch_created();
    }
    Ok(())
}

/// One multi-row `INSERT`, or `None` when the rows do not share a column set.
pub(crate) fn plan_insert<M: Model>(dialect: Dialect, rows: &[M]) -> Option<QueryAndParams> {
    let mut maps = rows.iter().map(Model::insert_values);
    let first = maps.next()?;
    let columns: Vec<String> = first.keys().cloned().collect();
    let mut values = vec![first.into_values().collect::<Vec<_>>()];
    for map in maps {
        if !map.keys().eq(columns.iter()) {
            return None;
        }
        values.push(map.into_values().collect());
    }
    if columns.is_empty() && values.len() > 1 {
        return None;
    }
    Some(statement::insert_rows(dialect, M::TABLE_NAME, &columns, values))
}

/// Query that reads back a row inserted without `RETURNING`.
pub(crate) fn plan_reread_inserted<M: Model>(dialect: Dialect, row: &M) -> QueryAndParams {
    match row.primary_key() {
        RowValues::Null => {
            let mut b = SqlBuilder::new(dialect);
            b.push("SELECT * FROM ").push_ident(M::TABLE_NAME);
            b.push(" WHERE ").push_ident(M::PRIMARY_KEY).push(" = LAST_INSERT_ID()");
            b.finish()
        }
        pk => plan_get_row::<M>(dialect, pk),
    }
}

/// Apply `changes` to the stored row, returning the updated record and the `SET` list.
pub(crate) fn apply_changes<M: Model>(
    existing: &CustomDbRow,
    changes: &FieldMap,
) -> Result<(M, FieldMap), CrudError> {
    let mut row = M::from_row(existing)?;
    for (column, value) in changes {
        row.set_field(column, value.clone())?;
    }
    let mut set = changes.clone();
    if let Some(audit) = row.audit_fields_mut() {
        audit.touch_updated();
        set.insert(
            crate::mixins::AuditFields::UPDATED_AT.to_string(),
            audit.updated_at.into(),
        );
    }
    row.validate()?;
    Ok((row, set))
}

pub(crate) fn check_changes<M: Model>(changes: &FieldMap) -> Result<(), CrudError> {
    if changes.is_empty() {
        return Err(CrudError::validation("changes", "nothing to update"));
    }
    check_columns::<M>(changes.keys())
}

pub(crate) fn plan_update<M: Model>(dialect: Dialect, id: RowValues, set: FieldMap) -> QueryAndParams {
    statement::update_by_key(dialect, M::TABLE_NAME, M::PRIMARY_KEY, id, set)
}

pub(crate) fn plan_delete<M: Model>(dialect: Dialect, id: RowValues) -> QueryAndParams {
    statement::delete_by_key(dialect, M::TABLE_NAME, M::PRIMARY_KEY, id)
}

pub(crate) fn plan_id_list<M: Model>(dialect: Dialect, ids: &[RowValues]) -> QueryAndParams {
    statement::select_in(dialect, M::TABLE_NAME, M::PRIMARY_KEY, ids.to_vec())
}

/// Validated upsert payload: shared columns, aligned rows and conflict keys.
pub(crate) struct UpsertPlan {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<RowValues>>,
    pub conflict_keys: Vec<String>,
}

pub(crate) fn plan_upsert<M: Model>(payload: &[FieldMap], conflict_keys: Option<&[&str]>) -> Result<UpsertPlan, CrudError> {
    let Some(first) = payload.first() else {
        return Err(CrudError::validation("payload", "upsert payload is empty"));
    };
    let columns: Vec<String> = first.keys().cloned().collect();
    check_columns::<M>(columns.iter())?;

    let mut rows = Vec::with_capacity(payload.len());
    for (i, map) in payload.iter().enumerate() {
        if !map.keys().eq(columns.iter()) {
            return Err(CrudError::validation(
                "payload",
                format!("mapping {i} does not share the key set of mapping 0"),
            ));
        }
        rows.push(map.values().cloned().collect());
    }

    let conflict_keys: Vec<String> = match conflict_keys {
        Some(keys) if !keys.is_empty() => keys.iter().map(|k| (*k).to_string()).collect(),
        _ => vec![M::PRIMARY_KEY.to_string()],
    };
    check_columns::<M>(conflict_keys.iter())?;

    Ok(UpsertPlan {
        columns,
        rows,
        conflict_keys,
    })
}

impl UpsertPlan {
    pub(crate) fn statement(&self, table: &str, dialect: Dialect) -> Result<QueryAndParams, CrudError> {
        let spec = UpsertSpec {
            table,
            columns: &self.columns,
            rows: &self.rows,
            conflict_keys: &self.conflict_keys,
        };
        dialect.upsert_builder()(&spec)
    }

    /// Read-back queries for dialects without `RETURNING`, one per payload row.
    pub(crate) fn reread<M: Model>(&self, dialect: Dialect) -> Vec<QueryAndParams> {
        let key_idx: Vec<usize> = self
            .conflict_keys
            .iter()
            .filter_map(|k| self.columns.iter().position(|c| c == k))
            .collect();
        self.rows
            .iter()
            .map(|row| {
                let predicates: Vec<Predicate> = key_idx
                    .iter()
                    .map(|&i| Predicate::Compare {
                        column: self.columns[i].clone(),
                        op: CompareOp::Eq,
                        value: row[i].clone(),
                    })
                    .collect();
                let mut b = SqlBuilder::new(dialect);
                b.push("SELECT * FROM ").push_ident(M::TABLE_NAME);
                b.push_where(&predicates);
                b.finish()
            })
            .collect()
    }
}

/// Rewrite a caller `$n` query for the session's placeholder style.
pub(crate) fn native_query(dialect: Dialect, query: &QueryAndParams) -> Result<QueryAndParams, CrudError> {
    match dialect.placeholder_style() {
        Some(style) => translate_query(query, style),
        None => Ok(query.clone()),
    }
}

pub(crate) fn rows_to_models<M: Model>(rs: &ResultSet) -> Result<Vec<M>, CrudError> {
    rs.results.iter().map(M::from_row).collect()
}

/// The `IN (...)` query for one relationship, or `None` when no parent has a join value.
pub(crate) fn plan_related<M: Model>(dialect: Dialect, rel: &Relationship, parents: &[M]) -> Option<QueryAndParams> {
    let mut seen = BTreeSet::new();
    let mut values = Vec::new();
    for parent in parents {
        let value = parent
            .to_values()
            .remove(rel.local_column)
            .unwrap_or(RowValues::Null);
        if let Some(key) = join_key(&value)
            && seen.insert(key)
        {
            values.push(value);
        }
    }
    if values.is_empty() {
        return None;
    }
    Some(statement::select_in(dialect, rel.target_table, rel.remote_column, values))
}

/// Hand each parent the related rows whose remote column matches its local column.
pub(crate) fn attach_related<M: Model>(rel: &Relationship, parents: &mut [M], related: ResultSet) -> Result<(), CrudError> {
    let mut groups: HashMap<String, Vec<CustomDbRow>> = HashMap::new();
    for row in related.results {
        if let Some(key) = row.get(rel.remote_column).and_then(join_key) {
            groups.entry(key).or_default().push(row);
        }
    }
    for parent in parents.iter_mut() {
        let rows = parent
            .to_values()
            .get(rel.local_column)
            .and_then(join_key)
            .and_then(|key| groups.get(&key).cloned())
            .unwrap_or_default();
        parent.attach_related(rel.name, rows)?;
    }
    Ok(())
}

/// Relationships requested as `LoadStrategy::Selectin` through `LoadOptions`.
pub(crate) fn eager_relationships<M: Model>(load: &LoadOptions) -> Result<Vec<&'static Relationship>, CrudError> {
    load.resolve::<M>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Column;

    #[derive(Debug, Default, Clone)]
    struct Item {
        id: Option<i64>,
        name: String,
    }

    impl Model for Item {
        const TABLE_NAME: &'static str = "item";
        const COLUMNS: &'static [Column] = &[Column::int("id"), Column::text("name")];

        fn to_values(&self) -> FieldMap {
            crate::types::field_map([
                ("id", RowValues::from(self.id)),
                ("name", self.name.clone().into()),
            ])
        }

        fn from_row(row: &CustomDbRow) -> Result<Self, CrudError> {
            Ok(Self {
                id: row.opt_int("id")?,
                name: row.opt_text("name")?.unwrap_or_default(),
            })
        }

        fn set_field(&mut self, column: &str, value: RowValues) -> Result<(), CrudError> {
            match column {
                "id" => self.id = value.as_int().copied(),
                "name" => self.name = value.as_text().unwrap_or_default().to_string(),
                other => return Err(CrudError::validation(other, "unknown column")),
            }
            Ok(())
        }
    }

    #[test]
    fn pagination_offset_starts_at_zero() {
        assert_eq!(RowsQuery::default().offset(), 0);
        assert_eq!(RowsQuery::default().page(3, 10).offset(), 20);
    }

    #[test]
    fn get_rows_statement_orders_and_pages() {
        let query = RowsQuery::new(Filters::new().with("name__like", "a%"))
            .text_match("name", "b")
            .sort_by("name", true)
            .page(2, 5);
        let (q, loads) = plan_get_rows::<Item>(Dialect::Postgresql, &query).expect("plan");
        assert_eq!(
            q.query,
            "SELECT * FROM \"item\" WHERE \"name\" LIKE $1 AND \"name\" ILIKE $2 ESCAPE '\\' ORDER BY \"name\" DESC, \"id\" ASC LIMIT 5 OFFSET 5"
        );
        assert_eq!(q.params[1], RowValues::Text("%b%".into()));
        assert!(loads.is_empty());
    }

    #[test]
    fn get_rows_defaults_to_key_order() {
        let (q, _) = plan_get_rows::<Item>(Dialect::Sqlite, &RowsQuery::default()).expect("plan");
        assert_eq!(q.query, "SELECT * FROM \"item\" ORDER BY \"id\" ASC LIMIT 100 OFFSET 0");
    }

    #[test]
    fn text_match_terms_are_literal() {
        let query = RowsQuery::default().text_match("name", "50%_off\\");
        let (q, _) = plan_get_rows::<Item>(Dialect::Mysql, &query).expect("plan");
        assert!(q.query.ends_with("LIKE ? ESCAPE '\\\\' ORDER BY `id` ASC LIMIT 100 OFFSET 0"), "{}", q.query);
        assert_eq!(q.params[0], RowValues::Text("%50\\%\\_off\\\\%".into()));
    }

    #[test]
    fn get_rows_rejects_bad_arguments() {
        let zero_page = RowsQuery::default().page(0, 10);
        assert!(plan_get_rows::<Item>(Dialect::Sqlite, &zero_page).is_err());
        let bad_sort = RowsQuery::default().sort_by("missing", false);
        assert!(plan_get_rows::<Item>(Dialect::Sqlite, &bad_sort).is_err());
        let no_soft_delete = RowsQuery::default().exclude_deleted(true);
        assert!(plan_get_rows::<Item>(Dialect::Sqlite, &no_soft_delete).is_err());
    }

    #[test]
    fn insert_plan_skips_null_keys() {
        let rows = vec![
            Item { id: None, name: "a".into() },
            Item { id: None, name: "b".into() },
        ];
        let q = plan_insert(Dialect::Sqlite, &rows).expect("homogeneous rows");
        assert_eq!(
            q.query,
            "INSERT INTO \"item\" (\"name\") VALUES (?1), (?2) RETURNING *"
        );

        let mixed = vec![
            Item { id: Some(4), name: "a".into() },
            Item { id: None, name: "b".into() },
        ];
        assert!(plan_insert(Dialect::Sqlite, &mixed).is_none());
    }

    #[test]
    fn upsert_payload_must_share_keys() {
        let payload = vec![
            crate::types::field_map([("id", RowValues::Int(1)), ("name", "a".into())]),
            crate::types::field_map([("id", RowValues::Int(2))]),
        ];
        assert!(matches!(
            plan_upsert::<Item>(&payload, None),
            Err(CrudError::Validation(_))
        ));
    }

    #[test]
    fn new_from_maps_applies_defaults_after_lookup() {
        let lookup = crate::types::field_map([("name", "from lookup")]);
        let defaults = crate::types::field_map([("name", "from defaults")]);
        let item: Item = new_from_maps(&lookup, &defaults).expect("built");
        assert_eq!(item.name, "from defaults");
    }

    #[test]
    fn raw_queries_translate_for_sqlite() {
        let q = QueryAndParams::new("SELECT * FROM item WHERE id = $1", vec![RowValues::Int(1)]);
        let native = native_query(Dialect::Sqlite, &q).expect("translated");
        assert_eq!(native.query, "SELECT * FROM item WHERE id = ?1");
        let pg = native_query(Dialect::Postgresql, &q).expect("untouched");
        assert_eq!(pg.query, q.query);
    }
}
