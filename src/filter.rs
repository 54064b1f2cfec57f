//! Translate `column[__suffix]` filter keys into SQL predicates and relationship loads.
//!
//! ```rust
//! use sql_crud_utils::prelude::*;
//! # #[derive(Debug, Default)] struct Item;
//! # impl Model for Item {
//! #     const TABLE_NAME: &'static str = "item";
//! #     const COLUMNS: &'static [Column] = &[Column::int("id"), Column::int("value"), Column::text("name")];
//! #     fn to_values(&self) -> FieldMap { FieldMap::new() }
//! #     fn from_row(_: &CustomDbRow) -> Result<Self, CrudError> { Ok(Item) }
//! #     fn set_field(&mut self, _: &str, _: RowValues) -> Result<(), CrudError> { Ok(()) }
//! # }
//! let filters = Filters::new()
//!     .with("value__gte", "10")
//!     .with("name__like", "wid%");
//! let translated = translate::<Item>(&filters)?;
//! assert_eq!(translated.predicates.len(), 2);
//! # Ok::<(), CrudError>(())
//! ```

use chrono::NaiveDateTime;
use tracing::warn;

use crate::dialect::Dialect;
use crate::error::CrudError;
use crate::model::{Column, ColumnKind, LoadStrategy, Model, Relationship};
use crate::statement::SqlBuilder;
use crate::types::{RowValues, parse_timestamp};

/// The argument of one filter key.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterArg {
    Value(RowValues),
    /// Candidates for an `__in` key.
    List(Vec<RowValues>),
    /// Loading strategy for a relationship key.
    Load(LoadStrategy),
}

macro_rules! filter_arg_from {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for FilterArg {
                fn from(v: $t) -> Self {
                    FilterArg::Value(v.into())
                }
            }
        )*
    };
}

filter_arg_from!(RowValues, i64, i32, f64, bool, &str, String, NaiveDateTime);

impl From<Vec<RowValues>> for FilterArg {
    fn from(v: Vec<RowValues>) -> Self {
        FilterArg::List(v)
    }
}

impl From<LoadStrategy> for FilterArg {
    fn from(v: LoadStrategy) -> Self {
        FilterArg::Load(v)
    }
}

/// What to do with a key that names neither a column nor a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownKeyPolicy {
    /// Fail with `CrudError::Validation`.
    #[default]
    Reject,
    /// Drop the key and log a warning.
    Ignore,
}

/// Ordered filter keys for one call.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    entries: Vec<(String, FilterArg)>,
    policy: UnknownKeyPolicy,
}

impl Filters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, arg: impl Into<FilterArg>) -> Self {
        self.push(key, arg);
        self
    }

    pub fn push(&mut self, key: impl Into<String>, arg: impl Into<FilterArg>) {
        self.entries.push((key.into(), arg.into()));
    }

    #[must_use]
    pub fn unknown_keys(mut self, policy: UnknownKeyPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn policy(&self) -> UnknownKeyPolicy {
        self.policy
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FilterArg)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<K: Into<String>, V: Into<FilterArg>> FromIterator<(K, V)> for Filters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut filters = Filters::new();
        for (k, v) in iter {
            filters.push(k, v);
        }
        filters
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Like,
    /// Case-insensitive `LIKE` where the backend has one, with `\` as the escape character.
    ILike,
    Gte,
    Lte,
    Gt,
    Lt,
}

impl CompareOp {
    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "like" => Some(CompareOp::Like),
            "gte" => Some(CompareOp::Gte),
            "lte" => Some(CompareOp::Lte),
            "gt" => Some(CompareOp::Gt),
            "lt" => Some(CompareOp::Lt),
            _ => None,
        }
    }

    fn sql(self, dialect: Dialect) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Like => "LIKE",
            CompareOp::ILike if dialect == Dialect::Postgresql => "ILIKE",
            CompareOp::ILike => "LIKE",
            CompareOp::Gte => ">=",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
        }
    }

    fn is_range(self) -> bool {
        matches!(
            self,
            CompareOp::Gte | CompareOp::Lte | CompareOp::Gt | CompareOp::Lt
        )
    }
}

/// Escape `LIKE` wildcards in `term` so it matches literally under `ESCAPE '\'`.
#[must_use]
pub fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// One `WHERE` condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: String,
        op: CompareOp,
        value: RowValues,
    },
    IsNull {
        column: String,
    },
    In {
        column: String,
        values: Vec<RowValues>,
    },
    /// Matches nothing; produced by an empty `__in` list.
    Never,
}

impl Predicate {
    pub(crate) fn render(&self, b: &mut SqlBuilder) {
        match self {
            Predicate::Compare { column, op, value } => {
                let sql_op = op.sql(b.dialect());
                b.push_ident(column).push(" ").push(sql_op).push(" ").bind(value.clone());
                if *op == CompareOp::ILike {
                    // MySQL treats backslash as an escape inside string literals too
                    let escape = if b.dialect() == Dialect::Mysql {
                        " ESCAPE '\\\\'"
                    } else {
                        " ESCAPE '\\'"
                    };
                    b.push(escape);
                }
            }
            Predicate::IsNull { column } => {
                b.push_ident(column).push(" IS NULL");
            }
            Predicate::In { column, values } => {
                b.push_ident(column).push(" IN ").push_tuple(values.iter().cloned());
            }
            Predicate::Never => {
                b.push("1 = 0");
            }
        }
    }
}

/// Filters split into `WHERE` conditions and relationship loads.
#[derive(Debug, Clone, Default)]
pub struct TranslatedFilter {
    pub predicates: Vec<Predicate>,
    pub loads: Vec<(&'static Relationship, LoadStrategy)>,
}

impl TranslatedFilter {
    /// Relationships that must be fetched eagerly.
    pub fn eager(&self) -> impl Iterator<Item = &'static Relationship> + '_ {
        self.loads
            .iter()
            .filter(|(_, strategy)| *strategy == LoadStrategy::Selectin)
            .map(|(rel, _)| *rel)
    }

    /// Human-readable form used in error messages.
    #[must_use]
    pub fn describe(&self) -> String {
        self.predicates
            .iter()
            .map(|p| match p {
                Predicate::Compare { column, op, value } => {
                    format!("{column} {} {value}", op.sql(Dialect::Sqlite))
                }
                Predicate::IsNull { column } => format!("{column} IS NULL"),
                Predicate::In { column, values } => format!("{column} IN ({} values)", values.len()),
                Predicate::Never => "1 = 0".to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn split_suffix(key: &str) -> (&str, Option<&str>) {
    match key.rsplit_once("__") {
        Some((base, suffix)) if matches!(suffix, "like" | "gte" | "lte" | "gt" | "lt" | "in") => {
            (base, Some(suffix))
        }
        _ => (key, None),
    }
}

fn bad(key: &str, message: impl Into<String>) -> CrudError {
    CrudError::validation(key, message)
}

/// Text that a query string would carry becomes the column's native type.
fn coerce(column: &Column, value: RowValues) -> RowValues {
    match (column.kind, value) {
        (ColumnKind::Int, RowValues::Text(s))
            if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) =>
        {
            s.parse().map_or(RowValues::Text(s), RowValues::Int)
        }
        (ColumnKind::Timestamp, RowValues::Text(s)) => match parse_timestamp(&s) {
            Some(ts) => RowValues::Timestamp(ts),
            None => RowValues::Text(s),
        },
        (_, value) => value,
    }
}

fn unknown<M: Model>(key: &str, policy: UnknownKeyPolicy) -> Result<(), CrudError> {
    match policy {
        UnknownKeyPolicy::Reject => Err(bad(
            key,
            format!("{} has no column or relationship named '{key}'", M::TABLE_NAME),
        )),
        UnknownKeyPolicy::Ignore => {
            warn!(table = M::TABLE_NAME, key, "ignoring unknown filter key");
            Ok(())
        }
    }
}

/// Translate `filters` against the columns and relationships of `M`.
///
/// # Errors
/// Returns `CrudError::Validation` for unknown keys (under [`UnknownKeyPolicy::Reject`]) and for
/// arguments of the wrong shape, such as a scalar for `__in` or a number for `__like`.
pub fn translate<M: Model>(filters: &Filters) -> Result<TranslatedFilter, CrudError> {
    let mut out = TranslatedFilter::default();

    for (key, arg) in filters.iter() {
        let (base, suffix) = split_suffix(key);

        if suffix.is_none()
            && let Some(rel) = M::relationship(base)
        {
            match arg {
                FilterArg::Load(strategy) => out.loads.push((rel, *strategy)),
                _ => return Err(bad(key, "relationship keys take a load strategy")),
            }
            continue;
        }

        let Some(column) = M::column(base) else {
            unknown::<M>(key, filters.policy())?;
            continue;
        };
        let name = column.name.to_string();

        let predicate = match (suffix, arg) {
            (_, FilterArg::Load(_)) => {
                return Err(bad(key, "load strategies apply to relationships only"));
            }
            (Some("in"), FilterArg::List(values)) if values.is_empty() => Predicate::Never,
            (Some("in"), FilterArg::List(values)) => Predicate::In {
                column: name,
                values: values.iter().cloned().map(|v| coerce(column, v)).collect(),
            },
            (Some("in"), FilterArg::Value(_)) => {
                return Err(bad(key, "__in expects a list of values"));
            }
            (_, FilterArg::List(_)) => {
                return Err(bad(key, "lists are only accepted by __in"));
            }
            (Some("like"), FilterArg::Value(value)) => {
                if value.as_text().is_none() {
                    return Err(bad(key, "__like expects a text pattern"));
                }
                Predicate::Compare {
                    column: name,
                    op: CompareOp::Like,
                    value: value.clone(),
                }
            }
            (None, FilterArg::Value(RowValues::Null)) => Predicate::IsNull { column: name },
            (suffix, FilterArg::Value(value)) => {
                let op = suffix.and_then(CompareOp::from_suffix).unwrap_or(CompareOp::Eq);
                if op.is_range() && value.is_null() {
                    return Err(bad(key, "range comparisons need a value"));
                }
                Predicate::Compare {
                    column: name,
                    op,
                    value: coerce(column, value.clone()),
                }
            }
        };
        out.predicates.push(predicate);
    }

    Ok(out)
}
