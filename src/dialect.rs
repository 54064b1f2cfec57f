//! SQL dialects and the per-dialect insert-or-update constructors.
//!
//! Each backend spells conflict resolution differently, so the upsert statement is produced by a
//! constructor picked from a closed set of dialects instead of a string lookup at call time.

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::CrudError;
use crate::statement::SqlBuilder;
use crate::translation::PlaceholderStyle;
use crate::types::{QueryAndParams, RowValues};

/// The SQL dialects the CRUD layer can render statements for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// `PostgreSQL`
    #[value(alias = "postgres")]
    #[serde(alias = "postgres")]
    Postgresql,
    /// `SQLite`
    Sqlite,
    /// `MySQL` / `MariaDB` (statement rendering only)
    Mysql,
}

/// Everything an upsert constructor needs; rows are aligned with `columns`.
#[derive(Debug, Clone, Copy)]
pub struct UpsertSpec<'a> {
    pub table: &'a str,
    pub columns: &'a [String],
    pub rows: &'a [Vec<RowValues>],
    pub conflict_keys: &'a [String],
}

/// Insert-or-update statement constructor for one dialect.
pub type UpsertBuilder = fn(&UpsertSpec<'_>) -> Result<QueryAndParams, CrudError>;

impl Dialect {
    /// Resolve the upsert constructor for this dialect.
    #[must_use]
    pub fn upsert_builder(self) -> UpsertBuilder {
        match self {
            Dialect::Postgresql => postgres_upsert,
            Dialect::Sqlite => sqlite_upsert,
            Dialect::Mysql => mysql_upsert,
        }
    }

    /// Render the `n`th (1-based) bind placeholder.
    #[must_use]
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Postgresql => format!("${n}"),
            Dialect::Sqlite => format!("?{n}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Quote an identifier for this dialect.
    #[must_use]
    pub fn quote_ident(self, ident: &str) -> String {
        match self {
            Dialect::Mysql => format!("`{}`", ident.replace('`', "``")),
            Dialect::Postgresql | Dialect::Sqlite => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Whether `INSERT ... RETURNING` is available.
    #[must_use]
    pub fn supports_returning(self) -> bool {
        !matches!(self, Dialect::Mysql)
    }

    /// Placeholder style caller-written `$n` queries are translated to, if any.
    #[must_use]
    pub fn placeholder_style(self) -> Option<PlaceholderStyle> {
        match self {
            Dialect::Postgresql => None,
            Dialect::Sqlite => Some(PlaceholderStyle::Sqlite),
            Dialect::Mysql => Some(PlaceholderStyle::Anonymous),
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Dialect::Postgresql => "postgresql",
            Dialect::Sqlite => "sqlite",
            Dialect::Mysql => "mysql",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = CrudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(Dialect::Postgresql),
            "sqlite" => Ok(Dialect::Sqlite),
            "mysql" => Ok(Dialect::Mysql),
            other => Err(CrudError::ConfigError(format!(
                "unsupported SQL dialect '{other}' (expected postgresql, sqlite or mysql)"
            ))),
        }
    }
}

fn check_spec(spec: &UpsertSpec<'_>) -> Result<(), CrudError> {
    if spec.columns.is_empty() {
        return Err(CrudError::validation("payload", "upsert payload has no columns"));
    }
    if spec.rows.is_empty() {
        return Err(CrudError::validation("payload", "upsert payload has no rows"));
    }
    if spec.conflict_keys.is_empty() {
        return Err(CrudError::validation("conflict_keys", "no conflict keys given"));
    }
    for key in spec.conflict_keys {
        if !spec.columns.contains(key) {
            return Err(CrudError::validation(
                key.clone(),
                "conflict key is not part of the upsert payload",
            ));
        }
    }
    for (i, row) in spec.rows.iter().enumerate() {
        if row.len() != spec.columns.len() {
            return Err(CrudError::validation(
                "payload",
                format!(
                    "row {i} has {} values for {} columns",
                    row.len(),
                    spec.columns.len()
                ),
            ));
        }
    }
    Ok(())
}

// INSERT INTO t (a, b) VALUES (..), (..)
fn insert_prefix(dialect: Dialect, spec: &UpsertSpec<'_>) -> SqlBuilder {
    let mut b = SqlBuilder::new(dialect);
    b.push("INSERT INTO ");
    b.push_ident(spec.table);
    b.push(" (");
    b.push_idents(spec.columns.iter().map(String::as_str));
    b.push(") VALUES ");
    for (i, row) in spec.rows.iter().enumerate() {
        if i > 0 {
            b.push(", ");
        }
        b.push_tuple(row.iter().cloned());
    }
    b
}

fn on_conflict_upsert(dialect: Dialect, spec: &UpsertSpec<'_>, excluded: &str) -> SqlBuilder {
    let mut b = insert_prefix(dialect, spec);
    b.push(" ON CONFLICT (");
    b.push_idents(spec.conflict_keys.iter().map(String::as_str));
    b.push(")");
    let updates: Vec<&String> = spec
        .columns
        .iter()
        .filter(|c| !spec.conflict_keys.contains(c))
        .collect();
    if updates.is_empty() {
        b.push(" DO NOTHING");
    } else {
        b.push(" DO UPDATE SET ");
        for (i, col) in updates.iter().enumerate() {
            if i > 0 {
                b.push(", ");
            }
            let quoted = dialect.quote_ident(col);
            b.push(&format!("{quoted} = {excluded}.{quoted}"));
        }
    }
    b.push(" RETURNING *");
    b
}

fn postgres_upsert(spec: &UpsertSpec<'_>) -> Result<QueryAndParams, CrudError> {
    check_spec(spec)?;
    Ok(on_conflict_upsert(Dialect::Postgresql, spec, "EXCLUDED").finish())
}

fn sqlite_upsert(spec: &UpsertSpec<'_>) -> Result<QueryAndParams, CrudError> {
    check_spec(spec)?;
    Ok(on_conflict_upsert(Dialect::Sqlite, spec, "excluded").finish())
}

fn mysql_upsert(spec: &UpsertSpec<'_>) -> Result<QueryAndParams, CrudError> {
    check_spec(spec)?;
    let dialect = Dialect::Mysql;
    let mut b = insert_prefix(dialect, spec);
    b.push(" ON DUPLICATE KEY UPDATE ");
    let updates: Vec<&String> = spec
        .columns
        .iter()
        .filter(|c| !spec.conflict_keys.contains(c))
        .collect();
    // a no-op assignment keeps the statement valid when only keys were sent
    let targets = if updates.is_empty() {
        vec![&spec.conflict_keys[0]]
    } else {
        updates
    };
    for (i, col) in targets.iter().enumerate() {
        if i > 0 {
            b.push(", ");
        }
        let quoted = dialect.quote_ident(col);
        b.push(&format!("{quoted} = VALUES({quoted})"));
    }
    Ok(b.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_parts() -> (Vec<String>, Vec<Vec<RowValues>>, Vec<String>) {
        (
            vec!["id".into(), "name".into(), "value".into()],
            vec![
                vec![RowValues::Int(1), "a".into(), RowValues::Int(10)],
                vec![RowValues::Int(2), "b".into(), RowValues::Null],
            ],
            vec!["id".into()],
        )
    }

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("PostgreSQL".parse::<Dialect>().ok(), Some(Dialect::Postgresql));
        assert_eq!("postgres".parse::<Dialect>().ok(), Some(Dialect::Postgresql));
        assert_eq!(" sqlite ".parse::<Dialect>().ok(), Some(Dialect::Sqlite));
        assert_eq!("mysql".parse::<Dialect>().ok(), Some(Dialect::Mysql));
        assert!(matches!(
            "mssql".parse::<Dialect>(),
            Err(CrudError::ConfigError(_))
        ));
    }

    #[test]
    fn postgres_upsert_uses_excluded() {
        let (columns, rows, keys) = spec_parts();
        let spec = UpsertSpec {
            table: "mockmodel",
            columns: &columns,
            rows: &rows,
            conflict_keys: &keys,
        };
        let stmt = Dialect::Postgresql.upsert_builder()(&spec).expect("statement");
        assert_eq!(
            stmt.query,
            "INSERT INTO \"mockmodel\" (\"id\", \"name\", \"value\") VALUES ($1, $2, $3), ($4, $5, $6) \
             ON CONFLICT (\"id\") DO UPDATE SET \"name\" = EXCLUDED.\"name\", \"value\" = EXCLUDED.\"value\" \
             RETURNING *"
        );
        assert_eq!(stmt.params.len(), 6);
        assert_eq!(stmt.params[5], RowValues::Null);
    }

    #[test]
    fn sqlite_upsert_uses_numbered_placeholders() {
        let (columns, rows, keys) = spec_parts();
        let spec = UpsertSpec {
            table: "mockmodel",
            columns: &columns,
            rows: &rows[..1],
            conflict_keys: &keys,
        };
        let stmt = Dialect::Sqlite.upsert_builder()(&spec).expect("statement");
        assert!(stmt.query.starts_with(
            "INSERT INTO \"mockmodel\" (\"id\", \"name\", \"value\") VALUES (?1, ?2, ?3) ON CONFLICT (\"id\")"
        ));
        assert!(stmt.query.contains("\"name\" = excluded.\"name\""));
    }

    #[test]
    fn mysql_upsert_uses_duplicate_key_clause() {
        let (columns, rows, keys) = spec_parts();
        let spec = UpsertSpec {
            table: "mockmodel",
            columns: &columns,
            rows: &rows[..1],
            conflict_keys: &keys,
        };
        let stmt = Dialect::Mysql.upsert_builder()(&spec).expect("statement");
        assert_eq!(
            stmt.query,
            "INSERT INTO `mockmodel` (`id`, `name`, `value`) VALUES (?, ?, ?) \
             ON DUPLICATE KEY UPDATE `name` = VALUES(`name`), `value` = VALUES(`value`)"
        );
    }

    #[test]
    fn keys_only_payload_does_nothing_on_conflict() {
        let columns = vec!["id".to_string()];
        let rows = vec![vec![RowValues::Int(1)]];
        let keys = vec!["id".to_string()];
        let spec = UpsertSpec {
            table: "t",
            columns: &columns,
            rows: &rows,
            conflict_keys: &keys,
        };
        let stmt = Dialect::Sqlite.upsert_builder()(&spec).expect("statement");
        assert!(stmt.query.contains("ON CONFLICT (\"id\") DO NOTHING RETURNING *"));
    }

    #[test]
    fn rejects_conflict_key_outside_payload() {
        let (columns, rows, _) = spec_parts();
        let keys = vec!["email".to_string()];
        let spec = UpsertSpec {
            table: "t",
            columns: &columns,
            rows: &rows,
            conflict_keys: &keys,
        };
        assert!(matches!(
            Dialect::Postgresql.upsert_builder()(&spec),
            Err(CrudError::Validation(_))
        ));
    }
}
