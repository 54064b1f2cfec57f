//! Statement assembly with dialect-correct identifiers and placeholders.

use crate::dialect::Dialect;
use crate::filter::Predicate;
use crate::types::{QueryAndParams, RowValues};

/// Incrementally builds SQL text and its bind parameters.
#[derive(Debug)]
pub struct SqlBuilder {
    dialect: Dialect,
    sql: String,
    params: Vec<RowValues>,
}

impl SqlBuilder {
    #[must_use]
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::with_capacity(128),
            params: Vec::new(),
        }
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn push(&mut self, fragment: &str) -> &mut Self {
        self.sql.push_str(fragment);
        self
    }

    pub fn push_ident(&mut self, ident: &str) -> &mut Self {
        let quoted = self.dialect.quote_ident(ident);
        self.sql.push_str(&quoted);
        self
    }

    /// Comma-separated quoted identifiers.
    pub fn push_idents<'a>(&mut self, idents: impl IntoIterator<Item = &'a str>) -> &mut Self {
        for (i, ident) in idents.into_iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.push_ident(ident);
        }
        self
    }

    /// Append a placeholder and record its value.
    pub fn bind(&mut self, value: RowValues) -> &mut Self {
        self.params.push(value);
        let placeholder = self.dialect.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
        self
    }

    /// `(p1, p2, ...)`
    pub fn push_tuple(&mut self, values: impl IntoIterator<Item = RowValues>) -> &mut Self {
        self.sql.push('(');
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.bind(value);
        }
        self.sql.push(')');
        self
    }

    /// ` WHERE a AND b`; nothing when there are no predicates.
    pub fn push_where(&mut self, predicates: &[Predicate]) -> &mut Self {
        for (i, predicate) in predicates.iter().enumerate() {
            self.push(if i == 0 { " WHERE " } else { " AND " });
            predicate.render(self);
        }
        self
    }

    #[must_use]
    pub fn finish(self) -> QueryAndParams {
        QueryAndParams::new(self.sql, self.params)
    }
}

/// `SELECT * FROM table WHERE column = value`
#[must_use]
pub fn select_by_column(
    dialect: Dialect,
    table: &str,
    column: &str,
    value: RowValues,
) -> QueryAndParams {
    let mut b = SqlBuilder::new(dialect);
    b.push("SELECT * FROM ").push_ident(table);
    b.push(" WHERE ").push_ident(column).push(" = ").bind(value);
    b.finish()
}

/// `SELECT * FROM table WHERE column IN (...)`; `values` must be non-empty.
#[must_use]
pub fn select_in(
    dialect: Dialect,
    table: &str,
    column: &str,
    values: Vec<RowValues>,
) -> QueryAndParams {
    let mut b = SqlBuilder::new(dialect);
    b.push("SELECT * FROM ").push_ident(table);
    b.push(" WHERE ").push_ident(column).push(" IN ").push_tuple(values);
    b.finish()
}

/// Multi-row `INSERT`; `rows` are aligned with `columns`. Appends `RETURNING *` where supported.
#[must_use]
pub fn insert_rows(
    dialect: Dialect,
    table: &str,
    columns: &[String],
    rows: Vec<Vec<RowValues>>,
) -> QueryAndParams {
    let mut b = SqlBuilder::new(dialect);
    b.push("INSERT INTO ").push_ident(table);
    if columns.is_empty() {
        b.push(if dialect == Dialect::Mysql {
            " () VALUES ()"
        } else {
            " DEFAULT VALUES"
        });
    } else {
        b.push(" (").push_idents(columns.iter().map(String::as_str)).push(") VALUES ");
        for (i, row) in rows.into_iter().enumerate() {
            if i > 0 {
                b.push(", ");
            }
            b.push_tuple(row);
        }
    }
    if dialect.supports_returning() {
        b.push(" RETURNING *");
    }
    b.finish()
}

/// `UPDATE table SET a = .., b = .. WHERE pk = id`
#[must_use]
pub fn update_by_key(
    dialect: Dialect,
    table: &str,
    pk: &str,
    id: RowValues,
    changes: impl IntoIterator<Item = (String, RowValues)>,
) -> QueryAndParams {
    let mut b = SqlBuilder::new(dialect);
    b.push("UPDATE ").push_ident(table).push(" SET ");
    for (i, (column, value)) in changes.into_iter().enumerate() {
        if i > 0 {
            b.push(", ");
        }
        b.push_ident(&column).push(" = ").bind(value);
    }
    b.push(" WHERE ").push_ident(pk).push(" = ").bind(id);
    b.finish()
}

/// `DELETE FROM table WHERE pk = id`
#[must_use]
pub fn delete_by_key(dialect: Dialect, table: &str, pk: &str, id: RowValues) -> QueryAndParams {
    let mut b = SqlBuilder::new(dialect);
    b.push("DELETE FROM ").push_ident(table);
    b.push(" WHERE ").push_ident(pk).push(" = ").bind(id);
    b.finish()
}
