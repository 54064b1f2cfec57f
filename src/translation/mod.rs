use std::borrow::Cow;

mod parsers;
mod scanner;

use parsers::{
    block_comment_close_at, block_comment_open_at, dollar_quote_close_at, dollar_quote_open,
    line_comment_at,
};
use scanner::{State, scan_number};

use crate::error::CrudError;
use crate::types::QueryAndParams;

/// Placeholder style a `$n` query is rewritten into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// Numbered SQLite placeholders like `?1`; parameters keep their order.
    Sqlite,
    /// Bare `?` placeholders; parameters are re-listed in order of appearance.
    Anonymous,
}

/// Rewrite Postgres-style `$N` placeholders into `target`.
///
/// Quoted strings, comments and dollar-quoted blocks are skipped by a small state machine; it may
/// still miss edge cases in unusual SQL. Returns the placeholder numbers in order of appearance
/// alongside the SQL, which is borrowed when nothing changed.
#[must_use]
pub fn translate_placeholders(sql: &str, target: PlaceholderStyle) -> (Cow<'_, str>, Vec<usize>) {
    let mut out: Option<String> = None;
    let mut seen = Vec::new();
    let mut state = State::Normal;
    let mut idx = 0;
    let bytes = sql.as_bytes();

    while idx < bytes.len() {
        let b = bytes[idx];
        let mut replaced = false;
        match state {
            State::Normal => match b {
                b'\'' => state = State::SingleQuoted,
                b'"' => state = State::DoubleQuoted,
                _ if line_comment_at(bytes, idx) => state = State::LineComment,
                _ if block_comment_open_at(bytes, idx) => {
                    state = State::BlockComment(1);
                    copy_marker(&mut out, sql, &mut idx);
                    continue;
                }
                b'$' => {
                    if let Some((end, n)) = scan_number(bytes, idx + 1) {
                        let buf = out.get_or_insert_with(|| sql[..idx].to_string());
                        buf.push('?');
                        if target == PlaceholderStyle::Sqlite {
                            buf.push_str(&n.to_string());
                        }
                        seen.push(n);
                        idx = end - 1;
                        replaced = true;
                    } else if let Some((tag, close)) = dollar_quote_open(bytes, idx) {
                        if let Some(buf) = out.as_mut() {
                            buf.push_str(&sql[idx..close]);
                        }
                        state = State::DollarQuoted(tag);
                        idx = close;
                    }
                }
                _ => {}
            },
            State::SingleQuoted => {
                if b == b'\'' {
                    if bytes.get(idx + 1) == Some(&b'\'') {
                        if let Some(buf) = out.as_mut() {
                            buf.push('\'');
                        }
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    if bytes.get(idx + 1) == Some(&b'"') {
                        if let Some(buf) = out.as_mut() {
                            buf.push('"');
                        }
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if block_comment_open_at(bytes, idx) {
                    state = State::BlockComment(depth + 1);
                    copy_marker(&mut out, sql, &mut idx);
                    continue;
                } else if block_comment_close_at(bytes, idx) {
                    state = if depth == 1 {
                        State::Normal
                    } else {
                        State::BlockComment(depth - 1)
                    };
                    copy_marker(&mut out, sql, &mut idx);
                    continue;
                }
            }
            State::DollarQuoted(ref tag) => {
                if dollar_quote_close_at(bytes, idx, tag) {
                    let skip = tag.len() + 1;
                    if let Some(buf) = out.as_mut() {
                        buf.push_str(&sql[idx..idx + skip]);
                    }
                    state = State::Normal;
                    idx += skip;
                    continue;
                }
            }
        }

        if let Some(buf) = out.as_mut()
            && !replaced
        {
            // copy the whole UTF-8 sequence, not just the lead byte
            let width = utf8_width(b);
            buf.push_str(&sql[idx..idx + width]);
            idx += width;
            continue;
        }

        idx += 1;
    }

    let sql = match out {
        Some(buf) => Cow::Owned(buf),
        None => Cow::Borrowed(sql),
    };
    (sql, seen)
}

/// Step over a two-byte comment marker so its bytes are never read twice.
fn copy_marker(out: &mut Option<String>, sql: &str, idx: &mut usize) {
    if let Some(buf) = out.as_mut() {
        buf.push_str(&sql[*idx..*idx + 2]);
    }
    *idx += 2;
}

fn utf8_width(lead: u8) -> usize {
    match lead {
        0xF0..=0xF7 => 4,
        0xE0..=0xEF => 3,
        0xC0..=0xDF => 2,
        _ => 1,
    }
}

/// Prepare a caller-written `$n` query for a backend with a different placeholder style.
///
/// For [`PlaceholderStyle::Anonymous`] the parameter list is rebuilt to follow placeholder order,
/// so `$2 ... $1` binds correctly.
///
/// # Errors
/// Returns `CrudError::ParameterError` when a placeholder refers past the supplied parameters.
pub fn translate_query(
    query: &QueryAndParams,
    target: PlaceholderStyle,
) -> Result<QueryAndParams, CrudError> {
    let (sql, seen) = translate_placeholders(&query.query, target);
    if let Some(&n) = seen.iter().find(|&&n| n == 0 || n > query.params.len()) {
        return Err(CrudError::ParameterError(format!(
            "placeholder ${n} has no matching parameter ({} supplied)",
            query.params.len()
        )));
    }
    let params = match target {
        PlaceholderStyle::Sqlite => query.params.clone(),
        PlaceholderStyle::Anonymous => seen.iter().map(|&n| query.params[n - 1].clone()).collect(),
    };
    Ok(QueryAndParams::new(sql.into_owned(), params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RowValues;

    #[test]
    fn translates_postgres_to_sqlite() {
        let (sql, seen) =
            translate_placeholders("insert into t values($1, $2)", PlaceholderStyle::Sqlite);
        assert_eq!(sql, "insert into t values(?1, ?2)");
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn skips_inside_literals_and_comments() {
        let sql = "select '$1', $1 -- $2\n/* $3 */ from t where a = $1";
        let (res, _) = translate_placeholders(sql, PlaceholderStyle::Sqlite);
        assert_eq!(res, "select '$1', ?1 -- $2\n/* $3 */ from t where a = ?1");
    }

    #[test]
    fn comment_markers_do_not_share_bytes() {
        let (res, seen) = translate_placeholders("SELECT /*/ $1 */ $1", PlaceholderStyle::Sqlite);
        assert_eq!(res, "SELECT /*/ $1 */ ?1");
        assert_eq!(seen, vec![1]);

        let (res, seen) = translate_placeholders("SELECT $1 /* a /*/ $2 */ $3 */ $4", PlaceholderStyle::Sqlite);
        assert_eq!(res, "SELECT ?1 /* a /*/ $2 */ $3 */ ?4");
        assert_eq!(seen, vec![1, 4]);
    }

    #[test]
    fn skips_dollar_quoted_blocks() {
        let sql = "$foo$ select $1 from t $foo$ where a = $1";
        let (res, _) = translate_placeholders(sql, PlaceholderStyle::Sqlite);
        assert_eq!(res, "$foo$ select $1 from t $foo$ where a = ?1");
    }

    #[test]
    fn keeps_escaped_quotes_and_multibyte_text() {
        let sql = "select 'it''s', 'café' where a = $1";
        let (res, _) = translate_placeholders(sql, PlaceholderStyle::Sqlite);
        assert_eq!(res, "select 'it''s', 'café' where a = ?1");
    }

    #[test]
    fn untouched_sql_is_borrowed() {
        let (res, seen) = translate_placeholders("select 1", PlaceholderStyle::Sqlite);
        assert!(matches!(res, Cow::Borrowed(_)));
        assert!(seen.is_empty());
    }

    #[test]
    fn anonymous_style_reorders_params() {
        let q = QueryAndParams::new(
            "select * from t where b = $2 and a = $1 or c = $2",
            vec![RowValues::Int(1), RowValues::Int(2)],
        );
        let out = translate_query(&q, PlaceholderStyle::Anonymous).expect("translated");
        assert_eq!(out.query, "select * from t where b = ? and a = ? or c = ?");
        assert_eq!(
            out.params,
            vec![RowValues::Int(2), RowValues::Int(1), RowValues::Int(2)]
        );
    }

    #[test]
    fn rejects_missing_parameter() {
        let q = QueryAndParams::new("select $3", vec![RowValues::Int(1)]);
        assert!(matches!(
            translate_query(&q, PlaceholderStyle::Sqlite),
            Err(CrudError::ParameterError(_))
        ));
    }
}
