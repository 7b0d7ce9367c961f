//! Placeholder rewriting: `?` rebinding and `:name` parameters.
//!
//! Both rewrites share one lightweight lexer that leaves quoted strings, quoted
//! identifiers, comments, and dollar-quoted bodies untouched.

use std::borrow::Cow;
use std::convert::Infallible;

mod parsers;
mod scanner;

use parsers::{digits_at, identifier_at};
use scanner::Lexeme;

use crate::error::TxMiddlewareError;
use crate::types::RowValues;

/// Placeholder syntax understood by an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// PostgreSQL-style placeholders like `$1`.
    Dollar,
    /// Question-mark placeholders like `?` or `?1`.
    Question,
}

/// Rebind placeholders into the `target` style.
///
/// For [`PlaceholderStyle::Dollar`], bare `?` marks are numbered left to right (`$1`, `$2`, …)
/// and numbered `?N` marks become `$N`. For [`PlaceholderStyle::Question`], `$N` becomes `?N`.
/// Returns a borrowed `Cow` when no changes are needed.
#[must_use]
pub fn rebind(sql: &str, target: PlaceholderStyle) -> Cow<'_, str> {
    let mut ordinal = 0usize;
    let rewritten = rewrite(sql, |bytes, idx| -> Result<_, Infallible> {
        match (target, bytes[idx]) {
            (PlaceholderStyle::Dollar, b'?') => {
                if let Some((end, digits)) = digits_at(bytes, idx + 1) {
                    return Ok(Some((format!("${digits}"), end)));
                }
                ordinal += 1;
                Ok(Some((format!("${ordinal}"), idx + 1)))
            }
            (PlaceholderStyle::Question, b'$') => Ok(digits_at(bytes, idx + 1)
                .map(|(end, digits)| (format!("?{digits}"), end))),
            _ => Ok(None),
        }
    });
    match rewritten {
        Ok(sql) => sql,
        Err(never) => match never {},
    }
}

/// Rewrite `:name` parameters into `$N` placeholders.
///
/// Names are numbered in order of first appearance; repeated names reuse their number.
/// `::` casts are left alone. The returned values are ordered to match the placeholders.
///
/// # Errors
/// Returns `TxMiddlewareError::ParameterError` if the statement names a parameter that
/// `params` does not supply.
pub fn bind_named(
    sql: &str,
    params: &[(&str, RowValues)],
) -> Result<(String, Vec<RowValues>), TxMiddlewareError> {
    let mut names: Vec<String> = Vec::new();
    let mut values: Vec<RowValues> = Vec::new();

    let rewritten = rewrite(
        sql,
        |bytes: &[u8], idx: usize| -> Result<Option<(String, usize)>, TxMiddlewareError> {
            if bytes[idx] != b':' {
                return Ok(None);
            }
            if bytes.get(idx + 1) == Some(&b':') {
                return Ok(Some(("::".to_string(), idx + 2)));
            }
            let Some((end, name)) = identifier_at(bytes, idx + 1) else {
                return Ok(None);
            };

            let position = if let Some(pos) = names.iter().position(|n| n == name) {
                pos + 1
            } else {
                let value = params
                    .iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| value.clone())
                    .ok_or_else(|| {
                        TxMiddlewareError::ParameterError(format!("missing named parameter :{name}"))
                    })?;
                names.push(name.to_string());
                values.push(value);
                names.len()
            };
            Ok(Some((format!("${position}"), end)))
        },
    )?;

    Ok((rewritten.into_owned(), values))
}

/// Walk `sql`, offering every byte outside literals and comments to `hook`.
///
/// `hook` returns the replacement text and the index just past the consumed input.
fn rewrite<'s, E, F>(sql: &'s str, mut hook: F) -> Result<Cow<'s, str>, E>
where
    F: FnMut(&[u8], usize) -> Result<Option<(String, usize)>, E>,
{
    let bytes = sql.as_bytes();
    let mut out: Option<String> = None;
    let mut copied = 0;
    let mut lexeme = Lexeme::Code;
    let mut idx = 0;

    while idx < bytes.len() {
        if lexeme != Lexeme::Code {
            let (next, last) = lexeme.skip(bytes, idx);
            lexeme = next;
            idx = last + 1;
            continue;
        }
        if let Some((opened, last)) = Lexeme::open_at(bytes, idx) {
            lexeme = opened;
            idx = last + 1;
            continue;
        }
        if let Some((replacement, next)) = hook(bytes, idx)? {
            let buf = out.get_or_insert_with(|| String::with_capacity(sql.len() + 8));
            buf.push_str(&sql[copied..idx]);
            buf.push_str(&replacement);
            copied = next;
            idx = next;
        } else {
            idx += 1;
        }
    }

    Ok(match out {
        Some(mut buf) => {
            buf.push_str(&sql[copied..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(sql),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_bare_question_marks() {
        let sql = "insert into t (a, b) values (?, ?)";
        let res = rebind(sql, PlaceholderStyle::Dollar);
        assert_eq!(res, "insert into t (a, b) values ($1, $2)");
    }

    #[test]
    fn keeps_numbered_question_marks() {
        let sql = "select * from t where a = ?2 and b = ?1";
        let res = rebind(sql, PlaceholderStyle::Dollar);
        assert_eq!(res, "select * from t where a = $2 and b = $1");
    }

    #[test]
    fn translates_dollar_to_question() {
        let sql = "insert into t values($1, $2)";
        let res = rebind(sql, PlaceholderStyle::Question);
        assert_eq!(res, "insert into t values(?1, ?2)");
    }

    #[test]
    fn skips_inside_literals_and_comments() {
        let sql = "select '?', ? -- ?\n/* ? /* ? */ */ from t where \"c?\" = ?";
        let res = rebind(sql, PlaceholderStyle::Dollar);
        assert_eq!(
            res,
            "select '?', $1 -- ?\n/* ? /* ? */ */ from t where \"c?\" = $2"
        );
    }

    #[test]
    fn skips_dollar_quoted_blocks() {
        let sql = "$foo$ select ? from t $foo$ where a = ?";
        let res = rebind(sql, PlaceholderStyle::Dollar);
        assert_eq!(res, "$foo$ select ? from t $foo$ where a = $1");
    }

    #[test]
    fn unchanged_sql_is_borrowed() {
        let sql = "select * from t where a = $1";
        let res = rebind(sql, PlaceholderStyle::Dollar);
        assert!(matches!(res, Cow::Borrowed(_)));
    }

    #[test]
    fn preserves_multibyte_text() {
        let sql = "select 'ünï' || ? from t";
        let res = rebind(sql, PlaceholderStyle::Dollar);
        assert_eq!(res, "select 'ünï' || $1 from t");
    }

    #[test]
    fn binds_named_parameters_in_first_appearance_order() {
        let (sql, values) = bind_named(
            "update t set name = :name where id = :id or parent = :id",
            &[("id", RowValues::Int(7)), ("name", RowValues::Text("x".into()))],
        )
        .unwrap();
        assert_eq!(sql, "update t set name = $1 where id = $2 or parent = $2");
        assert_eq!(values, vec![RowValues::Text("x".into()), RowValues::Int(7)]);
    }

    #[test]
    fn named_binding_ignores_casts_and_literals() {
        let (sql, values) = bind_named(
            "select :v::int, ':skip', '{\"a\":1}'::jsonb",
            &[("v", RowValues::Int(1))],
        )
        .unwrap();
        assert_eq!(sql, "select $1::int, ':skip', '{\"a\":1}'::jsonb");
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn missing_named_parameter_is_an_error() {
        let err = bind_named("select :absent", &[]).unwrap_err();
        assert!(matches!(err, TxMiddlewareError::ParameterError(_)));
    }
}
