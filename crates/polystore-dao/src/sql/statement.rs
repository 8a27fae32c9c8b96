//! Built SQL statements and their debug rendering.

use super::Dialect;
use serde_json::Value;
use std::fmt;

/// SQL text plus its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub dialect: Dialect,
    pub sql: String,
    pub params: Vec<Value>,
}

impl SqlStatement {
    #[must_use]
    pub fn new(dialect: Dialect, sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            dialect,
            sql: sql.into(),
            params,
        }
    }

    /// Renders the statement with parameters inlined, for logs only.
    ///
    /// Never execute the result. When placeholders and parameters do not
    /// line up the statement is shown as `sql | PARAMS: [...]`.
    #[must_use]
    pub fn display(&self) -> String {
        if self.params.is_empty() {
            return self.sql.clone();
        }
        let inlined = if self.dialect.numbered_placeholders() {
            inline_numbered(&self.sql, &self.params)
        } else {
            inline_positional(&self.sql, &self.params)
        };
        inlined.unwrap_or_else(|| {
            let params: Vec<String> = self.params.iter().map(literal).collect();
            format!("{} | PARAMS: [{}]", self.sql, params.join(", "))
        })
    }
}

impl fmt::Display for SqlStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

fn inline_positional(sql: &str, params: &[Value]) -> Option<String> {
    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    let mut remaining = params.iter();
    let mut in_literal = false;

    for c in sql.chars() {
        match c {
            '\'' => {
                in_literal = !in_literal;
                out.push(c);
            }
            '?' if !in_literal => out.push_str(&literal(remaining.next()?)),
            _ => out.push(c),
        }
    }

    remaining.next().is_none().then_some(out)
}

fn inline_numbered(sql: &str, params: &[Value]) -> Option<String> {
    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    let mut used = vec![false; params.len()];
    let mut in_literal = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\'' {
            in_literal = !in_literal;
            out.push(c);
            continue;
        }
        if c != '$' || in_literal || !chars.peek().is_some_and(char::is_ascii_digit) {
            out.push(c);
            continue;
        }
        let mut digits = String::new();
        while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
            digits.push(d);
            chars.next();
        }
        let index = digits.parse::<usize>().ok()?.checked_sub(1)?;
        out.push_str(&literal(params.get(index)?));
        used[index] = true;
    }

    used.into_iter().all(|u| u).then_some(out)
}

/// SQL literal form of a value.
fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        other => quote(&other.to_string()),
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
