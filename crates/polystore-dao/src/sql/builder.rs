//! Statement builder shared by the SQL adapters.
//!
//! Table and column names are checked against a conservative identifier
//! pattern because they are spliced into the SQL text. Values are always
//! bound; `NULL` is written inline so untyped nulls never reach the driver.

use super::{Dialect, SqlStatement};
use polystore_core::{rules, Filter, ListOptions, NativeId, Predicate, Row, StoreError, StoreResult, Window};
use serde_json::Value;

/// Checks a table or column name.
pub fn check_identifier(name: &str) -> StoreResult<()> {
    rules::valid_identifier(name)
        .map_err(|e| StoreError::validation(format!("invalid SQL identifier '{}': {}", name, e.code)))
}

/// Parameter list tracking placeholder positions.
struct Params {
    dialect: Dialect,
    values: Vec<Value>,
}

impl Params {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            values: Vec::new(),
        }
    }

    /// Adds a value and returns its placeholder.
    fn push(&mut self, value: Value) -> String {
        self.values.push(value);
        self.dialect.placeholder(self.values.len())
    }

    fn into_statement(self, sql: String) -> SqlStatement {
        SqlStatement::new(self.dialect, sql, self.values)
    }
}

/// Builds the statements of one table.
#[derive(Debug, Clone)]
pub struct SqlBuilder {
    dialect: Dialect,
    table: String,
    id_field: String,
}

impl SqlBuilder {
    /// Creates a builder for `table` keyed by `id_field`.
    pub fn new(dialect: Dialect, table: impl Into<String>, id_field: impl Into<String>) -> StoreResult<Self> {
        let table = table.into();
        let id_field = id_field.into();
        check_identifier(&table)?;
        check_identifier(&id_field)?;
        Ok(Self {
            dialect,
            table,
            id_field,
        })
    }

    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    /// `SELECT COUNT(*)` over the rows matching `filter`.
    pub fn count(&self, filter: Option<&Filter>) -> StoreResult<SqlStatement> {
        let mut params = Params::new(self.dialect);
        let where_clause = self.where_clause(filter, &mut params)?;
        Ok(params.into_statement(format!("SELECT COUNT(*) AS total FROM {}{}", self.table, where_clause)))
    }

    /// Lists rows. A sliced window without explicit ordering is ordered by
    /// the id field so pages never overlap.
    pub fn select_all(&self, options: &ListOptions, window: Window) -> StoreResult<SqlStatement> {
        let mut params = Params::new(self.dialect);
        let where_clause = self.where_clause(options.active_filter(), &mut params)?;
        let paged = matches!(window, Window::Slice { .. });
        let order_clause = self.order_clause(options, paged)?;

        let mut sql = format!("SELECT * FROM {}{}{}", self.table, where_clause, order_clause);
        if let Window::Slice { offset, limit } = window {
            sql.push(' ');
            sql.push_str(&self.dialect.page_clause(offset, limit));
        }
        Ok(params.into_statement(sql))
    }

    /// Fetches one row by id.
    #[must_use]
    pub fn by_id(&self, id: &NativeId) -> SqlStatement {
        let mut params = Params::new(self.dialect);
        let ph = params.push(id.to_value());
        params.into_statement(format!("SELECT * FROM {} WHERE {} = {}", self.table, self.id_field, ph))
    }

    /// Fetches the id and name of one row.
    #[must_use]
    pub fn desc_by_id(&self, id: &NativeId) -> SqlStatement {
        let mut params = Params::new(self.dialect);
        let ph = params.push(id.to_value());
        params.into_statement(format!(
            "SELECT {id}, name FROM {} WHERE {id} = {}",
            self.table,
            ph,
            id = self.id_field
        ))
    }

    /// Fetches the first row named `name`.
    #[must_use]
    pub fn by_name(&self, name: &str) -> SqlStatement {
        let mut params = Params::new(self.dialect);
        let ph = params.push(Value::String(name.to_string()));
        params.into_statement(format!(
            "SELECT * FROM {} WHERE name = {} {}",
            self.table,
            ph,
            self.dialect.first_row_clause()
        ))
    }

    /// Inserts one row.
    pub fn insert(&self, row: &Row) -> StoreResult<SqlStatement> {
        let mut params = Params::new(self.dialect);

        let mut sql = if row.is_empty() {
            self.dialect.empty_insert(&self.table)
        } else {
            let mut columns = Vec::with_capacity(row.len());
            let mut values = Vec::with_capacity(row.len());
            for (column, value) in row {
                check_identifier(column)?;
                columns.push(column.as_str());
                values.push(if value.is_null() {
                    "NULL".to_string()
                } else {
                    params.push(value.clone())
                });
            }
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.table,
                columns.join(", "),
                values.join(", ")
            )
        };

        if let Some(returning) = self.dialect.returning_clause(&self.id_field) {
            sql.push(' ');
            sql.push_str(&returning);
        }
        Ok(params.into_statement(sql))
    }

    /// Replaces the listed columns of one row. The id column is never
    /// updated; `None` means there is nothing to set.
    pub fn update(&self, id: &NativeId, partial: &Row) -> StoreResult<Option<SqlStatement>> {
        let mut params = Params::new(self.dialect);
        let mut assignments = Vec::with_capacity(partial.len());

        for (column, value) in partial.iter().filter(|(column, _)| **column != self.id_field) {
            check_identifier(column)?;
            if value.is_null() {
                assignments.push(format!("{column} = NULL"));
            } else {
                let ph = params.push(value.clone());
                assignments.push(format!("{column} = {ph}"));
            }
        }

        if assignments.is_empty() {
            return Ok(None);
        }

        let ph = params.push(id.to_value());
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = {}",
            self.table,
            assignments.join(", "),
            self.id_field,
            ph
        );
        Ok(Some(params.into_statement(sql)))
    }

    /// Deletes one row.
    #[must_use]
    pub fn delete_by_id(&self, id: &NativeId) -> SqlStatement {
        let mut params = Params::new(self.dialect);
        let ph = params.push(id.to_value());
        params.into_statement(format!("DELETE FROM {} WHERE {} = {}", self.table, self.id_field, ph))
    }

    /// Deletes every row.
    #[must_use]
    pub fn delete_all(&self) -> SqlStatement {
        SqlStatement::new(self.dialect, format!("DELETE FROM {}", self.table), Vec::new())
    }

    fn where_clause(&self, filter: Option<&Filter>, params: &mut Params) -> StoreResult<String> {
        let Some(filter) = filter.filter(|f| !f.is_empty()) else {
            return Ok(String::new());
        };

        let mut conditions = Vec::with_capacity(filter.predicates().len());
        for predicate in filter.predicates() {
            match predicate {
                Predicate::Eq { field, value } => {
                    check_identifier(field)?;
                    if value.is_null() {
                        conditions.push(format!("{field} IS NULL"));
                    } else {
                        let ph = params.push(value.clone());
                        conditions.push(format!("{field} = {ph}"));
                    }
                }
                Predicate::Native { expr, params: native } => {
                    let fragment = if self.dialect.numbered_placeholders() {
                        shift_placeholders(expr, params.values.len())
                    } else {
                        expr.clone()
                    };
                    params.values.extend(native.iter().cloned());
                    conditions.push(format!("({fragment})"));
                }
            }
        }

        Ok(format!(" WHERE {}", conditions.join(" AND ")))
    }

    fn order_clause(&self, options: &ListOptions, paged: bool) -> StoreResult<String> {
        if options.order_by.is_empty() {
            return Ok(if paged {
                format!(" ORDER BY {} ASC", self.id_field)
            } else {
                String::new()
            });
        }

        let mut keys = Vec::with_capacity(options.order_by.len());
        for key in &options.order_by {
            check_identifier(&key.field)?;
            keys.push(format!("{} {}", key.field, key.direction.keyword()));
        }
        Ok(format!(" ORDER BY {}", keys.join(", ")))
    }
}

/// Renumbers `$n` placeholders of a native fragment by `base`, so each
/// fragment can count its own parameters from `$1`.
fn shift_placeholders(expr: &str, base: usize) -> String {
    if base == 0 {
        return expr.to_string();
    }

    let mut out = String::with_capacity(expr.len() + 4);
    let mut in_literal = false;
    let mut chars = expr.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\'' {
            in_literal = !in_literal;
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
        match digits.parse::<usize>() {
            Ok(n) => out.push_str(&format!("${}", n + base)),
            Err(_) => {
                out.push('$');
                out.push_str(&digits);
            }
        }
    }
    out
}
