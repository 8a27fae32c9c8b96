//! SQL dialect differences.

use polystore_core::BackendKind;

/// The SQL flavours the adapters speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// `?` placeholders, `LIMIT n OFFSET m`.
    MySql,
    /// `$n` placeholders, `OFFSET m ROWS FETCH NEXT n ROWS ONLY`.
    Postgres,
    /// `?` placeholders, `LIMIT n OFFSET m`.
    Sqlite,
}

impl Dialect {
    /// The backend kind this dialect belongs to.
    #[must_use]
    pub const fn backend(self) -> BackendKind {
        match self {
            Self::MySql => BackendKind::MySql,
            Self::Postgres => BackendKind::Postgres,
            Self::Sqlite => BackendKind::Sqlite,
        }
    }

    /// Whether placeholders carry their 1-based position.
    #[must_use]
    pub const fn numbered_placeholders(self) -> bool {
        matches!(self, Self::Postgres)
    }

    /// Placeholder for the parameter at 1-based `position`.
    #[must_use]
    pub fn placeholder(self, position: usize) -> String {
        if self.numbered_placeholders() {
            format!("${position}")
        } else {
            "?".to_string()
        }
    }

    /// Clause selecting `limit` rows after skipping `offset`.
    #[must_use]
    pub fn page_clause(self, offset: u64, limit: u64) -> String {
        match self {
            Self::MySql | Self::Sqlite => format!("LIMIT {limit} OFFSET {offset}"),
            Self::Postgres => format!("OFFSET {offset} ROWS FETCH NEXT {limit} ROWS ONLY"),
        }
    }

    /// Clause restricting a query to its first row.
    #[must_use]
    pub const fn first_row_clause(self) -> &'static str {
        match self {
            Self::MySql | Self::Sqlite => "LIMIT 1",
            Self::Postgres => "FETCH FIRST 1 ROWS ONLY",
        }
    }

    /// Statement opening a transaction.
    #[must_use]
    pub const fn begin_statement(self) -> &'static str {
        match self {
            Self::MySql => "START TRANSACTION",
            Self::Postgres | Self::Sqlite => "BEGIN",
        }
    }

    /// Insert statement for a row without any column.
    #[must_use]
    pub fn empty_insert(self, table: &str) -> String {
        match self {
            Self::MySql => format!("INSERT INTO {table} () VALUES ()"),
            Self::Postgres | Self::Sqlite => format!("INSERT INTO {table} DEFAULT VALUES"),
        }
    }

    /// Clause returning the id column of an inserted row. MySQL has none
    /// and reports `LAST_INSERT_ID` instead.
    #[must_use]
    pub fn returning_clause(self, id_field: &str) -> Option<String> {
        match self {
            Self::Postgres | Self::Sqlite => Some(format!("RETURNING {id_field}")),
            Self::MySql => None,
        }
    }
}
