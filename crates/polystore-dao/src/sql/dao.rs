//! The relational implementation of [`Dao`].

use super::{SqlBuilder, SqlConnector, SqlStatement};
use crate::connection::{ConnectionManager, Session};
use async_trait::async_trait;
use polystore_core::{
    externalize, external_id_of, paginate, to_internal, BackendKind, Codec, Dao, Descriptor, Filter, ListOptions,
    NativeId, PageRequest, PagedResult, Row, SchemaCodec, ScopeOutcome, StoreError, StoreResult, Window,
};
use serde_json::Value;
use std::fmt;
use tracing::{debug, error, info, warn};

/// A table behind a single SQL connection.
///
/// With `auto_commit` every write outside an open unit of work commits on
/// its own. Without it, writes join a transaction that stays open until
/// [`commit`](Self::commit) or [`rollback`](Self::rollback).
pub struct SqlDao<K: SqlConnector> {
    manager: ConnectionManager<K>,
    builder: SqlBuilder,
    codec: SchemaCodec,
    auto_commit: bool,
}

impl<K: SqlConnector> SqlDao<K> {
    /// Creates an adapter over `table`, keyed by the dialect's default id
    /// field. Nothing is opened until first use.
    pub fn with_connector(
        connector: K,
        table: impl Into<String>,
        codec: SchemaCodec,
        auto_commit: bool,
    ) -> StoreResult<Self> {
        let builder = SqlBuilder::new(K::DIALECT, table, K::DIALECT.backend().default_id_field())?;
        Ok(Self {
            manager: ConnectionManager::new(connector),
            builder,
            codec,
            auto_commit,
        })
    }

    /// Uses `id_field` instead of the default identifier column.
    pub fn with_id_field(mut self, id_field: impl Into<String>) -> StoreResult<Self> {
        self.builder = SqlBuilder::new(K::DIALECT, self.builder.table(), id_field)?;
        Ok(self)
    }

    #[must_use]
    pub fn table(&self) -> &str {
        self.builder.table()
    }

    #[must_use]
    pub const fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionManager<K> {
        &self.manager
    }

    /// Opens the connection now instead of on first use.
    pub async fn connect(&self) -> StoreResult<()> {
        self.manager.connect().await
    }

    /// Runs schema statements such as `CREATE TABLE`.
    pub async fn ddl(&self, sql: &str) -> StoreResult<()> {
        let mut session = self.manager.acquire().await?;
        info!(backend = %self.backend(), sql = %sql, "Executing DDL");
        let result = self.manager.connector().execute_raw(session.conn(), sql).await;
        let stmt = SqlStatement::new(K::DIALECT, sql, Vec::new());
        self.settle(&mut session, &stmt, result).await
    }

    /// Commits pending writes.
    pub async fn commit(&self) -> StoreResult<()> {
        self.manager.acquire().await?.commit().await
    }

    /// Discards pending writes.
    pub async fn rollback(&self) -> StoreResult<()> {
        self.manager.acquire().await?.rollback().await
    }

    fn native_id(&self, id: &str) -> StoreResult<NativeId> {
        to_internal(id, K::DIALECT.backend())
    }

    /// Normalizes a row for insertion. The supplied id is read from the
    /// caller's row since a schema need not declare it.
    fn prepare_insert(&self, original: &Row, mut record: Row) -> StoreResult<(Option<String>, SqlStatement)> {
        let id_field = self.builder.id_field();
        let supplied = original.get(id_field).and_then(external_id_of);

        record.remove(id_field);
        if let Some(id) = &supplied {
            record.insert(id_field.to_string(), self.native_id(id)?.to_value());
        }

        Ok((supplied, self.builder.insert(&record)?))
    }

    /// Passes a statement result through, rolling back an open transaction
    /// when the statement failed on a live connection.
    async fn settle<T>(
        &self,
        session: &mut Session<'_, K>,
        stmt: &SqlStatement,
        result: StoreResult<T>,
    ) -> StoreResult<T> {
        let result = session.track(result);
        if let Err(e) = &result {
            error!(backend = %self.backend(), sql = %stmt, error = %e, "Statement failed");
            if !e.is_connection_error() && session.in_transaction() {
                if let Err(rollback_err) = session.rollback().await {
                    warn!(backend = %self.backend(), error = %rollback_err, "Rollback after failure failed");
                }
            }
        }
        result
    }

    async fn begin_write(&self, session: &mut Session<'_, K>) -> StoreResult<()> {
        if self.auto_commit {
            Ok(())
        } else {
            session.begin().await
        }
    }

    async fn fetch_rows(&self, stmt: &SqlStatement) -> StoreResult<Vec<Row>> {
        let mut session = self.manager.acquire().await?;
        debug!(backend = %self.backend(), sql = %stmt, "Query");
        let result = self.manager.connector().fetch_rows(session.conn(), stmt).await;
        let mut rows = self.settle(&mut session, stmt, result).await?;
        for row in &mut rows {
            externalize(row, self.builder.id_field());
        }
        Ok(rows)
    }

    async fn fetch_first(&self, stmt: &SqlStatement) -> StoreResult<Option<Row>> {
        Ok(self.fetch_rows(stmt).await?.into_iter().next())
    }

    async fn write(&self, stmt: &SqlStatement) -> StoreResult<u64> {
        let mut session = self.manager.acquire().await?;
        self.begin_write(&mut session).await?;
        debug!(backend = %self.backend(), sql = %stmt, "Execute");
        let result = self.manager.connector().execute(session.conn(), stmt).await;
        let affected = self.settle(&mut session, stmt, result).await?;
        debug!(backend = %self.backend(), affected, "Rows affected");
        Ok(affected)
    }
}

impl<K: SqlConnector> fmt::Debug for SqlDao<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlDao")
            .field("table", &self.builder.table())
            .field("id_field", &self.builder.id_field())
            .field("auto_commit", &self.auto_commit)
            .field("connection", &self.manager)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<K: SqlConnector> Dao for SqlDao<K> {
    fn backend(&self) -> BackendKind {
        K::DIALECT.backend()
    }

    fn id_field(&self) -> &str {
        self.builder.id_field()
    }

    fn codec(&self) -> &SchemaCodec {
        &self.codec
    }

    async fn get_all(&self, page: Option<PageRequest>, options: &ListOptions) -> StoreResult<PagedResult<Row>> {
        let count_stmt = self.builder.count(options.active_filter())?;
        let total = {
            let mut session = self.manager.acquire().await?;
            debug!(backend = %self.backend(), sql = %count_stmt, "Count");
            let result = self.manager.connector().fetch_count(session.conn(), &count_stmt).await;
            self.settle(&mut session, &count_stmt, result).await?
        };

        let (window, metadata) = paginate(total, page);
        let data = match window {
            Window::Slice { limit: 0, .. } => Vec::new(),
            _ if total == 0 => Vec::new(),
            window => {
                let stmt = self.builder.select_all(options, window)?;
                self.fetch_rows(&stmt).await?
            }
        };

        Ok(PagedResult::new(metadata, data))
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Option<Row>> {
        let native = self.native_id(id)?;
        self.fetch_first(&self.builder.by_id(&native)).await
    }

    async fn get_by_name(&self, name: &str) -> StoreResult<Option<Row>> {
        self.fetch_first(&self.builder.by_name(name)).await
    }

    async fn get_desc_by_id(&self, id: &str) -> StoreResult<Option<Descriptor>> {
        let native = self.native_id(id)?;
        let row = self.fetch_first(&self.builder.desc_by_id(&native)).await?;
        Ok(row.and_then(|r| Descriptor::from_row(&r, self.builder.id_field())))
    }

    async fn persist(&self, row: &mut Row) -> StoreResult<String> {
        let record = self.codec.load_row(row)?;
        let (supplied, stmt) = self.prepare_insert(row, record)?;

        let mut session = self.manager.acquire().await?;
        self.begin_write(&mut session).await?;
        debug!(backend = %self.backend(), sql = %stmt, "Insert");
        let result = self.manager.connector().insert(session.conn(), &stmt).await;
        let generated = self.settle(&mut session, &stmt, result).await?;

        let id = supplied
            .or(generated)
            .ok_or_else(|| StoreError::internal(format!("{} did not report a generated id", self.backend())))?;
        row.insert(self.builder.id_field().to_string(), Value::String(id.clone()));
        Ok(id)
    }

    async fn persist_many(&self, rows: &mut [Row]) -> StoreResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let records = self
            .codec
            .load_many(rows.iter().cloned().map(Value::Object).collect())?;
        let prepared = rows
            .iter()
            .zip(records)
            .map(|(row, record)| self.prepare_insert(row, record))
            .collect::<StoreResult<Vec<_>>>()?;

        let mut session = self.manager.acquire().await?;
        let owns_transaction = !session.in_transaction();
        session.begin().await?;

        let mut ids = Vec::with_capacity(prepared.len());
        for (supplied, stmt) in &prepared {
            debug!(backend = %self.backend(), sql = %stmt, "Insert");
            let result = self.manager.connector().insert(session.conn(), stmt).await;
            let generated = self.settle(&mut session, stmt, result).await?;
            ids.push(supplied.clone().or(generated));
        }

        if owns_transaction && self.auto_commit {
            session.commit().await?;
        }

        let id_field = self.builder.id_field();
        for (row, id) in rows.iter_mut().zip(ids) {
            if let Some(id) = id {
                row.insert(id_field.to_string(), Value::String(id));
            }
        }

        let inserted = prepared.len() as u64;
        info!(backend = %self.backend(), table = %self.table(), inserted, "Rows inserted");
        Ok(inserted)
    }

    async fn update_by_id(&self, id: &str, partial: &Row) -> StoreResult<bool> {
        let native = self.native_id(id)?;
        if partial.is_empty() {
            return Ok(false);
        }

        let changes = self.codec.load_partial_row(partial)?;
        let Some(stmt) = self.builder.update(&native, &changes)? else {
            return Ok(false);
        };
        Ok(self.write(&stmt).await? > 0)
    }

    async fn delete_by_id(&self, id: &str) -> StoreResult<bool> {
        let native = self.native_id(id)?;
        Ok(self.write(&self.builder.delete_by_id(&native)).await? > 0)
    }

    async fn delete_all(&self) -> StoreResult<bool> {
        Ok(self.write(&self.builder.delete_all()).await? > 0)
    }

    async fn count_all(&self, filter: Option<&Filter>) -> StoreResult<u64> {
        let stmt = self.builder.count(filter)?;
        let mut session = self.manager.acquire().await?;
        debug!(backend = %self.backend(), sql = %stmt, "Count");
        let result = self.manager.connector().fetch_count(session.conn(), &stmt).await;
        self.settle(&mut session, &stmt, result).await
    }

    async fn is_connected(&self) -> bool {
        self.manager.is_connected().await
    }

    async fn open(&self) -> StoreResult<()> {
        self.manager.acquire().await?.begin().await
    }

    /// Settles the open transaction, then closes the connection on every
    /// path. The next call reconnects lazily.
    async fn release(&self, outcome: ScopeOutcome) -> StoreResult<()> {
        let settled = match self.manager.acquire().await {
            Ok(mut session) => match outcome {
                ScopeOutcome::Completed if self.auto_commit => session.commit().await,
                ScopeOutcome::Completed => {
                    debug!(backend = %self.backend(), "Discarding uncommitted unit of work");
                    session.rollback().await
                }
                ScopeOutcome::Failed => session.rollback().await,
            },
            Err(e) => Err(e),
        };
        let closed = self.manager.close().await;
        settled.and(closed)
    }

    async fn close(&self) -> StoreResult<()> {
        self.manager.close().await
    }
}
