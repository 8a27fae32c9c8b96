//! The data-access contract shared by every backend adapter.

use crate::{
    BackendKind, BoxFuture, Descriptor, Filter, ListOptions, PageRequest, PagedResult, Row, SchemaCodec,
    StoreResult,
};
use async_trait::async_trait;
use shaku::Interface;

/// How a unit of work ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeOutcome {
    /// The work returned `Ok`.
    Completed,
    /// The work returned an error.
    Failed,
}

/// Uniform CRUD + pagination operations over one table, collection or
/// key namespace.
///
/// Ids cross this boundary as strings. Adapters convert them to the
/// backend-native form before any call and report a malformed id without
/// touching the backend.
#[async_trait]
pub trait Dao: Interface + Send + Sync {
    /// The backend this adapter talks to.
    fn backend(&self) -> BackendKind;

    /// The row field holding the identifier.
    fn id_field(&self) -> &str;

    /// The schema applied to inbound payloads and available for output.
    fn codec(&self) -> &SchemaCodec;

    /// Lists rows, optionally filtered, ordered and paginated.
    async fn get_all(&self, page: Option<PageRequest>, options: &ListOptions) -> StoreResult<PagedResult<Row>>;

    /// Fetches one row by id.
    async fn get_by_id(&self, id: &str) -> StoreResult<Option<Row>>;

    /// Fetches the first row whose `name` field equals `name`.
    async fn get_by_name(&self, name: &str) -> StoreResult<Option<Row>>;

    /// Fetches the `{id, name}` descriptor of a row.
    async fn get_desc_by_id(&self, id: &str) -> StoreResult<Option<Descriptor>> {
        let row = self.get_by_id(id).await?;
        Ok(row.and_then(|r| Descriptor::from_row(&r, self.id_field())))
    }

    /// Inserts a row and returns its external id.
    ///
    /// The id is also written into `row`.
    async fn persist(&self, row: &mut Row) -> StoreResult<String>;

    /// Inserts rows, writing each id back. Returns the number inserted.
    async fn persist_many(&self, rows: &mut [Row]) -> StoreResult<u64>;

    /// Replaces the listed top-level fields of a row.
    ///
    /// Returns `false` when nothing changed, including when the id does not
    /// exist or `partial` is empty.
    async fn update_by_id(&self, id: &str, partial: &Row) -> StoreResult<bool>;

    /// Deletes one row.
    async fn delete_by_id(&self, id: &str) -> StoreResult<bool>;

    /// Deletes every row. Returns whether anything was removed.
    async fn delete_all(&self) -> StoreResult<bool>;

    /// Counts rows matching `filter`, or all rows.
    async fn count_all(&self, filter: Option<&Filter>) -> StoreResult<u64>;

    /// Pings the backend.
    async fn is_connected(&self) -> bool;

    /// Starts a unit of work.
    async fn open(&self) -> StoreResult<()>;

    /// Ends a unit of work started with [`open`](Self::open).
    async fn release(&self, outcome: ScopeOutcome) -> StoreResult<()>;

    /// Closes the underlying connection. A later call reconnects lazily.
    async fn close(&self) -> StoreResult<()>;
}

/// Runs `work` inside a unit of work on `dao`.
///
/// The dao is opened before and released after the work on every path.
/// When the work fails its error wins over a release error, which is
/// only logged.
///
/// ```ignore
/// let id = scoped(&dao, |dao| Box::pin(async move {
///     let mut row = row_of(json!({"name": "a"}));
///     dao.persist(&mut row).await
/// })).await?;
/// ```
pub async fn scoped<D, T, F>(dao: &D, work: F) -> StoreResult<T>
where
    D: Dao + ?Sized,
    F: for<'a> FnOnce(&'a D) -> BoxFuture<'a, T>,
{
    dao.open().await?;
    let result = work(dao).await;

    let outcome = if result.is_ok() {
        ScopeOutcome::Completed
    } else {
        ScopeOutcome::Failed
    };

    match (dao.release(outcome).await, result) {
        (Ok(()), result) => result,
        (Err(release_err), Ok(_)) => Err(release_err),
        (Err(release_err), Err(err)) => {
            tracing::error!(
                backend = %dao.backend(),
                error = %release_err,
                "Failed to release unit of work after error"
            );
            Err(err)
        }
    }
}
