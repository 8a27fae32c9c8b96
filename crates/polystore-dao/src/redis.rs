//! Key-value adapter.
//!
//! Each row is one string key holding JSON, addressed as `{namespace}:{id}`.
//! Redis has no server-side paging or filtering over values, so listing scans
//! the namespace, sorts by id and filters and slices in process.

use crate::connection::{ConnectionManager, Connector, Session};
use async_trait::async_trait;
use polystore_config::RedisConfig;
use polystore_core::{
    external_id_of, to_internal, BackendKind, Codec, Dao, Filter, ListOptions, PageRequest, PagedResult, Predicate,
    Row, SchemaCodec, ScopeOutcome, SortDirection, SortKey, StoreError, StoreResult,
};
use redis::aio::MultiplexedConnection;
use redis::{Cmd, FromRedisValue, Pipeline};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

const ID_FIELD: &str = "_id";
const MGET_CHUNK: usize = 500;

/// Opens multiplexed connections.
#[derive(Clone)]
pub struct RedisConnector {
    client: redis::Client,
    target: String,
    timeout: Duration,
}

impl RedisConnector {
    pub fn new(config: &RedisConfig) -> StoreResult<Self> {
        let url = connection_url(config)?;
        let client = redis::Client::open(url.as_str())
            .map_err(|e| StoreError::Configuration(format!("invalid redis settings: {e}")))?;
        Ok(Self {
            client,
            target: format!("{}://{}:{}/{}", url.scheme(), config.host, config.port, config.db),
            timeout: config.connect_timeout(),
        })
    }
}

/// Builds the connection url, with the password percent-encoded.
fn connection_url(config: &RedisConfig) -> StoreResult<Url> {
    let scheme = if config.tls { "rediss" } else { "redis" };
    let mut url = Url::parse(&format!("{scheme}://{}:{}/{}", config.host, config.port, config.db))
        .map_err(|e| StoreError::Configuration(format!("invalid redis host '{}': {e}", config.host)))?;
    if let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) {
        url.set_password(Some(password))
            .map_err(|()| StoreError::Configuration("cannot set redis password".to_string()))?;
    }
    Ok(url)
}

#[async_trait]
impl Connector for RedisConnector {
    type Connection = MultiplexedConnection;

    fn describe(&self) -> String {
        self.target.clone()
    }

    fn connect_timeout(&self) -> Duration {
        self.timeout
    }

    async fn connect(&self) -> StoreResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn ping(&self, conn: &mut MultiplexedConnection) -> bool {
        redis::cmd("PING").query_async::<String>(conn).await.is_ok()
    }

    async fn close(&self, conn: MultiplexedConnection) -> StoreResult<()> {
        drop(conn);
        Ok(())
    }
}

/// A key namespace behind one multiplexed connection.
pub struct RedisDao {
    manager: ConnectionManager<RedisConnector>,
    namespace: String,
    scan_count: usize,
    codec: SchemaCodec,
}

impl RedisDao {
    /// Creates an adapter for the namespace configured in `config`.
    pub fn new(config: &RedisConfig, codec: SchemaCodec) -> StoreResult<Self> {
        polystore_core::rules::valid_namespace(&config.namespace)
            .map_err(|e| StoreError::validation(format!("invalid namespace '{}': {}", config.namespace, e.code)))?;
        Ok(Self {
            manager: ConnectionManager::new(RedisConnector::new(config)?),
            namespace: config.namespace.clone(),
            scan_count: config.scan_count.max(1),
            codec,
        })
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Opens the connection now instead of on first use.
    pub async fn connect(&self) -> StoreResult<()> {
        self.manager.connect().await
    }

    /// Stores a row that expires after `ttl` (at least one second).
    pub async fn persist_with_expiry(&self, row: &mut Row, ttl: Duration) -> StoreResult<String> {
        let (id, payload) = self.prepare(row)?;
        let seconds = ttl.as_secs().max(1);
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key_for(&id)).arg(payload).arg("EX").arg(seconds);
        debug!(key = %self.key_for(&id), ttl_secs = seconds, "SET EX");
        self.run::<()>("SET", &cmd).await?;
        row.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        Ok(id)
    }

    /// Ids in the namespace matching a glob `pattern`, sorted.
    pub async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let keys = self.scan(&self.key_for(pattern)).await?;
        Ok(keys.iter().map(|k| self.id_from_key(k).to_string()).collect())
    }

    fn key_for(&self, id: &str) -> String {
        if self.namespace.is_empty() {
            id.to_string()
        } else {
            format!("{}:{}", self.namespace, id)
        }
    }

    fn id_from_key<'a>(&self, key: &'a str) -> &'a str {
        if self.namespace.is_empty() {
            return key;
        }
        key.strip_prefix(self.namespace.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(key)
    }

    /// Validates a row for storage and returns its key and JSON text.
    fn prepare(&self, row: &Row) -> StoreResult<(String, String)> {
        let id = key_of(row)?;
        Ok((id, encode(self.codec.load_row(row)?)?))
    }

    /// Like [`prepare`](Self::prepare) for a batch, loading the rows through
    /// the codec in one pass.
    fn prepare_batch(&self, rows: &[Row]) -> StoreResult<Vec<(String, String)>> {
        let ids = rows.iter().map(key_of).collect::<StoreResult<Vec<_>>>()?;
        let records = self.codec.load_many(rows.iter().cloned().map(Value::Object).collect())?;
        ids.into_iter()
            .zip(records)
            .map(|(id, record)| Ok((id, encode(record)?)))
            .collect()
    }

    fn settle<T>(&self, session: &Session<'_, RedisConnector>, command: &str, result: redis::RedisResult<T>) -> StoreResult<T> {
        let result = session.track(result.map_err(StoreError::from));
        if let Err(e) = &result {
            error!(namespace = %self.namespace, command, error = %e, "Command failed");
        }
        result
    }

    async fn run<T: FromRedisValue>(&self, name: &str, cmd: &Cmd) -> StoreResult<T> {
        let mut session = self.manager.acquire().await?;
        let result = cmd.query_async::<T>(session.conn()).await;
        self.settle(&session, name, result)
    }

    async fn run_pipeline(&self, pipe: &Pipeline) -> StoreResult<()> {
        let mut session = self.manager.acquire().await?;
        let result = pipe.query_async::<()>(session.conn()).await;
        self.settle(&session, "MULTI", result)
    }

    /// Keys matching `pattern`, sorted and without duplicates.
    async fn scan(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut session = self.manager.acquire().await?;
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let result = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(self.scan_count)
                .query_async::<(u64, Vec<String>)>(session.conn())
                .await;
            let (next, batch) = self.settle(&session, "SCAN", result)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        debug!(pattern, count = keys.len(), "SCAN");
        Ok(keys)
    }

    /// Reads every row of the namespace, in id order, keeping those that
    /// match `filter`. Keys holding other types than strings are skipped.
    async fn load_rows(&self, filter: Option<&Filter>) -> StoreResult<Vec<Row>> {
        check_filter(filter)?;
        let keys = self.scan(&self.key_for("*")).await?;

        let mut rows = Vec::with_capacity(keys.len());
        let mut session = self.manager.acquire().await?;
        for chunk in keys.chunks(MGET_CHUNK) {
            let result = redis::cmd("MGET")
                .arg(chunk)
                .query_async::<Vec<Option<String>>>(session.conn())
                .await;
            let values = self.settle(&session, "MGET", result)?;
            for (key, text) in chunk.iter().zip(values) {
                if let Some(text) = text {
                    let row = value_to_row(self.id_from_key(key), &text);
                    if filter.map_or(true, |f| matches(&row, f)) {
                        rows.push(row);
                    }
                }
            }
        }
        Ok(rows)
    }
}

impl fmt::Debug for RedisDao {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisDao")
            .field("namespace", &self.namespace)
            .field("connection", &self.manager)
            .finish_non_exhaustive()
    }
}

/// Turns stored text into a row. JSON objects get their `_id` from the key;
/// anything else is wrapped as `{_id, value}`.
fn value_to_row(id: &str, text: &str) -> Row {
    let mut row = match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            let mut row = Row::new();
            row.insert("value".to_string(), other);
            row
        }
        Err(_) => {
            let mut row = Row::new();
            row.insert("value".to_string(), Value::String(text.to_string()));
            row
        }
    };
    row.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    row
}

fn check_filter(filter: Option<&Filter>) -> StoreResult<()> {
    let native = filter
        .map(Filter::predicates)
        .unwrap_or_default()
        .iter()
        .any(|p| matches!(p, Predicate::Native { .. }));
    if native {
        return Err(StoreError::validation("key-value rows support equality filters only"));
    }
    Ok(())
}

fn matches(row: &Row, filter: &Filter) -> bool {
    filter.predicates().iter().all(|predicate| match predicate {
        Predicate::Eq { field, value } if field == ID_FIELD => {
            row.get(ID_FIELD).and_then(external_id_of) == external_id_of(value)
        }
        Predicate::Eq { field, value } => row.get(field).unwrap_or(&Value::Null) == value,
        Predicate::Native { .. } => false,
    })
}

/// Orders JSON values: missing and null first, then booleans, numbers,
/// strings and everything else by its text.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) if rank(a) == 4 && rank(b) == 4 => x.to_string().cmp(&y.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// The key a row is stored under. It is mandatory since the store never
/// generates one.
fn key_of(row: &Row) -> StoreResult<String> {
    let id = row
        .get(ID_FIELD)
        .and_then(external_id_of)
        .ok_or_else(|| StoreError::malformed_id("", "a key-value row must carry its key in '_id'"))?;
    to_internal(&id, BackendKind::KeyValue)?;
    Ok(id)
}

/// Stored JSON text of a loaded row; the key lives in the key name only.
fn encode(mut record: Row) -> StoreResult<String> {
    record.remove(ID_FIELD);
    Ok(serde_json::to_string(&record)?)
}

fn sort_rows(rows: &mut [Row], order_by: &[SortKey]) {
    if order_by.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        order_by
            .iter()
            .map(|key| {
                let ordering = compare_values(a.get(&key.field), b.get(&key.field));
                match key.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            })
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    });
}

#[async_trait]
impl Dao for RedisDao {
    fn backend(&self) -> BackendKind {
        BackendKind::KeyValue
    }

    fn id_field(&self) -> &str {
        ID_FIELD
    }

    fn codec(&self) -> &SchemaCodec {
        &self.codec
    }

    async fn get_all(&self, page: Option<PageRequest>, options: &ListOptions) -> StoreResult<PagedResult<Row>> {
        let mut rows = self.load_rows(options.active_filter()).await?;
        sort_rows(&mut rows, &options.order_by);
        Ok(PagedResult::from_all(rows, page))
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Option<Row>> {
        to_internal(id, BackendKind::KeyValue)?;
        let key = self.key_for(id);
        debug!(key = %key, "GET");
        let mut cmd = redis::cmd("GET");
        cmd.arg(&key);
        let text = self.run::<Option<String>>("GET", &cmd).await?;
        Ok(text.map(|t| value_to_row(id, &t)))
    }

    /// Scans the namespace; the first match in id order wins.
    async fn get_by_name(&self, name: &str) -> StoreResult<Option<Row>> {
        let filter = Filter::new().equals("name", name);
        Ok(self.load_rows(Some(&filter)).await?.into_iter().next())
    }

    async fn persist(&self, row: &mut Row) -> StoreResult<String> {
        let (id, payload) = self.prepare(row)?;
        let key = self.key_for(&id);
        debug!(key = %key, "SET");
        let mut cmd = redis::cmd("SET");
        cmd.arg(&key).arg(payload);
        self.run::<()>("SET", &cmd).await?;
        row.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        Ok(id)
    }

    /// Writes every row in one `MULTI`/`EXEC` block after validating all of
    /// them.
    async fn persist_many(&self, rows: &mut [Row]) -> StoreResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let prepared = self.prepare_batch(rows)?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (id, payload) in &prepared {
            pipe.set(self.key_for(id), payload).ignore();
        }
        debug!(namespace = %self.namespace, count = prepared.len(), "MULTI SET");
        self.run_pipeline(&pipe).await?;

        for (row, (id, _)) in rows.iter_mut().zip(&prepared) {
            row.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        }
        let inserted = prepared.len() as u64;
        info!(namespace = %self.namespace, inserted, "Keys written");
        Ok(inserted)
    }

    /// Merges the listed fields into the stored object, keeping the key's
    /// TTL. The read and the write are separate commands.
    async fn update_by_id(&self, id: &str, partial: &Row) -> StoreResult<bool> {
        to_internal(id, BackendKind::KeyValue)?;
        if partial.is_empty() {
            return Ok(false);
        }
        let mut changes = self.codec.load_partial_row(partial)?;
        changes.remove(ID_FIELD);
        if changes.is_empty() {
            return Ok(false);
        }

        let Some(current) = self.get_by_id(id).await? else {
            return Ok(false);
        };
        let mut merged = current.clone();
        merged.extend(changes);
        if merged == current {
            return Ok(false);
        }
        merged.remove(ID_FIELD);

        let key = self.key_for(id);
        debug!(key = %key, "SET KEEPTTL");
        let mut cmd = redis::cmd("SET");
        cmd.arg(&key).arg(serde_json::to_string(&merged)?).arg("KEEPTTL").arg("XX");
        let written = self.run::<Option<String>>("SET", &cmd).await?;
        Ok(written.is_some())
    }

    async fn delete_by_id(&self, id: &str) -> StoreResult<bool> {
        to_internal(id, BackendKind::KeyValue)?;
        let key = self.key_for(id);
        debug!(key = %key, "DEL");
        let mut cmd = redis::cmd("DEL");
        cmd.arg(&key);
        Ok(self.run::<u64>("DEL", &cmd).await? > 0)
    }

    /// Deletes every key of the namespace, or of the whole database when
    /// the namespace is empty.
    async fn delete_all(&self) -> StoreResult<bool> {
        let keys = self.scan(&self.key_for("*")).await?;
        let mut deleted = 0;
        for chunk in keys.chunks(MGET_CHUNK) {
            let mut cmd = redis::cmd("DEL");
            cmd.arg(chunk);
            deleted += self.run::<u64>("DEL", &cmd).await?;
        }
        info!(namespace = %self.namespace, deleted, "Keys deleted");
        Ok(deleted > 0)
    }

    async fn count_all(&self, filter: Option<&Filter>) -> StoreResult<u64> {
        Ok(self.load_rows(filter).await?.len() as u64)
    }

    async fn is_connected(&self) -> bool {
        self.manager.is_connected().await
    }

    async fn open(&self) -> StoreResult<()> {
        self.manager.connect().await
    }

    async fn release(&self, outcome: ScopeOutcome) -> StoreResult<()> {
        if outcome == ScopeOutcome::Failed {
            warn!(namespace = %self.namespace, "Unit of work failed; completed writes are kept");
        }
        self.manager.close().await
    }

    async fn close(&self) -> StoreResult<()> {
        self.manager.close().await
    }
}
