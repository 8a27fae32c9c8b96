//! Document-store adapter.
//!
//! Listing runs one aggregation: an optional `$match` and `$sort`, then a
//! `$facet` producing the page under `data` and the matching total under
//! `pagination`. The client is pooled, so unlike the SQL adapters calls on
//! one instance run concurrently.

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use parking_lot::RwLock;
use polystore_config::MongoConfig;
use polystore_core::{
    external_id_of, paginate, to_internal, BackendKind, Codec, Dao, Descriptor, Filter, ListOptions, NativeId,
    PageRequest, PagedResult, Predicate, Row, SchemaCodec, ScopeOutcome, SortDirection, SortKey, StoreError,
    StoreResult,
};
use serde_json::Value;
use std::fmt;
use tracing::{debug, error, info, warn};
use url::Url;

const ID_FIELD: &str = "_id";

/// A collection behind a pooled client.
pub struct MongoDao {
    config: MongoConfig,
    collection: String,
    codec: SchemaCodec,
    client: RwLock<Option<Client>>,
}

impl MongoDao {
    /// Creates an adapter for `collection`. The client is built on first use.
    pub fn new(config: &MongoConfig, collection: impl Into<String>, codec: SchemaCodec) -> StoreResult<Self> {
        let collection = collection.into();
        check_collection_name(&collection)?;
        Ok(Self {
            config: config.clone(),
            collection,
            codec,
            client: RwLock::new(None),
        })
    }

    #[must_use]
    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    /// Builds the client and pings the server.
    pub async fn connect(&self) -> StoreResult<()> {
        let client = self.client().await?;
        let ping = client.database("admin").run_command(doc! { "ping": 1 }).await;
        self.settle("ping", ping).map(drop)
    }

    /// Sets the listed fields on the first document matching `filter`.
    /// Returns whether a document was modified.
    pub async fn update_by_query(&self, filter: &Filter, partial: &Row) -> StoreResult<bool> {
        let query = match_document(Some(filter))?;
        self.update_one(query, partial).await
    }

    fn target(&self) -> String {
        redact_url(&self.config.url)
    }

    async fn client(&self) -> StoreResult<Client> {
        if let Some(client) = self.client.read().as_ref() {
            return Ok(client.clone());
        }

        info!(target_db = %self.target(), database = %self.config.database, "Connecting...");
        let mut options = ClientOptions::parse(self.config.url.as_str())
            .await
            .map_err(|e| StoreError::connection(format!("invalid mongo url: {e}")))?;
        options.app_name = Some("polystore".to_string());
        options.max_pool_size = Some(self.config.max_pool_size);
        options.min_pool_size = Some(self.config.min_pool_size);
        options.max_idle_time = Some(self.config.max_idle_time());
        options.connect_timeout = Some(self.config.connect_timeout());
        options.server_selection_timeout = Some(self.config.connect_timeout());

        let client = Client::with_options(options).map_err(|e| {
            error!(target_db = %self.target(), error = %e, "Failed to create client");
            StoreError::connection(e.to_string())
        })?;

        let mut slot = self.client.write();
        Ok(slot.get_or_insert(client).clone())
    }

    async fn handle(&self) -> StoreResult<Collection<Document>> {
        let client = self.client().await?;
        Ok(client.database(&self.config.database).collection(&self.collection))
    }

    fn settle<T>(&self, operation: &str, result: Result<T, mongodb::error::Error>) -> StoreResult<T> {
        result.map_err(|e| {
            let err = StoreError::from(e);
            if err.is_connection_error() {
                warn!(target_db = %self.target(), operation, error = %err, "Connection problem");
            } else {
                error!(collection = %self.collection, operation, error = %err, "Operation failed");
            }
            err
        })
    }

    fn object_id(id: &str) -> StoreResult<ObjectId> {
        match to_internal(id, BackendKind::Document)? {
            NativeId::ObjectId(oid) => Ok(oid),
            other => Err(StoreError::malformed_id(id, format!("expected an object id, got {other:?}"))),
        }
    }

    /// Converts a loaded row into a document carrying `id`, taken from the
    /// caller's row or freshly generated.
    fn prepare_insert(&self, original: &Row, mut record: Row) -> StoreResult<(ObjectId, Document)> {
        let oid = match original.get(ID_FIELD).and_then(external_id_of) {
            Some(id) => Self::object_id(&id)?,
            None => ObjectId::new(),
        };
        record.remove(ID_FIELD);
        let mut document = row_to_document(record)?;
        document.insert(ID_FIELD, oid);
        Ok((oid, document))
    }

    async fn update_one(&self, query: Document, partial: &Row) -> StoreResult<bool> {
        if partial.is_empty() {
            return Ok(false);
        }
        let mut changes = self.codec.load_partial_row(partial)?;
        changes.remove(ID_FIELD);
        if changes.is_empty() {
            return Ok(false);
        }

        let update = doc! { "$set": row_to_document(changes)? };
        debug!(collection = %self.collection, filter = %query, update = %update, "update_one");
        let collection = self.handle().await?;
        let result = self.settle("update_one", collection.update_one(query, update).await)?;
        Ok(result.modified_count > 0)
    }

    async fn find_one(&self, filter: Document, projection: Option<Document>) -> StoreResult<Option<Row>> {
        debug!(collection = %self.collection, filter = %filter, "find_one");
        let collection = self.handle().await?;
        let action = collection.find_one(filter);
        let found = match projection {
            Some(projection) => action.projection(projection).await,
            None => action.await,
        };
        Ok(self.settle("find_one", found)?.map(document_to_row))
    }
}

impl fmt::Debug for MongoDao {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoDao")
            .field("target", &self.target())
            .field("database", &self.config.database)
            .field("collection", &self.collection)
            .field("connected", &self.client.read().is_some())
            .finish_non_exhaustive()
    }
}

/// Rejects names the server would refuse.
fn check_collection_name(name: &str) -> StoreResult<()> {
    if name.trim().is_empty() {
        return Err(StoreError::validation("collection name must not be empty"));
    }
    if name.contains('$') || name.contains('\0') || name.starts_with("system.") {
        return Err(StoreError::validation(format!("invalid collection name '{name}'")));
    }
    Ok(())
}

/// Drops credentials from a connection string for logging.
fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            // Both setters only fail for cannot-be-a-base urls, which carry no credentials.
            let _ = url.set_password(None);
            let _ = url.set_username("");
            url.to_string()
        }
        Err(_) => "mongodb://<unparsable>".to_string(),
    }
}

/// Converts a row into a document. String `_id` values must be object ids;
/// other values go through relaxed extended JSON, so `{"$date": ...}` and
/// similar forms become native types.
pub fn row_to_document(row: Row) -> StoreResult<Document> {
    let mut document = Document::new();
    for (field, value) in row {
        let bson = if field == ID_FIELD {
            match &value {
                Value::String(id) => Bson::ObjectId(MongoDao::object_id(id)?),
                _ => json_to_bson(value)?,
            }
        } else {
            json_to_bson(value)?
        };
        document.insert(field, bson);
    }
    Ok(document)
}

/// Converts a document into a row with a string `_id`.
#[must_use]
pub fn document_to_row(document: Document) -> Row {
    let mut row = Row::new();
    for (field, bson) in document {
        let value = match bson {
            Bson::ObjectId(oid) if field == ID_FIELD => Value::String(oid.to_hex()),
            other => other.into_relaxed_extjson(),
        };
        row.insert(field, value);
    }
    if let Some(id) = row.get(ID_FIELD).and_then(external_id_of) {
        row.insert(ID_FIELD.to_string(), Value::String(id));
    }
    row
}

fn json_to_bson(value: Value) -> StoreResult<Bson> {
    Bson::try_from(value).map_err(|e| StoreError::Serialization(format!("cannot convert to bson: {e}")))
}

/// Translates a filter into a `$match` document.
pub fn match_document(filter: Option<&Filter>) -> StoreResult<Document> {
    let mut document = Document::new();
    let Some(filter) = filter else {
        return Ok(document);
    };

    for predicate in filter.predicates() {
        match predicate {
            Predicate::Eq { field, value } => {
                let bson = match value {
                    Value::String(id) if field == ID_FIELD => Bson::ObjectId(MongoDao::object_id(id)?),
                    other => json_to_bson(other.clone())?,
                };
                document.insert(field.clone(), bson);
            }
            Predicate::Native { expr, params } => {
                if !params.is_empty() {
                    return Err(StoreError::validation(
                        "document filters take no positional parameters",
                    ));
                }
                let parsed: Value = serde_json::from_str(expr)
                    .map_err(|e| StoreError::validation(format!("native filter is not JSON: {e}")))?;
                let Value::Object(map) = parsed else {
                    return Err(StoreError::validation("native filter must be a JSON object"));
                };
                let native = Document::try_from(map)
                    .map_err(|e| StoreError::validation(format!("native filter is not valid extended JSON: {e}")))?;
                document.extend(native);
            }
        }
    }
    Ok(document)
}

fn sort_document(order_by: &[SortKey], paged: bool) -> Option<Document> {
    if order_by.is_empty() {
        return paged.then(|| doc! { ID_FIELD: 1 });
    }
    let mut sort = Document::new();
    for key in order_by {
        let direction = match key.direction {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        };
        sort.insert(key.field.clone(), direction);
    }
    Some(sort)
}

/// Builds the listing aggregation.
///
/// A zero `per_page` leaves out the `data` facet since the server rejects
/// `$limit: 0`.
pub fn list_pipeline(page: Option<PageRequest>, options: &ListOptions) -> StoreResult<Vec<Document>> {
    let mut pipeline = Vec::with_capacity(3);

    let matcher = match_document(options.active_filter())?;
    if !matcher.is_empty() {
        pipeline.push(doc! { "$match": matcher });
    }
    if let Some(sort) = sort_document(&options.order_by, page.is_some()) {
        pipeline.push(doc! { "$sort": sort });
    }

    let count = vec![doc! { "$count": "total" }];
    let facet = match page {
        None => doc! { "data": [{ "$match": {} }], "pagination": count },
        Some(request) if request.limit() == 0 => doc! { "pagination": count },
        Some(request) => doc! {
            "data": [
                { "$skip": i64::try_from(request.offset()).unwrap_or(i64::MAX) },
                { "$limit": i64::try_from(request.limit()).unwrap_or(i64::MAX) },
            ],
            "pagination": count,
        },
    };
    pipeline.push(doc! { "$facet": facet });
    Ok(pipeline)
}

/// Reads the single `$facet` output document.
fn read_facet(facet: Option<Document>) -> (Vec<Row>, u64) {
    let Some(facet) = facet else {
        return (Vec::new(), 0);
    };

    let total = facet
        .get_array("pagination")
        .ok()
        .and_then(|counts| counts.first())
        .and_then(Bson::as_document)
        .and_then(|count| match count.get("total") {
            Some(Bson::Int32(n)) => u64::try_from(*n).ok(),
            Some(Bson::Int64(n)) => u64::try_from(*n).ok(),
            _ => None,
        })
        .unwrap_or(0);

    let data = facet
        .get_array("data")
        .map(|docs| {
            docs.iter()
                .filter_map(Bson::as_document)
                .map(|d| document_to_row(d.clone()))
                .collect()
        })
        .unwrap_or_default();

    (data, total)
}

#[async_trait]
impl Dao for MongoDao {
    fn backend(&self) -> BackendKind {
        BackendKind::Document
    }

    fn id_field(&self) -> &str {
        ID_FIELD
    }

    fn codec(&self) -> &SchemaCodec {
        &self.codec
    }

    async fn get_all(&self, page: Option<PageRequest>, options: &ListOptions) -> StoreResult<PagedResult<Row>> {
        let pipeline = list_pipeline(page, options)?;
        debug!(collection = %self.collection, pipeline = ?pipeline, "aggregate");

        let collection = self.handle().await?;
        let mut cursor = self.settle("aggregate", collection.aggregate(pipeline).await)?;
        let facet = self.settle("aggregate", cursor.try_next().await)?;

        let (data, total) = read_facet(facet);
        let (_, metadata) = paginate(total, page);
        Ok(PagedResult::new(metadata, data))
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Option<Row>> {
        let oid = Self::object_id(id)?;
        self.find_one(doc! { ID_FIELD: oid }, None).await
    }

    async fn get_by_name(&self, name: &str) -> StoreResult<Option<Row>> {
        self.find_one(doc! { "name": name }, None).await
    }

    async fn get_desc_by_id(&self, id: &str) -> StoreResult<Option<Descriptor>> {
        let oid = Self::object_id(id)?;
        let row = self
            .find_one(doc! { ID_FIELD: oid }, Some(doc! { ID_FIELD: 1, "name": 1 }))
            .await?;
        Ok(row.and_then(|r| Descriptor::from_row(&r, ID_FIELD)))
    }

    async fn persist(&self, row: &mut Row) -> StoreResult<String> {
        let record = self.codec.load_row(row)?;
        let (oid, document) = self.prepare_insert(row, record)?;

        debug!(collection = %self.collection, document = %document, "insert_one");
        let collection = self.handle().await?;
        self.settle("insert_one", collection.insert_one(document).await)?;

        let id = oid.to_hex();
        row.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        Ok(id)
    }

    async fn persist_many(&self, rows: &mut [Row]) -> StoreResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let records = self.codec.load_many(rows.iter().cloned().map(Value::Object).collect())?;
        let (ids, documents): (Vec<ObjectId>, Vec<Document>) = rows
            .iter()
            .zip(records)
            .map(|(row, record)| self.prepare_insert(row, record))
            .collect::<StoreResult<Vec<_>>>()?
            .into_iter()
            .unzip();

        debug!(collection = %self.collection, count = documents.len(), "insert_many");
        let collection = self.handle().await?;
        let result = self.settle("insert_many", collection.insert_many(documents).await)?;

        for (row, oid) in rows.iter_mut().zip(ids) {
            row.insert(ID_FIELD.to_string(), Value::String(oid.to_hex()));
        }
        let inserted = result.inserted_ids.len() as u64;
        info!(collection = %self.collection, inserted, "Documents inserted");
        Ok(inserted)
    }

    async fn update_by_id(&self, id: &str, partial: &Row) -> StoreResult<bool> {
        let oid = Self::object_id(id)?;
        self.update_one(doc! { ID_FIELD: oid }, partial).await
    }

    async fn delete_by_id(&self, id: &str) -> StoreResult<bool> {
        let oid = Self::object_id(id)?;
        debug!(collection = %self.collection, id = %oid, "delete_one");
        let collection = self.handle().await?;
        let result = self.settle("delete_one", collection.delete_one(doc! { ID_FIELD: oid }).await)?;
        Ok(result.deleted_count > 0)
    }

    async fn delete_all(&self) -> StoreResult<bool> {
        debug!(collection = %self.collection, "delete_many");
        let collection = self.handle().await?;
        let result = self.settle("delete_many", collection.delete_many(doc! {}).await)?;
        Ok(result.deleted_count > 0)
    }

    async fn count_all(&self, filter: Option<&Filter>) -> StoreResult<u64> {
        let query = match_document(filter)?;
        debug!(collection = %self.collection, filter = %query, "count_documents");
        let collection = self.handle().await?;
        self.settle("count_documents", collection.count_documents(query).await)
    }

    async fn is_connected(&self) -> bool {
        let Some(client) = self.client.read().clone() else {
            return false;
        };
        client.database("admin").run_command(doc! { "ping": 1 }).await.is_ok()
    }

    /// Documents are written one by one, so a unit of work only makes sure
    /// the client exists.
    async fn open(&self) -> StoreResult<()> {
        self.client().await.map(drop)
    }

    async fn release(&self, outcome: ScopeOutcome) -> StoreResult<()> {
        if outcome == ScopeOutcome::Failed {
            warn!(collection = %self.collection, "Unit of work failed; completed writes are kept");
        }
        self.close().await
    }

    async fn close(&self) -> StoreResult<()> {
        let client = self.client.write().take();
        if let Some(client) = client {
            info!(target_db = %self.target(), "Closing client");
            client.shutdown().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polystore_core::{into_row, FieldKind, FieldSchema, FieldSpec};
    use serde_json::json;
    use std::sync::Arc;

    const HEX: &str = "507f1f77bcf86cd799439011";

    fn dao() -> MongoDao {
        MongoDao::new(&MongoConfig::default(), "products", SchemaCodec::identity()).unwrap()
    }

    #[test]
    fn test_collection_name_checks() {
        assert!(MongoDao::new(&MongoConfig::default(), "", SchemaCodec::identity()).is_err());
        assert!(MongoDao::new(&MongoConfig::default(), "a$b", SchemaCodec::identity()).is_err());
        assert!(MongoDao::new(&MongoConfig::default(), "system.users", SchemaCodec::identity()).is_err());
        assert_eq!(dao().collection_name(), "products");
    }

    #[test]
    fn test_pipeline_paged() {
        let pipeline = list_pipeline(Some(PageRequest::new(2, 10).unwrap()), &ListOptions::new()).unwrap();
        assert_eq!(
            pipeline,
            vec![
                doc! { "$sort": { "_id": 1 } },
                doc! { "$facet": {
                    "data": [{ "$skip": 10_i64 }, { "$limit": 10_i64 }],
                    "pagination": [{ "$count": "total" }],
                } },
            ]
        );
    }

    #[test]
    fn test_pipeline_unpaged_with_filter_and_order() {
        let options = ListOptions::new()
            .with_filter(Filter::new().equals("status", "active").native(r#"{"qty": {"$gt": 5}}"#, vec![]))
            .order_by(SortKey::desc("qty"));
        let pipeline = list_pipeline(None, &options).unwrap();
        assert_eq!(
            pipeline,
            vec![
                doc! { "$match": { "status": "active", "qty": { "$gt": 5 } } },
                doc! { "$sort": { "qty": -1 } },
                doc! { "$facet": { "data": [{ "$match": {} }], "pagination": [{ "$count": "total" }] } },
            ]
        );
    }

    #[test]
    fn test_pipeline_zero_per_page_has_no_data_facet() {
        let pipeline = list_pipeline(Some(PageRequest::new(1, 0).unwrap()), &ListOptions::new()).unwrap();
        let facet = pipeline.last().unwrap().get_document("$facet").unwrap();
        assert!(!facet.contains_key("data"));
        assert!(facet.contains_key("pagination"));
    }

    #[test]
    fn test_match_document_rejects_bad_native() {
        let positional = Filter::new().native(r#"{"a": 1}"#, vec![json!(1)]);
        assert!(match_document(Some(&positional)).is_err());
        let not_object = Filter::new().native("[1]", vec![]);
        assert!(match_document(Some(&not_object)).is_err());
        let bad_id = Filter::new().equals("_id", "nope");
        assert!(matches!(
            match_document(Some(&bad_id)),
            Err(StoreError::MalformedIdentifier { .. })
        ));
    }

    #[test]
    fn test_row_document_conversion() {
        let row = into_row(json!({"_id": HEX, "name": "pen", "tags": ["a"], "qty": 3})).unwrap();
        let document = row_to_document(row).unwrap();
        assert_eq!(document.get_object_id("_id").unwrap().to_hex(), HEX);
        assert_eq!(document.get_str("name").unwrap(), "pen");

        let back = document_to_row(document);
        assert_eq!(Value::Object(back), json!({"_id": HEX, "name": "pen", "tags": ["a"], "qty": 3}));
    }

    #[test]
    fn test_malformed_id_in_row() {
        let row = into_row(json!({"_id": "zzz"})).unwrap();
        assert!(matches!(row_to_document(row), Err(StoreError::MalformedIdentifier { .. })));
    }

    #[test]
    fn test_read_facet() {
        let facet = doc! {
            "data": [{ "_id": ObjectId::parse_str(HEX).unwrap(), "name": "a" }],
            "pagination": [{ "total": 7 }],
        };
        let (data, total) = read_facet(Some(facet));
        assert_eq!(total, 7);
        assert_eq!(data[0]["_id"], json!(HEX));

        let (data, total) = read_facet(Some(doc! { "data": [], "pagination": [] }));
        assert!(data.is_empty());
        assert_eq!(total, 0);
        assert_eq!(read_facet(None).1, 0);
    }

    #[test]
    fn test_prepare_insert_keeps_or_generates_id() {
        let dao = dao();
        let supplied = into_row(json!({"_id": HEX, "name": "a"})).unwrap();
        let (oid, document) = dao.prepare_insert(&supplied, supplied.clone()).unwrap();
        assert_eq!(oid.to_hex(), HEX);
        assert_eq!(document.get_object_id("_id").unwrap(), oid);

        let fresh = into_row(json!({"name": "b"})).unwrap();
        let (oid, document) = dao.prepare_insert(&fresh, fresh.clone()).unwrap();
        assert_eq!(document.get_object_id("_id").unwrap(), oid);

        let bad = into_row(json!({"_id": "x"})).unwrap();
        assert!(dao.prepare_insert(&bad, bad.clone()).is_err());
    }

    #[tokio::test]
    async fn test_malformed_ids_fail_before_connecting() {
        let dao = dao();
        assert!(matches!(dao.get_by_id("nope").await, Err(StoreError::MalformedIdentifier { .. })));
        assert!(matches!(dao.delete_by_id("").await, Err(StoreError::MalformedIdentifier { .. })));
        assert!(!dao.is_connected().await);
    }

    #[tokio::test]
    async fn test_schema_rejects_before_connecting() {
        let schema = FieldSchema::new(vec![FieldSpec::new("name", FieldKind::String).required()]);
        let dao = MongoDao::new(&MongoConfig::default(), "products", SchemaCodec::new(Arc::new(schema))).unwrap();
        let mut row = into_row(json!({"qty": 1})).unwrap();
        assert!(matches!(dao.persist(&mut row).await, Err(StoreError::Validation { .. })));
        assert!(!row.contains_key("_id"));
    }

    #[test]
    fn test_redact_url() {
        assert_eq!(redact_url("mongodb://user:pw@db:27017/app"), "mongodb://db:27017/app");
    }
}
