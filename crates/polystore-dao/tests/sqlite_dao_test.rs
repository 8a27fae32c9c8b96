//! Integration tests for SqliteDao against a database file.

mod common;

use common::{check_contract, row, sqlite_config};
use polystore_core::{
    scoped, Dao, FieldKind, FieldSchema, FieldSpec, Filter, ListOptions, PageRequest, SchemaCodec, SortKey,
    StoreError,
};
use polystore_dao::{ConnectionState, SqliteDao};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

const ITEMS_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS items (_id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, qty INTEGER, meta TEXT)";

async fn items_dao(dir: &TempDir, auto_commit: bool, codec: SchemaCodec) -> SqliteDao {
    let config = polystore_config::SqliteConfig {
        auto_commit,
        ..sqlite_config(dir.path())
    };
    let dao = SqliteDao::new(&config, "items", codec).expect("Failed to create dao");
    dao.ddl(ITEMS_TABLE).await.expect("Failed to create table");
    dao
}

fn named_schema() -> SchemaCodec {
    SchemaCodec::new(Arc::new(FieldSchema::new(vec![
        FieldSpec::new("_id", FieldKind::Any),
        FieldSpec::new("name", FieldKind::String).required(),
        FieldSpec::new("qty", FieldKind::Integer),
    ])))
}

#[tokio::test]
async fn test_contract() {
    let dir = TempDir::new().unwrap();
    let dao = items_dao(&dir, true, SchemaCodec::identity()).await;

    check_contract(&dao).await;
    assert!(dir.path().join("data").join("store.sqlite").exists());
}

#[tokio::test]
async fn test_ordering_and_native_filter() {
    let dir = TempDir::new().unwrap();
    let dao = items_dao(&dir, true, SchemaCodec::identity()).await;
    let mut rows = vec![
        row(json!({"name": "a", "qty": 5})),
        row(json!({"name": "b", "qty": 1})),
        row(json!({"name": "c", "qty": 3})),
    ];
    dao.persist_many(&mut rows).await.unwrap();

    let options = ListOptions::new()
        .with_filter(Filter::new().native("qty >= ?", vec![json!(3)]))
        .order_by(SortKey::desc("qty"));
    let page = dao.get_all(Some(PageRequest::new(1, 10).unwrap()), &options).await.unwrap();
    let names: Vec<_> = page.data.iter().map(|r| r["name"].clone()).collect();
    assert_eq!(names, vec![json!("a"), json!("c")]);
    assert_eq!(page.metadata.total_elements, 2);
}

#[tokio::test]
async fn test_supplied_id_is_kept() {
    let dir = TempDir::new().unwrap();
    let dao = items_dao(&dir, true, SchemaCodec::identity()).await;

    let mut record = row(json!({"_id": "42", "name": "answer"}));
    assert_eq!(dao.persist(&mut record).await.unwrap(), "42");
    let stored = dao.get_by_id("42").await.unwrap().unwrap();
    assert_eq!(stored["_id"], json!("42"));
    assert_eq!(stored["name"], json!("answer"));
}

#[tokio::test]
async fn test_schema_rejects_invalid_rows() {
    let dir = TempDir::new().unwrap();
    let dao = items_dao(&dir, true, named_schema()).await;

    let err = dao.persist(&mut row(json!({"qty": 1}))).await.unwrap_err();
    assert!(matches!(err, StoreError::Validation { .. }));

    let mut batch = vec![row(json!({"name": "ok"})), row(json!({"qty": "many"}))];
    let err = dao.persist_many(&mut batch).await.unwrap_err();
    assert!(matches!(err, StoreError::Validation { .. }));
    assert_eq!(dao.count_all(None).await.unwrap(), 0);

    let id = dao.persist(&mut row(json!({"name": "n", "qty": "7", "extra": true}))).await.unwrap();
    let stored = dao.get_by_id(&id).await.unwrap().unwrap();
    assert_eq!(stored["qty"], json!(7));

    // partial updates skip required checks but still type-check
    assert!(dao.update_by_id(&id, &row(json!({"qty": 8}))).await.unwrap());
    assert!(dao.update_by_id(&id, &row(json!({"qty": "x"}))).await.is_err());
}

#[tokio::test]
async fn test_scoped_commits_when_auto_commit() {
    let dir = TempDir::new().unwrap();
    let dao = items_dao(&dir, true, SchemaCodec::identity()).await;

    let id = scoped(&dao, |dao| {
        Box::pin(async move { dao.persist(&mut row(json!({"name": "kept"}))).await })
    })
    .await
    .unwrap();
    assert!(dao.get_by_id(&id).await.unwrap().is_some());
    assert_eq!(dao.connection().state(), ConnectionState::Connected);

    let failed: Result<(), _> = scoped(&dao, |dao| {
        Box::pin(async move {
            dao.persist(&mut row(json!({"name": "dropped"}))).await?;
            Err(StoreError::validation("abort"))
        })
    })
    .await;
    assert!(failed.is_err());
    assert!(dao.get_by_name("dropped").await.unwrap().is_none());
    assert_eq!(dao.count_all(None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_scoped_without_auto_commit_needs_explicit_commit() {
    let dir = TempDir::new().unwrap();
    let dao = items_dao(&dir, false, SchemaCodec::identity()).await;

    scoped(&dao, |dao| {
        Box::pin(async move { dao.persist(&mut row(json!({"name": "discarded"}))).await })
    })
    .await
    .unwrap();
    assert_eq!(dao.count_all(None).await.unwrap(), 0);

    scoped(&dao, |dao| {
        Box::pin(async move {
            let id = dao.persist(&mut row(json!({"name": "committed"}))).await?;
            dao.commit().await?;
            Ok(id)
        })
    })
    .await
    .unwrap();
    assert!(dao.get_by_name("committed").await.unwrap().is_some());
}

#[tokio::test]
async fn test_manual_transaction_without_auto_commit() {
    let dir = TempDir::new().unwrap();
    let dao = items_dao(&dir, false, SchemaCodec::identity()).await;

    dao.persist(&mut row(json!({"name": "first"}))).await.unwrap();
    dao.rollback().await.unwrap();
    assert_eq!(dao.count_all(None).await.unwrap(), 0);

    dao.persist(&mut row(json!({"name": "second"}))).await.unwrap();
    dao.commit().await.unwrap();
    dao.close().await.unwrap();

    let reopened = items_dao(&dir, true, SchemaCodec::identity()).await;
    assert_eq!(reopened.count_all(None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_backend_errors_surface() {
    let dir = TempDir::new().unwrap();
    let dao = items_dao(&dir, true, SchemaCodec::identity()).await;

    let err = dao.persist(&mut row(json!({"missing_column": 1}))).await.unwrap_err();
    assert!(matches!(err, StoreError::Backend { .. }));
    assert!(dao.is_connected().await);
}

#[tokio::test]
async fn test_scoped_closes_connection_on_exit() {
    let dir = TempDir::new().unwrap();
    let dao = items_dao(&dir, true, SchemaCodec::identity()).await;

    scoped(&dao, |dao| {
        Box::pin(async move { dao.persist(&mut row(json!({"name": "kept"}))).await })
    })
    .await
    .unwrap();
    assert_eq!(dao.connection().state(), ConnectionState::Disconnected);

    let failed: Result<(), _> = scoped(&dao, |dao| {
        Box::pin(async move {
            dao.count_all(None).await?;
            Err(StoreError::validation("abort"))
        })
    })
    .await;
    assert!(failed.is_err());
    assert_eq!(dao.connection().state(), ConnectionState::Disconnected);

    // the next call reconnects
    assert_eq!(dao.count_all(None).await.unwrap(), 1);
    assert_eq!(dao.connection().state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_backend_error_rolls_back_open_transaction() {
    let dir = TempDir::new().unwrap();
    let dao = items_dao(&dir, false, SchemaCodec::identity()).await;

    dao.persist(&mut row(json!({"name": "ok"}))).await.unwrap();
    assert!(dao.connection().in_transaction());

    let err = dao.persist(&mut row(json!({"missing_column": 1}))).await.unwrap_err();
    assert!(matches!(err, StoreError::Backend { .. }));
    assert!(!dao.connection().in_transaction());
    assert_eq!(dao.count_all(None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_pages_cover_every_row_once() {
    let dir = TempDir::new().unwrap();
    let dao = items_dao(&dir, true, SchemaCodec::identity()).await;
    let mut rows: Vec<_> = (0..7).map(|i| row(json!({"name": format!("n{i}"), "qty": i}))).collect();
    dao.persist_many(&mut rows).await.unwrap();

    let options = ListOptions::new();
    let first = dao.get_all(Some(PageRequest::new(1, 3).unwrap()), &options).await.unwrap();
    assert_eq!(first.total_pages(), 3);

    let mut paged = Vec::new();
    for page in 1..=first.total_pages() {
        let result = dao.get_all(Some(PageRequest::new(page, 3).unwrap()), &options).await.unwrap();
        paged.extend(result.data.iter().map(|r| r["_id"].clone()));
    }
    let mut unpaged: Vec<_> = dao
        .get_all(None, &options)
        .await
        .unwrap()
        .data
        .iter()
        .map(|r| r["_id"].to_string())
        .collect();
    let mut paged: Vec<_> = paged.iter().map(ToString::to_string).collect();
    paged.sort();
    paged.dedup();
    unpaged.sort();
    assert_eq!(paged.len(), 7);
    assert_eq!(paged, unpaged);
}
