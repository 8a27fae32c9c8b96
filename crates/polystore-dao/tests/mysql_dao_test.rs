//! Integration tests for MySqlDao.
//!
//! These tests run against a real MySQL server using testcontainers and
//! need Docker: `cargo test -- --ignored`.

mod common;

use common::{check_contract, eventually, row, MySqlServer};
use polystore_core::{Dao, SchemaCodec};
use polystore_dao::MySqlDao;
use serde_json::json;

const ITEMS_TABLE: &str = "CREATE TABLE items (\
    id BIGINT AUTO_INCREMENT PRIMARY KEY, name VARCHAR(255), qty BIGINT, meta JSON, active BOOLEAN)";

async fn items_dao(server: &MySqlServer) -> MySqlDao {
    let dao = MySqlDao::new(&server.config, "items", SchemaCodec::identity()).expect("Failed to create dao");
    eventually(|| dao.connect()).await;
    dao.ddl(ITEMS_TABLE).await.expect("Failed to create table");
    dao
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_contract() {
    let server = MySqlServer::start().await;
    let dao = items_dao(&server).await;

    check_contract(&dao).await;
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_column_types_round_trip() {
    let server = MySqlServer::start().await;
    let dao = items_dao(&server).await;

    let id = dao
        .persist(&mut row(json!({"name": "box", "qty": 3, "meta": {"w": [1, 2]}, "active": true})))
        .await
        .unwrap();
    let stored = dao.get_by_id(&id).await.unwrap().unwrap();
    assert_eq!(stored["id"], json!(id));
    assert_eq!(stored["qty"], json!(3));
    assert_eq!(stored["meta"], json!({"w": [1, 2]}));
    assert_eq!(stored["active"], json!(true));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_reconnects_after_close() {
    let server = MySqlServer::start().await;
    let dao = items_dao(&server).await;

    dao.close().await.unwrap();
    assert!(!dao.is_connected().await);
    assert_eq!(dao.count_all(None).await.unwrap(), 0);
    assert!(dao.is_connected().await);
}
