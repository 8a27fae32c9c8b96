//! Common test infrastructure for adapter integration tests.
//!
//! Server-backed suites start their backend with testcontainers and need
//! Docker; the SQLite suite runs against a temporary directory.

#![allow(dead_code)]

use polystore_config::{MongoConfig, RedisConfig, SqlServerConfig, SqliteConfig};
use polystore_core::{into_row, BackendKind, Dao, Filter, ListOptions, PageRequest, Row};
use serde_json::{json, Value};
use std::time::Duration;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::{mongo::Mongo, mysql::Mysql, postgres::Postgres, redis::Redis};

/// Builds a row from a JSON object literal.
pub fn row(value: Value) -> Row {
    into_row(value).expect("row literal must be an object")
}

/// A well-formed id that no test ever stores.
pub fn missing_id(backend: BackendKind) -> &'static str {
    match backend {
        BackendKind::Document => "000000000000000000000000",
        BackendKind::KeyValue => "absent",
        _ => "999999",
    }
}

/// Persists one row per name, supplying keys where the backend needs them.
pub async fn seed<D: Dao>(dao: &D, names: &[&str]) -> Vec<String> {
    let mut ids = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        let mut record = row(json!({"name": name, "qty": i}));
        if !dao.backend().generates_ids() {
            record.insert(dao.id_field().to_string(), json!(format!("k{i}")));
        }
        ids.push(dao.persist(&mut record).await.expect("Failed to seed row"));
    }
    ids
}

/// Runs the shared CRUD and pagination contract against an empty table.
pub async fn check_contract<D: Dao>(dao: &D) {
    let backend = dao.backend();
    let options = ListOptions::new();

    // empty table
    assert_eq!(dao.count_all(None).await.unwrap(), 0);
    let all = dao.get_all(None, &options).await.unwrap();
    assert!(all.data.is_empty());
    assert_eq!(
        (all.metadata.total_elements, all.metadata.page, all.metadata.per_page),
        (0, 1, 0)
    );
    assert!(dao.get_by_id(missing_id(backend)).await.unwrap().is_none());
    assert!(!dao.delete_by_id(missing_id(backend)).await.unwrap());

    // page 2 of 3 rows
    let ids = seed(dao, &["a", "b", "c"]).await;
    let page = dao
        .get_all(Some(PageRequest::new(2, 2).unwrap()), &options)
        .await
        .unwrap();
    assert_eq!(page.metadata.total_elements, 3);
    assert_eq!(page.metadata.page, 2);
    assert_eq!(page.metadata.per_page, 2);
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0]["name"], json!("c"));
    assert_eq!(page.data[0][dao.id_field()], json!(ids[2]));

    let empty_page = dao
        .get_all(Some(PageRequest::new(1, 0).unwrap()), &options)
        .await
        .unwrap();
    assert!(empty_page.data.is_empty());
    assert_eq!(empty_page.metadata.total_elements, 3);

    let unpaged = dao.get_all(None, &options).await.unwrap();
    assert_eq!(unpaged.metadata.per_page, 3);
    assert_eq!(unpaged.data.len(), 3);

    // lookups
    let found = dao.get_by_id(&ids[1]).await.unwrap().expect("row b");
    assert_eq!(found["name"], json!("b"));
    assert_eq!(found[dao.id_field()], json!(ids[1]));
    let by_name = dao.get_by_name("c").await.unwrap().expect("row c");
    assert_eq!(by_name[dao.id_field()], json!(ids[2]));
    assert!(dao.get_by_name("zzz").await.unwrap().is_none());
    let desc = dao.get_desc_by_id(&ids[0]).await.unwrap().expect("descriptor");
    assert_eq!((desc.id.as_str(), desc.name.as_str()), (ids[0].as_str(), "a"));

    // filters
    let filter = Filter::new().equals("name", "a");
    assert_eq!(dao.count_all(Some(&filter)).await.unwrap(), 1);
    let filtered = dao
        .get_all(None, &ListOptions::new().with_filter(filter))
        .await
        .unwrap();
    assert_eq!(filtered.metadata.total_elements, 1);
    assert_eq!(filtered.data[0]["name"], json!("a"));

    // updates
    assert!(dao.update_by_id(&ids[1], &row(json!({"name": "bb"}))).await.unwrap());
    assert!(!dao.update_by_id(&ids[1], &Row::new()).await.unwrap());
    assert!(!dao.update_by_id(missing_id(backend), &row(json!({"name": "q"}))).await.unwrap());
    let updated = dao.get_by_id(&ids[1]).await.unwrap().expect("row bb");
    assert_eq!(updated["name"], json!("bb"));
    assert_eq!(updated["qty"], json!(1));

    // round trip of a single persist
    let mut single = row(json!({"name": "x"}));
    if !backend.generates_ids() {
        single.insert(dao.id_field().to_string(), json!("x1"));
    }
    let id = dao.persist(&mut single).await.unwrap();
    assert_eq!(single[dao.id_field()], json!(id));
    let stored = dao.get_by_id(&id).await.unwrap().expect("row x");
    assert_eq!(stored["name"], json!("x"));
    assert_eq!(stored[dao.id_field()], json!(id));

    // batch insert
    let mut batch = vec![row(json!({"name": "m1"})), row(json!({"name": "m2"}))];
    if !backend.generates_ids() {
        for (i, record) in batch.iter_mut().enumerate() {
            record.insert(dao.id_field().to_string(), json!(format!("m{i}")));
        }
    }
    assert_eq!(dao.persist_many(&mut batch).await.unwrap(), 2);
    assert!(batch.iter().all(|r| r[dao.id_field()].is_string()));
    assert_eq!(dao.persist_many(&mut []).await.unwrap(), 0);
    assert_eq!(dao.count_all(None).await.unwrap(), 6);

    // deletes
    assert!(dao.delete_by_id(&ids[0]).await.unwrap());
    assert!(!dao.delete_by_id(&ids[0]).await.unwrap());
    assert!(dao.delete_all().await.unwrap());
    assert_eq!(dao.count_all(None).await.unwrap(), 0);
    assert!(!dao.delete_all().await.unwrap());

    assert!(dao.is_connected().await);
    dao.close().await.unwrap();
    assert!(!dao.is_connected().await);
}

/// SQLite settings for a database file inside `dir`.
pub fn sqlite_config(dir: &std::path::Path) -> SqliteConfig {
    SqliteConfig {
        file_name: "store.sqlite".to_string(),
        ..SqliteConfig::in_dir(dir.join("data"))
    }
}

/// A running MySQL container and the settings to reach it.
pub struct MySqlServer {
    _container: ContainerAsync<Mysql>,
    pub config: SqlServerConfig,
}

impl MySqlServer {
    pub async fn start() -> Self {
        let container = Mysql::default()
            .with_env_var("MYSQL_DATABASE", "polystore_test")
            .start()
            .await
            .expect("Failed to start MySQL container");
        let port = container
            .get_host_port_ipv4(3306)
            .await
            .expect("Failed to get MySQL port");

        Self {
            _container: container,
            config: SqlServerConfig {
                host: "127.0.0.1".to_string(),
                port: Some(port),
                user: "root".to_string(),
                password: String::new(),
                database: "polystore_test".to_string(),
                connect_timeout_secs: 30,
                ..SqlServerConfig::default()
            },
        }
    }
}

/// A running PostgreSQL container and the settings to reach it.
pub struct PostgresServer {
    _container: ContainerAsync<Postgres>,
    pub config: SqlServerConfig,
}

impl PostgresServer {
    pub async fn start() -> Self {
        let container = Postgres::default()
            .start()
            .await
            .expect("Failed to start PostgreSQL container");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("Failed to get PostgreSQL port");

        Self {
            _container: container,
            config: SqlServerConfig {
                host: "127.0.0.1".to_string(),
                port: Some(port),
                user: "postgres".to_string(),
                password: "postgres".to_string(),
                database: "postgres".to_string(),
                connect_timeout_secs: 30,
                ..SqlServerConfig::default()
            },
        }
    }
}

/// A running MongoDB container and the settings to reach it.
pub struct MongoServer {
    _container: ContainerAsync<Mongo>,
    pub config: MongoConfig,
}

impl MongoServer {
    pub async fn start() -> Self {
        let container = Mongo::default()
            .start()
            .await
            .expect("Failed to start MongoDB container");
        let port = container
            .get_host_port_ipv4(27017)
            .await
            .expect("Failed to get MongoDB port");

        Self {
            _container: container,
            config: MongoConfig {
                url: format!("mongodb://127.0.0.1:{port}"),
                database: "polystore_test".to_string(),
                connect_timeout_secs: 30,
                ..MongoConfig::default()
            },
        }
    }
}

/// A running Redis container and the settings to reach it.
pub struct RedisServer {
    _container: ContainerAsync<Redis>,
    pub config: RedisConfig,
}

impl RedisServer {
    pub async fn start() -> Self {
        let container = Redis::default()
            .start()
            .await
            .expect("Failed to start Redis container");
        let port = container
            .get_host_port_ipv4(6379)
            .await
            .expect("Failed to get Redis port");

        Self {
            _container: container,
            config: RedisConfig {
                host: "127.0.0.1".to_string(),
                port,
                namespace: "items".to_string(),
                connect_timeout_secs: 30,
                ..RedisConfig::default()
            },
        }
    }
}

/// Retries `attempt` until it succeeds; servers accept connections a little
/// after their container reports ready.
pub async fn eventually<F, Fut, T, E>(mut attempt: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match attempt().await {
            Ok(value) => return value,
            Err(e) => {
                if attempts >= 30 {
                    panic!("Backend not ready after {attempts} attempts: {e}");
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
