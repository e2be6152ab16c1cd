//! End-to-end coverage for the tenant catalog's metastore choreography.
//!
//! These exercise the real transactional ordering against a live Postgres
//! instance, so they're `#[ignore]`d by default - run with
//! `cargo test -p iceberg_catalog -- --ignored` against a database
//! reachable via the `ICEBERG_CATALOG_TEST_DB_*` environment variables
//! (each falls back to a local default).

use std::{
    collections::HashSet,
    sync::{
        Arc,
        Mutex,
    },
};

use async_trait::async_trait;
use db::{
    Db,
    DbSettings,
};

use crate::{
    CatalogClient,
    IcebergCatalog,
    IcebergCatalogConfig,
};

#[derive(Debug, Default)]
struct FakeCatalogClient {
    namespaces: Mutex<HashSet<String>>,
    tables: Mutex<HashSet<(String, String)>>,
}

#[async_trait]
impl CatalogClient for FakeCatalogClient {
    async fn create_namespace(&self, _shard_key: i64, namespace: &str) -> anyhow::Result<()> {
        self.namespaces.lock().unwrap().insert(namespace.to_string());
        Ok(())
    }

    async fn drop_namespace(&self, _shard_key: i64, namespace: &str) -> anyhow::Result<()> {
        self.namespaces.lock().unwrap().remove(namespace);
        Ok(())
    }

    async fn create_table(&self, _shard_key: i64, namespace: &str, table: &str, request: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        self.tables.lock().unwrap().insert((namespace.to_string(), table.to_string()));
        Ok(request)
    }

    async fn drop_table(&self, _shard_key: i64, namespace: &str, table: &str) -> anyhow::Result<()> {
        self.tables.lock().unwrap().remove(&(namespace.to_string(), table.to_string()));
        Ok(())
    }

    async fn rename_table(&self, _shard_key: i64, namespace: &str, table: &str, dst_namespace: &str, dst_table: &str) -> anyhow::Result<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.remove(&(namespace.to_string(), table.to_string()));
        tables.insert((dst_namespace.to_string(), dst_table.to_string()));
        Ok(())
    }
}

fn test_settings() -> DbSettings {
    DbSettings {
        host: std::env::var("ICEBERG_CATALOG_TEST_DB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        port: std::env::var("ICEBERG_CATALOG_TEST_DB_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(5432),
        dbname: std::env::var("ICEBERG_CATALOG_TEST_DB_NAME").unwrap_or_else(|_| "storage_gateway_test".to_string()),
        user: std::env::var("ICEBERG_CATALOG_TEST_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
        password: std::env::var("ICEBERG_CATALOG_TEST_DB_PASSWORD").unwrap_or_else(|_| "postgres".to_string()),
        max_pool_size: 4,
    }
}

fn harness(config: IcebergCatalogConfig) -> anyhow::Result<(IcebergCatalog, Arc<FakeCatalogClient>)> {
    let db = Db::connect(&test_settings())?;
    let client = Arc::new(FakeCatalogClient::default());
    Ok((IcebergCatalog::new(db, client.clone(), config), client))
}

#[tokio::test]
#[ignore = "requires a running Postgres instance with the iceberg_catalogs/iceberg_namespaces/iceberg_tables/shards schema applied"]
async fn creating_a_table_reserves_a_shard_and_creates_upstream() {
    let (catalog, client) = harness(IcebergCatalogConfig::default()).unwrap();
    catalog.create_namespace("tenant_a", "orders").await.unwrap();
    catalog.create_table("tenant_a", "orders", "events", serde_json::json!({"schema": {}})).await.unwrap();

    assert_eq!(client.tables.lock().unwrap().len(), 1);
}

#[tokio::test]
#[ignore = "requires a running Postgres instance with the iceberg_catalogs/iceberg_namespaces/iceberg_tables/shards schema applied"]
async fn dropping_the_last_table_drops_the_upstream_namespace() {
    let (catalog, client) = harness(IcebergCatalogConfig::default()).unwrap();
    catalog.create_namespace("tenant_a", "checkouts").await.unwrap();
    catalog.create_table("tenant_a", "checkouts", "events", serde_json::json!({})).await.unwrap();

    catalog.drop_table("tenant_a", "checkouts", "events").await.unwrap();

    assert!(client.tables.lock().unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires a running Postgres instance with the iceberg_catalogs/iceberg_namespaces/iceberg_tables/shards schema applied"]
async fn table_creation_is_rejected_past_the_configured_limit() {
    let (catalog, _client) =
        harness(IcebergCatalogConfig { max_tables_per_namespace: 1, ..IcebergCatalogConfig::default() }).unwrap();
    catalog.create_namespace("tenant_a", "capped").await.unwrap();
    catalog.create_table("tenant_a", "capped", "first", serde_json::json!({})).await.unwrap();

    let err = catalog.create_table("tenant_a", "capped", "second", serde_json::json!({})).await.unwrap_err();
    let err = err.downcast::<errors::ErrorMetadata>().unwrap();
    assert!(err.is_code(errors::ErrorCode::ResourceAlreadyExists));
}

#[tokio::test]
#[ignore = "requires a running Postgres instance with the iceberg_catalogs/iceberg_namespaces/iceberg_tables/shards schema applied"]
async fn moving_a_table_across_namespaces_updates_the_metastore() {
    let (catalog, client) = harness(IcebergCatalogConfig::default()).unwrap();
    catalog.create_namespace("tenant_a", "src_ns").await.unwrap();
    catalog.create_namespace("tenant_a", "dst_ns").await.unwrap();
    catalog.create_table("tenant_a", "src_ns", "t", serde_json::json!({})).await.unwrap();

    catalog.move_table("tenant_a", "src_ns", "t", "dst_ns", "t2").await.unwrap();

    let tables = client.tables.lock().unwrap();
    assert_eq!(tables.len(), 1);
    let (namespace, table) = tables.iter().next().unwrap();
    assert_eq!(table, "t2");
    assert!(namespace.starts_with("tenant_a_"));
}
