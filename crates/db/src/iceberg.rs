//! Metastore rows backing the Iceberg tenant catalog (§3, §4.L):
//! `IcebergCatalog` (one per onboarded tenant), `IcebergNamespace`,
//! `IcebergTable`, and the shard pool tables are proxied against.
//!
//! All three entities are soft-deleted (`deleted_at`); counts used for
//! `maxCatalogs`/`maxNamespaces`/`maxTables` enforcement only ever see live
//! rows.

use chrono::{
    DateTime,
    Utc,
};
use errors::ErrorMetadata;
use tokio_postgres::Transaction;

#[derive(Debug, Clone)]
pub struct IcebergCatalogRow {
    pub tenant: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct IcebergNamespaceRow {
    pub tenant: String,
    pub namespace: String,
    pub internal_namespace: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct IcebergTableRow {
    pub tenant: String,
    pub namespace: String,
    pub table_name: String,
    pub shard_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Ensures a catalog row exists for `tenant`, failing with
/// `ResourceAlreadyExists` if creating one would exceed `max_catalogs` -
/// onboarding a brand-new tenant is the only path that can hit this limit,
/// since every later call is a no-op against the existing row.
pub async fn find_or_create_catalog(tx: &Transaction<'_>, tenant: &str, max_catalogs: u32) -> anyhow::Result<IcebergCatalogRow> {
    if let Some(row) = tx.query_opt("SELECT created_at FROM iceberg_catalogs WHERE tenant = $1", &[&tenant]).await? {
        return Ok(IcebergCatalogRow { tenant: tenant.to_string(), created_at: row.get("created_at") });
    }
    let count: i64 = tx.query_one("SELECT count(*) FROM iceberg_catalogs", &[]).await?.get(0);
    if count as u64 >= max_catalogs as u64 {
        anyhow::bail!(ErrorMetadata::resource_already_exists("catalog limit reached for this deployment"));
    }
    let row = tx
        .query_one(
            "INSERT INTO iceberg_catalogs (tenant, created_at) VALUES ($1, now()) \
             ON CONFLICT (tenant) DO UPDATE SET tenant = EXCLUDED.tenant RETURNING created_at",
            &[&tenant],
        )
        .await?;
    Ok(IcebergCatalogRow { tenant: tenant.to_string(), created_at: row.get("created_at") })
}

pub async fn count_namespaces(tx: &Transaction<'_>, tenant: &str) -> anyhow::Result<i64> {
    Ok(tx
        .query_one("SELECT count(*) FROM iceberg_namespaces WHERE tenant = $1 AND deleted_at IS NULL", &[&tenant])
        .await?
        .get(0))
}

pub async fn count_tables(tx: &Transaction<'_>, tenant: &str, namespace: &str) -> anyhow::Result<i64> {
    Ok(tx
        .query_one(
            "SELECT count(*) FROM iceberg_tables WHERE tenant = $1 AND namespace = $2 AND deleted_at IS NULL",
            &[&tenant, &namespace],
        )
        .await?
        .get(0))
}

pub async fn insert_namespace(tx: &Transaction<'_>, tenant: &str, namespace: &str, internal_namespace: &str) -> anyhow::Result<()> {
    let inserted = tx
        .execute(
            "INSERT INTO iceberg_namespaces (tenant, namespace, internal_namespace, created_at) \
             VALUES ($1, $2, $3, now()) \
             ON CONFLICT (tenant, namespace) DO UPDATE SET deleted_at = NULL, internal_namespace = EXCLUDED.internal_namespace \
             WHERE iceberg_namespaces.deleted_at IS NOT NULL",
            &[&tenant, &namespace, &internal_namespace],
        )
        .await?;
    if inserted == 0 {
        anyhow::bail!(ErrorMetadata::resource_already_exists(format!("namespace {namespace} already exists")));
    }
    Ok(())
}

pub async fn find_namespace(tx: &Transaction<'_>, tenant: &str, namespace: &str) -> anyhow::Result<Option<IcebergNamespaceRow>> {
    let row = tx
        .query_opt(
            "SELECT internal_namespace, created_at FROM iceberg_namespaces \
             WHERE tenant = $1 AND namespace = $2 AND deleted_at IS NULL",
            &[&tenant, &namespace],
        )
        .await?;
    Ok(row.map(|row| IcebergNamespaceRow {
        tenant: tenant.to_string(),
        namespace: namespace.to_string(),
        internal_namespace: row.get("internal_namespace"),
        created_at: row.get("created_at"),
    }))
}

pub async fn delete_namespace(tx: &Transaction<'_>, tenant: &str, namespace: &str) -> anyhow::Result<()> {
    tx.execute(
        "UPDATE iceberg_namespaces SET deleted_at = now() WHERE tenant = $1 AND namespace = $2",
        &[&tenant, &namespace],
    )
    .await?;
    Ok(())
}

pub async fn insert_table(tx: &Transaction<'_>, tenant: &str, namespace: &str, table_name: &str, shard_id: i64) -> anyhow::Result<()> {
    let inserted = tx
        .execute(
            "INSERT INTO iceberg_tables (tenant, namespace, table_name, shard_id, created_at) \
             VALUES ($1, $2, $3, $4, now()) \
             ON CONFLICT (tenant, namespace, table_name) DO UPDATE SET deleted_at = NULL, shard_id = EXCLUDED.shard_id \
             WHERE iceberg_tables.deleted_at IS NOT NULL",
            &[&tenant, &namespace, &table_name, &shard_id],
        )
        .await?;
    if inserted == 0 {
        anyhow::bail!(ErrorMetadata::resource_already_exists(format!("table {namespace}.{table_name} already exists")));
    }
    Ok(())
}

pub async fn find_table(tx: &Transaction<'_>, tenant: &str, namespace: &str, table_name: &str) -> anyhow::Result<Option<IcebergTableRow>> {
    let row = tx
        .query_opt(
            "SELECT shard_id, created_at FROM iceberg_tables \
             WHERE tenant = $1 AND namespace = $2 AND table_name = $3 AND deleted_at IS NULL",
            &[&tenant, &namespace, &table_name],
        )
        .await?;
    Ok(row.map(|row| IcebergTableRow {
        tenant: tenant.to_string(),
        namespace: namespace.to_string(),
        table_name: table_name.to_string(),
        shard_id: row.get("shard_id"),
        created_at: row.get("created_at"),
    }))
}

/// Soft-deletes the table row and returns the shard slot it held so the
/// caller can free it.
pub async fn delete_table(tx: &Transaction<'_>, tenant: &str, namespace: &str, table_name: &str) -> anyhow::Result<i64> {
    let row = tx
        .query_opt(
            "UPDATE iceberg_tables SET deleted_at = now() \
             WHERE tenant = $1 AND namespace = $2 AND table_name = $3 AND deleted_at IS NULL \
             RETURNING shard_id",
            &[&tenant, &namespace, &table_name],
        )
        .await?;
    match row {
        Some(row) => Ok(row.get("shard_id")),
        None => anyhow::bail!(ErrorMetadata::no_such_key(format!("table {namespace}.{table_name} does not exist"))),
    }
}

pub async fn move_table(
    tx: &Transaction<'_>,
    tenant: &str,
    namespace: &str,
    table_name: &str,
    dst_namespace: &str,
    dst_table_name: &str,
) -> anyhow::Result<()> {
    let updated = tx
        .execute(
            "UPDATE iceberg_tables SET namespace = $4, table_name = $5 \
             WHERE tenant = $1 AND namespace = $2 AND table_name = $3 AND deleted_at IS NULL",
            &[&tenant, &namespace, &table_name, &dst_namespace, &dst_table_name],
        )
        .await?;
    if updated == 0 {
        anyhow::bail!(ErrorMetadata::no_such_key(format!("table {namespace}.{table_name} does not exist")));
    }
    Ok(())
}

/// Reserves a slot in the first shard with spare capacity, failing with
/// `SlowDown` if the whole pool is saturated - this is a finite shared
/// resource, not a per-tenant one (§4.L).
pub async fn reserve_shard(tx: &Transaction<'_>) -> anyhow::Result<i64> {
    let row = tx
        .query_opt(
            "UPDATE shards SET used = used + 1 \
             WHERE id = (SELECT id FROM shards WHERE used < capacity ORDER BY id LIMIT 1 FOR UPDATE SKIP LOCKED) \
             RETURNING id",
            &[],
        )
        .await?;
    match row {
        Some(row) => Ok(row.get("id")),
        None => anyhow::bail!(ErrorMetadata::slow_down("no shard capacity available, retry shortly")),
    }
}

pub async fn free_shard(tx: &Transaction<'_>, shard_id: i64) -> anyhow::Result<()> {
    tx.execute("UPDATE shards SET used = used - 1 WHERE id = $1", &[&shard_id]).await?;
    Ok(())
}
