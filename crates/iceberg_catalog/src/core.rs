use std::sync::Arc;

use errors::ErrorMetadata;
use uuid::Uuid;
use validate::ReservedSuffixes;

use crate::{
    names,
    rest::CatalogClient,
};

#[derive(Debug, Clone)]
pub struct IcebergCatalogConfig {
    pub max_catalogs: u32,
    pub max_namespaces_per_tenant: u32,
    pub max_tables_per_namespace: u32,
    pub reserved_suffixes: ReservedSuffixes,
}

impl Default for IcebergCatalogConfig {
    fn default() -> Self {
        Self { max_catalogs: 1_000, max_namespaces_per_tenant: 1_000, max_tables_per_namespace: 10_000, reserved_suffixes: ReservedSuffixes::default() }
    }
}

#[derive(Clone)]
pub struct IcebergCatalog {
    db: db::Db,
    client: Arc<dyn CatalogClient>,
    config: IcebergCatalogConfig,
}

fn check_resource_name(name: &str, reserved: &ReservedSuffixes) -> anyhow::Result<()> {
    if !names::is_valid_resource_name(name, reserved) {
        anyhow::bail!(ErrorMetadata::invalid_request("InvalidRequest", format!("{name} is not a valid Iceberg resource name")));
    }
    Ok(())
}

impl IcebergCatalog {
    pub fn new(db: db::Db, client: Arc<dyn CatalogClient>, config: IcebergCatalogConfig) -> Self {
        Self { db, client, config }
    }

    /// Creates a tenant-facing namespace (REST `POST /namespaces`
    /// passthrough). Reserves a metastore row and - tolerant of the
    /// upstream already having one (409) - creates it in the upstream
    /// catalog too, so a table create under an existing namespace never
    /// needs to special-case "namespace already there".
    pub async fn create_namespace(&self, tenant: &str, namespace: &str) -> anyhow::Result<()> {
        check_resource_name(namespace, &self.config.reserved_suffixes)?;
        let max_catalogs = self.config.max_catalogs;
        let max_namespaces = self.config.max_namespaces_per_tenant;
        let internal = names::internal_namespace(tenant, Uuid::new_v4());
        let tenant_owned = tenant.to_string();
        let namespace_owned = namespace.to_string();
        let internal_for_tx = internal.clone();
        self.db
            .with_transaction(move |tx| {
                let tenant = tenant_owned.clone();
                let namespace = namespace_owned.clone();
                let internal = internal_for_tx.clone();
                Box::pin(async move {
                    db::Db::lock_resource(tx, "namespace", &format!("{tenant}:{namespace}")).await?;
                    db::iceberg::find_or_create_catalog(tx, &tenant, max_catalogs).await?;
                    let count = db::iceberg::count_namespaces(tx, &tenant).await?;
                    if count as u32 >= max_namespaces {
                        anyhow::bail!(ErrorMetadata::resource_already_exists(format!("tenant {tenant} has reached its namespace limit")));
                    }
                    db::iceberg::insert_namespace(tx, &tenant, &namespace, &internal).await
                })
            })
            .await?;

        // Namespaces aren't sharded - only tables reserve a shard slot - so
        // a bare namespace create/drop routes to the catalog-wide default
        // warehouse (shard key 0) rather than any table's reservation.
        self.client.create_namespace(0, &internal).await
    }

    pub async fn drop_namespace(&self, tenant: &str, namespace: &str) -> anyhow::Result<()> {
        let internal = {
            let tenant = tenant.to_string();
            let namespace = namespace.to_string();
            self.db
                .with_transaction(move |tx| {
                    let tenant = tenant.clone();
                    let namespace = namespace.clone();
                    Box::pin(async move {
                        db::Db::lock_resource(tx, "namespace", &format!("{tenant}:{namespace}")).await?;
                        let row = db::iceberg::find_namespace(tx, &tenant, &namespace)
                            .await?
                            .ok_or_else(|| ErrorMetadata::no_such_key(format!("namespace {namespace} does not exist")))?;
                        let remaining = db::iceberg::count_tables(tx, &tenant, &namespace).await?;
                        if remaining > 0 {
                            anyhow::bail!(ErrorMetadata::invalid_request("InvalidRequest", format!("namespace {namespace} still has tables")));
                        }
                        db::iceberg::delete_namespace(tx, &tenant, &namespace).await?;
                        Ok(row.internal_namespace)
                    })
                })
                .await?
        };
        self.client.drop_namespace(0, &internal).await
    }

    /// §4.L write ordering for `createTable`: advisory lock, count check,
    /// upstream `createNamespace` (tolerant of 409), upstream `createTable`,
    /// metastore insert, then the transaction commit confirms the shard
    /// reservation taken at its start.
    pub async fn create_table(&self, tenant: &str, namespace: &str, table: &str, schema: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        check_resource_name(table, &self.config.reserved_suffixes)?;
        let max_tables = self.config.max_tables_per_namespace;
        let client = self.client.clone();
        let tenant = tenant.to_string();
        let namespace = namespace.to_string();
        let table = table.to_string();

        self.db
            .with_transaction(move |tx| {
                let client = client.clone();
                let tenant = tenant.clone();
                let namespace = namespace.clone();
                let table = table.clone();
                let schema = schema.clone();
                Box::pin(async move {
                    db::Db::lock_resource(tx, "namespace", &format!("{tenant}:{namespace}")).await?;

                    let count = db::iceberg::count_tables(tx, &tenant, &namespace).await?;
                    if count as u32 >= max_tables {
                        anyhow::bail!(ErrorMetadata::resource_already_exists(format!("namespace {namespace} has reached its table limit")));
                    }

                    let ns_row = db::iceberg::find_namespace(tx, &tenant, &namespace)
                        .await?
                        .ok_or_else(|| ErrorMetadata::no_such_key(format!("namespace {namespace} does not exist")))?;

                    let shard_id = db::iceberg::reserve_shard(tx).await?;

                    client.create_namespace(shard_id, &ns_row.internal_namespace).await?;
                    let created = client.create_table(shard_id, &ns_row.internal_namespace, &table, schema).await?;

                    db::iceberg::insert_table(tx, &tenant, &namespace, &table, shard_id).await?;

                    Ok(created)
                })
            })
            .await
    }

    /// §4.L write ordering for `dropTable`: lock, metastore delete, shard
    /// free, then upstream drop outside the transaction - upstream state
    /// left behind by a crash between commit and the upstream call is an
    /// orphan for the sweeper, same policy as multipart parts on abort.
    pub async fn drop_table(&self, tenant: &str, namespace: &str, table: &str) -> anyhow::Result<()> {
        let (internal_namespace, shard_id, namespace_now_empty) = {
            let tenant = tenant.to_string();
            let namespace = namespace.to_string();
            let table = table.to_string();
            self.db
                .with_transaction(move |tx| {
                    let tenant = tenant.clone();
                    let namespace = namespace.clone();
                    let table = table.clone();
                    Box::pin(async move {
                        db::Db::lock_resource(tx, "namespace", &format!("{tenant}:{namespace}")).await?;
                        let ns_row = db::iceberg::find_namespace(tx, &tenant, &namespace)
                            .await?
                            .ok_or_else(|| ErrorMetadata::no_such_key(format!("namespace {namespace} does not exist")))?;
                        let shard_id = db::iceberg::delete_table(tx, &tenant, &namespace, &table).await?;
                        db::iceberg::free_shard(tx, shard_id).await?;
                        let remaining = db::iceberg::count_tables(tx, &tenant, &namespace).await?;
                        Ok((ns_row.internal_namespace, shard_id, remaining == 0))
                    })
                })
                .await?
        };

        if let Err(e) = self.client.drop_table(shard_id, &internal_namespace, table).await {
            tracing::warn!(error = %e, tenant, namespace, table, "upstream table drop failed after the metastore row was already removed");
            return Err(e);
        }
        if namespace_now_empty {
            if let Err(e) = self.client.drop_namespace(shard_id, &internal_namespace).await {
                tracing::warn!(error = %e, tenant, namespace, "upstream namespace drop failed after the last table was removed");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Renames or relocates a table, optionally across namespaces. The
    /// shard reservation doesn't move - only the metastore and upstream
    /// identifiers do.
    pub async fn move_table(&self, tenant: &str, namespace: &str, table: &str, dst_namespace: &str, dst_table: &str) -> anyhow::Result<()> {
        check_resource_name(dst_table, &self.config.reserved_suffixes)?;
        let client = self.client.clone();
        let tenant = tenant.to_string();
        let namespace = namespace.to_string();
        let table = table.to_string();
        let dst_namespace = dst_namespace.to_string();
        let dst_table = dst_table.to_string();

        self.db
            .with_transaction(move |tx| {
                let client = client.clone();
                let tenant = tenant.clone();
                let namespace = namespace.clone();
                let table = table.clone();
                let dst_namespace = dst_namespace.clone();
                let dst_table = dst_table.clone();
                Box::pin(async move {
                    db::Db::lock_resource(tx, "namespace", &format!("{tenant}:{namespace}")).await?;
                    db::Db::lock_resource(tx, "namespace", &format!("{tenant}:{dst_namespace}")).await?;

                    let src_ns = db::iceberg::find_namespace(tx, &tenant, &namespace)
                        .await?
                        .ok_or_else(|| ErrorMetadata::no_such_key(format!("namespace {namespace} does not exist")))?;
                    let dst_ns = db::iceberg::find_namespace(tx, &tenant, &dst_namespace)
                        .await?
                        .ok_or_else(|| ErrorMetadata::no_such_key(format!("namespace {dst_namespace} does not exist")))?;
                    let row = db::iceberg::find_table(tx, &tenant, &namespace, &table)
                        .await?
                        .ok_or_else(|| ErrorMetadata::no_such_key(format!("table {namespace}.{table} does not exist")))?;

                    client.rename_table(row.shard_id, &src_ns.internal_namespace, &table, &dst_ns.internal_namespace, &dst_table).await?;
                    db::iceberg::move_table(tx, &tenant, &namespace, &table, &dst_namespace, &dst_table).await
                })
            })
            .await
    }
}
