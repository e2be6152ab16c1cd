//! Generates the synthetic Iceberg v2 metadata files DuckLake tables serve
//! at their `__ducklake__/t<tableId>/s<snapshotId>/...` virtual paths (§4.M).
//!
//! A DuckLake snapshot only has rows in the catalog - no Iceberg manifests
//! exist until something asks for one. [`DuckLakeAvro::resolve`] builds the
//! manifest list and its manifests from the catalog on first request and
//! caches the triple by `(tableId, snapshotId)`, since a snapshot's files
//! never change after the fact.

mod bounds;
mod manifest;
mod schema;
#[cfg(test)]
mod tests;
pub mod types;

use std::{
    sync::Arc,
    time::Duration,
};

use errors::ErrorMetadata;
use moka::future::Cache;

pub use crate::types::{
    ManifestKey,
    ManifestSet,
};

#[derive(Debug, Clone)]
pub struct DuckLakeAvroConfig {
    pub cache_max_capacity: u64,
    pub cache_ttl: Duration,
}

impl Default for DuckLakeAvroConfig {
    fn default() -> Self {
        Self { cache_max_capacity: 10_000, cache_ttl: Duration::from_secs(3600) }
    }
}

/// A parsed `__ducklake__/t<tableId>/s<snapshotId>/<file>` virtual path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualPath {
    pub table_id: i64,
    pub snapshot_id: i64,
    pub file: String,
}

impl VirtualPath {
    pub fn parse(path: &str) -> Option<Self> {
        let rest = path.strip_prefix("__ducklake__/")?;
        let mut parts = rest.splitn(3, '/');
        let table_id = parts.next()?.strip_prefix('t')?.parse().ok()?;
        let snapshot_id = parts.next()?.strip_prefix('s')?.parse().ok()?;
        let file = parts.next()?.to_string();
        if file.is_empty() {
            return None;
        }
        Some(Self { table_id, snapshot_id, file })
    }

    fn dir(&self) -> String {
        format!("__ducklake__/t{}/s{}", self.table_id, self.snapshot_id)
    }
}

#[derive(Clone)]
pub struct DuckLakeAvro {
    db: db::Db,
    cache: Cache<types::ManifestKey, Arc<types::ManifestSet>>,
}

impl DuckLakeAvro {
    pub fn new(db: db::Db, config: DuckLakeAvroConfig) -> Self {
        let cache = Cache::builder().max_capacity(config.cache_max_capacity).time_to_live(config.cache_ttl).build();
        Self { db, cache }
    }

    /// Resolves a virtual path to the Avro OCF bytes it names: the manifest
    /// list for `snap-<id>.avro`, or one of its manifests for `m0.avro` /
    /// `m1.avro`.
    pub async fn resolve(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        let virtual_path = VirtualPath::parse(path).ok_or_else(|| ErrorMetadata::no_such_key(path.to_string()))?;
        let key = types::ManifestKey { table_id: virtual_path.table_id, snapshot_id: virtual_path.snapshot_id };
        let set = self.manifest_set(key, &virtual_path.dir()).await?;

        let snap_name = format!("snap-{}.avro", virtual_path.snapshot_id);
        if virtual_path.file == snap_name {
            return Ok(set.manifest_list.clone());
        }
        set.get(&virtual_path.file).map(|bytes| bytes.to_vec()).ok_or_else(|| ErrorMetadata::no_such_key(path.to_string()).into())
    }

    async fn manifest_set(&self, key: types::ManifestKey, virtual_dir: &str) -> anyhow::Result<Arc<types::ManifestSet>> {
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }
        tracing::debug!(table_id = key.table_id, snapshot_id = key.snapshot_id, "building ducklake manifest set, cache miss");

        let virtual_dir = virtual_dir.to_string();
        let set = self
            .db
            .with_transaction(move |tx| {
                let virtual_dir = virtual_dir.clone();
                Box::pin(async move {
                    let snapshot = db::ducklake::find_snapshot(tx, key.table_id, key.snapshot_id).await?;
                    let columns = db::ducklake::find_columns(tx, key.table_id).await?;
                    let data_files = db::ducklake::find_data_files(tx, key.table_id, key.snapshot_id).await?;
                    let delete_files = db::ducklake::find_delete_files(tx, key.table_id, key.snapshot_id).await?;
                    manifest::build_manifest_set(&virtual_dir, &columns, &data_files, &delete_files, snapshot.snapshot_id, snapshot.sequence_number)
                })
            })
            .await?;

        let set = Arc::new(set);
        self.cache.insert(key, set.clone()).await;
        Ok(set)
    }
}

#[cfg(test)]
mod virtual_path_tests {
    use super::*;

    #[test]
    fn parses_the_manifest_list_path() {
        let parsed = VirtualPath::parse("__ducklake__/t17/s3/snap-3.avro").unwrap();
        assert_eq!(parsed, VirtualPath { table_id: 17, snapshot_id: 3, file: "snap-3.avro".to_string() });
    }

    #[test]
    fn parses_a_manifest_file_path() {
        let parsed = VirtualPath::parse("__ducklake__/t17/s3/3-m0.avro").unwrap();
        assert_eq!(parsed.file, "3-m0.avro");
    }

    #[test]
    fn rejects_paths_outside_the_virtual_prefix() {
        assert!(VirtualPath::parse("tenants/t1/key").is_none());
        assert!(VirtualPath::parse("__ducklake__/t17/s3/").is_none());
        assert!(VirtualPath::parse("__ducklake__/tabc/s3/snap-3.avro").is_none());
    }
}
