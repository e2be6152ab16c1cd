//! Iceberg tenant catalog facade (§4.L): tenant-to-warehouse name mapping,
//! shard reservation, and a delegating proxy in front of an upstream
//! Iceberg REST catalog.
//!
//! Every tenant-facing namespace maps to an internal name
//! (`<tenantId>_<uuid_underscored>`) chosen once and persisted; the
//! metastore row is the source of truth for that mapping, never
//! recomputed. Table lifecycle operations reserve or free a slot in a
//! shared, finite shard pool alongside their metastore row, all inside the
//! same transaction the advisory lock lives in.

mod core;
mod names;
mod rest;
#[cfg(test)]
mod tests;

pub use crate::{
    core::{
        IcebergCatalog,
        IcebergCatalogConfig,
    },
    names::{
        internal_namespace,
        is_valid_resource_name,
    },
    rest::{
        CatalogClient,
        ReqwestCatalogClient,
    },
};
