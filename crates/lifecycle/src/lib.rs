//! Object lifecycle coordinator (§4.H): upload, copy, move, delete,
//! delete-many, orphan cleanup, and paginated listing, each obeying the
//! invariant that on return either the DB row and blob are both updated and
//! a webhook has been scheduled, or no DB row points to a missing blob.

mod core;
mod metrics;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use async_trait::async_trait;
use runtime::Runtime;
use storage::Storage;
use webhook::{
    TenantRef,
    WebhookDispatcher,
    WebhookTarget,
};

pub use crate::core::{
    CompleteMultipartRequest,
    CopyRequest,
    MoveRequest,
    UploadRequest,
};

/// Resolves the webhook endpoints and host identity configured for a
/// tenant. Left abstract because tenant configuration itself is out of
/// scope (§1 Non-goals) - an implementation backs this with whatever
/// config store the deployment uses.
#[async_trait]
pub trait WebhookTargetLookup: Send + Sync {
    async fn targets_for(&self, tenant: &str) -> anyhow::Result<Vec<WebhookTarget>>;

    async fn tenant_ref(&self, tenant: &str) -> anyhow::Result<TenantRef>;
}

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Absolute ceiling on any single object, applied on top of (and never
    /// loosening) a bucket's own `file_size_limit`.
    pub global_file_size_limit: u64,
    /// `DeleteObjects` batches are split so the cumulative
    /// `encodeURIComponent(name).len() + 9` of a batch never exceeds this.
    pub url_length_limit: usize,
    /// How long `waitObjectLock` waits inside copy/move before failing with
    /// `LockTimeout` (§5: 3-5s).
    pub object_lock_timeout: std::time::Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            global_file_size_limit: 5 * (1 << 30),
            url_length_limit: 8192,
            object_lock_timeout: std::time::Duration::from_secs(4),
        }
    }
}

#[derive(Clone)]
pub struct Lifecycle<RT: Runtime> {
    pub(crate) db: db::Db,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) webhook: WebhookDispatcher,
    pub(crate) targets: Arc<dyn WebhookTargetLookup>,
    pub(crate) runtime: RT,
    pub(crate) config: LifecycleConfig,
}

impl<RT: Runtime> Lifecycle<RT> {
    pub fn new(
        db: db::Db,
        storage: Arc<dyn Storage>,
        targets: Arc<dyn WebhookTargetLookup>,
        runtime: RT,
        config: LifecycleConfig,
    ) -> Self {
        Self { db, storage, webhook: WebhookDispatcher::new(), targets, runtime, config }
    }

    /// The physical blob-store "bucket" argument, which folds the tenant
    /// into the key namespace per the blob key layout `tenant/bucket/name[/version]`.
    pub(crate) fn blob_namespace(tenant: &str, bucket: &str) -> String {
        format!("{tenant}/{bucket}")
    }
}

#[derive(Debug, Clone)]
pub struct ObjectDescriptor {
    pub tenant: String,
    pub bucket: String,
    pub name: String,
    pub version: String,
    pub size: u64,
    pub mime_type: Option<String>,
    pub etag: String,
}

impl From<db::ObjectRow> for ObjectDescriptor {
    fn from(row: db::ObjectRow) -> Self {
        Self {
            tenant: row.tenant,
            bucket: row.bucket,
            name: row.name,
            version: row.version.to_string(),
            size: row.metadata.size.max(0) as u64,
            mime_type: row.metadata.mime_type,
            etag: row.metadata.etag,
        }
    }
}
