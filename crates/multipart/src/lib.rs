//! S3 multipart upload state machine (§4.J): `Initiated → (Parts…) →
//! Completed` or `Initiated → Aborted`, each transition living in a DB row
//! (`MultipartUpload`, §3) guarded by a tamper-evident progress signature.
//!
//! Completion hands off to the object lifecycle coordinator (component H)
//! for the shared upsert/webhook/prior-version-cleanup sequence, so a
//! completed multipart upload is indistinguishable from a single-shot
//! `upload` once it lands.

mod core;
mod metrics;
mod signature;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use runtime::Runtime;
use storage::Storage;

pub use crate::core::{
    AbortRequest,
    CompleteRequest,
    InitiateRequest,
    InitiateResult,
    UploadPartRequest,
    UploadPartResult,
};

#[derive(Debug, Clone)]
pub struct MultipartConfig {
    /// Same absolute ceiling `lifecycle` enforces on a single-shot upload,
    /// checked here against the running `in_progress_size` total.
    pub global_file_size_limit: u64,
    /// Hard per-part cap mirroring the underlying S3 contract (§4.J).
    pub max_part_size: u64,
    /// HMAC secret backing the `upload_signature` tamper check.
    pub signing_secret: Vec<u8>,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            global_file_size_limit: 5 * (1 << 30),
            max_part_size: storage::MAX_PART_SIZE,
            signing_secret: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct Multipart<RT: Runtime> {
    db: db::Db,
    storage: Arc<dyn Storage>,
    lifecycle: lifecycle::Lifecycle<RT>,
    runtime: RT,
    config: MultipartConfig,
}

impl<RT: Runtime> Multipart<RT> {
    pub fn new(db: db::Db, storage: Arc<dyn Storage>, lifecycle: lifecycle::Lifecycle<RT>, runtime: RT, config: MultipartConfig) -> Self {
        Self { db, storage, lifecycle, runtime, config }
    }

    pub(crate) fn blob_namespace(tenant: &str, bucket: &str) -> String {
        format!("{tenant}/{bucket}")
    }
}
