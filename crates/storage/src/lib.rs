//! The blob adapter contract (§4.G).
//!
//! This crate defines the stable interface the object lifecycle coordinator
//! (component H) and the S3 multipart state machine (component J) consume;
//! it carries no implementation of its own. A concrete adapter - backed by
//! an S3-compatible bucket, a local filesystem, or a test double - lives in
//! its own crate and implements [`Storage`].

use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "testing")]
pub mod testing;

pub const MAX_PART_SIZE: u64 = 5 * (1 << 30);
pub const MAX_NUM_PARTS: u32 = 10_000;

pub type ByteStream = BoxStream<'static, anyhow::Result<Bytes>>;

#[derive(Debug, Clone, Default)]
pub struct GetObjectConditions {
    pub if_modified_since: Option<chrono::DateTime<chrono::Utc>>,
    pub if_none_match: Option<String>,
    pub range: Option<ByteRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// Inclusive end, matching HTTP `Range` semantics (`bytes=0-0` is one byte).
    pub end: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CopyObjectConditions {
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ObjectAttributes {
    pub size: u64,
    pub mime_type: Option<String>,
    pub cache_control: Option<String>,
    pub etag: String,
    pub last_modified: chrono::DateTime<chrono::Utc>,
}

/// The request body for an upload: its declared length plus the stream of
/// bytes, so adapters that need `Content-Length` up front (presigned PUT,
/// multipart part upload) don't have to buffer first.
pub struct PutObjectBody {
    pub content_length: u64,
    pub stream: ByteStream,
}

/// Result of [`Storage::get_object`]: either the full object or, when a
/// range was honored, the sliced byte stream and its length.
pub struct GetObjectResult {
    pub content_length: u64,
    pub stream: ByteStream,
    /// Set when the response is a 206 partial read, echoing the served range.
    pub range: Option<ByteRange>,
    pub attributes: ObjectAttributes,
}

pub struct UploadPartResult {
    pub etag: String,
}

pub struct CompletedPartSpec {
    pub part_number: u32,
    pub etag: String,
}

#[async_trait]
pub trait Storage: Send + Sync + Debug {
    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        version: &str,
        body: PutObjectBody,
        mime_type: Option<&str>,
        cache_control: Option<&str>,
    ) -> anyhow::Result<ObjectAttributes>;

    /// Cooperative cancellation is threaded to `get_object`, `upload_part`,
    /// and `upload_object` per §5; adapters should honor it at their own
    /// I/O suspension points and raise `AbortedTerminate` if signaled.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        version: &str,
        conditions: GetObjectConditions,
        cancellation: &CancellationToken,
    ) -> anyhow::Result<Option<GetObjectResult>>;

    async fn head_object(&self, bucket: &str, key: &str, version: &str) -> anyhow::Result<Option<ObjectAttributes>>;

    #[allow(clippy::too_many_arguments)]
    async fn copy_object(
        &self,
        bucket: &str,
        src_key: &str,
        src_version: &str,
        dst_key: &str,
        dst_version: &str,
        metadata: Option<(Option<String>, Option<String>)>,
        conditions: CopyObjectConditions,
    ) -> anyhow::Result<ObjectAttributes>;

    async fn delete_object(&self, bucket: &str, key: &str, version: &str) -> anyhow::Result<()>;

    async fn delete_objects(&self, bucket: &str, keys: &[(String, String)]) -> anyhow::Result<()>;

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        version: &str,
        mime_type: Option<&str>,
    ) -> anyhow::Result<String>;

    #[allow(clippy::too_many_arguments)]
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        version: &str,
        upload_id: &str,
        part_number: u32,
        body: PutObjectBody,
        cancellation: &CancellationToken,
    ) -> anyhow::Result<UploadPartResult>;

    #[allow(clippy::too_many_arguments)]
    async fn upload_part_copy(
        &self,
        bucket: &str,
        dst_key: &str,
        dst_version: &str,
        upload_id: &str,
        part_number: u32,
        src_key: &str,
        src_version: &str,
        range: Option<ByteRange>,
    ) -> anyhow::Result<UploadPartResult>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        version: &str,
        parts: &[CompletedPartSpec],
    ) -> anyhow::Result<ObjectAttributes>;

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        version: &str,
    ) -> anyhow::Result<()>;

    /// Release any pooled connections/handles. Adapters that don't hold
    /// resources beyond their own `Drop` may no-op.
    async fn close(&self) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_range_is_inclusive_single_byte_for_bytes_0_0() {
        let range = ByteRange { start: 0, end: 0 };
        assert_eq!(range.end - range.start + 1, 1);
    }
}
