//! End-to-end coverage for the multipart upload state machine.
//!
//! Like `lifecycle`'s own suite, these run the real transactional
//! choreography against a live Postgres instance and are `#[ignore]`d by
//! default - run with `cargo test -p multipart -- --ignored` against a
//! database reachable via the `MULTIPART_TEST_DB_*` environment variables
//! (each falls back to a local default).

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use db::{
    Db,
    DbSettings,
};
use lifecycle::{
    Lifecycle,
    LifecycleConfig,
    WebhookTargetLookup,
};
use runtime::testing::TestRuntime;
use storage::testing::InMemoryStorage;
use tokio_util::sync::CancellationToken;
use webhook::{
    TenantRef,
    WebhookTarget,
};

use crate::{
    CompleteRequest,
    InitiateRequest,
    Multipart,
    MultipartConfig,
    UploadPartRequest,
};

struct NoWebhooks;

#[async_trait]
impl WebhookTargetLookup for NoWebhooks {
    async fn targets_for(&self, _tenant: &str) -> anyhow::Result<Vec<WebhookTarget>> {
        Ok(vec![])
    }

    async fn tenant_ref(&self, tenant: &str) -> anyhow::Result<TenantRef> {
        Ok(TenantRef { reference: tenant.to_string(), host: format!("{tenant}.example.com") })
    }
}

fn test_settings() -> DbSettings {
    DbSettings {
        host: std::env::var("MULTIPART_TEST_DB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        port: std::env::var("MULTIPART_TEST_DB_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(5432),
        dbname: std::env::var("MULTIPART_TEST_DB_NAME").unwrap_or_else(|_| "storage_gateway_test".to_string()),
        user: std::env::var("MULTIPART_TEST_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
        password: std::env::var("MULTIPART_TEST_DB_PASSWORD").unwrap_or_else(|_| "postgres".to_string()),
        max_pool_size: 4,
    }
}

fn harness() -> anyhow::Result<Multipart<TestRuntime>> {
    let db = Db::connect(&test_settings())?;
    let storage = Arc::new(InMemoryStorage::new());
    let lifecycle = Lifecycle::new(db.clone(), storage.clone(), Arc::new(NoWebhooks), TestRuntime::new(), LifecycleConfig::default());
    Ok(Multipart::new(db, storage, lifecycle, TestRuntime::new(), MultipartConfig { signing_secret: b"test-secret".to_vec(), ..Default::default() }))
}

fn body(bytes: &'static [u8]) -> storage::ByteStream {
    Box::pin(futures::stream::once(async move { Ok(Bytes::from_static(bytes)) }))
}

#[tokio::test]
#[ignore = "requires a running Postgres instance with the multipart_uploads/upload_parts schema applied"]
async fn a_single_part_upload_completes_into_a_visible_object() {
    let multipart = harness().unwrap();
    let initiated = multipart
        .initiate(InitiateRequest {
            tenant: "tenant_a".to_string(),
            bucket: "uploads".to_string(),
            name: "big.bin".to_string(),
            mime_type: Some("application/octet-stream".to_string()),
            owner: None,
            user_metadata: None,
        })
        .await
        .unwrap();

    multipart
        .upload_part(UploadPartRequest {
            upload_id: initiated.upload_id.clone(),
            part_number: 1,
            content_length: 5,
            body: body(b"hello"),
            cancellation: CancellationToken::new(),
        })
        .await
        .unwrap();

    let descriptor = multipart.complete(CompleteRequest { upload_id: initiated.upload_id, parts: None, req_id: None }).await.unwrap();
    assert_eq!(descriptor.size, 5);
}

#[tokio::test]
#[ignore = "requires a running Postgres instance with the multipart_uploads/upload_parts schema applied"]
async fn aborting_an_upload_leaves_no_completed_object() {
    let multipart = harness().unwrap();
    let initiated = multipart
        .initiate(InitiateRequest {
            tenant: "tenant_a".to_string(),
            bucket: "uploads".to_string(),
            name: "abandoned.bin".to_string(),
            mime_type: None,
            owner: None,
            user_metadata: None,
        })
        .await
        .unwrap();

    multipart
        .upload_part(UploadPartRequest {
            upload_id: initiated.upload_id.clone(),
            part_number: 1,
            content_length: 5,
            body: body(b"hello"),
            cancellation: CancellationToken::new(),
        })
        .await
        .unwrap();

    multipart.abort(crate::AbortRequest { upload_id: initiated.upload_id }).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Postgres instance with the multipart_uploads/upload_parts schema applied"]
async fn a_part_that_would_exceed_the_size_cap_is_rejected() {
    let multipart_config = MultipartConfig { signing_secret: b"test-secret".to_vec(), global_file_size_limit: 4, ..Default::default() };
    let db = Db::connect(&test_settings()).unwrap();
    let storage = Arc::new(InMemoryStorage::new());
    let lifecycle = Lifecycle::new(db.clone(), storage.clone(), Arc::new(NoWebhooks), TestRuntime::new(), LifecycleConfig::default());
    let multipart = Multipart::new(db, storage, lifecycle, TestRuntime::new(), multipart_config);

    let initiated = multipart
        .initiate(InitiateRequest { tenant: "tenant_a".to_string(), bucket: "uploads".to_string(), name: "oversized.bin".to_string(), mime_type: None, owner: None, user_metadata: None })
        .await
        .unwrap();

    let err = multipart
        .upload_part(UploadPartRequest { upload_id: initiated.upload_id, part_number: 1, content_length: 5, body: body(b"hello"), cancellation: CancellationToken::new() })
        .await
        .unwrap_err();
    assert!(err.downcast_ref::<errors::ErrorMetadata>().is_some_and(|e| e.is_code(errors::ErrorCode::EntityTooLarge)));
}
