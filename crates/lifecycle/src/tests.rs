//! End-to-end coverage for the object lifecycle coordinator.
//!
//! These exercise the real transactional choreography against a live
//! Postgres instance, so they're `#[ignore]`d by default - run with
//! `cargo test -p lifecycle -- --ignored` against a database reachable via
//! the `LIFECYCLE_TEST_DB_*` environment variables (each falls back to a
//! local default).

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use db::{
    Db,
    DbSettings,
};
use runtime::testing::TestRuntime;
use storage::testing::InMemoryStorage;
use webhook::{
    TenantRef,
    WebhookTarget,
};

use crate::{
    CopyRequest,
    Lifecycle,
    LifecycleConfig,
    MoveRequest,
    UploadRequest,
    WebhookTargetLookup,
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
        host: std::env::var("LIFECYCLE_TEST_DB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        port: std::env::var("LIFECYCLE_TEST_DB_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(5432),
        dbname: std::env::var("LIFECYCLE_TEST_DB_NAME").unwrap_or_else(|_| "storage_gateway_test".to_string()),
        user: std::env::var("LIFECYCLE_TEST_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
        password: std::env::var("LIFECYCLE_TEST_DB_PASSWORD").unwrap_or_else(|_| "postgres".to_string()),
        max_pool_size: 4,
    }
}

fn harness() -> anyhow::Result<Lifecycle<TestRuntime>> {
    let db = Db::connect(&test_settings())?;
    let storage = Arc::new(InMemoryStorage::new());
    Ok(Lifecycle::new(db, storage, Arc::new(NoWebhooks), TestRuntime::new(), LifecycleConfig::default()))
}

fn body(bytes: &'static [u8]) -> storage::ByteStream {
    Box::pin(futures::stream::once(async move { Ok(Bytes::from_static(bytes)) }))
}

fn upload_request(bucket: &str, name: &str) -> UploadRequest {
    UploadRequest {
        tenant: "tenant_a".to_string(),
        bucket: bucket.to_string(),
        name: name.to_string(),
        content_length: 5,
        mime_type: Some("image/png".to_string()),
        cache_control: None,
        owner: None,
        user_metadata: None,
        req_id: None,
        body: body(b"hello"),
        is_put: false,
    }
}

#[tokio::test]
#[ignore = "requires a running Postgres instance with the objects/buckets schema applied"]
async fn upload_then_delete_removes_both_the_row_and_the_blob() {
    let lifecycle = harness().unwrap();
    let descriptor = lifecycle.upload(upload_request("avatars", "me.png")).await.unwrap();
    assert_eq!(descriptor.size, 5);

    lifecycle.delete("tenant_a", "avatars", "me.png").await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Postgres instance with the objects/buckets schema applied"]
async fn copy_within_a_bucket_leaves_the_source_intact() {
    let lifecycle = harness().unwrap();
    let src = lifecycle.upload(upload_request("avatars", "src.png")).await.unwrap();

    let dst = lifecycle
        .copy(CopyRequest {
            tenant: "tenant_a".to_string(),
            src_bucket: "avatars".to_string(),
            src_name: "src.png".to_string(),
            src_version: src.version.clone(),
            dst_bucket: "avatars".to_string(),
            dst_name: "dst.png".to_string(),
            owner: None,
            user_metadata: None,
            req_id: None,
            if_match: None,
            if_none_match: None,
        })
        .await
        .unwrap();

    assert_eq!(dst.size, src.size);
}

#[tokio::test]
#[ignore = "requires a running Postgres instance with the objects/buckets schema applied"]
async fn moving_an_object_onto_itself_is_a_no_op() {
    let lifecycle = harness().unwrap();
    let uploaded = lifecycle.upload(upload_request("avatars", "same.png")).await.unwrap();

    let moved = lifecycle
        .move_object(MoveRequest {
            tenant: "tenant_a".to_string(),
            bucket: "avatars".to_string(),
            src_name: "same.png".to_string(),
            src_version: uploaded.version.clone(),
            dst_name: "same.png".to_string(),
            req_id: None,
        })
        .await
        .unwrap();

    assert_eq!(moved.version, uploaded.version);
}

#[tokio::test]
#[ignore = "requires a running Postgres instance with the objects/buckets schema applied"]
async fn delete_many_removes_every_named_row() {
    let lifecycle = harness().unwrap();
    for name in ["a.png", "b.png", "c.png"] {
        lifecycle.upload(upload_request("avatars", name)).await.unwrap();
    }

    let deleted = lifecycle
        .delete_many("tenant_a", "avatars", &["a.png".to_string(), "b.png".to_string(), "c.png".to_string()])
        .await
        .unwrap();
    assert_eq!(deleted.len(), 3);
}
