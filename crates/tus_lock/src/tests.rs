//! End-to-end coverage for the cross-node TUS lease.
//!
//! These exercise the real advisory-lock choreography against a live
//! Postgres instance, so they're `#[ignore]`d by default - run with
//! `cargo test -p tus_lock -- --ignored` against a database reachable via
//! the `TUS_LOCK_TEST_DB_*` environment variables (each falls back to a
//! local default).

use std::{
    collections::HashMap,
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
use runtime::testing::TestRuntime;
use tokio::sync::broadcast;

use crate::{
    Broker,
    LockId,
    TusLock,
    TusLockConfig,
};

/// An in-process stand-in for the real broker backing (Redis, etc.) - one
/// broadcast channel per topic, lazily created on first publish or
/// subscribe.
#[derive(Debug, Default)]
struct InMemoryBroker {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl InMemoryBroker {
    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().unwrap();
        channels.entry(channel.to_string()).or_insert_with(|| broadcast::channel(16).0).clone()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, channel: &str, payload: String) -> anyhow::Result<()> {
        let _ = self.sender(channel).send(payload);
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        self.sender(channel).subscribe()
    }
}

fn test_settings() -> DbSettings {
    DbSettings {
        host: std::env::var("TUS_LOCK_TEST_DB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        port: std::env::var("TUS_LOCK_TEST_DB_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(5432),
        dbname: std::env::var("TUS_LOCK_TEST_DB_NAME").unwrap_or_else(|_| "storage_gateway_test".to_string()),
        user: std::env::var("TUS_LOCK_TEST_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
        password: std::env::var("TUS_LOCK_TEST_DB_PASSWORD").unwrap_or_else(|_| "postgres".to_string()),
        max_pool_size: 4,
    }
}

fn harness(config: TusLockConfig) -> anyhow::Result<TusLock<TestRuntime>> {
    let db = Db::connect(&test_settings())?;
    Ok(TusLock::new(db, Arc::new(InMemoryBroker::default()), TestRuntime::new(), config))
}

fn lock_id(key: &str) -> LockId {
    LockId { bucket: "uploads".to_string(), key: key.to_string(), version: "v1".to_string() }
}

#[tokio::test]
#[ignore = "requires a running Postgres instance with the objects/buckets schema applied"]
async fn a_fresh_lease_acquires_immediately_and_unlocks_cleanly() {
    let tus_lock = harness(TusLockConfig::default()).unwrap();
    let handle = tus_lock.lock(lock_id("resumable.bin"), Arc::new(|| {})).await.unwrap();
    handle.unlock().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Postgres instance with the objects/buckets schema applied"]
async fn a_contended_lease_expedites_release_via_the_broker() {
    let tus_lock = harness(TusLockConfig { acquisition_timeout: std::time::Duration::from_secs(5), retry_backoff: std::time::Duration::from_millis(10) }).unwrap();
    let id = lock_id("contended.bin");

    let released = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let released_writer = released.clone();
    let first = tus_lock
        .lock(
            id.clone(),
            Arc::new(move || {
                released_writer.store(true, std::sync::atomic::Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();

    let second_tus_lock = harness(TusLockConfig { acquisition_timeout: std::time::Duration::from_secs(5), retry_backoff: std::time::Duration::from_millis(10) }).unwrap();
    let waiter = tokio::spawn(async move { second_tus_lock.lock(id, Arc::new(|| {})).await });

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(released.load(std::sync::atomic::Ordering::SeqCst));
    first.unlock().await.unwrap();

    let second = waiter.await.unwrap().unwrap();
    second.unlock().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Postgres instance with the objects/buckets schema applied"]
async fn a_lease_that_never_frees_up_times_out() {
    let tus_lock = harness(TusLockConfig { acquisition_timeout: std::time::Duration::from_millis(300), retry_backoff: std::time::Duration::from_millis(10) }).unwrap();
    let id = lock_id("stuck.bin");
    let held = tus_lock.lock(id.clone(), Arc::new(|| {})).await.unwrap();

    let second_tus_lock = harness(TusLockConfig { acquisition_timeout: std::time::Duration::from_millis(300), retry_backoff: std::time::Duration::from_millis(10) }).unwrap();
    let err = second_tus_lock.lock(id, Arc::new(|| {})).await.unwrap_err();
    let err = err.downcast::<errors::ErrorMetadata>().unwrap();
    assert!(err.is_code(errors::ErrorCode::LockTimeout));

    held.unlock().await.unwrap();
}
