//! TUS cross-node resumable-upload lock (§4.K).
//!
//! A client holds a lease on `(bucket, key, version)` across many HTTP
//! requests while streaming a resumable upload. The DB advisory lock
//! (`db::Db::must_lock_object`) gives correctness across nodes; a broker
//! channel is an expediter so the current holder releases promptly rather
//! than after its idle timeout, per §5's shared-state notes.

mod core;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use async_trait::async_trait;
use runtime::Runtime;
use tokio::sync::broadcast;

pub use crate::core::{
    LockHandle,
    LockId,
};

/// Broadcast channel name a blocked acquirer publishes on to expedite the
/// current holder's release (§6 broker channels).
pub const REQUEST_LOCK_RELEASE: &str = "REQUEST_LOCK_RELEASE";

/// Abstracts the cross-process pub/sub fabric. Left as a trait because the
/// broker backing (Redis, or an in-memory bus for a single-process
/// deployment) is a deployment concern outside this component's scope.
#[async_trait]
pub trait Broker: Send + Sync + std::fmt::Debug {
    async fn publish(&self, channel: &str, payload: String) -> anyhow::Result<()>;

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String>;
}

#[derive(Debug, Clone)]
pub struct TusLockConfig {
    /// Overall bound on lock acquisition (§5: 15s).
    pub acquisition_timeout: std::time::Duration,
    /// Sleep between `mustLockObject` retries (§4.K: 100ms).
    pub retry_backoff: std::time::Duration,
}

impl Default for TusLockConfig {
    fn default() -> Self {
        Self { acquisition_timeout: std::time::Duration::from_secs(15), retry_backoff: std::time::Duration::from_millis(100) }
    }
}

#[derive(Clone)]
pub struct TusLock<RT: Runtime> {
    pub(crate) db: db::Db,
    pub(crate) broker: Arc<dyn Broker>,
    pub(crate) runtime: RT,
    pub(crate) config: TusLockConfig,
}

impl<RT: Runtime> TusLock<RT> {
    pub fn new(db: db::Db, broker: Arc<dyn Broker>, runtime: RT, config: TusLockConfig) -> Self {
        Self { db, broker, runtime, config }
    }
}
