//! Abstraction over wall-clock time, randomness, and task spawning so the
//! coordinator (lifecycle, multipart, TUS lock) can be driven deterministically
//! under test instead of against a live clock.

use std::{
    future::Future,
    pin::Pin,
    time::{
        Duration,
        SystemTime,
        UNIX_EPOCH,
    },
};

use async_trait::async_trait;
use rand::{
    RngCore,
    SeedableRng,
};
use uuid::Uuid;

#[cfg(feature = "testing")]
pub mod testing;

/// A Unix timestamp in whole milliseconds, matching the webhook payload's
/// `applyTime`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnixTimestamp(Duration);

impl UnixTimestamp {
    pub fn as_millis(&self) -> u64 {
        self.0.as_millis() as u64
    }
}

#[async_trait]
pub trait Runtime: Clone + Send + Sync + 'static {
    /// Sleep for the given duration. Used for the TUS lock retry backoff and
    /// the 15s acquisition timeout.
    async fn wait(&self, duration: Duration);

    /// Spawn a detached background task, e.g. the orphan-cleanup sweeper.
    fn spawn(&self, name: &'static str, fut: Pin<Box<dyn Future<Output = ()> + Send>>);

    fn system_time(&self) -> SystemTime;

    fn unix_timestamp(&self) -> UnixTimestamp {
        UnixTimestamp(
            self.system_time()
                .duration_since(UNIX_EPOCH)
                .expect("system clock is before the Unix epoch"),
        )
    }

    fn rng(&self) -> Box<dyn RngCore + Send>;

    /// A fresh object version / upload id. Content-addressed by a random id,
    /// per the data model's versioning invariant.
    fn new_uuid_v4(&self) -> Uuid {
        let mut rng = self.rng();
        let mut bytes = [0u8; 16];
        rng.fill_bytes(&mut bytes);
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }
}

#[derive(Clone, Copy, Default)]
pub struct TokioRuntime;

#[async_trait]
impl Runtime for TokioRuntime {
    async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn(&self, name: &'static str, fut: Pin<Box<dyn Future<Output = ()> + Send>>) {
        let task = async move {
            fut.await;
        };
        let handle = tokio::spawn(task);
        // Detach: failures are logged by the task itself. We still tag the
        // join error with the task name for diagnosability.
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                tracing::error!(task = name, error = %e, "background task panicked");
            }
        });
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    fn rng(&self) -> Box<dyn RngCore + Send> {
        Box::new(rand::rngs::StdRng::from_entropy())
    }
}
