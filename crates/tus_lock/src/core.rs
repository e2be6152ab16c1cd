use std::sync::Arc;

use errors::ErrorMetadata;
use runtime::Runtime;
use tokio::sync::{
    broadcast,
    oneshot,
};

use crate::{
    Broker,
    TusLock,
    TusLockConfig,
    REQUEST_LOCK_RELEASE,
};

#[derive(Debug, Clone)]
pub struct LockId {
    pub bucket: String,
    pub key: String,
    pub version: String,
}

impl LockId {
    fn scope(&self) -> String {
        format!("{}/{}/{}", self.bucket, self.key, self.version)
    }
}

/// A held lease. The advisory lock and its backing transaction live on a
/// spawned task until [`LockHandle::unlock`] is called; dropping this
/// without unlocking leaks both until the process exits.
pub struct LockHandle {
    release_tx: Option<oneshot::Sender<()>>,
    done_rx: oneshot::Receiver<anyhow::Result<()>>,
}

impl LockHandle {
    /// Signals the holder task to commit its transaction (releasing the
    /// advisory lock) and stop listening for release requests.
    pub async fn unlock(mut self) -> anyhow::Result<()> {
        if let Some(tx) = self.release_tx.take() {
            let _ = tx.send(());
        }
        match self.done_rx.await {
            Ok(result) => result,
            Err(_) => anyhow::bail!("lock holder task terminated before acknowledging unlock"),
        }
    }
}

impl<RT: Runtime> TusLock<RT> {
    /// Acquires the lease on `id`. Retries through `ResourceLocked`,
    /// publishing a release request each time to expedite the current
    /// holder, bounded by `config.acquisition_timeout` overall. Once held,
    /// `on_release` fires every time another node requests this lease back -
    /// it's the caller's job to wrap up and call [`LockHandle::unlock`]
    /// promptly in response.
    pub async fn lock(&self, id: LockId, on_release: Arc<dyn Fn() + Send + Sync>) -> anyhow::Result<LockHandle> {
        let (ack_tx, ack_rx) = oneshot::channel::<anyhow::Result<()>>();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel::<anyhow::Result<()>>();

        let db = self.db.clone();
        let broker = self.broker.clone();
        let runtime = self.runtime.clone();
        let config = self.config.clone();
        self.runtime.spawn(
            "tus_lock_holder",
            Box::pin(async move {
                let result = hold(db, broker, runtime, config, id, on_release, ack_tx, release_rx).await;
                let _ = done_tx.send(result);
            }),
        );

        ack_rx.await.map_err(|_| anyhow::anyhow!("lock holder task terminated before acquiring the lease"))??;
        Ok(LockHandle { release_tx: Some(release_tx), done_rx })
    }
}

/// Runs on its own task for the lifetime of the lease: opens the
/// transaction, acquires the advisory lock (acking the caller as soon as
/// it's held), then waits for either an explicit unlock or a release
/// request addressed to this scope.
async fn hold<RT: Runtime>(
    db: db::Db,
    broker: Arc<dyn Broker>,
    runtime: RT,
    config: TusLockConfig,
    id: LockId,
    on_release: Arc<dyn Fn() + Send + Sync>,
    ack_tx: oneshot::Sender<anyhow::Result<()>>,
    release_rx: oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let scope = id.scope();
    let result = db
        .with_transaction(move |tx| {
            let scope = scope.clone();
            let broker = broker.clone();
            let runtime = runtime.clone();
            let config = config.clone();
            Box::pin(async move {
                let acquired = tokio::time::timeout(config.acquisition_timeout, acquire(tx, &id, &*broker, &runtime, &config)).await;
                match acquired {
                    Ok(Ok(())) => {},
                    Ok(Err(e)) => {
                        let _ = ack_tx.send(Err(anyhow::anyhow!("{e}")));
                        return Err(e);
                    },
                    Err(_) => {
                        let timeout_err = anyhow::Error::new(ErrorMetadata::lock_timeout(format!("timed out waiting for the lease on {scope}")));
                        let _ = ack_tx.send(Err(anyhow::anyhow!("{timeout_err}")));
                        return Err(timeout_err);
                    },
                }
                let _ = ack_tx.send(Ok(()));

                let mut release_requests = broker.subscribe(REQUEST_LOCK_RELEASE);
                let mut release_rx = release_rx;
                loop {
                    tokio::select! {
                        _ = &mut release_rx => return Ok(()),
                        message = release_requests.recv() => match message {
                            Ok(requested_scope) if requested_scope == scope => on_release(),
                            Ok(_) => {},
                            Err(broadcast::error::RecvError::Lagged(_)) => {},
                            Err(broadcast::error::RecvError::Closed) => {},
                        },
                    }
                }
            })
        })
        .await;
    if let Err(e) = &result {
        tracing::warn!(error = %e, "tus lock holder transaction ended with an error");
    }
    result
}

/// Non-blocking retry loop against `mustLockObject`, publishing a release
/// request on every `ResourceLocked` to expedite the current holder. Has no
/// timeout of its own - the caller races it against one with
/// `tokio::time::timeout`, so either completion aborts the other.
async fn acquire<RT: Runtime>(tx: &tokio_postgres::Transaction<'_>, id: &LockId, broker: &dyn Broker, runtime: &RT, config: &TusLockConfig) -> anyhow::Result<()> {
    loop {
        match db::Db::must_lock_object(tx, &id.bucket, &id.key, &id.version).await {
            Ok(()) => return Ok(()),
            Err(e) if is_resource_locked(&e) => {
                let _ = broker.publish(REQUEST_LOCK_RELEASE, id.scope()).await;
                runtime.wait(config.retry_backoff).await;
            },
            Err(e) => return Err(e),
        }
    }
}

fn is_resource_locked(e: &anyhow::Error) -> bool {
    e.downcast_ref::<ErrorMetadata>().is_some_and(|m| m.is_code(errors::ErrorCode::ResourceLocked))
}
