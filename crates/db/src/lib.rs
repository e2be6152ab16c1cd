//! Transactional database gateway (§4.F).
//!
//! Wraps a Postgres connection pool and exposes the primitives the object
//! lifecycle coordinator, multipart state machine, and TUS locker compose
//! inside their own transactions: `with_transaction`, `as_super_user`
//! (bypass row-level security for cleanup/read-modify-write flows), and the
//! advisory-lock family. Row access itself lives in [`objects`] and
//! [`multipart`].

pub mod ducklake;
pub mod iceberg;
mod metrics;
mod multipart;
mod objects;
pub mod types;

use std::{
    future::Future,
    pin::Pin,
    time::Duration,
};

use deadpool_postgres::{
    Config as PoolConfig,
    ManagerConfig,
    Pool,
    RecyclingMethod,
    Transaction,
};
use errors::ErrorMetadata;
use sha2::{
    Digest,
    Sha256,
};
use tokio_postgres::NoTls;

pub use crate::{
    multipart::*,
    objects::*,
    types::*,
};

/// Connection parameters for the backing Postgres instance. Credentials and
/// host discovery are assembled by the caller's configuration layer, which
/// is out of scope here; this type only shapes the pool itself.
#[derive(Debug, Clone)]
pub struct DbSettings {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub max_pool_size: usize,
}

#[derive(Clone)]
pub struct Db {
    pool: Pool,
    bypass_rls: bool,
}

impl Db {
    pub fn connect(settings: &DbSettings) -> anyhow::Result<Self> {
        let mut config = PoolConfig::new();
        config.host = Some(settings.host.clone());
        config.port = Some(settings.port);
        config.dbname = Some(settings.dbname.clone());
        config.user = Some(settings.user.clone());
        config.password = Some(settings.password.clone());
        config.manager = Some(ManagerConfig { recycling_method: RecyclingMethod::Fast });
        let pool = config.create_pool(Some(deadpool_postgres::Runtime::Tokio1), NoTls)?;
        Ok(Self { pool, bypass_rls: false })
    }

    #[cfg(feature = "testing")]
    pub fn from_pool(pool: Pool) -> Self {
        Self { pool, bypass_rls: false }
    }

    /// A gateway whose transactions bypass row-level security. Required for
    /// orphan cleanup and any read-modify-write flow that must observe rows
    /// the caller's own tenant scope would otherwise hide.
    pub fn as_super_user(&self) -> Self {
        Self { pool: self.pool.clone(), bypass_rls: true }
    }

    /// Run `body` inside a single transaction, committing on `Ok` and
    /// rolling back on `Err`. `body` takes the open transaction by reference
    /// so it can compose the row-level helpers in [`objects`]/[`multipart`].
    pub async fn with_transaction<F, T>(&self, body: F) -> anyhow::Result<T>
    where
        F: for<'c> FnOnce(&'c Transaction<'c>) -> Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'c>>,
    {
        let timer = metrics::transaction_timer();
        let mut client = self.pool.get().await.map_err(|e| ErrorMetadata::database_timeout(e.to_string()))?;
        let tx = client.transaction().await?;
        if self.bypass_rls {
            tx.execute("SET LOCAL row_security = off", &[]).await?;
        }
        let result = body(&tx).await;
        match result {
            Ok(value) => {
                tx.commit().await?;
                timer.finish();
                Ok(value)
            },
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            },
        }
    }

    /// Transaction-scoped advisory lock on a stable hash of `kind:id`, used
    /// by the Iceberg catalog for namespace/table-count serialization.
    pub async fn lock_resource(tx: &Transaction<'_>, kind: &str, id: &str) -> anyhow::Result<()> {
        let key = stable_hash(kind, id);
        tx.execute("SELECT pg_advisory_xact_lock($1)", &[&key]).await?;
        Ok(())
    }

    /// Non-blocking advisory lock attempt on an object version; fails with
    /// `ResourceLocked` if another transaction already holds it.
    pub async fn must_lock_object(
        tx: &Transaction<'_>,
        bucket: &str,
        name: &str,
        version: &str,
    ) -> anyhow::Result<()> {
        let key = stable_hash("object", &format!("{bucket}/{name}/{version}"));
        let row = tx.query_one("SELECT pg_try_advisory_xact_lock($1)", &[&key]).await?;
        let acquired: bool = row.get(0);
        if !acquired {
            anyhow::bail!(ErrorMetadata::resource_locked(format!("{bucket}/{name} is locked by another writer")));
        }
        Ok(())
    }

    /// Blocking advisory lock wait with a bounded timeout, used before
    /// reading an object row `FOR UPDATE` in copy/move/upload.
    pub async fn wait_object_lock(
        tx: &Transaction<'_>,
        bucket: &str,
        name: &str,
        version: Option<&str>,
        timeout: Duration,
    ) -> anyhow::Result<()> {
        let scope = version.map(|v| format!("{bucket}/{name}/{v}")).unwrap_or_else(|| format!("{bucket}/{name}"));
        let key = stable_hash("object", &scope);
        tx.execute(&format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis()), &[]).await?;
        let result = tx.execute("SELECT pg_advisory_xact_lock($1)", &[&key]).await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_lock_timeout(&e) => {
                anyhow::bail!(ErrorMetadata::lock_timeout(format!("timed out waiting for lock on {bucket}/{name}")))
            },
            Err(e) => Err(e.into()),
        }
    }
}

fn is_lock_timeout(e: &tokio_postgres::Error) -> bool {
    e.code().map(|c| c.code() == "55P03").unwrap_or(false)
}

/// A stable 63-bit hash of `kind:id`, used as the key for
/// `pg_advisory_xact_lock`. Postgres advisory locks take a single `bigint`;
/// folding to 63 bits keeps the value representable as a signed `i64`.
pub fn stable_hash(kind: &str, id: &str) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update(b":");
    hasher.update(id.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (i64::from_be_bytes(bytes)) & i64::MAX
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_hash_is_deterministic_and_scoped_by_kind() {
        assert_eq!(stable_hash("object", "b/k/v1"), stable_hash("object", "b/k/v1"));
        assert_ne!(stable_hash("object", "b/k/v1"), stable_hash("namespace", "b/k/v1"));
        assert!(stable_hash("object", "b/k/v1") >= 0);
    }

    #[test]
    fn cursor_roundtrips_through_encoding() {
        let cursor = Cursor {
            last_name: "a/b.png".to_string(),
            order: CursorOrder::Asc,
            sort_column: CursorColumn::Name,
            after_ts_millis: Some(1_700_000_000_000),
        };
        let encoded = cursor.encode().unwrap();
        let decoded = Cursor::decode(&encoded).unwrap();
        assert_eq!(decoded.last_name, cursor.last_name);
        assert_eq!(decoded.after_ts_millis, cursor.after_ts_millis);
    }
}
