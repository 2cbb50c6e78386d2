use crate::config::LockConfig;
use crate::domain::lock::{Acquire, LockKey, LockStatus, LockToken};
use crate::domain::ports::LockStoreRef;
use crate::error::{BillingError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, interval_at};

/// Non-blocking distributed mutual exclusion over a [`LockStore`](crate::domain::ports::LockStore).
///
/// `acquire` never waits: contention comes back as [`Acquire::Busy`] and the
/// caller reschedules. Renew and release are fenced by the token handed out
/// on acquisition, so a holder whose lease expired cannot touch a key that
/// has since been taken by someone else.
pub struct LockManager {
    store: LockStoreRef,
    prefix: String,
}

impl LockManager {
    pub fn new(store: LockStoreRef, config: &LockConfig) -> Self {
        Self {
            store,
            prefix: config.key_prefix.clone(),
        }
    }

    fn namespaced(&self, key: &LockKey) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub async fn acquire(&self, key: &LockKey, ttl: Duration) -> Result<Acquire> {
        let token = LockToken::new();
        if self
            .store
            .set_if_absent(&self.namespaced(key), token, ttl)
            .await?
        {
            tracing::trace!(lock = %key, %token, "Lock acquired");
            Ok(Acquire::Acquired(token))
        } else {
            tracing::debug!(lock = %key, "Lock busy");
            Ok(Acquire::Busy)
        }
    }

    pub async fn renew(&self, key: &LockKey, token: LockToken, ttl: Duration) -> Result<LockStatus> {
        if self
            .store
            .compare_and_renew(&self.namespaced(key), token, ttl)
            .await?
        {
            Ok(LockStatus::Ok)
        } else {
            Ok(LockStatus::Stale)
        }
    }

    pub async fn release(&self, key: &LockKey, token: LockToken) -> Result<LockStatus> {
        if self
            .store
            .compare_and_delete(&self.namespaced(key), token)
            .await?
        {
            tracing::trace!(lock = %key, %token, "Lock released");
            Ok(LockStatus::Ok)
        } else {
            Ok(LockStatus::Stale)
        }
    }

    /// Runs `op` while holding `key`.
    ///
    /// Fails with [`BillingError::LockBusy`] without running `op` when the key
    /// is held. While `op` runs the lease is renewed every `ttl / 3`; if a
    /// renewal comes back stale the operation is dropped and the call fails
    /// with [`BillingError::LockLost`]. The lock is released in every case.
    pub async fn run_exclusive<T, F, Fut>(&self, key: &LockKey, ttl: Duration, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let token = match self.acquire(key, ttl).await? {
            Acquire::Acquired(token) => token,
            Acquire::Busy => return Err(BillingError::LockBusy(key.to_string())),
        };

        let result = self.hold(key, token, ttl, op()).await;

        match self.release(key, token).await {
            Ok(LockStatus::Ok) => {}
            Ok(LockStatus::Stale) => {
                tracing::warn!(lock = %key, %token, "Lock expired before release");
            }
            Err(e) => {
                // the lease still expires on its own
                tracing::warn!(lock = %key, error = %e, "Failed to release lock");
            }
        }
        result
    }

    async fn hold<T, Fut>(&self, key: &LockKey, token: LockToken, ttl: Duration, op: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let period = (ttl / 3).max(Duration::from_millis(10));
        let mut heartbeat = interval_at(Instant::now() + period, period);
        tokio::pin!(op);

        loop {
            tokio::select! {
                result = &mut op => return result,
                _ = heartbeat.tick() => {
                    match self.renew(key, token, ttl).await {
                        Ok(LockStatus::Ok) => {
                            tracing::trace!(lock = %key, "Lock renewed");
                        }
                        Ok(LockStatus::Stale) => {
                            tracing::error!(lock = %key, %token, "Lock lost while operation was running");
                            return Err(BillingError::LockLost(key.to_string()));
                        }
                        Err(e) => {
                            tracing::warn!(lock = %key, error = %e, "Lock renewal failed");
                        }
                    }
                }
            }
        }
    }
}
