use crate::domain::lock::LockToken;
use crate::domain::ports::{ClockRef, LockStore};
use crate::error::{BillingError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy)]
struct Lease {
    token: LockToken,
    expires_at: DateTime<Utc>,
}

/// Lock store for a single process (tests, CLI runs).
///
/// Expiry is measured with the injected clock so tests can let a lease lapse
/// without sleeping.
#[derive(Clone)]
pub struct InMemoryLockStore {
    clock: ClockRef,
    leases: Arc<Mutex<HashMap<String, Lease>>>,
}

impl InMemoryLockStore {
    pub fn new(clock: ClockRef) -> Self {
        Self {
            clock,
            leases: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn expiry(&self, ttl: Duration) -> Result<DateTime<Utc>> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| BillingError::ValidationError(format!("invalid lock ttl: {e}")))?;
        Ok(self.clock.now() + ttl)
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn set_if_absent(&self, key: &str, token: LockToken, ttl: Duration) -> Result<bool> {
        let expires_at = self.expiry(ttl)?;
        let now = self.clock.now();
        let mut leases = self.leases.lock().await;
        match leases.get(key) {
            Some(lease) if lease.expires_at > now => Ok(false),
            _ => {
                leases.insert(key.to_string(), Lease { token, expires_at });
                Ok(true)
            }
        }
    }

    async fn compare_and_renew(&self, key: &str, token: LockToken, ttl: Duration) -> Result<bool> {
        let expires_at = self.expiry(ttl)?;
        let now = self.clock.now();
        let mut leases = self.leases.lock().await;
        match leases.get_mut(key) {
            Some(lease) if lease.token == token && lease.expires_at > now => {
                lease.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn compare_and_delete(&self, key: &str, token: LockToken) -> Result<bool> {
        let now = self.clock.now();
        let mut leases = self.leases.lock().await;
        match leases.get(key) {
            Some(lease) if lease.token == token => {
                let live = lease.expires_at > now;
                leases.remove(key);
                Ok(live)
            }
            _ => Ok(false),
        }
    }
}
