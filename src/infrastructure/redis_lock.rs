use crate::config::LockBackendConfig;
use crate::domain::lock::LockToken;
use crate::domain::ports::LockStore;
use crate::error::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::time::Duration;

const RENEW_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Lock store shared by every worker process through Redis.
///
/// Acquisition is a single `SET key token NX PX ttl`; renew and release run as
/// Lua scripts so the token comparison and the write are one atomic step.
#[derive(Clone)]
pub struct RedisLockStore {
    manager: ConnectionManager,
    renew: Script,
    release: Script,
}

impl RedisLockStore {
    pub async fn connect(config: &LockBackendConfig) -> Result<Self> {
        let url = format!("redis://{}:{}/{}", config.host, config.port, config.db);
        tracing::info!(host = %config.host, port = config.port, db = config.db, "Connecting lock store to Redis");
        let client = Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self {
            manager,
            renew: Script::new(RENEW_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        })
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn set_if_absent(&self, key: &str, token: LockToken, ttl: Duration) -> Result<bool> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token.to_string())
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn compare_and_renew(&self, key: &str, token: LockToken, ttl: Duration) -> Result<bool> {
        let mut conn = self.manager.clone();
        let renewed: i64 = self
            .renew
            .key(key)
            .arg(token.to_string())
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(renewed == 1)
    }

    async fn compare_and_delete(&self, key: &str, token: LockToken) -> Result<bool> {
        let mut conn = self.manager.clone();
        let deleted: i64 = self
            .release
            .key(key)
            .arg(token.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }
}
