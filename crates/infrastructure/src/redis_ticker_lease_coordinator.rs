//! Redis-backed lease keeping a single ticker per shard.

use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use warden_application::{TickerLease, TickerLeaseCoordinator};
use warden_core::{AppError, AppResult};

const RELEASE_LEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
else
  return 0
end
"#;

const RENEW_LEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('EXPIRE', KEYS[1], ARGV[2])
else
  return 0
end
"#;

/// Redis implementation of ticker lease coordination.
#[derive(Clone)]
pub struct RedisTickerLeaseCoordinator {
    client: redis::Client,
    key_prefix: String,
}

impl RedisTickerLeaseCoordinator {
    /// Creates one coordinator adapter.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    fn key_for(&self, scope_key: &str) -> String {
        format!("{}:{scope_key}", self.key_prefix)
    }

    async fn connection(&self) -> AppResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Transient(format!("failed to connect to redis: {error}")))
    }
}

fn ensure_lease_seconds(lease_seconds: u32) -> AppResult<()> {
    if lease_seconds == 0 {
        return Err(AppError::Validation(
            "ticker lease_seconds must be greater than zero".to_owned(),
        ));
    }

    Ok(())
}

#[async_trait]
impl TickerLeaseCoordinator for RedisTickerLeaseCoordinator {
    async fn try_acquire_lease(
        &self,
        scope_key: &str,
        holder_id: &str,
        lease_seconds: u32,
    ) -> AppResult<Option<TickerLease>> {
        if scope_key.trim().is_empty() {
            return Err(AppError::Validation(
                "ticker lease scope_key must not be empty".to_owned(),
            ));
        }
        if holder_id.trim().is_empty() {
            return Err(AppError::Validation(
                "ticker lease holder_id must not be empty".to_owned(),
            ));
        }
        ensure_lease_seconds(lease_seconds)?;

        let key = self.key_for(scope_key);
        let token = format!("{holder_id}:{}", uuid::Uuid::new_v4());
        let mut connection = self.connection().await?;

        let acquired: bool = connection
            .set_nx(key.as_str(), token.as_str())
            .await
            .map_err(|error| {
                AppError::Transient(format!("failed to acquire ticker lease: {error}"))
            })?;
        if !acquired {
            return Ok(None);
        }

        connection
            .expire::<_, ()>(key.as_str(), i64::from(lease_seconds))
            .await
            .map_err(|error| {
                AppError::Transient(format!("failed to set ticker lease ttl: {error}"))
            })?;

        Ok(Some(TickerLease {
            scope_key: scope_key.to_owned(),
            holder_id: holder_id.to_owned(),
            token,
        }))
    }

    async fn release_lease(&self, lease: &TickerLease) -> AppResult<()> {
        let key = self.key_for(lease.scope_key.as_str());
        let mut connection = self.connection().await?;

        Script::new(RELEASE_LEASE_SCRIPT)
            .key(key)
            .arg(lease.token.as_str())
            .invoke_async::<i32>(&mut connection)
            .await
            .map_err(|error| {
                AppError::Transient(format!("failed to release ticker lease: {error}"))
            })?;

        Ok(())
    }

    async fn renew_lease(&self, lease: &TickerLease, lease_seconds: u32) -> AppResult<bool> {
        ensure_lease_seconds(lease_seconds)?;

        let key = self.key_for(lease.scope_key.as_str());
        let mut connection = self.connection().await?;

        let renewed = Script::new(RENEW_LEASE_SCRIPT)
            .key(key)
            .arg(lease.token.as_str())
            .arg(i64::from(lease_seconds))
            .invoke_async::<i32>(&mut connection)
            .await
            .map_err(|error| {
                AppError::Transient(format!("failed to renew ticker lease: {error}"))
            })?;

        Ok(renewed > 0)
    }
}
