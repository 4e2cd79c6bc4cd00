use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use warden_core::{AppError, AppResult};

/// Clock port; tests drive it manually.
pub trait TimeSource: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Ticker lease claimed from a distributed coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerLease {
    /// Scope key the lease covers.
    pub scope_key: String,
    /// Holder identity.
    pub holder_id: String,
    /// Ownership token used for compare-and-delete.
    pub token: String,
}

/// Distributed coordination port keeping one ticker per shard.
#[async_trait]
pub trait TickerLeaseCoordinator: Send + Sync {
    /// Attempts to acquire the lease for the scope.
    async fn try_acquire_lease(
        &self,
        scope_key: &str,
        holder_id: &str,
        lease_seconds: u32,
    ) -> AppResult<Option<TickerLease>>;

    /// Releases the lease when the token still owns it.
    async fn release_lease(&self, lease: &TickerLease) -> AppResult<()>;

    /// Renews the lease and returns false when ownership moved.
    async fn renew_lease(&self, lease: &TickerLease, lease_seconds: u32) -> AppResult<bool>;
}

/// Engine knobs supplied by the binaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// How far ahead instances are materialized.
    pub materialization_horizon: TimeDelta,
    /// Bound on one store commit.
    pub store_timeout: Duration,
    /// Extra attempts after a retryable store failure.
    pub store_retry_budget: u32,
    /// Linear backoff step between attempts.
    pub store_retry_backoff: Duration,
    /// Bound on approval notification delivery.
    pub notify_timeout: Duration,
    /// How far in the past a requested start may lie.
    pub far_past_tolerance: TimeDelta,
    /// Cap on `$top`.
    pub max_page_size: usize,
    /// Deepest accepted `$expand` chain.
    pub max_expand_depth: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            materialization_horizon: TimeDelta::hours(168),
            store_timeout: Duration::from_millis(5_000),
            store_retry_budget: 3,
            store_retry_backoff: Duration::from_millis(100),
            notify_timeout: Duration::from_millis(5_000),
            far_past_tolerance: TimeDelta::minutes(1_440),
            max_page_size: 999,
            max_expand_depth: 1,
        }
    }
}

/// Slice of schedules one ticker instance is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickerShard {
    index: u32,
    count: u32,
}

impl TickerShard {
    /// Creates a shard; `index` must be below `count`.
    pub fn new(index: u32, count: u32) -> AppResult<Self> {
        if count == 0 || index >= count {
            return Err(AppError::Validation(format!(
                "ticker shard index {index} must be below shard count {count}"
            )));
        }

        Ok(Self { index, count })
    }

    /// The single shard owning every schedule.
    #[must_use]
    pub fn all() -> Self {
        Self { index: 0, count: 1 }
    }

    /// Returns the shard index.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Returns the shard count.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Returns whether the schedule id hashes into this shard.
    #[must_use]
    pub fn owns(&self, schedule_id: &str) -> bool {
        // FNV-1a; must not change between releases.
        let hash = schedule_id
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
                (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
            });
        hash % u64::from(self.count) == u64::from(self.index)
    }
}

/// Counters reported by one ticker pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Live schedules inspected.
    pub schedules_scanned: u64,
    /// Instances written by re-materialization.
    pub instances_created: u64,
    /// Instances removed because they ended or their schedule ended.
    pub instances_reaped: u64,
    /// Schedules moved to `Expired`.
    pub schedules_expired: u64,
    /// Pending approvals denied by timeout.
    pub approvals_timed_out: u64,
}

impl TickReport {
    /// Adds another report's counters.
    pub fn absorb(&mut self, other: TickReport) {
        self.schedules_scanned += other.schedules_scanned;
        self.instances_created += other.instances_created;
        self.instances_reaped += other.instances_reaped;
        self.schedules_expired += other.schedules_expired;
        self.approvals_timed_out += other.approvals_timed_out;
    }
}
