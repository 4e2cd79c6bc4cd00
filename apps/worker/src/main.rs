//! Warden schedule ticker worker.

#![forbid(unsafe_code)]

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::TimeDelta;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use warden_application::{
    ApprovalService, AuditTrail, AuthorizationService, DirectoryService, EngineSettings,
    RoleDefinitionRegistry, ScheduleController, ScheduleRequestService, ScheduleTicker,
    TickerLeaseCoordinator, TickerShard,
};
use warden_core::{AppError, AppResult};
use warden_infrastructure::{
    PostgresRoleManagementStore, RedisTickerLeaseCoordinator, SystemTimeSource,
    TracingApprovalNotifier,
};

const LEASE_KEY_PREFIX: &str = "warden:ticker";

#[derive(Debug, Clone)]
struct WorkerConfig {
    database_url: String,
    redis_url: Option<String>,
    worker_id: String,
    shard: TickerShard,
    lease_seconds: u32,
    tick_interval: Duration,
    engine: EngineSettings,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let pool = connect_pool(config.database_url.as_str()).await?;
    let ticker = build_ticker(pool, config.engine.clone());
    let coordinator = config
        .redis_url
        .as_deref()
        .map(|redis_url| {
            redis::Client::open(redis_url)
                .map(|client| RedisTickerLeaseCoordinator::new(client, LEASE_KEY_PREFIX))
                .map_err(|error| AppError::Validation(format!("invalid REDIS_URL: {error}")))
        })
        .transpose()?;

    if coordinator.is_none() {
        warn!(
            worker_id = %config.worker_id,
            "REDIS_URL is not set; run a single worker per shard"
        );
    }

    info!(
        worker_id = %config.worker_id,
        shard_index = config.shard.index(),
        lease_seconds = config.lease_seconds,
        tick_interval_seconds = config.tick_interval.as_secs(),
        "warden-worker started"
    );

    let mut ticks = tokio::time::interval(config.tick_interval);
    loop {
        ticks.tick().await;

        let result = match &coordinator {
            Some(coordinator) => run_leased(coordinator, &ticker, &config).await,
            None => ticker.run_all(config.shard).await.map(|_| ()),
        };
        if let Err(error) = result {
            warn!(
                worker_id = %config.worker_id,
                error = %error,
                retryable = error.is_retryable(),
                "schedule tick failed"
            );
        }
    }
}

async fn run_leased(
    coordinator: &RedisTickerLeaseCoordinator,
    ticker: &ScheduleTicker,
    config: &WorkerConfig,
) -> AppResult<()> {
    let scope_key = shard_scope_key(config.shard);
    let Some(lease) = coordinator
        .try_acquire_lease(&scope_key, &config.worker_id, config.lease_seconds)
        .await?
    else {
        debug!(
            worker_id = %config.worker_id,
            scope_key,
            "ticker lease is held by another worker"
        );
        return Ok(());
    };

    let started = Instant::now();
    let outcome = ticker.run_all(config.shard).await;
    if started.elapsed() >= Duration::from_secs(u64::from(config.lease_seconds)) {
        warn!(
            worker_id = %config.worker_id,
            scope_key,
            elapsed_ms = started.elapsed().as_millis(),
            "ticker pass outlived its lease"
        );
    }

    if let Err(error) = coordinator.release_lease(&lease).await {
        warn!(
            worker_id = %config.worker_id,
            scope_key,
            error = %error,
            "failed to release ticker lease"
        );
    }

    outcome.map(|_| ())
}

fn shard_scope_key(shard: TickerShard) -> String {
    format!("shard-{}-of-{}", shard.index(), shard.count())
}

async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

fn build_ticker(pool: PgPool, settings: EngineSettings) -> ScheduleTicker {
    let store = Arc::new(PostgresRoleManagementStore::new(pool));
    let clock = Arc::new(SystemTimeSource);
    let directory = DirectoryService::new(store.clone());
    let registry = RoleDefinitionRegistry::new(store.clone());
    let audit = AuditTrail::new(store.clone());
    let authorization = AuthorizationService::new(
        registry.clone(),
        directory.clone(),
        store.clone(),
        store.clone(),
        clock.clone(),
    );
    let approvals = ApprovalService::new(
        store.clone(),
        Arc::new(TracingApprovalNotifier::new()),
        registry.clone(),
        directory.clone(),
        authorization.clone(),
        settings.clone(),
    );
    let controller = ScheduleController::new(store.clone(), audit, clock.clone(), settings);
    let requests = ScheduleRequestService::new(
        store,
        registry,
        directory,
        authorization,
        approvals,
        controller.clone(),
        clock,
    );

    ScheduleTicker::new(controller, requests)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

impl WorkerConfig {
    fn load() -> AppResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = optional(&lookup, "DATABASE_URL")
            .ok_or_else(|| AppError::Validation("DATABASE_URL is required".to_owned()))?;
        let worker_id = optional(&lookup, "WORKER_ID")
            .map(|value| value.trim().to_owned())
            .unwrap_or_else(|| format!("worker-{}", std::process::id()));
        let shard = TickerShard::new(
            parse_or(&lookup, "WORKER_SHARD_INDEX", 0)?,
            parse_or(&lookup, "WORKER_SHARD_COUNT", 1)?,
        )?;
        let lease_seconds: u32 = parse_or(&lookup, "WORKER_LEASE_SECONDS", 90)?;
        if lease_seconds == 0 {
            return Err(AppError::Validation(
                "WORKER_LEASE_SECONDS must be greater than zero".to_owned(),
            ));
        }

        let defaults = EngineSettings::default();
        let engine = EngineSettings {
            materialization_horizon: TimeDelta::hours(parse_or(
                &lookup,
                "MATERIALIZATION_HORIZON_HOURS",
                defaults.materialization_horizon.num_hours(),
            )?),
            store_timeout: Duration::from_millis(parse_or(
                &lookup,
                "STORE_TIMEOUT_MS",
                u64::try_from(defaults.store_timeout.as_millis()).unwrap_or(u64::MAX),
            )?),
            store_retry_budget: parse_or(
                &lookup,
                "STORE_RETRY_BUDGET",
                defaults.store_retry_budget,
            )?,
            ..defaults
        };

        Ok(Self {
            database_url,
            redis_url: optional(&lookup, "REDIS_URL"),
            worker_id,
            shard,
            lease_seconds,
            tick_interval: Duration::from_secs(
                parse_or::<u64, _>(&lookup, "TICKER_INTERVAL_SECONDS", 60)?.max(1),
            ),
            engine,
        })
    }
}

fn optional<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).filter(|value| !value.trim().is_empty())
}

fn parse_or<T, F>(lookup: &F, name: &str, default: T) -> AppResult<T>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match optional(lookup, name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|error| AppError::Validation(format!("invalid {name} '{value}': {error}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> AppResult<WorkerConfig> {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect();
        WorkerConfig::from_lookup(|name| values.get(name).cloned())
    }

    #[test]
    fn defaults_cover_a_single_shard() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/warden")])
            .unwrap_or_else(|error| panic!("config should load: {error}"));

        assert_eq!(config.shard, TickerShard::all());
        assert_eq!(config.lease_seconds, 90);
        assert_eq!(config.tick_interval, Duration::from_secs(60));
        assert!(config.worker_id.starts_with("worker-"));
        assert!(config.redis_url.is_none());
        assert_eq!(shard_scope_key(config.shard), "shard-0-of-1");
    }

    #[test]
    fn database_url_is_required() {
        assert!(matches!(load(&[]), Err(AppError::Validation(_))));
    }

    #[test]
    fn shard_index_must_fit_the_count() {
        let result = load(&[
            ("DATABASE_URL", "postgres://localhost/warden"),
            ("WORKER_SHARD_INDEX", "2"),
            ("WORKER_SHARD_COUNT", "2"),
        ]);

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn zero_lease_is_rejected() {
        let result = load(&[
            ("DATABASE_URL", "postgres://localhost/warden"),
            ("WORKER_LEASE_SECONDS", "0"),
        ]);

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn engine_knobs_override_defaults() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/warden"),
            ("WORKER_ID", "ticker-a"),
            ("MATERIALIZATION_HORIZON_HOURS", "48"),
            ("STORE_TIMEOUT_MS", "750"),
        ])
        .unwrap_or_else(|error| panic!("config should load: {error}"));

        assert_eq!(config.worker_id, "ticker-a");
        assert_eq!(config.engine.materialization_horizon, TimeDelta::hours(48));
        assert_eq!(config.engine.store_timeout, Duration::from_millis(750));
    }
}
