use std::env;
use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use tracing_subscriber::EnvFilter;
use warden_application::EngineSettings;
use warden_core::{AppError, AppResult};

const MIN_GATEWAY_SECRET_LENGTH: usize = 32;

/// Backing store selected by `WARDEN_STORE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres { database_url: String },
}

/// Approval notification channel selected by `APPROVAL_NOTIFIER`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierConfig {
    Log,
    Webhook { url: String },
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub migrate_only: bool,
    pub store: StoreBackend,
    pub api_host: String,
    pub api_port: u16,
    pub gateway_shared_secret: String,
    pub bootstrap_admin_principal_id: Option<String>,
    pub dev_seed: bool,
    pub embedded_ticker: bool,
    pub ticker_interval: Duration,
    pub engine: EngineSettings,
    pub notifier: NotifierConfig,
    pub redis_url: Option<String>,
}

impl ApiConfig {
    pub fn load() -> Result<Self, AppError> {
        let migrate_only = env::args().nth(1).as_deref() == Some("migrate");
        Self::from_lookup(migrate_only, |name| env::var(name).ok())
    }

    fn from_lookup<F>(migrate_only: bool, lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let store = match optional(&lookup, "WARDEN_STORE")
            .unwrap_or_else(|| "memory".to_owned())
            .as_str()
        {
            "memory" => StoreBackend::Memory,
            "postgres" => StoreBackend::Postgres {
                database_url: required_non_empty(&lookup, "DATABASE_URL")?,
            },
            other => {
                return Err(AppError::Validation(format!(
                    "WARDEN_STORE must be either 'memory' or 'postgres', got '{other}'"
                )));
            }
        };
        if migrate_only && store == StoreBackend::Memory {
            return Err(AppError::Validation(
                "migrate requires WARDEN_STORE=postgres".to_owned(),
            ));
        }

        let gateway_shared_secret = required_non_empty(&lookup, "GATEWAY_SHARED_SECRET")?;
        if gateway_shared_secret.len() < MIN_GATEWAY_SECRET_LENGTH {
            return Err(AppError::Validation(format!(
                "GATEWAY_SHARED_SECRET must be at least {MIN_GATEWAY_SECRET_LENGTH} characters"
            )));
        }

        let notifier = match optional(&lookup, "APPROVAL_NOTIFIER")
            .unwrap_or_else(|| "log".to_owned())
            .as_str()
        {
            "log" => NotifierConfig::Log,
            "webhook" => NotifierConfig::Webhook {
                url: required_non_empty(&lookup, "APPROVAL_WEBHOOK_URL")?,
            },
            other => {
                return Err(AppError::Validation(format!(
                    "APPROVAL_NOTIFIER must be either 'log' or 'webhook', got '{other}'"
                )));
            }
        };

        let embedded_ticker_default = store == StoreBackend::Memory;

        Ok(Self {
            migrate_only,
            api_host: optional(&lookup, "API_HOST").unwrap_or_else(|| "127.0.0.1".to_owned()),
            api_port: parse_or(&lookup, "API_PORT", 3001)?,
            gateway_shared_secret,
            bootstrap_admin_principal_id: optional(&lookup, "BOOTSTRAP_ADMIN_PRINCIPAL_ID"),
            dev_seed: parse_flag(&lookup, "DEV_SEED", false)?,
            embedded_ticker: parse_flag(&lookup, "EMBEDDED_TICKER", embedded_ticker_default)?,
            ticker_interval: Duration::from_secs(
                parse_or::<u64, _>(&lookup, "TICKER_INTERVAL_SECONDS", 60)?.max(1),
            ),
            engine: engine_settings(&lookup)?,
            notifier,
            redis_url: optional(&lookup, "REDIS_URL"),
            store,
        })
    }

    pub fn socket_address(&self) -> Result<SocketAddr, AppError> {
        let host = IpAddr::from_str(&self.api_host).map_err(|error| {
            AppError::Validation(format!("invalid API_HOST '{}': {error}", self.api_host))
        })?;
        Ok(SocketAddr::from((host, self.api_port)))
    }
}

fn engine_settings<F>(lookup: &F) -> AppResult<EngineSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = EngineSettings::default();

    Ok(EngineSettings {
        materialization_horizon: TimeDelta::hours(parse_or(
            lookup,
            "MATERIALIZATION_HORIZON_HOURS",
            defaults.materialization_horizon.num_hours(),
        )?),
        store_timeout: Duration::from_millis(parse_or(
            lookup,
            "STORE_TIMEOUT_MS",
            duration_millis(defaults.store_timeout),
        )?),
        store_retry_budget: parse_or(lookup, "STORE_RETRY_BUDGET", defaults.store_retry_budget)?,
        store_retry_backoff: Duration::from_millis(parse_or(
            lookup,
            "STORE_RETRY_BACKOFF_MS",
            duration_millis(defaults.store_retry_backoff),
        )?),
        far_past_tolerance: TimeDelta::minutes(parse_or(
            lookup,
            "FAR_PAST_TOLERANCE_MINUTES",
            defaults.far_past_tolerance.num_minutes(),
        )?),
        max_page_size: parse_or(lookup, "MAX_PAGE_SIZE", defaults.max_page_size)?.max(1),
        max_expand_depth: parse_or(lookup, "MAX_EXPAND_DEPTH", defaults.max_expand_depth)?,
        ..defaults
    })
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn optional<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).filter(|value| !value.trim().is_empty())
}

fn required_non_empty<F>(lookup: &F, name: &str) -> AppResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(name).ok_or_else(|| AppError::Validation(format!("{name} is required")))?;
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{name} must not be empty")));
    }

    Ok(value)
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

fn parse_flag<F>(lookup: &F, name: &str, default: bool) -> AppResult<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match optional(lookup, name) {
        Some(value) if value.eq_ignore_ascii_case("true") => Ok(true),
        Some(value) if value.eq_ignore_ascii_case("false") => Ok(false),
        Some(value) => Err(AppError::Validation(format!(
            "{name} must be 'true' or 'false', got '{value}'"
        ))),
        None => Ok(default),
    }
}
