//! Warden API composition root.

#![forbid(unsafe_code)]

mod api_config;
mod api_router;
mod api_services;
mod bootstrap;
mod dev_seed;
mod dto;
mod error;
mod handlers;
mod middleware;
mod state;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use tracing::{info, warn};
use warden_application::TickerShard;
use warden_core::AppError;
use warden_infrastructure::{InMemoryRoleManagementStore, PostgresRoleManagementStore};

use crate::api_config::{ApiConfig, StoreBackend};
use crate::api_services::{StorePorts, build_app_state, connect_and_migrate};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    api_config::init_tracing();

    let config = ApiConfig::load()?;

    let (ports, postgres_pool) = match &config.store {
        StoreBackend::Postgres { database_url } => {
            let pool = connect_and_migrate(database_url).await?;
            if config.migrate_only {
                info!("database migrations applied successfully");
                return Ok(());
            }
            let store = Arc::new(PostgresRoleManagementStore::new(pool.clone()));
            (StorePorts::from_store(store), Some(pool))
        }
        StoreBackend::Memory => {
            warn!("using the in-memory store; state is lost on restart");
            let store = Arc::new(InMemoryRoleManagementStore::new());
            (StorePorts::from_store(store), None)
        }
    };

    let app_state = build_app_state(ports, &config, postgres_pool)?;

    bootstrap::ensure_role_management_catalog(&app_state).await?;
    if let Some(principal_id) = config.bootstrap_admin_principal_id.as_deref() {
        bootstrap::grant_bootstrap_admin(&app_state, principal_id).await?;
    }
    if config.dev_seed {
        dev_seed::run(&app_state).await?;
    }
    if config.embedded_ticker {
        spawn_embedded_ticker(app_state.clone(), config.ticker_interval);
    }

    let app = api_router::build_router(app_state);
    let address = config.socket_address()?;
    info!(%address, "warden api listening");

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|error| AppError::Internal(format!("failed to bind TCP listener: {error}")))?;

    axum::serve(listener, app)
        .await
        .map_err(|error| AppError::Internal(format!("server failed: {error}")))?;

    Ok(())
}

fn spawn_embedded_ticker(state: AppState, interval: std::time::Duration) {
    info!(
        interval_seconds = interval.as_secs(),
        "starting embedded schedule ticker"
    );

    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(interval);
        loop {
            ticks.tick().await;
            if let Err(error) = state.ticker.run_all(TickerShard::all()).await {
                warn!(error = %error, "schedule tick failed");
            }
        }
    });
}
