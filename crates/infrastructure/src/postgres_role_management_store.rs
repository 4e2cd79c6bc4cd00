//! PostgreSQL store backing every role-management port.

use std::str::FromStr;

use sqlx::PgPool;
use warden_core::{AppError, AppResult};
use warden_domain::RoleScope;

mod assignments;
mod catalog;
mod directory;
mod rows;
mod schedules;

/// PostgreSQL-backed role-management store.
#[derive(Clone)]
pub struct PostgresRoleManagementStore {
    pool: PgPool,
}

impl PostgresRoleManagementStore {
    /// Creates a store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Maps a driver error; connectivity and serialization failures stay retryable.
fn store_error(context: &str, error: sqlx::Error) -> AppError {
    match &error {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            AppError::Transient(format!("{context}: {error}"))
        }
        sqlx::Error::Database(database_error)
            if matches!(database_error.code().as_deref(), Some("40001" | "40P01")) =>
        {
            AppError::Transient(format!("{context}: {error}"))
        }
        _ => AppError::Internal(format!("{context}: {error}")),
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(database_error) if database_error.code().as_deref() == Some("23505")
    )
}

fn parse_column<T>(column: &str, value: &str) -> AppResult<T>
where
    T: FromStr<Err = AppError>,
{
    T::from_str(value).map_err(|error| {
        AppError::Internal(format!("invalid stored {column} '{value}': {error}"))
    })
}

fn scope_from_columns(
    directory_scope_id: Option<String>,
    app_scope_id: Option<String>,
) -> AppResult<RoleScope> {
    RoleScope::from_parts(directory_scope_id, app_scope_id)
        .map_err(|error| AppError::Internal(format!("invalid stored scope: {error}")))
}

#[cfg(test)]
mod tests;
