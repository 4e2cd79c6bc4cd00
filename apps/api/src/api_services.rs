mod database;
mod redis;
mod state_builder;

pub use database::connect_and_migrate;
pub use redis::build_redis_client;
pub use state_builder::{StorePorts, build_app_state};

#[cfg(test)]
pub(crate) use state_builder::wire_services;
