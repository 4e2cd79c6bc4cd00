use std::sync::Arc;

use warden_application::EngineSettings;
use warden_core::CallerIdentity;
use warden_infrastructure::{InMemoryRoleManagementStore, SystemTimeSource, TracingApprovalNotifier};

use crate::api_services::{StorePorts, wire_services};
use crate::bootstrap::ensure_role_management_catalog;
use crate::dev_seed;
use crate::state::AppState;

pub(crate) const TEST_GATEWAY_SECRET: &str = "0123456789abcdef0123456789abcdef";

/// In-memory state with the built-in catalog and the development seed applied.
pub(crate) async fn seeded_state() -> AppState {
    let state = wire_services(
        StorePorts::from_store(Arc::new(InMemoryRoleManagementStore::new())),
        Arc::new(SystemTimeSource),
        Arc::new(TracingApprovalNotifier::new()),
        EngineSettings::default(),
        TEST_GATEWAY_SECRET,
    );
    ensure_role_management_catalog(&state)
        .await
        .unwrap_or_else(|error| panic!("catalog should be provisioned: {error}"));
    dev_seed::run(&state)
        .await
        .unwrap_or_else(|error| panic!("dev seed should run: {error}"));

    state
}

pub(crate) fn admin() -> CallerIdentity {
    CallerIdentity::new("alice", "Alice Admin").with_mfa(true)
}

pub(crate) fn member(principal_id: &str) -> CallerIdentity {
    CallerIdentity::new(principal_id, principal_id)
}
