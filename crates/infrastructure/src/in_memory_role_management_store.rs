//! Process-local store backing every role-management port.

use std::collections::{BTreeMap, BTreeSet};

use tokio::sync::RwLock;
use warden_application::AuditRecord;
use warden_core::RbacProvider;
use warden_domain::{
    AppScope, Approval, DirectoryObject, Principal, ResourceAction, ResourceNamespace,
    RoleAssignment, RoleDefinition, RoleManagementPolicy, RoleSchedule, ScheduleInstance,
    ScheduleKind, ScheduleRequest,
};

mod assignments;
mod catalog;
mod directory;
mod schedules;

type ProviderKey = (RbacProvider, String);
type KindKey = (RbacProvider, ScheduleKind, String);

#[derive(Debug, Default)]
struct DirectoryState {
    principals: BTreeMap<String, Principal>,
    objects: BTreeMap<String, DirectoryObject>,
    app_scopes: BTreeMap<String, AppScope>,
    memberships: BTreeSet<(String, String)>,
}

#[derive(Debug, Default)]
struct CatalogState {
    definitions: BTreeMap<ProviderKey, RoleDefinition>,
    definition_revisions: BTreeMap<RbacProvider, u64>,
    namespaces: BTreeMap<ProviderKey, ResourceNamespace>,
    actions: BTreeMap<ProviderKey, ResourceAction>,
    policies: BTreeMap<ProviderKey, RoleManagementPolicy>,
}

/// Everything a schedule commit touches; held under one lock so commits are atomic.
#[derive(Debug, Default)]
struct ScheduleState {
    assignments: BTreeMap<ProviderKey, RoleAssignment>,
    schedules: BTreeMap<KindKey, RoleSchedule>,
    instances: BTreeMap<KindKey, ScheduleInstance>,
    requests: BTreeMap<KindKey, ScheduleRequest>,
    client_request_ids: BTreeMap<ProviderKey, (ScheduleKind, String)>,
    approvals: BTreeMap<ProviderKey, Approval>,
}

/// In-memory role-management store.
#[derive(Debug, Default)]
pub struct InMemoryRoleManagementStore {
    directory: RwLock<DirectoryState>,
    catalog: RwLock<CatalogState>,
    state: RwLock<ScheduleState>,
    audit: RwLock<Vec<AuditRecord>>,
}

impl InMemoryRoleManagementStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(provider: RbacProvider, id: &str) -> ProviderKey {
    (provider, id.to_owned())
}

fn kind_key(provider: RbacProvider, kind: ScheduleKind, id: &str) -> KindKey {
    (provider, kind, id.to_owned())
}

fn of_provider<'a, K, V>(
    map: &'a BTreeMap<K, V>,
    provider: RbacProvider,
    partition: impl Fn(&K) -> RbacProvider + 'a,
) -> impl Iterator<Item = &'a V> + 'a {
    map.iter()
        .filter(move |(stored, _)| partition(stored) == provider)
        .map(|(_, value)| value)
}
