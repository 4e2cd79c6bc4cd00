use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use warden_core::{AppError, AppResult, CallerIdentity, RbacProvider};
use warden_domain::{
    Approval, OrderBy, QueryOptions, QueryPage, RoleManagementCollection, RoleScope, ScheduleKind,
    ScheduleRequest,
};

use crate::authorization_service::AuthorizationService;
use crate::directory_service::DirectoryService;
use crate::role_definition_registry::RoleDefinitionRegistry;
use crate::role_management_ports::{EngineSettings, RoleAssignmentRepository, ScheduleRepository};

mod expansion;

use expansion::{ExpandCache, Shape};

/// The `on` parameter of `filterByCurrentUser`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentUserRole {
    /// The caller, or one of its groups, is the subject.
    Principal,
    /// The caller is a current approver of the underlying request.
    Approver,
    /// The caller created the underlying request.
    Creator,
}

impl FromStr for CurrentUserRole {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "principal" => Ok(Self::Principal),
            "approver" => Ok(Self::Approver),
            "creator" => Ok(Self::Creator),
            _ => Err(AppError::Validation(format!(
                "filterByCurrentUser 'on' must be principal, approver or creator, not '{value}'"
            ))),
        }
    }
}

/// Read projections of the role-management collections.
#[derive(Clone)]
pub struct QueryService {
    registry: RoleDefinitionRegistry,
    directory: DirectoryService,
    authorization: AuthorizationService,
    assignments: Arc<dyn RoleAssignmentRepository>,
    schedules: Arc<dyn ScheduleRepository>,
    settings: EngineSettings,
}

/// Row of a collection together with who it concerns.
struct Row {
    json: Value,
    subject: Option<String>,
    request_id: Option<String>,
    request_kind: Option<ScheduleKind>,
}

/// Requests and approvals a `filterByCurrentUser` pass resolves against.
#[derive(Default)]
struct Lineage {
    requests: HashMap<String, ScheduleRequest>,
    approvals: HashMap<String, Approval>,
    origins: HashMap<String, String>,
}

impl QueryService {
    /// Creates a query service.
    #[must_use]
    pub fn new(
        registry: RoleDefinitionRegistry,
        directory: DirectoryService,
        authorization: AuthorizationService,
        assignments: Arc<dyn RoleAssignmentRepository>,
        schedules: Arc<dyn ScheduleRepository>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry,
            directory,
            authorization,
            assignments,
            schedules,
            settings,
        }
    }

    /// Lists a collection, optionally restricted to rows where the caller plays `on`.
    pub async fn list(
        &self,
        caller: &CallerIdentity,
        provider: RbacProvider,
        collection: RoleManagementCollection,
        options: &QueryOptions,
        on: Option<CurrentUserRole>,
    ) -> AppResult<QueryPage> {
        self.ensure_expand_depth(options)?;
        let shape = Shape::of(collection);
        shape.validate_expand(&options.expand)?;

        let rows = self.visible_rows(caller, provider, collection, on).await?;
        let mut page = options.apply(rows, &default_order(collection), self.settings.max_page_size);

        let mut cache = ExpandCache::default();
        let mut projected = Vec::with_capacity(page.rows.len());
        for mut row in std::mem::take(&mut page.rows) {
            self.expand(provider, &mut cache, shape, &mut row, &options.expand)
                .await?;
            projected.push(options.project(row));
        }
        page.rows = projected;

        Ok(page)
    }

    /// Counts the rows a listing with the same filter would return.
    pub async fn count(
        &self,
        caller: &CallerIdentity,
        provider: RbacProvider,
        collection: RoleManagementCollection,
        options: &QueryOptions,
        on: Option<CurrentUserRole>,
    ) -> AppResult<usize> {
        Ok(self
            .visible_rows(caller, provider, collection, on)
            .await?
            .iter()
            .filter(|row| options.matches(row))
            .count())
    }

    /// Returns one entity projected with `$select` and `$expand`.
    pub async fn get(
        &self,
        caller: &CallerIdentity,
        provider: RbacProvider,
        collection: RoleManagementCollection,
        id: &str,
        options: &QueryOptions,
    ) -> AppResult<Value> {
        self.ensure_expand_depth(options)?;
        let shape = Shape::of(collection);
        shape.validate_expand(&options.expand)?;

        let mut row = self.readable_entity(caller, provider, collection, id).await?;
        let mut cache = ExpandCache::default();
        self.expand(provider, &mut cache, shape, &mut row, &options.expand)
            .await?;

        Ok(options.project(row))
    }

    /// Follows a single-valued navigation of an entity; a missing referent is `NotFound`.
    pub async fn navigate(
        &self,
        caller: &CallerIdentity,
        provider: RbacProvider,
        collection: RoleManagementCollection,
        id: &str,
        navigation: &str,
    ) -> AppResult<Value> {
        let shape = Shape::of(collection);
        let (source, target) = shape.navigation(navigation).ok_or_else(|| {
            AppError::NotFound(format!(
                "'{}' has no navigation property '{navigation}'",
                collection.as_str()
            ))
        })?;

        let row = self.readable_entity(caller, provider, collection, id).await?;
        let referent_id = row
            .get(source)
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::NotFound(format!("'{id}' has no {navigation}")))?;
        let mut cache = ExpandCache::default();

        self.resolve(provider, &mut cache, target, referent_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("{navigation} '{referent_id}' of '{id}' does not exist"))
            })
    }

    /// Pages already-loaded entities with the query options.
    pub fn page<T: Serialize>(
        &self,
        items: &[T],
        options: &QueryOptions,
        default_order: &OrderBy,
    ) -> AppResult<QueryPage> {
        if !options.expand.is_empty() {
            return Err(AppError::Validation(
                "$expand is not supported on this collection".to_owned(),
            ));
        }
        let rows = items.iter().map(to_json).collect::<AppResult<Vec<_>>>()?;
        let mut page = options.apply(rows, default_order, self.settings.max_page_size);
        page.rows = page
            .rows
            .into_iter()
            .map(|row| options.project(row))
            .collect();

        Ok(page)
    }

    fn ensure_expand_depth(&self, options: &QueryOptions) -> AppResult<()> {
        let depth = options.expand_depth();
        if depth > self.settings.max_expand_depth {
            return Err(AppError::Validation(format!(
                "$expand depth {depth} exceeds the configured maximum of {}",
                self.settings.max_expand_depth
            )));
        }

        Ok(())
    }

    async fn visible_rows(
        &self,
        caller: &CallerIdentity,
        provider: RbacProvider,
        collection: RoleManagementCollection,
        on: Option<CurrentUserRole>,
    ) -> AppResult<Vec<Value>> {
        let open_to_all = matches!(
            collection,
            RoleManagementCollection::RoleDefinitions | RoleManagementCollection::ResourceNamespaces
        );
        match on {
            None if open_to_all => {}
            None => {
                self.authorization
                    .require_scope_read(provider, caller, &RoleScope::root())
                    .await?;
            }
            Some(_) if open_to_all => {
                return Err(AppError::NotSupported(format!(
                    "filterByCurrentUser is not supported on '{}'",
                    collection.as_str()
                )));
            }
            Some(CurrentUserRole::Principal) if collection == RoleManagementCollection::Approvals => {
                return Err(AppError::NotSupported(
                    "approvals support filterByCurrentUser(on='approver') only".to_owned(),
                ));
            }
            Some(CurrentUserRole::Approver | CurrentUserRole::Creator)
                if collection == RoleManagementCollection::RoleAssignments =>
            {
                return Err(AppError::NotSupported(
                    "roleAssignments support filterByCurrentUser(on='principal') only".to_owned(),
                ));
            }
            Some(_) => {}
        }

        let rows = self.load_rows(provider, collection).await?;
        let Some(on) = on else {
            return Ok(rows.into_iter().map(|row| row.json).collect());
        };

        let caller_ids: HashSet<String> = self
            .directory
            .principal_and_group_ids(caller.principal_id())
            .await?
            .into_iter()
            .collect();
        let lineage = match on {
            CurrentUserRole::Principal => Lineage::default(),
            CurrentUserRole::Approver | CurrentUserRole::Creator => {
                self.load_lineage(provider, collection).await?
            }
        };

        Ok(rows
            .into_iter()
            .filter(|row| match on {
                CurrentUserRole::Principal => row
                    .subject
                    .as_ref()
                    .is_some_and(|subject| caller_ids.contains(subject)),
                CurrentUserRole::Approver => lineage
                    .approval_for(row)
                    .is_some_and(|approval| approval.is_approver(caller.principal_id())),
                CurrentUserRole::Creator => lineage
                    .request_for(row)
                    .is_some_and(|request| request.created_by == caller.principal_id()),
            })
            .map(|row| row.json)
            .collect())
    }

    async fn load_rows(
        &self,
        provider: RbacProvider,
        collection: RoleManagementCollection,
    ) -> AppResult<Vec<Row>> {
        match collection {
            RoleManagementCollection::RoleDefinitions => self
                .registry
                .list(provider)
                .await?
                .iter()
                .map(|definition| Row::new(definition, None, None))
                .collect(),
            RoleManagementCollection::ResourceNamespaces => self
                .registry
                .repository()
                .list_resource_namespaces(provider)
                .await?
                .iter()
                .map(|namespace| Row::new(namespace, None, None))
                .collect(),
            RoleManagementCollection::RoleAssignments => self
                .assignments
                .list_role_assignments(provider)
                .await?
                .iter()
                .map(|assignment| Row::new(assignment, Some(&assignment.principal_id), None))
                .collect(),
            RoleManagementCollection::Schedules(kind) => self
                .schedules
                .list_schedules(provider, kind)
                .await?
                .iter()
                .map(|schedule| {
                    Row::new(schedule, Some(&schedule.principal_id), Some(&schedule.created_using))
                })
                .collect(),
            RoleManagementCollection::Instances(kind) => self
                .schedules
                .list_instances(provider, kind)
                .await?
                .iter()
                .map(|instance| {
                    Row::new(
                        instance,
                        Some(&instance.principal_id),
                        Some(&instance.role_assignment_origin_id),
                    )
                })
                .collect(),
            RoleManagementCollection::Requests(kind) => self
                .schedules
                .list_requests(provider, kind)
                .await?
                .iter()
                .map(|request| Row::new(request, Some(&request.principal_id), Some(&request.id)))
                .collect(),
            RoleManagementCollection::Approvals => self
                .schedules
                .list_approvals(provider)
                .await?
                .iter()
                .map(|approval| Row::new(approval, None, Some(&approval.request_id)))
                .collect(),
        }
    }

    /// Requests, approvals and, for instances, schedule-to-request links of the collection.
    async fn load_lineage(
        &self,
        provider: RbacProvider,
        collection: RoleManagementCollection,
    ) -> AppResult<Lineage> {
        let kinds: Vec<ScheduleKind> = match collection.schedule_kind() {
            Some(kind) => vec![kind],
            None => vec![ScheduleKind::Assignment, ScheduleKind::Eligibility],
        };

        let mut lineage = Lineage::default();
        for kind in kinds {
            for request in self.schedules.list_requests(provider, kind).await? {
                lineage.requests.insert(request.id.clone(), request);
            }
            if let RoleManagementCollection::Instances(_) = collection {
                for schedule in self.schedules.list_schedules(provider, kind).await? {
                    lineage.origins.insert(schedule.id, schedule.created_using);
                }
            }
        }
        for approval in self.schedules.list_approvals(provider).await? {
            lineage.approvals.insert(approval.id.clone(), approval);
        }
        Ok(lineage)
    }

    async fn readable_entity(
        &self,
        caller: &CallerIdentity,
        provider: RbacProvider,
        collection: RoleManagementCollection,
        id: &str,
    ) -> AppResult<Value> {
        let not_found =
            || AppError::NotFound(format!("'{}' has no entity '{id}'", collection.as_str()));
        let (row, scope): (Row, Option<RoleScope>) = match collection {
            RoleManagementCollection::RoleDefinitions => {
                (Row::new(&self.registry.find(provider, id).await?, None, None)?, None)
            }
            RoleManagementCollection::ResourceNamespaces => {
                let namespace = self
                    .registry
                    .repository()
                    .find_resource_namespace(provider, id)
                    .await?
                    .ok_or_else(not_found)?;
                (Row::new(&namespace, None, None)?, None)
            }
            RoleManagementCollection::RoleAssignments => {
                let assignment = self
                    .assignments
                    .find_role_assignment(provider, id)
                    .await?
                    .ok_or_else(not_found)?;
                let row = Row::new(&assignment, Some(&assignment.principal_id), None)?;
                (row, Some(assignment.scope))
            }
            RoleManagementCollection::Schedules(kind) => {
                let schedule = self
                    .schedules
                    .find_schedule(provider, kind, id)
                    .await?
                    .ok_or_else(not_found)?;
                let row = Row::new(
                    &schedule,
                    Some(&schedule.principal_id),
                    Some(&schedule.created_using),
                )?
                .within(kind);
                (row, Some(schedule.scope))
            }
            RoleManagementCollection::Instances(kind) => {
                let instance = self
                    .schedules
                    .find_instance(provider, kind, id)
                    .await?
                    .ok_or_else(not_found)?;
                let origin = self
                    .schedules
                    .find_schedule(provider, kind, instance.role_assignment_origin_id.as_str())
                    .await?
                    .map(|schedule| schedule.created_using);
                let row =
                    Row::new(&instance, Some(&instance.principal_id), origin.as_ref())?.within(kind);
                (row, Some(instance.scope))
            }
            RoleManagementCollection::Requests(kind) => {
                let request = self
                    .schedules
                    .find_request(provider, kind, id)
                    .await?
                    .ok_or_else(not_found)?;
                let row = Row::new(&request, Some(&request.principal_id), Some(&request.id))?
                    .within(kind);
                (row, Some(request.scope))
            }
            RoleManagementCollection::Approvals => {
                let approval = self
                    .schedules
                    .find_approval(provider, id)
                    .await?
                    .ok_or_else(not_found)?;
                if approval.is_approver(caller.principal_id()) {
                    return to_json(&approval);
                }
                let request = self
                    .schedules
                    .find_request(provider, approval.request_kind, approval.request_id.as_str())
                    .await?
                    .ok_or_else(not_found)?;
                let row = Row::new(&approval, Some(&request.principal_id), Some(&request.id))?
                    .within(request.kind);
                (row, Some(request.scope))
            }
        };

        let Some(scope) = scope else {
            return Ok(row.json);
        };
        if self.concerns_caller(caller, provider, &row).await? {
            return Ok(row.json);
        }
        self.authorization
            .require_scope_read(provider, caller, &scope)
            .await?;

        Ok(row.json)
    }

    /// Whether the caller is the subject, creator or an approver of the row.
    async fn concerns_caller(
        &self,
        caller: &CallerIdentity,
        provider: RbacProvider,
        row: &Row,
    ) -> AppResult<bool> {
        if let Some(subject) = row.subject.as_deref() {
            let caller_ids = self
                .directory
                .principal_and_group_ids(caller.principal_id())
                .await?;
            if caller_ids.iter().any(|id| id == subject) {
                return Ok(true);
            }
        }
        let Some(request_id) = row.request_id.as_deref() else {
            return Ok(false);
        };

        let kinds = [ScheduleKind::Assignment, ScheduleKind::Eligibility];
        let kinds = row.request_kind.as_ref().map_or(&kinds[..], std::slice::from_ref);
        for &kind in kinds {
            let Some(request) = self.schedules.find_request(provider, kind, request_id).await? else {
                continue;
            };
            if request.created_by == caller.principal_id() {
                return Ok(true);
            }
            if let Some(approval_id) = request.approval_id.as_deref()
                && let Some(approval) = self.schedules.find_approval(provider, approval_id).await?
                && approval.is_approver(caller.principal_id())
            {
                return Ok(true);
            }
        }

        Ok(false)
    }
}

impl Row {
    fn new<T: Serialize>(
        entity: &T,
        subject: Option<&String>,
        request_id: Option<&String>,
    ) -> AppResult<Self> {
        Ok(Self {
            json: to_json(entity)?,
            subject: subject.cloned(),
            request_id: request_id.cloned(),
            request_kind: None,
        })
    }

    /// Pins the request lookup to one kind.
    fn within(mut self, kind: ScheduleKind) -> Self {
        self.request_kind = Some(kind);
        self
    }
}

impl Lineage {
    fn request_for(&self, row: &Row) -> Option<&ScheduleRequest> {
        let key = row.request_id.as_deref()?;
        let request_id = self.origins.get(key).map_or(key, String::as_str);
        self.requests.get(request_id)
    }

    fn approval_for(&self, row: &Row) -> Option<&Approval> {
        let approval_id = self.request_for(row)?.approval_id.as_deref()?;
        self.approvals.get(approval_id)
    }
}

fn default_order(collection: RoleManagementCollection) -> OrderBy {
    match collection {
        RoleManagementCollection::Instances(_) => OrderBy::descending("startDateTime"),
        RoleManagementCollection::ResourceNamespaces => OrderBy::ascending("name"),
        _ => OrderBy::descending("createdDateTime"),
    }
}

pub(crate) fn to_json<T: Serialize>(entity: &T) -> AppResult<Value> {
    serde_json::to_value(entity)
        .map_err(|error| AppError::Internal(format!("failed to project entity: {error}")))
}
