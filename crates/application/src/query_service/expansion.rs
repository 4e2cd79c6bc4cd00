use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::{Value, json};
use warden_core::{AppError, AppResult, RbacProvider};
use warden_domain::{
    ExpandItem, ROOT_DIRECTORY_SCOPE, RoleManagementCollection, ScheduleKind,
    directory_scope_object_id,
};

use super::{QueryService, to_json};

/// Entity shape a row or referent is projected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum Shape {
    RoleDefinition,
    ResourceNamespace,
    RoleAssignment,
    Schedule(ScheduleKind),
    Instance(ScheduleKind),
    Request(ScheduleKind),
    Approval,
    Principal,
    DirectoryObject,
    AppScope,
}

/// Store a single-valued navigation resolves against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum Target {
    Principal,
    RoleDefinition,
    DirectoryScope,
    AppScope,
    Schedule(ScheduleKind),
    Instance(ScheduleKind),
}

const INHERITS_PERMISSIONS_FROM: &str = "inheritsPermissionsFrom";

/// Referents resolved during one read, keyed by store and id.
#[derive(Default)]
pub(super) struct ExpandCache {
    referents: HashMap<(Target, String), Option<Value>>,
}

type ExpandFuture<'a> = Pin<Box<dyn Future<Output = AppResult<()>> + Send + 'a>>;

impl Shape {
    pub(super) fn of(collection: RoleManagementCollection) -> Self {
        match collection {
            RoleManagementCollection::RoleDefinitions => Self::RoleDefinition,
            RoleManagementCollection::ResourceNamespaces => Self::ResourceNamespace,
            RoleManagementCollection::RoleAssignments => Self::RoleAssignment,
            RoleManagementCollection::Schedules(kind) => Self::Schedule(kind),
            RoleManagementCollection::Instances(kind) => Self::Instance(kind),
            RoleManagementCollection::Requests(kind) => Self::Request(kind),
            RoleManagementCollection::Approvals => Self::Approval,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::RoleDefinition => "roleDefinition",
            Self::ResourceNamespace => "resourceNamespace",
            Self::RoleAssignment => "roleAssignment",
            Self::Schedule(ScheduleKind::Assignment) => "roleAssignmentSchedule",
            Self::Schedule(ScheduleKind::Eligibility) => "roleEligibilitySchedule",
            Self::Instance(ScheduleKind::Assignment) => "roleAssignmentScheduleInstance",
            Self::Instance(ScheduleKind::Eligibility) => "roleEligibilityScheduleInstance",
            Self::Request(ScheduleKind::Assignment) => "roleAssignmentScheduleRequest",
            Self::Request(ScheduleKind::Eligibility) => "roleEligibilityScheduleRequest",
            Self::Approval => "approval",
            Self::Principal => "principal",
            Self::DirectoryObject => "directoryObject",
            Self::AppScope => "appScope",
        }
    }

    /// Source property and store of a single-valued navigation.
    pub(super) fn navigation(self, property: &str) -> Option<(&'static str, Target)> {
        let scoped = matches!(
            self,
            Self::RoleAssignment | Self::Schedule(_) | Self::Instance(_) | Self::Request(_)
        );
        match (self, property) {
            (_, "principal") if scoped => Some(("principalId", Target::Principal)),
            (_, "roleDefinition") if scoped => Some(("roleDefinitionId", Target::RoleDefinition)),
            (_, "directoryScope") if scoped => Some(("directoryScopeId", Target::DirectoryScope)),
            (_, "appScope") if scoped => Some(("appScopeId", Target::AppScope)),
            (
                Self::Schedule(ScheduleKind::Assignment) | Self::Request(ScheduleKind::Assignment),
                "activatedUsing",
            ) => Some((
                "activatedUsingId",
                Target::Schedule(ScheduleKind::Eligibility),
            )),
            (Self::Instance(ScheduleKind::Assignment), "activatedUsing") => Some((
                "activatedUsingId",
                Target::Instance(ScheduleKind::Eligibility),
            )),
            (Self::Request(kind), "targetSchedule") => {
                Some(("targetScheduleId", Target::Schedule(kind)))
            }
            _ => None,
        }
    }

    /// Rejects unknown navigation properties anywhere in the expansion tree.
    pub(super) fn validate_expand(self, items: &[ExpandItem]) -> AppResult<()> {
        for item in items {
            let nested_shape = match self.navigation(item.property.as_str()) {
                Some((_, target)) => target.shape(),
                None if self == Self::RoleDefinition && item.property == INHERITS_PERMISSIONS_FROM => {
                    Self::RoleDefinition
                }
                None => {
                    return Err(AppError::Validation(format!(
                        "'{}' is not an expandable property of {}",
                        item.property,
                        self.name()
                    )));
                }
            };
            nested_shape.validate_expand(&item.nested)?;
        }

        Ok(())
    }
}

impl Target {
    fn shape(self) -> Shape {
        match self {
            Self::Principal => Shape::Principal,
            Self::RoleDefinition => Shape::RoleDefinition,
            Self::DirectoryScope => Shape::DirectoryObject,
            Self::AppScope => Shape::AppScope,
            Self::Schedule(kind) => Shape::Schedule(kind),
            Self::Instance(kind) => Shape::Instance(kind),
        }
    }
}

impl QueryService {
    /// Inlines the expanded navigations into the row.
    pub(super) fn expand<'a>(
        &'a self,
        provider: RbacProvider,
        cache: &'a mut ExpandCache,
        shape: Shape,
        row: &'a mut Value,
        items: &'a [ExpandItem],
    ) -> ExpandFuture<'a> {
        Box::pin(async move {
            for item in items {
                let expanded = match shape.navigation(item.property.as_str()) {
                    Some((source, target)) => {
                        let referent_id =
                            row.get(source).and_then(Value::as_str).map(str::to_owned);
                        match referent_id {
                            Some(referent_id) => {
                                self.expand_referent(provider, cache, target, &referent_id, item)
                                    .await?
                            }
                            None => Value::Null,
                        }
                    }
                    None => self.expand_parents(provider, cache, row, item).await?,
                };
                if let Some(properties) = row.as_object_mut() {
                    properties.insert(item.property.clone(), expanded);
                }
            }

            Ok(())
        })
    }

    async fn expand_referent(
        &self,
        provider: RbacProvider,
        cache: &mut ExpandCache,
        target: Target,
        referent_id: &str,
        item: &ExpandItem,
    ) -> AppResult<Value> {
        let Some(mut referent) = self.resolve(provider, cache, target, referent_id).await? else {
            return Ok(Value::Null);
        };
        self.expand(provider, cache, target.shape(), &mut referent, &item.nested)
            .await?;

        Ok(referent)
    }

    async fn expand_parents(
        &self,
        provider: RbacProvider,
        cache: &mut ExpandCache,
        row: &Value,
        item: &ExpandItem,
    ) -> AppResult<Value> {
        let Some(id) = row.get("id").and_then(Value::as_str) else {
            return Ok(Value::Array(Vec::new()));
        };
        let parent_ids = match self.registry.find(provider, id).await {
            Ok(definition) => definition.inherits_permissions_from,
            Err(AppError::NotFound(_)) => return Ok(Value::Array(Vec::new())),
            Err(error) => return Err(error),
        };

        let mut parents = Vec::with_capacity(parent_ids.len());
        for parent_id in parent_ids {
            let parent = self
                .expand_referent(provider, cache, Target::RoleDefinition, &parent_id, item)
                .await?;
            if !parent.is_null() {
                parents.push(parent);
            }
        }

        Ok(Value::Array(parents))
    }

    /// Loads one referent; `None` when it does not exist.
    pub(super) async fn resolve(
        &self,
        provider: RbacProvider,
        cache: &mut ExpandCache,
        target: Target,
        referent_id: &str,
    ) -> AppResult<Option<Value>> {
        let key = (target, referent_id.to_owned());
        if let Some(cached) = cache.referents.get(&key) {
            return Ok(cached.clone());
        }

        let resolved = match target {
            Target::Principal => found(self.directory.principal(referent_id).await)?
                .map(|principal| to_json(&principal))
                .transpose()?,
            Target::RoleDefinition => found(self.registry.find(provider, referent_id).await)?
                .map(|definition| to_json(&definition))
                .transpose()?,
            Target::DirectoryScope if referent_id == ROOT_DIRECTORY_SCOPE => {
                Some(json!({ "id": ROOT_DIRECTORY_SCOPE }))
            }
            Target::DirectoryScope => match directory_scope_object_id(referent_id) {
                Ok(Some(object_id)) => {
                    found(self.directory.lookup_directory_object(object_id).await)?
                        .map(|object| to_json(&object))
                        .transpose()?
                }
                Ok(None) | Err(_) => None,
            },
            Target::AppScope => found(self.directory.app_scope(referent_id).await)?
                .map(|app_scope| to_json(&app_scope))
                .transpose()?,
            Target::Schedule(kind) => self
                .schedules
                .find_schedule(provider, kind, referent_id)
                .await?
                .map(|schedule| to_json(&schedule))
                .transpose()?,
            Target::Instance(kind) => self
                .schedules
                .find_instance(provider, kind, referent_id)
                .await?
                .map(|instance| to_json(&instance))
                .transpose()?,
        };
        cache.referents.insert(key, resolved.clone());

        Ok(resolved)
    }
}

fn found<T>(result: AppResult<T>) -> AppResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(AppError::NotFound(_)) => Ok(None),
        Err(error) => Err(error),
    }
}
