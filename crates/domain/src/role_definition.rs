use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_core::{AppError, AppResult, NonEmptyString};

use crate::resource_action::action_matches;

/// One permission block of a role definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolePermission {
    /// Allowed action patterns.
    pub allowed_resource_actions: BTreeSet<String>,
    /// Action patterns excluded from this block's allowances.
    #[serde(default)]
    pub excluded_resource_actions: BTreeSet<String>,
    /// Optional attribute condition carried through unchanged.
    #[serde(default)]
    pub condition: Option<String>,
}

impl RolePermission {
    /// Creates a block from allowed and excluded action patterns.
    #[must_use]
    pub fn new<A, E>(allowed: A, excluded: E) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            allowed_resource_actions: allowed.into_iter().map(Into::into).collect(),
            excluded_resource_actions: excluded.into_iter().map(Into::into).collect(),
            condition: None,
        }
    }

    /// Returns whether this block grants the concrete action.
    #[must_use]
    pub fn grants(&self, action: &str) -> bool {
        self.allowed_resource_actions
            .iter()
            .any(|pattern| action_matches(pattern, action))
            && !self
                .excluded_resource_actions
                .iter()
                .any(|pattern| action_matches(pattern, action))
    }

    /// Allowed patterns that survive this block's own exclusions.
    ///
    /// A surviving wildcard may still have narrower exclusions carved out of it; those are
    /// reported by [`RolePermission::narrowing_exclusions`].
    #[must_use]
    pub fn effective_patterns(&self) -> BTreeSet<String> {
        self.allowed_resource_actions
            .iter()
            .filter(|allowed| {
                !self
                    .excluded_resource_actions
                    .iter()
                    .any(|excluded| action_matches(excluded, allowed))
            })
            .cloned()
            .collect()
    }

    /// Exclusions that remove part of a surviving allowed wildcard rather than all of it.
    #[must_use]
    pub fn narrowing_exclusions(&self) -> BTreeSet<String> {
        let surviving = self.effective_patterns();
        self.excluded_resource_actions
            .iter()
            .filter(|excluded| {
                surviving
                    .iter()
                    .any(|allowed| action_matches(allowed, excluded))
            })
            .cloned()
            .collect()
    }

    /// Returns every pattern referenced by the block.
    pub fn patterns(&self) -> impl Iterator<Item = &String> {
        self.allowed_resource_actions
            .iter()
            .chain(self.excluded_resource_actions.iter())
    }
}

/// Input payload for creating or replacing a role definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDefinitionInput {
    /// Display name.
    pub display_name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Whether the role can be used.
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    /// Template id; defaults to the role id.
    #[serde(default)]
    pub template_id: Option<String>,
    /// Permission blocks.
    pub role_permissions: Vec<RolePermission>,
    /// Parent role ids; only built-in roles may inherit.
    #[serde(default)]
    pub inherits_permissions_from: BTreeSet<String>,
}

fn default_enabled() -> bool {
    true
}

/// Named bundle of permitted resource actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDefinition {
    /// Role id.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Description.
    pub description: String,
    /// Whether the role ships with the platform.
    pub is_built_in: bool,
    /// Whether the role can be used; disabled roles are still inheritable.
    pub is_enabled: bool,
    /// Template id.
    pub template_id: String,
    /// Monotonic version bumped on every update.
    pub version: u32,
    /// Ordered permission blocks.
    pub role_permissions: Vec<RolePermission>,
    /// First-level parents; stored as an edge table, not serialized.
    #[serde(skip)]
    pub inherits_permissions_from: BTreeSet<String>,
    /// Creation timestamp.
    pub created_date_time: DateTime<Utc>,
    /// Last modification timestamp.
    pub modified_date_time: DateTime<Utc>,
}

impl RoleDefinition {
    /// Creates a validated role definition.
    pub fn new(
        id: impl Into<String>,
        input: RoleDefinitionInput,
        is_built_in: bool,
        now: DateTime<Utc>,
    ) -> AppResult<Self> {
        let id = String::from(NonEmptyString::new(id)?);
        validate_input(&id, &input, is_built_in)?;

        Ok(Self {
            template_id: input
                .template_id
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| id.clone()),
            id,
            display_name: input.display_name,
            description: input.description,
            is_built_in,
            is_enabled: input.is_enabled,
            version: 1,
            role_permissions: input.role_permissions,
            inherits_permissions_from: input.inherits_permissions_from,
            created_date_time: now,
            modified_date_time: now,
        })
    }

    /// Returns the definition with mutable attributes replaced and the version bumped.
    pub fn updated(&self, input: RoleDefinitionInput, now: DateTime<Utc>) -> AppResult<Self> {
        validate_input(&self.id, &input, self.is_built_in)?;

        Ok(Self {
            id: self.id.clone(),
            display_name: input.display_name,
            description: input.description,
            is_built_in: self.is_built_in,
            is_enabled: input.is_enabled,
            template_id: input
                .template_id
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| self.template_id.clone()),
            version: self.version.saturating_add(1),
            role_permissions: input.role_permissions,
            inherits_permissions_from: input.inherits_permissions_from,
            created_date_time: self.created_date_time,
            modified_date_time: now,
        })
    }
}

fn validate_input(id: &str, input: &RoleDefinitionInput, is_built_in: bool) -> AppResult<()> {
    NonEmptyString::new(input.display_name.as_str())?;

    if input.role_permissions.is_empty() {
        return Err(AppError::Validation(
            "role definition must declare at least one permission block".to_owned(),
        ));
    }

    if input
        .role_permissions
        .iter()
        .any(|block| block.allowed_resource_actions.is_empty())
    {
        return Err(AppError::Validation(
            "every permission block must allow at least one resource action".to_owned(),
        ));
    }

    if !is_built_in && !input.inherits_permissions_from.is_empty() {
        return Err(AppError::Validation(
            "only built-in role definitions may inherit permissions".to_owned(),
        ));
    }

    if input.inherits_permissions_from.contains(id) {
        return Err(AppError::CycleDetected(format!(
            "role definition '{id}' cannot inherit from itself"
        )));
    }

    Ok(())
}

/// Permissions granted by a role once inheritance is flattened.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EffectivePermissions {
    /// Role id the closure was computed for.
    pub role_definition_id: String,
    /// Role ids visited, root first.
    pub closure: Vec<String>,
    /// Every permission block of the closure; exclusions stay block-local.
    pub blocks: Vec<RolePermission>,
}

impl EffectivePermissions {
    /// Union over blocks of allowed minus that block's excluded patterns.
    ///
    /// Read together with [`EffectivePermissions::exclusions`]: a wildcard listed here
    /// does not grant what is excluded there.
    #[must_use]
    pub fn actions(&self) -> BTreeSet<String> {
        self.blocks
            .iter()
            .flat_map(RolePermission::effective_patterns)
            .collect()
    }

    /// Narrower exclusions still carved out of a listed wildcard.
    ///
    /// An exclusion that another block grants back is not reported.
    #[must_use]
    pub fn exclusions(&self) -> BTreeSet<String> {
        self.blocks
            .iter()
            .flat_map(RolePermission::narrowing_exclusions)
            .filter(|excluded| !self.allows(excluded))
            .collect()
    }

    /// Returns whether any block grants the action.
    #[must_use]
    pub fn allows(&self, action: &str) -> bool {
        self.blocks.iter().any(|block| block.grants(action))
    }
}

/// Flattens `{id} ∪ transitive inheritsPermissionsFrom(id)` with an iterative DFS.
///
/// Parents that no longer exist are skipped.
pub fn effective_permissions(
    role_definition_id: &str,
    definitions: &HashMap<String, RoleDefinition>,
) -> AppResult<EffectivePermissions> {
    if !definitions.contains_key(role_definition_id) {
        return Err(AppError::NotFound(format!(
            "role definition '{role_definition_id}' does not exist"
        )));
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack = vec![role_definition_id];
    let mut result = EffectivePermissions {
        role_definition_id: role_definition_id.to_owned(),
        ..EffectivePermissions::default()
    };

    while let Some(current) = stack.pop() {
        if !visited.insert(current) {
            continue;
        }
        let Some(definition) = definitions.get(current) else {
            continue;
        };

        result.closure.push(definition.id.clone());
        result
            .blocks
            .extend(definition.role_permissions.iter().cloned());
        for parent in definition.inherits_permissions_from.iter().rev() {
            if !visited.contains(parent.as_str()) {
                stack.push(parent.as_str());
            }
        }
    }

    Ok(result)
}

/// Fails with `CycleDetected` when giving `candidate_id` the parents `candidate_parents`
/// would make it reachable from itself.
pub fn ensure_acyclic(
    candidate_id: &str,
    candidate_parents: &BTreeSet<String>,
    definitions: &HashMap<String, RoleDefinition>,
) -> AppResult<()> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = candidate_parents.iter().map(String::as_str).collect();

    while let Some(current) = stack.pop() {
        if current == candidate_id {
            return Err(AppError::CycleDetected(format!(
                "role definition '{candidate_id}' would inherit from itself through its parents"
            )));
        }
        if !visited.insert(current) {
            continue;
        }
        if let Some(definition) = definitions.get(current) {
            stack.extend(
                definition
                    .inherits_permissions_from
                    .iter()
                    .map(String::as_str),
            );
        }
    }

    Ok(())
}
