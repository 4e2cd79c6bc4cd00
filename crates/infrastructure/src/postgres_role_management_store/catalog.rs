use async_trait::async_trait;
use sqlx::{FromRow, PgConnection};
use sqlx::types::Json;
use warden_application::{PolicyRepository, RoleDefinitionRepository};
use warden_core::{AppError, AppResult, RbacProvider};
use warden_domain::{ResourceAction, ResourceNamespace, RoleDefinition, RoleManagementPolicy};

use super::rows::RoleDefinitionRow;
use super::{PostgresRoleManagementStore, is_unique_violation, store_error};

const DEFINITION_SELECT: &str = r#"
    SELECT
        definitions.id,
        definitions.display_name,
        definitions.description,
        definitions.is_built_in,
        definitions.is_enabled,
        definitions.template_id,
        definitions.version,
        definitions.role_permissions,
        COALESCE(
            ARRAY(
                SELECT inheritance.parent_id
                FROM role_definition_inheritance inheritance
                WHERE inheritance.provider = definitions.provider
                  AND inheritance.role_definition_id = definitions.id
                ORDER BY inheritance.parent_id
            ),
            ARRAY[]::TEXT[]
        ) AS parent_ids,
        definitions.created_date_time,
        definitions.modified_date_time
    FROM role_definitions definitions
"#;

#[derive(Debug, FromRow)]
struct ResourceActionRow {
    id: String,
    resource_namespace_id: String,
    name: String,
    description: String,
    is_privileged: bool,
}

impl From<ResourceActionRow> for ResourceAction {
    fn from(row: ResourceActionRow) -> Self {
        Self {
            id: row.id,
            resource_namespace_id: row.resource_namespace_id,
            name: row.name,
            description: row.description,
            is_privileged: row.is_privileged,
        }
    }
}

fn revision_from_row(revision: i64) -> AppResult<u64> {
    u64::try_from(revision).map_err(|error| {
        AppError::Internal(format!("invalid role definition revision {revision}: {error}"))
    })
}

/// Moves the provider's revision forward inside the write transaction.
///
/// The row lock taken by the upsert serializes concurrent writers; a writer whose
/// expected revision is stale gets no row back.
async fn bump_revision(
    connection: &mut PgConnection,
    provider: RbacProvider,
    expected_revision: u64,
) -> AppResult<u64> {
    let expected = i64::try_from(expected_revision).map_err(|error| {
        AppError::Validation(format!("invalid role definition revision: {error}"))
    })?;
    let bumped = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO role_definition_revisions (provider, revision)
        VALUES ($1, $2 + 1)
        ON CONFLICT (provider)
        DO UPDATE SET revision = role_definition_revisions.revision + 1
        WHERE role_definition_revisions.revision = $2
        RETURNING revision
        "#,
    )
    .bind(provider.as_str())
    .bind(expected)
    .fetch_optional(connection)
    .await
    .map_err(|error| {
        store_error(
            &format!("failed to bump role definition revision of '{provider}'"),
            error,
        )
    })?;

    match bumped {
        Some(revision) => revision_from_row(revision),
        None => Err(AppError::Conflict(format!(
            "role definitions of '{provider}' changed concurrently; retry the write"
        ))),
    }
}

#[async_trait]
impl RoleDefinitionRepository for PostgresRoleManagementStore {
    async fn list_role_definitions(
        &self,
        provider: RbacProvider,
    ) -> AppResult<Vec<RoleDefinition>> {
        let rows = sqlx::query_as::<_, RoleDefinitionRow>(&format!(
            "{DEFINITION_SELECT} WHERE definitions.provider = $1 ORDER BY definitions.id"
        ))
        .bind(provider.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            store_error(&format!("failed to list role definitions of '{provider}'"), error)
        })?;

        rows.into_iter().map(RoleDefinition::try_from).collect()
    }

    async fn find_role_definition(
        &self,
        provider: RbacProvider,
        role_definition_id: &str,
    ) -> AppResult<Option<RoleDefinition>> {
        let row = sqlx::query_as::<_, RoleDefinitionRow>(&format!(
            "{DEFINITION_SELECT} WHERE definitions.provider = $1 AND definitions.id = $2"
        ))
        .bind(provider.as_str())
        .bind(role_definition_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            store_error(
                &format!("failed to find role definition '{role_definition_id}'"),
                error,
            )
        })?;

        row.map(RoleDefinition::try_from).transpose()
    }

    async fn role_definitions_revision(&self, provider: RbacProvider) -> AppResult<u64> {
        let revision = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT revision
            FROM role_definition_revisions
            WHERE provider = $1
            "#,
        )
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            store_error(
                &format!("failed to read role definition revision of '{provider}'"),
                error,
            )
        })?;

        revision.map_or(Ok(0), revision_from_row)
    }

    async fn save_role_definition(
        &self,
        provider: RbacProvider,
        definition: RoleDefinition,
        expected_revision: u64,
    ) -> AppResult<u64> {
        let context = format!("failed to save role definition '{}'", definition.id);
        let version = i32::try_from(definition.version).map_err(|error| {
            AppError::Validation(format!("invalid role definition version: {error}"))
        })?;
        let mut transaction = self
            .pool
            .begin()
            .await
            .map_err(|error| store_error(&context, error))?;
        let revision = bump_revision(&mut *transaction, provider, expected_revision).await?;

        sqlx::query(
            r#"
            INSERT INTO role_definitions (
                provider,
                id,
                display_name,
                description,
                is_built_in,
                is_enabled,
                template_id,
                version,
                role_permissions,
                created_date_time,
                modified_date_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (provider, id)
            DO UPDATE SET
                display_name = EXCLUDED.display_name,
                description = EXCLUDED.description,
                is_built_in = EXCLUDED.is_built_in,
                is_enabled = EXCLUDED.is_enabled,
                template_id = EXCLUDED.template_id,
                version = EXCLUDED.version,
                role_permissions = EXCLUDED.role_permissions,
                modified_date_time = EXCLUDED.modified_date_time
            "#,
        )
        .bind(provider.as_str())
        .bind(definition.id.as_str())
        .bind(definition.display_name.as_str())
        .bind(definition.description.as_str())
        .bind(definition.is_built_in)
        .bind(definition.is_enabled)
        .bind(definition.template_id.as_str())
        .bind(version)
        .bind(Json(&definition.role_permissions))
        .bind(definition.created_date_time)
        .bind(definition.modified_date_time)
        .execute(&mut *transaction)
        .await
        .map_err(|error| store_error(&context, error))?;

        sqlx::query(
            r#"
            DELETE FROM role_definition_inheritance
            WHERE provider = $1 AND role_definition_id = $2
            "#,
        )
        .bind(provider.as_str())
        .bind(definition.id.as_str())
        .execute(&mut *transaction)
        .await
        .map_err(|error| store_error(&context, error))?;

        for parent_id in &definition.inherits_permissions_from {
            sqlx::query(
                r#"
                INSERT INTO role_definition_inheritance (provider, role_definition_id, parent_id)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(provider.as_str())
            .bind(definition.id.as_str())
            .bind(parent_id.as_str())
            .execute(&mut *transaction)
            .await
            .map_err(|error| store_error(&context, error))?;
        }

        transaction
            .commit()
            .await
            .map_err(|error| store_error(&context, error))?;

        Ok(revision)
    }

    async fn delete_role_definition(
        &self,
        provider: RbacProvider,
        role_definition_id: &str,
        expected_revision: u64,
    ) -> AppResult<u64> {
        let context = format!("failed to delete role definition '{role_definition_id}'");
        let mut transaction = self
            .pool
            .begin()
            .await
            .map_err(|error| store_error(&context, error))?;
        let revision = bump_revision(&mut *transaction, provider, expected_revision).await?;

        sqlx::query(
            r#"
            DELETE FROM role_definitions
            WHERE provider = $1 AND id = $2
            "#,
        )
        .bind(provider.as_str())
        .bind(role_definition_id)
        .execute(&mut *transaction)
        .await
        .map_err(|error| store_error(&context, error))?;

        transaction
            .commit()
            .await
            .map_err(|error| store_error(&context, error))?;

        Ok(revision)
    }

    async fn create_resource_namespace(
        &self,
        provider: RbacProvider,
        namespace: ResourceNamespace,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO resource_namespaces (provider, id, name)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(provider.as_str())
        .bind(namespace.id.as_str())
        .bind(namespace.name.as_str())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            if is_unique_violation(&error) {
                return AppError::Conflict(format!(
                    "resource namespace '{}' already exists",
                    namespace.id
                ));
            }
            store_error(
                &format!("failed to create resource namespace '{}'", namespace.id),
                error,
            )
        })?;

        Ok(())
    }

    async fn list_resource_namespaces(
        &self,
        provider: RbacProvider,
    ) -> AppResult<Vec<ResourceNamespace>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT id, name
            FROM resource_namespaces
            WHERE provider = $1
            ORDER BY id
            "#,
        )
        .bind(provider.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            store_error(&format!("failed to list resource namespaces of '{provider}'"), error)
        })?;

        Ok(rows
            .into_iter()
            .map(|(id, name)| ResourceNamespace { id, name })
            .collect())
    }

    async fn find_resource_namespace(
        &self,
        provider: RbacProvider,
        namespace_id: &str,
    ) -> AppResult<Option<ResourceNamespace>> {
        let row = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT id, name
            FROM resource_namespaces
            WHERE provider = $1 AND id = $2
            "#,
        )
        .bind(provider.as_str())
        .bind(namespace_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            store_error(&format!("failed to find resource namespace '{namespace_id}'"), error)
        })?;

        Ok(row.map(|(id, name)| ResourceNamespace { id, name }))
    }

    async fn create_resource_action(
        &self,
        provider: RbacProvider,
        action: ResourceAction,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO resource_actions (
                provider,
                id,
                resource_namespace_id,
                name,
                description,
                is_privileged
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(provider.as_str())
        .bind(action.id.as_str())
        .bind(action.resource_namespace_id.as_str())
        .bind(action.name.as_str())
        .bind(action.description.as_str())
        .bind(action.is_privileged)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            if is_unique_violation(&error) {
                return AppError::Conflict(format!(
                    "resource action '{}' already exists",
                    action.name
                ));
            }
            store_error(
                &format!("failed to create resource action '{}'", action.name),
                error,
            )
        })?;

        Ok(())
    }

    async fn list_resource_actions(
        &self,
        provider: RbacProvider,
        namespace_id: Option<&str>,
    ) -> AppResult<Vec<ResourceAction>> {
        let rows = sqlx::query_as::<_, ResourceActionRow>(
            r#"
            SELECT id, resource_namespace_id, name, description, is_privileged
            FROM resource_actions
            WHERE provider = $1
              AND ($2::TEXT IS NULL OR resource_namespace_id = $2)
            ORDER BY name
            "#,
        )
        .bind(provider.as_str())
        .bind(namespace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            store_error(&format!("failed to list resource actions of '{provider}'"), error)
        })?;

        Ok(rows.into_iter().map(ResourceAction::from).collect())
    }
}

#[async_trait]
impl PolicyRepository for PostgresRoleManagementStore {
    async fn find_policy(
        &self,
        provider: RbacProvider,
        role_definition_id: &str,
    ) -> AppResult<Option<RoleManagementPolicy>> {
        let row = sqlx::query_scalar::<_, Json<RoleManagementPolicy>>(
            r#"
            SELECT policy
            FROM role_management_policies
            WHERE provider = $1 AND role_definition_id = $2
            "#,
        )
        .bind(provider.as_str())
        .bind(role_definition_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            store_error(
                &format!("failed to find policy of role '{role_definition_id}'"),
                error,
            )
        })?;

        Ok(row.map(|policy| policy.0))
    }

    async fn save_policy(
        &self,
        provider: RbacProvider,
        policy: RoleManagementPolicy,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO role_management_policies (provider, role_definition_id, policy, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (provider, role_definition_id)
            DO UPDATE SET
                policy = EXCLUDED.policy,
                updated_at = now()
            "#,
        )
        .bind(provider.as_str())
        .bind(policy.role_definition_id.as_str())
        .bind(Json(&policy))
        .execute(&self.pool)
        .await
        .map_err(|error| {
            store_error(
                &format!("failed to save policy of role '{}'", policy.role_definition_id),
                error,
            )
        })?;

        Ok(())
    }
}
