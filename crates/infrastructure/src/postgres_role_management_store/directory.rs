use async_trait::async_trait;
use sqlx::FromRow;
use warden_application::DirectoryRepository;
use warden_core::AppResult;
use warden_domain::{AppScope, DirectoryObject, Principal};

use super::{PostgresRoleManagementStore, parse_column, store_error};

#[derive(Debug, FromRow)]
struct PrincipalRow {
    id: String,
    kind: String,
    display_name: String,
}

#[derive(Debug, FromRow)]
struct DirectoryObjectRow {
    id: String,
    display_name: String,
    object_type: String,
    parent_id: Option<String>,
}

#[derive(Debug, FromRow)]
struct AppScopeRow {
    id: String,
    display_name: String,
    scope_type: String,
}

#[async_trait]
impl DirectoryRepository for PostgresRoleManagementStore {
    async fn save_principal(&self, principal: Principal) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO principals (id, kind, display_name, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (id)
            DO UPDATE SET
                kind = EXCLUDED.kind,
                display_name = EXCLUDED.display_name,
                updated_at = now()
            "#,
        )
        .bind(principal.id.as_str())
        .bind(principal.kind.as_str())
        .bind(principal.display_name.as_str())
        .execute(&self.pool)
        .await
        .map_err(|error| store_error(&format!("failed to save principal '{}'", principal.id), error))?;

        Ok(())
    }

    async fn find_principal(&self, principal_id: &str) -> AppResult<Option<Principal>> {
        let row = sqlx::query_as::<_, PrincipalRow>(
            r#"
            SELECT id, kind, display_name
            FROM principals
            WHERE id = $1
            "#,
        )
        .bind(principal_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| store_error(&format!("failed to find principal '{principal_id}'"), error))?;

        row.map(|row| {
            Ok(Principal {
                id: row.id,
                kind: parse_column("principal kind", row.kind.as_str())?,
                display_name: row.display_name,
            })
        })
        .transpose()
    }

    async fn save_directory_object(&self, object: DirectoryObject) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO directory_objects (id, display_name, object_type, parent_id, updated_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (id)
            DO UPDATE SET
                display_name = EXCLUDED.display_name,
                object_type = EXCLUDED.object_type,
                parent_id = EXCLUDED.parent_id,
                updated_at = now()
            "#,
        )
        .bind(object.id.as_str())
        .bind(object.display_name.as_str())
        .bind(object.object_type.as_str())
        .bind(object.parent_id.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            store_error(&format!("failed to save directory object '{}'", object.id), error)
        })?;

        Ok(())
    }

    async fn find_directory_object(&self, object_id: &str) -> AppResult<Option<DirectoryObject>> {
        let row = sqlx::query_as::<_, DirectoryObjectRow>(
            r#"
            SELECT id, display_name, object_type, parent_id
            FROM directory_objects
            WHERE id = $1
            "#,
        )
        .bind(object_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            store_error(&format!("failed to find directory object '{object_id}'"), error)
        })?;

        Ok(row.map(|row| DirectoryObject {
            id: row.id,
            display_name: row.display_name,
            object_type: row.object_type,
            parent_id: row.parent_id,
        }))
    }

    async fn save_app_scope(&self, app_scope: AppScope) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO app_scopes (id, display_name, scope_type, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (id)
            DO UPDATE SET
                display_name = EXCLUDED.display_name,
                scope_type = EXCLUDED.scope_type,
                updated_at = now()
            "#,
        )
        .bind(app_scope.id.as_str())
        .bind(app_scope.display_name.as_str())
        .bind(app_scope.scope_type.as_str())
        .execute(&self.pool)
        .await
        .map_err(|error| store_error(&format!("failed to save app scope '{}'", app_scope.id), error))?;

        Ok(())
    }

    async fn find_app_scope(&self, app_scope_id: &str) -> AppResult<Option<AppScope>> {
        let row = sqlx::query_as::<_, AppScopeRow>(
            r#"
            SELECT id, display_name, scope_type
            FROM app_scopes
            WHERE id = $1
            "#,
        )
        .bind(app_scope_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| store_error(&format!("failed to find app scope '{app_scope_id}'"), error))?;

        Ok(row.map(|row| AppScope {
            id: row.id,
            display_name: row.display_name,
            scope_type: row.scope_type,
        }))
    }

    async fn add_group_member(&self, group_id: &str, member_id: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO group_memberships (group_id, member_id)
            VALUES ($1, $2)
            ON CONFLICT (group_id, member_id) DO NOTHING
            "#,
        )
        .bind(group_id)
        .bind(member_id)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            store_error(
                &format!("failed to add '{member_id}' to group '{group_id}'"),
                error,
            )
        })?;

        Ok(())
    }

    async fn list_direct_group_ids(&self, member_id: &str) -> AppResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT group_id
            FROM group_memberships
            WHERE member_id = $1
            ORDER BY group_id
            "#,
        )
        .bind(member_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| store_error(&format!("failed to list groups of '{member_id}'"), error))
    }

    async fn list_group_member_ids(&self, group_id: &str) -> AppResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT member_id
            FROM group_memberships
            WHERE group_id = $1
            ORDER BY member_id
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| store_error(&format!("failed to list members of '{group_id}'"), error))
    }
}
