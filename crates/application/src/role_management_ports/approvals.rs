use async_trait::async_trait;
use chrono::{DateTime, Utc};
use warden_core::{AppResult, RbacProvider};
use warden_domain::{RequestAction, RoleManagementPolicy, ScheduleKind};

/// Repository port for per-role management policies.
#[async_trait]
pub trait PolicyRepository: Send + Sync {
    /// Finds the stored policy of a role definition.
    async fn find_policy(
        &self,
        provider: RbacProvider,
        role_definition_id: &str,
    ) -> AppResult<Option<RoleManagementPolicy>>;

    /// Inserts or replaces a policy.
    async fn save_policy(&self, provider: RbacProvider, policy: RoleManagementPolicy)
    -> AppResult<()>;
}

/// Message sent to approvers when an approval opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalNotification {
    /// Provider partition.
    pub provider: RbacProvider,
    /// Approval id.
    pub approval_id: String,
    /// Gated request id.
    pub request_id: String,
    /// Kind of the gated request.
    pub request_kind: ScheduleKind,
    /// Requested action.
    pub action: RequestAction,
    /// Principal the request is about.
    pub principal_id: String,
    /// Requested role.
    pub role_definition_id: String,
    /// Approvers to notify.
    pub approver_ids: Vec<String>,
    /// Justification supplied by the requester.
    pub justification: Option<String>,
    /// Decision deadline.
    pub expires_date_time: DateTime<Utc>,
}

/// Outbound port delivering approval notifications.
#[async_trait]
pub trait ApprovalNotifier: Send + Sync {
    /// Delivers one notification.
    async fn notify_approvers(&self, notification: &ApprovalNotification) -> AppResult<()>;
}
