//! Development notifier that logs approval notifications.

use async_trait::async_trait;
use tracing::info;
use warden_application::{ApprovalNotification, ApprovalNotifier};
use warden_core::AppResult;

/// Logs every approval notification through `tracing`.
#[derive(Clone, Default)]
pub struct TracingApprovalNotifier;

impl TracingApprovalNotifier {
    /// Creates a logging notifier.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ApprovalNotifier for TracingApprovalNotifier {
    async fn notify_approvers(&self, notification: &ApprovalNotification) -> AppResult<()> {
        info!(
            provider = %notification.provider,
            approval_id = %notification.approval_id,
            request_id = %notification.request_id,
            principal_id = %notification.principal_id,
            role_definition_id = %notification.role_definition_id,
            approvers = ?notification.approver_ids,
            expires = %notification.expires_date_time,
            "approval requested"
        );

        Ok(())
    }
}
