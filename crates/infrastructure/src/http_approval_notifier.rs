use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use warden_application::{ApprovalNotification, ApprovalNotifier};
use warden_core::{AppError, AppResult};

/// Posts approval notifications to a webhook endpoint.
pub struct HttpApprovalNotifier {
    http_client: reqwest::Client,
    endpoint: String,
    max_attempts: u8,
    retry_backoff_ms: u64,
}

impl HttpApprovalNotifier {
    /// Creates a webhook notifier.
    #[must_use]
    pub fn new(
        http_client: reqwest::Client,
        endpoint: impl Into<String>,
        max_attempts: u8,
        retry_backoff_ms: u64,
    ) -> Self {
        Self {
            http_client,
            endpoint: endpoint.into(),
            max_attempts: max_attempts.max(1),
            retry_backoff_ms: retry_backoff_ms.max(50),
        }
    }
}

fn payload(notification: &ApprovalNotification) -> serde_json::Value {
    json!({
        "event": "approval.opened",
        "provider": notification.provider.as_str(),
        "approvalId": notification.approval_id,
        "requestId": notification.request_id,
        "requestKind": notification.request_kind.as_str(),
        "action": notification.action.as_str(),
        "principalId": notification.principal_id,
        "roleDefinitionId": notification.role_definition_id,
        "approverIds": notification.approver_ids,
        "justification": notification.justification,
        "expiresDateTime": notification.expires_date_time,
    })
}

#[async_trait]
impl ApprovalNotifier for HttpApprovalNotifier {
    async fn notify_approvers(&self, notification: &ApprovalNotification) -> AppResult<()> {
        let body = payload(notification);
        let mut attempt = 0_u8;
        let mut last_error: Option<String> = None;

        while attempt < self.max_attempts {
            attempt = attempt.saturating_add(1);
            let response = self
                .http_client
                .post(self.endpoint.as_str())
                .header("Idempotency-Key", notification.approval_id.as_str())
                .header("X-Warden-Event", "approval.opened")
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response)
                    if response.status().is_server_error()
                        || response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS =>
                {
                    last_error = Some(format!(
                        "transient HTTP status {} notifying approvers of '{}'",
                        response.status(),
                        notification.approval_id
                    ));
                }
                Ok(response) => {
                    let status = response.status();
                    let detail = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "<response body unavailable>".to_owned());
                    return Err(AppError::Internal(format!(
                        "approval webhook rejected notification with status {status}: {detail}"
                    )));
                }
                Err(error) => {
                    last_error = Some(format!("approval webhook transport error: {error}"));
                }
            }

            if attempt < self.max_attempts {
                let delay = self.retry_backoff_ms.saturating_mul(u64::from(attempt));
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        Err(AppError::Transient(last_error.unwrap_or_else(|| {
            "approval webhook exhausted retries".to_owned()
        })))
    }
}
