use std::sync::Arc;

use tracing::warn;

use crate::role_management_ports::{AuditEvent, AuditRepository};

/// Best-effort writer for the audit sink; failures are logged, never rolled back.
#[derive(Clone)]
pub struct AuditTrail {
    repository: Arc<dyn AuditRepository>,
}

impl AuditTrail {
    /// Creates an audit trail over the sink.
    #[must_use]
    pub fn new(repository: Arc<dyn AuditRepository>) -> Self {
        Self { repository }
    }

    /// Appends events in order.
    pub async fn record_all(&self, events: Vec<AuditEvent>) {
        for event in events {
            self.record(event).await;
        }
    }

    /// Appends one event.
    pub async fn record(&self, event: AuditEvent) {
        let provider = event.provider;
        let action = event.action.as_str();
        let subject = event.subject.clone();
        if let Err(error) = self.repository.append_event(event).await {
            warn!(
                provider = %provider,
                action,
                subject = %subject,
                error = %error,
                "failed to append audit event"
            );
        }
    }
}
