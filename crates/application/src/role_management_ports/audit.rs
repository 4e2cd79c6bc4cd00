use async_trait::async_trait;
use chrono::{DateTime, Utc};
use warden_core::{AppResult, RbacProvider};
use warden_domain::AuditAction;

/// Immutable audit event payload emitted on every state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    /// Provider partition.
    pub provider: RbacProvider,
    /// Event timestamp.
    pub timestamp: DateTime<Utc>,
    /// Principal that caused the transition, or `system`.
    pub actor: String,
    /// Stable action identifier.
    pub action: AuditAction,
    /// Id of the resource that changed.
    pub subject: String,
    /// Resource type label.
    pub resource_type: String,
    /// Status before the transition.
    pub before_status: Option<String>,
    /// Status after the transition.
    pub after_status: Option<String>,
    /// Request that drove the transition.
    pub request_id: Option<String>,
    /// Optional free-form detail.
    pub detail: Option<String>,
}

impl AuditEvent {
    /// Creates an event without statuses, request or detail.
    #[must_use]
    pub fn new(
        provider: RbacProvider,
        timestamp: DateTime<Utc>,
        actor: &str,
        action: AuditAction,
        resource_type: &str,
        subject: &str,
    ) -> Self {
        Self {
            provider,
            timestamp,
            actor: actor.to_owned(),
            action,
            subject: subject.to_owned(),
            resource_type: resource_type.to_owned(),
            before_status: None,
            after_status: None,
            request_id: None,
            detail: None,
        }
    }

    /// Records the status change.
    #[must_use]
    pub fn with_statuses(mut self, before: &str, after: &str) -> Self {
        self.before_status = Some(before.to_owned());
        self.after_status = Some(after.to_owned());
        self
    }

    /// Records the driving request.
    #[must_use]
    pub fn with_request(mut self, request_id: &str) -> Self {
        self.request_id = Some(request_id.to_owned());
        self
    }

    /// Attaches free-form detail.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Audit event with its sink-assigned sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    /// Strictly increasing sequence.
    pub sequence: u64,
    /// Event payload.
    pub event: AuditEvent,
}

/// Port for the append-only audit sink.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Appends one event and returns its sequence number.
    async fn append_event(&self, event: AuditEvent) -> AppResult<u64>;

    /// Lists events of a provider in sequence order.
    async fn list_events(&self, provider: RbacProvider) -> AppResult<Vec<AuditRecord>>;
}
