mod catalog;
mod common;
mod requests;

pub use catalog::{
    CreateResourceActionRequest, CreateResourceNamespaceRequest, CreateRoleAssignmentRequest,
    EffectivePermissionsResponse,
};
pub use common::{CollectionResponse, HealthDependencyStatus, HealthResponse};
pub use requests::{
    ApprovalDecisionRequest, CorrectRequestMetadataRequest, SubmitScheduleRequestRequest,
};
