use serde::Serialize;
use serde_json::Value;
use warden_domain::QueryPage;

/// OData collection envelope.
#[derive(Debug, Serialize)]
pub struct CollectionResponse {
    #[serde(rename = "@odata.context")]
    pub context: String,
    #[serde(rename = "@odata.count", skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    pub value: Vec<Value>,
}

impl CollectionResponse {
    pub fn from_page(context: String, page: QueryPage) -> Self {
        Self {
            context,
            count: page.count,
            value: page.rows,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthDependencyStatus {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub ready: bool,
    pub store: HealthDependencyStatus,
    pub redis: HealthDependencyStatus,
}
