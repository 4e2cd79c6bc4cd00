use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::Response;
use warden_core::{AppError, AppResult, CallerIdentity};

use crate::error::ApiResult;
use crate::state::AppState;

pub const PRINCIPAL_ID_HEADER: &str = "x-warden-principal-id";
pub const PRINCIPAL_NAME_HEADER: &str = "x-warden-principal-name";
pub const AUTHN_METHODS_HEADER: &str = "x-warden-authn-methods";

/// Accepts the caller identity asserted by the trusted gateway.
pub async fn require_gateway_identity(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> ApiResult<Response> {
    let identity = gateway_identity(request.headers(), &state.gateway_shared_secret)?;

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

pub(crate) fn gateway_identity(headers: &HeaderMap, shared_secret: &str) -> AppResult<CallerIdentity> {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("gateway credentials are required".to_owned()))?;
    if !secrets_match(presented.trim().as_bytes(), shared_secret.as_bytes()) {
        return Err(AppError::Unauthorized(
            "gateway credentials are invalid".to_owned(),
        ));
    }

    let principal_id = header_text(headers, PRINCIPAL_ID_HEADER)
        .ok_or_else(|| AppError::Unauthorized(format!("{PRINCIPAL_ID_HEADER} is required")))?;
    let display_name = header_text(headers, PRINCIPAL_NAME_HEADER).unwrap_or(principal_id);
    let mfa_satisfied = header_text(headers, AUTHN_METHODS_HEADER).is_some_and(|methods| {
        methods
            .split(',')
            .any(|method| method.trim().eq_ignore_ascii_case("mfa"))
    });

    Ok(CallerIdentity::new(principal_id, display_name).with_mfa(mfa_satisfied))
}

pub(crate) fn header_text<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn secrets_match(presented: &[u8], expected: &[u8]) -> bool {
    if presented.len() != expected.len() {
        return false;
    }

    presented
        .iter()
        .zip(expected)
        .fold(0_u8, |difference, (left, right)| difference | (left ^ right))
        == 0
}
