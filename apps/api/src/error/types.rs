use serde::Serialize;

/// Problem-details payload returned for every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    category: &'static str,
    retryable: bool,
}

impl ErrorResponse {
    pub(super) fn new(
        code: &'static str,
        message: String,
        category: &'static str,
        retryable: bool,
    ) -> Self {
        Self {
            error: ErrorBody {
                code,
                message,
                category,
                retryable,
            },
        }
    }
}
