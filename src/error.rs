// =============================================================================
// Error taxonomy — unified ApiError with HTTP response mapping
// =============================================================================
//
// Everything a handler can fail with is collapsed into one enum so that the
// REST layer maps faults uniformly: caller faults (bad timeframe, provider
// rejected the request, LLM error) become 400, anything unexpected becomes
// 500. Transient provider faults never reach this type directly — they are
// retried inside the quote client and only surface here once retries are
// exhausted, already wrapped as `QuoteFetch`.
// =============================================================================

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Caller supplied a timeframe label outside the supported set.
    #[error("unsupported timeframe: {0}")]
    UnsupportedTimeframe(String),

    /// Provider interaction failed: authorization rejected, malformed
    /// payload, or transient faults that exhausted their retry budget.
    #[error("{0}")]
    QuoteFetch(String),

    /// EMA precondition violation. The configured periods (20/50/100/200)
    /// can never trigger this; it guards against future misuse.
    #[error("invalid EMA period: {0}")]
    InvalidPeriod(usize),

    /// Text-generation collaborator failed; carries the provider's
    /// status/detail. Not retried here.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Caller supplied an out-of-range or malformed query parameter.
    #[error("{0}")]
    BadRequest(String),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedTimeframe(_)
            | Self::QuoteFetch(_)
            | Self::Llm(_)
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::InvalidPeriod(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({ "detail": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
