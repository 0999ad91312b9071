//! Request error taxonomy for the gateway. Every variant maps to one HTTP
//! status and renders as a `{"detail": "..."}` body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use crate::forward::ForwardError;
use crate::signature::SignatureError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Body empty")]
    EmptyBody,

    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Conversation transcript empty")]
    EmptyTranscript,

    /// Parser forwarding is a hard dependency when enabled; its failures
    /// abort the request instead of being swallowed.
    #[error("{0}")]
    ParserUnreachable(String),

    #[error(transparent)]
    Forward(#[from] ForwardError),

    #[error("Invalid internal access token")]
    InvalidInternalToken,

    #[error("Kapso client not configured")]
    KapsoNotConfigured,

    /// Upstream status mirrored back to internal callers.
    #[error("{detail}")]
    Upstream { status: StatusCode, detail: String },

    #[error("{0}")]
    BadGateway(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::EmptyBody | Self::EmptyTranscript => StatusCode::BAD_REQUEST,
            Self::Signature(_) | Self::InvalidInternalToken => StatusCode::UNAUTHORIZED,
            Self::InvalidPayload(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::KapsoNotConfigured => StatusCode::NOT_FOUND,
            Self::Upstream { status, .. } => *status,
            Self::ParserUnreachable(_) | Self::Forward(_) | Self::BadGateway(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed ({status}): {self}");
        }
        let body = serde_json::json!({ "detail": self.to_string() });
        (status, Json(body)).into_response()
    }
}
