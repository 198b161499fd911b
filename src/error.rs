// Error handling module
// Defines per-request errors and their HTTP response conversion

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::EnvironmentId;

/// Literal body returned for unknown route tokens
pub const FORBIDDEN_BODY: &str = "403: Forbidden";

/// Errors that can occur while proxying a request
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Authorization header missing or not of the `Bearer <token>` shape
    #[error("Missing or malformed bearer token")]
    MissingBearer,

    /// Bearer token is not bound to any environment
    #[error("Unknown route token")]
    UnknownRoute,

    /// Request carries no Host header to rewrite responses against
    #[error("Missing Host header")]
    MissingHost,

    /// No credential has been obtained for the environment yet
    #[error("Environment {0} is not authenticated yet")]
    NotAuthenticated(EnvironmentId),

    /// The current credential is past its lifetime
    #[error("Credential for {0} environment has expired")]
    CredentialExpired(EnvironmentId),

    /// The process has been marked as failed and is draining
    #[error("Proxy is unavailable: {0}")]
    Unavailable(String),

    /// Upstream did not answer within the request timeout
    #[error("Upstream request timed out: {0}")]
    UpstreamTimeout(String),

    /// Transport-level failure talking to the upstream repository
    #[error("Upstream request failed: {0}")]
    Upstream(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingBearer => StatusCode::UNAUTHORIZED,
            ProxyError::UnknownRoute => StatusCode::FORBIDDEN,
            ProxyError::MissingHost => StatusCode::BAD_REQUEST,
            ProxyError::NotAuthenticated(_)
            | ProxyError::CredentialExpired(_)
            | ProxyError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ProxyError::MissingBearer => "auth_error",
            ProxyError::UnknownRoute => "forbidden",
            ProxyError::MissingHost => "bad_request",
            ProxyError::NotAuthenticated(_) | ProxyError::CredentialExpired(_) => {
                "credential_unavailable"
            }
            ProxyError::Unavailable(_) => "unavailable",
            ProxyError::UpstreamTimeout(_) | ProxyError::Upstream(_) => "upstream_error",
            ProxyError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();

        match self {
            ProxyError::UnknownRoute => {
                return (
                    status,
                    [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                    FORBIDDEN_BODY,
                )
                    .into_response();
            }
            ProxyError::MissingBearer => {
                let body = Json(json!({
                    "error": {
                        "message": self.to_string(),
                        "type": self.error_type(),
                    }
                }));
                return (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response();
            }
            ProxyError::Internal(ref err) => {
                // Log internal errors
                tracing::error!("Internal error: {:?}", err);
            }
            _ => {}
        }

        let message = match self {
            ProxyError::Internal(_) => "Internal server error".to_string(),
            ref other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": self.error_type(),
            }
        }));

        (status, body).into_response()
    }
}

/// Result type alias for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;
