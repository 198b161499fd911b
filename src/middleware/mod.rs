// Health gate middleware

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::ProxyError;
use crate::health::{Health, HealthState};

/// Health gate middleware
///
/// Once the process has been marked as failed, every request behind this
/// layer is answered with 503 instead of reaching the upstream.
pub async fn health_gate(
    State(health): State<HealthState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match health.current() {
        Health::Healthy => next.run(request).await,
        Health::Failed { reason } => {
            tracing::warn!(
                method = %request.method(),
                path = %request.uri().path(),
                "Rejecting request, proxy is shutting down"
            );
            ProxyError::Unavailable(reason).into_response()
        }
    }
}
