use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::{self as axum_middleware},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::auth::CredentialCache;
use crate::correlation::CorrelationStore;
use crate::error::ProxyError;
use crate::health::{Health, HealthState};
use crate::middleware;
use crate::proxy::{
    extract_route_token, PipelineCache, RequestRewriter, ResponseRewriter, RewritePolicy,
    UpstreamClient,
};
use crate::token_router::TokenRouter;

/// Application version from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Health route path; npm package names cannot start with `_`
pub const HEALTH_PATH: &str = "/_health";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<TokenRouter>,
    pub credentials: Arc<CredentialCache>,
    pub request_rewriter: RequestRewriter,
    pub response_rewriter: ResponseRewriter,
    pub pipelines: Arc<PipelineCache>,
    pub upstream: UpstreamClient,
    pub correlations: CorrelationStore,
    pub health: HealthState,
}

impl AppState {
    /// Wire the proxy components around shared stores
    pub fn new(
        router: TokenRouter,
        credentials: Arc<CredentialCache>,
        upstream: UpstreamClient,
        policy: RewritePolicy,
        basic_auth_username: impl Into<String>,
        health: HealthState,
    ) -> Self {
        let correlations = CorrelationStore::new();
        let policy = Arc::new(policy);

        Self {
            router: Arc::new(router),
            request_rewriter: RequestRewriter::new(
                credentials.clone(),
                correlations.clone(),
                policy.clone(),
                basic_auth_username,
            ),
            response_rewriter: ResponseRewriter::new(correlations.clone(), policy),
            credentials,
            pipelines: Arc::new(PipelineCache::new()),
            upstream,
            correlations,
            health,
        }
    }
}

/// Health check route (never gated, for orchestrator liveness checks)
pub fn health_routes(health: HealthState) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health_handler))
        .with_state(health)
}

/// Catch-all proxy routes, closed once the process is marked failed
pub fn proxy_routes(state: AppState) -> Router {
    Router::new()
        .fallback(proxy_handler)
        .layer(axum_middleware::from_fn_with_state(
            state.health.clone(),
            middleware::health_gate,
        ))
        .with_state(state)
}

/// Body of the health route
#[derive(Debug, Serialize)]
struct HealthReport<'a> {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    timestamp: DateTime<Utc>,
    version: &'static str,
}

/// GET /_health - Liveness check
///
/// 200 while healthy, 503 with the failure reason once the process is draining.
async fn health_handler(State(health): State<HealthState>) -> Response {
    let current = health.current();
    let (status, report) = match &current {
        Health::Healthy => (
            StatusCode::OK,
            HealthReport {
                status: "healthy",
                reason: None,
                timestamp: Utc::now(),
                version: VERSION,
            },
        ),
        Health::Failed { reason } => (
            StatusCode::SERVICE_UNAVAILABLE,
            HealthReport {
                status: "failed",
                reason: Some(reason.as_str()),
                timestamp: Utc::now(),
                version: VERSION,
            },
        ),
    };

    (status, Json(report)).into_response()
}

/// Any method, any path - forward to the environment selected by the route token
async fn proxy_handler(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Result<Response, ProxyError> {
    let token = extract_route_token(request.headers()).map_err(|e| {
        tracing::warn!(
            method = %request.method(),
            path = %request.uri().path(),
            "Request without a usable bearer token"
        );
        e
    })?;

    let env = state.router.resolve(token).ok_or_else(|| {
        tracing::warn!(
            method = %request.method(),
            path = %request.uri().path(),
            "Request with an unknown route token"
        );
        ProxyError::UnknownRoute
    })?;

    let method = request.method().clone();
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    tracing::info!(
        env = %env,
        method = %request.method(),
        path = %request.uri().path(),
        "Proxying request"
    );

    let rewritten = state.request_rewriter.rewrite(env, request).await?;
    let key = rewritten.key;
    let credential = rewritten.credential;

    let pipeline = state
        .pipelines
        .get_or_build(env, &credential.endpoint_url, &state.upstream);

    let upstream = match pipeline.forward(rewritten.outbound).await {
        Ok(upstream) => upstream,
        Err(e) => {
            state.correlations.take(&key);
            return Err(e);
        }
    };

    let status = upstream.status();
    let response = state
        .response_rewriter
        .rewrite(env, key, &method, &credential, user_agent.as_deref(), upstream)
        .await?;

    tracing::info!(env = %env, correlation_id = %key, status = %status, "Request completed");
    Ok(response)
}
