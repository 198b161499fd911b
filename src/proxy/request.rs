use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Method, Request},
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use std::sync::Arc;

use super::{strip_hop_by_hop, RewritePolicy};
use crate::auth::{Credential, CredentialCache};
use crate::correlation::{CorrelationKey, CorrelationStore, RequestContext};
use crate::error::{ProxyError, Result};
use crate::models::EnvironmentId;

const BEARER_PREFIX: &str = "Bearer ";

/// Extract the route token from `Authorization: Bearer <token>`
///
/// Anything else (absent header, non-ASCII value, other scheme, empty token)
/// is rejected without touching any state.
pub fn extract_route_token(headers: &HeaderMap) -> Result<&str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ProxyError::MissingBearer)?;

    let token = value
        .strip_prefix(BEARER_PREFIX)
        .map(str::trim)
        .ok_or(ProxyError::MissingBearer)?;

    if token.is_empty() || token.contains(char::is_whitespace) {
        return Err(ProxyError::MissingBearer);
    }

    Ok(token)
}

/// Scheme the client used to reach us
///
/// TLS terminates in front of the proxy, so `X-Forwarded-Proto` wins over the
/// connection's own scheme.
fn original_scheme(request: &Request<Body>) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_lowercase());

    match forwarded.as_deref() {
        Some("https") => "https".to_string(),
        Some("http") => "http".to_string(),
        _ => request.uri().scheme_str().unwrap_or("http").to_string(),
    }
}

fn original_host(request: &Request<Body>) -> Option<String> {
    request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.to_string()))
}

/// Request as it will be sent upstream, minus the target URL
pub struct OutboundRequest {
    pub method: Method,
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Body,
}

/// Result of rewriting an inbound request
pub struct RewrittenRequest {
    /// Key under which the request context was stashed
    pub key: CorrelationKey,
    /// Credential snapshot the request was signed with
    pub credential: Arc<Credential>,
    pub outbound: OutboundRequest,
}

/// Injects the environment credential into inbound requests
#[derive(Clone)]
pub struct RequestRewriter {
    credentials: Arc<CredentialCache>,
    correlations: CorrelationStore,
    policy: Arc<RewritePolicy>,
    username: String,
}

impl RequestRewriter {
    pub fn new(
        credentials: Arc<CredentialCache>,
        correlations: CorrelationStore,
        policy: Arc<RewritePolicy>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            correlations,
            policy,
            username: username.into(),
        }
    }

    fn basic_auth(&self, credential: &Credential) -> Result<HeaderValue> {
        let encoded = BASE64.encode(format!(
            "{}:{}",
            self.username, credential.authorization_token
        ));
        let mut value = HeaderValue::from_str(&format!("Basic {}", encoded))
            .map_err(|e| ProxyError::Internal(anyhow::anyhow!("Invalid credential: {}", e)))?;
        value.set_sensitive(true);
        Ok(value)
    }

    /// Rewrite a request already routed to `env`
    ///
    /// Fails with 503-class errors when no usable credential exists; on success
    /// the request context is stored under the returned key.
    pub async fn rewrite(&self, env: EnvironmentId, request: Request<Body>) -> Result<RewrittenRequest> {
        let credential = self
            .credentials
            .get(env)
            .await
            .ok_or(ProxyError::NotAuthenticated(env))?;

        if credential.is_expired(Utc::now()) {
            tracing::error!(env = %env, "Refusing to proxy with an expired credential");
            return Err(ProxyError::CredentialExpired(env));
        }

        let host = original_host(&request).ok_or(ProxyError::MissingHost)?;
        let context = RequestContext::new(original_scheme(&request), host);

        let user_agent = request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let (parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::AUTHORIZATION);

        let endpoint_host = credential.endpoint_host();
        tracing::debug!(env = %env, from = %context.original_host, to = %endpoint_host, "Rewriting Host");
        headers.insert(
            header::HOST,
            HeaderValue::from_str(&endpoint_host)
                .map_err(|e| ProxyError::Internal(anyhow::anyhow!("Invalid endpoint host: {}", e)))?,
        );
        headers.insert(header::AUTHORIZATION, self.basic_auth(&credential)?);

        // Only gzip can be decoded for rewriting
        if self.policy.is_package_manager(user_agent.as_deref())
            && headers.contains_key(header::ACCEPT_ENCODING)
        {
            headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        }

        let key = self.correlations.insert(context);

        Ok(RewrittenRequest {
            key,
            credential,
            outbound: OutboundRequest {
                method: parts.method,
                path_and_query,
                headers,
                body,
            },
        })
    }
}
