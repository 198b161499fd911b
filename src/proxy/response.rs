use axum::{
    body::Body,
    http::{header, HeaderValue, Method, StatusCode},
    response::Response,
};
use flate2::read::GzDecoder;
use futures::TryStreamExt;
use std::io::Read;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use super::{strip_hop_by_hop, RewritePolicy};
use crate::auth::Credential;
use crate::correlation::{CorrelationKey, CorrelationStore, RequestContext};
use crate::error::{ProxyError, Result};
use crate::models::EnvironmentId;

/// Body rewriting failures; the original body is delivered instead
#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("Failed to decompress gzip body: {0}")]
    Decompress(#[from] std::io::Error),

    #[error("Body is not valid UTF-8: {0}")]
    NotUtf8(#[from] std::string::FromUtf8Error),
}

/// Replace every upstream base URL in `text` with the client-facing base URL
///
/// Both the plain endpoint and its explicit `:443` spelling are replaced.
pub fn substitute_upstream_urls(text: &str, endpoint: &Url, context: &RequestContext) -> String {
    let public = endpoint.as_str();
    let replacement = context.base_url();

    let rewritten = match (endpoint.port(), endpoint.host_str()) {
        (None, Some(host)) => {
            let with_port = public.replacen(host, &format!("{}:443", host), 1);
            text.replace(&with_port, &replacement)
        }
        _ => text.to_string(),
    };

    rewritten.replace(public, &replacement)
}

/// Decode (when gzipped) and rewrite a buffered response body
pub fn rewrite_body(
    body: &[u8],
    gzipped: bool,
    endpoint: &Url,
    context: &RequestContext,
) -> std::result::Result<Vec<u8>, RewriteError> {
    let decoded = if gzipped {
        let mut decoded = Vec::new();
        GzDecoder::new(body).read_to_end(&mut decoded)?;
        decoded
    } else {
        body.to_vec()
    };

    let text = String::from_utf8(decoded)?;
    Ok(substitute_upstream_urls(&text, endpoint, context).into_bytes())
}

enum Encoding {
    Identity,
    Gzip,
    Other,
}

fn content_encoding(upstream: &reqwest::Response) -> Encoding {
    let value = upstream
        .headers()
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_lowercase());

    match value.as_deref() {
        None | Some("") | Some("identity") => Encoding::Identity,
        Some("gzip") | Some("x-gzip") => Encoding::Gzip,
        Some(_) => Encoding::Other,
    }
}

/// Responses that carry no body: HEAD replies, 1xx, 204 and 304
fn is_bodyless(method: &Method, status: StatusCode) -> bool {
    method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
}

/// Relay the upstream response without touching its body
fn passthrough(env: EnvironmentId, upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);

    let stream = upstream.bytes_stream().inspect_err(move |e| {
        tracing::warn!(env = %env, error = %e, "Upstream body stream failed");
    });

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Rewrites upstream URLs in package metadata returned to clients
#[derive(Clone)]
pub struct ResponseRewriter {
    correlations: CorrelationStore,
    policy: Arc<RewritePolicy>,
}

impl ResponseRewriter {
    pub fn new(correlations: CorrelationStore, policy: Arc<RewritePolicy>) -> Self {
        Self {
            correlations,
            policy,
        }
    }

    /// Turn the upstream response for request `key` into the client response
    ///
    /// The stored request context is consumed whatever the outcome. Only a
    /// failure to read the upstream body is an error; rewrite failures fall
    /// back to the original body.
    pub async fn rewrite(
        &self,
        env: EnvironmentId,
        key: CorrelationKey,
        method: &Method,
        credential: &Credential,
        user_agent: Option<&str>,
        upstream: reqwest::Response,
    ) -> Result<Response> {
        let context = self.correlations.take(&key);

        if upstream.status() == StatusCode::NOT_FOUND {
            return Ok(passthrough(env, upstream));
        }

        // Keep the upstream Content-Length of a HEAD or 304 reply
        if is_bodyless(method, upstream.status()) {
            return Ok(passthrough(env, upstream));
        }

        let content_type = upstream
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        if !self.policy.should_rewrite(user_agent, content_type) {
            return Ok(passthrough(env, upstream));
        }

        let Some(context) = context else {
            tracing::warn!(env = %env, correlation_id = %key, "Request context missing, response not rewritten");
            return Ok(passthrough(env, upstream));
        };

        let gzipped = match content_encoding(&upstream) {
            Encoding::Identity => false,
            Encoding::Gzip => true,
            Encoding::Other => {
                tracing::debug!(env = %env, correlation_id = %key, "Unsupported content encoding, response not rewritten");
                return Ok(passthrough(env, upstream));
            }
        };

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        let original = upstream.bytes().await.map_err(|e| {
            tracing::warn!(env = %env, correlation_id = %key, error = %e, "Failed to read upstream body");
            ProxyError::Upstream(format!("Failed to read upstream body: {}", e))
        })?;

        let body = match rewrite_body(&original, gzipped, &credential.endpoint_url, &context) {
            Ok(rewritten) => {
                if gzipped {
                    headers.remove(header::CONTENT_ENCODING);
                }
                tracing::debug!(
                    env = %env,
                    correlation_id = %key,
                    before = original.len(),
                    after = rewritten.len(),
                    "Rewrote response body"
                );
                rewritten
            }
            Err(e) => {
                tracing::warn!(env = %env, correlation_id = %key, error = %e, "Response rewrite failed, forwarding original body");
                original.to_vec()
            }
        };

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}
