use anyhow::Context;
use axum::body::HttpBody;
use dashmap::DashMap;
use reqwest::{redirect, Client, Response};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::request::OutboundRequest;
use crate::error::ProxyError;
use crate::models::EnvironmentId;

/// Shared HTTP client for upstream repositories
///
/// One connection pool serves every environment. Redirects are returned to
/// the client untouched and failed calls are never retried here.
///
/// `request_timeout` bounds the wait for response headers and each idle gap
/// while reading the body, never the whole transfer: large tarballs may take
/// longer than the timeout to stream.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
    request_timeout: Duration,
}

impl UpstreamClient {
    /// Create a new upstream client
    pub fn new(
        max_connections: usize,
        connect_timeout: u64,
        request_timeout: u64,
    ) -> anyhow::Result<Self> {
        let request_timeout = Duration::from_secs(request_timeout);
        let client = Client::builder()
            .pool_max_idle_per_host(max_connections)
            .connect_timeout(Duration::from_secs(connect_timeout))
            .read_timeout(request_timeout)
            .redirect(redirect::Policy::none())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            request_timeout,
        })
    }

    /// Get the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

/// Join the endpoint base path with an inbound path and query
///
/// `https://host/npm/repo/` + `/pkg?x=1` gives `https://host/npm/repo/pkg?x=1`.
pub fn join_upstream_url(endpoint: &Url, path_and_query: &str) -> Url {
    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path_and_query, None),
    };

    let base = endpoint.path();
    let joined = match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    };

    let query = match (
        endpoint.query().filter(|q| !q.is_empty()),
        query.filter(|q| !q.is_empty()),
    ) {
        (Some(base), Some(extra)) => Some(format!("{}&{}", base, extra)),
        (Some(base), None) => Some(base.to_string()),
        (None, Some(extra)) => Some(extra.to_string()),
        (None, None) => None,
    };

    let mut url = endpoint.clone();
    url.set_path(&joined);
    url.set_query(query.as_deref());
    url
}

/// Forwarding pipeline bound to one environment's endpoint
pub struct UpstreamPipeline {
    env: EnvironmentId,
    endpoint: Url,
    client: Client,
    response_timeout: Duration,
}

impl UpstreamPipeline {
    pub fn new(env: EnvironmentId, endpoint: Url, client: &UpstreamClient) -> Self {
        Self {
            env,
            endpoint,
            client: client.client().clone(),
            response_timeout: client.request_timeout(),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Send the request upstream, mapping transport failures to gateway errors
    pub async fn forward(&self, outbound: OutboundRequest) -> Result<Response, ProxyError> {
        let url = join_upstream_url(&self.endpoint, &outbound.path_and_query);
        tracing::debug!(env = %self.env, method = %outbound.method, url = %url, "Sending request upstream");

        let mut request = self
            .client
            .request(outbound.method, url.clone())
            .headers(outbound.headers);
        // Bodyless requests must not go out chunked
        if !outbound.body.is_end_stream() {
            request = request.body(reqwest::Body::wrap_stream(outbound.body.into_data_stream()));
        }
        let result = match tokio::time::timeout(self.response_timeout, request.send()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    env = %self.env,
                    error_kind = "timeout",
                    url = %url,
                    timeout_secs = self.response_timeout.as_secs(),
                    "Upstream sent no response headers in time"
                );
                return Err(ProxyError::UpstreamTimeout(format!(
                    "no response from upstream within {}s",
                    self.response_timeout.as_secs()
                )));
            }
        };

        match result {
            Ok(response) => {
                tracing::debug!(env = %self.env, status = %response.status(), "Received upstream response");
                Ok(response)
            }
            Err(e) => {
                // Categorize the error for better debugging
                let error_kind = if e.is_timeout() {
                    "timeout"
                } else if e.is_connect() {
                    "connection_failed"
                } else if e.is_request() {
                    "request_error"
                } else if e.is_body() {
                    "body_error"
                } else {
                    "unknown"
                };

                tracing::warn!(
                    env = %self.env,
                    error_kind = error_kind,
                    error = %e,
                    url = %url,
                    "Upstream request failed"
                );

                if e.is_timeout() {
                    Err(ProxyError::UpstreamTimeout(e.to_string()))
                } else {
                    Err(ProxyError::Upstream(format!("{} (kind: {})", e, error_kind)))
                }
            }
        }
    }
}

/// Per-environment pipelines, built lazily on first use
#[derive(Default)]
pub struct PipelineCache {
    pipelines: DashMap<EnvironmentId, Arc<UpstreamPipeline>>,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline for `env` bound to `endpoint`
    ///
    /// Racing first requests may both construct a pipeline; the first insert
    /// wins and later racers reuse it. A pipeline bound to a different
    /// endpoint is replaced.
    pub fn get_or_build(
        &self,
        env: EnvironmentId,
        endpoint: &Url,
        client: &UpstreamClient,
    ) -> Arc<UpstreamPipeline> {
        if let Some(existing) = self.pipelines.get(&env) {
            if existing.endpoint() == endpoint {
                return existing.clone();
            }
        }

        let mut entry = self
            .pipelines
            .entry(env)
            .or_insert_with(|| {
                tracing::info!(env = %env, upstream = %endpoint, "Building upstream pipeline");
                Arc::new(UpstreamPipeline::new(env, endpoint.clone(), client))
            });

        if entry.endpoint() != endpoint {
            tracing::info!(
                env = %env,
                from = %entry.endpoint(),
                to = %endpoint,
                "Upstream endpoint changed, rebinding pipeline"
            );
            *entry = Arc::new(UpstreamPipeline::new(env, endpoint.clone(), client));
        }

        entry.clone()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.pipelines.len()
    }
}
