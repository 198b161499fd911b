// Request/response interception pipeline
// Credential injection on the way up, URL rewriting on the way down

pub mod pipeline;
pub mod request;
pub mod response;

use axum::http::{header, HeaderMap, HeaderName};

pub use pipeline::{join_upstream_url, PipelineCache, UpstreamClient, UpstreamPipeline};
pub use request::{extract_route_token, OutboundRequest, RequestRewriter, RewrittenRequest};
pub use response::{rewrite_body, substitute_upstream_urls, ResponseRewriter, RewriteError};

/// Default user agent fragments identifying package-manager clients
pub const DEFAULT_PACKAGE_MANAGER_AGENTS: &[&str] = &["npm", "yarn", "pip"];

/// Connection-scoped headers that must not cross the proxy
fn hop_by_hop_headers() -> [HeaderName; 7] {
    [
        header::CONNECTION,
        header::PROXY_AUTHENTICATE,
        header::PROXY_AUTHORIZATION,
        header::TE,
        header::TRAILER,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
    ]
}

/// Remove hop-by-hop headers, including any named by the `Connection` header
pub(crate) fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named.into_iter().chain(hop_by_hop_headers()) {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

/// Decides which responses get their bodies rewritten
#[derive(Debug, Clone)]
pub struct RewritePolicy {
    user_agents: Vec<String>,
}

impl RewritePolicy {
    pub fn new<I, S>(user_agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            user_agents: user_agents
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Whether the user agent belongs to a package-manager client
    pub fn is_package_manager(&self, user_agent: Option<&str>) -> bool {
        let Some(user_agent) = user_agent else {
            return false;
        };
        let user_agent = user_agent.to_lowercase();
        self.user_agents
            .iter()
            .any(|fragment| user_agent.contains(fragment.as_str()))
    }

    /// `application/json` or a vendor JSON variant such as `application/vnd.npm.install-v1+json`
    pub fn is_json_content_type(content_type: Option<&str>) -> bool {
        let Some(content_type) = content_type else {
            return false;
        };
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();

        essence == "application/json"
            || (essence.starts_with("application/vnd.") && essence.ends_with("+json"))
    }

    pub fn should_rewrite(&self, user_agent: Option<&str>, content_type: Option<&str>) -> bool {
        self.is_package_manager(user_agent) && Self::is_json_content_type(content_type)
    }
}

impl Default for RewritePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_PACKAGE_MANAGER_AGENTS)
    }
}
