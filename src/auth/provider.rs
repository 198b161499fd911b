use async_trait::async_trait;
use aws_config::{timeout::TimeoutConfig, BehaviorVersion, SdkConfig};
use aws_sdk_codeartifact::{
    config::Region,
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    types::PackageFormat as SdkPackageFormat,
    Client,
};
use chrono::Utc;
use dashmap::DashMap;
use std::time::Duration;
use url::Url;

use super::types::{AuthError, Credential};
use crate::models::EnvironmentConfig;

/// Requested token lifetime, in seconds
const TOKEN_DURATION_SECONDS: i64 = 3600;

/// Source of fresh service credentials
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Obtain a new authorization token and the repository endpoint it is valid for
    async fn authenticate(&self, config: &EnvironmentConfig) -> Result<Credential, AuthError>;
}

/// Credential provider backed by the CodeArtifact control plane API
///
/// AWS credentials are resolved by the SDK default chain (environment,
/// shared profile, SSO, web identity, ECS task role, instance profile) and
/// renewed by the SDK when they are temporary.
pub struct CodeArtifactProvider {
    shared: SdkConfig,
    /// Overrides the regional service endpoint when set
    api_endpoint: Option<Url>,
    /// One client per region, built on first use
    clients: DashMap<String, Client>,
}

impl CodeArtifactProvider {
    /// Load AWS settings the way the AWS CLI does
    ///
    /// `region` is only the fallback; every call uses its environment's region.
    pub async fn from_env(
        region: &str,
        api_endpoint: Option<Url>,
        request_timeout: Duration,
    ) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(request_timeout)
                    .build(),
            )
            .load()
            .await;

        Self::new(shared, api_endpoint)
    }

    pub fn new(shared: SdkConfig, api_endpoint: Option<Url>) -> Self {
        Self {
            shared,
            api_endpoint,
            clients: DashMap::new(),
        }
    }

    fn client(&self, region: &str) -> Client {
        if let Some(client) = self.clients.get(region) {
            return client.clone();
        }

        let mut builder = aws_sdk_codeartifact::config::Builder::from(&self.shared)
            .region(Region::new(region.to_string()));
        if let Some(ref endpoint) = self.api_endpoint {
            builder = builder.endpoint_url(endpoint.as_str().trim_end_matches('/'));
        }

        tracing::debug!(region, "Creating CodeArtifact client");
        self.clients
            .entry(region.to_string())
            .or_insert_with(|| Client::from_conf(builder.build()))
            .clone()
    }
}

/// Service errors keep their HTTP status; everything else is a transport failure
fn sdk_error<E>(operation: &'static str, err: SdkError<E>) -> AuthError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    match (&err, err.raw_response()) {
        (SdkError::ServiceError(_), Some(response)) => AuthError::Api {
            operation,
            status: response.status().as_u16(),
            message: err
                .as_service_error()
                .and_then(|e| e.message())
                .unwrap_or("no error message")
                .to_string(),
        },
        _ => AuthError::Transport {
            operation,
            message: DisplayErrorContext(&err).to_string(),
        },
    }
}

#[async_trait]
impl CredentialProvider for CodeArtifactProvider {
    async fn authenticate(&self, config: &EnvironmentConfig) -> Result<Credential, AuthError> {
        tracing::info!(env = %config.id, domain = %config.domain, "Authenticating against CodeArtifact");

        let client = self.client(&config.region);
        let issued_at = Utc::now();

        let token = client
            .get_authorization_token()
            .domain(&config.domain)
            .domain_owner(&config.owner)
            .duration_seconds(TOKEN_DURATION_SECONDS)
            .send()
            .await
            .map_err(|e| sdk_error("GetAuthorizationToken", e))?
            .authorization_token
            .ok_or_else(|| AuthError::InvalidResponse {
                operation: "GetAuthorizationToken",
                message: "response has no authorization token".to_string(),
            })?;

        let endpoint = client
            .get_repository_endpoint()
            .domain(&config.domain)
            .domain_owner(&config.owner)
            .format(SdkPackageFormat::from(config.package_format.as_str()))
            .repository(&config.repository_name)
            .send()
            .await
            .map_err(|e| sdk_error("GetRepositoryEndpoint", e))?
            .repository_endpoint
            .ok_or_else(|| AuthError::InvalidResponse {
                operation: "GetRepositoryEndpoint",
                message: "response has no repository endpoint".to_string(),
            })?;

        let endpoint_url = Url::parse(&endpoint).map_err(|e| AuthError::InvalidResponse {
            operation: "GetRepositoryEndpoint",
            message: format!("{}: {}", endpoint, e),
        })?;

        tracing::info!(env = %config.id, upstream = %endpoint_url, "Authorization successful");

        Ok(Credential::new(endpoint_url, token, issued_at))
    }
}
