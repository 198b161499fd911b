use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use url::Url;

use crate::models::{EnvironmentConfig, EnvironmentId, PackageFormat};
use crate::proxy::DEFAULT_PACKAGE_MANAGER_AGENTS;

/// Credential-injecting reverse proxy for CodeArtifact repositories
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Server host address
    #[arg(short = 'H', long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Server port
    #[arg(short, long, env = "SERVER_PORT", default_value = "8080")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (text, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// AWS region of the CodeArtifact domains
    #[arg(short = 'r', long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Repository package format (npm, pypi, maven, nuget)
    #[arg(short = 'f', long, env = "CODEARTIFACT_FORMAT", default_value = "npm")]
    pub format: String,

    /// File holding the route token bindings (TOML, YAML or JSON)
    #[arg(short = 't', long, env = "ROUTE_TOKENS_FILE")]
    pub route_tokens_file: Option<PathBuf>,

    /// Override for the CodeArtifact API base URL
    #[arg(long, env = "CODEARTIFACT_API_ENDPOINT")]
    pub api_endpoint: Option<String>,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "10")]
    pub http_connect_timeout: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "120")]
    pub http_timeout: u64,

    /// Idle upstream connections kept per host
    #[arg(long, env = "HTTP_MAX_CONNECTIONS", default_value = "32")]
    pub http_max_connections: usize,

    /// Seconds between credential age checks
    #[arg(long, env = "REAUTH_INTERVAL", default_value = "15")]
    pub reauth_interval: u64,

    /// Seconds an unclaimed request context is kept (default: request timeout + 30)
    #[arg(long, env = "CORRELATION_TTL")]
    pub correlation_ttl: Option<u64>,

    /// Comma-separated user agent fragments whose responses are rewritten
    #[arg(long, env = "REWRITE_USER_AGENTS")]
    pub rewrite_user_agents: Option<String>,

    /// Username sent with the authorization token
    #[arg(long, env = "BASIC_AUTH_USERNAME", default_value = "aws")]
    pub basic_auth_username: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,

    // Environments and routing
    pub environments: Vec<EnvironmentConfig>,
    pub route_bindings: Vec<(String, EnvironmentId)>,
    pub api_endpoint: Option<Url>,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Background tasks
    pub reauth_interval: u64,
    pub correlation_ttl: u64,

    // Rewriting
    pub rewrite_user_agents: Vec<String>,
    pub basic_auth_username: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        let route_bindings = load_route_bindings(args.route_tokens_file.as_deref())?;

        Self::from_args(args, route_bindings, |key| std::env::var(key).ok())
    }

    /// Build the configuration from parsed arguments
    ///
    /// `lookup` resolves the per-environment variables.
    pub fn from_args(
        args: CliArgs,
        route_bindings: Vec<(String, EnvironmentId)>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let region = args
            .region
            .filter(|r| !r.trim().is_empty())
            .context("AWS_REGION is required (use -r or set AWS_REGION env var)")?;

        let package_format: PackageFormat = args
            .format
            .parse::<PackageFormat>()
            .context("Invalid CODEARTIFACT_FORMAT")?;

        let environments = EnvironmentId::ALL
            .iter()
            .map(|&id| environment_from_lookup(id, &region, package_format, &lookup))
            .collect::<Result<Vec<_>>>()?;

        let api_endpoint = args
            .api_endpoint
            .filter(|s| !s.trim().is_empty())
            .map(|s| Url::parse(&s))
            .transpose()
            .context("Invalid CODEARTIFACT_API_ENDPOINT")?;

        let rewrite_user_agents = match args.rewrite_user_agents {
            Some(list) => parse_list(&list),
            None => DEFAULT_PACKAGE_MANAGER_AGENTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };

        let config = Config {
            server_host: args.host,
            server_port: args.port,

            log_level: args.log_level,
            log_format: parse_log_format(&args.log_format),

            environments,
            route_bindings,
            api_endpoint,

            http_max_connections: args.http_max_connections,
            http_connect_timeout: args.http_connect_timeout,
            http_request_timeout: args.http_timeout,

            reauth_interval: args.reauth_interval,
            correlation_ttl: args
                .correlation_ttl
                .unwrap_or(args.http_timeout.saturating_add(30)),

            rewrite_user_agents,
            basic_auth_username: args.basic_auth_username,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.reauth_interval == 0 {
            anyhow::bail!("REAUTH_INTERVAL must be greater than zero");
        }
        if self.correlation_ttl == 0 {
            anyhow::bail!("CORRELATION_TTL must be greater than zero");
        }
        if self.basic_auth_username.is_empty() || self.basic_auth_username.contains(':') {
            anyhow::bail!("BASIC_AUTH_USERNAME must be non-empty and must not contain ':'");
        }
        if self.route_bindings.is_empty() {
            tracing::warn!("No route tokens configured, every request will be rejected");
        }
        Ok(())
    }
}

/// Read one environment's `CODEARTIFACT_{ENV}_*` settings
fn environment_from_lookup(
    id: EnvironmentId,
    default_region: &str,
    package_format: PackageFormat,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<EnvironmentConfig> {
    let var = |field: &str| {
        let key = format!("CODEARTIFACT_{}_{}", id.env_key(), field);
        lookup(&key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    let required = |field: &str| {
        var(field).with_context(|| {
            format!(
                "CODEARTIFACT_{}_{} is required for the {} environment",
                id.env_key(),
                field,
                id
            )
        })
    };

    let config = EnvironmentConfig {
        id,
        region: var("REGION").unwrap_or_else(|| default_region.to_string()),
        owner: required("OWNER")?,
        domain: required("DOMAIN")?,
        repository_name: required("REPOSITORY")?,
        package_format,
    };

    config
        .validate()
        .with_context(|| format!("Invalid {} environment", id))?;
    Ok(config)
}

/// Load route token bindings from an optional file layered under `ROUTE_TOKEN_*` variables
pub fn load_route_bindings(file: Option<&Path>) -> Result<Vec<(String, EnvironmentId)>> {
    let mut builder = config::Config::builder();
    if let Some(path) = file {
        builder = builder.add_source(config::File::from(path).required(true));
    }
    builder = builder.add_source(config::Environment::with_prefix("ROUTE_TOKEN"));

    let table: HashMap<String, String> = builder
        .build()
        .context("Failed to load route token bindings")?
        .try_deserialize()
        .context("Route token bindings must map environment names to tokens")?;

    bindings_from_table(table)
}

/// Convert an `environment = token` table into bindings
pub fn bindings_from_table(table: HashMap<String, String>) -> Result<Vec<(String, EnvironmentId)>> {
    let mut bindings = table
        .into_iter()
        .map(|(env, token)| {
            let env = env
                .parse::<EnvironmentId>()
                .context("Invalid route token binding")?;
            Ok((token, env))
        })
        .collect::<Result<Vec<_>>>()?;

    bindings.sort_by_key(|(_, env)| *env);
    Ok(bindings)
}

/// Parse log format from string
fn parse_log_format(s: &str) -> LogFormat {
    match s.to_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    }
}

/// Split a comma-separated list, dropping blanks
fn parse_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
