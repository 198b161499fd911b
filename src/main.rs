use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use codeartifact_proxy::{
    auth::{self, CredentialProvider},
    config::{self, LogFormat},
    health::{Health, HealthState},
    models::EnvironmentRegistry,
    proxy::{RewritePolicy, UpstreamClient},
    routes,
    token_router::TokenRouter,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = config::Config::load()?;

    init_tracing(&config);

    tracing::info!("🚀 CodeArtifact Proxy starting...");
    tracing::info!(
        "Server configured: {}:{}",
        config.server_host,
        config.server_port
    );

    let registry = EnvironmentRegistry::new(config.environments.clone())
        .context("Invalid environment configuration")?;

    let router = TokenRouter::new(config.route_bindings.clone())
        .context("Invalid route token bindings")?;
    for env in router.routed_environments() {
        tracing::info!(env = %env, "Route token configured");
    }

    // AWS credentials come from the SDK default chain and are resolved per call
    let default_region = registry
        .iter()
        .next()
        .map(|env| env.region.clone())
        .context("No environment configured")?;
    let provider: Arc<dyn CredentialProvider> = Arc::new(
        auth::CodeArtifactProvider::from_env(
            &default_region,
            config.api_endpoint.clone(),
            Duration::from_secs(config.http_request_timeout),
        )
        .await,
    );
    tracing::info!(region = %default_region, "✅ AWS SDK configuration loaded");

    let upstream = UpstreamClient::new(
        config.http_max_connections,
        config.http_connect_timeout,
        config.http_request_timeout,
    )?;
    tracing::info!("✅ HTTP client initialized with connection pooling");

    let health = HealthState::new();
    let credentials = Arc::new(auth::CredentialCache::new());

    // One scheduler per environment; the first tick authenticates immediately
    for env_config in registry.iter() {
        tracing::info!(
            env = %env_config.id,
            domain = %env_config.domain,
            repository = %env_config.repository_name,
            region = %env_config.region,
            "Starting re-authentication scheduler"
        );
        auth::ReauthScheduler::new(
            env_config.clone(),
            credentials.clone(),
            provider.clone(),
            health.clone(),
            Duration::from_secs(config.reauth_interval),
        )
        .spawn();
    }

    let app_state = routes::AppState::new(
        router,
        credentials,
        upstream,
        RewritePolicy::new(&config.rewrite_user_agents),
        config.basic_auth_username.clone(),
        health.clone(),
    );

    app_state
        .correlations
        .spawn_sweeper(Duration::from_secs(config.correlation_ttl));

    // Build the application with routes and middleware
    let app = build_app(app_state);

    // Bind to configured host and port
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    print_startup_banner(&config);

    tracing::info!("🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(health.clone()))
        .await?;

    tracing::info!("👋 Server shutdown complete");

    if let Health::Failed { reason } = health.current() {
        anyhow::bail!("Proxy stopped after a fatal error: {}", reason);
    }

    Ok(())
}

fn init_tracing(config: &config::Config) {
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Build the application with all routes and middleware
fn build_app(state: routes::AppState) -> axum::Router {
    use axum::Router;

    // Health check route (never gated)
    let health_routes = routes::health_routes(state.health.clone());

    // Catch-all proxy (gated by process health)
    let proxy_routes = routes::proxy_routes(state);

    Router::new()
        .merge(health_routes)
        .merge(proxy_routes)
        .layer(TraceLayer::new_for_http())
}

/// Print startup banner
fn print_startup_banner(config: &config::Config) {
    let banner = r#"
╔═══════════════════════════════════════════════════════════╗
║                                                           ║
║              📦 CodeArtifact Proxy                        ║
║                                                           ║
║  Credential-injecting reverse proxy for package managers  ║
║                                                           ║
╚═══════════════════════════════════════════════════════════╝
"#;

    println!("{}", banner);
    println!("  Version:     {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Server:      http://{}:{}",
        config.server_host, config.server_port
    );
    for env in &config.environments {
        println!(
            "  {:<12} {}/{} ({}, {})",
            format!("{}:", env.id),
            env.domain,
            env.repository_name,
            env.region,
            env.package_format.as_str()
        );
    }
    println!("  Log Level:   {}", config.log_level);
    println!();
}

/// Resolve on Ctrl+C, SIGTERM, or once the process is marked as failed
async fn shutdown_signal(health: HealthState) {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown...");
        },
        reason = health.failed() => {
            tracing::error!(reason = %reason, "Fatal condition, initiating graceful shutdown...");
        },
    }
}
