// Background credential refresh
// One perpetual task per environment keeps its credential ahead of expiry

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::cache::CredentialCache;
use super::provider::CredentialProvider;
use super::types::CREDENTIAL_LIFETIME_MINUTES;
use crate::health::HealthState;
use crate::models::EnvironmentConfig;

/// Credentials older than this are refreshed on the next tick
pub const REFRESH_AFTER_MINUTES: i64 = 45;

/// Default delay between two checks
pub const DEFAULT_REAUTH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15);

/// Outcome of one scheduler check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReauthDecision {
    /// Credential is young enough, nothing to do
    Fresh,
    /// Credential is missing or close to expiry, authenticate again
    Refresh,
    /// Credential outlived its lifetime: refresh failed for too long
    Stale,
}

/// Decide what to do with a credential issued at `issued_at`
///
/// A missing credential ages from `waiting_since`, the moment the scheduler
/// started needing one.
pub fn assess(
    issued_at: Option<DateTime<Utc>>,
    waiting_since: DateTime<Utc>,
    now: DateTime<Utc>,
) -> ReauthDecision {
    let age = now - issued_at.unwrap_or(waiting_since);

    if age > Duration::minutes(CREDENTIAL_LIFETIME_MINUTES) {
        ReauthDecision::Stale
    } else if issued_at.is_none() || age > Duration::minutes(REFRESH_AFTER_MINUTES) {
        ReauthDecision::Refresh
    } else {
        ReauthDecision::Fresh
    }
}

/// Periodic re-authentication for a single environment
pub struct ReauthScheduler {
    config: EnvironmentConfig,
    cache: Arc<CredentialCache>,
    provider: Arc<dyn CredentialProvider>,
    health: HealthState,
    interval: std::time::Duration,
    started_at: DateTime<Utc>,
}

impl ReauthScheduler {
    pub fn new(
        config: EnvironmentConfig,
        cache: Arc<CredentialCache>,
        provider: Arc<dyn CredentialProvider>,
        health: HealthState,
        interval: std::time::Duration,
    ) -> Self {
        Self {
            config,
            cache,
            provider,
            health,
            interval,
            started_at: Utc::now(),
        }
    }

    /// Run one check at `now`, refreshing or failing the process as needed
    pub async fn tick(&self, now: DateTime<Utc>) -> ReauthDecision {
        let env = self.config.id;
        let current = self.cache.get(env).await;
        let decision = assess(current.as_ref().map(|c| c.issued_at), self.started_at, now);

        match decision {
            ReauthDecision::Fresh => {}
            ReauthDecision::Stale => {
                tracing::error!(
                    env = %env,
                    "Unable to re-authenticate before the credential expired, shutting down proxy"
                );
                self.health.mark_failed(format!(
                    "credential for {} environment expired without a successful refresh",
                    env
                ));
            }
            ReauthDecision::Refresh => {
                match current {
                    Some(ref credential) => {
                        let remaining =
                            Duration::minutes(CREDENTIAL_LIFETIME_MINUTES) - credential.age(now);
                        tracing::info!(
                            env = %env,
                            "{} minutes until the credential expires, attempting a reauth",
                            remaining.num_minutes()
                        );
                    }
                    None => tracing::info!(env = %env, "No credential yet, authenticating"),
                }

                match self.provider.authenticate(&self.config).await {
                    Ok(credential) => {
                        tracing::info!(
                            env = %env,
                            upstream = %credential.endpoint_url,
                            "Requests will now be proxied with a fresh credential"
                        );
                        self.cache.set(env, credential).await;
                    }
                    Err(e) => {
                        // Retried on the next tick; the interval is the backoff
                        tracing::warn!(env = %env, error = %e, "Re-authentication failed");
                    }
                }
            }
        }

        decision
    }

    /// Spawn the perpetual check loop. The task ends once the credential goes stale.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                if self.tick(Utc::now()).await == ReauthDecision::Stale {
                    break;
                }
            }
        })
    }
}
