// Credential types

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use thiserror::Error;
use url::Url;

/// Lifetime of an authorization token issued by the artifact service
pub const CREDENTIAL_LIFETIME_MINUTES: i64 = 60;

/// Time-limited service credential for one environment
///
/// Replaced wholesale on every refresh; readers hold an immutable snapshot.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub endpoint_url: Url,
    pub authorization_token: String,
    pub issued_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(endpoint_url: Url, authorization_token: String, issued_at: DateTime<Utc>) -> Self {
        Self {
            endpoint_url,
            authorization_token,
            issued_at,
        }
    }

    /// Age of the credential at `now`
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.issued_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.age(now) > Duration::minutes(CREDENTIAL_LIFETIME_MINUTES)
    }

    /// Endpoint authority as sent in the `Host` header (port only when non-default)
    pub fn endpoint_host(&self) -> String {
        let host = self.endpoint_url.host_str().unwrap_or_default();
        match self.endpoint_url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("endpoint_url", &self.endpoint_url.as_str())
            .field("authorization_token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Failures of the credential provider
#[derive(Error, Debug)]
pub enum AuthError {
    /// The call never produced a service response (credentials, network, timeout)
    #[error("Request to {operation} failed: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },

    /// The artifact service answered with an error status
    #[error("{operation} returned {status}: {message}")]
    Api {
        operation: &'static str,
        status: u16,
        message: String,
    },

    /// The artifact service answered with something we cannot use
    #[error("Invalid response from {operation}: {message}")]
    InvalidResponse {
        operation: &'static str,
        message: String,
    },
}
