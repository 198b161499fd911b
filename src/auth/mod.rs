// Authentication module
// Credential storage, acquisition and background refresh

mod cache;
mod provider;
mod refresh;
mod types;

pub use cache::CredentialCache;
pub use provider::{CodeArtifactProvider, CredentialProvider};
pub use refresh::{assess, ReauthDecision, ReauthScheduler, DEFAULT_REAUTH_INTERVAL, REFRESH_AFTER_MINUTES};
pub use types::{AuthError, Credential, CREDENTIAL_LIFETIME_MINUTES};
