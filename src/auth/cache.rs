use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::types::Credential;
use crate::models::EnvironmentId;

/// Credential store
/// Holds the latest committed credential per environment behind a reader/writer lock
#[derive(Default)]
pub struct CredentialCache {
    credentials: RwLock<HashMap<EnvironmentId, Arc<Credential>>>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest credential snapshot for `env`, or `None` before the first successful refresh
    pub async fn get(&self, env: EnvironmentId) -> Option<Arc<Credential>> {
        let credentials = self.credentials.read().await;
        credentials.get(&env).cloned()
    }

    /// Atomically replace the credential for `env`
    pub async fn set(&self, env: EnvironmentId, credential: Credential) {
        let mut credentials = self.credentials.write().await;
        credentials.insert(env, Arc::new(credential));
    }
}
