// Route token resolution
// Maps the bearer token a client presents to the environment it selects

use std::collections::HashMap;
use thiserror::Error;

use crate::models::EnvironmentId;

/// Invalid route token bindings
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RouteTableError {
    #[error("Route token for {0} environment is empty")]
    EmptyToken(EnvironmentId),

    #[error("Route token is bound to both {first} and {second} environments")]
    AmbiguousToken {
        first: EnvironmentId,
        second: EnvironmentId,
    },
}

/// Immutable route token → environment table
#[derive(Debug, Clone, Default)]
pub struct TokenRouter {
    bindings: HashMap<String, EnvironmentId>,
}

impl TokenRouter {
    /// Build the table, rejecting empty tokens and tokens bound to more than one environment
    pub fn new(
        bindings: impl IntoIterator<Item = (String, EnvironmentId)>,
    ) -> Result<Self, RouteTableError> {
        let mut table = HashMap::new();

        for (token, env) in bindings {
            let token = token.trim().to_string();
            if token.is_empty() {
                return Err(RouteTableError::EmptyToken(env));
            }
            if let Some(existing) = table.insert(token, env) {
                if existing != env {
                    return Err(RouteTableError::AmbiguousToken {
                        first: existing,
                        second: env,
                    });
                }
            }
        }

        Ok(Self { bindings: table })
    }

    /// Environment bound to `token`, if any
    pub fn resolve(&self, token: &str) -> Option<EnvironmentId> {
        self.bindings.get(token).copied()
    }

    /// Environments reachable through at least one token
    pub fn routed_environments(&self) -> Vec<EnvironmentId> {
        let mut envs: Vec<_> = self.bindings.values().copied().collect();
        envs.sort();
        envs.dedup();
        envs
    }
}
