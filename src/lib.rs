// CodeArtifact Proxy - Library root for testing

pub mod auth;
pub mod config;
pub mod correlation;
pub mod error;
pub mod health;
pub mod middleware;
pub mod models;
pub mod proxy;
pub mod routes;
pub mod token_router;
