// Domain models shared by the proxy pipeline

pub mod environment;

pub use environment::{
    ConfigError, EnvironmentConfig, EnvironmentId, EnvironmentRegistry, PackageFormat,
};
