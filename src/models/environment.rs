use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Invalid environment settings, fatal at startup
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown environment '{0}'")]
    UnknownEnvironment(String),

    #[error("unsupported package format '{0}'")]
    UnsupportedFormat(String),

    #[error("{env} environment is missing its {field}")]
    MissingField {
        env: EnvironmentId,
        field: &'static str,
    },

    #[error("{0} environment is configured twice")]
    Duplicate(EnvironmentId),

    #[error("{0} environment is not configured")]
    NotConfigured(EnvironmentId),
}

// ==================================================================================================
// Environment identifiers
// ==================================================================================================

/// Backing repository environment a client can be routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EnvironmentId {
    Dev,
    Stage,
    Prod,
}

impl EnvironmentId {
    /// Every environment, in startup order
    pub const ALL: [EnvironmentId; 3] = [EnvironmentId::Dev, EnvironmentId::Stage, EnvironmentId::Prod];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentId::Dev => "dev",
            EnvironmentId::Stage => "stage",
            EnvironmentId::Prod => "prod",
        }
    }

    /// Uppercase form used in environment variable names (`CODEARTIFACT_DEV_OWNER`)
    pub fn env_key(&self) -> &'static str {
        match self {
            EnvironmentId::Dev => "DEV",
            EnvironmentId::Stage => "STAGE",
            EnvironmentId::Prod => "PROD",
        }
    }
}

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvironmentId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dev" => Ok(EnvironmentId::Dev),
            "stage" => Ok(EnvironmentId::Stage),
            "prod" => Ok(EnvironmentId::Prod),
            other => Err(ConfigError::UnknownEnvironment(other.to_string())),
        }
    }
}

// ==================================================================================================
// Package formats
// ==================================================================================================

/// Repository package format, as understood by the CodeArtifact endpoint API
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageFormat {
    #[default]
    Npm,
    Pypi,
    Maven,
    Nuget,
}

impl PackageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageFormat::Npm => "npm",
            PackageFormat::Pypi => "pypi",
            PackageFormat::Maven => "maven",
            PackageFormat::Nuget => "nuget",
        }
    }
}

impl fmt::Display for PackageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "npm" => Ok(PackageFormat::Npm),
            "pypi" => Ok(PackageFormat::Pypi),
            "maven" => Ok(PackageFormat::Maven),
            "nuget" => Ok(PackageFormat::Nuget),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }
}

// ==================================================================================================
// Environment configuration
// ==================================================================================================

/// Repository coordinates for one environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentConfig {
    pub id: EnvironmentId,
    pub region: String,
    pub owner: String,
    pub domain: String,
    pub repository_name: String,
    pub package_format: PackageFormat,
}

impl EnvironmentConfig {
    /// Reject configurations with blank coordinates
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("region", &self.region),
            ("owner", &self.owner),
            ("domain", &self.domain),
            ("repository", &self.repository_name),
        ];

        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    env: self.id,
                    field: name,
                });
            }
        }

        Ok(())
    }
}

/// Read-only table of environment configurations, built once at startup
#[derive(Debug, Clone)]
pub struct EnvironmentRegistry {
    environments: HashMap<EnvironmentId, EnvironmentConfig>,
}

impl EnvironmentRegistry {
    /// Build the registry, requiring exactly one valid configuration per environment
    pub fn new(configs: Vec<EnvironmentConfig>) -> Result<Self, ConfigError> {
        let mut environments = HashMap::new();

        for config in configs {
            config.validate()?;
            if environments.insert(config.id, config.clone()).is_some() {
                return Err(ConfigError::Duplicate(config.id));
            }
        }

        for id in EnvironmentId::ALL {
            if !environments.contains_key(&id) {
                return Err(ConfigError::NotConfigured(id));
            }
        }

        Ok(Self { environments })
    }

    /// Iterate configurations in `EnvironmentId::ALL` order
    pub fn iter(&self) -> impl Iterator<Item = &EnvironmentConfig> + '_ {
        EnvironmentId::ALL
            .into_iter()
            .filter_map(move |id| self.environments.get(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: EnvironmentId) -> EnvironmentConfig {
        EnvironmentConfig {
            id,
            region: "us-east-1".to_string(),
            owner: "123456789012".to_string(),
            domain: "acme".to_string(),
            repository_name: format!("acme-{}", id),
            package_format: PackageFormat::Npm,
        }
    }

    #[test]
    fn test_environment_id_parsing() {
        assert_eq!("dev".parse::<EnvironmentId>(), Ok(EnvironmentId::Dev));
        assert_eq!("STAGE".parse::<EnvironmentId>(), Ok(EnvironmentId::Stage));
        assert_eq!(" prod ".parse::<EnvironmentId>(), Ok(EnvironmentId::Prod));
        assert_eq!(
            "qa".parse::<EnvironmentId>(),
            Err(ConfigError::UnknownEnvironment("qa".to_string()))
        );
        assert!("".parse::<EnvironmentId>().is_err());
    }

    #[test]
    fn test_environment_id_display_round_trips() {
        for id in EnvironmentId::ALL {
            assert_eq!(id.to_string().parse::<EnvironmentId>(), Ok(id));
        }
        assert_eq!(EnvironmentId::Stage.env_key(), "STAGE");
    }

    #[test]
    fn test_package_format_parsing() {
        assert_eq!("".parse::<PackageFormat>(), Ok(PackageFormat::Npm));
        assert_eq!("pypi".parse::<PackageFormat>(), Ok(PackageFormat::Pypi));
        assert_eq!("Maven".parse::<PackageFormat>(), Ok(PackageFormat::Maven));
        assert_eq!("nuget".parse::<PackageFormat>(), Ok(PackageFormat::Nuget));
        assert_eq!(
            "cargo".parse::<PackageFormat>(),
            Err(ConfigError::UnsupportedFormat("cargo".to_string()))
        );
    }

    #[test]
    fn test_registry_requires_every_environment() {
        let err = EnvironmentRegistry::new(vec![sample(EnvironmentId::Dev)]).unwrap_err();
        assert_eq!(err, ConfigError::NotConfigured(EnvironmentId::Stage));
        assert_eq!(err.to_string(), "stage environment is not configured");

        let registry = EnvironmentRegistry::new(
            EnvironmentId::ALL.into_iter().map(sample).collect(),
        )
        .unwrap();
        let ids: Vec<_> = registry.iter().map(|c| c.id).collect();
        assert_eq!(ids, EnvironmentId::ALL.to_vec());
        assert_eq!(
            registry.iter().last().map(|c| c.repository_name.as_str()),
            Some("acme-prod")
        );
    }

    #[test]
    fn test_registry_rejects_blank_coordinates() {
        let mut configs: Vec<_> = EnvironmentId::ALL.into_iter().map(sample).collect();
        configs[1].domain = "  ".to_string();
        let err = EnvironmentRegistry::new(configs).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingField {
                env: EnvironmentId::Stage,
                field: "domain"
            }
        );
        assert_eq!(err.to_string(), "stage environment is missing its domain");
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut configs: Vec<_> = EnvironmentId::ALL.into_iter().map(sample).collect();
        configs.push(sample(EnvironmentId::Dev));
        assert_eq!(
            EnvironmentRegistry::new(configs).unwrap_err(),
            ConfigError::Duplicate(EnvironmentId::Dev)
        );
    }
}
