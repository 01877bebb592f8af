use std::time::Duration;

use crate::{env_parse_or, env_required, ConfigError, FromEnv};

/// PostgreSQL connection settings
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(url: String) -> Self {
        Self {
            url,
            max_connections: 10,
            connect_timeout: Duration::from_secs(8),
        }
    }
}

impl FromEnv for DatabaseConfig {
    /// Requires DATABASE_URL. DATABASE_MAX_CONNECTIONS and
    /// DATABASE_CONNECT_TIMEOUT_SECS are optional.
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            url: env_required("DATABASE_URL")?,
            max_connections: env_parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            connect_timeout: Duration::from_secs(env_parse_or(
                "DATABASE_CONNECT_TIMEOUT_SECS",
                8,
            )?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_from_env_success() {
        temp_env::with_vars(
            [
                ("DATABASE_URL", Some("postgres://localhost/newsletter")),
                ("DATABASE_MAX_CONNECTIONS", Some("4")),
                ("DATABASE_CONNECT_TIMEOUT_SECS", None),
            ],
            || {
                let config = DatabaseConfig::from_env().unwrap();
                assert_eq!(config.url, "postgres://localhost/newsletter");
                assert_eq!(config.max_connections, 4);
                assert_eq!(config.connect_timeout, Duration::from_secs(8));
            },
        );
    }

    #[test]
    fn test_database_config_from_env_missing() {
        temp_env::with_var_unset("DATABASE_URL", || {
            let err = DatabaseConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("DATABASE_URL"));
        });
    }

    #[test]
    fn test_database_config_invalid_pool_size() {
        temp_env::with_vars(
            [
                ("DATABASE_URL", Some("postgres://localhost/newsletter")),
                ("DATABASE_MAX_CONNECTIONS", Some("lots")),
            ],
            || {
                let err = DatabaseConfig::from_env().unwrap_err();
                assert!(err.to_string().contains("DATABASE_MAX_CONNECTIONS"));
            },
        );
    }
}
