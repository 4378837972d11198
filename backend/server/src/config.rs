use std::{env, fmt::Display, fs::read_to_string, str::FromStr};

use thiserror::Error;
use tracing::{info, warn};

const DEFAULT_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Secret {0} not found in /run/secrets or the environment")]
    MissingSecret(&'static str),
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub max_db_connections: u32,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub cors_origins: Vec<String>,
    pub public_url: String,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let port = try_load("RUST_PORT", "3001")?;

        Ok(Self {
            port,
            database_url: var("DATABASE_URL").ok(),
            max_db_connections: try_load("MAX_DB_CONNECTIONS", "5")?,
            jwt_secret: read_secret("JWT_SECRET")?,
            token_ttl_hours: try_load("TOKEN_TTL_HOURS", "24")?,
            cors_origins: split_origins(&try_load::<String>("CORS_ORIGIN", DEFAULT_ORIGINS)?),
            public_url: try_load("PUBLIC_URL", &format!("http://localhost:{port}"))?,
        })
    }

    /// Defaults for everything except the signing secret, which has none.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            port: 3001,
            database_url: None,
            max_db_connections: 5,
            jwt_secret: jwt_secret.into(),
            token_ttl_hours: 24,
            cors_origins: split_origins(DEFAULT_ORIGINS),
            public_url: "http://localhost:3001".to_string(),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e: T::Err| {
            warn!("Invalid {key} value: {e}");
            ConfigError::Invalid {
                key,
                reason: e.to_string(),
            }
        })
}

fn read_secret(secret_name: &'static str) -> Result<String, ConfigError> {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .or_else(|e| {
            warn!("Failed to read {secret_name} from file: {e}");
            env::var(secret_name)
        })
        .map_err(|_| ConfigError::MissingSecret(secret_name))
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::split_origins;

    #[test]
    fn test_split_origins() {
        assert_eq!(
            split_origins("http://a.test, http://b.test ,"),
            vec!["http://a.test", "http://b.test"]
        );
        assert!(split_origins("").is_empty());
    }
}
