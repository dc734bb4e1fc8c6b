use std::{path::PathBuf, str::FromStr};

use redis::aio::MultiplexedConnection;
use sqlx::{postgres::PgPoolOptions, Pool, Postgres};
use thiserror::Error;

use crate::{
    error::{CacheError, QueryError},
    media::MediaStore,
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Environment variable {0} must be set")]
    Missing(&'static str),
    #[error("Environment variable {key} has an invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub session_lifetime_hours: i64,
    pub max_db_connections: u32,
    pub public_url: String,
    pub media_root: PathBuf,
    pub media_url: String,
}

impl Config {
    /// Reads the process environment, loading `.env` first if present.
    pub fn load() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            log::debug!("No .env file loaded: {e}");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| -> Result<String, ConfigError> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };
        let or_default = |key: &'static str, default: &str| -> String {
            lookup(key).filter(|v| !v.trim().is_empty()).unwrap_or_else(|| {
                log::info!("{key} not set, using {default}");
                default.to_string()
            })
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            redis_url: or_default("REDIS_URL", "redis://127.0.0.1/"),
            jwt_secret: required("JWT_SECRET")?,
            session_lifetime_hours: parse(
                "SESSION_LIFETIME_HOURS",
                or_default("SESSION_LIFETIME_HOURS", "24"),
            )?,
            max_db_connections: parse(
                "DATABASE_MAX_CONNECTIONS",
                or_default("DATABASE_MAX_CONNECTIONS", "5"),
            )?,
            public_url: or_default("PUBLIC_URL", "http://localhost")
                .trim_end_matches('/')
                .to_string(),
            media_root: PathBuf::from(or_default("MEDIA_ROOT", "media")),
            media_url: or_default("MEDIA_URL", "/media/"),
        })
    }

    pub fn media_store(&self) -> MediaStore {
        MediaStore::new(&self.media_root, &self.media_url)
    }
}

fn parse<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| {
        log::warn!("Could not parse {key}={value}");
        ConfigError::Invalid { key, value }
    })
}

pub async fn connect_database(config: &Config) -> Result<Pool<Postgres>, potion::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_db_connections)
        .connect(&config.database_url)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    log::info!("Connected to database");
    Ok(pool)
}

pub async fn run_migrations(pool: &Pool<Postgres>) -> Result<(), potion::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    log::info!("Migrations applied");
    Ok(())
}

pub async fn connect_cache(config: &Config) -> Result<MultiplexedConnection, potion::Error> {
    let client = redis::Client::open(config.redis_url.as_str())
        .map_err(|e| CacheError::from(e).into())?;
    let connection = client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| CacheError::from(e).into())?;

    log::info!("Connected to cache");
    Ok(connection)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_fill_optional_keys() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/foodgram"),
            ("JWT_SECRET", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.redis_url, "redis://127.0.0.1/");
        assert_eq!(config.session_lifetime_hours, 24);
        assert_eq!(config.max_db_connections, 5);
        assert_eq!(config.public_url, "http://localhost");
        assert_eq!(config.media_root, PathBuf::from("media"));
        assert_eq!(config.media_store().url_prefix, "/media/");
    }

    #[test]
    fn missing_and_invalid_keys() {
        assert_eq!(
            Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://x")])).unwrap_err(),
            ConfigError::Missing("JWT_SECRET")
        );
        assert_eq!(
            Config::from_lookup(lookup(&[
                ("DATABASE_URL", "postgres://x"),
                ("JWT_SECRET", "s"),
                ("SESSION_LIFETIME_HOURS", "forever"),
            ]))
            .unwrap_err(),
            ConfigError::Invalid {
                key: "SESSION_LIFETIME_HOURS",
                value: "forever".to_string()
            }
        );
    }

    #[test]
    fn public_url_loses_trailing_slash() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", "s"),
            ("PUBLIC_URL", "https://foodgram.example/"),
        ]))
        .unwrap();

        assert_eq!(config.public_url, "https://foodgram.example");
    }
}
