use std::str::FromStr;

use anyhow::{Context, Result};

use crate::hub::DEFAULT_CHANNEL_CAPACITY;

/// Runtime settings, read from the environment (and `.env` when present).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub max_connections: u32,
    /// Per-connection backlog of undelivered live messages.
    pub channel_capacity: usize,
    pub seed_sample_data: bool,
    pub enforce_membership: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://chat_app.db?mode=rwc".to_owned(),
            port: 3000,
            max_connections: 16,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            seed_sample_data: true,
            enforce_membership: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            port: parse(&lookup, "PORT", defaults.port)?,
            max_connections: parse(&lookup, "DB_MAX_CONNECTIONS", defaults.max_connections)?,
            channel_capacity: parse(&lookup, "CHANNEL_CAPACITY", defaults.channel_capacity)?,
            seed_sample_data: parse(&lookup, "SEED_SAMPLE_DATA", defaults.seed_sample_data)?,
            enforce_membership: parse(&lookup, "ENFORCE_MEMBERSHIP", defaults.enforce_membership)?,
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        assert_eq!(config_from(&[]).unwrap(), Config::default());
    }

    #[test]
    fn values_override_defaults() {
        let config = config_from(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("PORT", "8080"),
            ("DB_MAX_CONNECTIONS", "4"),
            ("CHANNEL_CAPACITY", "69"),
            ("SEED_SAMPLE_DATA", "false"),
            ("ENFORCE_MEMBERSHIP", "true"),
        ])
        .unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.channel_capacity, 69);
        assert!(!config.seed_sample_data);
        assert!(config.enforce_membership);
    }

    #[test]
    fn bad_values_are_errors() {
        let err = config_from(&[("PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }
}
