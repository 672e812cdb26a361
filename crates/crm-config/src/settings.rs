use std::time::Duration;

use config::{Config, Environment, File};
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

const DEFAULT_CONFIG_FILE: &str = "crm.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid setting {0}: {1}")]
    Invalid(&'static str, String),
}

/// Fully resolved settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub dispatch: DispatchSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// Connection string; may embed credentials
    pub url: SecretString,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DispatchSettings {
    pub batch_size: usize,
    /// Sends in flight at once within a batch; 1 keeps dispatch strictly sequential
    pub max_concurrency: usize,
    pub send_timeout_secs: u64,
    /// Recompute segment membership before every campaign start instead of reusing the cache
    pub refresh_membership_on_start: bool,
}

impl DispatchSettings {
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_concurrency: 4,
            send_timeout_secs: 30,
            refresh_membership_on_start: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogSettings {
    /// Default filter directive; `RUST_LOG` wins when set
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Wire shape; the URL is wrapped in a secret once read.
#[derive(Deserialize)]
struct RawSettings {
    database: RawDatabase,
    dispatch: DispatchSettings,
    log: LogSettings,
}

#[derive(Deserialize)]
struct RawDatabase {
    url: String,
    max_connections: u32,
}

impl Settings {
    /// Loads `.env`, then layers defaults, the config file and `CRM__*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let path = std::env::var("CRM_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::from_sources(Some(&path), true)
    }

    /// Builds settings from an optional file and, optionally, the environment.
    pub fn from_sources(file: Option<&str>, read_env: bool) -> Result<Self, ConfigError> {
        let defaults = DispatchSettings::default();
        let mut builder = Config::builder()
            .set_default("database.url", "sqlite::memory:")?
            .set_default("database.max_connections", 5)?
            .set_default("dispatch.batch_size", defaults.batch_size as u64)?
            .set_default("dispatch.max_concurrency", defaults.max_concurrency as u64)?
            .set_default("dispatch.send_timeout_secs", defaults.send_timeout_secs)?
            .set_default("dispatch.refresh_membership_on_start", defaults.refresh_membership_on_start)?
            .set_default("log.level", "info")?
            .set_default("log.format", "pretty")?;

        if let Some(path) = file {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        if read_env {
            builder = builder.add_source(
                Environment::with_prefix("CRM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let raw: RawSettings = builder.build()?.try_deserialize()?;
        let settings = Self {
            database: DatabaseSettings {
                url: SecretString::from(raw.database.url),
                max_connections: raw.database.max_connections,
            },
            dispatch: raw.dispatch,
            log: raw.log,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.batch_size == 0 {
            return Err(ConfigError::Invalid("dispatch.batch_size", "must be at least 1".into()));
        }
        if self.dispatch.max_concurrency == 0 {
            return Err(ConfigError::Invalid("dispatch.max_concurrency", "must be at least 1".into()));
        }
        if self.dispatch.send_timeout_secs == 0 {
            return Err(ConfigError::Invalid("dispatch.send_timeout_secs", "must be at least 1".into()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid("database.max_connections", "must be at least 1".into()));
        }
        Ok(())
    }
}
