//! Runtime configuration, read from `BABEL_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use babel_observability::LogFormat;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: invalid value `{value}` ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("BABEL_BOOTSTRAP_ENABLED is set but BABEL_BOOTSTRAP_FILE is missing")]
    MissingBootstrapFile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogConfig {
    pub log_format: LogFormat,
    pub bootstrap_enabled: bool,
    pub bootstrap_file: Option<PathBuf>,
    /// Default for submissions that do not say whether to clean first.
    pub clean_before_import: bool,
    pub import_parallelism: usize,
    pub live_channel_capacity: usize,
    pub notifications_enabled: bool,
    /// How long an upload step waits for the read side to catch up.
    pub sync_timeout: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Json,
            bootstrap_enabled: false,
            bootstrap_file: None,
            clean_before_import: false,
            import_parallelism: 8,
            live_channel_capacity: 256,
            notifications_enabled: true,
            sync_timeout: Duration::from_secs(10),
        }
    }
}

impl CatalogConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let log_format = match get("BABEL_LOG_FORMAT") {
            Some(v) => v.parse::<LogFormat>().map_err(|e| ConfigError::Invalid {
                key: "BABEL_LOG_FORMAT",
                value: v.clone(),
                reason: e.to_string(),
            })?,
            None => defaults.log_format,
        };

        let config = Self {
            log_format,
            bootstrap_enabled: parse_bool(
                "BABEL_BOOTSTRAP_ENABLED",
                get("BABEL_BOOTSTRAP_ENABLED"),
                defaults.bootstrap_enabled,
            )?,
            bootstrap_file: get("BABEL_BOOTSTRAP_FILE").map(PathBuf::from),
            clean_before_import: parse_bool(
                "BABEL_CLEAN_BEFORE_IMPORT",
                get("BABEL_CLEAN_BEFORE_IMPORT"),
                defaults.clean_before_import,
            )?,
            import_parallelism: parse_positive(
                "BABEL_IMPORT_PARALLELISM",
                get("BABEL_IMPORT_PARALLELISM"),
                defaults.import_parallelism,
            )?,
            live_channel_capacity: parse_positive(
                "BABEL_LIVE_CHANNEL_CAPACITY",
                get("BABEL_LIVE_CHANNEL_CAPACITY"),
                defaults.live_channel_capacity,
            )?,
            notifications_enabled: parse_bool(
                "BABEL_NOTIFICATIONS_ENABLED",
                get("BABEL_NOTIFICATIONS_ENABLED"),
                defaults.notifications_enabled,
            )?,
            sync_timeout: defaults.sync_timeout,
        };

        if config.bootstrap_enabled && config.bootstrap_file.is_none() {
            return Err(ConfigError::MissingBootstrapFile);
        }
        Ok(config)
    }
}

fn parse_bool(key: &'static str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    raw.trim()
        .to_ascii_lowercase()
        .parse::<bool>()
        .map_err(|e| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        })
}

fn parse_positive(
    key: &'static str,
    raw: Option<String>,
    default: usize,
) -> Result<usize, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().parse::<usize>() {
        Ok(0) => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "must be at least 1".to_string(),
        }),
        Ok(n) => Ok(n),
        Err(e) => Err(ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
