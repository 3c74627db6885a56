// src/config.rs
//! Startup configuration.
//!
//! Precedence: environment (after `.env`) > TOML file named by
//! `TAGWATCH_CONFIG` > defaults. Secrets come from the environment only.

use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::ingest::providers::youtube::DEFAULT_API_BASE;
use crate::ingest::PollerSettings;

pub const ENV_CONFIG_PATH: &str = "TAGWATCH_CONFIG";
pub const DEFAULT_TAG: &str = "#hijackhackclub";
pub const DEFAULT_DB_PATH: &str = "tagwatch.db";

/// Non-secret settings that may live in a TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    tag: Option<String>,
    db_path: Option<String>,
    max_results: Option<u32>,
    source_timeout_secs: Option<u64>,
    sink_timeout_secs: Option<u64>,
    max_delivery_attempts: Option<u32>,
    seen_retention_days: Option<u32>,
    poll_interval_secs: Option<u64>,
    metrics_addr: Option<String>,
    api_base: Option<String>,
}

#[derive(Clone)]
pub struct Config {
    pub yt_api_key: String,
    pub slack_webhook_url: String,
    pub tag: String,
    pub db_path: PathBuf,
    pub max_results: u32,
    pub source_timeout: Duration,
    pub sink_timeout: Duration,
    pub max_delivery_attempts: u32,
    /// 0 keeps seen ids forever.
    pub seen_retention_days: u32,
    /// `None` runs once and exits.
    pub poll_interval: Option<Duration>,
    pub metrics_addr: Option<SocketAddr>,
    pub api_base: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("yt_api_key", &"<redacted>")
            .field("slack_webhook_url", &"<redacted>")
            .field("tag", &self.tag)
            .field("db_path", &self.db_path)
            .field("max_results", &self.max_results)
            .field("source_timeout", &self.source_timeout)
            .field("sink_timeout", &self.sink_timeout)
            .field("max_delivery_attempts", &self.max_delivery_attempts)
            .field("seen_retention_days", &self.seen_retention_days)
            .field("poll_interval", &self.poll_interval)
            .field("metrics_addr", &self.metrics_addr)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl Config {
    /// Load `.env` (if present), then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let file = match get(ENV_CONFIG_PATH) {
            Some(p) => load_file(Path::new(&p))?,
            None => FileConfig::default(),
        };

        let yt_api_key = get("YT_API_KEY").ok_or(ConfigError::Missing("YT_API_KEY"))?;
        let slack_webhook_url =
            get("SLACK_WEBHOOK_URL").ok_or(ConfigError::Missing("SLACK_WEBHOOK_URL"))?;
        if !(slack_webhook_url.starts_with("https://") || slack_webhook_url.starts_with("http://")) {
            return Err(ConfigError::Invalid {
                key: "SLACK_WEBHOOK_URL",
                reason: "must be an http(s) URL".into(),
            });
        }

        let tag = get("TAGWATCH_TAG")
            .or(file.tag)
            .unwrap_or_else(|| DEFAULT_TAG.to_string());
        if tag.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "TAGWATCH_TAG",
                reason: "must not be empty".into(),
            });
        }

        let db_path = PathBuf::from(
            get("DB_PATH")
                .or(file.db_path)
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
        );

        let max_results = number(&get, "TAGWATCH_MAX_RESULTS")?
            .or(file.max_results)
            .unwrap_or(25);
        if !(1..=50).contains(&max_results) {
            return Err(ConfigError::Invalid {
                key: "TAGWATCH_MAX_RESULTS",
                reason: format!("{max_results} is outside 1..=50"),
            });
        }

        let source_timeout_secs = number(&get, "TAGWATCH_SOURCE_TIMEOUT_SECS")?
            .or(file.source_timeout_secs)
            .unwrap_or(15);
        let sink_timeout_secs = number(&get, "TAGWATCH_SINK_TIMEOUT_SECS")?
            .or(file.sink_timeout_secs)
            .unwrap_or(10);
        for (key, secs) in [
            ("TAGWATCH_SOURCE_TIMEOUT_SECS", source_timeout_secs),
            ("TAGWATCH_SINK_TIMEOUT_SECS", sink_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "timeout must be at least 1 second".into(),
                });
            }
        }

        let max_delivery_attempts = number(&get, "TAGWATCH_MAX_DELIVERY_ATTEMPTS")?
            .or(file.max_delivery_attempts)
            .unwrap_or(5);
        if max_delivery_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "TAGWATCH_MAX_DELIVERY_ATTEMPTS",
                reason: "must be at least 1".into(),
            });
        }

        let seen_retention_days = number(&get, "TAGWATCH_SEEN_RETENTION_DAYS")?
            .or(file.seen_retention_days)
            .unwrap_or(30);

        let poll_interval = match number::<u64, _>(&get, "TAGWATCH_POLL_INTERVAL_SECS")?
            .or(file.poll_interval_secs)
        {
            Some(0) => {
                return Err(ConfigError::Invalid {
                    key: "TAGWATCH_POLL_INTERVAL_SECS",
                    reason: "must be at least 1 second".into(),
                })
            }
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };

        let metrics_addr = match get("TAGWATCH_METRICS_ADDR").or(file.metrics_addr) {
            Some(raw) => Some(raw.parse::<SocketAddr>().map_err(|e| ConfigError::Invalid {
                key: "TAGWATCH_METRICS_ADDR",
                reason: e.to_string(),
            })?),
            None => None,
        };

        let api_base = get("YT_API_BASE")
            .or(file.api_base)
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        Ok(Self {
            yt_api_key,
            slack_webhook_url,
            tag,
            db_path,
            max_results,
            source_timeout: Duration::from_secs(source_timeout_secs),
            sink_timeout: Duration::from_secs(sink_timeout_secs),
            max_delivery_attempts,
            seen_retention_days,
            poll_interval,
            metrics_addr,
            api_base,
        })
    }

    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            tag: self.tag.clone(),
            max_results: self.max_results,
            max_delivery_attempts: self.max_delivery_attempts,
            seen_retention: (self.seen_retention_days > 0)
                .then(|| chrono::Duration::days(i64::from(self.seen_retention_days))),
        }
    }
}

/// Load `.env` from the working directory or a parent, without overriding
/// variables already set. Returns the file used, if any.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

fn number<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                key,
                reason: format!("{raw:?}: {e}"),
            }),
        None => Ok(None),
    }
}

fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let file_err = |reason: String| ConfigError::File {
        path: path.display().to_string(),
        reason,
    };
    let content = fs::read_to_string(path).map_err(|e| file_err(e.to_string()))?;
    toml::from_str(&content).map_err(|e| file_err(e.to_string()))
}
