//! Configuration management for the usage exporter
//!
//! This module defines the main `Config` struct and its sub-structs. It uses
//! the `figment` crate to layer, from lowest to highest priority: built-in
//! defaults, the accounts file (TOML, or YAML when the file ends in
//! `.yaml`/`.yml`), `CLAUDE_USAGE_`-prefixed environment variables, and
//! command-line flags.
//!
//! The accounts file may also use the flat layout of older deployments,
//! with top-level `activeInterval`, `idleInterval`, `idleThreshold`,
//! `resetBurstWindow` and `listenAddr` keys and durations such as `30s` or
//! `5m`. Those keys take precedence over the nested sections of the same
//! file.

use crate::cli::Cli;
use crate::fetcher::DEFAULT_BASE_URL;
use crate::scheduler::{PollerConfig, PollerConfigError};
use figment::{
    providers::{Env, Format, Serialized, Toml, Yaml},
    value::{Dict, Map, Value},
    Figment, Metadata, Profile, Provider,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Config file used when neither `--config` nor `ACCOUNTS_FILE` is given.
pub const DEFAULT_CONFIG_FILE: &str = "accounts.yaml";
/// Environment variable naming the config file.
pub const CONFIG_FILE_ENV: &str = "ACCOUNTS_FILE";
/// Environment variable overriding the metrics listen address.
pub const LISTEN_ADDR_ENV: &str = "LISTEN_ADDR";
/// Prefix for environment overrides, e.g. `CLAUDE_USAGE_POLLING__IDLE_THRESHOLD=5`.
pub const ENV_PREFIX: &str = "CLAUDE_USAGE_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found at specified path: {}", .0.display())]
    NotFound(PathBuf),

    #[error(transparent)]
    Load(#[from] Box<figment::Error>),

    #[error("no accounts configured")]
    NoAccounts,

    #[error("account #{index} is missing `{field}`")]
    IncompleteAccount { index: usize, field: &'static str },

    #[error("invalid polling settings: {0}")]
    Polling(#[from] PollerConfigError),
}

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// The logging level for the application.
    pub log_level: String,
    /// Adaptive polling settings shared by every account.
    pub polling: PollingConfig,
    /// Configuration for the metrics HTTP surface.
    pub metrics: MetricsConfig,
    /// Where usage is fetched from.
    pub upstream: UpstreamConfig,
    /// The accounts to monitor.
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

/// Adaptive polling settings, in whole seconds.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PollingConfig {
    pub active_interval_seconds: u64,
    pub idle_interval_seconds: u64,
    /// Consecutive unchanged polls before backing off.
    pub idle_threshold: u32,
    /// How long before a quota reset to force the active interval.
    pub reset_burst_window_seconds: u64,
    /// Upper bound on a single usage request.
    pub request_timeout_seconds: u64,
}

impl PollingConfig {
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            active_interval: Duration::from_secs(self.active_interval_seconds),
            idle_interval: Duration::from_secs(self.idle_interval_seconds),
            idle_threshold: self.idle_threshold,
            reset_burst_window: Duration::from_secs(self.reset_burst_window_seconds),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Configuration for the metrics HTTP surface.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MetricsConfig {
    /// Address serving `/metrics`, `/healthz` and `/pollers`.
    pub listen_address: SocketAddr,
}

/// Configuration for the upstream usage API.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct UpstreamConfig {
    pub base_url: String,
}

/// Credentials for a single claude.ai account.
#[derive(Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct AccountConfig {
    /// Label attached to every metric for this account.
    pub name: String,
    #[serde(alias = "orgId")]
    pub org_id: String,
    #[serde(alias = "sessionKey")]
    pub session_key: String,
}

impl fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountConfig")
            .field("name", &self.name)
            .field("org_id", &self.org_id)
            .field("session_key", &"<redacted>")
            .finish()
    }
}

/// Accepts Go-style `:9091` as shorthand for all interfaces.
pub fn normalize_listen_address(raw: &str) -> String {
    if raw.starts_with(':') {
        format!("0.0.0.0{}", raw)
    } else {
        raw.to_string()
    }
}

/// Top-level tuning keys of the flat accounts file layout.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct FlatSettings {
    #[serde(default, with = "humantime_serde")]
    active_interval: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    idle_interval: Option<Duration>,
    #[serde(default)]
    idle_threshold: Option<u32>,
    #[serde(default, with = "humantime_serde")]
    reset_burst_window: Option<Duration>,
    #[serde(default)]
    listen_addr: Option<String>,
}

impl Provider for FlatSettings {
    fn metadata(&self) -> Metadata {
        Metadata::named("Flat accounts file keys")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        let mut dict = Dict::new();

        let mut polling = Dict::new();
        let seconds = [
            ("active_interval_seconds", self.active_interval),
            ("idle_interval_seconds", self.idle_interval),
            ("reset_burst_window_seconds", self.reset_burst_window),
        ];
        for (key, value) in seconds {
            if let Some(duration) = value {
                polling.insert(key.into(), Value::from(duration.as_secs()));
            }
        }
        if let Some(threshold) = self.idle_threshold {
            polling.insert("idle_threshold".into(), Value::from(threshold));
        }
        if !polling.is_empty() {
            dict.insert("polling".into(), Value::from(polling));
        }

        if let Some(addr) = &self.listen_addr {
            let mut metrics = Dict::new();
            metrics.insert(
                "listen_address".into(),
                Value::from(normalize_listen_address(addr)),
            );
            dict.insert("metrics".into(), Value::from(metrics));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}

fn file_figment(path: &Path) -> Figment {
    if is_yaml(path) {
        Figment::from(Yaml::file(path))
    } else {
        Figment::from(Toml::file(path))
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    )
}

impl Config {
    /// Loads and validates the configuration for the given command line.
    ///
    /// An explicitly named config file (`--config` or `ACCOUNTS_FILE`) must
    /// exist; the default `accounts.yaml` is optional so that everything can
    /// be supplied through the environment.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let explicit = cli
            .config
            .clone()
            .or_else(|| std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from));
        let path = match explicit {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path)),
            Some(path) => path,
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let file = file_figment(&path);
        let flat: FlatSettings = file.extract().map_err(Box::new)?;

        let mut figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(file)
            .merge(flat)
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        if cli.listen_address.is_none() {
            if let Ok(addr) = std::env::var(LISTEN_ADDR_ENV) {
                figment = figment.merge(Serialized::default(
                    "metrics.listen_address",
                    normalize_listen_address(&addr),
                ));
            }
        }

        let config: Config = figment.merge(cli.clone()).extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants that make start-up fatal when violated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.accounts.is_empty() {
            return Err(ConfigError::NoAccounts);
        }
        for (index, account) in self.accounts.iter().enumerate() {
            let missing = if account.name.trim().is_empty() {
                Some("name")
            } else if account.org_id.trim().is_empty() {
                Some("org_id")
            } else if account.session_key.trim().is_empty() {
                Some("session_key")
            } else {
                None
            };
            if let Some(field) = missing {
                return Err(ConfigError::IncompleteAccount { index, field });
            }
        }
        self.polling.poller_config().validate()?;
        Ok(())
    }
}

// Provide a default implementation for tests and easy setup.
impl Default for Config {
    fn default() -> Self {
        let poller = PollerConfig::default();
        Self {
            log_level: "info".to_string(),
            polling: PollingConfig {
                active_interval_seconds: poller.active_interval.as_secs(),
                idle_interval_seconds: poller.idle_interval.as_secs(),
                idle_threshold: poller.idle_threshold,
                reset_burst_window_seconds: poller.reset_burst_window.as_secs(),
                request_timeout_seconds: 15,
            },
            metrics: MetricsConfig {
                listen_address: SocketAddr::from(([0, 0, 0, 0], 9091)),
            },
            upstream: UpstreamConfig {
                base_url: DEFAULT_BASE_URL.to_string(),
            },
            accounts: Vec::new(),
        }
    }
}
