//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the application using the
//! `clap` crate. These arguments are parsed at startup and then merged on top
//! of the config file and environment variables.

use crate::config::normalize_listen_address;
use clap::Parser;
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// Exports claude.ai quota utilization as Prometheus metrics.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the accounts file (TOML, or YAML for `.yaml`/`.yml`).
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address to serve `/metrics` on, e.g. `0.0.0.0:9091` or `:9091`.
    #[arg(long, value_name = "ADDR")]
    pub listen_address: Option<String>,

    /// Log level or `tracing` filter directive.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Fastest poll interval in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub active_interval: Option<u64>,

    /// Slowest poll interval in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub idle_interval: Option<u64>,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        if let Some(addr) = &self.listen_address {
            let mut metrics = Dict::new();
            metrics.insert(
                "listen_address".into(),
                Value::from(normalize_listen_address(addr)),
            );
            dict.insert("metrics".into(), Value::from(metrics));
        }

        let mut polling = Dict::new();
        if let Some(seconds) = self.active_interval {
            polling.insert("active_interval_seconds".into(), Value::from(seconds));
        }
        if let Some(seconds) = self.idle_interval {
            polling.insert("idle_interval_seconds".into(), Value::from(seconds));
        }
        if !polling.is_empty() {
            dict.insert("polling".into(), Value::from(polling));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
