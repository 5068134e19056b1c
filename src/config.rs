//! Configuration for hosts that wire the selector from a JSON file.
use serde;
use std::fs;
use std::time::Duration;

use crate::options::SelectOptions;

#[derive(Debug, serde::Deserialize, Clone)]
pub struct Config {
    /// Ceiling in milliseconds on acceptable probe round trips
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: u64,

    /// Whether probes may use the ICMP echo path (system ping / raw sockets)
    #[serde(default)]
    pub privileged: bool,

    /// Seconds before a blacklisted node becomes eligible for re-probing.
    /// Zero keeps a node blacklisted for the process lifetime.
    #[serde(default)]
    pub blacklist_ttl_sec: u64,
}

fn default_max_latency_ms() -> u64 {
    1_000
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_latency_ms: default_max_latency_ms(),
            privileged: false,
            blacklist_ttl_sec: 0,
        }
    }
}

/// Load the configuration from a config json file
impl Config {
    pub fn load(path: &str) -> Result<Self, String> {
        let config_data = fs::read_to_string(path)
            .map_err(|err| format!("Failed to read config file: {}", err))?;

        serde_json::from_str(&config_data)
            .map_err(|err| format!("Failed to parse config file: {}", err))
    }

    pub fn select_options(&self) -> SelectOptions {
        let opts = SelectOptions::default()
            .max_latency(Duration::from_millis(self.max_latency_ms))
            .privileged(self.privileged);

        if self.blacklist_ttl_sec > 0 {
            return opts.blacklist_ttl(Duration::from_secs(self.blacklist_ttl_sec));
        }
        opts
    }
}
