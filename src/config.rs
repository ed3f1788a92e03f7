use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::cli::Args;

/// Runtime configuration, from a TOML file and/or CLI args
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Upper bound on concurrent probe tasks
    pub max_threads: u16,
    /// Longest route expected (sizes the tree's depth index)
    pub max_depth: u8,
    /// IP-ID readings taken per interface
    pub ip_id_samples: u8,
    /// Source port / ICMP identifier range shared by probe slots
    pub src_id_lower: u16,
    pub src_id_upper: u16,
    /// Destination port / ICMP sequence range
    pub dst_seq_lower: u16,
    pub dst_seq_upper: u16,
    /// Largest IP-ID step still considered the same counter
    pub max_ip_id_gap: u16,
    /// Delay between task launches, per phase
    #[serde(with = "duration_serde")]
    pub ip_id_throttle: Duration,
    #[serde(with = "duration_serde")]
    pub udp_throttle: Duration,
    #[serde(with = "duration_serde")]
    pub timestamp_throttle: Duration,
    #[serde(with = "duration_serde")]
    pub dns_throttle: Duration,
    /// Reverse DNS timeout
    #[serde(with = "duration_serde")]
    pub dns_timeout: Duration,
    /// Run hint collection at all
    pub hints_enabled: bool,
    /// Enable reverse DNS lookups
    pub dns_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_threads: 256,
            max_depth: 30,
            ip_id_samples: 4,
            src_id_lower: 14000,
            src_id_upper: 50000,
            dst_seq_lower: 33434,
            dst_seq_upper: 65535,
            max_ip_id_gap: 1000,
            ip_id_throttle: Duration::from_millis(10),
            udp_throttle: Duration::from_millis(100),
            timestamp_throttle: Duration::from_millis(100),
            dns_throttle: Duration::from_millis(10),
            dns_timeout: Duration::from_secs(3),
            hints_enabled: true,
            dns_enabled: true,
        }
    }
}

impl Config {
    /// Load a configuration file; missing keys keep their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Override file (or default) values with the flags given on the command line
    pub fn apply_args(mut self, args: &Args) -> Self {
        if let Some(threads) = args.threads {
            self.max_threads = threads;
        }
        if let Some(depth) = args.max_depth {
            self.max_depth = depth;
        }
        if let Some(samples) = args.ip_ids {
            self.ip_id_samples = samples;
        }
        if args.no_hints {
            self.hints_enabled = false;
        }
        if args.no_dns {
            self.dns_enabled = false;
        }
        self
    }
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        Config::default().apply_args(args)
    }
}

/// Serde helper for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
