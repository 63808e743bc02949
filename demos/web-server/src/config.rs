//! Server configuration, read from TOML.

use std::{
    net::{Ipv4Addr, SocketAddr},
    path::Path,
    time::Duration,
};

use anyhow::{Context, bail};
use backscroll_core::{SessionConfig, StoreConfig};
use serde::{Deserialize, Serialize};

/// Top-level server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP server binds to.
    pub listen: SocketAddr,
    pub store: StoreConfig,
    pub session: SessionConfig,
    pub simulation: SimulationConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            store: StoreConfig::default(),
            session: SessionConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse_str(&contents)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns error if the TOML is malformed.
    pub fn parse_str(contents: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).context("Failed to parse config")
    }

    /// Reject values the server cannot run with.
    ///
    /// # Errors
    /// Returns error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        let session = &self.session;
        if session.page_size == 0 {
            bail!("session.page_size must be at least 1");
        }
        if session.subscriber_capacity == 0 {
            bail!("session.subscriber_capacity must be at least 1");
        }
        if session.outbound_capacity == 0 {
            bail!("session.outbound_capacity must be at least 1");
        }

        let sim = &self.simulation;
        if sim.enabled {
            if sim.backfill_batch == 0 {
                bail!("simulation.backfill_batch must be at least 1");
            }
            if sim.live_interval_ms == 0
                || sim.late_single_interval_ms == 0
                || sim.late_batch_interval_ms == 0
            {
                bail!("simulation intervals must be non-zero");
            }
        }
        Ok(())
    }
}

/// Simulated producers writing into the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub enabled: bool,

    /// Historical messages written once at startup, one second apart,
    /// walking back from one hour ago.
    pub backfill_count: usize,
    /// Messages per backfill append.
    pub backfill_batch: usize,

    /// One message stamped "now" per interval.
    pub live_interval_ms: u64,

    /// One message stamped `late_offset_secs` in the past per interval.
    pub late_single_interval_ms: u64,
    pub late_offset_secs: i64,

    /// `late_batch_size` messages stamped `late_offset_secs`,
    /// `2 * late_offset_secs`, ... in the past per interval.
    pub late_batch_interval_ms: u64,
    pub late_batch_size: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backfill_count: 100_000,
            backfill_batch: 1_000,
            live_interval_ms: 1_000,
            late_single_interval_ms: 5_000,
            late_offset_secs: 10,
            late_batch_interval_ms: 20_000,
            late_batch_size: 10,
        }
    }
}

impl SimulationConfig {
    #[must_use]
    pub const fn live_interval(&self) -> Duration {
        Duration::from_millis(self.live_interval_ms)
    }

    #[must_use]
    pub const fn late_single_interval(&self) -> Duration {
        Duration::from_millis(self.late_single_interval_ms)
    }

    #[must_use]
    pub const fn late_batch_interval(&self) -> Duration {
        Duration::from_millis(self.late_batch_interval_ms)
    }
}
