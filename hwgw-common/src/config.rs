//! HWGW configuration.
//!
//! Loaded from a TOML file when a path is given, otherwise defaults apply.
//! Every field has a default so partial files work. Duration fields accept
//! humantime strings ("250ms", "10s").

use crate::types::HostId;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration shared by the directory and the pipelines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HwgwConfig {
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub sim: SimConfig,
}

impl HwgwConfig {
    /// Load configuration from `path`, or defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("reading config file {}", p.display()))?;
                toml::from_str(&raw).with_context(|| format!("parsing config file {}", p.display()))
            }
            None => Ok(Self::default()),
        }
    }
}

/// Transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Well-known port the directory server listens on.
    #[serde(default = "default_directory_port")]
    pub directory_port: u64,
    /// How long a client waits for a correlated response.
    #[serde(default = "default_rpc_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            directory_port: 1000,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Directory service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Service tick period: inbox drain + maintenance + filler refresh.
    #[serde(default = "default_directory_tick", with = "humantime_serde")]
    pub tick: Duration,
    /// Pause before a filler retries a host with no free RAM (or after a
    /// failed launch).
    #[serde(default = "default_filler_pause", with = "humantime_serde")]
    pub filler_pause: Duration,
    /// Hosts never handed out or filled (e.g. the controller's own host).
    #[serde(default = "default_excluded_hosts")]
    pub excluded_hosts: Vec<HostId>,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            tick: default_directory_tick(),
            filler_pause: default_filler_pause(),
            excluded_hosts: default_excluded_hosts(),
        }
    }
}

/// Batch pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Absolute cap on concurrently in-flight batches.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Lower bound on the spacing between batch admissions.
    #[serde(default = "default_min_offset", with = "humantime_serde")]
    pub min_offset: Duration,
    /// Player-level drift tolerated before the cycle winds down and the plan
    /// is recomputed. A heuristic knob, not a correctness bound.
    #[serde(default = "default_level_tolerance")]
    pub level_tolerance: f64,
    /// Upper bound on hack threads considered by the planner.
    #[serde(default = "default_hack_thread_cap")]
    pub hack_thread_cap: u32,
    /// Continuous mode: keep batching even when the target drifts off
    /// baseline (used to farm experience rather than money).
    #[serde(default)]
    pub continuous: bool,
    /// Pause between work cycles.
    #[serde(default = "default_cycle_pause", with = "humantime_serde")]
    pub cycle_pause: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            min_offset: default_min_offset(),
            level_tolerance: default_level_tolerance(),
            hack_thread_cap: default_hack_thread_cap(),
            continuous: false,
            cycle_pause: default_cycle_pause(),
        }
    }
}

/// Fleet simulator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// RNG seed for hack-chance rolls.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Divide all operation durations by this factor (sim speed-up).
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            time_scale: default_time_scale(),
        }
    }
}

fn default_directory_port() -> u64 {
    1000
}

fn default_rpc_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_directory_tick() -> Duration {
    Duration::from_millis(10)
}

fn default_filler_pause() -> Duration {
    Duration::from_secs(10)
}

fn default_excluded_hosts() -> Vec<HostId> {
    vec![HostId::new("home")]
}

fn default_max_in_flight() -> usize {
    10_000
}

fn default_min_offset() -> Duration {
    Duration::from_millis(100)
}

fn default_level_tolerance() -> f64 {
    5.0
}

fn default_hack_thread_cap() -> u32 {
    128
}

fn default_cycle_pause() -> Duration {
    Duration::from_secs(1)
}

fn default_seed() -> u64 {
    1
}

fn default_time_scale() -> f64 {
    1.0
}
