use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::network::ChannelConfig;
use crate::raft::RaftConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Everything needed to build a simulator. Applied once at construction;
/// changing `node_count` means building a new simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub node_count: usize,
    pub raft: RaftConfig,
    pub network: ChannelConfig,
    /// Per-subscriber event buffer. Slow subscribers lose the oldest events.
    pub event_buffer: usize,
    /// Seed for every random draw. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl SimulationConfig {
    pub fn new(node_count: usize) -> Self {
        Self {
            node_count,
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_raft(mut self, raft: RaftConfig) -> Self {
        self.raft = raft;
        self
    }

    pub fn with_network(mut self, network: ChannelConfig) -> Self {
        self.network = network;
        self
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: SimulationConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_count < 1 {
            return Err(ConfigError::Invalid(
                "node_count must be at least 1".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid(
                "event_buffer must be greater than zero".to_string(),
            ));
        }
        self.raft.validate()?;
        self.network.validate()?;
        Ok(())
    }

    /// Independent random stream `stream` derived from the configured seed.
    pub(crate) fn rng(&self, stream: u64) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(stream)),
            None => StdRng::from_os_rng(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            node_count: 5,
            raft: RaftConfig::default(),
            network: ChannelConfig::default(),
            event_buffer: 1024,
            seed: None,
        }
    }
}
