use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Election and heartbeat timing, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    pub election_timeout_min: u64,
    pub election_timeout_max: u64,
    pub heartbeat_interval: u64,
}

impl RaftConfig {
    pub fn new(
        election_timeout_min: u64,
        election_timeout_max: u64,
        heartbeat_interval: u64,
    ) -> Self {
        Self {
            election_timeout_min,
            election_timeout_max,
            heartbeat_interval,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.election_timeout_min == 0 {
            return Err(ConfigError::Invalid(
                "election_timeout_min must be greater than zero".to_string(),
            ));
        }
        if self.election_timeout_min > self.election_timeout_max {
            return Err(ConfigError::Invalid(format!(
                "election_timeout_min ({}) exceeds election_timeout_max ({})",
                self.election_timeout_min, self.election_timeout_max
            )));
        }
        if self.heartbeat_interval == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat_interval must be greater than zero".to_string(),
            ));
        }
        // A leader has to be heard from before the shortest timeout fires.
        if self.heartbeat_interval >= self.election_timeout_min {
            return Err(ConfigError::Invalid(format!(
                "heartbeat_interval ({}) must be shorter than election_timeout_min ({})",
                self.heartbeat_interval, self.election_timeout_min
            )));
        }
        Ok(())
    }
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self::new(150, 300, 50)
    }
}
