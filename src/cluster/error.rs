use thiserror::Error;

use crate::config::ConfigError;
use crate::raft::NodeId;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Cluster runtime is not running")]
    RuntimeStopped,
}
