// Election engine
pub mod raft;
pub mod network;
pub mod cluster;
pub mod events;
pub mod config;
pub mod common;

// Terminal driver
pub mod repl;

// Public exports
pub use cluster::{ClusterHandle, ClusterRuntime, ClusterSimulator, ClusterSnapshot, SimError};
pub use config::{ConfigError, SimulationConfig};
pub use events::{ClusterEvent, EventBus, EventKind, Subscription, TransitionOrigin};
pub use raft::{NodeId, NodeRole, RaftConfig, Term};
