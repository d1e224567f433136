mod error;
mod runtime;
mod simulator;
mod snapshot;

pub use self::error::SimError;
pub use self::runtime::{ClusterHandle, ClusterRuntime};
pub use self::simulator::ClusterSimulator;
pub use self::snapshot::{ClusterSnapshot, NodeView};
