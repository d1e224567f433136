use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::MissedTickBehavior;

use super::{ClusterSimulator, ClusterSnapshot, SimError};
use crate::common::WallClock;
use crate::config::{ConfigError, SimulationConfig};
use crate::events::{EventBus, Subscription};
use crate::raft::NodeId;

enum Command {
    SetReachable {
        id: NodeId,
        reachable: bool,
        reply: oneshot::Sender<Result<(), SimError>>,
    },
    ForcePromote {
        id: NodeId,
        reply: oneshot::Sender<Result<(), SimError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Live mode: a single coordinating task owns a wall-clock simulator and
/// steps it at a fixed cadence. Node timers are independent deadlines inside
/// that simulator; commands and queries reach it through a [`ClusterHandle`].
pub struct ClusterRuntime;

impl ClusterRuntime {
    /// Spawn the coordinating task. Must be called from within a tokio
    /// runtime.
    pub fn start(
        config: SimulationConfig,
        tick_interval: Duration,
    ) -> Result<ClusterHandle, SimError> {
        if tick_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "tick_interval must be greater than zero".to_string(),
            )
            .into());
        }
        let sim = ClusterSimulator::with_clock(config, Box::new(WallClock::new()))?;
        let events = sim.event_bus();
        let table = Arc::new(RwLock::new(sim.snapshot()));
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(run(sim, rx, Arc::clone(&table), tick_interval));

        Ok(ClusterHandle {
            commands: tx,
            snapshot: table,
            events,
        })
    }
}

/// Cloneable front end to a running cluster. When the last handle is
/// dropped the coordinating task stops.
#[derive(Clone)]
pub struct ClusterHandle {
    commands: mpsc::Sender<Command>,
    snapshot: Arc<RwLock<ClusterSnapshot>>,
    events: EventBus,
}

impl ClusterHandle {
    /// Snapshot as of the last completed step or command.
    pub async fn snapshot(&self) -> ClusterSnapshot {
        self.snapshot.read().await.clone()
    }

    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    pub async fn set_reachable(&self, id: NodeId, reachable: bool) -> Result<(), SimError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SetReachable {
            id,
            reachable,
            reply,
        })
        .await?;
        rx.await.map_err(|_| SimError::RuntimeStopped)?
    }

    pub async fn force_promote(&self, id: NodeId) -> Result<(), SimError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ForcePromote { id, reply }).await?;
        rx.await.map_err(|_| SimError::RuntimeStopped)?
    }

    /// Stop the coordinating task and wait for it to acknowledge.
    pub async fn shutdown(&self) -> Result<(), SimError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await?;
        rx.await.map_err(|_| SimError::RuntimeStopped)
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    async fn send(&self, command: Command) -> Result<(), SimError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SimError::RuntimeStopped)
    }
}

async fn run(
    mut sim: ClusterSimulator,
    mut commands: mpsc::Receiver<Command>,
    table: Arc<RwLock<ClusterSnapshot>>,
    tick_interval: Duration,
) {
    info!(
        "Cluster runtime started with {} nodes, ticking every {:?}",
        sim.node_count(),
        tick_interval
    );

    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let tick_ms = tick_interval.as_millis() as u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sim.step(tick_ms);
                *table.write().await = sim.snapshot();
            }
            command = commands.recv() => match command {
                Some(Command::SetReachable { id, reachable, reply }) => {
                    let result = sim.set_reachable(id, reachable);
                    *table.write().await = sim.snapshot();
                    let _ = reply.send(result);
                }
                Some(Command::ForcePromote { id, reply }) => {
                    let result = sim.force_promote(id);
                    *table.write().await = sim.snapshot();
                    let _ = reply.send(result);
                }
                Some(Command::Shutdown { reply }) => {
                    let _ = reply.send(());
                    break;
                }
                None => {
                    debug!("All cluster handles dropped");
                    break;
                }
            }
        }
    }

    // Closing the receiver makes every later command fail fast.
    commands.close();
    info!("Cluster runtime stopped at {}ms", sim.now());
}
