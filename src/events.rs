//! Notifications for the rendering layer.
//!
//! Every role, term, leader-pointer and reachability change, every vote and
//! every heartbeat sent or received becomes a [`ClusterEvent`] on the
//! [`EventBus`]. The bus is a bounded broadcast channel: publishing never
//! waits, and a subscriber that falls behind loses its oldest events instead
//! of stalling the simulation.

use log::warn;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::raft::{NodeId, NodeRole, Term};

/// Whether a transition came from the protocol or from a manual override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionOrigin {
    Protocol,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatDirection {
    Sent,
    Received,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    RoleChanged { from: NodeRole, to: NodeRole },
    TermChanged { from: Term },
    LeaderChanged { leader: Option<NodeId> },
    Heartbeat { direction: HeartbeatDirection, peer: NodeId },
    VoteRequested { candidate: NodeId },
    VoteCast { candidate: NodeId, granted: bool },
    ReachabilityChanged { reachable: bool },
}

/// One observable change on one node. `term` and `role` are the node's
/// values after the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClusterEvent {
    pub at: u64,
    pub node_id: NodeId,
    pub term: Term,
    pub role: NodeRole,
    pub origin: TransitionOrigin,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl ClusterEvent {
    pub fn is_manual(&self) -> bool {
        self.origin == TransitionOrigin::Manual
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ClusterEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: ClusterEvent) {
        // Only fails when nobody is listening.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            missed: 0,
        }
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

pub struct Subscription {
    receiver: broadcast::Receiver<ClusterEvent>,
    missed: u64,
}

impl Subscription {
    /// Next buffered event without waiting.
    pub fn try_next(&mut self) -> Option<ClusterEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(n)) => self.record_lag(n),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the next event. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<ClusterEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(n)) => self.record_lag(n),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Everything currently buffered.
    pub fn drain(&mut self) -> Vec<ClusterEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Events lost because this subscriber fell behind.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    /// Lag on the stream is logged; it has no `missed` counter to feed.
    pub fn into_stream(self) -> impl Stream<Item = ClusterEvent> {
        BroadcastStream::new(self.receiver).filter_map(|item| match item {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(n)) => {
                log_lag(n);
                None
            }
        })
    }

    fn record_lag(&mut self, n: u64) {
        log_lag(n);
        self.missed += n;
    }
}

fn log_lag(n: u64) {
    warn!("Event subscriber lagged, dropped {n} events");
}
