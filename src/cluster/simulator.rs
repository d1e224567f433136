use std::collections::BTreeMap;

use log::{debug, error, info};

use super::{ClusterSnapshot, SimError};
use crate::common::{Clock, VirtualClock};
use crate::config::SimulationConfig;
use crate::events::{ClusterEvent, EventBus, EventKind, Subscription, TransitionOrigin};
use crate::network::{ChannelStats, Envelope, MessageChannel};
use crate::raft::{NodeAgent, NodeId, NodeRole, RaftMessage, Term};

/// Owns the node agents, routes their messages and drives their timers.
///
/// Nodes live in a flat arena indexed by `id - 1`. Agents only ever see
/// their own state; everything between them goes through the
/// [`MessageChannel`].
pub struct ClusterSimulator {
    config: SimulationConfig,
    clock: Box<dyn Clock>,
    nodes: Vec<NodeAgent>,
    channel: MessageChannel,
    events: EventBus,
    // Protocol-elected leaders; manual promotions are not recorded.
    leaders_by_term: BTreeMap<Term, NodeId>,
}

impl ClusterSimulator {
    /// Deterministic simulator on a virtual clock starting at zero.
    pub fn new(config: SimulationConfig) -> Result<Self, SimError> {
        Self::with_clock(config, Box::new(VirtualClock::new()))
    }

    pub fn with_clock(config: SimulationConfig, clock: Box<dyn Clock>) -> Result<Self, SimError> {
        config.validate()?;

        let now = clock.now();
        let nodes = (1..=config.node_count as NodeId)
            .map(|id| NodeAgent::new(id, config.raft.clone(), config.rng(id), now))
            .collect();
        let channel = MessageChannel::new(config.network.clone(), config.rng(0));
        let events = EventBus::new(config.event_buffer);

        info!(
            "Created cluster of {} nodes (election timeout {}-{}ms, heartbeat {}ms)",
            config.node_count,
            config.raft.election_timeout_min,
            config.raft.election_timeout_max,
            config.raft.heartbeat_interval
        );

        Ok(Self {
            config,
            clock,
            nodes,
            channel,
            events,
            leaders_by_term: BTreeMap::new(),
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> Result<&NodeAgent, SimError> {
        let idx = self.index(id)?;
        Ok(&self.nodes[idx])
    }

    pub fn reachable_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_reachable()).count()
    }

    /// Votes needed to win right now: a strict majority of reachable nodes.
    pub fn quorum(&self) -> usize {
        self.reachable_count() / 2 + 1
    }

    pub fn leaders_by_term(&self) -> &BTreeMap<Term, NodeId> {
        &self.leaders_by_term
    }

    pub fn channel_stats(&self) -> ChannelStats {
        self.channel.stats()
    }

    pub fn event_bus(&self) -> EventBus {
        self.events.clone()
    }

    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    /// Advance time by `elapsed`, tick every node, then deliver everything
    /// that has come due, including replies produced along the way.
    pub fn step(&mut self, elapsed: u64) {
        let now = self.clock.advance(elapsed);
        let reachable = self.reachable_ids();
        let quorum = self.quorum();

        for idx in 0..self.nodes.len() {
            if !self.nodes[idx].is_reachable() {
                continue;
            }
            let peers = peers_of(&reachable, self.nodes[idx].id());
            self.nodes[idx].on_tick(now, &peers, quorum);
            self.flush(idx, now);
        }

        self.deliver(now);
    }

    /// Step repeatedly in increments of `step` until `total` has elapsed.
    pub fn run_for(&mut self, total: u64, step: u64) {
        let step = step.max(1);
        let mut remaining = total;
        while remaining > 0 {
            let elapsed = remaining.min(step);
            self.step(elapsed);
            remaining -= elapsed;
        }
    }

    pub fn snapshot(&self) -> ClusterSnapshot {
        ClusterSnapshot::from_states(self.now(), self.nodes.iter().map(|n| n.state()))
    }

    /// Take a node down or bring it back. Down nodes keep their term and
    /// vote; they neither send, receive nor tick.
    pub fn set_reachable(&mut self, id: NodeId, reachable: bool) -> Result<(), SimError> {
        let idx = self.index(id)?;
        let now = self.now();
        info!(
            "Node {id} marked {}",
            if reachable { "reachable" } else { "unreachable" }
        );
        self.nodes[idx].set_reachable(reachable, now);
        self.flush(idx, now);
        Ok(())
    }

    /// Manual leader override. Every other node is demoted in the same step,
    /// so the cluster never shows two leaders.
    pub fn force_promote(&mut self, id: NodeId) -> Result<(), SimError> {
        let target = self.index(id)?;
        let now = self.now();
        info!("Manually promoting node {id} to leader");

        for idx in 0..self.nodes.len() {
            if idx == target {
                self.nodes[idx].force_role(NodeRole::Leader, None, now);
            } else {
                self.nodes[idx].force_role(NodeRole::Follower, Some(id), now);
            }
            self.flush(idx, now);
        }
        Ok(())
    }

    /// Manual override for a single node. Forcing `Leader` goes through
    /// [`force_promote`](Self::force_promote).
    pub fn force_role(&mut self, id: NodeId, role: NodeRole) -> Result<(), SimError> {
        if role == NodeRole::Leader {
            return self.force_promote(id);
        }
        let idx = self.index(id)?;
        let now = self.now();
        info!("Manually setting node {id} to {role}");
        self.nodes[idx].force_role(role, None, now);
        self.flush(idx, now);
        Ok(())
    }

    /// Make a node's election timer fire on the next step.
    pub fn expire_election_timer(&mut self, id: NodeId) -> Result<(), SimError> {
        let idx = self.index(id)?;
        let now = self.now();
        self.nodes[idx].expire_election_timer(now);
        Ok(())
    }

    fn deliver(&mut self, now: u64) {
        while let Some(envelope) = self.channel.pop_due(now) {
            let Envelope { from, to, message, .. } = envelope;
            let (Ok(from_idx), Ok(to_idx)) = (self.index(from), self.index(to)) else {
                continue;
            };
            if !self.nodes[from_idx].is_reachable() || !self.nodes[to_idx].is_reachable() {
                debug!("Discarding message {from} -> {to}, endpoint unreachable");
                continue;
            }

            match message {
                RaftMessage::VoteRequest(req) => self.nodes[to_idx].on_vote_request(req, now),
                RaftMessage::VoteResponse(resp) => {
                    // Reachability may have changed since the election began.
                    let reachable = self.reachable_ids();
                    let peers = peers_of(&reachable, to);
                    let quorum = self.quorum();
                    self.nodes[to_idx].on_vote_response(resp, now, &peers, quorum);
                }
                RaftMessage::Heartbeat(hb) => self.nodes[to_idx].on_heartbeat(hb, now),
            }
            self.flush(to_idx, now);
        }
    }

    // Move an agent's outbox into the channel and its events onto the bus.
    fn flush(&mut self, idx: usize, now: u64) {
        let from = self.nodes[idx].id();
        for out in self.nodes[idx].drain_outbox() {
            self.channel.send(from, out.to, out.message, now);
        }
        for event in self.nodes[idx].drain_events() {
            self.record_leadership(&event);
            self.events.publish(event);
        }
    }

    fn record_leadership(&mut self, event: &ClusterEvent) {
        if event.origin != TransitionOrigin::Protocol {
            return;
        }
        if let EventKind::RoleChanged {
            to: NodeRole::Leader,
            ..
        } = event.kind
        {
            if let Some(&existing) = self.leaders_by_term.get(&event.term) {
                if existing != event.node_id {
                    error!(
                        "Two leaders elected in term {}: nodes {} and {}",
                        event.term, existing, event.node_id
                    );
                }
                return;
            }
            self.leaders_by_term.insert(event.term, event.node_id);
        }
    }

    fn reachable_ids(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.is_reachable())
            .map(|n| n.id())
            .collect()
    }

    fn index(&self, id: NodeId) -> Result<usize, SimError> {
        if id >= 1 && (id as usize) <= self.nodes.len() {
            Ok(id as usize - 1)
        } else {
            Err(SimError::UnknownNode(id))
        }
    }
}

fn peers_of(reachable: &[NodeId], id: NodeId) -> Vec<NodeId> {
    reachable.iter().copied().filter(|&p| p != id).collect()
}
