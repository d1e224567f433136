use std::collections::HashSet;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::Rng;

use super::{
    Heartbeat, NodeId, NodeRole, NodeState, Outgoing, RaftConfig, RaftMessage, Term, VoteRecord,
    VoteRequest, VoteResponse,
};
use crate::events::{ClusterEvent, EventKind, HeartbeatDirection, TransitionOrigin};

/// One cluster member's election state machine.
///
/// The agent never touches another node. Inputs arrive through `on_*`
/// methods; outputs accumulate in an outbox and an event buffer which the
/// owner drains after every call.
pub struct NodeAgent {
    state: NodeState,
    config: RaftConfig,
    rng: StdRng,

    // Election state
    election_term: Option<Term>,
    votes_received: HashSet<NodeId>,

    // Leader state
    next_heartbeat_at: Option<u64>,

    outbox: Vec<Outgoing>,
    events: Vec<ClusterEvent>,
}

impl NodeAgent {
    pub fn new(id: NodeId, config: RaftConfig, rng: StdRng, now: u64) -> Self {
        let mut agent = Self {
            state: NodeState::new(id),
            config,
            rng,
            election_term: None,
            votes_received: HashSet::new(),
            next_heartbeat_at: None,
            outbox: Vec::new(),
            events: Vec::new(),
        };
        agent.reset_election_deadline(now);
        agent
    }

    pub fn id(&self) -> NodeId {
        self.state.id
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn config(&self) -> &RaftConfig {
        &self.config
    }

    pub fn role(&self) -> NodeRole {
        self.state.role
    }

    pub fn current_term(&self) -> Term {
        self.state.current_term
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.state.role, NodeRole::Leader)
    }

    pub fn is_reachable(&self) -> bool {
        self.state.is_reachable
    }

    /// Granted votes collected in the current election, self included.
    pub fn votes_received(&self) -> usize {
        self.votes_received.len()
    }

    pub fn drain_outbox(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    pub fn drain_events(&mut self) -> Vec<ClusterEvent> {
        std::mem::take(&mut self.events)
    }

    /// Advance this node's timers. `peers` are the other reachable nodes and
    /// `quorum` the votes needed right now.
    pub fn on_tick(&mut self, now: u64, peers: &[NodeId], quorum: usize) {
        if !self.state.is_reachable {
            return;
        }

        match self.state.role {
            NodeRole::Leader => {
                if self.next_heartbeat_at.is_some_and(|at| now >= at) {
                    self.send_heartbeats(now, peers);
                }
            }
            NodeRole::Follower | NodeRole::Candidate => {
                if self.state.election_deadline.is_some_and(|at| now >= at) {
                    self.start_election(now, peers, quorum);
                }
            }
        }
    }

    fn start_election(&mut self, now: u64, peers: &[NodeId], quorum: usize) {
        let new_term = self.state.current_term + 1;
        info!(
            "Node {} election timeout elapsed, campaigning for term {}",
            self.state.id, new_term
        );

        self.set_term(new_term, now, TransitionOrigin::Protocol);
        self.state.vote = VoteRecord {
            term: new_term,
            voted_for: Some(self.state.id),
        };
        self.set_role(NodeRole::Candidate, now, TransitionOrigin::Protocol);
        self.set_leader(None, now, TransitionOrigin::Protocol);
        self.reset_election_deadline(now);

        self.election_term = Some(new_term);
        self.votes_received.clear();
        self.votes_received.insert(self.state.id);

        self.emit(
            now,
            TransitionOrigin::Protocol,
            EventKind::VoteRequested {
                candidate: self.state.id,
            },
        );
        let request = RaftMessage::VoteRequest(VoteRequest {
            term: new_term,
            candidate_id: self.state.id,
        });
        for &peer in peers {
            self.send(peer, request);
        }

        // A lone reachable node is its own majority.
        if self.votes_received.len() >= quorum {
            self.become_leader(now, peers);
        }
    }

    pub fn on_vote_request(&mut self, req: VoteRequest, now: u64) {
        if req.term > self.state.current_term {
            self.step_down(req.term, now);
        }

        let granted = req.term == self.state.current_term
            && self.state.vote.can_vote_for(req.term, req.candidate_id);

        if granted {
            // Recorded before the response leaves.
            self.state.vote = VoteRecord {
                term: req.term,
                voted_for: Some(req.candidate_id),
            };
            self.reset_election_deadline(now);
        }

        debug!(
            "Node {} {} vote for node {} in term {}",
            self.state.id,
            if granted { "granted" } else { "denied" },
            req.candidate_id,
            req.term
        );
        self.emit(
            now,
            TransitionOrigin::Protocol,
            EventKind::VoteCast {
                candidate: req.candidate_id,
                granted,
            },
        );
        self.send(
            req.candidate_id,
            RaftMessage::VoteResponse(VoteResponse {
                term: self.state.current_term,
                granted,
                voter_id: self.state.id,
            }),
        );
    }

    pub fn on_vote_response(
        &mut self,
        resp: VoteResponse,
        now: u64,
        peers: &[NodeId],
        quorum: usize,
    ) {
        if resp.term > self.state.current_term {
            self.step_down(resp.term, now);
            return;
        }

        // Stale or foreign responses are expected and harmless.
        if self.state.role != NodeRole::Candidate
            || resp.term != self.state.current_term
            || self.election_term != Some(resp.term)
            || !resp.granted
        {
            return;
        }

        self.votes_received.insert(resp.voter_id);
        if self.votes_received.len() >= quorum {
            self.become_leader(now, peers);
        }
    }

    pub fn on_heartbeat(&mut self, hb: Heartbeat, now: u64) {
        if hb.term < self.state.current_term {
            debug!(
                "Node {} ignoring stale heartbeat from node {} (term {} < {})",
                self.state.id, hb.leader_id, hb.term, self.state.current_term
            );
            return;
        }

        if hb.term > self.state.current_term {
            self.set_term(hb.term, now, TransitionOrigin::Protocol);
        }
        if self.state.role != NodeRole::Follower {
            self.set_role(NodeRole::Follower, now, TransitionOrigin::Protocol);
            self.next_heartbeat_at = None;
        }
        self.election_term = None;
        self.set_leader(Some(hb.leader_id), now, TransitionOrigin::Protocol);
        self.reset_election_deadline(now);

        self.emit(
            now,
            TransitionOrigin::Protocol,
            EventKind::Heartbeat {
                direction: HeartbeatDirection::Received,
                peer: hb.leader_id,
            },
        );
    }

    /// Manual override used by the click-to-toggle affordance. Skips all
    /// term and vote bookkeeping; events are tagged [`TransitionOrigin::Manual`].
    ///
    /// Promoting a single agent does not demote the others; the simulator's
    /// `force_promote` does both in one step.
    pub fn force_role(&mut self, role: NodeRole, leader_hint: Option<NodeId>, now: u64) {
        let origin = TransitionOrigin::Manual;
        self.election_term = None;
        self.votes_received.clear();

        match role {
            NodeRole::Leader => {
                self.state.election_deadline = None;
                // Heartbeats go out on the next tick.
                self.next_heartbeat_at = Some(now);
                self.set_role(NodeRole::Leader, now, origin);
                self.set_leader(Some(self.state.id), now, origin);
            }
            NodeRole::Follower | NodeRole::Candidate => {
                self.next_heartbeat_at = None;
                self.reset_election_deadline(now);
                self.set_role(role, now, origin);
                self.set_leader(leader_hint, now, origin);
            }
        }
    }

    /// Mark this node up or down. A node coming back gets a fresh timer so
    /// it can hear from the current leader before campaigning.
    pub fn set_reachable(&mut self, reachable: bool, now: u64) {
        if self.state.is_reachable == reachable {
            return;
        }
        self.state.is_reachable = reachable;

        if reachable {
            if self.is_leader() {
                self.next_heartbeat_at = Some(now);
            } else {
                self.reset_election_deadline(now);
            }
        }

        self.emit(
            now,
            TransitionOrigin::Protocol,
            EventKind::ReachabilityChanged { reachable },
        );
    }

    /// Make the election timer fire on the next tick.
    pub fn expire_election_timer(&mut self, now: u64) {
        if !self.is_leader() {
            self.state.election_deadline = Some(now);
        }
    }

    fn become_leader(&mut self, now: u64, peers: &[NodeId]) {
        if self.state.role != NodeRole::Candidate {
            return;
        }

        info!(
            "Node {} becoming leader for term {} with {} votes",
            self.state.id,
            self.state.current_term,
            self.votes_received.len()
        );

        self.set_role(NodeRole::Leader, now, TransitionOrigin::Protocol);
        self.set_leader(Some(self.state.id), now, TransitionOrigin::Protocol);
        self.state.election_deadline = None;
        self.election_term = None;

        self.send_heartbeats(now, peers);
    }

    fn send_heartbeats(&mut self, now: u64, peers: &[NodeId]) {
        let heartbeat = RaftMessage::Heartbeat(Heartbeat {
            term: self.state.current_term,
            leader_id: self.state.id,
        });
        for &peer in peers {
            self.send(peer, heartbeat);
            self.emit(
                now,
                TransitionOrigin::Protocol,
                EventKind::Heartbeat {
                    direction: HeartbeatDirection::Sent,
                    peer,
                },
            );
        }
        self.next_heartbeat_at = Some(now.saturating_add(self.config.heartbeat_interval));
    }

    // Adopt a strictly higher term seen on any message.
    fn step_down(&mut self, term: Term, now: u64) {
        let was_leader = self.is_leader();
        self.set_term(term, now, TransitionOrigin::Protocol);
        self.state.vote = VoteRecord {
            term,
            voted_for: None,
        };
        self.set_role(NodeRole::Follower, now, TransitionOrigin::Protocol);
        self.set_leader(None, now, TransitionOrigin::Protocol);
        self.election_term = None;
        self.votes_received.clear();

        if was_leader {
            info!("Node {} stepping down, saw term {}", self.state.id, term);
            self.next_heartbeat_at = None;
            self.reset_election_deadline(now);
        }
    }

    fn reset_election_deadline(&mut self, now: u64) {
        let timeout = self
            .rng
            .random_range(self.config.election_timeout_min..=self.config.election_timeout_max);
        self.state.election_deadline = Some(now.saturating_add(timeout));
    }

    fn set_term(&mut self, term: Term, now: u64, origin: TransitionOrigin) {
        if term <= self.state.current_term {
            return;
        }
        let from = self.state.current_term;
        self.state.current_term = term;
        self.emit(now, origin, EventKind::TermChanged { from });
    }

    fn set_role(&mut self, role: NodeRole, now: u64, origin: TransitionOrigin) {
        if self.state.role == role {
            return;
        }
        let from = self.state.role;
        self.state.role = role;
        self.emit(now, origin, EventKind::RoleChanged { from, to: role });
    }

    fn set_leader(&mut self, leader: Option<NodeId>, now: u64, origin: TransitionOrigin) {
        if self.state.leader_id == leader {
            return;
        }
        self.state.leader_id = leader;
        self.emit(now, origin, EventKind::LeaderChanged { leader });
    }

    fn send(&mut self, to: NodeId, message: RaftMessage) {
        self.outbox.push(Outgoing { to, message });
    }

    fn emit(&mut self, at: u64, origin: TransitionOrigin, kind: EventKind) {
        self.events.push(ClusterEvent {
            at,
            node_id: self.state.id,
            term: self.state.current_term,
            role: self.state.role,
            origin,
            kind,
        });
    }
}
