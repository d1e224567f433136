use std::collections::BTreeMap;

use serde::Serialize;

use crate::raft::{NodeId, NodeRole, NodeState, Term};

/// Read-only projection of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeView {
    pub role: NodeRole,
    pub term: Term,
    pub leader_id: Option<NodeId>,
    pub voted_for: Option<NodeId>,
    pub is_reachable: bool,
}

impl From<&NodeState> for NodeView {
    fn from(state: &NodeState) -> Self {
        Self {
            role: state.role,
            term: state.current_term,
            leader_id: state.leader_id,
            voted_for: state.voted_for(),
            is_reachable: state.is_reachable,
        }
    }
}

/// Point-in-time view of the whole cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterSnapshot {
    pub at: u64,
    pub nodes: BTreeMap<NodeId, NodeView>,
    /// Reachable leader with the highest term, if any.
    pub leader_id: Option<NodeId>,
}

impl ClusterSnapshot {
    pub fn from_states<'a, I>(at: u64, states: I) -> Self
    where
        I: IntoIterator<Item = &'a NodeState>,
    {
        let nodes: BTreeMap<NodeId, NodeView> =
            states.into_iter().map(|s| (s.id, NodeView::from(s))).collect();
        let leader_id = nodes
            .iter()
            .filter(|(_, v)| v.role == NodeRole::Leader && v.is_reachable)
            .max_by_key(|(_, v)| v.term)
            .map(|(&id, _)| id);

        Self {
            at,
            nodes,
            leader_id,
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeView> {
        self.nodes.get(&id)
    }

    pub fn role_of(&self, id: NodeId) -> Option<NodeRole> {
        self.node(id).map(|v| v.role)
    }

    pub fn term_of(&self, id: NodeId) -> Option<Term> {
        self.node(id).map(|v| v.term)
    }

    /// Every node currently in the leader role, reachable or not.
    pub fn leaders(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, v)| v.role == NodeRole::Leader)
            .map(|(&id, _)| id)
            .collect()
    }

    pub fn count(&self, role: NodeRole) -> usize {
        self.nodes.values().filter(|v| v.role == role).count()
    }

    /// Exactly one reachable leader, every other reachable node following it
    /// in the same term.
    pub fn is_settled(&self) -> bool {
        let Some(leader) = self.leader_id else {
            return false;
        };
        let term = self.nodes[&leader].term;
        self.nodes
            .iter()
            .filter(|(_, v)| v.is_reachable)
            .all(|(&id, v)| {
                if id == leader {
                    true
                } else {
                    v.role == NodeRole::Follower && v.term == term && v.leader_id == Some(leader)
                }
            })
    }
}
