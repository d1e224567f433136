use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a cluster member. Ids run from 1 to the node count.
pub type NodeId = u64;

/// Logical epoch ordering leadership claims.
pub type Term = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Follower,
    Candidate,
    Leader,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Follower => write!(f, "follower"),
            NodeRole::Candidate => write!(f, "candidate"),
            NodeRole::Leader => write!(f, "leader"),
        }
    }
}

/// The single vote a node may cast in `term`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VoteRecord {
    pub term: Term,
    pub voted_for: Option<NodeId>,
}

impl VoteRecord {
    /// Whether a vote for `candidate` in `term` is still available.
    pub fn can_vote_for(&self, term: Term, candidate: NodeId) -> bool {
        self.term != term || self.voted_for.is_none() || self.voted_for == Some(candidate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    pub id: NodeId,
    pub role: NodeRole,
    pub current_term: Term,
    pub vote: VoteRecord,
    pub leader_id: Option<NodeId>,
    /// `None` while the election timer is cancelled (leaders).
    pub election_deadline: Option<u64>,
    pub is_reachable: bool,
}

impl NodeState {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            role: NodeRole::Follower,
            current_term: 0,
            vote: VoteRecord::default(),
            leader_id: None,
            election_deadline: None,
            is_reachable: true,
        }
    }

    /// Vote cast in the current term, if any.
    pub fn voted_for(&self) -> Option<NodeId> {
        if self.vote.term == self.current_term {
            self.vote.voted_for
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_node_starts_as_term_zero_follower() {
        let state = NodeState::new(4);
        assert_eq!(state.role, NodeRole::Follower);
        assert_eq!(state.current_term, 0);
        assert_eq!(state.voted_for(), None);
        assert!(state.is_reachable);
    }

    #[test]
    fn vote_record_allows_one_candidate_per_term() {
        let record = VoteRecord {
            term: 3,
            voted_for: Some(2),
        };
        assert!(record.can_vote_for(3, 2));
        assert!(!record.can_vote_for(3, 5));
        assert!(record.can_vote_for(4, 5));
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&NodeRole::Candidate).unwrap();
        assert_eq!(json, "\"candidate\"");
        assert_eq!(NodeRole::Leader.to_string(), "leader");
    }
}
