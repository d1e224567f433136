mod config;
mod node;
mod state;

pub use self::config::RaftConfig;
pub use self::node::NodeAgent;
pub use self::state::{NodeId, NodeRole, NodeState, Term, VoteRecord};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: Term,
    pub candidate_id: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: Term,
    pub granted: bool,
    pub voter_id: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub term: Term,
    pub leader_id: NodeId,
}

// Message types exchanged between node agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RaftMessage {
    VoteRequest(VoteRequest),
    VoteResponse(VoteResponse),
    Heartbeat(Heartbeat),
}

impl RaftMessage {
    pub fn term(&self) -> Term {
        match self {
            RaftMessage::VoteRequest(req) => req.term,
            RaftMessage::VoteResponse(resp) => resp.term,
            RaftMessage::Heartbeat(hb) => hb.term,
        }
    }
}

/// A message an agent wants delivered to `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outgoing {
    pub to: NodeId,
    pub message: RaftMessage,
}
