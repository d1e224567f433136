use std::collections::{BTreeMap, HashMap};

use raftsim::network::ChannelConfig;
use raftsim::{
    ClusterSimulator, EventKind, NodeId, NodeRole, SimulationConfig, Subscription, Term,
    TransitionOrigin,
};

/// Checks the election invariants after every step.
struct Invariants {
    events: Subscription,
    terms: HashMap<NodeId, Term>,
    leaders: BTreeMap<Term, NodeId>,
    votes: HashMap<(NodeId, Term), NodeId>,
}

impl Invariants {
    fn new(sim: &ClusterSimulator) -> Self {
        Self {
            events: sim.subscribe(),
            terms: HashMap::new(),
            leaders: BTreeMap::new(),
            votes: HashMap::new(),
        }
    }

    fn check(&mut self, sim: &ClusterSimulator) {
        let snap = sim.snapshot();
        for (&id, view) in &snap.nodes {
            let previous = self.terms.insert(id, view.term).unwrap_or(0);
            assert!(
                view.term >= previous,
                "node {id} term went from {previous} to {}",
                view.term
            );

            if let Some(candidate) = view.voted_for {
                let recorded = *self.votes.entry((id, view.term)).or_insert(candidate);
                assert_eq!(
                    recorded, candidate,
                    "node {id} voted twice in term {}",
                    view.term
                );
            }

            if view.role == NodeRole::Leader {
                let elected = *self.leaders.entry(view.term).or_insert(id);
                assert_eq!(elected, id, "two leaders in term {}", view.term);
            }
        }

        for event in self.events.drain() {
            match event.kind {
                EventKind::VoteCast {
                    candidate,
                    granted: true,
                } => {
                    let recorded = *self
                        .votes
                        .entry((event.node_id, event.term))
                        .or_insert(candidate);
                    assert_eq!(recorded, candidate, "node {} double-granted", event.node_id);
                }
                EventKind::RoleChanged {
                    to: NodeRole::Leader,
                    ..
                } if event.origin == TransitionOrigin::Protocol => {
                    let node = sim.node(event.node_id).expect("known node");
                    if node.is_leader() && node.current_term() == event.term {
                        assert!(
                            node.votes_received() >= sim.quorum(),
                            "node {} led term {} with {} votes, quorum {}",
                            event.node_id,
                            event.term,
                            node.votes_received(),
                            sim.quorum()
                        );
                    }
                }
                _ => {}
            }
        }
        assert_eq!(self.events.missed(), 0, "checker fell behind the event bus");
    }
}

fn run_until<F>(
    sim: &mut ClusterSimulator,
    inv: &mut Invariants,
    step: u64,
    max_steps: usize,
    mut done: F,
) -> bool
where
    F: FnMut(&ClusterSimulator) -> bool,
{
    for _ in 0..max_steps {
        sim.step(step);
        inv.check(sim);
        if done(sim) {
            return true;
        }
    }
    false
}

fn simulator(nodes: usize, seed: u64) -> ClusterSimulator {
    ClusterSimulator::new(SimulationConfig::new(nodes).with_seed(seed)).expect("valid config")
}

#[test]
fn five_nodes_converge_on_a_single_leader() {
    let mut sim = simulator(5, 2024);
    let mut inv = Invariants::new(&sim);

    assert!(
        run_until(&mut sim, &mut inv, 5, 2_000, |s| s.snapshot().is_settled()),
        "no leader after 10s of simulated time"
    );

    let snap = sim.snapshot();
    let leader = snap.leader_id.expect("leader");
    let term = snap.term_of(leader).expect("term");
    assert_eq!(snap.count(NodeRole::Leader), 1);
    assert_eq!(snap.count(NodeRole::Follower), 4);
    assert!(snap.nodes.values().all(|v| v.term == term));

    // Heartbeats keep the same leader in place.
    run_until(&mut sim, &mut inv, 5, 400, |_| false);
    let later = sim.snapshot();
    assert_eq!(later.leader_id, Some(leader));
    assert_eq!(later.term_of(leader), Some(term));
    assert!(later.is_settled());
}

#[test]
fn failed_leader_is_replaced_and_demoted_on_return() {
    let mut sim = simulator(5, 7);
    let mut inv = Invariants::new(&sim);

    sim.expire_election_timer(1).unwrap();
    sim.step(1);
    inv.check(&sim);
    let snap = sim.snapshot();
    assert_eq!(snap.leader_id, Some(1));
    let old_term = snap.term_of(1).unwrap();

    let mut watch = sim.subscribe();
    sim.set_reachable(1, false).unwrap();
    assert!(
        run_until(&mut sim, &mut inv, 1, 2_000, |s| {
            matches!(s.snapshot().leader_id, Some(id) if id != 1)
        }),
        "no replacement leader"
    );

    let events = watch.drain();
    assert!(events.iter().any(|e| e.node_id != 1
        && e.term == old_term + 1
        && matches!(
            e.kind,
            EventKind::RoleChanged {
                to: NodeRole::Candidate,
                ..
            }
        )));

    let snap = sim.snapshot();
    let new_leader = snap.leader_id.unwrap();
    let new_term = snap.term_of(new_leader).unwrap();
    assert!(new_term > old_term);
    // The old leader was frozen, not reset.
    assert_eq!(snap.role_of(1), Some(NodeRole::Leader));
    assert_eq!(snap.term_of(1), Some(old_term));

    sim.set_reachable(1, true).unwrap();
    run_until(&mut sim, &mut inv, 1, 200, |_| false);

    let snap = sim.snapshot();
    assert_eq!(snap.role_of(1), Some(NodeRole::Follower));
    assert_eq!(snap.term_of(1), Some(new_term));
    assert_eq!(snap.node(1).unwrap().leader_id, Some(new_leader));
    assert_eq!(snap.leader_id, Some(new_leader));
    assert!(snap.is_settled());
}

#[test]
fn split_votes_retry_until_one_candidate_wins() {
    let mut sim = simulator(2, 99);
    let mut inv = Invariants::new(&sim);

    for round in 1..=2u64 {
        sim.expire_election_timer(1).unwrap();
        sim.expire_election_timer(2).unwrap();
        sim.step(1);
        inv.check(&sim);

        let snap = sim.snapshot();
        assert_eq!(snap.count(NodeRole::Candidate), 2, "round {round}");
        assert!(snap.leaders().is_empty(), "round {round}");
        assert_eq!(snap.term_of(1), Some(round));
        assert_eq!(snap.term_of(2), Some(round));
    }

    assert!(
        run_until(&mut sim, &mut inv, 1, 5_000, |s| s.snapshot().is_settled()),
        "split vote never resolved"
    );
    let snap = sim.snapshot();
    assert_eq!(snap.leaders().len(), 1);
    assert!(snap.term_of(snap.leader_id.unwrap()).unwrap() >= 3);
}

#[test]
fn four_node_split_vote_is_retried_in_a_later_term() {
    // Jitter lets each candidate reach a different voter first.
    let network = ChannelConfig::default().with_delay(0, 20);
    let split = (0..200u64).find_map(|seed| {
        let config = SimulationConfig::new(4)
            .with_seed(seed)
            .with_network(network.clone());
        let mut sim = ClusterSimulator::new(config).expect("valid config");
        sim.expire_election_timer(1).unwrap();
        sim.expire_election_timer(2).unwrap();
        sim.run_for(30, 1);

        let snap = sim.snapshot();
        let votes = (snap.node(3)?.voted_for, snap.node(4)?.voted_for);
        let divided = matches!(votes, (Some(a), Some(b)) if a != b);
        (divided && snap.leaders().is_empty()).then_some(sim)
    });
    let mut sim = split.expect("some seed divides the voters");

    let snap = sim.snapshot();
    assert_eq!(snap.count(NodeRole::Candidate), 2);
    assert_eq!(snap.term_of(1), Some(1));
    assert_eq!(snap.term_of(2), Some(1));

    let mut inv = Invariants::new(&sim);
    assert!(
        run_until(&mut sim, &mut inv, 1, 5_000, |s| s.snapshot().is_settled()),
        "split vote never resolved"
    );
    let snap = sim.snapshot();
    assert_eq!(snap.leaders().len(), 1);
    assert!(snap.term_of(snap.leader_id.unwrap()).unwrap() >= 2);
    assert!(sim.leaders_by_term().get(&1).is_none());
}

#[test]
fn manual_promotion_replaces_leader_without_touching_terms() {
    let mut sim = simulator(5, 3);
    sim.expire_election_timer(1).unwrap();
    sim.step(1);
    assert_eq!(sim.snapshot().leader_id, Some(1));

    let mut watch = sim.subscribe();
    sim.force_promote(3).unwrap();

    let snap = sim.snapshot();
    assert_eq!(snap.leader_id, Some(3));
    assert_eq!(snap.leaders(), vec![3]);
    assert_eq!(snap.role_of(1), Some(NodeRole::Follower));
    assert!(snap.nodes.values().all(|v| v.term == 1));

    let events = watch.drain();
    let role_changes: Vec<_> = events
        .iter()
        .filter(|e| matches!(e.kind, EventKind::RoleChanged { .. }))
        .collect();
    assert_eq!(role_changes.len(), 2);
    assert!(role_changes.iter().all(|e| e.is_manual()));
    assert!(role_changes.iter().any(|e| e.node_id == 3
        && e.kind
            == EventKind::RoleChanged {
                from: NodeRole::Follower,
                to: NodeRole::Leader
            }));
    assert!(role_changes.iter().any(|e| e.node_id == 1
        && e.kind
            == EventKind::RoleChanged {
                from: NodeRole::Leader,
                to: NodeRole::Follower
            }));

    // Only protocol elections are recorded.
    assert_eq!(sim.leaders_by_term().len(), 1);
    assert_eq!(sim.leaders_by_term().get(&1), Some(&1));

    sim.run_for(1_000, 5);
    let snap = sim.snapshot();
    assert_eq!(snap.leader_id, Some(3));
    assert!(snap.is_settled());
}

#[test]
fn every_cluster_size_elects_a_leader() {
    for nodes in 1..=7 {
        for seed in [1, 2, 3] {
            let mut sim = simulator(nodes, seed);
            let mut inv = Invariants::new(&sim);
            assert!(
                run_until(&mut sim, &mut inv, 5, 4_000, |s| s.snapshot().is_settled()),
                "{nodes} nodes with seed {seed} never settled"
            );
            assert_eq!(sim.snapshot().leaders().len(), 1);
        }
    }
}

#[test]
fn unreachable_minority_sits_out() {
    let mut sim = simulator(5, 11);
    let mut inv = Invariants::new(&sim);
    sim.set_reachable(4, false).unwrap();
    sim.set_reachable(5, false).unwrap();

    assert!(run_until(&mut sim, &mut inv, 5, 2_000, |s| s.snapshot().is_settled()));
    let snap = sim.snapshot();
    let leader = snap.leader_id.unwrap();
    assert!(leader <= 3);
    assert_eq!(snap.term_of(4), Some(0));
    assert_eq!(snap.term_of(5), Some(0));
}

// Quorum counts reachable nodes only, so a reachable minority can elect its
// own leader for a term whose leader is frozen while unreachable.
#[test]
fn reachable_minority_can_reuse_a_frozen_term() {
    let mut sim = simulator(5, 23);
    sim.set_reachable(4, false).unwrap();
    sim.set_reachable(5, false).unwrap();
    sim.expire_election_timer(1).unwrap();
    sim.step(1);
    assert_eq!(sim.snapshot().leader_id, Some(1));

    for id in 1..=3 {
        sim.set_reachable(id, false).unwrap();
    }
    sim.set_reachable(4, true).unwrap();
    sim.set_reachable(5, true).unwrap();
    assert_eq!(sim.quorum(), 2);
    sim.expire_election_timer(4).unwrap();
    sim.step(1);

    let snap = sim.snapshot();
    assert_eq!(snap.leaders(), vec![1, 4]);
    assert_eq!(snap.term_of(1), Some(1));
    assert_eq!(snap.term_of(4), Some(1));
    assert_eq!(snap.leader_id, Some(4));
    // The history keeps the first leader recorded for the term.
    assert_eq!(sim.leaders_by_term().get(&1), Some(&1));

    // Once everyone is back, equal-term heartbeats leave a single leader.
    for id in 1..=3 {
        sim.set_reachable(id, true).unwrap();
    }
    let mut settled = false;
    for _ in 0..5_000 {
        sim.step(1);
        if sim.snapshot().is_settled() {
            settled = true;
            break;
        }
    }
    assert!(settled, "cluster never reconverged");
    assert_eq!(sim.snapshot().leaders().len(), 1);
}

#[test]
fn lossy_network_still_elects_safely() {
    let network = ChannelConfig::default()
        .with_drop_probability(0.1)
        .with_delay(1, 10);
    let config = SimulationConfig::new(5).with_seed(17).with_network(network);
    let mut sim = ClusterSimulator::new(config).expect("valid config");
    let mut inv = Invariants::new(&sim);

    run_until(&mut sim, &mut inv, 5, 1_000, |_| false);

    assert!(!sim.leaders_by_term().is_empty(), "no election succeeded");
    let stats = sim.channel_stats();
    assert!(stats.dropped > 0);
    assert!(stats.delivered > 0);
}

#[test]
fn node_count_is_fixed_at_construction() {
    let config = SimulationConfig {
        node_count: 3,
        ..SimulationConfig::default()
    };
    let sim = ClusterSimulator::new(config).expect("valid config");
    assert_eq!(sim.node_count(), 3);
    assert_eq!(sim.config().node_count, 3);
}
