use std::collections::{BTreeMap, HashMap};

use log::debug;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::raft::{NodeId, RaftMessage};

/// Failure injection for the in-process channel. Delays are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Probability of dropping a message (0.0 - 1.0)
    pub drop_probability: f64,
    pub delay_min: u64,
    pub delay_max: u64,
}

impl ChannelConfig {
    pub fn with_drop_probability(mut self, p: f64) -> Self {
        self.drop_probability = p;
        self
    }

    /// Fixed delay when `min == max`, uniform jitter otherwise.
    pub fn with_delay(mut self, min: u64, max: u64) -> Self {
        self.delay_min = min;
        self.delay_max = max;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.drop_probability) {
            return Err(ConfigError::Invalid(format!(
                "drop_probability ({}) must be within [0, 1]",
                self.drop_probability
            )));
        }
        if self.delay_min > self.delay_max {
            return Err(ConfigError::Invalid(format!(
                "delay_min ({}) exceeds delay_max ({})",
                self.delay_min, self.delay_max
            )));
        }
        Ok(())
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            drop_probability: 0.0,
            delay_min: 0,
            delay_max: 0,
        }
    }
}

/// A message in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub seq: u64,
    pub from: NodeId,
    pub to: NodeId,
    pub sent_at: u64,
    pub deliver_at: u64,
    pub message: RaftMessage,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub sent: u64,
    pub dropped: u64,
    pub delivered: u64,
}

/// In-process delivery queue shared by all agents.
///
/// Messages come out ordered by delivery time, then by emission order.
/// Delivery between one ordered pair of nodes is FIFO even under jitter:
/// a message is never scheduled ahead of an earlier one on the same pair.
pub struct MessageChannel {
    config: ChannelConfig,
    rng: StdRng,
    queue: BTreeMap<(u64, u64), Envelope>,
    last_delivery: HashMap<(NodeId, NodeId), u64>,
    next_seq: u64,
    stats: ChannelStats,
}

impl MessageChannel {
    pub fn new(config: ChannelConfig, rng: StdRng) -> Self {
        Self {
            config,
            rng,
            queue: BTreeMap::new(),
            last_delivery: HashMap::new(),
            next_seq: 0,
            stats: ChannelStats::default(),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Queue `message`. Returns false when failure injection dropped it.
    pub fn send(&mut self, from: NodeId, to: NodeId, message: RaftMessage, now: u64) -> bool {
        self.stats.sent += 1;

        if self.config.drop_probability > 0.0
            && self.rng.random_bool(self.config.drop_probability)
        {
            self.stats.dropped += 1;
            debug!("Dropping message {from} -> {to}: {message:?}");
            return false;
        }

        let delay = if self.config.delay_max > 0 {
            self.rng
                .random_range(self.config.delay_min..=self.config.delay_max)
        } else {
            0
        };
        let floor = self.last_delivery.get(&(from, to)).copied().unwrap_or(0);
        let deliver_at = now.saturating_add(delay).max(floor);
        self.last_delivery.insert((from, to), deliver_at);

        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.insert(
            (deliver_at, seq),
            Envelope {
                seq,
                from,
                to,
                sent_at: now,
                deliver_at,
                message,
            },
        );
        true
    }

    /// Next message due at or before `now`.
    pub fn pop_due(&mut self, now: u64) -> Option<Envelope> {
        let (&key, _) = self.queue.iter().next()?;
        if key.0 > now {
            return None;
        }
        let envelope = self.queue.remove(&key)?;
        self.stats.delivered += 1;
        Some(envelope)
    }

    pub fn next_delivery_at(&self) -> Option<u64> {
        self.queue.keys().next().map(|&(at, _)| at)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }
}
