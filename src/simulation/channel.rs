//! Shared wireless medium state.
//!
//! Two concerns live here:
//! - One exclusive-access token per sub-channel. At most one MAC holds a
//!   token at any virtual-time instant; contenders queue FIFO and are handed
//!   the token on release.
//! - The registry of in-flight transmissions, used for carrier sense (is
//!   anything radiating near me on my sub-channel?) and for interference
//!   lookup at decode time. Finished transmissions are retained for a grace
//!   period because a decode at frame end still needs every overlapping frame.

use super::geometry::{distance, distance2, Point3};
use super::packet::NodeId;
use super::scheduler::invariant_violation;
use std::collections::VecDeque;

/// A frame occupying the air on one sub-channel.
#[derive(Debug, Clone)]
pub struct Transmission {
    pub id: u64,
    pub sender: NodeId,
    pub channel_id: usize,
    pub start: u64,
    pub end: u64,
    /// Sender position captured at transmit start; node movement within a
    /// frame airtime is sub-metre and not worth re-resolving.
    pub position: Point3,
}

#[derive(Debug, Default)]
struct TokenState {
    holder: Option<NodeId>,
    waiters: VecDeque<NodeId>,
}

/// Outcome of a token acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Granted,
    /// Token is held; the caller has been queued and will receive a
    /// `TokenGranted` wakeup once the holder releases.
    Queued,
}

#[derive(Debug)]
pub struct Channel {
    tokens: Vec<TokenState>,
    active: Vec<Transmission>,
    next_tx_id: u64,
    /// How long finished transmissions stay queryable for interference.
    grace_us: u64,
}

impl Channel {
    pub fn new(sub_channels: usize, grace_us: u64) -> Self {
        Channel {
            tokens: (0..sub_channels).map(|_| TokenState::default()).collect(),
            active: Vec::new(),
            next_tx_id: 0,
            grace_us,
        }
    }

    /// Try to take the token for `channel_id`. FIFO: a queued node is never
    /// overtaken by a later acquirer.
    pub fn acquire(&mut self, now: u64, channel_id: usize, node: NodeId) -> Acquire {
        let token = &mut self.tokens[channel_id];
        match token.holder {
            None => {
                token.holder = Some(node);
                Acquire::Granted
            }
            Some(holder) => {
                if holder == node {
                    invariant_violation(
                        now,
                        Some(node),
                        "token-exclusivity",
                        &format!("node re-acquired channel {channel_id} it already holds"),
                    );
                }
                token.waiters.push_back(node);
                Acquire::Queued
            }
        }
    }

    /// Release the token held by `node`. Returns the next waiter, who becomes
    /// the holder immediately so exclusivity never lapses; the caller is
    /// responsible for scheduling its `TokenGranted` wakeup.
    pub fn release(&mut self, now: u64, channel_id: usize, node: NodeId) -> Option<NodeId> {
        let token = &mut self.tokens[channel_id];
        if token.holder != Some(node) {
            invariant_violation(
                now,
                Some(node),
                "token-exclusivity",
                &format!("release of channel {channel_id} by a non-holder"),
            );
        }
        token.holder = token.waiters.pop_front();
        token.holder
    }

    pub fn holder(&self, channel_id: usize) -> Option<NodeId> {
        self.tokens[channel_id].holder
    }

    pub fn contended(&self, channel_id: usize) -> bool {
        !self.tokens[channel_id].waiters.is_empty()
    }

    /// Register a frame that starts radiating now.
    pub fn begin_transmission(
        &mut self,
        sender: NodeId,
        channel_id: usize,
        start: u64,
        end: u64,
        position: Point3,
    ) -> u64 {
        let id = self.next_tx_id;
        self.next_tx_id += 1;
        self.active.push(Transmission { id, sender, channel_id, start, end, position });
        id
    }

    /// Drop transmissions old enough that no pending decode can overlap them.
    pub fn cleanup(&mut self, now: u64) {
        let grace = self.grace_us;
        self.active.retain(|tx| tx.end.saturating_add(grace) >= now);
    }

    /// Carrier sense: true when a frame is radiating at `now` on this
    /// sub-channel from a sender within `sensing_range` of `position`.
    pub fn is_busy(&self, now: u64, channel_id: usize, position: &Point3, sensing_range: f64) -> bool {
        let range2 = sensing_range * sensing_range;
        self.active.iter().any(|tx| {
            tx.channel_id == channel_id
                && tx.start <= now
                && now < tx.end
                && distance2(&tx.position, position) <= range2
        })
    }

    /// Distances from `receiver` to every transmitter whose frame overlapped
    /// the window `[start, end)` on the same sub-channel, excluding the main
    /// link. These are the interferers of a decode.
    pub fn interferer_distances(
        &self,
        channel_id: usize,
        start: u64,
        end: u64,
        main_sender: NodeId,
        main_tx_id: u64,
        receiver: &Point3,
    ) -> Vec<f64> {
        self.active
            .iter()
            .filter(|tx| {
                tx.channel_id == channel_id
                    && tx.id != main_tx_id
                    && tx.sender != main_sender
                    && tx.start < end
                    && tx.end > start
            })
            .map(|tx| distance(&tx.position, receiver))
            .collect()
    }
}
