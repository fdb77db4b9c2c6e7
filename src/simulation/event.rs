//! Event types driving the simulation timeline.
//!
//! Every wakeup a node process can be waiting for is an `Event` variant.
//! Timer-like events carry the generation of the state machine that scheduled
//! them; a mismatch at dispatch means the waiter was already resumed through
//! another branch and the wakeup is discarded. This is how select-style
//! cancellation works without keeping handles to pending events.

use std::cmp::Ordering;

use super::geometry::Point3;
use super::packet::{NodeId, Packet};

#[derive(Debug, Clone)]
pub enum Event {
    /// Traffic generator wakeup: emit one data packet, reschedule.
    GenerateTraffic { node: NodeId },
    /// Periodic hello beacon.
    HelloTimer { node: NodeId },
    /// Periodic neighbor-table eviction sweep.
    NeighborSweep { node: NodeId },
    /// Periodic routing-table / RREQ-cache / packet-buffer purge.
    RouteSweep { node: NodeId },
    /// 100 ms energy accounting step.
    EnergyTick { node: NodeId },
    /// Mobility step; stale generations belong to a swapped-out model.
    MobilityTick { node: NodeId, generation: u64 },

    /// MAC: DIFS idle period elapsed.
    MacDifsEnd { node: NodeId, generation: u64 },
    /// MAC: backoff countdown reached zero.
    MacBackoffEnd { node: NodeId, generation: u64 },
    /// MAC: no ACK arrived within the timeout window.
    MacAckTimeout { node: NodeId, generation: u64 },
    /// MAC: end of the held-token SIFS + ACK window after a unicast frame.
    MacTokenHoldEnd { node: NodeId },
    /// A released channel token has been handed to this queued node.
    TokenGranted { node: NodeId, channel: usize },

    /// A frame stopped radiating; carrier may have gone idle.
    TransmissionEnd { sender: NodeId, tx_id: u64, mac_owned: bool },
    /// A frame finished arriving at `node` and can be decoded.
    Delivery {
        node: NodeId,
        sender: NodeId,
        packet: Packet,
        tx_id: u64,
        tx_start: u64,
        tx_end: u64,
        sender_position: Point3,
    },
    /// SIFS-deferred acknowledgment emission, on the acked frame's
    /// sub-channel (whose token the acked sender still holds).
    SendAck { node: NodeId, to: NodeId, acked_packet_id: u64, channel_id: usize },

    /// 1 s metrics time-series snapshot.
    MetricsTick,
    /// Externally scripted action.
    Scenario(ScenarioAction),
}

/// Actions a scenario or the experiment driver can schedule mid-run.
#[derive(Debug, Clone)]
pub enum ScenarioAction {
    /// Swap followers to the leader-follower formation behind node 0.
    FormationChange,
    /// Inject a single data packet at `src` bound for `dst`.
    InjectData { src: NodeId, dst: NodeId },
}

/// An event bound to a point on the virtual timeline. `seq` breaks ties so
/// that same-instant events dispatch in scheduling (FIFO) order.
#[derive(Debug, Clone)]
pub struct Scheduled {
    pub time: u64,
    pub seq: u64,
    pub event: Event,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    /// Reversed so that `BinaryHeap` (a max-heap) pops the earliest event.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    fn at(time: u64, seq: u64) -> Scheduled {
        Scheduled { time, seq, event: Event::MetricsTick }
    }

    #[test]
    fn heap_pops_earliest_first_then_fifo() {
        let mut heap = BinaryHeap::new();
        heap.push(at(50, 2));
        heap.push(at(10, 3));
        heap.push(at(10, 1));
        heap.push(at(20, 0));

        let order: Vec<(u64, u64)> = std::iter::from_fn(|| heap.pop())
            .map(|s| (s.time, s.seq))
            .collect();
        assert_eq!(order, vec![(10, 1), (10, 3), (20, 0), (50, 2)]);
    }
}
