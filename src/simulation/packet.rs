//! Packet types exchanged over the simulated medium.
//!
//! A packet is a common header (identity, endpoints, lifetime and forwarding
//! metadata) plus a kind-specific body. Packets are logically immutable after
//! creation except for the forwarding metadata: next hop, TTL and the
//! per-node transmission-attempt counters. Broadcast receivers each get their
//! own clone.

use std::collections::HashMap;

/// Dense node identifier, 0..N-1.
pub type NodeId = usize;

/// Hands out globally unique, ascending packet identifiers.
#[derive(Debug, Default)]
pub struct PacketIdAllocator {
    next: u64,
}

impl PacketIdAllocator {
    pub fn allocate(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// Kind-specific packet body.
#[derive(Debug, Clone, PartialEq)]
pub enum PacketKind {
    /// Application traffic; `payload_bits` excludes headers.
    Data { payload_bits: u64 },
    /// One-hop presence beacon, never forwarded.
    Hello,
    /// Route request, flooded with duplicate suppression.
    Rreq {
        originator: NodeId,
        destination: NodeId,
        broadcast_id: u64,
        originator_seq: u64,
        destination_seq: u64,
        hop_count: u32,
    },
    /// Route reply, unicast back along the reverse path.
    Rrep {
        originator: NodeId,
        destination: NodeId,
        destination_seq: u64,
        hop_count: u32,
    },
    /// Route error listing newly unreachable destinations and their last
    /// known sequence numbers.
    Rerr { unreachable: Vec<(NodeId, u64)> },
    /// One-hop acknowledgment of the frame with the given id.
    Ack { acked_packet_id: u64 },
}

/// How the MAC puts a frame on the air.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionMode {
    /// Addressed to `next_hop`; acknowledged and retried.
    Unicast,
    /// Delivered to every node in range; fire-and-forget.
    Broadcast,
}

#[derive(Debug, Clone)]
pub struct Packet {
    /// Globally unique ascending id.
    pub id: u64,
    /// Originating node.
    pub src: NodeId,
    /// Final destination. For one-hop frames (hello, ack) this equals the
    /// next hop or is ignored by the receiver.
    pub dst: NodeId,
    /// Virtual time of creation (us).
    pub created_at: u64,
    /// Remaining hop budget; decremented once per forwarding hop.
    pub ttl: u8,
    /// Total on-air frame length (bits), headers included.
    pub length_bits: u64,
    /// Sub-channel the frame is sent on.
    pub channel_id: usize,
    pub kind: PacketKind,

    // Forwarding metadata, rewritten hop by hop.
    /// Resolved next hop for unicast transmission.
    pub next_hop: Option<NodeId>,
    /// Transmission attempts per traversed node. Kept on the packet rather
    /// than per link, so a packet re-routed after a RERR retains its count.
    pub attempts: HashMap<NodeId, u32>,
}

impl Packet {
    pub fn is_data(&self) -> bool {
        matches!(self.kind, PacketKind::Data { .. })
    }

    /// Payload bits carried for the application, zero for control frames.
    pub fn payload_bits(&self) -> u64 {
        match self.kind {
            PacketKind::Data { payload_bits } => payload_bits,
            _ => 0,
        }
    }

    /// Frames the MAC sends without expecting an ACK.
    pub fn transmission_mode(&self) -> TransmissionMode {
        match self.kind {
            PacketKind::Hello | PacketKind::Rreq { .. } | PacketKind::Rerr { .. } => {
                TransmissionMode::Broadcast
            }
            PacketKind::Data { .. } | PacketKind::Rrep { .. } | PacketKind::Ack { .. } => {
                TransmissionMode::Unicast
            }
        }
    }

    pub fn attempts_at(&self, node: NodeId) -> u32 {
        self.attempts.get(&node).copied().unwrap_or(0)
    }

    pub fn record_attempt(&mut self, node: NodeId) -> u32 {
        let count = self.attempts.entry(node).or_insert(0);
        *count += 1;
        *count
    }

    /// Short human-readable tag for log lines.
    pub fn describe(&self) -> &'static str {
        match self.kind {
            PacketKind::Data { .. } => "data",
            PacketKind::Hello => "hello",
            PacketKind::Rreq { .. } => "rreq",
            PacketKind::Rrep { .. } => "rrep",
            PacketKind::Rerr { .. } => "rerr",
            PacketKind::Ack { .. } => "ack",
        }
    }
}
