//! AODV-style reactive routing.
//!
//! Routes are discovered on demand: a data packet without a valid routing
//! entry is parked in a per-destination buffer while a RREQ floods the swarm;
//! the matching RREP installs forward routes hop by hop and drains the
//! buffer. Hello beacons maintain the one-hop neighbor table, and MAC-level
//! retry exhaustion surfaces as a RERR invalidating every route through the
//! broken next hop.
//!
//! All tables are BTreeMaps: iteration order feeds RERR contents and purge
//! sweeps, and must not vary between runs.

use std::collections::BTreeMap;

use crate::config::SimulationConfig;

use super::packet::{NodeId, Packet, PacketIdAllocator, PacketKind};

// RFC 3561 derived timing: how long a (originator, broadcast id) pair stays
// in the duplicate-suppression cache.
const NET_DIAMETER: u64 = 35;
const NODE_TRAVERSAL_TIME: u64 = 40_000; // us
const NET_TRAVERSAL_TIME: u64 = 2 * NODE_TRAVERSAL_TIME * NET_DIAMETER;
pub const PATH_DISCOVERY_TIME: u64 = 2 * NET_TRAVERSAL_TIME;

/// Interval of the periodic route/buffer purge sweep (us).
pub const ROUTE_SWEEP_INTERVAL: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq)]
pub struct RouteEntry {
    pub next_hop: NodeId,
    pub hop_count: u32,
    pub seq: u64,
    /// Absolute virtual time after which the entry must not be used.
    pub expiry: u64,
}

/// Outcome of next-hop resolution for a data packet.
#[derive(Debug)]
pub enum Resolution {
    /// Next hop resolved and stamped on the packet; ready for the MAC.
    Ready(Packet),
    /// No valid route; the packet is buffered. `rreq` carries the route
    /// request to send when this destination was not already under discovery.
    Buffered { rreq: Option<Packet> },
}

/// Outcome of RREP reception.
#[derive(Debug)]
pub enum RrepOutcome {
    /// This node originated the discovery: buffered packets, next hops set.
    Drained(Vec<Packet>),
    /// Forward the reply one hop further along the reverse path.
    Forward(Packet),
    /// Route installed, nothing to send.
    Done,
}

#[derive(Debug)]
pub struct Aodv {
    me: NodeId,
    channel_id: usize,
    /// Peer id -> neighbor entry expiry.
    neighbor_table: BTreeMap<NodeId, u64>,
    routing_table: BTreeMap<NodeId, RouteEntry>,
    /// Destination -> packets parked until a route appears.
    packet_buffer: BTreeMap<NodeId, Vec<Packet>>,
    /// (originator, broadcast id) -> suppression expiry.
    seen_rreqs: BTreeMap<(NodeId, u64), u64>,
    /// Per-originator monotonic RREQ id.
    rreq_id: u64,
    /// Own destination sequence number; strictly increasing.
    seq_num: u64,
}

impl Aodv {
    pub fn new(me: NodeId, channel_id: usize) -> Self {
        Aodv {
            me,
            channel_id,
            neighbor_table: BTreeMap::new(),
            routing_table: BTreeMap::new(),
            packet_buffer: BTreeMap::new(),
            seen_rreqs: BTreeMap::new(),
            rreq_id: 0,
            seq_num: 0,
        }
    }

    // ---------- neighbor discovery ----------

    pub fn on_hello(&mut self, now: u64, cfg: &SimulationConfig, sender: NodeId) {
        self.neighbor_table.insert(sender, now + cfg.neighbor_timeout);
    }

    /// Evict neighbors whose hello stream went quiet.
    pub fn sweep_neighbors(&mut self, now: u64) {
        self.neighbor_table.retain(|_, &mut expiry| expiry >= now);
    }

    pub fn neighbors(&self, now: u64) -> Vec<NodeId> {
        self.neighbor_table
            .iter()
            .filter(|(_, &expiry)| expiry >= now)
            .map(|(&id, _)| id)
            .collect()
    }

    // ---------- route table ----------

    pub fn valid_route(&self, now: u64, dest: NodeId) -> Option<&RouteEntry> {
        self.routing_table.get(&dest).filter(|entry| entry.expiry > now)
    }

    pub fn route_count(&self) -> usize {
        self.routing_table.len()
    }

    /// Pre-install a route; scenario/test hook.
    pub fn install_route(&mut self, dest: NodeId, next_hop: NodeId, hop_count: u32, seq: u64, expiry: u64) {
        self.routing_table.insert(dest, RouteEntry { next_hop, hop_count, seq, expiry });
    }

    /// Freshness rule: accept a strictly newer sequence number, or an equal
    /// one over fewer hops.
    fn update_route(&mut self, now: u64, cfg: &SimulationConfig, dest: NodeId, next_hop: NodeId, hop_count: u32, seq: u64) {
        let accept = match self.routing_table.get(&dest) {
            None => true,
            Some(entry) => seq > entry.seq || (seq == entry.seq && hop_count < entry.hop_count),
        };
        if accept {
            self.routing_table.insert(
                dest,
                RouteEntry { next_hop, hop_count, seq, expiry: now + cfg.active_route_timeout },
            );
        }
    }

    // ---------- data path ----------

    /// Resolve the next hop for a data packet, or park it and kick off route
    /// discovery. Discovery is started only when this destination has no
    /// buffer yet; a second packet to the same destination just joins it.
    pub fn resolve_or_buffer(
        &mut self,
        now: u64,
        cfg: &SimulationConfig,
        ids: &mut PacketIdAllocator,
        mut packet: Packet,
    ) -> Resolution {
        let dest = packet.dst;

        if let Some(entry) = self.routing_table.get_mut(&dest) {
            if entry.expiry > now {
                packet.next_hop = Some(entry.next_hop);
                entry.expiry = now + cfg.active_route_timeout;
                return Resolution::Ready(packet);
            }
        }

        let rreq = if self.packet_buffer.contains_key(&dest) {
            None
        } else {
            self.packet_buffer.insert(dest, Vec::new());
            Some(self.originate_rreq(now, cfg, ids, dest))
        };
        self.packet_buffer
            .get_mut(&dest)
            .expect("buffer created above")
            .push(packet);
        Resolution::Buffered { rreq }
    }

    fn originate_rreq(&mut self, now: u64, cfg: &SimulationConfig, ids: &mut PacketIdAllocator, dest: NodeId) -> Packet {
        self.rreq_id += 1;
        self.seq_num += 1;
        // advertise the freshest destination sequence we ever heard of,
        // stale routes included
        let dest_seq = self.routing_table.get(&dest).map(|entry| entry.seq).unwrap_or(0);

        self.seen_rreqs.insert((self.me, self.rreq_id), now + PATH_DISCOVERY_TIME);

        log::debug!("t={now}us uav {} originates rreq {} for dest {dest}", self.me, self.rreq_id);
        self.control_packet(
            now,
            cfg,
            ids,
            dest,
            PacketKind::Rreq {
                originator: self.me,
                destination: dest,
                broadcast_id: self.rreq_id,
                originator_seq: self.seq_num,
                destination_seq: dest_seq,
                hop_count: 0,
            },
        )
    }

    // ---------- control packet reception ----------

    /// Process a received RREQ; may yield a RREP (answering) or a re-broadcast
    /// copy (forwarding) for the transmit queue.
    pub fn handle_rreq(
        &mut self,
        now: u64,
        cfg: &SimulationConfig,
        ids: &mut PacketIdAllocator,
        packet: &Packet,
        sender: NodeId,
    ) -> Option<Packet> {
        let PacketKind::Rreq {
            originator,
            destination,
            broadcast_id,
            originator_seq,
            destination_seq,
            hop_count,
        } = packet.kind
        else {
            return None;
        };

        if self.seen_rreqs.contains_key(&(originator, broadcast_id)) {
            return None;
        }
        self.seen_rreqs.insert((originator, broadcast_id), now + PATH_DISCOVERY_TIME);

        // reverse route back to the originator, via this hop's sender
        self.update_route(now, cfg, originator, sender, hop_count + 1, originator_seq);

        let is_dest = destination == self.me;
        let fresh_route = self
            .valid_route(now, destination)
            .map(|entry| entry.seq >= destination_seq)
            .unwrap_or(false);

        if is_dest || fresh_route {
            let (reply_seq, reply_hops) = if is_dest {
                self.seq_num += 1;
                (self.seq_num, 0)
            } else {
                let entry = self.valid_route(now, destination).expect("checked above");
                (entry.seq, entry.hop_count)
            };
            let reverse_hop = self
                .routing_table
                .get(&originator)
                .expect("reverse route installed above")
                .next_hop;

            log::debug!(
                "t={now}us uav {} answers rreq from {originator} for {destination} via {reverse_hop}",
                self.me
            );
            let mut rrep = self.control_packet(
                now,
                cfg,
                ids,
                originator,
                PacketKind::Rrep {
                    originator,
                    destination,
                    destination_seq: reply_seq,
                    hop_count: reply_hops,
                },
            );
            rrep.next_hop = Some(reverse_hop);
            return Some(rrep);
        }

        // forward the flood while the hop budget lasts
        if packet.ttl > 0 {
            let mut forwarded = packet.clone();
            forwarded.next_hop = None;
            forwarded.kind = PacketKind::Rreq {
                originator,
                destination,
                broadcast_id,
                originator_seq,
                destination_seq,
                hop_count: hop_count + 1,
            };
            return Some(forwarded);
        }
        None
    }

    /// Process a received RREP.
    pub fn handle_rrep(&mut self, now: u64, cfg: &SimulationConfig, packet: &Packet, sender: NodeId) -> RrepOutcome {
        let PacketKind::Rrep { originator, destination, destination_seq, hop_count } = packet.kind
        else {
            return RrepOutcome::Done;
        };

        // forward route to the destination, via this hop's sender
        self.update_route(now, cfg, destination, sender, hop_count + 1, destination_seq);

        if originator == self.me {
            let Some(next_hop) = self.routing_table.get(&destination).map(|entry| entry.next_hop)
            else {
                return RrepOutcome::Done;
            };
            let mut drained = self.packet_buffer.remove(&destination).unwrap_or_default();
            for buffered in &mut drained {
                buffered.next_hop = Some(next_hop);
            }
            log::debug!(
                "t={now}us uav {} learned route to {destination}, releasing {} buffered packets",
                self.me,
                drained.len()
            );
            return RrepOutcome::Drained(drained);
        }

        match self.routing_table.get(&originator) {
            Some(reverse) if packet.ttl > 0 => {
                let mut forwarded = packet.clone();
                forwarded.next_hop = Some(reverse.next_hop);
                forwarded.kind = PacketKind::Rrep {
                    originator,
                    destination,
                    destination_seq,
                    hop_count: hop_count + 1,
                };
                RrepOutcome::Forward(forwarded)
            }
            _ => RrepOutcome::Done,
        }
    }

    /// Invalidate routes the RERR declares unreachable, when they actually go
    /// through its sender.
    pub fn handle_rerr(&mut self, now: u64, packet: &Packet, sender: NodeId) {
        let PacketKind::Rerr { ref unreachable } = packet.kind else {
            return;
        };
        for &(dest, _seq) in unreachable {
            let via_sender = self
                .routing_table
                .get(&dest)
                .map(|entry| entry.next_hop == sender)
                .unwrap_or(false);
            if via_sender {
                self.routing_table.remove(&dest);
                log::debug!("t={now}us uav {} invalidated route to {dest} after rerr", self.me);
            }
        }
    }

    /// MAC retry exhaustion on a data packet: every route through the dead
    /// next hop is invalidated and advertised in a RERR broadcast.
    pub fn link_break(
        &mut self,
        now: u64,
        cfg: &SimulationConfig,
        ids: &mut PacketIdAllocator,
        packet: &Packet,
    ) -> Option<Packet> {
        let next_hop = packet.next_hop?;

        let unreachable: Vec<(NodeId, u64)> = self
            .routing_table
            .iter()
            .filter(|(_, entry)| entry.next_hop == next_hop)
            .map(|(&dest, entry)| (dest, entry.seq))
            .collect();
        if unreachable.is_empty() {
            return None;
        }
        for (dest, _) in &unreachable {
            self.routing_table.remove(dest);
        }

        log::debug!(
            "t={now}us uav {} lost link to {next_hop}, emitting rerr for {} destinations",
            self.me,
            unreachable.len()
        );
        Some(self.control_packet(now, cfg, ids, self.me, PacketKind::Rerr { unreachable }))
    }

    // ---------- periodic maintenance ----------

    /// Purge expired routes, stale RREQ records and timed-out buffered
    /// packets. Returns the dropped packets so the caller can count them; an
    /// emptied buffer loses its key, so the next packet restarts discovery.
    pub fn sweep_routes(&mut self, now: u64, cfg: &SimulationConfig) -> Vec<Packet> {
        self.routing_table.retain(|_, entry| entry.expiry > now);
        self.seen_rreqs.retain(|_, &mut expiry| expiry > now);

        let lifetime = cfg.packet_lifetime;
        let mut expired = Vec::new();
        self.packet_buffer.retain(|_, buffered| {
            let mut kept = Vec::new();
            for packet in buffered.drain(..) {
                if packet.created_at + lifetime > now {
                    kept.push(packet);
                } else {
                    expired.push(packet);
                }
            }
            *buffered = kept;
            !buffered.is_empty()
        });
        expired
    }

    pub fn own_seq(&self) -> u64 {
        self.seq_num
    }

    /// Data packets parked awaiting route discovery.
    pub fn buffered_data_count(&self) -> usize {
        self.packet_buffer
            .values()
            .map(|buffered| buffered.iter().filter(|p| p.is_data()).count())
            .sum()
    }

    fn control_packet(
        &self,
        now: u64,
        cfg: &SimulationConfig,
        ids: &mut PacketIdAllocator,
        dst: NodeId,
        kind: PacketKind,
    ) -> Packet {
        Packet {
            id: ids.allocate(),
            src: self.me,
            dst,
            created_at: now,
            ttl: cfg.max_ttl,
            length_bits: cfg.hello_packet_length(),
            channel_id: self.channel_id,
            kind,
            next_hop: None,
            attempts: Default::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SimulationConfig {
        SimulationConfig::default()
    }

    fn data_packet(ids: &mut PacketIdAllocator, src: NodeId, dst: NodeId, now: u64) -> Packet {
        Packet {
            id: ids.allocate(),
            src,
            dst,
            created_at: now,
            ttl: 11,
            length_bits: 8656,
            channel_id: 0,
            kind: PacketKind::Data { payload_bits: 8192 },
            next_hop: None,
            attempts: Default::default(),
        }
    }

    #[test]
    fn missing_route_buffers_and_starts_discovery_once() {
        let cfg = cfg();
        let mut ids = PacketIdAllocator::default();
        let mut aodv = Aodv::new(0, 0);

        let first = data_packet(&mut ids, 0, 5, 100);
        match aodv.resolve_or_buffer(100, &cfg, &mut ids, first) {
            Resolution::Buffered { rreq: Some(rreq) } => {
                assert!(matches!(
                    rreq.kind,
                    PacketKind::Rreq { originator: 0, destination: 5, broadcast_id: 1, hop_count: 0, .. }
                ));
            }
            other => panic!("expected discovery start, got {other:?}"),
        }

        let second = data_packet(&mut ids, 0, 5, 200);
        assert!(matches!(
            aodv.resolve_or_buffer(200, &cfg, &mut ids, second),
            Resolution::Buffered { rreq: None }
        ));
    }

    #[test]
    fn valid_route_resolves_and_refreshes() {
        let cfg = cfg();
        let mut ids = PacketIdAllocator::default();
        let mut aodv = Aodv::new(0, 0);
        aodv.install_route(5, 2, 3, 7, 1_000_000);

        let packet = data_packet(&mut ids, 0, 5, 100);
        match aodv.resolve_or_buffer(100, &cfg, &mut ids, packet) {
            Resolution::Ready(ready) => assert_eq!(ready.next_hop, Some(2)),
            other => panic!("expected ready, got {other:?}"),
        }
        // usage pushed the expiry out
        assert!(aodv.valid_route(100, 5).unwrap().expiry == 100 + cfg.active_route_timeout);

        // an expired route does not resolve
        let mut stale = Aodv::new(0, 0);
        stale.install_route(5, 2, 3, 7, 50);
        let packet = data_packet(&mut ids, 0, 5, 100);
        assert!(matches!(
            stale.resolve_or_buffer(100, &cfg, &mut ids, packet),
            Resolution::Buffered { .. }
        ));
    }

    #[test]
    fn rreq_duplicate_is_suppressed() {
        let cfg = cfg();
        let mut ids = PacketIdAllocator::default();
        let mut origin = Aodv::new(0, 0);
        let packet = data_packet(&mut ids, 0, 5, 0);
        let Resolution::Buffered { rreq: Some(rreq) } =
            origin.resolve_or_buffer(0, &cfg, &mut ids, packet)
        else {
            panic!("expected rreq");
        };

        let mut relay = Aodv::new(1, 0);
        let first = relay.handle_rreq(10, &cfg, &mut ids, &rreq, 0);
        assert!(first.is_some(), "fresh rreq should forward");
        let second = relay.handle_rreq(20, &cfg, &mut ids, &rreq, 0);
        assert!(second.is_none(), "duplicate rreq must be dropped");
        // reverse route to the originator was installed
        assert_eq!(relay.valid_route(10, 0).unwrap().next_hop, 0);
    }

    #[test]
    fn destination_answers_with_fresh_rrep() {
        let cfg = cfg();
        let mut ids = PacketIdAllocator::default();
        let mut origin = Aodv::new(0, 0);
        let packet = data_packet(&mut ids, 0, 5, 0);
        let Resolution::Buffered { rreq: Some(mut rreq) } =
            origin.resolve_or_buffer(0, &cfg, &mut ids, packet)
        else {
            panic!("expected rreq");
        };
        rreq.ttl -= 1; // simulates the MAC hop decrement

        let mut dest = Aodv::new(5, 2);
        let seq_before = dest.own_seq();
        let reply = dest.handle_rreq(10, &cfg, &mut ids, &rreq, 0).expect("rrep");
        assert!(matches!(
            reply.kind,
            PacketKind::Rrep { originator: 0, destination: 5, hop_count: 0, .. }
        ));
        assert_eq!(reply.next_hop, Some(0));
        assert!(dest.own_seq() > seq_before, "destination bumps its sequence");

        // originator drains its buffer when the reply comes home
        match origin.handle_rrep(20, &cfg, &reply, 5) {
            RrepOutcome::Drained(packets) => {
                assert_eq!(packets.len(), 1);
                assert_eq!(packets[0].next_hop, Some(5));
            }
            other => panic!("expected drain, got {other:?}"),
        }
        assert_eq!(origin.valid_route(20, 5).unwrap().next_hop, 5);
    }

    #[test]
    fn freshness_rule_prefers_newer_seq_then_fewer_hops() {
        let cfg = cfg();
        let mut aodv = Aodv::new(0, 0);
        aodv.update_route(0, &cfg, 5, 1, 4, 10);
        // older sequence: rejected
        aodv.update_route(0, &cfg, 5, 2, 1, 9);
        assert_eq!(aodv.valid_route(0, 5).unwrap().next_hop, 1);
        // same sequence, fewer hops: accepted
        aodv.update_route(0, &cfg, 5, 3, 2, 10);
        assert_eq!(aodv.valid_route(0, 5).unwrap().next_hop, 3);
        // newer sequence, more hops: accepted
        aodv.update_route(0, &cfg, 5, 4, 9, 11);
        assert_eq!(aodv.valid_route(0, 5).unwrap().next_hop, 4);
    }

    #[test]
    fn link_break_invalidates_and_emits_rerr() {
        let cfg = cfg();
        let mut ids = PacketIdAllocator::default();
        let mut aodv = Aodv::new(0, 0);
        aodv.install_route(5, 2, 1, 7, u64::MAX);
        aodv.install_route(6, 2, 2, 3, u64::MAX);
        aodv.install_route(7, 3, 1, 1, u64::MAX);

        let mut lost = data_packet(&mut ids, 0, 5, 0);
        lost.next_hop = Some(2);
        let rerr = aodv.link_break(100, &cfg, &mut ids, &lost).expect("rerr");
        match &rerr.kind {
            PacketKind::Rerr { unreachable } => {
                assert_eq!(unreachable.as_slice(), &[(5, 7), (6, 3)]);
            }
            other => panic!("expected rerr, got {other:?}"),
        }
        assert!(aodv.valid_route(100, 5).is_none());
        assert!(aodv.valid_route(100, 6).is_none());
        assert!(aodv.valid_route(100, 7).is_some());

        // receiving that RERR at a node routing via 0 invalidates its entries
        let mut upstream = Aodv::new(9, 0);
        upstream.install_route(5, 0, 2, 7, u64::MAX);
        upstream.install_route(6, 4, 2, 3, u64::MAX);
        upstream.handle_rerr(110, &rerr, 0);
        assert!(upstream.valid_route(110, 5).is_none());
        assert!(upstream.valid_route(110, 6).is_some(), "route via another hop survives");
    }

    #[test]
    fn sweep_drops_expired_buffers_and_reopens_discovery() {
        let cfg = cfg();
        let mut ids = PacketIdAllocator::default();
        let mut aodv = Aodv::new(0, 0);

        let packet = data_packet(&mut ids, 0, 5, 0);
        assert!(matches!(
            aodv.resolve_or_buffer(0, &cfg, &mut ids, packet),
            Resolution::Buffered { rreq: Some(_) }
        ));

        // not yet expired
        assert!(aodv.sweep_routes(cfg.packet_lifetime - 1, &cfg).is_empty());
        // expired now; buffer key disappears
        let dropped = aodv.sweep_routes(cfg.packet_lifetime + 1, &cfg);
        assert_eq!(dropped.len(), 1);

        // a new packet to the same destination restarts discovery
        let packet = data_packet(&mut ids, 0, 5, 0);
        assert!(matches!(
            aodv.resolve_or_buffer(cfg.packet_lifetime + 2, &cfg, &mut ids, packet),
            Resolution::Buffered { rreq: Some(_) }
        ));
    }

    #[test]
    fn neighbor_entries_expire() {
        let cfg = cfg();
        let mut aodv = Aodv::new(0, 0);
        aodv.on_hello(0, &cfg, 3);
        assert_eq!(aodv.neighbors(0), vec![3]);
        assert_eq!(aodv.neighbors(cfg.neighbor_timeout), vec![3]);

        aodv.sweep_neighbors(cfg.neighbor_timeout + 1);
        assert!(aodv.neighbors(cfg.neighbor_timeout + 1).is_empty());
    }
}
