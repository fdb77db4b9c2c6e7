//! Simulation core.
//!
//! This module wires the engine together:
//! - `scheduler`/`event`: the virtual-time discrete-event core
//! - `geometry`/`signal`/`channel`: space, propagation and medium state
//! - `packet`/`mac`/`routing`/`phy`: the protocol stack
//! - `energy`/`mobility`: the physical node models
//! - `drone`: the node composing all of the above
//! - `metrics`: outcome accounting
//!
//! `Simulator` owns every component and dispatches events to node handlers.
//! Handlers communicate cross-node effects (frames entering the air) through
//! an action list the simulator routes after each event, which keeps node
//! code borrow-friendly and the fan-out logic in one place.
//!
//! The public surface doubles as the external contract: headless batch runs
//! (`run_to_end`), incremental stepping plus `snapshot()` for a read-only
//! visualizer on the caller's thread, and scenario hooks (formation change,
//! packet injection, route pre-install) for experiments and tests.

pub mod channel;
pub mod drone;
pub mod energy;
pub mod event;
pub mod geometry;
pub mod mac;
pub mod metrics;
pub mod mobility;
pub mod packet;
pub mod phy;
pub mod routing;
pub mod scheduler;
pub mod signal;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SimulationConfig;

use channel::Channel;
use drone::Drone;
use event::{Event, ScenarioAction};
use geometry::Point3;
use metrics::Metrics;
use mobility::{formation_offset, LeaderFollower, Mobility};
use packet::{NodeId, Packet, PacketIdAllocator};
use scheduler::Scheduler;

/// Interval of the metrics time series (us).
pub const METRICS_SAMPLE_INTERVAL: u64 = 1_000_000;

/// Cross-node effect emitted by a node handler, routed by the simulator
/// after the handler returns.
#[derive(Debug)]
pub enum Action {
    /// A frame starts radiating from `sender` at the current instant.
    Transmit { sender: NodeId, packet: Packet, mac_owned: bool },
}

/// Mutable engine context handed to node handlers. Everything a node needs
/// apart from its own state: the clock and event queue, the shared medium,
/// metrics, packet identity, and the outbound action list.
pub struct Ctx<'a> {
    pub cfg: &'a SimulationConfig,
    pub sched: &'a mut Scheduler,
    pub channel: &'a mut Channel,
    pub metrics: &'a mut Metrics,
    pub packet_ids: &'a mut PacketIdAllocator,
    pub actions: &'a mut Vec<Action>,
}

impl Ctx<'_> {
    pub fn now(&self) -> u64 {
        self.sched.now()
    }
}

/// Read-only view of one node for the visualizer contract.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub position: Point3,
    pub speed: f64,
    pub residual_energy: f64,
    pub comm_energy_consumed: f64,
    pub asleep: bool,
    pub neighbors: Vec<NodeId>,
    pub queue_len: usize,
    pub route_count: usize,
    /// Formation target while under leader-follower mobility.
    pub formation_target: Option<Point3>,
}

/// Read-only view of the whole world at one instant.
#[derive(Debug, Clone)]
pub struct WorldSnapshot {
    pub now: u64,
    pub nodes: Vec<NodeSnapshot>,
    pub metrics: Metrics,
}

pub struct Simulator {
    cfg: SimulationConfig,
    sched: Scheduler,
    channel: Channel,
    metrics: Metrics,
    packet_ids: PacketIdAllocator,
    drones: Vec<Drone>,
    /// Geometric delivery range implied by the SNR threshold.
    max_range: f64,
    /// Actions emitted by handlers, awaiting routing.
    pending_actions: Vec<Action>,
}

impl Simulator {
    /// Build a simulator from a validated configuration: place the swarm
    /// uniformly in the volume and schedule every node's initial processes.
    pub fn new(cfg: SimulationConfig) -> Self {
        if let Err(msg) = cfg.validate() {
            panic!("invalid configuration: {msg}");
        }

        let data_airtime =
            signal::transmission_time_us(cfg.data_packet_length(cfg.average_payload_length), cfg.bit_rate);
        let mut rng_world = StdRng::seed_from_u64(cfg.seed);

        let mut drones = Vec::with_capacity(cfg.number_of_drones);
        for id in 0..cfg.number_of_drones {
            let position = Point3::new(
                rng_world.gen_range(0.0..=cfg.map_length),
                rng_world.gen_range(0.0..=cfg.map_width),
                rng_world.gen_range(0.0..=cfg.map_height),
            );
            drones.push(Drone::new(id, &cfg, position));
        }

        let max_range = signal::max_communication_range(&cfg);
        log::info!(
            "simulator: {} drones in {}x{}x{} m, communication range {:.0} m, seed {}",
            cfg.number_of_drones,
            cfg.map_length,
            cfg.map_width,
            cfg.map_height,
            max_range,
            cfg.seed
        );

        let mut sim = Simulator {
            channel: Channel::new(cfg.number_of_sub_channels, 2 * data_airtime),
            cfg,
            sched: Scheduler::new(),
            metrics: Metrics::new(),
            packet_ids: PacketIdAllocator::default(),
            drones,
            max_range,
            pending_actions: Vec::new(),
        };

        {
            let (mut ctx, drones) = sim.split();
            for drone in drones.iter_mut() {
                drone.start(&mut ctx);
            }
            ctx.sched.schedule_in(METRICS_SAMPLE_INTERVAL, Event::MetricsTick);
        }
        sim.route_pending_actions();
        sim
    }

    // ---------- run control ----------

    /// Dispatch every event up to `horizon`, then park the clock there.
    /// Incremental callers (visualizer, windowed experiments) invoke this in
    /// steps and inspect `snapshot()` in between.
    pub fn run_until(&mut self, horizon: u64) {
        loop {
            let Some(scheduled) = self.sched.pop_next(horizon) else {
                break;
            };
            self.dispatch(scheduled.event);
        }
        self.sched.advance_to(horizon);
    }

    /// Run to the configured horizon.
    pub fn run_to_end(&mut self) {
        let horizon = self.cfg.sim_time;
        self.run_until(horizon);
    }

    pub fn now(&self) -> u64 {
        self.sched.now()
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.cfg
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn drone(&self, id: NodeId) -> &Drone {
        &self.drones[id]
    }

    /// Data packets still held somewhere in the network (queues, discovery
    /// buffers, MAC service): together with the delivered and dropped
    /// counters this accounts for every generated packet.
    pub fn data_in_custody(&self) -> usize {
        self.drones.iter().map(|d| d.data_in_custody()).sum()
    }

    /// Mean per-node communication energy consumed so far (J).
    pub fn average_comm_energy(&self) -> f64 {
        let total: f64 = self.drones.iter().map(|d| d.energy.comm_consumed()).sum();
        total / self.drones.len() as f64
    }

    /// Mean per-node total energy consumed so far (J).
    pub fn average_energy_consumed(&self) -> f64 {
        let total: f64 = self
            .drones
            .iter()
            .map(|d| self.cfg.initial_energy - d.energy.residual())
            .sum();
        total / self.drones.len() as f64
    }

    // ---------- scenario hooks ----------

    /// Swap every follower to leader-follower formation now.
    pub fn trigger_formation_change(&mut self) {
        self.dispatch(Event::Scenario(ScenarioAction::FormationChange));
    }

    /// Schedule the formation swap for a future instant.
    pub fn schedule_formation_change(&mut self, at: u64) {
        self.sched.schedule_at(at, Event::Scenario(ScenarioAction::FormationChange));
    }

    /// Inject one data packet at `src` bound for `dst`, now.
    pub fn inject_data_packet(&mut self, src: NodeId, dst: NodeId) {
        self.dispatch(Event::Scenario(ScenarioAction::InjectData { src, dst }));
    }

    /// Pre-install a routing entry on a node (scenario/test setup).
    pub fn install_route(&mut self, node: NodeId, dest: NodeId, next_hop: NodeId, hop_count: u32, seq: u64, expiry: u64) {
        self.drones[node].install_route(dest, next_hop, hop_count, seq, expiry);
    }

    /// Replace one node's mobility model as of now; the displaced model
    /// stops authoring coordinates immediately.
    pub fn swap_node_mobility(&mut self, node: NodeId, mobility: Mobility) {
        {
            let (mut ctx, drones) = self.split();
            drones[node].swap_mobility(&mut ctx, mobility);
        }
        self.route_pending_actions();
    }

    /// Change one node's scalar speed (heterogeneous swarms, scenarios).
    pub fn set_node_speed(&mut self, node: NodeId, speed: f64) {
        self.drones[node].speed = speed;
    }

    /// Read-only world state for the visualizer. The engine is single
    /// threaded; poll between `run_until` steps on the same thread.
    pub fn snapshot(&self) -> WorldSnapshot {
        let now = self.now();
        WorldSnapshot {
            now,
            nodes: self
                .drones
                .iter()
                .map(|d| NodeSnapshot {
                    id: d.id,
                    position: d.coords,
                    speed: d.speed,
                    residual_energy: d.energy.residual(),
                    comm_energy_consumed: d.energy.comm_consumed(),
                    asleep: d.energy.asleep(),
                    neighbors: d.routing.neighbors(now),
                    queue_len: d.queue_len(),
                    route_count: d.routing.route_count(),
                    formation_target: d.mobility.target_position(),
                })
                .collect(),
            metrics: self.metrics.clone(),
        }
    }

    // ---------- event dispatch ----------

    /// Split-borrow helper: a `Ctx` over the shared engine state (actions
    /// land in `pending_actions`) plus the drone vector, disjoint fields of
    /// `self`.
    fn split(&mut self) -> (Ctx<'_>, &mut Vec<Drone>) {
        let Simulator {
            ref cfg,
            ref mut sched,
            ref mut channel,
            ref mut metrics,
            ref mut packet_ids,
            ref mut drones,
            ref mut pending_actions,
            ..
        } = *self;
        (
            Ctx { cfg, sched, channel, metrics, packet_ids, actions: pending_actions },
            drones,
        )
    }

    fn dispatch(&mut self, event: Event) {
        {
            let (mut ctx, drones) = self.split();
            let ctx = &mut ctx;
            match event {
                Event::GenerateTraffic { node } => drones[node].handle_generate(ctx),
                Event::HelloTimer { node } => drones[node].handle_hello_timer(ctx),
                Event::NeighborSweep { node } => drones[node].handle_neighbor_sweep(ctx),
                Event::RouteSweep { node } => drones[node].handle_route_sweep(ctx),
                Event::EnergyTick { node } => drones[node].handle_energy_tick(ctx),
                Event::MobilityTick { node, generation } => {
                    let leader_position = drones[node].mobility.leader().map(|l| drones[l].coords);
                    drones[node].handle_mobility_tick(ctx, generation, leader_position);
                }
                Event::MacDifsEnd { node, generation } => drones[node].on_mac_difs_end(ctx, generation),
                Event::MacBackoffEnd { node, generation } => {
                    drones[node].on_mac_backoff_end(ctx, generation)
                }
                Event::MacAckTimeout { node, generation } => drones[node].on_ack_timeout(ctx, generation),
                Event::MacTokenHoldEnd { node } => drones[node].on_token_hold_end(ctx),
                Event::TokenGranted { node, channel: _ } => drones[node].on_token_granted(ctx),
                Event::TransmissionEnd { sender, tx_id: _, mac_owned } => {
                    let now = ctx.now();
                    ctx.channel.cleanup(now);
                    if mac_owned {
                        drones[sender].on_mac_tx_end(ctx);
                    } else {
                        drones[sender].energy.end_tx(now, ctx.cfg);
                    }
                    // wake carrier-sense waiters whose sub-channel just cleared
                    for drone in drones.iter_mut() {
                        if drone.mac.waiting_for_idle() {
                            let position = drone.coords;
                            let busy = ctx.channel.is_busy(
                                now,
                                drone.mac.channel_id(),
                                &position,
                                ctx.cfg.sensing_range,
                            );
                            if !busy {
                                drone.mac.on_channel_idle(ctx, &position);
                            }
                        }
                    }
                }
                Event::Delivery { node, sender, packet, tx_id, tx_start, tx_end, sender_position } => {
                    drones[node].handle_delivery(ctx, sender, packet, tx_id, tx_start, tx_end, sender_position);
                }
                Event::SendAck { node, to, acked_packet_id, channel_id } => {
                    drones[node].handle_send_ack(ctx, to, acked_packet_id, channel_id);
                }
                Event::MetricsTick => {
                    let total_energy: f64 = drones.iter().map(|d| d.energy.residual()).sum();
                    let now = ctx.now();
                    ctx.metrics.take_sample(now, total_energy);
                    ctx.sched.schedule_in(METRICS_SAMPLE_INTERVAL, Event::MetricsTick);
                }
                Event::Scenario(action) => match action {
                    ScenarioAction::FormationChange => {
                        let now = ctx.now();
                        log::info!("t={now}us formation change: followers fall in behind uav 0");
                        for id in 1..drones.len() {
                            let follower =
                                Mobility::LeaderFollower(LeaderFollower::new(0, formation_offset(id)));
                            drones[id].swap_mobility(ctx, follower);
                        }
                    }
                    ScenarioAction::InjectData { src, dst } => drones[src].inject_data(ctx, dst),
                },
            }
        }
        self.route_pending_actions();
    }

    fn route_pending_actions(&mut self) {
        while !self.pending_actions.is_empty() {
            let batch: Vec<Action> = self.pending_actions.drain(..).collect();
            for action in batch {
                match action {
                    Action::Transmit { sender, packet, mac_owned } => {
                        let Simulator {
                            ref cfg,
                            ref mut sched,
                            ref mut channel,
                            ref mut metrics,
                            ref mut drones,
                            max_range,
                            ..
                        } = *self;
                        phy::transmit(
                            cfg, sched, channel, metrics, drones, max_range, sender, packet, mac_owned,
                        );
                    }
                }
            }
        }
    }
}
