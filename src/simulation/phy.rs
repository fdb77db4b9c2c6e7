//! Physical layer: putting frames on the air and fanning out deliveries.
//!
//! A transmission is registered with the channel (for carrier sense and
//! interference), announced to every in-range MAC so running backoffs freeze,
//! and turned into one delivery event per receiver at
//! `now + airtime + propagation`. Receivers are the nodes inside the maximum
//! communication range - the geometric approximation of "could decode a clean
//! frame". Bernoulli channel loss is sampled here, per attempted delivery,
//! from the sender's PHY sub-stream; SINR is evaluated receiver-side at
//! decode time. Delivery failure is silent at this layer - reliability is the
//! MAC's ACK loop.

use crate::config::SimulationConfig;

use super::channel::Channel;
use super::drone::Drone;
use super::event::Event;
use super::geometry::distance;
use super::metrics::Metrics;
use super::packet::{NodeId, Packet, TransmissionMode};
use super::scheduler::Scheduler;
use super::signal::{propagation_delay_us, transmission_time_us};

/// Radiate `packet` from `sender` starting now.
///
/// `mac_owned` distinguishes frames under MAC service (token discipline, ACK
/// machinery) from direct emissions (acknowledgments); both occupy the air
/// identically.
#[allow(clippy::too_many_arguments)]
pub fn transmit(
    cfg: &SimulationConfig,
    sched: &mut Scheduler,
    channel: &mut Channel,
    metrics: &mut Metrics,
    drones: &mut [Drone],
    max_range: f64,
    sender: NodeId,
    packet: Packet,
    mac_owned: bool,
) {
    let now = sched.now();
    let airtime = transmission_time_us(packet.length_bits, cfg.bit_rate);
    let tx_start = now;
    let tx_end = now + airtime;
    let sender_position = drones[sender].coords;

    let tx_id = channel.begin_transmission(sender, packet.channel_id, tx_start, tx_end, sender_position);
    sched.schedule_at(tx_end, Event::TransmissionEnd { sender, tx_id, mac_owned });

    if !packet.is_data() {
        metrics.control_sent += 1;
    }

    // Freeze in-range contenders on the same sub-channel.
    for drone in drones.iter_mut() {
        if drone.id == sender || drone.mac.channel_id() != packet.channel_id {
            continue;
        }
        if distance(&drone.coords, &sender_position) <= cfg.sensing_range {
            drone.mac.on_channel_busy(now);
        }
    }

    // Receiver set: the addressed next hop, or everyone in range.
    let targets: Vec<(NodeId, f64)> = match packet.transmission_mode() {
        TransmissionMode::Unicast => {
            let Some(next_hop) = packet.next_hop else {
                return;
            };
            let d = distance(&drones[next_hop].coords, &sender_position);
            if d <= max_range {
                vec![(next_hop, d)]
            } else {
                Vec::new()
            }
        }
        TransmissionMode::Broadcast => drones
            .iter()
            .filter(|drone| drone.id != sender)
            .map(|drone| (drone.id, distance(&drone.coords, &sender_position)))
            .filter(|&(_, d)| d <= max_range)
            .collect(),
    };

    // Per-delivery Bernoulli loss, drawn from the sender's stream in target
    // order so the draw sequence is reproducible.
    let losses: Vec<bool> = {
        use rand::Rng;
        let sender_drone = &mut drones[sender];
        targets
            .iter()
            .map(|_| {
                cfg.data_loss_probability > 0.0
                    && sender_drone.rng_phy.gen_bool(cfg.data_loss_probability)
            })
            .collect()
    };

    for (&(target, dist), &lost) in targets.iter().zip(losses.iter()) {
        if lost {
            metrics.channel_loss_events += 1;
            log::debug!(
                "t={now}us packet {} from uav {sender} to uav {target} lost on the channel",
                packet.id
            );
            continue;
        }
        drones[target].energy.note_rx(now, tx_end, cfg);
        sched.schedule_at(
            tx_end + propagation_delay_us(dist),
            Event::Delivery {
                node: target,
                sender,
                packet: packet.clone(),
                tx_id,
                tx_start,
                tx_end,
                sender_position,
            },
        );
    }
}
