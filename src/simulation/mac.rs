//! Medium access control.
//!
//! CSMA/CA without RTS/CTS: sense until the channel has been idle for DIFS,
//! count down a random backoff (frozen while the channel is busy), take the
//! sub-channel token, transmit, and for unicast keep the token through the
//! SIFS + ACK window so the acknowledgment cannot be interfered with. An ACK
//! timeout doubles the contention window and retries; exhausting the retry
//! budget drops the frame and surfaces the broken link to routing.
//!
//! The state machine is event-driven: every pending timer carries the
//! generation it was scheduled under, and a generation bump (channel went
//! busy, ACK arrived, frame completed) silently cancels all of them. That is
//! the whole cancellation story - no timer handles, no polling.
//!
//! PureAloha is the degenerate variant: no sensing, no token, transmit at
//! once and fall back to random backoff only between retries.

use rand::rngs::StdRng;
use rand::Rng;

use crate::config::{MacProtocolKind, SimulationConfig};

use super::channel::Acquire;
use super::energy::EnergyModel;
use super::event::Event;
use super::geometry::Point3;
use super::packet::{NodeId, Packet, TransmissionMode};
use super::scheduler::invariant_violation;
use super::signal::transmission_time_us;
use super::{Action, Ctx};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MacPhase {
    /// Nothing in service.
    Idle,
    /// Waiting for the carrier to clear before a fresh DIFS.
    WaitIdle,
    /// Channel idle, DIFS timer running.
    Difs,
    /// Backoff countdown running.
    Backoff,
    /// Backoff done, queued on the channel token.
    WaitToken,
    /// Frame on the air.
    Transmitting,
    /// Unicast sent, waiting for the ACK (token possibly still held).
    AwaitAck,
    /// ACK arrived while the token hold window was still open.
    Draining,
}

/// What a finished transmission leaves behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEndOutcome {
    /// Frame needed no ACK; the MAC is idle again.
    Completed,
    /// Unicast frame; ACK timer armed.
    AwaitingAck,
}

/// Resolution of an ACK timeout event.
#[derive(Debug)]
pub enum AckTimeoutOutcome {
    /// Superseded wakeup; nothing happened.
    Stale,
    /// Another attempt is under way with a widened contention window.
    Retrying,
    /// Retry budget exhausted; the packet is yours, tell routing.
    Dropped(Packet),
}

/// Extra token-hold time (us) absorbing propagation of the data frame out
/// and the ACK back.
const PROPAGATION_GUARD: u64 = 10;

/// Contention window for the given 1-based attempt number:
/// `(CW_min + 1) * 2^(attempt-1) - 1`, capped at `CW_max`.
fn contention_window(cfg: &SimulationConfig, attempt: u32) -> u32 {
    let exp = attempt.saturating_sub(1).min(16);
    let cw = (cfg.cw_min as u64 + 1).saturating_mul(1 << exp).saturating_sub(1);
    cw.min(cfg.cw_max as u64) as u32
}

#[derive(Debug)]
pub struct Mac {
    node: NodeId,
    channel_id: usize,
    kind: MacProtocolKind,
    phase: MacPhase,
    current: Option<Packet>,
    /// Remaining frozen backoff (us); survives busy interruptions.
    backoff_remaining_us: u64,
    /// Absolute end of the running backoff countdown.
    backoff_end: u64,
    /// Cancellation epoch for pending timers.
    generation: u64,
    holds_token: bool,
    rng: StdRng,
}

impl Mac {
    pub fn new(node: NodeId, channel_id: usize, kind: MacProtocolKind, rng: StdRng) -> Self {
        Mac {
            node,
            channel_id,
            kind,
            phase: MacPhase::Idle,
            current: None,
            backoff_remaining_us: 0,
            backoff_end: 0,
            generation: 0,
            holds_token: false,
            rng,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.phase == MacPhase::Idle && self.current.is_none()
    }

    pub fn channel_id(&self) -> usize {
        self.channel_id
    }

    /// True while this MAC is parked waiting for the carrier to clear.
    pub fn waiting_for_idle(&self) -> bool {
        self.phase == MacPhase::WaitIdle
    }

    /// Id of the unicast frame an ACK would currently satisfy.
    pub fn awaiting_ack_for(&self) -> Option<u64> {
        match self.phase {
            MacPhase::AwaitAck => self.current.as_ref().map(|p| p.id),
            _ => None,
        }
    }

    /// Accept a frame for service. The caller guarantees the MAC is idle;
    /// handing over a second frame is an engine bug.
    pub fn start_packet(
        &mut self,
        ctx: &mut Ctx,
        energy: &mut EnergyModel,
        position: &Point3,
        mut packet: Packet,
    ) {
        if !self.is_idle() {
            invariant_violation(
                ctx.now(),
                Some(self.node),
                "mac-single-frame",
                &format!("packet {} handed to a busy MAC", packet.id),
            );
        }
        if packet.transmission_mode() == TransmissionMode::Unicast
            && packet.next_hop.is_none()
            && !matches!(packet.kind, super::packet::PacketKind::Ack { .. })
        {
            invariant_violation(
                ctx.now(),
                Some(self.node),
                "unicast-next-hop",
                &format!("unicast packet {} has no next hop", packet.id),
            );
        }
        // every frame this MAC services goes out on its own sub-channel,
        // matching the token it will hold
        packet.channel_id = self.channel_id;
        self.current = Some(packet);
        self.begin_attempt(ctx, energy, position);
    }

    fn begin_attempt(&mut self, ctx: &mut Ctx, energy: &mut EnergyModel, position: &Point3) {
        let now = ctx.now();
        let attempt = {
            let packet = self.current.as_mut().expect("attempt without frame");
            let attempt = packet.record_attempt(self.node);
            if attempt == 1 {
                packet.ttl = packet.ttl.saturating_sub(1);
            }
            attempt
        };
        if attempt > 1 {
            ctx.metrics.mac_retransmissions += 1;
            log::debug!(
                "t={now}us uav {} retransmission attempt {attempt} for packet {}",
                self.node,
                self.current.as_ref().unwrap().id
            );
        }

        let cw = contention_window(ctx.cfg, attempt);
        let slots = self.rng.gen_range(0..=cw) as u64;
        self.backoff_remaining_us = slots * ctx.cfg.slot_duration;

        match self.kind {
            MacProtocolKind::CsmaCa => self.begin_carrier_sense(ctx, position),
            MacProtocolKind::PureAloha => {
                if attempt == 1 {
                    // pure ALOHA transmits the moment the frame arrives
                    self.start_transmission(ctx, energy);
                } else {
                    self.generation += 1;
                    self.phase = MacPhase::Backoff;
                    self.backoff_end = now + self.backoff_remaining_us;
                    ctx.sched.schedule_at(
                        self.backoff_end,
                        Event::MacBackoffEnd { node: self.node, generation: self.generation },
                    );
                }
            }
        }
    }

    fn begin_carrier_sense(&mut self, ctx: &mut Ctx, position: &Point3) {
        let now = ctx.now();
        if ctx.channel.is_busy(now, self.channel_id, position, ctx.cfg.sensing_range) {
            self.phase = MacPhase::WaitIdle;
        } else {
            self.generation += 1;
            self.phase = MacPhase::Difs;
            ctx.sched.schedule_in(
                ctx.cfg.difs_duration,
                Event::MacDifsEnd { node: self.node, generation: self.generation },
            );
        }
    }

    /// Carrier went busy: abandon DIFS, or freeze the backoff countdown.
    pub fn on_channel_busy(&mut self, now: u64) {
        if self.kind == MacProtocolKind::PureAloha {
            return;
        }
        match self.phase {
            MacPhase::Difs => {
                self.generation += 1;
                self.phase = MacPhase::WaitIdle;
            }
            MacPhase::Backoff => {
                self.backoff_remaining_us = self.backoff_end.saturating_sub(now);
                self.generation += 1;
                self.phase = MacPhase::WaitIdle;
            }
            _ => {}
        }
    }

    /// Carrier cleared (verified by the caller): restart the DIFS wait.
    pub fn on_channel_idle(&mut self, ctx: &mut Ctx, position: &Point3) {
        if self.phase == MacPhase::WaitIdle {
            self.begin_carrier_sense(ctx, position);
        }
    }

    pub fn on_difs_end(&mut self, ctx: &mut Ctx, energy: &mut EnergyModel, generation: u64) {
        if generation != self.generation || self.phase != MacPhase::Difs {
            return;
        }
        if self.backoff_remaining_us == 0 {
            self.request_token(ctx, energy);
        } else {
            self.phase = MacPhase::Backoff;
            self.backoff_end = ctx.now() + self.backoff_remaining_us;
            ctx.sched.schedule_at(
                self.backoff_end,
                Event::MacBackoffEnd { node: self.node, generation: self.generation },
            );
        }
    }

    pub fn on_backoff_end(&mut self, ctx: &mut Ctx, energy: &mut EnergyModel, generation: u64) {
        if generation != self.generation || self.phase != MacPhase::Backoff {
            return;
        }
        self.backoff_remaining_us = 0;
        match self.kind {
            MacProtocolKind::CsmaCa => self.request_token(ctx, energy),
            MacProtocolKind::PureAloha => self.start_transmission(ctx, energy),
        }
    }

    fn request_token(&mut self, ctx: &mut Ctx, energy: &mut EnergyModel) {
        match ctx.channel.acquire(ctx.now(), self.channel_id, self.node) {
            Acquire::Granted => {
                self.holds_token = true;
                self.start_transmission(ctx, energy);
            }
            Acquire::Queued => {
                // lost the toss against a simultaneous contender
                ctx.metrics.collisions += 1;
                self.phase = MacPhase::WaitToken;
            }
        }
    }

    pub fn on_token_granted(&mut self, ctx: &mut Ctx, energy: &mut EnergyModel) {
        // the grant may reach a MAC that aborted (node fell asleep) while
        // queued; pass the token straight on so the channel is not wedged
        if self.phase != MacPhase::WaitToken {
            self.holds_token = true;
            self.release_token(ctx);
            return;
        }
        self.holds_token = true;
        self.start_transmission(ctx, energy);
    }

    fn start_transmission(&mut self, ctx: &mut Ctx, energy: &mut EnergyModel) {
        let packet = self.current.as_ref().expect("transmission without frame").clone();
        energy.start_tx(ctx.now(), ctx.cfg);
        self.phase = MacPhase::Transmitting;
        log::debug!(
            "t={}us uav {} transmits {} packet {} ({} bits)",
            ctx.now(),
            self.node,
            packet.describe(),
            packet.id,
            packet.length_bits
        );
        ctx.actions.push(Action::Transmit { sender: self.node, packet, mac_owned: true });
    }

    /// The frame left the air. Broadcast completes; unicast arms the ACK
    /// timeout and, under CSMA, keeps the token through SIFS + ACK airtime.
    pub fn on_tx_end(&mut self, ctx: &mut Ctx, energy: &mut EnergyModel) -> TxEndOutcome {
        let now = ctx.now();
        energy.end_tx(now, ctx.cfg);

        if self.phase != MacPhase::Transmitting {
            // aborted mid-frame (sleep); no ACK machinery for the corpse
            return TxEndOutcome::Completed;
        }
        let mode = self
            .current
            .as_ref()
            .map(|p| p.transmission_mode())
            .expect("tx end without frame");

        match mode {
            TransmissionMode::Broadcast => {
                self.release_token(ctx);
                self.current = None;
                self.generation += 1;
                self.phase = MacPhase::Idle;
                TxEndOutcome::Completed
            }
            TransmissionMode::Unicast => {
                let ack_airtime = transmission_time_us(ctx.cfg.ack_packet_length, ctx.cfg.bit_rate);
                // guard covers two propagation legs so the returning ACK is
                // fully off the air before the token changes hands
                let hold_until = now + ctx.cfg.sifs_duration + ack_airtime + PROPAGATION_GUARD;
                self.generation += 1;
                ctx.sched.schedule_at(
                    hold_until + ctx.cfg.ack_timeout_extra,
                    Event::MacAckTimeout { node: self.node, generation: self.generation },
                );
                if self.holds_token {
                    ctx.sched.schedule_at(hold_until, Event::MacTokenHoldEnd { node: self.node });
                }
                self.phase = MacPhase::AwaitAck;
                TxEndOutcome::AwaitingAck
            }
        }
    }

    /// End of the post-frame token hold. Returns true when the MAC became
    /// idle (the ACK had already arrived) and the queue should be serviced.
    pub fn on_token_hold_end(&mut self, ctx: &mut Ctx) -> bool {
        self.release_token(ctx);
        if self.phase == MacPhase::Draining {
            self.phase = MacPhase::Idle;
            return true;
        }
        false
    }

    /// An ACK for `acked_id` arrived. Returns true when the MAC became idle.
    pub fn on_ack(&mut self, ctx: &mut Ctx, acked_id: u64) -> bool {
        let matches = self.phase == MacPhase::AwaitAck
            && self.current.as_ref().map(|p| p.id == acked_id).unwrap_or(false);
        if !matches {
            return false;
        }
        log::debug!("t={}us uav {} got ack for packet {acked_id}", ctx.now(), self.node);
        self.generation += 1; // cancels the pending timeout
        self.current = None;
        self.backoff_remaining_us = 0;
        if self.holds_token {
            self.phase = MacPhase::Draining;
            false
        } else {
            self.phase = MacPhase::Idle;
            true
        }
    }

    /// No ACK within the window: retry with a doubled contention window, or
    /// give up and hand the corpse to routing.
    pub fn on_ack_timeout(
        &mut self,
        ctx: &mut Ctx,
        energy: &mut EnergyModel,
        position: &Point3,
        generation: u64,
    ) -> AckTimeoutOutcome {
        if generation != self.generation || self.phase != MacPhase::AwaitAck {
            return AckTimeoutOutcome::Stale;
        }
        let packet = self.current.as_ref().expect("ack timeout without frame");
        let attempts = packet.attempts_at(self.node);
        log::debug!(
            "t={}us uav {} ack timeout for packet {} (attempt {attempts})",
            ctx.now(),
            self.node,
            packet.id
        );

        if attempts < ctx.cfg.max_retransmission_attempt {
            self.begin_attempt(ctx, energy, position);
            AckTimeoutOutcome::Retrying
        } else {
            let packet = self.current.take().expect("checked above");
            self.generation += 1;
            self.phase = MacPhase::Idle;
            if packet.is_data() {
                ctx.metrics.drops_retry += 1;
            }
            log::debug!(
                "t={}us uav {} drops packet {} after {attempts} attempts",
                ctx.now(),
                self.node,
                packet.id
            );
            AckTimeoutOutcome::Dropped(packet)
        }
    }

    /// Tear the MAC down when its node falls asleep mid-operation: cancel
    /// every pending timer and let go of the token so the channel cannot be
    /// wedged by a dead node. Any frame in service stays parked here.
    pub fn abort(&mut self, ctx: &mut Ctx) {
        self.release_token(ctx);
        self.generation += 1;
        self.phase = MacPhase::Idle;
    }

    /// True when the frame parked in the MAC is a data packet.
    pub fn current_is_data(&self) -> bool {
        self.current.as_ref().map(|p| p.is_data()).unwrap_or(false)
    }

    fn release_token(&mut self, ctx: &mut Ctx) {
        if !self.holds_token {
            return;
        }
        self.holds_token = false;
        if let Some(next) = ctx.channel.release(ctx.now(), self.channel_id, self.node) {
            ctx.sched
                .schedule_in(0, Event::TokenGranted { node: next, channel: self.channel_id });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contention_window_doubles_and_caps() {
        let cfg = SimulationConfig::default();
        assert_eq!(contention_window(&cfg, 1), 31);
        assert_eq!(contention_window(&cfg, 2), 63);
        assert_eq!(contention_window(&cfg, 3), 127);
        assert_eq!(contention_window(&cfg, 6), 1023);
        assert_eq!(contention_window(&cfg, 12), 1023);
    }
}
