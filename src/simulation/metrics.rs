//! Network performance accounting.
//!
//! Counters and samples are updated inline by the engine and never sampled
//! from wall-clock state, so two runs with the same seed produce identical
//! `Metrics` values - the struct is `PartialEq` exactly for that check.
//!
//! Drop counters partition terminal packet fates: every generated data packet
//! ends up delivered, in exactly one drop bucket, or still in flight at the
//! horizon. Bernoulli/ SINR losses of unicast frames are not terminal (the
//! MAC retries them) and are tracked separately as channel loss events.

use std::collections::BTreeSet;

/// One row of the 1 s time series, used by the E3 experiment and the
/// visualizer contract.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSample {
    /// Virtual time of the snapshot (us).
    pub time: u64,
    pub data_generated: u64,
    pub data_delivered: u64,
    pub control_sent: u64,
    /// Sum of residual energy across the swarm (J).
    pub total_residual_energy: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metrics {
    /// Data packets created by traffic generators (and scenario injection).
    pub data_generated: u64,
    /// Data packets that reached their destination (unique ids).
    pub data_delivered: u64,
    /// Payload bits of delivered data packets.
    pub delivered_payload_bits: u64,

    /// Terminal drops by cause.
    pub drops_queue: u64,
    pub drops_ttl: u64,
    pub drops_retry: u64,
    pub drops_channel: u64,

    /// Non-terminal channel losses (Bernoulli or SINR failure of a single
    /// delivery attempt).
    pub channel_loss_events: u64,
    /// Simultaneous token contention resolved by queueing.
    pub collisions: u64,
    /// Control frames put on the air (hello, RREQ, RREP, RERR, ACK),
    /// counting every transmission attempt.
    pub control_sent: u64,
    /// Unicast retransmission attempts beyond the first.
    pub mac_retransmissions: u64,

    /// Per-delivery end-to-end latency (us), in delivery order.
    pub latencies_us: Vec<u64>,
    /// Per-delivery hop count, in delivery order.
    pub hop_counts: Vec<u32>,

    arrived_ids: BTreeSet<u64>,
    /// 1 s snapshots.
    pub samples: Vec<MetricsSample>,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics::default()
    }

    /// Record a data packet reaching its destination. Returns false for a
    /// duplicate arrival (the packet still gets acknowledged, but is only
    /// counted once).
    pub fn record_delivery(&mut self, packet_id: u64, now: u64, created_at: u64, hops: u32, payload_bits: u64) -> bool {
        if !self.arrived_ids.insert(packet_id) {
            return false;
        }
        self.data_delivered += 1;
        self.delivered_payload_bits += payload_bits;
        self.latencies_us.push(now.saturating_sub(created_at));
        self.hop_counts.push(hops);
        true
    }

    pub fn has_arrived(&self, packet_id: u64) -> bool {
        self.arrived_ids.contains(&packet_id)
    }

    pub fn total_drops(&self) -> u64 {
        self.drops_queue + self.drops_ttl + self.drops_retry + self.drops_channel
    }

    /// Packet delivery ratio in [0, 1].
    pub fn pdr(&self) -> f64 {
        if self.data_generated == 0 {
            return 0.0;
        }
        self.data_delivered as f64 / self.data_generated as f64
    }

    /// Mean end-to-end latency (ms) over delivered packets.
    pub fn average_latency_ms(&self) -> f64 {
        if self.latencies_us.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.latencies_us.iter().sum();
        sum as f64 / self.latencies_us.len() as f64 / 1e3
    }

    pub fn average_hop_count(&self) -> f64 {
        if self.hop_counts.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.hop_counts.iter().map(|&h| h as u64).sum();
        sum as f64 / self.hop_counts.len() as f64
    }

    /// Delivered payload bits per second of elapsed virtual time, in kbit/s.
    pub fn throughput_kbps(&self, elapsed_us: u64) -> f64 {
        if elapsed_us == 0 {
            return 0.0;
        }
        self.delivered_payload_bits as f64 / (elapsed_us as f64 / 1e6) / 1e3
    }

    /// Control frames per delivered data packet.
    pub fn routing_load(&self) -> f64 {
        if self.data_delivered == 0 {
            return 0.0;
        }
        self.control_sent as f64 / self.data_delivered as f64
    }

    pub fn take_sample(&mut self, time: u64, total_residual_energy: f64) {
        self.samples.push(MetricsSample {
            time,
            data_generated: self.data_generated,
            data_delivered: self.data_delivered,
            control_sent: self.control_sent,
            total_residual_energy,
        });
    }

    /// Log the end-of-run summary the way the batch runner reads it.
    pub fn log_summary(&self, elapsed_us: u64) {
        log::info!("generated {} data packets", self.data_generated);
        log::info!("packet delivery ratio: {:.2}%", self.pdr() * 100.0);
        log::info!("average end-to-end delay: {:.3} ms", self.average_latency_ms());
        log::info!("average throughput: {:.2} kbps", self.throughput_kbps(elapsed_us));
        log::info!("average hop count: {:.2}", self.average_hop_count());
        log::info!("routing load: {:.2}", self.routing_load());
        log::info!(
            "drops: queue={} ttl={} retry={} channel={} (channel-loss events: {})",
            self.drops_queue,
            self.drops_ttl,
            self.drops_retry,
            self.drops_channel,
            self.channel_loss_events
        );
        log::info!(
            "collisions: {}, control frames sent: {}, retransmissions: {}",
            self.collisions,
            self.control_sent,
            self.mac_retransmissions
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_is_counted_once() {
        let mut m = Metrics::new();
        m.data_generated = 2;
        assert!(m.record_delivery(1, 5_000, 1_000, 2, 8192));
        assert!(!m.record_delivery(1, 6_000, 1_000, 2, 8192));
        assert!(m.record_delivery(2, 9_000, 1_000, 3, 8192));

        assert_eq!(m.data_delivered, 2);
        assert_eq!(m.latencies_us, vec![4_000, 8_000]);
        assert_eq!(m.hop_counts, vec![2, 3]);
        assert!((m.pdr() - 1.0).abs() < 1e-12);
        assert!((m.average_latency_ms() - 6.0).abs() < 1e-12);
        assert!((m.average_hop_count() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn derived_metrics_handle_empty_runs() {
        let m = Metrics::new();
        assert_eq!(m.pdr(), 0.0);
        assert_eq!(m.average_latency_ms(), 0.0);
        assert_eq!(m.throughput_kbps(0), 0.0);
        assert_eq!(m.routing_load(), 0.0);
    }

    #[test]
    fn throughput_is_bits_over_time() {
        let mut m = Metrics::new();
        m.data_generated = 1;
        m.record_delivery(1, 1_000_000, 0, 1, 100_000);
        // 100 kbit over 1 s = 100 kbps
        assert!((m.throughput_kbps(1_000_000) - 100.0).abs() < 1e-9);
    }
}
