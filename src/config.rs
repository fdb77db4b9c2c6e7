//! Simulation configuration.
//!
//! A flat parameter set read once at start-up and threaded immutably into the
//! simulator. Values can come from a JSON file or from the built-in defaults;
//! experiments mutate a cloned configuration between runs, never a running one.

use anyhow::Context;
use serde::Deserialize;
use std::fs;

/// Medium access protocol installed on every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacProtocolKind {
    CsmaCa,
    PureAloha,
}

/// Mobility model installed on every node at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MobilityKind {
    RandomWaypoint,
    GaussMarkov,
}

/// All tunables of a simulation run.
///
/// Time values are virtual microseconds, distances metres, powers watts,
/// energies joules and packet lengths bits, matching the units used
/// throughout the engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Simulation horizon (us).
    pub sim_time: u64,
    /// Node count; identifiers are 0..N-1.
    pub number_of_drones: usize,
    /// Bounding box (m).
    pub map_length: f64,
    pub map_width: f64,
    pub map_height: f64,
    /// Initial scalar speed of every node (m/s).
    pub default_speed: f64,
    /// Data packets per second per node (Poisson).
    pub packet_generation_rate: f64,
    /// Data payload length (bits).
    pub average_payload_length: u64,

    /// Initial battery charge (J).
    pub initial_energy: f64,
    /// Communication-state power draw (W).
    pub power_tx: f64,
    pub power_rx: f64,
    pub power_idle: f64,
    pub power_sleep: f64,

    /// Probability that an attempted delivery is lost outright.
    pub data_loss_probability: f64,
    /// Minimum SINR for a successful decode (dB).
    pub snr_threshold: f64,
    /// Carrier frequency (Hz).
    pub carrier_frequency: f64,
    /// Radiated power (W).
    pub transmitting_power: f64,
    /// Receiver noise power (W).
    pub noise_power: f64,
    /// Link bit rate (bit/s).
    pub bit_rate: u64,
    /// Number of sub-channels, each with its own exclusive-access token.
    pub number_of_sub_channels: usize,
    /// Carrier-sense range (m): transmitters beyond it are not heard as busy.
    pub sensing_range: f64,

    /// MAC timing (us) and contention parameters.
    pub slot_duration: u64,
    pub sifs_duration: u64,
    pub difs_duration: u64,
    pub ack_timeout_extra: u64,
    pub cw_min: u32,
    pub cw_max: u32,
    pub max_retransmission_attempt: u32,

    /// Routing timers (us).
    pub hello_interval: u64,
    pub neighbor_timeout: u64,
    pub active_route_timeout: u64,

    pub max_queue_size: usize,
    /// Initial hop budget of every packet.
    pub max_ttl: u8,
    /// Maximum age of a queued packet before it is dropped (us).
    pub packet_lifetime: u64,

    /// Per-layer header lengths (bits) added to every frame.
    pub ip_header_length: u64,
    pub mac_header_length: u64,
    pub phy_header_length: u64,
    /// Total ACK frame length (bits).
    pub ack_packet_length: u64,
    /// Hello/control payload length (bits), before headers.
    pub hello_payload_length: u64,

    pub mac_protocol: MacProtocolKind,
    pub mobility_model: MobilityKind,

    /// Master RNG seed; all sub-streams derive from it.
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            sim_time: 30_000_000,
            number_of_drones: 10,
            map_length: 600.0,
            map_width: 600.0,
            map_height: 100.0,
            default_speed: 10.0,
            packet_generation_rate: 5.0,
            average_payload_length: 1024 * 8,

            initial_energy: 20_000.0,
            power_tx: 1.5,
            power_rx: 1.0,
            power_idle: 0.1,
            power_sleep: 0.001,

            data_loss_probability: 0.05,
            snr_threshold: 6.0,
            carrier_frequency: 2.4e9,
            transmitting_power: 0.1,
            noise_power: 4e-11,
            bit_rate: 2_000_000,
            number_of_sub_channels: 3,
            sensing_range: 750.0,

            slot_duration: 20,
            sifs_duration: 10,
            difs_duration: 30,
            ack_timeout_extra: 50,
            cw_min: 31,
            cw_max: 1023,
            max_retransmission_attempt: 5,

            hello_interval: 1_000_000,
            neighbor_timeout: 2_500_000,
            active_route_timeout: 3_000_000,

            max_queue_size: 200,
            max_ttl: 11,
            packet_lifetime: 10_000_000,

            ip_header_length: 20 * 8,
            mac_header_length: 14 * 8,
            phy_header_length: (128 + 16) + (8 + 8 + 16 + 16),
            ack_packet_length: 16 * 8 + 14 * 8,
            hello_payload_length: 256,

            mac_protocol: MacProtocolKind::CsmaCa,
            mobility_model: MobilityKind::RandomWaypoint,

            seed: 2024,
        }
    }
}

impl SimulationConfig {
    /// Load a configuration from a JSON file. Missing fields fall back to the
    /// defaults; unknown fields are rejected to catch typos early.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let data =
            fs::read_to_string(path).with_context(|| format!("failed to read config file: {path}"))?;
        let config: SimulationConfig =
            serde_json::from_str(&data).with_context(|| format!("invalid config JSON: {path}"))?;
        config
            .validate()
            .map_err(|msg| anyhow::anyhow!("invalid configuration: {msg}"))?;
        Ok(config)
    }

    /// Reject configurations that would produce a meaningless or crashing run.
    /// Called once at start-up; any error here is fatal.
    pub fn validate(&self) -> Result<(), String> {
        if self.number_of_drones < 2 {
            return Err(format!(
                "number_of_drones is {}, need at least 2 (traffic requires a peer)",
                self.number_of_drones
            ));
        }
        if self.sim_time == 0 {
            return Err("sim_time must be positive".to_string());
        }
        if self.map_length <= 0.0 || self.map_width <= 0.0 || self.map_height <= 0.0 {
            return Err(format!(
                "bounding box {}x{}x{} m must have positive extent in every axis",
                self.map_length, self.map_width, self.map_height
            ));
        }
        if self.default_speed < 0.0 {
            return Err(format!("default_speed {} must be non-negative", self.default_speed));
        }
        if self.packet_generation_rate <= 0.0 {
            return Err(format!(
                "packet_generation_rate {} must be positive",
                self.packet_generation_rate
            ));
        }
        if !(0.0..=1.0).contains(&self.data_loss_probability) {
            return Err(format!(
                "data_loss_probability {} outside [0, 1]",
                self.data_loss_probability
            ));
        }
        if self.transmitting_power <= 0.0 || self.noise_power <= 0.0 {
            return Err("transmitting_power and noise_power must be positive".to_string());
        }
        if self.carrier_frequency <= 0.0 {
            return Err("carrier_frequency must be positive".to_string());
        }
        if self.bit_rate == 0 {
            return Err("bit_rate must be positive".to_string());
        }
        if self.number_of_sub_channels == 0 {
            return Err("number_of_sub_channels must be at least 1".to_string());
        }
        if self.cw_min > self.cw_max {
            return Err(format!("cw_min {} exceeds cw_max {}", self.cw_min, self.cw_max));
        }
        if self.max_retransmission_attempt == 0 {
            return Err("max_retransmission_attempt must be at least 1".to_string());
        }
        if self.max_ttl == 0 {
            return Err("max_ttl must be at least 1".to_string());
        }
        if self.max_queue_size == 0 {
            return Err("max_queue_size must be at least 1".to_string());
        }
        if self.hello_interval == 0 || self.active_route_timeout == 0 {
            return Err("hello_interval and active_route_timeout must be positive".to_string());
        }
        if self.initial_energy <= 0.0 {
            return Err("initial_energy must be positive".to_string());
        }
        Ok(())
    }

    /// Total on-air length of a data frame carrying `payload` bits.
    pub fn data_packet_length(&self, payload: u64) -> u64 {
        self.ip_header_length + self.mac_header_length + self.phy_header_length + payload
    }

    /// Total on-air length of a hello/control frame.
    pub fn hello_packet_length(&self) -> u64 {
        self.data_packet_length(self.hello_payload_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = SimulationConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.data_packet_length(cfg.average_payload_length), 8192 + 464);
        assert_eq!(cfg.hello_packet_length(), 256 + 464);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut cfg = SimulationConfig::default();
        cfg.data_loss_probability = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = SimulationConfig::default();
        cfg.number_of_drones = 1;
        assert!(cfg.validate().is_err());

        let mut cfg = SimulationConfig::default();
        cfg.cw_min = 2048;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_partial_json_with_defaults() {
        let json = r#"{ "number_of_drones": 25, "default_speed": 20.0, "mac_protocol": "csma_ca" }"#;
        let cfg: SimulationConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.number_of_drones, 25);
        assert_eq!(cfg.default_speed, 20.0);
        assert_eq!(cfg.sim_time, SimulationConfig::default().sim_time);
        assert_eq!(cfg.mac_protocol, MacProtocolKind::CsmaCa);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let json = r#"{ "number_of_dornes": 25 }"#;
        assert!(serde_json::from_str::<SimulationConfig>(json).is_err());
    }
}
