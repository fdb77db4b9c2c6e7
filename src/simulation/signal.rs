//! Radio signal and timing calculations.
//!
//! Contains helpers for:
//! - Log-distance path gain for line-of-sight links
//! - SINR evaluation against concurrent same-channel transmitters
//! - Maximum communication range implied by the SNR threshold
//! - Frame airtime from length and bit rate
//!
//! Units:
//! - Power: watts in the linear domain, dB for ratios
//! - Time: integer virtual microseconds
//! - Distance: metres
//!
//! Everything here is deterministic; stochastic channel loss is sampled at the
//! PHY from a seeded per-node stream so that runs are reproducible.

use crate::config::SimulationConfig;

/// Speed of light (m/s).
pub const LIGHT_SPEED: f64 = 3.0e8;

/// Path loss exponent of the free-space log-distance model.
pub const PATH_LOSS_EXPONENT: f64 = 2.0;

/// Linear path gain of a line-of-sight link at the given distance.
///
/// # Formula
///
/// ```text
/// G(d) = (c / (4 * pi * f * d))^alpha     with alpha = 2
/// ```
///
/// A degenerate zero-length link has unit gain, so a transmitter never
/// attenuates its own co-located receiver to nothing.
pub fn path_gain(distance: f64, carrier_frequency: f64) -> f64 {
    if distance <= 0.0 {
        return 1.0;
    }
    (LIGHT_SPEED / (4.0 * std::f64::consts::PI * carrier_frequency * distance)).powf(PATH_LOSS_EXPONENT)
}

/// Received power (W) of a transmission over the given distance.
pub fn received_power(tx_power: f64, distance: f64, carrier_frequency: f64) -> f64 {
    tx_power * path_gain(distance, carrier_frequency)
}

/// Signal-to-interference-plus-noise ratio (dB) at a receiver.
///
/// `signal_distance` is the main-link length; `interferer_distances` are the
/// lengths to every concurrently transmitting node on the same sub-channel.
/// All transmitters are assumed to radiate `tx_power`, matching the
/// homogeneous swarm model.
pub fn sinr_db(
    tx_power: f64,
    noise_power: f64,
    carrier_frequency: f64,
    signal_distance: f64,
    interferer_distances: &[f64],
) -> f64 {
    let signal = received_power(tx_power, signal_distance, carrier_frequency);
    let interference: f64 = interferer_distances
        .iter()
        .map(|&d| received_power(tx_power, d, carrier_frequency))
        .sum();
    10.0 * (signal / (noise_power + interference)).log10()
}

/// Maximum distance at which a transmission still clears the SNR threshold
/// with zero interference.
///
/// Solving `10 log10(P_tx G(d) / N) = SNR_min` for `d` gives
///
/// ```text
/// d_max = c * 10^((P_tx[dB] - N[dB] - SNR_min) / (10 * alpha)) / (4 * pi * f)
/// ```
///
/// The PHY uses this as the geometric delivery approximation for broadcast
/// fan-out: receivers beyond it cannot decode even a clean frame.
pub fn max_communication_range(cfg: &SimulationConfig) -> f64 {
    let tx_power_db = 10.0 * cfg.transmitting_power.log10();
    let noise_power_db = 10.0 * cfg.noise_power.log10();
    let budget_db = tx_power_db - noise_power_db - cfg.snr_threshold;

    LIGHT_SPEED * 10.0_f64.powf(budget_db / (10.0 * PATH_LOSS_EXPONENT))
        / (4.0 * std::f64::consts::PI * cfg.carrier_frequency)
}

/// Airtime of a frame (us), rounded up so zero-length frames still occupy
/// the channel for an instant.
pub fn transmission_time_us(length_bits: u64, bit_rate: u64) -> u64 {
    let micros = length_bits as u128 * 1_000_000;
    ((micros + bit_rate as u128 - 1) / bit_rate as u128) as u64
}

/// One-way propagation delay (us) over the given distance, rounded up.
/// Across a default-sized map this is a couple of microseconds; the ACK
/// timeout margin absorbs it.
pub fn propagation_delay_us(distance: f64) -> u64 {
    (distance / LIGHT_SPEED * 1e6).ceil() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_gain_decays_with_distance() {
        let f = 2.4e9;
        let g10 = path_gain(10.0, f);
        let g100 = path_gain(100.0, f);
        let g1000 = path_gain(1000.0, f);
        assert!(g10 > g100 && g100 > g1000);
        // alpha = 2: a 10x distance costs 20 dB
        assert!((10.0 * (g10 / g100).log10() - 20.0).abs() < 1e-6);
        assert_eq!(path_gain(0.0, f), 1.0);
    }

    #[test]
    fn interference_lowers_sinr() {
        let clean = sinr_db(0.1, 4e-11, 2.4e9, 100.0, &[]);
        let jammed = sinr_db(0.1, 4e-11, 2.4e9, 100.0, &[150.0]);
        assert!(jammed < clean);
    }

    #[test]
    fn range_shrinks_with_stricter_threshold() {
        let cfg = SimulationConfig::default();
        let base = max_communication_range(&cfg);
        assert!(base > 0.0);

        let mut strict = cfg.clone();
        strict.snr_threshold += 10.0;
        assert!(max_communication_range(&strict) < base);

        // A clean frame exactly at the computed range sits on the threshold.
        let at_edge = sinr_db(
            cfg.transmitting_power,
            cfg.noise_power,
            cfg.carrier_frequency,
            base,
            &[],
        );
        assert!((at_edge - cfg.snr_threshold).abs() < 1e-6);
    }

    #[test]
    fn airtime_and_propagation_round_up() {
        assert_eq!(transmission_time_us(2_000_000, 2_000_000), 1_000_000);
        assert_eq!(transmission_time_us(1, 2_000_000), 1);
        assert_eq!(transmission_time_us(8656, 2_000_000), 4328);
        assert_eq!(propagation_delay_us(300.0), 1);
        assert_eq!(propagation_delay_us(0.0), 0);
    }
}
