//! UavNetSim: a discrete-event simulator for flying ad-hoc networks.
//!
//! A swarm of UAV nodes moves through a 3-D volume, sharing a wireless
//! medium through a CSMA/CA link layer and discovering routes on demand with
//! an AODV-style protocol, while per-node energy accounting tracks both
//! flight and communication draw. Everything runs on a single-threaded
//! virtual-time scheduler: given a seed and a configuration, two runs produce
//! bit-identical metrics.
//!
//! Entry points:
//! - [`config::SimulationConfig`]: the flat parameter set
//! - [`simulation::Simulator`]: construct, `run_until`/`run_to_end`, inspect
//!   `metrics()` and `snapshot()`
//! - [`experiments`]: the E1/E2/E3 batch sweeps with CSV output

pub mod config;
pub mod experiments;
pub mod simulation;

pub use config::SimulationConfig;
pub use simulation::Simulator;
