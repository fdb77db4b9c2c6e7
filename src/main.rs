use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context};
use log::LevelFilter;

use uavnetsim::config::SimulationConfig;
use uavnetsim::experiments;
use uavnetsim::simulation::Simulator;

struct CliArgs {
    config_path: Option<String>,
    out_dir: PathBuf,
    command: String,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut config_path = None;
    let mut out_dir = PathBuf::from("results");
    let mut command = String::from("run");

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config_path = Some(args.next().context("--config requires a file path")?);
            }
            "--out" => {
                out_dir = PathBuf::from(args.next().context("--out requires a directory")?);
            }
            "run" | "e1" | "e2" | "e3" | "all" => command = arg,
            "--help" | "-h" => {
                println!("usage: uavnetsim [--config FILE] [--out DIR] [run|e1|e2|e3|all]");
                process::exit(0);
            }
            other => bail!("unknown argument: {other} (try --help)"),
        }
    }
    Ok(CliArgs { config_path, out_dir, command })
}

fn main() -> anyhow::Result<()> {
    // engine internals stay quiet unless RUST_LOG opts in
    env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::Warn)
        .filter(Some("uavnetsim"), LevelFilter::Info)
        .init();

    let args = parse_args()?;

    let cfg = match &args.config_path {
        Some(path) => SimulationConfig::from_file(path)?,
        None => SimulationConfig::default(),
    };
    cfg.validate()
        .map_err(|msg| anyhow::anyhow!("invalid configuration: {msg}"))?;

    match args.command.as_str() {
        "run" => {
            log::info!("headless run: {} drones, horizon {} s", cfg.number_of_drones, cfg.sim_time / 1_000_000);
            let mut sim = Simulator::new(cfg);
            sim.run_to_end();
            sim.metrics().log_summary(sim.now());
        }
        "e1" => {
            let path = experiments::run_e1(&cfg, &args.out_dir)?;
            log::info!("e1 results written to {}", path.display());
        }
        "e2" => {
            let path = experiments::run_e2(&cfg, &args.out_dir)?;
            log::info!("e2 results written to {}", path.display());
        }
        "e3" => {
            let path = experiments::run_e3(&cfg, &args.out_dir)?;
            log::info!("e3 results written to {}", path.display());
        }
        "all" => {
            for path in [
                experiments::run_e1(&cfg, &args.out_dir)?,
                experiments::run_e2(&cfg, &args.out_dir)?,
                experiments::run_e3(&cfg, &args.out_dir)?,
            ] {
                log::info!("results written to {}", path.display());
            }
        }
        other => bail!("unknown command: {other}"),
    }
    Ok(())
}
