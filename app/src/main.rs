use std::time::Instant;

use anyhow::{Context, Result};
use mpc::model::{evaluate_path, step};
use mpc::{
    Actuation64, Controller, MpcConfig, MpcError, PathCoefficients, ReferenceTargets, State64,
};
use named_vec_ops::NamedVecOps;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct AppConfig {
    controller: MpcConfig,
    reference: ReferenceTargets,
    simulation: Simulation,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            controller: MpcConfig::default(),
            reference: ReferenceTargets::new(0.0, 0.0, 10.0),
            simulation: Simulation::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Simulation {
    cycles: usize,
    path: [f64; 4],  // reference path in the simulation frame
    start: [f64; 4], // x, y, psi, v
}

impl Default for Simulation {
    fn default() -> Self {
        Self {
            cycles: 60,
            path: [1.0, 0.0, 0.0, 0.0002],
            start: [0.0, 0.0, 0.0, 5.0],
        }
    }
}

fn load_config() -> Result<AppConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            toml::from_str(&text).with_context(|| format!("parsing {path}"))
        }
        None => Ok(AppConfig::default()),
    }
}

fn describe(state: &State64) -> String {
    State64::NAMES
        .iter()
        .zip(state.to_svector().iter())
        .map(|(name, value)| format!("{name}={value:.3}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    let sim = &config.simulation;
    let coeffs = PathCoefficients::from_slice(&sim.path)?;

    let mut controller = Controller::new(config.controller.clone())?;
    controller.init(config.reference);

    let dt = controller.config().latency.max(controller.config().horizon.dt);
    let lf = controller.config().horizon.lf;

    let [x, y, psi, v] = sim.start;
    let (f, heading_des) = evaluate_path(&coeffs, x);
    let mut vehicle = State64 { x, y, psi, v, cte: f - y, epsi: psi - heading_des };
    let mut applied = Actuation64::zero();

    let mut failures = 0;
    let mut worst_cte: f64 = 0.0;
    let started = Instant::now();

    for cycle in 0..sim.cycles {
        match controller.cycle(&vehicle, &applied, &coeffs) {
            Ok(u) => {
                info!(cycle, delta = u.delta, a = u.a, "{}", describe(&vehicle));
                // the command lands one latency period later
                vehicle = step(&vehicle, &applied, &coeffs, dt, lf);
                applied = u;
            }
            Err(MpcError::SolverFailed(status)) => {
                // fallback: hold the previous actuation
                failures += 1;
                warn!(cycle, %status, "Holding previous actuation");
                vehicle = step(&vehicle, &applied, &coeffs, dt, lf);
            }
            Err(e) => return Err(e.into()),
        }
        worst_cte = worst_cte.max(vehicle.cte.abs());
    }

    info!(
        cycles = sim.cycles,
        failures,
        worst_cte,
        elapsed_s = started.elapsed().as_secs_f64(),
        "Simulation done, final {}",
        describe(&vehicle)
    );

    Ok(())
}
