use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use pose_ekf::replay::{load_log, replay_log, ReinitPolicy, ReplaySensors, ReplaySummary};
use pose_ekf::{
    CovarianceForm, CovarianceStrategy, FilterConfig, SquareRootCovariance, StandardCovariance,
};

#[derive(Parser, Debug)]
#[command(name = "pose_replay")]
#[command(about = "Replay recorded drives through the pose EKF", long_about = None)]
struct Args {
    /// Event logs (*.json or *.json.gz)
    #[arg(required = true)]
    logs: Vec<PathBuf>,

    /// Filter calibration (JSON); defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Carry the covariance as a square-root factor regardless of the config
    #[arg(long, default_value_t = false)]
    square_root: bool,

    /// Override the innovation gate (NIS threshold)
    #[arg(long)]
    gate: Option<f64>,
}

fn run_once<C: CovarianceStrategy>(path: &Path, config: &FilterConfig) -> Result<ReplaySummary> {
    let log = load_log(path)?;
    let sensors = ReplaySensors::from_config(config)?;
    let policy = ReinitPolicy::from_config(config)?;
    let mut ekf = config.build_filter::<C>()?;

    info!(
        "Replaying {} ({} events, {} covariance)",
        path.display(),
        log.events.len(),
        C::NAME
    );
    let summary = replay_log(&mut ekf, &log, &sensors, &policy)
        .with_context(|| format!("replaying {}", path.display()))?;
    Ok(summary)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match args.config.as_ref() {
        Some(path) => FilterConfig::from_json_file(path)?,
        None => FilterConfig::default(),
    };
    if args.square_root {
        config.covariance_form = CovarianceForm::SquareRoot;
    }
    if let Some(gate) = args.gate {
        config.innovation_gate = Some(gate);
    }
    config.validate().context("invalid filter configuration")?;

    let mut results = Vec::new();
    for path in &args.logs {
        let summary = match config.covariance_form {
            CovarianceForm::Standard => run_once::<StandardCovariance>(path, &config),
            CovarianceForm::SquareRoot => run_once::<SquareRootCovariance>(path, &config),
        };
        match summary {
            Ok(summary) => results.push(summary),
            Err(e) => eprintln!("Failed {}: {:#}", path.display(), e),
        }
    }

    if results.is_empty() {
        anyhow::bail!("no log replayed successfully");
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
