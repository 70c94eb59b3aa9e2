//!
//! PDSE - Parallel Drift Simulation Environment
//!
//! Simulates vessels drifting, paddling or sailing across the ocean surface
//! under gridded current, wind and wave data, launching batches of vessels on a
//! schedule and fanning each batch out to a worker pool.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::process::ExitCode;
use std::thread;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use error::PdseError;
use input::{ExecutionMode, RuntimeParameters};
use output::csv_output::CSVController;
use pool::CancelToken;
use traverser::Traverser;
use types::LonLat;

#[macro_use]
mod macros;
#[macro_use]
extern crate impl_ops;

mod chart;
mod error;
mod geo;
mod grid;
mod input;
mod interp;
mod model;
mod output;
mod pool;
mod proximity;
mod traverser;
mod types;
mod vessel;

mod cli {
    use std::path::PathBuf;

    use clap::{Parser, Subcommand};

    use crate::input::ExecutionMode;

    /// Defines the argument structure for the pdse simulation program
    #[derive(Parser, Debug)]
    #[command(name = "Parallel Drift Simulation Environment (PDSE)", version)]
    #[command(about = "Simulates vessel trajectories across the ocean from gridded current, wind and wave data.")]
    pub struct Cli {
        #[command(subcommand)]
        pub command: Command,
    }

    #[derive(Subcommand, Debug)]
    pub enum Command {
        /// Run every scheduled launch and write trajectories as csv
        Run {
            /// json file containing the run parameters
            config: PathBuf,

            /// Output directory
            #[arg(short, long, value_name = "DIR_NAME", default_value = "out")]
            out: PathBuf,

            /// Overrides the execution mode of the configuration
            #[arg(short = 'x', long, value_enum)]
            execution: Option<ExecutionMode>,

            /// Overrides the worker count of the configuration
            #[arg(short, long)]
            threads: Option<usize>,
        },
        /// Simulate a single vessel and write its trajectory as GeoJSON
        Trajectory {
            /// json file containing the run parameters
            config: PathBuf,

            /// Departure longitude
            #[arg(long, allow_hyphen_values = true)]
            lon: f64,

            /// Departure latitude
            #[arg(long, allow_hyphen_values = true)]
            lat: f64,

            /// Output file, stdout when omitted
            #[arg(short, long, value_name = "FILE")]
            out: Option<PathBuf>,
        },
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}

/// Cancel the run on Ctrl+C: running vessels stop at their next step and no
/// further launch starts.
fn cancel_on_ctrl_c(cancel: CancelToken) {
    let spawned = thread::Builder::new()
        .name("pdse-signal".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(err) => {
                    warn!("Ctrl+C handling unavailable: {}", err);
                    return;
                }
            };
            runtime.block_on(async {
                if signal::ctrl_c().await.is_ok() {
                    info!("Shutting down...");
                    cancel.cancel();
                }
            });
        });

    if let Err(err) = spawned {
        warn!("Ctrl+C handling unavailable: {}", err);
    }
}

fn run_launches(
    config: &Path,
    out: &Path,
    execution: Option<ExecutionMode>,
    threads: Option<usize>,
) -> Result<(), PdseError> {
    let mut params = RuntimeParameters::from_file(config)?;
    params.apply_overrides(execution, threads)?;

    let traverser = Traverser::new(params)?;
    cancel_on_ctrl_c(traverser.cancel_token());
    let mut chart = traverser.load_chart()?;
    let mut model = traverser.default_model();
    let mut output_controller = CSVController::new(out)?;

    match traverser.params().execution {
        ExecutionMode::Stream => {
            let launches = traverser.launches(&mut chart, &mut model);
            let n_failed = output::write_out_batches(launches, &mut output_controller)?;
            if n_failed > 0 {
                warn!("{} launch(es) failed and were left out of the results", n_failed);
            }
        }
        mode => {
            let results = traverser.run(&mut chart, &mut model, mode)?;
            for (launch, outcomes) in &results {
                output::write_out_launch(launch, outcomes, &mut output_controller)?;
            }
        }
    }

    info!("Results written to {}", output_controller.dir().display());
    Ok(())
}

fn run_trajectory(config: &Path, departure: LonLat, out: Option<&Path>) -> Result<(), PdseError> {
    let params = RuntimeParameters::from_file(config)?;
    let vessel = Traverser::trajectory(&params, departure, None, None)?;
    let start = vessel
        .trajectory
        .first()
        .map(|p| p.time)
        .unwrap_or(params.start_date);
    let geojson = output::trajectory_geojson(&vessel, start, params.timestep);

    let written = match out {
        Some(path) => serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), &geojson),
        None => serde_json::to_writer_pretty(std::io::stdout().lock(), &geojson),
    };
    written.map_err(|e| PdseError::Output(e.to_string()))
}

fn main() -> ExitCode {
    init_tracing();
    let cli = cli::Cli::parse();

    let result = match &cli.command {
        cli::Command::Run {
            config,
            out,
            execution,
            threads,
        } => run_launches(config, out, *execution, *threads),
        cli::Command::Trajectory { config, lon, lat, out } => {
            run_trajectory(config, LonLat::new(*lon, *lat), out.as_deref())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
