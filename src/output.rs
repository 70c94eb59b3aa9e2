use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

use crate::error::PdseError;
use crate::pool::Outcome;
use crate::traverser::LaunchBatch;
use crate::vessel::Vessel;

#[derive(Debug, Serialize)]
pub struct TrackPointOut {
    pub launch: String,  // Launch date key
    pub vessel_id: u32,  // ID of the vessel within its launch
    pub time: DateTime<Utc>,
    pub lon: f64,
    pub lat: f64,
}

#[derive(Debug, Serialize)]
pub struct VesselOutcomeOut {
    pub launch: String,
    pub vessel_id: u32,
    pub origin_lon: Option<f64>,
    pub origin_lat: Option<f64>,
    pub end_lon: Option<f64>,
    pub end_lat: Option<f64>,
    pub n_points: usize,
    /// Empty for vessels that ran to completion.
    pub error: String,
}

pub trait SimulationOutput {
    fn write_out_track_point(&mut self, point: TrackPointOut) -> Result<(), PdseError>;

    fn write_out_outcome(&mut self, outcome: VesselOutcomeOut) -> Result<(), PdseError>;

    fn flush(&mut self) -> Result<(), PdseError>;
}

pub mod csv_output {
    use super::*;

    /// Writes trajectories and per-vessel outcomes as csv files in a fresh
    /// timestamped sub-directory.
    pub struct CSVController {
        dir: PathBuf,
        track_writer: csv::Writer<fs::File>,
        outcome_writer: csv::Writer<fs::File>,
    }

    impl CSVController {
        pub fn new<P: AsRef<Path>>(dir_filepath: P) -> Result<Self, PdseError> {
            let sub_dirpath = Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
            let dir = dir_filepath.as_ref().join(sub_dirpath);
            fs::create_dir_all(&dir)?;

            Ok(CSVController {
                track_writer: csv::Writer::from_path(dir.join("pdse_trajectories.csv"))?,
                outcome_writer: csv::Writer::from_path(dir.join("pdse_outcomes.csv"))?,
                dir,
            })
        }

        /// Directory the files are written to.
        pub fn dir(&self) -> &Path {
            &self.dir
        }
    }

    impl SimulationOutput for CSVController {
        fn write_out_track_point(&mut self, point: TrackPointOut) -> Result<(), PdseError> {
            Ok(self.track_writer.serialize(point)?)
        }

        fn write_out_outcome(&mut self, outcome: VesselOutcomeOut) -> Result<(), PdseError> {
            Ok(self.outcome_writer.serialize(outcome)?)
        }

        fn flush(&mut self) -> Result<(), PdseError> {
            self.track_writer.flush()?;
            self.outcome_writer.flush()?;
            Ok(())
        }
    }
}

/// Write every trajectory point and one outcome row per vessel of a launch.
/// Vessel ids follow departure point order, starting at 1.
pub fn write_out_launch(
    launch: &str,
    outcomes: &[Outcome],
    output_controller: &mut dyn SimulationOutput,
) -> Result<(), PdseError> {
    for (vessel_id, outcome) in (1u32..).zip(outcomes) {
        let row = match outcome {
            Ok(vessel) => {
                for point in &vessel.trajectory {
                    output_controller.write_out_track_point(TrackPointOut {
                        launch: launch.to_string(),
                        vessel_id,
                        time: point.time,
                        lon: point.lon,
                        lat: point.lat,
                    })?;
                }
                let end = vessel.position();
                VesselOutcomeOut {
                    launch: launch.to_string(),
                    vessel_id,
                    origin_lon: Some(vessel.origin.lon),
                    origin_lat: Some(vessel.origin.lat),
                    end_lon: Some(end.lon),
                    end_lat: Some(end.lat),
                    n_points: vessel.trajectory.len(),
                    error: String::new(),
                }
            }
            Err(err) => VesselOutcomeOut {
                launch: launch.to_string(),
                vessel_id,
                origin_lon: None,
                origin_lat: None,
                end_lon: None,
                end_lat: None,
                n_points: 0,
                error: err.to_string(),
            },
        };
        output_controller.write_out_outcome(row)?;
    }

    output_controller.flush()
}

/// Write the launches of a streaming run as they complete. A failed launch is
/// logged and leaves no rows, the following launches are still written.
///
/// ### Return
///     The number of failed launches.
///
pub fn write_out_batches<I>(
    batches: I,
    output_controller: &mut dyn SimulationOutput,
) -> Result<usize, PdseError>
where
    I: IntoIterator<Item = Result<LaunchBatch, PdseError>>,
{
    let mut n_failed = 0;
    for batch in batches {
        match batch {
            Ok(batch) => write_out_launch(&batch.key(), &batch.outcomes, output_controller)?,
            Err(err) => {
                error!("Launch failed, nothing written for it: {}", err);
                n_failed += 1;
            }
        }
    }

    Ok(n_failed)
}

/// GeoJSON FeatureCollection holding the trajectory of a vessel as a single
/// LineString.
///
/// ### Argument
/// * 'vessel' - Vessel that has been run.
/// * 'start' - Declared start date.
/// * 'stop' - Declared stop date.
/// * 'timestep' - Model time step in seconds.
///
pub fn to_geojson(vessel: &Vessel, start: &str, stop: &str, timestep: i64) -> Value {
    let coordinates: Vec<[f64; 2]> = vessel.trajectory.iter().map(|p| [p.lon, p.lat]).collect();

    json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "geometry": {
                "type": "LineString",
                "coordinates": coordinates,
            },
            "properties": {
                "start_date": start,
                "stop_date": stop,
                "timestep": timestep,
                "mode": vessel.mode.to_string(),
                "craft": vessel.craft,
            },
        }],
    })
}

/// GeoJSON of a single vessel run, declaring the launch day as start and the
/// day reached after `len(trajectory)` steps as stop.
pub fn trajectory_geojson(vessel: &Vessel, start: DateTime<Utc>, timestep: i64) -> Value {
    let stop = start + Duration::seconds(vessel.trajectory.len() as i64 * timestep);
    to_geojson(
        vessel,
        &start.format("%Y-%m-%d").to_string(),
        &stop.format("%Y-%m-%d").to_string(),
        timestep,
    )
}
