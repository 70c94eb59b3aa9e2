use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::chart::ChartConfig;
use crate::error::ConfigError;
use crate::types::{BoundingBox, LonLat, TimeWindow};
use crate::vessel::{Mode, VesselConfig, VesselSpec};

/// How the vessels of a launch are fanned out.
#[derive(
    ValueEnum, Display, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One vessel at a time on the calling thread.
    Sequential,
    /// One task per vessel on a worker pool.
    #[default]
    Parallel,
    /// Parallel, handing each launch over as soon as it completes.
    Stream,
}

/// Parameters of a simulation run, read from a JSON file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RuntimeParameters {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_craft")]
    pub craft: u32,
    /// Days each vessel is simulated for.
    #[serde(default = "default_duration")]
    pub duration: i64,
    /// Model time step in seconds.
    #[serde(default = "default_timestep")]
    pub timestep: i64,
    /// [lon, lat] of the destination, if any.
    #[serde(default)]
    pub destination: Option<[f64; 2]>,
    /// Own speed in knots.
    #[serde(default = "default_speed")]
    pub speed: f64,
    #[serde(with = "date_format")]
    pub start_date: DateTime<Utc>,
    #[serde(with = "date_format")]
    pub end_date: DateTime<Utc>,
    /// Days between consecutive launches.
    #[serde(default = "default_launch_freq")]
    pub launch_freq: u32,
    pub bbox: BoundingBox,
    /// [lon, lat] of every departure point.
    #[serde(default)]
    pub departure_points: Vec<[f64; 2]>,
    pub data_directory: PathBuf,
    #[serde(default)]
    pub vessel_config: Option<PathBuf>,
    #[serde(default)]
    pub execution: ExecutionMode,
    /// Worker count, defaults to the number of logical CPUs.
    #[serde(default)]
    pub threads: Option<usize>,
    /// Per-vessel time budget in seconds.
    #[serde(default)]
    pub task_timeout_s: Option<u64>,
    #[serde(default)]
    pub chart: ChartConfig,
}

fn default_craft() -> u32 {
    1
}

fn default_duration() -> i64 {
    60
}

fn default_timestep() -> i64 {
    3600
}

fn default_speed() -> f64 {
    2.0
}

fn default_launch_freq() -> u32 {
    5
}

impl RuntimeParameters {
    /// Read and validate the parameters file.
    ///
    /// ### Argument
    /// * 'path' - The path to the run configuration json file.
    ///
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let params = read_parameters_from_file(path.as_ref())?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |name: &'static str, reason: String| Err(ConfigError::InvalidParameter { name, reason });

        if self.duration <= 0 {
            return invalid("duration", format!("must be a positive number of days, got {}", self.duration));
        }
        if self.timestep <= 0 {
            return invalid("timestep", format!("must be a positive number of seconds, got {}", self.timestep));
        }
        if self.launch_freq == 0 {
            return invalid("launch_freq", "must be at least one day".to_string());
        }
        if self.craft == 0 {
            return invalid("craft", "must be at least 1".to_string());
        }
        if !(self.speed.is_finite() && self.speed >= 0.0) {
            return invalid("speed", format!("must be a non-negative number of knots, got {}", self.speed));
        }
        if self.threads == Some(0) {
            return invalid("threads", "must be at least 1".to_string());
        }
        if let Some(point) = self
            .departure_points
            .iter()
            .chain(self.destination.iter())
            .find(|p| !LonLat::from(**p).is_finite())
        {
            return invalid("position", format!("non-finite position {:?}", point));
        }
        self.window()?;
        self.chart.validate()
    }

    /// Apply command line overrides on top of the file values.
    pub fn apply_overrides(
        &mut self,
        execution: Option<ExecutionMode>,
        threads: Option<usize>,
    ) -> Result<(), ConfigError> {
        if let Some(execution) = execution {
            self.execution = execution;
        }
        if threads.is_some() {
            self.threads = threads;
        }
        self.validate()
    }

    /// Launch period, from the first to the last possible launch date.
    pub fn window(&self) -> Result<TimeWindow, ConfigError> {
        TimeWindow::new(self.start_date, self.end_date)
    }

    /// Period of data needed so the last launch gets its full duration.
    pub fn data_window(&self) -> Result<TimeWindow, ConfigError> {
        TimeWindow::new(self.start_date, self.end_date + Duration::days(self.duration))
    }

    pub fn departure_points(&self) -> Vec<LonLat> {
        self.departure_points.iter().map(|p| LonLat::from(*p)).collect()
    }

    pub fn task_timeout(&self) -> Option<std::time::Duration> {
        self.task_timeout_s.map(std::time::Duration::from_secs)
    }

    /// Vessel parameters from the configured file, or the defaults.
    pub fn vessel_spec(&self) -> Result<VesselSpec, ConfigError> {
        let config = match &self.vessel_config {
            Some(path) => VesselConfig::from_file(path)?,
            None => VesselConfig::default(),
        };

        Ok(VesselSpec::new(
            self.mode,
            self.craft,
            self.destination.map(LonLat::from),
            self.speed,
            &config,
        ))
    }
}

/// Function responsible for handling opening the file and connecting the
/// serde reader.
fn read_parameters_from_file(path: &Path) -> Result<RuntimeParameters, ConfigError> {
    let file = File::open(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_reader(BufReader::new(file)).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Dates given either as RFC 3339 timestamps or as plain `YYYY-MM-DD` days
/// (midnight UTC).
mod date_format {
    use chrono::{DateTime, NaiveDate, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&date.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        if let Ok(date) = DateTime::parse_from_rfc3339(&s) {
            return Ok(date.with_timezone(&Utc));
        }

        NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| d.and_utc())
            .ok_or_else(|| de::Error::custom(format!("invalid date '{}', expected YYYY-MM-DD or RFC 3339", s)))
    }
}
