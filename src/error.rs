use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{BoundingBox, DataSource, TimeWindow};

/// Failures raised while discovering, decoding or slicing gridded data.
#[derive(Debug, Error)]
pub enum GridError {
    #[error("invalid data source '{0}', expected one of currents, winds or waves")]
    InvalidSource(String),

    #[error("no {dataset} data for window {window} within bounding box {bbox}")]
    NoData {
        dataset: DataSource,
        window: TimeWindow,
        bbox: BoundingBox,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decode {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed dataset: {0}")]
    Malformed(String),

    #[error("unsupported grid: {0}")]
    UnsupportedGrid(String),
}

/// Rejected run or chart configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid bounding box {0:?}, expected [lon_min, lat_min, lon_max, lat_max] with min < max")]
    InvalidBoundingBox([f64; 4]),

    #[error("invalid time window, end {end} is before start {start}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("cannot read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Per-vessel failure surfaced alongside successful trajectories.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("model has not been bound to an interpolated chart")]
    NotBound,

    #[error("vessel {id} is grounded at ({lon}, {lat}) with no water within reach")]
    Grounded { id: u32, lon: f64, lat: f64 },

    #[error("vessel {0} was cancelled")]
    Cancelled(u32),

    #[error("vessel {0} exceeded its task time budget")]
    TimedOut(u32),

    #[error("vessel {id} panicked: {message}")]
    Panicked { id: u32, message: String },

    #[error("vessel {id} failed: {message}")]
    Failed { id: u32, message: String },
}

/// Top level error of a simulation run.
#[derive(Debug, Error)]
pub enum PdseError {
    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("cannot build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("output error: {0}")]
    Output(String),
}

impl From<csv::Error> for PdseError {
    fn from(err: csv::Error) -> Self {
        PdseError::Output(err.to_string())
    }
}

impl From<std::io::Error> for PdseError {
    fn from(err: std::io::Error) -> Self {
        PdseError::Output(err.to_string())
    }
}
