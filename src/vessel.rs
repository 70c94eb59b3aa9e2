use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tracing::debug;

use crate::chart::Chart;
use crate::error::{ConfigError, ModelError};
use crate::types::{LonLat, TrackPoint};

/// How a vessel moves besides being carried by currents and wind.
#[derive(
    Display, EnumString, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Drift,
    Paddle,
    Sail,
}

/// Physical parameters of a vessel type.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct VesselParams {
    /// Fraction of the wind velocity transferred to the vessel.
    pub leeway: f64,
    /// Significant wave height in metres above which the crew stops making way.
    pub max_wave_height: f64,
}

impl Default for VesselParams {
    fn default() -> Self {
        Self {
            leeway: 0.03,
            max_wave_height: 2.0,
        }
    }
}

/// Vessel parameters keyed by mode, read from a JSON file such as
///
/// ```json
/// { "drift": { "leeway": 0.03 }, "sail": { "leeway": 0.1, "max_wave_height": 3.0 } }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(default)]
pub struct VesselConfig {
    pub drift: VesselParams,
    pub paddle: VesselParams,
    pub sail: VesselParams,
}

impl VesselConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_reader(BufReader::new(file)).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn params(&self, mode: Mode) -> VesselParams {
        match mode {
            Mode::Drift => self.drift,
            Mode::Paddle => self.paddle,
            Mode::Sail => self.sail,
        }
    }
}

/// Everything shared by the vessels departing in one launch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VesselSpec {
    pub craft: u32,
    pub destination: Option<LonLat>,
    /// Own speed through the water in knots, unused when drifting.
    pub speed: f64,
    pub mode: Mode,
    pub params: VesselParams,
}

impl VesselSpec {
    pub fn new(
        mode: Mode,
        craft: u32,
        destination: Option<LonLat>,
        speed: f64,
        config: &VesselConfig,
    ) -> Self {
        Self {
            craft,
            destination,
            speed,
            mode,
            params: config.params(mode),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Vessel {
    pub id: u32,
    pub craft: u32,
    pub mode: Mode,
    pub origin: LonLat,
    pub destination: Option<LonLat>,
    pub speed: f64,
    #[serde(skip)]
    pub params: VesselParams,
    /// Filled by the model, empty until the vessel has been run.
    pub trajectory: Vec<TrackPoint>,
}

impl Vessel {
    /// Place a vessel at its departure point. A departure point on land is
    /// moved to the closest water node within the chart's search radius.
    ///
    /// ### Argument
    /// * 'id' - Identifier of the vessel within its launch.
    /// * 'point' - Requested departure point.
    /// * 'spec' - Parameters shared by the launch.
    /// * 'chart' - Chart used for the land check.
    ///
    /// ### Return
    ///     The vessel, or Grounded when no water lies within reach.
    ///
    pub fn from_position(
        id: u32,
        point: LonLat,
        spec: &VesselSpec,
        chart: &Chart,
    ) -> Result<Vessel, ModelError> {
        let origin = if chart.is_land(point.lon, point.lat) {
            let water = chart
                .find_closest_water(point.lon, point.lat, None)
                .ok_or(ModelError::Grounded {
                    id,
                    lon: point.lon,
                    lat: point.lat,
                })?;
            debug!(
                "Vessel {} departs from land at ({}, {}), moved to ({}, {})",
                id, point.lon, point.lat, water.lon, water.lat
            );
            water
        } else {
            point
        };

        Ok(Vessel {
            id,
            craft: spec.craft,
            mode: spec.mode,
            origin,
            destination: spec.destination,
            speed: spec.speed,
            params: spec.params,
            trajectory: Vec::new(),
        })
    }

    /// One vessel per departure point, numbered from 1 in input order. A
    /// point that cannot be placed yields an error in its slot.
    pub fn from_positions(
        points: &[LonLat],
        spec: &VesselSpec,
        chart: &Chart,
    ) -> Vec<Result<Vessel, ModelError>> {
        points
            .iter()
            .zip(1u32..)
            .map(|(point, id)| Vessel::from_position(id, *point, spec, chart))
            .collect()
    }

    /// Last known position: the end of the trajectory, or the origin before
    /// the vessel has been run.
    pub fn position(&self) -> LonLat {
        self.trajectory
            .last()
            .map(|p| p.position())
            .unwrap_or(self.origin)
    }
}
