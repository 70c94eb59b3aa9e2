use std::ops;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::ConfigError;

/// Longitude/latitude pair in WGS84 degrees.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct LonLat {
    pub lon: f64,
    pub lat: f64,
}

impl LonLat {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    pub fn is_finite(&self) -> bool {
        self.lon.is_finite() && self.lat.is_finite()
    }
}

impl Default for LonLat {
    fn default() -> Self {
        Self { lon: 0f64, lat: 0f64 }
    }
}

impl From<[f64; 2]> for LonLat {
    fn from(value: [f64; 2]) -> Self {
        Self {
            lon: value[0],
            lat: value[1],
        }
    }
}

impl_op_ex!(+ |a: &LonLat, b: &LonLat| -> LonLat {
    LonLat {
        lon: a.lon + b.lon,
        lat: a.lat + b.lat,
    }
});

impl_op_ex!(-|a: &LonLat, b: &LonLat| -> LonLat {
    LonLat {
        lon: a.lon - b.lon,
        lat: a.lat - b.lat,
    }
});

impl_op_ex_commutative!(*|a: &LonLat, b: &f64| -> LonLat {
    LonLat {
        lon: a.lon * b,
        lat: a.lat * b,
    }
});

/// Rectangular lon/lat region limiting data load and simulation.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(try_from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub lon_min: f64,
    pub lat_min: f64,
    pub lon_max: f64,
    pub lat_max: f64,
}

impl BoundingBox {
    pub fn new(lon_min: f64, lat_min: f64, lon_max: f64, lat_max: f64) -> Result<Self, ConfigError> {
        if !(lon_min < lon_max) || !(lat_min < lat_max) {
            return Err(ConfigError::InvalidBoundingBox([
                lon_min, lat_min, lon_max, lat_max,
            ]));
        }

        Ok(Self {
            lon_min,
            lat_min,
            lon_max,
            lat_max,
        })
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        in_range!(self.lon_min, self.lon_max, lon) && in_range!(self.lat_min, self.lat_max, lat)
    }
}

impl TryFrom<[f64; 4]> for BoundingBox {
    type Error = ConfigError;

    fn try_from(value: [f64; 4]) -> Result<Self, Self::Error> {
        BoundingBox::new(value[0], value[1], value[2], value[3])
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(value: BoundingBox) -> Self {
        [value.lon_min, value.lat_min, value.lon_max, value.lat_max]
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.lon_min, self.lat_min, self.lon_max, self.lat_max
        )
    }
}

/// Inclusive time interval, end never before start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ConfigError> {
        if end < start {
            return Err(ConfigError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, time: &DateTime<Utc>) -> bool {
        *time >= self.start && *time <= self.end
    }

    /// Every calendar year overlapping the window, ascending.
    pub fn years(&self) -> Vec<i32> {
        (self.start.year()..=self.end.year()).collect()
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} .. {}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// The fixed set of gridded data sources found under the data directory.
#[derive(Display, EnumString, Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Currents,
    Winds,
    Waves,
}

impl DataSource {
    /// Whether the source provides an (u, v) velocity pair rather than a scalar.
    pub fn is_velocity(&self) -> bool {
        !matches!(self, DataSource::Waves)
    }
}

/// A single timestamped position along a trajectory.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TrackPoint {
    pub time: DateTime<Utc>,
    pub lon: f64,
    pub lat: f64,
}

impl TrackPoint {
    pub fn position(&self) -> LonLat {
        LonLat::new(self.lon, self.lat)
    }
}
