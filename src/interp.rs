use chrono::{DateTime, Utc};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::GridError;
use crate::grid::{GridCoords, GriddedField};
use crate::types::TimeWindow;

/// What to do with grids whose coordinates are 2-D matrices.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CurvilinearPolicy {
    /// Replace the 2-D coordinates with evenly spaced axes between their
    /// extremes. Assumes near uniform node spacing.
    #[default]
    Approximate,
    /// Refuse to interpolate curvilinear grids.
    Reject,
}

/// Strictly ascending interpolation axis.
#[derive(Debug, Clone)]
struct Axis {
    points: Vec<f64>,
}

impl Axis {
    /// Build an axis, reporting whether the input was descending and had to be
    /// reversed.
    fn new(points: Vec<f64>, name: &str) -> Result<(Self, bool), GridError> {
        if points.is_empty() {
            return Err(GridError::Malformed(format!("empty {} axis", name)));
        }
        if points.iter().any(|p| !p.is_finite()) {
            return Err(GridError::Malformed(format!("non-finite {} coordinate", name)));
        }

        let ascending = points.windows(2).all(|w| w[0] < w[1]);
        let descending = points.windows(2).all(|w| w[0] > w[1]);
        if ascending {
            Ok((Self { points }, false))
        } else if descending {
            Ok((
                Self {
                    points: points.into_iter().rev().collect(),
                },
                true,
            ))
        } else {
            Err(GridError::Malformed(format!(
                "{} axis is not strictly monotonic",
                name
            )))
        }
    }

    fn len(&self) -> usize {
        self.points.len()
    }

    /// Lower cell index and fractional offset of `x`, None when outside.
    fn locate(&self, x: f64) -> Option<(usize, f64)> {
        let first = *self.points.first()?;
        let last = *self.points.last()?;
        if !in_range!(first, last, x) {
            return None;
        }
        if self.points.len() == 1 {
            return Some((0, 0.0));
        }

        let upper = self.points.partition_point(|p| *p <= x).min(self.points.len() - 1);
        let lower = upper - 1;
        let (x0, x1) = (self.points[lower], self.points[upper]);

        Some((lower, (x - x0) / (x1 - x0)))
    }
}

/// `n` evenly spaced points from `min` to `max` inclusive.
pub(crate) fn linspace(min: f64, max: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![min],
        _ => (0..n)
            .map(|i| min + (max - min) * i as f64 / (n - 1) as f64)
            .collect(),
    }
}

/// Evenly spaced stand-ins for 2-D coordinates, in storage order. The longitude
/// axis descends when the first column lies east of the last one, the latitude
/// axis when the first row lies north of the last one.
pub(crate) fn curvilinear_axes(lon: &DMatrix<f64>, lat: &DMatrix<f64>) -> (Vec<f64>, Vec<f64>) {
    let oriented = |mut points: Vec<f64>, descending: bool| {
        if descending {
            points.reverse();
        }
        points
    };
    let lon_descending = lon.nrows() > 0 && lon.ncols() > 1 && lon[(0, 0)] > lon[(0, lon.ncols() - 1)];
    let lat_descending = lat.ncols() > 0 && lat.nrows() > 1 && lat[(0, 0)] > lat[(lat.nrows() - 1, 0)];

    (
        oriented(linspace(lon.min(), lon.max(), lon.ncols()), lon_descending),
        oriented(linspace(lat.min(), lat.max(), lat.nrows()), lat_descending),
    )
}

/// Continuous field over (fractional time index, longitude, latitude) built
/// from one time window of a gridded field. Queries outside the domain return
/// NaN.
#[derive(Debug, Clone)]
pub struct ContinuousField {
    times: Vec<DateTime<Utc>>,
    time: Axis,
    lon: Axis,
    lat: Axis,
    // (time, lon, lat) row-major
    values: Vec<f64>,
}

impl ContinuousField {
    /// Build the interpolant of `field` over the sub-window `[start, end]`.
    ///
    /// ### Argument
    /// * 'field' - Loaded full resolution field.
    /// * 'start' - First time stamp to include.
    /// * 'end' - Last time stamp to include.
    /// * 'policy' - Handling of curvilinear coordinates.
    ///
    /// ### Return
    ///     The interpolant, or NoData when the window holds no time stamp.
    ///
    pub fn build(
        field: &GriddedField,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        policy: CurvilinearPolicy,
    ) -> Result<Self, GridError> {
        let window = TimeWindow::new(start, end).map_err(|e| GridError::Malformed(e.to_string()))?;
        let sliced = field.slice_time(&window);
        if sliced.n_time() == 0 {
            return Err(GridError::Malformed(format!(
                "variable '{}' has no time stamps within {}",
                field.name, window
            )));
        }

        let (lon, lat, lon_reversed, lat_reversed) = match &sliced.coords {
            GridCoords::Regular { lon, lat } => {
                let (lon, lon_rev) = Axis::new(lon.clone(), "longitude")?;
                let (lat, lat_rev) = Axis::new(lat.clone(), "latitude")?;
                (lon, lat, lon_rev, lat_rev)
            }
            GridCoords::Curvilinear { lon, lat } => {
                if policy == CurvilinearPolicy::Reject {
                    return Err(GridError::UnsupportedGrid(format!(
                        "variable '{}' is defined on 2-D coordinates",
                        field.name
                    )));
                }
                warn!(
                    "Variable '{}' uses 2-D coordinates, interpolating on evenly spaced axes",
                    field.name
                );
                let (lon, lat) = curvilinear_axes(lon, lat);
                let (lon, lon_rev) = Axis::new(lon, "longitude")?;
                let (lat, lat_rev) = Axis::new(lat, "latitude")?;
                (lon, lat, lon_rev, lat_rev)
            }
        };

        let (n_time, n_lat, n_lon) = (sliced.n_time(), sliced.n_lat(), sliced.n_lon());
        let mut values = Vec::with_capacity(n_time * n_lon * n_lat);
        for t in 0..n_time {
            for i in 0..n_lon {
                let i_lon = if lon_reversed { n_lon - 1 - i } else { i };
                for j in 0..n_lat {
                    let i_lat = if lat_reversed { n_lat - 1 - j } else { j };
                    values.push(sliced.get(t, i_lat, i_lon));
                }
            }
        }

        Ok(Self {
            time: Axis {
                points: (0..n_time).map(|t| t as f64).collect(),
            },
            times: sliced.times,
            lon,
            lat,
            values,
        })
    }

    /// Time stamps covered by the interpolant, index `i` maps to time index `i`.
    pub fn times(&self) -> &[DateTime<Utc>] {
        &self.times
    }

    /// Fractional time index of `time`, linear between stamps.
    pub fn time_index_at(&self, time: &DateTime<Utc>) -> Option<f64> {
        let first = self.times.first()?;
        let last = self.times.last()?;
        if time < first || time > last {
            return None;
        }
        if self.times.len() == 1 {
            return Some(0.0);
        }

        let upper = self.times.partition_point(|t| t <= time).min(self.times.len() - 1);
        let lower = upper - 1;
        let span = (self.times[upper] - self.times[lower]).num_milliseconds() as f64;
        let offset = (*time - self.times[lower]).num_milliseconds() as f64;

        Some(lower as f64 + offset / span)
    }

    fn value(&self, t: usize, i_lon: usize, i_lat: usize) -> f64 {
        self.values[(t * self.lon.len() + i_lon) * self.lat.len() + i_lat]
    }

    /// Trilinear interpolation at (time index, longitude, latitude). Corners with
    /// zero weight are skipped so exact node hits return the stored value even
    /// next to missing nodes.
    pub fn at(&self, t: f64, lon: f64, lat: f64) -> f64 {
        let (Some((t0, ft)), Some((x0, fx)), Some((y0, fy))) =
            (self.time.locate(t), self.lon.locate(lon), self.lat.locate(lat))
        else {
            return f64::NAN;
        };

        let mut acc = 0.0;
        for (dt, wt) in [(0, 1.0 - ft), (1, ft)] {
            if wt == 0.0 {
                continue;
            }
            for (dx, wx) in [(0, 1.0 - fx), (1, fx)] {
                if wx == 0.0 {
                    continue;
                }
                for (dy, wy) in [(0, 1.0 - fy), (1, fy)] {
                    if wy == 0.0 {
                        continue;
                    }
                    acc += wt * wx * wy * self.value(t0 + dt, x0 + dx, y0 + dy);
                }
            }
        }

        acc
    }
}
