use chrono::{DateTime, Utc};
use nalgebra::DMatrix;

use crate::error::GridError;
use crate::types::{BoundingBox, LonLat, TimeWindow};

/// Spatial coordinates of a grid. Regular grids carry independent 1-D axes,
/// curvilinear grids carry full 2-D coordinate matrices (rows index latitude,
/// columns index longitude).
#[derive(Debug, Clone, PartialEq)]
pub enum GridCoords {
    Regular { lon: Vec<f64>, lat: Vec<f64> },
    Curvilinear { lon: DMatrix<f64>, lat: DMatrix<f64> },
}

impl GridCoords {
    pub fn n_lon(&self) -> usize {
        match self {
            GridCoords::Regular { lon, .. } => lon.len(),
            GridCoords::Curvilinear { lon, .. } => lon.ncols(),
        }
    }

    pub fn n_lat(&self) -> usize {
        match self {
            GridCoords::Regular { lat, .. } => lat.len(),
            GridCoords::Curvilinear { lat, .. } => lat.nrows(),
        }
    }

    pub fn is_curvilinear(&self) -> bool {
        matches!(self, GridCoords::Curvilinear { .. })
    }

    /// Coordinates of the node at (lat index, lon index).
    pub fn node(&self, i_lat: usize, i_lon: usize) -> LonLat {
        match self {
            GridCoords::Regular { lon, lat } => LonLat::new(lon[i_lon], lat[i_lat]),
            GridCoords::Curvilinear { lon, lat } => {
                LonLat::new(lon[(i_lat, i_lon)], lat[(i_lat, i_lon)])
            }
        }
    }

    /// Restrict the coordinates to the given index ranges.
    fn select(&self, lat_idx: &[usize], lon_idx: &[usize]) -> GridCoords {
        match self {
            GridCoords::Regular { lon, lat } => GridCoords::Regular {
                lon: lon_idx.iter().map(|i| lon[*i]).collect(),
                lat: lat_idx.iter().map(|i| lat[*i]).collect(),
            },
            GridCoords::Curvilinear { lon, lat } => GridCoords::Curvilinear {
                lon: lon.select_rows(lat_idx).select_columns(lon_idx),
                lat: lat.select_rows(lat_idx).select_columns(lon_idx),
            },
        }
    }
}

/// Time-indexed gridded field stored (time, lat, lon) row-major with NaN as
/// the missing sentinel.
#[derive(Debug, Clone)]
pub struct GriddedField {
    pub name: String,
    pub times: Vec<DateTime<Utc>>,
    pub coords: GridCoords,
    values: Vec<f64>,
}

impl GriddedField {
    pub fn new(
        name: &str,
        times: Vec<DateTime<Utc>>,
        coords: GridCoords,
        values: Vec<f64>,
    ) -> Result<Self, GridError> {
        let expected = times.len() * coords.n_lat() * coords.n_lon();
        if values.len() != expected {
            return Err(GridError::Malformed(format!(
                "variable '{}' holds {} values, expected {} ({} x {} x {})",
                name,
                values.len(),
                expected,
                times.len(),
                coords.n_lat(),
                coords.n_lon()
            )));
        }

        Ok(Self {
            name: name.to_string(),
            times,
            coords,
            values,
        })
    }

    pub fn n_time(&self) -> usize {
        self.times.len()
    }

    pub fn n_lat(&self) -> usize {
        self.coords.n_lat()
    }

    pub fn n_lon(&self) -> usize {
        self.coords.n_lon()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, i_time: usize, i_lat: usize, i_lon: usize) -> f64 {
        self.values[(i_time * self.n_lat() + i_lat) * self.n_lon() + i_lon]
    }

    /// Values of one time slice, (lat, lon) row-major.
    pub fn frame(&self, i_time: usize) -> &[f64] {
        let size = self.n_lat() * self.n_lon();
        &self.values[i_time * size..(i_time + 1) * size]
    }

    /// Index of the time stamp nearest to `time`; earlier stamp wins a tie.
    pub fn nearest_time_index(&self, time: &DateTime<Utc>) -> Option<usize> {
        let after = self.times.partition_point(|t| t < time);
        match (after.checked_sub(1), self.times.get(after)) {
            (None, None) => None,
            (None, Some(_)) => Some(after),
            (Some(before), None) => Some(before),
            (Some(before), Some(t_after)) => {
                if (*t_after - *time) < (*time - self.times[before]) {
                    Some(after)
                } else {
                    Some(before)
                }
            }
        }
    }

    /// Value at the stamp nearest `time` and the node nearest (lon, lat).
    /// NaN when the field is empty or the point is not finite.
    pub fn nearest_value(&self, time: &DateTime<Utc>, lon: f64, lat: f64) -> f64 {
        let Some(i_time) = self.nearest_time_index(time) else {
            return f64::NAN;
        };
        if !(lon.is_finite() && lat.is_finite()) {
            return f64::NAN;
        }

        let mut best: Option<((usize, usize), f64)> = None;
        for i_lat in 0..self.n_lat() {
            for i_lon in 0..self.n_lon() {
                let node = self.coords.node(i_lat, i_lon);
                let d = (node.lon - lon).powi(2) + (node.lat - lat).powi(2);
                if best.map_or(true, |(_, b)| d < b) {
                    best = Some(((i_lat, i_lon), d));
                }
            }
        }

        best.map_or(f64::NAN, |((i_lat, i_lon), _)| self.get(i_time, i_lat, i_lon))
    }

    /// Copy of the field restricted to time stamps inside `window`.
    pub fn slice_time(&self, window: &TimeWindow) -> GriddedField {
        let keep: Vec<usize> = (0..self.n_time())
            .filter(|i| window.contains(&self.times[*i]))
            .collect();

        let mut values = Vec::with_capacity(keep.len() * self.n_lat() * self.n_lon());
        for i in &keep {
            values.extend_from_slice(self.frame(*i));
        }

        GriddedField {
            name: self.name.clone(),
            times: keep.iter().map(|i| self.times[*i]).collect(),
            coords: self.coords.clone(),
            values,
        }
    }

    /// Copy of the field restricted to the bounding box. Regular grids keep the
    /// nodes whose coordinates fall inside the box; curvilinear grids keep the
    /// smallest index rectangle enclosing every node inside the box.
    pub fn slice_bbox(&self, bbox: &BoundingBox) -> GriddedField {
        let (lat_idx, lon_idx): (Vec<usize>, Vec<usize>) = match &self.coords {
            GridCoords::Regular { lon, lat } => (
                (0..lat.len())
                    .filter(|i| in_range!(bbox.lat_min, bbox.lat_max, lat[*i]))
                    .collect(),
                (0..lon.len())
                    .filter(|i| in_range!(bbox.lon_min, bbox.lon_max, lon[*i]))
                    .collect(),
            ),
            GridCoords::Curvilinear { lon, lat } => {
                let mut rows: Option<(usize, usize)> = None;
                let mut cols: Option<(usize, usize)> = None;
                for r in 0..lon.nrows() {
                    for c in 0..lon.ncols() {
                        if bbox.contains(lon[(r, c)], lat[(r, c)]) {
                            rows = Some(rows.map_or((r, r), |(a, b)| (a.min(r), b.max(r))));
                            cols = Some(cols.map_or((c, c), |(a, b)| (a.min(c), b.max(c))));
                        }
                    }
                }
                match (rows, cols) {
                    (Some((r0, r1)), Some((c0, c1))) => ((r0..=r1).collect(), (c0..=c1).collect()),
                    _ => (Vec::new(), Vec::new()),
                }
            }
        };

        let mut values = Vec::with_capacity(self.n_time() * lat_idx.len() * lon_idx.len());
        for t in 0..self.n_time() {
            for i_lat in &lat_idx {
                for i_lon in &lon_idx {
                    values.push(self.get(t, *i_lat, *i_lon));
                }
            }
        }

        GriddedField {
            name: self.name.clone(),
            times: self.times.clone(),
            coords: self.coords.select(&lat_idx, &lon_idx),
            values,
        }
    }

    /// Merge fields sharing one grid along time. Frames are ordered by time
    /// stamp; a stamp present in several parts keeps the frame of the first part.
    pub fn concat_time(parts: Vec<GriddedField>) -> Result<GriddedField, GridError> {
        let mut parts = parts.into_iter();
        let Some(first) = parts.next() else {
            return Err(GridError::Malformed("no fields to concatenate".to_string()));
        };

        let mut frames: Vec<(DateTime<Utc>, Vec<f64>)> = Vec::new();
        let mut push_frames = |field: &GriddedField| {
            for (i, time) in field.times.iter().enumerate() {
                frames.push((*time, field.frame(i).to_vec()));
            }
        };
        push_frames(&first);
        for part in parts {
            if part.coords != first.coords {
                return Err(GridError::Malformed(format!(
                    "variable '{}' spans files with different spatial coordinates",
                    part.name
                )));
            }
            push_frames(&part);
        }

        // stable sort keeps file order among equal stamps
        frames.sort_by_key(|(time, _)| *time);
        frames.dedup_by_key(|(time, _)| *time);

        let times = frames.iter().map(|(t, _)| *t).collect();
        let values = frames.into_iter().flat_map(|(_, frame)| frame).collect();

        GriddedField::new(&first.name, times, first.coords, values)
    }
}

/// East-west (u) and north-south (v) components sharing one grid.
#[derive(Debug, Clone)]
pub struct VelocityField {
    pub u: GriddedField,
    pub v: GriddedField,
}

impl VelocityField {
    pub fn new(u: GriddedField, v: GriddedField) -> Result<Self, GridError> {
        if u.coords != v.coords || u.times != v.times {
            return Err(GridError::Malformed(format!(
                "velocity components '{}' and '{}' do not share a grid",
                u.name, v.name
            )));
        }
        Ok(Self { u, v })
    }
}
