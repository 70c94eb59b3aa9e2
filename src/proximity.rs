use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::GridError;
use crate::geo;
use crate::grid::{GridCoords, VelocityField};
use crate::types::LonLat;

/// Default search radius in degrees, roughly 5 km.
pub const DEFAULT_SEARCH_RADIUS: f64 = 0.05;

/// Strategy used to find the grid node nearest to a query point.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Nearest coordinate on each 1-D axis independently. Regular grids only.
    #[default]
    Axis,
    /// Scan every node for the smallest squared degree distance.
    Exhaustive,
}

/// Distance and compass bearing from a query point to the nearest land node.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct LandProximity {
    pub distance_km: f64,
    pub bearing_deg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Land,
    Water,
}

/// Static land/water classification of the current grid at one reference time,
/// with nearest node and nearest opposite class searches.
#[derive(Debug, Clone)]
pub struct ProximityIndex {
    coords: GridCoords,
    // (lat, lon) row-major, true where u or v is missing
    land: Vec<bool>,
    index: IndexKind,
    reference_time: DateTime<Utc>,
}

impl ProximityIndex {
    /// Build the index from the full resolution currents at the stamp nearest
    /// `reference_time`.
    ///
    /// ### Argument
    /// * 'currents' - Full resolution current field.
    /// * 'reference_time' - Time at which the coastline is sampled.
    /// * 'index' - Nearest node strategy.
    ///
    pub fn new(
        currents: &VelocityField,
        reference_time: DateTime<Utc>,
        index: IndexKind,
    ) -> Result<Self, GridError> {
        if index == IndexKind::Axis && currents.u.coords.is_curvilinear() {
            return Err(GridError::UnsupportedGrid(
                "axis index requires 1-D coordinates, use the exhaustive index".to_string(),
            ));
        }
        let i_time = currents
            .u
            .nearest_time_index(&reference_time)
            .ok_or_else(|| GridError::Malformed("current field has no time stamps".to_string()))?;

        let land = currents
            .u
            .frame(i_time)
            .iter()
            .zip(currents.v.frame(i_time))
            .map(|(u, v)| any_missing!(*u, *v))
            .collect();

        Ok(Self {
            coords: currents.u.coords.clone(),
            land,
            index,
            reference_time: currents.u.times[i_time],
        })
    }

    pub fn reference_time(&self) -> DateTime<Utc> {
        self.reference_time
    }

    fn class_at(&self, i_lat: usize, i_lon: usize) -> Class {
        if self.land[i_lat * self.coords.n_lon() + i_lon] {
            Class::Land
        } else {
            Class::Water
        }
    }

    /// (lat index, lon index) of the node nearest to the query point.
    fn nearest_node(&self, lon: f64, lat: f64) -> Option<(usize, usize)> {
        if !(lon.is_finite() && lat.is_finite()) {
            return None;
        }
        match (&self.coords, self.index) {
            (GridCoords::Regular { lon: lons, lat: lats }, IndexKind::Axis) => {
                Some((nearest_on_axis(lats, lat)?, nearest_on_axis(lons, lon)?))
            }
            _ => {
                let mut best: Option<((usize, usize), f64)> = None;
                for i_lat in 0..self.coords.n_lat() {
                    for i_lon in 0..self.coords.n_lon() {
                        let node = self.coords.node(i_lat, i_lon);
                        let d = (node.lon - lon).powi(2) + (node.lat - lat).powi(2);
                        if best.map_or(true, |(_, b)| d < b) {
                            best = Some(((i_lat, i_lon), d));
                        }
                    }
                }
                best.map(|(idx, _)| idx)
            }
        }
    }

    /// True when the node nearest to the point has a missing current component.
    /// Points the grid cannot place (empty grid, non-finite input) count as land.
    pub fn is_land(&self, lon: f64, lat: f64) -> bool {
        match self.nearest_node(lon, lat) {
            Some((i_lat, i_lon)) => self.class_at(i_lat, i_lon) == Class::Land,
            None => true,
        }
    }

    /// Shared search: nearest node of class `target` inside the square window
    /// of half width `radius` degrees. Nodes are scanned row-major over
    /// (latitude index, longitude index) and the first node at the minimum
    /// distance wins.
    fn closest(&self, query: LonLat, radius: f64, target: Class) -> Option<(LonLat, f64)> {
        trace!(
            "Searching {:?} within {} deg of ({}, {})",
            target,
            radius,
            query.lon,
            query.lat
        );

        let half_width = LonLat::new(radius, radius);
        let (lo, hi) = (query - half_width, query + half_width);

        let mut best: Option<(LonLat, f64)> = None;
        for i_lat in 0..self.coords.n_lat() {
            for i_lon in 0..self.coords.n_lon() {
                let node = self.coords.node(i_lat, i_lon);
                if !in_range!(lo.lon, hi.lon, node.lon) || !in_range!(lo.lat, hi.lat, node.lat) {
                    continue;
                }
                if self.class_at(i_lat, i_lon) != target {
                    continue;
                }
                let distance = geo::equirectangular_km(&query, &node);
                if best.map_or(true, |(_, b)| distance < b) {
                    best = Some((node, distance));
                }
            }
        }

        best
    }

    /// Distance and bearing to the closest land node within `radius` degrees.
    ///
    /// ### Return
    ///     None when the window holds no land node.
    ///
    pub fn find_closest_land(&self, lon: f64, lat: f64, radius: f64) -> Option<LandProximity> {
        let query = LonLat::new(lon, lat);
        let (node, distance_km) = self.closest(query, radius, Class::Land)?;

        Some(LandProximity {
            distance_km,
            bearing_deg: geo::bearing(&query, &node),
        })
    }

    /// Coordinates of the closest water node within `radius` degrees.
    ///
    /// ### Return
    ///     None when the window holds no water node.
    ///
    pub fn find_closest_water(&self, lon: f64, lat: f64, radius: f64) -> Option<LonLat> {
        self.closest(LonLat::new(lon, lat), radius, Class::Water)
            .map(|(node, _)| node)
    }
}

/// Index of the axis coordinate closest to `x`, first one on a tie.
fn nearest_on_axis(axis: &[f64], x: f64) -> Option<usize> {
    axis.iter()
        .enumerate()
        .map(|(i, a)| (i, (a - x).abs()))
        .fold(None, |best: Option<(usize, f64)>, (i, d)| match best {
            Some((_, b)) if b <= d => best,
            _ => Some((i, d)),
        })
        .map(|(i, _)| i)
}
