//! Provider specific naming and layout fixes applied to every decoded file so
//! the rest of the crate only ever sees canonical `u`/`v`/`height` variables
//! laid out (time, latitude, longitude).

use std::collections::BTreeMap;

use crate::error::GridError;
use crate::geo;
use crate::types::DataSource;

pub const U: &str = "u";
pub const V: &str = "v";
pub const HEIGHT: &str = "height";

const TIME_DIMS: [&str; 1] = ["time"];
const DEPTH_DIMS: [&str; 2] = ["depth", "z"];
const LAT_DIMS: [&str; 3] = ["latitude", "lat", "y"];
const LON_DIMS: [&str; 3] = ["longitude", "lon", "x"];

/// A decoded variable: named dimensions, their sizes and row-major values.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub dims: Vec<String>,
    pub shape: Vec<usize>,
    pub values: Vec<f64>,
}

impl Variable {
    fn position_of(&self, names: &[&str]) -> Option<usize> {
        self.dims.iter().position(|d| names.contains(&d.as_str()))
    }

    /// Remove a dimension of size one, leaving values untouched.
    fn squeeze(&mut self, names: &[&str]) -> Result<(), GridError> {
        if let Some(pos) = self.position_of(names) {
            if self.shape[pos] != 1 {
                return Err(GridError::Malformed(format!(
                    "dimension '{}' has size {}, only a single level is supported",
                    self.dims[pos], self.shape[pos]
                )));
            }
            self.dims.remove(pos);
            self.shape.remove(pos);
        }
        Ok(())
    }

    /// Reorder a 3-D variable to (time, latitude, longitude).
    fn to_time_lat_lon(mut self) -> Result<Self, GridError> {
        let (Some(t), Some(la), Some(lo)) = (
            self.position_of(&TIME_DIMS),
            self.position_of(&LAT_DIMS),
            self.position_of(&LON_DIMS),
        ) else {
            return Err(GridError::Malformed(format!(
                "expected time, latitude and longitude dimensions, found {:?}",
                self.dims
            )));
        };
        if self.dims.len() != 3 {
            return Err(GridError::Malformed(format!(
                "expected three dimensions after squeezing, found {:?}",
                self.dims
            )));
        }
        if (t, la, lo) == (0, 1, 2) {
            return Ok(self);
        }

        let order = [t, la, lo];
        let shape: Vec<usize> = order.iter().map(|d| self.shape[*d]).collect();
        let mut strides = [0usize; 3];
        strides[2] = 1;
        strides[1] = self.shape[2];
        strides[0] = self.shape[1] * self.shape[2];

        let mut values = Vec::with_capacity(self.values.len());
        for i in 0..shape[0] {
            for j in 0..shape[1] {
                for k in 0..shape[2] {
                    let idx = i * strides[order[0]] + j * strides[order[1]] + k * strides[order[2]];
                    values.push(self.values[idx]);
                }
            }
        }

        self.dims = order.iter().map(|d| self.dims[*d].clone()).collect();
        self.shape = shape;
        self.values = values;
        Ok(self)
    }

    /// Permute the innermost (longitude) axis. Variables whose innermost size
    /// does not match are left alone for the shape check to report.
    pub fn reorder_lon(&mut self, order: &[usize]) {
        if self.shape.last() != Some(&order.len()) || order.is_empty() {
            return;
        }
        self.values = self
            .values
            .chunks(order.len())
            .flat_map(|row| order.iter().map(move |i| row[*i]))
            .collect();
    }
}

/// Shift a 0..360 longitude axis to an ascending -180..180 axis.
///
/// ### Return
///     The new axis and, for each of its nodes, the index of the source
///     column. None when the axis holds no longitude beyond 180 or holds
///     values outside [-180, 360].
///
pub fn wrap_longitudes(lon: &[f64]) -> Option<(Vec<f64>, Vec<usize>)> {
    if !lon.iter().any(|x| *x > 180.0) {
        return None;
    }
    let wrapped = geo::normalize_longitude(lon);
    if wrapped.len() != lon.len() {
        return None;
    }

    let east: Vec<usize> = (0..lon.len())
        .filter(|i| in_range!(-180.0, 180.0, lon[*i]))
        .collect();
    let west = (0..lon.len()).filter(|i| lon[*i] > 180.0);
    let n_east = east.len();

    let mut axis = wrapped[n_east..].to_vec();
    axis.extend_from_slice(&wrapped[..n_east]);

    Some((axis, west.chain(east).collect()))
}

/// Map provider variable names to the canonical names for a source.
fn canonical_names(source: DataSource) -> &'static [(&'static str, &'static str)] {
    match source {
        // CMEMS
        DataSource::Currents => &[("uo", U), ("vo", V)],
        // ECMWF
        DataSource::Winds => &[("u10", U), ("v10", V)],
        DataSource::Waves => &[("VHM0", HEIGHT), ("swh", HEIGHT)],
    }
}

/// Rename provider variables to canonical names, squeeze a singleton depth
/// level and reorder every canonical variable to (time, latitude, longitude).
/// Variables without a canonical counterpart are dropped.
///
/// ### Argument
/// * 'variables' - Variables decoded from one file.
/// * 'source' - Data source the file belongs to.
///
pub fn normalize(
    variables: BTreeMap<String, Variable>,
    source: DataSource,
) -> Result<BTreeMap<String, Variable>, GridError> {
    let renames = canonical_names(source);
    let mut out = BTreeMap::new();

    for (name, mut var) in variables {
        let canonical = renames
            .iter()
            .find(|(from, _)| *from == name)
            .map(|(_, to)| *to)
            .or_else(|| {
                renames
                    .iter()
                    .find(|(_, to)| *to == name)
                    .map(|(_, to)| *to)
            });
        let Some(canonical) = canonical else {
            continue;
        };

        if source == DataSource::Currents {
            var.squeeze(&DEPTH_DIMS)?;
        }
        out.insert(canonical.to_string(), var.to_time_lat_lon()?);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(dims: &[&str], shape: &[usize], values: Vec<f64>) -> Variable {
        Variable {
            dims: dims.iter().map(|d| d.to_string()).collect(),
            shape: shape.to_vec(),
            values,
        }
    }

    #[test]
    fn test_currents_rename_and_drop_depth() {
        let mut vars = BTreeMap::new();
        vars.insert(
            "uo".to_string(),
            var(&["time", "depth", "latitude", "longitude"], &[1, 1, 1, 2], vec![1.0, 2.0]),
        );
        vars.insert(
            "vo".to_string(),
            var(&["time", "depth", "latitude", "longitude"], &[1, 1, 1, 2], vec![3.0, 4.0]),
        );
        vars.insert("thetao".to_string(), var(&["time"], &[1], vec![9.0]));

        let out = normalize(vars, DataSource::Currents).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[U].dims, vec!["time", "latitude", "longitude"]);
        assert_eq!(out[U].shape, vec![1, 1, 2]);
        assert_eq!(out[V].values, vec![3.0, 4.0]);
    }

    #[test]
    fn test_multi_level_depth_is_rejected() {
        let mut vars = BTreeMap::new();
        vars.insert(
            "uo".to_string(),
            var(&["time", "depth", "latitude", "longitude"], &[1, 2, 1, 1], vec![1.0, 2.0]),
        );
        assert!(matches!(
            normalize(vars, DataSource::Currents),
            Err(GridError::Malformed(_))
        ));
    }

    #[test]
    fn test_winds_rename_and_transpose() {
        let mut vars = BTreeMap::new();
        // (time, lon, lat) with 2 lon and 3 lat
        vars.insert(
            "u10".to_string(),
            var(
                &["time", "longitude", "latitude"],
                &[1, 2, 3],
                vec![0.0, 1.0, 2.0, 10.0, 11.0, 12.0],
            ),
        );
        let out = normalize(vars, DataSource::Winds).unwrap();
        let u = &out[U];
        assert_eq!(u.shape, vec![1, 3, 2]);
        assert_eq!(u.values, vec![0.0, 10.0, 1.0, 11.0, 2.0, 12.0]);
    }

    #[test]
    fn test_wrap_longitudes() {
        assert!(wrap_longitudes(&[-10.0, 0.0, 10.0]).is_none());
        assert!(wrap_longitudes(&[0.0, 400.0]).is_none());

        let (axis, order) = wrap_longitudes(&[0.0, 90.0, 180.0, 270.0]).unwrap();
        assert_eq!(axis, vec![-90.0, 0.0, 90.0, 180.0]);
        assert_eq!(order, vec![3, 0, 1, 2]);

        let mut v = var(&["time", "latitude", "longitude"], &[1, 2, 4], vec![0.0, 1.0, 2.0, 3.0, 10.0, 11.0, 12.0, 13.0]);
        v.reorder_lon(&order);
        assert_eq!(v.values, vec![3.0, 0.0, 1.0, 2.0, 13.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn test_canonical_names_pass_through() {
        let mut vars = BTreeMap::new();
        vars.insert(
            "height".to_string(),
            var(&["time", "lat", "lon"], &[1, 1, 1], vec![1.5]),
        );
        let out = normalize(vars, DataSource::Waves).unwrap();
        assert_eq!(out[HEIGHT].values, vec![1.5]);
    }
}
