use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use nalgebra::DMatrix;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::field::{GridCoords, GriddedField, VelocityField};
use super::normalize::{self, Variable};
use crate::error::GridError;
use crate::types::{BoundingBox, DataSource, TimeWindow};

const DATA_FILE_EXTENSION: &str = "json";

/// On-disk layout of one gridded data file.
#[derive(Deserialize)]
struct RawDataset {
    time: Vec<DateTime<Utc>>,
    longitude: RawCoord,
    latitude: RawCoord,
    variables: BTreeMap<String, RawVariable>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCoord {
    Axis(Vec<f64>),
    Matrix(Vec<Vec<f64>>),
}

#[derive(Deserialize)]
struct RawVariable {
    dims: Vec<String>,
    // null marks a missing node
    values: Vec<Option<f64>>,
}

/// Output of a load call, one variant per kind of source.
#[derive(Debug, Clone)]
pub enum LoadedField {
    Velocity(VelocityField),
    Scalar(GriddedField),
}

/// Discovers and loads gridded datasets laid out as
/// `root_dir/<source>/<YEAR>/*.json`.
#[derive(Debug, Clone)]
pub struct GridStore {
    root_dir: PathBuf,
}

impl GridStore {
    pub fn new<P: AsRef<Path>>(root_dir: P) -> Self {
        Self {
            root_dir: root_dir.as_ref().to_path_buf(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Load any source by name. Unknown names fail with `InvalidSource`.
    ///
    /// ### Argument
    /// * 'window' - Time window to keep.
    /// * 'bbox' - Region to keep.
    /// * 'source' - One of "currents", "winds" or "waves".
    ///
    pub fn load(
        &self,
        window: &TimeWindow,
        bbox: &BoundingBox,
        source: &str,
    ) -> Result<LoadedField, GridError> {
        let source = DataSource::from_str(source)
            .map_err(|_| GridError::InvalidSource(source.to_string()))?;

        if source.is_velocity() {
            Ok(LoadedField::Velocity(
                self.load_velocity(window, bbox, source)?,
            ))
        } else {
            Ok(LoadedField::Scalar(self.load_scalar(window, bbox, source)?))
        }
    }

    /// Load the (u, v) velocity pair of a current or wind source.
    pub fn load_velocity(
        &self,
        window: &TimeWindow,
        bbox: &BoundingBox,
        source: DataSource,
    ) -> Result<VelocityField, GridError> {
        if !source.is_velocity() {
            return Err(GridError::InvalidSource(format!(
                "{} does not provide velocity components",
                source
            )));
        }

        let mut fields = self.load_variables(window, bbox, source, &[normalize::U, normalize::V])?;
        let v = fields.pop().ok_or_else(|| no_data(source, window, bbox))?;
        let u = fields.pop().ok_or_else(|| no_data(source, window, bbox))?;

        VelocityField::new(u, v)
    }

    /// Load the single scalar variable of a wave source.
    pub fn load_scalar(
        &self,
        window: &TimeWindow,
        bbox: &BoundingBox,
        source: DataSource,
    ) -> Result<GriddedField, GridError> {
        if source.is_velocity() {
            return Err(GridError::InvalidSource(format!(
                "{} provides velocity components, not a scalar",
                source
            )));
        }

        self.load_variables(window, bbox, source, &[normalize::HEIGHT])?
            .pop()
            .ok_or_else(|| no_data(source, window, bbox))
    }

    /// Candidate files of every calendar year overlapping the window, sorted by path.
    pub fn discover(&self, window: &TimeWindow, source: DataSource) -> Result<Vec<PathBuf>, GridError> {
        let mut files = Vec::new();

        for year in window.years() {
            let dir = self.root_dir.join(source.to_string()).join(year.to_string());
            if !dir.is_dir() {
                warn!("No {} directory for year {} at {}", source, year, dir.display());
                continue;
            }

            let entries = fs::read_dir(&dir).map_err(|e| GridError::Io {
                path: dir.clone(),
                source: e,
            })?;
            let mut year_files = Vec::new();
            for entry in entries {
                let path = entry
                    .map_err(|e| GridError::Io {
                        path: dir.clone(),
                        source: e,
                    })?
                    .path();
                if path.is_file()
                    && path.extension().and_then(|e| e.to_str()) == Some(DATA_FILE_EXTENSION)
                {
                    year_files.push(path);
                }
            }
            if year_files.is_empty() {
                warn!("No {} files for year {} in {}", source, year, dir.display());
            }
            files.extend(year_files);
        }

        files.sort();
        Ok(files)
    }

    /// Open every candidate file, merge along time, then slice to window and bbox.
    fn load_variables(
        &self,
        window: &TimeWindow,
        bbox: &BoundingBox,
        source: DataSource,
        names: &[&str],
    ) -> Result<Vec<GriddedField>, GridError> {
        let files = self.discover(window, source)?;
        if files.is_empty() {
            return Err(no_data(source, window, bbox));
        }
        info!("Loading {} {} file(s) for {}", files.len(), source, window);

        let mut per_name: Vec<Vec<GriddedField>> = vec![Vec::new(); names.len()];
        for path in &files {
            debug!("Reading {}", path.display());
            let (times, mut coords, variables) = read_dataset(path)?;
            let mut variables = normalize::normalize(variables, source)?;
            if let GridCoords::Regular { lon, .. } = &mut coords {
                if let Some((wrapped, order)) = normalize::wrap_longitudes(lon) {
                    debug!("Shifting 0..360 longitudes of {} to -180..180", path.display());
                    *lon = wrapped;
                    variables.values_mut().for_each(|var| var.reorder_lon(&order));
                }
            }

            for (slot, name) in names.iter().enumerate() {
                let var = variables.remove(*name).ok_or_else(|| {
                    GridError::Malformed(format!(
                        "{} has no '{}' variable after normalisation",
                        path.display(),
                        name
                    ))
                })?;
                if var.shape != [times.len(), coords.n_lat(), coords.n_lon()] {
                    return Err(GridError::Malformed(format!(
                        "{}: variable '{}' has shape {:?}, coordinates imply {:?}",
                        path.display(),
                        name,
                        var.shape,
                        [times.len(), coords.n_lat(), coords.n_lon()]
                    )));
                }
                per_name[slot].push(GriddedField::new(
                    name,
                    times.clone(),
                    coords.clone(),
                    var.values,
                )?);
            }
        }

        let mut out = Vec::with_capacity(names.len());
        for parts in per_name {
            let merged = GriddedField::concat_time(parts)?;
            let sliced = merged.slice_time(window).slice_bbox(bbox);
            if sliced.is_empty() {
                return Err(no_data(source, window, bbox));
            }
            debug!(
                "{} '{}' sliced to {} x {} x {}",
                source,
                sliced.name,
                sliced.n_time(),
                sliced.n_lat(),
                sliced.n_lon()
            );
            out.push(sliced);
        }

        Ok(out)
    }
}

fn no_data(source: DataSource, window: &TimeWindow, bbox: &BoundingBox) -> GridError {
    GridError::NoData {
        dataset: source,
        window: *window,
        bbox: *bbox,
    }
}

/// Decode one file into its time axis, coordinates and raw variables.
fn read_dataset(
    path: &Path,
) -> Result<(Vec<DateTime<Utc>>, GridCoords, BTreeMap<String, Variable>), GridError> {
    let file = File::open(path).map_err(|e| GridError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let raw: RawDataset =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| GridError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;

    let coords = match (raw.longitude, raw.latitude) {
        (RawCoord::Axis(lon), RawCoord::Axis(lat)) => GridCoords::Regular { lon, lat },
        (RawCoord::Matrix(lon), RawCoord::Matrix(lat)) => GridCoords::Curvilinear {
            lon: to_matrix(&lon, "longitude")?,
            lat: to_matrix(&lat, "latitude")?,
        },
        _ => {
            return Err(GridError::Malformed(format!(
                "{}: longitude and latitude must both be 1-D or both be 2-D",
                path.display()
            )))
        }
    };
    if let GridCoords::Curvilinear { lon, lat } = &coords {
        if lon.shape() != lat.shape() {
            return Err(GridError::Malformed(format!(
                "{}: 2-D longitude {:?} and latitude {:?} differ in shape",
                path.display(),
                lon.shape(),
                lat.shape()
            )));
        }
    }

    let variables = raw
        .variables
        .into_iter()
        .map(|(name, var)| {
            let shape = var
                .dims
                .iter()
                .map(|d| dim_size(d, raw.time.len(), &coords))
                .collect();
            let values = var.values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect();
            (
                name,
                Variable {
                    dims: var.dims,
                    shape,
                    values,
                },
            )
        })
        .collect::<BTreeMap<_, _>>();

    for (name, var) in &variables {
        let expected: usize = var.shape.iter().product();
        if var.values.len() != expected {
            return Err(GridError::Malformed(format!(
                "{}: variable '{}' with dims {:?} holds {} values, expected {}",
                path.display(),
                name,
                var.dims,
                var.values.len(),
                expected
            )));
        }
    }

    Ok((raw.time, coords, variables))
}

/// Size of a named dimension; any dimension without a coordinate is a single level.
fn dim_size(dim: &str, n_time: usize, coords: &GridCoords) -> usize {
    match dim {
        "time" => n_time,
        "latitude" | "lat" | "y" => coords.n_lat(),
        "longitude" | "lon" | "x" => coords.n_lon(),
        _ => 1,
    }
}

fn to_matrix(rows: &[Vec<f64>], name: &str) -> Result<DMatrix<f64>, GridError> {
    let n_cols = rows.first().map_or(0, |r| r.len());
    if rows.iter().any(|r| r.len() != n_cols) {
        return Err(GridError::Malformed(format!("ragged 2-D {} coordinates", name)));
    }
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();

    Ok(DMatrix::from_row_slice(rows.len(), n_cols, &flat))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::grid::field::tests::day;
    use serde_json::json;
    use tempfile::tempdir;

    /// Receives (time, lat, lon) indices, returns None for a missing node.
    pub type ValueFn<'a> = &'a dyn Fn(usize, usize, usize) -> Option<f64>;

    pub fn write_regular_file(
        root: &Path,
        source: &str,
        year: i32,
        file_name: &str,
        times: &[DateTime<Utc>],
        lon: &[f64],
        lat: &[f64],
        variables: &[(&str, ValueFn)],
    ) {
        let dir = root.join(source).join(year.to_string());
        fs::create_dir_all(&dir).unwrap();

        let mut vars = serde_json::Map::new();
        for (name, value) in variables {
            let mut values = Vec::new();
            for t in 0..times.len() {
                for i_lat in 0..lat.len() {
                    for i_lon in 0..lon.len() {
                        values.push(value(t, i_lat, i_lon));
                    }
                }
            }
            vars.insert(
                name.to_string(),
                json!({ "dims": ["time", "latitude", "longitude"], "values": values }),
            );
        }

        let doc = json!({
            "time": times,
            "longitude": lon,
            "latitude": lat,
            "variables": vars,
        });
        fs::write(dir.join(file_name), serde_json::to_vec(&doc).unwrap()).unwrap();
    }

    fn window(a: i64, b: i64) -> TimeWindow {
        TimeWindow::new(day(a), day(b)).unwrap()
    }

    fn bbox() -> BoundingBox {
        BoundingBox::new(-1.0, -1.0, 10.0, 10.0).unwrap()
    }

    #[test]
    fn test_invalid_source_fails_fast() {
        let dir = tempdir().unwrap();
        let store = GridStore::new(dir.path());
        let result = store.load(&window(0, 1), &bbox(), "tides");
        assert!(matches!(result, Err(GridError::InvalidSource(s)) if s == "tides"));
    }

    #[test]
    fn test_missing_directory_is_no_data() {
        let dir = tempdir().unwrap();
        let store = GridStore::new(dir.path());
        let result = store.load_velocity(&window(0, 1), &bbox(), DataSource::Currents);
        assert!(matches!(result, Err(GridError::NoData { dataset: DataSource::Currents, .. })));
    }

    #[test]
    fn test_load_currents_merges_files_and_slices() {
        let dir = tempdir().unwrap();
        let lon = [0.0, 1.0, 2.0, 20.0];
        let lat = [0.0, 1.0];
        let vo: ValueFn = &|_, _, _| Some(0.5);
        let uo: ValueFn = &|t, _, i| Some((t * 10 + i) as f64);
        write_regular_file(
            dir.path(),
            "currents",
            2020,
            "b.json",
            &[day(2), day(3)],
            &lon,
            &lat,
            &[("uo", uo), ("vo", vo)],
        );
        let uo: ValueFn = &|t, _, i| Some((100 + t * 10 + i) as f64);
        write_regular_file(
            dir.path(),
            "currents",
            2020,
            "a.json",
            &[day(0), day(1)],
            &lon,
            &lat,
            &[("uo", uo), ("vo", vo)],
        );
        fs::write(dir.path().join("currents/2020/notes.txt"), "ignored").unwrap();

        let store = GridStore::new(dir.path());
        let field = store
            .load_velocity(&window(1, 2), &bbox(), DataSource::Currents)
            .unwrap();

        assert_eq!(field.u.name, "u");
        assert_eq!(field.u.times, vec![day(1), day(2)]);
        // lon 20 falls outside the bbox
        assert_eq!(field.u.n_lon(), 3);
        assert_eq!(field.u.get(0, 0, 2), 112.0);
        assert_eq!(field.u.get(1, 1, 1), 1.0);
        assert_eq!(field.v.get(1, 1, 1), 0.5);
    }

    #[test]
    fn test_window_across_new_year_reads_both_years() {
        let dir = tempdir().unwrap();
        let lon = [0.0, 1.0];
        let lat = [0.0];
        let old: ValueFn = &|_, _, _| Some(1.0);
        let new: ValueFn = &|_, _, _| Some(2.0);
        write_regular_file(dir.path(), "currents", 2019, "dec.json", &[day(-1)], &lon, &lat, &[("uo", old), ("vo", old)]);
        write_regular_file(dir.path(), "currents", 2020, "jan.json", &[day(0)], &lon, &lat, &[("uo", new), ("vo", new)]);

        let store = GridStore::new(dir.path());
        let files = store.discover(&window(-1, 0), DataSource::Currents).unwrap();
        assert_eq!(
            files,
            vec![
                dir.path().join("currents/2019/dec.json"),
                dir.path().join("currents/2020/jan.json"),
            ]
        );

        let field = store
            .load_velocity(&window(-1, 0), &bbox(), DataSource::Currents)
            .unwrap();
        assert_eq!(field.u.times, vec![day(-1), day(0)]);
        assert_eq!(field.u.get(0, 0, 1), 1.0);
        assert_eq!(field.u.get(1, 0, 1), 2.0);
    }

    #[test]
    fn test_missing_year_directory_is_skipped() {
        let dir = tempdir().unwrap();
        let value: ValueFn = &|_, _, _| Some(1.0);
        write_regular_file(dir.path(), "currents", 2020, "jan.json", &[day(0), day(1)], &[0.0], &[0.0], &[("uo", value), ("vo", value)]);

        // no currents/2019 directory
        let store = GridStore::new(dir.path());
        let files = store.discover(&window(-2, 1), DataSource::Currents).unwrap();
        assert_eq!(files.len(), 1);

        let field = store
            .load_velocity(&window(-2, 1), &bbox(), DataSource::Currents)
            .unwrap();
        assert_eq!(field.u.times, vec![day(0), day(1)]);
    }

    #[test]
    fn test_null_values_become_missing_sentinel() {
        let dir = tempdir().unwrap();
        let value: ValueFn = &|_, _, i| if i == 0 { None } else { Some(1.0) };
        write_regular_file(
            dir.path(),
            "winds",
            2020,
            "w.json",
            &[day(0)],
            &[0.0, 1.0],
            &[0.0],
            &[("u10", value), ("v10", value)],
        );

        let store = GridStore::new(dir.path());
        let field = store
            .load_velocity(&window(0, 0), &bbox(), DataSource::Winds)
            .unwrap();
        assert!(field.u.get(0, 0, 0).is_nan());
        assert_eq!(field.v.get(0, 0, 1), 1.0);
    }

    #[test]
    fn test_load_waves_as_scalar() {
        let dir = tempdir().unwrap();
        let value: ValueFn = &|_, _, _| Some(2.5);
        write_regular_file(
            dir.path(),
            "waves",
            2020,
            "h.json",
            &[day(0)],
            &[0.0],
            &[0.0],
            &[("VHM0", value)],
        );

        let store = GridStore::new(dir.path());
        match store.load(&window(0, 0), &bbox(), "waves").unwrap() {
            LoadedField::Scalar(field) => {
                assert_eq!(field.name, "height");
                assert_eq!(field.get(0, 0, 0), 2.5);
            }
            LoadedField::Velocity(_) => panic!("waves must load as a scalar field"),
        }
        assert!(matches!(
            store.load_velocity(&window(0, 0), &bbox(), DataSource::Waves),
            Err(GridError::InvalidSource(_))
        ));
    }

    #[test]
    fn test_window_outside_data_is_no_data() {
        let dir = tempdir().unwrap();
        let value: ValueFn = &|_, _, _| Some(1.0);
        write_regular_file(
            dir.path(),
            "currents",
            2020,
            "c.json",
            &[day(0)],
            &[0.0],
            &[0.0],
            &[("uo", value), ("vo", value)],
        );

        let store = GridStore::new(dir.path());
        let result = store.load_velocity(&window(5, 6), &bbox(), DataSource::Currents);
        assert!(matches!(result, Err(GridError::NoData { .. })));
    }

    #[test]
    fn test_winds_on_0_360_axis_are_shifted() {
        let dir = tempdir().unwrap();
        let u10: ValueFn = &|_, _, i| Some(i as f64);
        write_regular_file(
            dir.path(),
            "winds",
            2020,
            "era.json",
            &[day(0)],
            &[0.0, 1.0, 359.0],
            &[0.0],
            &[("u10", u10), ("v10", u10)],
        );

        let store = GridStore::new(dir.path());
        let bbox = BoundingBox::new(-2.0, -1.0, 2.0, 1.0).unwrap();
        let field = store
            .load_velocity(&window(0, 0), &bbox, DataSource::Winds)
            .unwrap();
        assert_eq!(
            field.u.coords,
            GridCoords::Regular {
                lon: vec![-1.0, 0.0, 1.0],
                lat: vec![0.0]
            }
        );
        assert_eq!(field.u.frame(0), &[2.0, 0.0, 1.0]);
    }

    #[test]
    fn test_curvilinear_file_is_detected() {
        let dir = tempdir().unwrap();
        let year_dir = dir.path().join("currents").join("2020");
        fs::create_dir_all(&year_dir).unwrap();
        let doc = json!({
            "time": [day(0)],
            "longitude": [[0.0, 1.0], [0.1, 1.1]],
            "latitude": [[0.0, 0.1], [1.0, 1.1]],
            "variables": {
                "uo": { "dims": ["time", "y", "x"], "values": [1.0, 2.0, 3.0, null] },
                "vo": { "dims": ["time", "y", "x"], "values": [1.0, 2.0, 3.0, 4.0] }
            }
        });
        fs::write(year_dir.join("swath.json"), serde_json::to_vec(&doc).unwrap()).unwrap();

        let store = GridStore::new(dir.path());
        let field = store
            .load_velocity(&window(0, 0), &bbox(), DataSource::Currents)
            .unwrap();
        assert!(field.u.coords.is_curvilinear());
        assert!(field.u.get(0, 1, 1).is_nan());
    }
}
