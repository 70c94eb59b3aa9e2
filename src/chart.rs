use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tracing::{debug, info};

use crate::error::{ConfigError, GridError};
use crate::grid::{GridCoords, GridStore, GriddedField, VelocityField};
use crate::interp::{curvilinear_axes, ContinuousField, CurvilinearPolicy};
use crate::proximity::{IndexKind, LandProximity, ProximityIndex, DEFAULT_SEARCH_RADIUS};
use crate::types::{BoundingBox, DataSource, LonLat, TimeWindow};

/// Recognised chart options, validated before any data is loaded.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct ChartConfig {
    /// Nearest node strategy used for land classification.
    pub index: IndexKind,
    /// Default half width, in degrees, of proximity searches.
    pub search_radius: f64,
    /// Handling of grids with 2-D coordinates.
    pub curvilinear: CurvilinearPolicy,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            index: IndexKind::default(),
            search_radius: DEFAULT_SEARCH_RADIUS,
            curvilinear: CurvilinearPolicy::default(),
        }
    }
}

impl ChartConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.search_radius.is_finite() && self.search_radius > 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "search_radius",
                reason: format!("must be a positive number of degrees, got {}", self.search_radius),
            });
        }
        Ok(())
    }
}

#[derive(Display, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartState {
    Loaded,
    Interpolated,
}

/// Interpolated current and wind components of one launch window. Time
/// arguments are fractional indices into `times()` of the window.
#[derive(Debug)]
pub struct ChartWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub u_current: ContinuousField,
    pub v_current: ContinuousField,
    pub u_wind: ContinuousField,
    pub v_wind: ContinuousField,
}

impl ChartWindow {
    pub fn current(&self, t: f64, lon: f64, lat: f64) -> (f64, f64) {
        (self.u_current.at(t, lon, lat), self.v_current.at(t, lon, lat))
    }

    pub fn wind(&self, t: f64, lon: f64, lat: f64) -> (f64, f64) {
        (self.u_wind.at(t, lon, lat), self.v_wind.at(t, lon, lat))
    }

    /// Fractional current time index of a datetime.
    pub fn current_index_at(&self, time: &DateTime<Utc>) -> Option<f64> {
        self.u_current.time_index_at(time)
    }

    /// Fractional wind time index of a datetime. Winds and currents may be
    /// sampled at different rates.
    pub fn wind_index_at(&self, time: &DateTime<Utc>) -> Option<f64> {
        self.u_wind.time_index_at(time)
    }
}

/// Full resolution data of a chart, immutable once loaded.
#[derive(Debug)]
struct ChartData {
    currents: VelocityField,
    winds: VelocityField,
    waves: GriddedField,
    longitudes: Vec<f64>,
    latitudes: Vec<f64>,
    coastline: ProximityIndex,
}

/// Current, wind and wave data of one region and period, plus the interpolated
/// fields of the active launch window. Clones share all data; a clone taken
/// after `interpolate` is a snapshot that later re-interpolation does not touch.
#[derive(Debug, Clone)]
pub struct Chart {
    pub bbox: BoundingBox,
    pub window: TimeWindow,
    config: ChartConfig,
    data: Arc<ChartData>,
    active: Option<Arc<ChartWindow>>,
}

impl Chart {
    /// Load currents, winds and waves for the region and period from the data
    /// directory.
    ///
    /// ### Argument
    /// * 'bbox' - Region of interest.
    /// * 'window' - Period of interest.
    /// * 'data_dir' - Root of the `<source>/<YEAR>/*` tree.
    /// * 'config' - Chart options.
    ///
    pub fn load<P: AsRef<Path>>(
        bbox: BoundingBox,
        window: TimeWindow,
        data_dir: P,
        config: ChartConfig,
    ) -> Result<Chart, crate::error::PdseError> {
        config.validate()?;
        let store = GridStore::new(data_dir);
        info!("Loading chart {} for {} from {}", bbox, window, store.root_dir().display());

        let currents = store.load_velocity(&window, &bbox, DataSource::Currents)?;
        let winds = store.load_velocity(&window, &bbox, DataSource::Winds)?;
        let waves = store.load_scalar(&window, &bbox, DataSource::Waves)?;

        Ok(Chart::from_fields(bbox, window, currents, winds, waves, config)?)
    }

    /// Assemble a chart from fields already in memory.
    pub fn from_fields(
        bbox: BoundingBox,
        window: TimeWindow,
        currents: VelocityField,
        winds: VelocityField,
        waves: GriddedField,
        config: ChartConfig,
    ) -> Result<Chart, GridError> {
        let coastline = ProximityIndex::new(&currents, window.start, config.index)?;
        let (longitudes, latitudes) = match &currents.u.coords {
            GridCoords::Regular { lon, lat } => (lon.clone(), lat.clone()),
            GridCoords::Curvilinear { lon, lat } => curvilinear_axes(lon, lat),
        };
        debug!(
            "Coastline sampled at {} over {} x {} nodes",
            coastline.reference_time(),
            latitudes.len(),
            longitudes.len()
        );

        Ok(Chart {
            bbox,
            window,
            config,
            data: Arc::new(ChartData {
                currents,
                winds,
                waves,
                longitudes,
                latitudes,
                coastline,
            }),
            active: None,
        })
    }

    pub fn state(&self) -> ChartState {
        match self.active {
            Some(_) => ChartState::Interpolated,
            None => ChartState::Loaded,
        }
    }

    /// Interpolate currents and winds over `[date, date + duration_days]`,
    /// replacing the fields of any previous window.
    ///
    /// ### Argument
    /// * 'date' - Start of the launch window.
    /// * 'duration_days' - Length of the launch window in days.
    ///
    pub fn interpolate(
        &mut self,
        date: DateTime<Utc>,
        duration_days: i64,
    ) -> Result<&mut Self, GridError> {
        let end = date + Duration::days(duration_days);
        let policy = self.config.curvilinear;
        let data = &self.data;

        let window = ChartWindow {
            start: date,
            end,
            u_current: ContinuousField::build(&data.currents.u, date, end, policy)?,
            v_current: ContinuousField::build(&data.currents.v, date, end, policy)?,
            u_wind: ContinuousField::build(&data.winds.u, date, end, policy)?,
            v_wind: ContinuousField::build(&data.winds.v, date, end, policy)?,
        };
        debug!("Interpolated chart window {} .. {}", date, end);
        self.active = Some(Arc::new(window));

        Ok(self)
    }

    /// Interpolated fields of the active window, None before the first
    /// `interpolate` call.
    pub fn active_window(&self) -> Option<&ChartWindow> {
        self.active.as_deref()
    }

    pub fn longitudes(&self) -> &[f64] {
        &self.data.longitudes
    }

    pub fn latitudes(&self) -> &[f64] {
        &self.data.latitudes
    }

    /// Significant wave height at the nearest stamp and node, NaN when unknown.
    pub fn wave_height(&self, time: &DateTime<Utc>, lon: f64, lat: f64) -> f64 {
        self.data.waves.nearest_value(time, lon, lat)
    }

    pub fn is_land(&self, lon: f64, lat: f64) -> bool {
        self.data.coastline.is_land(lon, lat)
    }

    /// Distance and bearing to the closest land node, searching `radius`
    /// degrees or the configured default.
    pub fn find_closest_land(&self, lon: f64, lat: f64, radius: Option<f64>) -> Option<LandProximity> {
        self.data
            .coastline
            .find_closest_land(lon, lat, radius.unwrap_or(self.config.search_radius))
    }

    /// Closest water node, searching `radius` degrees or the configured default.
    pub fn find_closest_water(&self, lon: f64, lat: f64, radius: Option<f64>) -> Option<LonLat> {
        self.data
            .coastline
            .find_closest_water(lon, lat, radius.unwrap_or(self.config.search_radius))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::grid::field::tests::day;
    use crate::grid::store::tests::{write_regular_file, ValueFn};
    use crate::proximity::tests::make_coast;
    use nalgebra::DMatrix;
    use tempfile::tempdir;

    /// Uniform field over the coast grid: currents of `current` m/s east where
    /// water, winds of 10 m/s east everywhere, 1 m waves.
    pub fn make_chart(n_days: i64) -> Chart {
        let coast = make_coast();
        let times: Vec<DateTime<Utc>> = (0..=n_days).map(day).collect();
        let coords = coast.u.coords.clone();
        let land: Vec<bool> = coast.u.frame(0).iter().map(|v| v.is_nan()).collect();

        let frame = |water: f64| -> Vec<f64> {
            land.iter()
                .map(|l| if *l { f64::NAN } else { water })
                .collect()
        };
        let repeat = |frame: Vec<f64>| -> Vec<f64> {
            (0..times.len()).flat_map(|_| frame.clone()).collect()
        };

        let currents = VelocityField::new(
            GriddedField::new("u", times.clone(), coords.clone(), repeat(frame(0.1))).unwrap(),
            GriddedField::new("v", times.clone(), coords.clone(), repeat(frame(0.0))).unwrap(),
        )
        .unwrap();
        let winds = VelocityField::new(
            GriddedField::new("u", times.clone(), coords.clone(), repeat(vec![10.0; 25])).unwrap(),
            GriddedField::new("v", times.clone(), coords.clone(), repeat(vec![0.0; 25])).unwrap(),
        )
        .unwrap();
        let waves = GriddedField::new("height", times.clone(), coords, repeat(vec![1.0; 25])).unwrap();

        let bbox = BoundingBox::new(-1.0, -1.0, 1.0, 1.0).unwrap();
        let window = TimeWindow::new(day(0), day(n_days)).unwrap();
        Chart::from_fields(bbox, window, currents, winds, waves, ChartConfig::default()).unwrap()
    }

    #[test]
    fn test_config_validation() {
        let mut config = ChartConfig::default();
        assert!(config.validate().is_ok());
        config.search_radius = 0.0;
        assert!(config.validate().is_err());

        let parsed: ChartConfig =
            serde_json::from_str(r#"{ "index": "exhaustive", "curvilinear": "reject" }"#).unwrap();
        assert_eq!(parsed.index, IndexKind::Exhaustive);
        assert_eq!(parsed.curvilinear, CurvilinearPolicy::Reject);
        assert_eq!(parsed.search_radius, DEFAULT_SEARCH_RADIUS);
    }

    #[test]
    fn test_state_transitions() {
        let mut chart = make_chart(4);
        assert_eq!(chart.state(), ChartState::Loaded);
        assert!(chart.active_window().is_none());
        // proximity works before any interpolation
        assert!(chart.is_land(0.04, 0.02));

        chart.interpolate(day(0), 2).unwrap();
        assert_eq!(chart.state(), ChartState::Interpolated);
        let window = chart.active_window().unwrap();
        assert_eq!(window.end, day(2));
        assert_eq!(window.current(0.0, 0.02, 0.02), (0.1, 0.0));
        assert_eq!(window.wind(2.0, 0.0, 0.0), (10.0, 0.0));
    }

    #[test]
    fn test_reinterpolation_replaces_window() {
        let mut chart = make_chart(4);
        chart.interpolate(day(0), 3).unwrap();
        // time index 3 is valid in window A (days 0..=3)
        assert_eq!(chart.active_window().unwrap().current(3.0, 0.02, 0.02).0, 0.1);

        let snapshot = chart.clone();
        chart.interpolate(day(3), 1).unwrap();
        // window B holds days 3..=4 only
        assert!(chart.active_window().unwrap().current(3.0, 0.02, 0.02).0.is_nan());
        // an earlier snapshot keeps window A
        assert_eq!(snapshot.active_window().unwrap().current(3.0, 0.02, 0.02).0, 0.1);
    }

    #[test]
    fn test_interpolate_outside_loaded_period_fails() {
        let mut chart = make_chart(2);
        assert!(chart.interpolate(day(10), 2).is_err());
        assert_eq!(chart.state(), ChartState::Loaded);
    }

    #[test]
    fn test_proximity_uses_configured_radius() {
        let chart = make_chart(1);
        assert!(chart.find_closest_land(0.02, 0.02, None).is_some());
        assert!(chart.find_closest_land(0.02, 0.02, Some(0.015)).is_none());
        let water = chart.find_closest_water(0.04, 0.02, None).unwrap();
        assert!(!chart.is_land(water.lon, water.lat));
    }

    #[test]
    fn test_wave_height() {
        let chart = make_chart(1);
        assert_eq!(chart.wave_height(&day(0), 0.02, 0.02), 1.0);
        assert!(chart.wave_height(&day(0), f64::NAN, 0.0).is_nan());
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempdir().unwrap();
        let lon = [0.0, 0.5, 1.0];
        let lat = [0.0, 0.5];
        let times = [day(0), day(1)];
        let water: ValueFn = &|_, _, i| if i == 2 { None } else { Some(0.2) };
        let wind: ValueFn = &|_, _, _| Some(5.0);
        write_regular_file(dir.path(), "currents", 2020, "c.json", &times, &lon, &lat, &[("uo", water), ("vo", water)]);
        write_regular_file(dir.path(), "winds", 2020, "w.json", &times, &lon, &lat, &[("u10", wind), ("v10", wind)]);
        write_regular_file(dir.path(), "waves", 2020, "h.json", &times, &lon, &lat, &[("swh", wind)]);

        let bbox = BoundingBox::new(-1.0, -1.0, 2.0, 2.0).unwrap();
        let window = TimeWindow::new(day(0), day(1)).unwrap();
        let mut chart = Chart::load(bbox, window, dir.path(), ChartConfig::default()).unwrap();

        assert_eq!(chart.longitudes(), &lon);
        assert_eq!(chart.latitudes(), &lat);
        assert!(chart.is_land(1.0, 0.0));
        assert!(!chart.is_land(0.4, 0.4));

        chart.interpolate(day(0), 1).unwrap();
        let active = chart.active_window().unwrap();
        let (u, v) = active.current(0.5, 0.25, 0.25);
        assert!((u - 0.2).abs() < 1e-12 && (v - 0.2).abs() < 1e-12);
        assert_eq!(active.wind(1.0, 1.0, 0.5), (5.0, 5.0));
    }

    #[test]
    fn test_curvilinear_swath_stored_north_first() {
        let coords = GridCoords::Curvilinear {
            lon: DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 0.0, 1.0]),
            lat: DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 0.0, 0.0]),
        };
        let field = |name: &str, values: Vec<f64>| {
            GriddedField::new(name, vec![day(0)], coords.clone(), values).unwrap()
        };
        // north west node is land
        let currents = VelocityField::new(
            field("u", vec![f64::NAN, 0.3, 0.3, 0.3]),
            field("v", vec![f64::NAN, 0.0, 0.0, 0.0]),
        )
        .unwrap();
        let winds = VelocityField::new(field("u", vec![0.0; 4]), field("v", vec![0.0; 4])).unwrap();
        let waves = field("height", vec![1.0; 4]);

        let config = ChartConfig {
            index: IndexKind::Exhaustive,
            ..ChartConfig::default()
        };
        let bbox = BoundingBox::new(-1.0, -1.0, 2.0, 2.0).unwrap();
        let window = TimeWindow::new(day(0), day(0)).unwrap();
        let mut chart = Chart::from_fields(bbox, window, currents, winds, waves, config).unwrap();

        assert_eq!(chart.latitudes(), &[1.0, 0.0]);
        assert_eq!(chart.longitudes(), &[0.0, 1.0]);
        assert!(chart.is_land(0.0, 1.0));
        assert!(!chart.is_land(0.0, 0.0));

        chart.interpolate(day(0), 0).unwrap();
        let active = chart.active_window().unwrap();
        assert!(active.current(0.0, 0.0, 1.0).0.is_nan());
        assert_eq!(active.current(0.0, 0.0, 0.0).0, 0.3);
        assert_eq!(active.current(0.0, 1.0, 1.0).0, 0.3);
    }

    #[test]
    fn test_load_fails_without_waves() {
        let dir = tempdir().unwrap();
        let value: ValueFn = &|_, _, _| Some(1.0);
        write_regular_file(dir.path(), "currents", 2020, "c.json", &[day(0)], &[0.0], &[0.0], &[("uo", value), ("vo", value)]);
        write_regular_file(dir.path(), "winds", 2020, "w.json", &[day(0)], &[0.0], &[0.0], &[("u10", value), ("v10", value)]);

        let bbox = BoundingBox::new(-1.0, -1.0, 2.0, 2.0).unwrap();
        let window = TimeWindow::new(day(0), day(0)).unwrap();
        let result = Chart::load(bbox, window, dir.path(), ChartConfig::default());
        assert!(matches!(
            result,
            Err(crate::error::PdseError::Grid(GridError::NoData {
                dataset: DataSource::Waves,
                ..
            }))
        ));
    }
}
