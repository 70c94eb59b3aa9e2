use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::chart::Chart;
use crate::error::ModelError;
use crate::geo;
use crate::pool::TaskContext;
use crate::types::{LonLat, TrackPoint};
use crate::vessel::{Mode, Vessel};

/// Distance to the destination, in km, at which a vessel counts as arrived.
pub const ARRIVAL_RADIUS_KM: f64 = 5.0;
/// Metres per second in one knot.
pub const KNOT_MS: f64 = 0.514444;

/// Equations of motion stepping a vessel through an interpolated chart.
///
/// `use_chart` is called once per launch, after the chart has been
/// interpolated and before any vessel of that launch runs. `run` is then called
/// concurrently for different vessels and must not mutate shared state.
pub trait Model: Sync {
    fn use_chart(&mut self, chart: &Chart) -> Result<(), ModelError>;

    fn run(&self, vessel: Vessel, ctx: &TaskContext) -> Result<Vessel, ModelError>;
}

/// Why a drift run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Arrived,
    Elapsed,
    OutOfDomain,
    Grounded,
}

/// Reference model: explicit Euler steps of surface current plus wind leeway,
/// plus the vessel's own speed towards its destination when paddling or
/// sailing in moderate seas.
#[derive(Debug, Clone)]
pub struct DriftModel {
    pub duration_days: i64,
    pub timestep_s: i64,
    chart: Option<Chart>,
}

impl DriftModel {
    pub fn new(duration_days: i64, timestep_s: i64) -> Self {
        Self {
            duration_days,
            timestep_s,
            chart: None,
        }
    }

    /// Velocity in m/s of the vessel at `position` and `time`, None outside the
    /// chart window or next to land.
    fn velocity(
        &self,
        chart: &Chart,
        vessel: &Vessel,
        position: &LonLat,
        time: &DateTime<Utc>,
    ) -> Option<(f64, f64)> {
        let window = chart.active_window()?;
        let t_current = window.current_index_at(time)?;
        let t_wind = window.wind_index_at(time)?;

        let (u_current, v_current) = window.current(t_current, position.lon, position.lat);
        let (u_wind, v_wind) = window.wind(t_wind, position.lon, position.lat);
        if any_missing!(u_current, v_current, u_wind, v_wind) {
            return None;
        }

        let mut u = u_current + vessel.params.leeway * u_wind;
        let mut v = v_current + vessel.params.leeway * v_wind;

        if let (Mode::Paddle | Mode::Sail, Some(destination)) = (vessel.mode, vessel.destination) {
            // NaN wave height means no wave data, the crew keeps going
            let wave_height = chart.wave_height(time, position.lon, position.lat);
            if !(wave_height > vessel.params.max_wave_height) {
                let heading = geo::bearing(position, &destination);
                let speed = vessel.speed * KNOT_MS;
                u += speed * sin_deg!(heading);
                v += speed * cos_deg!(heading);
            }
        }

        Some((u, v))
    }
}

impl Model for DriftModel {
    fn use_chart(&mut self, chart: &Chart) -> Result<(), ModelError> {
        if chart.active_window().is_none() {
            return Err(ModelError::NotBound);
        }
        self.chart = Some(chart.clone());
        Ok(())
    }

    fn run(&self, mut vessel: Vessel, ctx: &TaskContext) -> Result<Vessel, ModelError> {
        let chart = self.chart.as_ref().ok_or(ModelError::NotBound)?;
        let window = chart.active_window().ok_or(ModelError::NotBound)?;
        if self.timestep_s <= 0 {
            return Err(ModelError::Failed {
                id: vessel.id,
                message: format!("timestep must be positive, got {}", self.timestep_s),
            });
        }

        let step = Duration::seconds(self.timestep_s);
        let end = (window.start + Duration::days(self.duration_days)).min(window.end);
        let mut time = window.start;
        let mut position = vessel.origin;

        vessel.trajectory.clear();
        vessel.trajectory.push(TrackPoint {
            time,
            lon: position.lon,
            lat: position.lat,
        });

        let halt = loop {
            ctx.check(vessel.id)?;

            if let Some(destination) = vessel.destination {
                if geo::haversine_km(&position, &destination) <= ARRIVAL_RADIUS_KM {
                    break Halt::Arrived;
                }
            }
            if time + step > end {
                break Halt::Elapsed;
            }
            let Some((u, v)) = self.velocity(chart, &vessel, &position, &time) else {
                break Halt::OutOfDomain;
            };

            let dt = self.timestep_s as f64;
            let next = geo::lonlat_from_displacement(u * dt / 1000.0, v * dt / 1000.0, &position);
            if chart.is_land(next.lon, next.lat) {
                break Halt::Grounded;
            }

            time += step;
            position = next;
            vessel.trajectory.push(TrackPoint {
                time,
                lon: position.lon,
                lat: position.lat,
            });
        };

        debug!(
            "Vessel {} stopped ({:?}) after {} steps at ({:.4}, {:.4})",
            vessel.id,
            halt,
            vessel.trajectory.len() - 1,
            position.lon,
            position.lat
        );
        Ok(vessel)
    }
}
