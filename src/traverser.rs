//! Launch scheduling and per-launch fan-out of vessels to a model.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::chart::Chart;
use crate::error::PdseError;
use crate::input::{ExecutionMode, RuntimeParameters};
use crate::model::{DriftModel, Model};
use crate::pool::{self, CancelToken, Outcome, WorkerPool};
use crate::types::{LonLat, TimeWindow};
use crate::vessel::{Vessel, VesselSpec};

/// Format of the launch keys in run results.
pub const LAUNCH_KEY_FORMAT: &str = "%Y-%m-%d";

/// The vessels of one launch date, with their outcomes in departure point
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchBatch {
    pub date: DateTime<Utc>,
    pub outcomes: Vec<Outcome>,
}

impl LaunchBatch {
    pub fn key(&self) -> String {
        self.date.format(LAUNCH_KEY_FORMAT).to_string()
    }

    pub fn n_failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_err()).count()
    }
}

/// Every date in `[start, end]` stepped by `frequency_days`, starting at `start`.
pub fn launch_dates(start: DateTime<Utc>, end: DateTime<Utc>, frequency_days: u32) -> Vec<DateTime<Utc>> {
    if frequency_days == 0 {
        return Vec::new();
    }
    let step = Duration::days(frequency_days as i64);

    std::iter::successors(Some(start), |date| Some(*date + step))
        .take_while(|date| *date <= end)
        .collect()
}

pub struct Traverser {
    params: RuntimeParameters,
    spec: VesselSpec,
    departure_points: Vec<LonLat>,
    cancel: CancelToken,
}

impl Traverser {
    /// Validate the parameters and read the vessel configuration.
    pub fn new(params: RuntimeParameters) -> Result<Self, PdseError> {
        params.validate()?;
        let spec = params.vessel_spec()?;

        Ok(Self {
            departure_points: params.departure_points(),
            spec,
            params,
            cancel: CancelToken::new(),
        })
    }

    pub fn params(&self) -> &RuntimeParameters {
        &self.params
    }

    /// Flag shared with every task. Cancelling it stops all running vessels
    /// and no launch starts afterwards.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn launch_dates(&self) -> Vec<DateTime<Utc>> {
        launch_dates(self.params.start_date, self.params.end_date, self.params.launch_freq)
    }

    /// Load the chart covering every launch and its full duration.
    pub fn load_chart(&self) -> Result<Chart, PdseError> {
        Chart::load(
            self.params.bbox,
            self.params.data_window()?,
            &self.params.data_directory,
            self.params.chart,
        )
    }

    pub fn default_model(&self) -> DriftModel {
        DriftModel::new(self.params.duration, self.params.timestep)
    }

    /// Run one launch: interpolate the chart, place the vessels, bind the model
    /// and run every vessel.
    ///
    /// ### Argument
    /// * 'chart' - Chart loaded for the whole run, re-interpolated here.
    /// * 'model' - Model bound to the interpolated chart before any vessel runs.
    /// * 'date' - Launch date.
    /// * 'mode' - Sequential or pooled fan-out.
    ///
    pub fn launch<M: Model + ?Sized>(
        &self,
        chart: &mut Chart,
        model: &mut M,
        date: DateTime<Utc>,
        mode: ExecutionMode,
    ) -> Result<LaunchBatch, PdseError> {
        chart.interpolate(date, self.params.duration)?;
        let vessels = Vessel::from_positions(&self.departure_points, &self.spec, chart);
        model.use_chart(chart)?;

        let timeout = self.params.task_timeout();
        let outcomes = match mode {
            ExecutionMode::Sequential => vessels
                .into_iter()
                .map(|vessel| vessel.and_then(|v| pool::run_task(&*model, v, &self.cancel, timeout)))
                .collect(),
            ExecutionMode::Parallel | ExecutionMode::Stream => {
                let workers = WorkerPool::new(self.params.threads, self.cancel.clone(), timeout)?;
                workers.run_all(&*model, vessels)
            }
        };

        let batch = LaunchBatch { date, outcomes };
        info!(
            "Launch {} finished: {} vessels, {} failed",
            batch.key(),
            batch.outcomes.len(),
            batch.n_failed()
        );
        Ok(batch)
    }

    /// Run every launch in date order and collect the outcomes keyed by launch
    /// date.
    pub fn run<M: Model + ?Sized>(
        &self,
        chart: &mut Chart,
        model: &mut M,
        mode: ExecutionMode,
    ) -> Result<BTreeMap<String, Vec<Outcome>>, PdseError> {
        let dates = self.launch_dates();
        info!("Running {} launches ({} mode)", dates.len(), mode);
        if self.departure_points.is_empty() {
            warn!("No departure points configured, launches will be empty");
        }

        let mut results = BTreeMap::new();
        for date in dates {
            if self.cancel.is_cancelled() {
                warn!("Run cancelled before launch {}", date.format(LAUNCH_KEY_FORMAT));
                break;
            }
            let batch = self.launch(chart, model, date, mode)?;
            results.insert(batch.key(), batch.outcomes);
        }

        Ok(results)
    }

    /// Streaming run: each launch is computed on demand and handed over whole,
    /// so only one launch's outcomes are held at a time.
    pub fn launches<'a, M: Model + ?Sized>(
        &'a self,
        chart: &'a mut Chart,
        model: &'a mut M,
    ) -> Launches<'a, M> {
        Launches {
            traverser: self,
            chart,
            model,
            dates: self.launch_dates().into_iter(),
        }
    }

    /// Simulate a single vessel departing from `departure` at the start of the
    /// chart period. A missing chart is loaded for `[start_date, start_date +
    /// duration]` and a missing model defaults to the drift model.
    ///
    /// ### Argument
    /// * 'params' - Run parameters, departure points and schedule are ignored.
    /// * 'departure' - Departure point of the vessel.
    /// * 'chart' - Pre-loaded chart, if any.
    /// * 'model' - Pre-built model, if any.
    ///
    /// ### Return
    ///     The vessel with its trajectory.
    ///
    pub fn trajectory(
        params: &RuntimeParameters,
        departure: LonLat,
        chart: Option<Chart>,
        model: Option<&mut dyn Model>,
    ) -> Result<Vessel, PdseError> {
        let traverser = Traverser::new(params.clone())?;

        let mut chart = match chart {
            Some(chart) => chart,
            None => {
                let start = params.start_date;
                let window = TimeWindow::new(start, start + Duration::days(params.duration))?;
                Chart::load(params.bbox, window, &params.data_directory, params.chart)?
            }
        };
        let mut default_model;
        let model: &mut dyn Model = match model {
            Some(model) => model,
            None => {
                default_model = traverser.default_model();
                &mut default_model
            }
        };

        let date = chart.window.start;
        chart.interpolate(date, params.duration)?;
        let vessel = Vessel::from_position(1, departure, &traverser.spec, &chart)?;
        model.use_chart(&chart)?;

        Ok(pool::run_task(&*model, vessel, &traverser.cancel, params.task_timeout())?)
    }
}

/// Iterator over the launches of a run, yielding one batch per launch date.
/// A failed launch yields its error and the next launch still runs. Iteration
/// ends once the run is cancelled.
pub struct Launches<'a, M: Model + ?Sized> {
    traverser: &'a Traverser,
    chart: &'a mut Chart,
    model: &'a mut M,
    dates: std::vec::IntoIter<DateTime<Utc>>,
}

impl<'a, M: Model + ?Sized> Iterator for Launches<'a, M> {
    type Item = Result<LaunchBatch, PdseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.traverser.cancel.is_cancelled() {
            self.dates = Vec::new().into_iter();
            return None;
        }
        let date = self.dates.next()?;
        Some(
            self.traverser
                .launch(&mut *self.chart, &mut *self.model, date, ExecutionMode::Stream),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.dates.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::tests::make_chart;
    use crate::error::ModelError;
    use crate::grid::field::tests::day;
    use crate::input::tests::make_parameters;
    use chrono::TimeZone;

    /// Parameters matching `make_chart`: three departure points, one of them on
    /// land, one day launches every two days.
    fn make_traverser(end_day: i64) -> Traverser {
        let mut params = make_parameters();
        params.end_date = day(end_day);
        params.duration = 1;
        params.launch_freq = 2;
        params.threads = Some(2);
        params.departure_points = vec![[0.0, 0.02], [0.04, 0.03], [0.01, 0.01]];
        Traverser::new(params).unwrap()
    }

    #[test]
    fn test_launch_dates() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2020, 1, 10, 0, 0, 0).unwrap();
        let dates = launch_dates(start, end, 5);
        assert_eq!(
            dates,
            vec![start, Utc.with_ymd_and_hms(2020, 1, 6, 0, 0, 0).unwrap()]
        );
        assert_eq!(launch_dates(start, start, 5), vec![start]);
        assert_eq!(launch_dates(start, end, 1).len(), 10);
        assert!(launch_dates(start, end, 0).is_empty());
    }

    #[test]
    fn test_zero_frequency_rejected() {
        let mut params = make_parameters();
        params.launch_freq = 0;
        assert!(matches!(Traverser::new(params), Err(PdseError::Config(_))));
    }

    #[test]
    fn test_sequential_and_parallel_agree() {
        let traverser = make_traverser(2);
        let mut chart = make_chart(3);
        let mut model = traverser.default_model();

        let sequential = traverser
            .run(&mut chart, &mut model, ExecutionMode::Sequential)
            .unwrap();
        let parallel = traverser
            .run(&mut chart, &mut model, ExecutionMode::Parallel)
            .unwrap();

        assert_eq!(sequential.keys().collect::<Vec<_>>(), vec!["2020-01-01", "2020-01-03"]);
        assert_eq!(sequential, parallel);

        let first = &sequential["2020-01-01"];
        let ids: Vec<u32> = first.iter().map(|o| o.as_ref().unwrap().id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        // the departure on land was moved to water
        assert_eq!(first[1].as_ref().unwrap().origin, LonLat::new(0.03, 0.03));
        assert_eq!(first[0].as_ref().unwrap().trajectory[0].time, day(0));
        assert_eq!(sequential["2020-01-03"][0].as_ref().unwrap().trajectory[0].time, day(2));
    }

    #[test]
    fn test_streaming_yields_each_launch() {
        let traverser = make_traverser(2);
        let mut chart = make_chart(3);
        let mut model = traverser.default_model();
        let expected = traverser
            .run(&mut chart, &mut model, ExecutionMode::Sequential)
            .unwrap();

        let launches = traverser.launches(&mut chart, &mut model);
        assert_eq!(launches.size_hint(), (2, Some(2)));
        let batches: Vec<LaunchBatch> = launches.map(|b| b.unwrap()).collect();

        assert_eq!(batches.len(), 2);
        for batch in batches {
            assert_eq!(&batch.outcomes, &expected[&batch.key()]);
        }
    }

    #[test]
    fn test_failed_launch_does_not_stop_stream() {
        // data covers days 0..=2, the launch of day 4 has nothing to interpolate
        let traverser = make_traverser(4);
        let mut chart = make_chart(2);
        let mut model = traverser.default_model();

        let results: Vec<_> = traverser.launches(&mut chart, &mut model).collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(matches!(results[2], Err(PdseError::Grid(_))));

        assert!(traverser.run(&mut chart, &mut model, ExecutionMode::Sequential).is_err());
    }

    #[test]
    fn test_cancelled_launch_reports_every_vessel() {
        let traverser = make_traverser(0);
        let mut chart = make_chart(1);
        let mut model = traverser.default_model();
        traverser.cancel_token().cancel();

        let batch = traverser
            .launch(&mut chart, &mut model, day(0), ExecutionMode::Parallel)
            .unwrap();
        assert_eq!(batch.outcomes.len(), 3);
        assert!(batch.outcomes.iter().all(|o| matches!(o, Err(ModelError::Cancelled(_)))));
    }

    #[test]
    fn test_cancelled_run_starts_no_launch() {
        let traverser = make_traverser(4);
        let mut chart = make_chart(5);
        let mut model = traverser.default_model();

        let mut launches = traverser.launches(&mut chart, &mut model);
        assert!(launches.next().unwrap().is_ok());
        traverser.cancel_token().cancel();
        assert!(launches.next().is_none());
        assert_eq!(launches.size_hint(), (0, Some(0)));
        drop(launches);

        let results = traverser
            .run(&mut chart, &mut model, ExecutionMode::Sequential)
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_trajectory_with_prebuilt_chart() {
        let mut params = make_parameters();
        params.duration = 1;
        let vessel = Traverser::trajectory(&params, LonLat::new(0.0, 0.02), Some(make_chart(1)), None).unwrap();
        assert_eq!(vessel.id, 1);
        assert!(vessel.trajectory.len() > 1);
        assert_eq!(vessel.trajectory[0].time, day(0));

        let mut model = DriftModel::new(1, 600);
        let vessel = Traverser::trajectory(&params, LonLat::new(0.0, 0.02), Some(make_chart(1)), Some(&mut model)).unwrap();
        assert_eq!(vessel.trajectory[1].time, day(0) + Duration::minutes(10));

        assert!(matches!(
            Traverser::trajectory(&params, LonLat::new(f64::NAN, 0.0), Some(make_chart(1)), None),
            Err(PdseError::Model(ModelError::Grounded { .. }))
        ));
    }
}
