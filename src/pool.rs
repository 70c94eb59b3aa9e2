use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use tracing::{debug, warn};

use crate::error::ModelError;
use crate::model::Model;
use crate::vessel::Vessel;

/// Outcome of one vessel task.
pub type Outcome = Result<Vessel, ModelError>;

/// Shared flag asking every running and queued task to stop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-task view of the cancel flag and time budget, polled by models between
/// steps.
#[derive(Debug, Clone)]
pub struct TaskContext {
    cancel: CancelToken,
    deadline: Option<Instant>,
}

impl TaskContext {
    /// Context whose deadline starts counting now.
    pub fn new(cancel: CancelToken, timeout: Option<Duration>) -> Self {
        Self {
            cancel,
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    /// Context that never stops a task.
    pub fn unbounded() -> Self {
        Self::new(CancelToken::new(), None)
    }

    /// Err when the task of vessel `id` must stop.
    pub fn check(&self, id: u32) -> Result<(), ModelError> {
        if self.cancel.is_cancelled() {
            return Err(ModelError::Cancelled(id));
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(ModelError::TimedOut(id)),
            _ => Ok(()),
        }
    }
}

/// Run one vessel through the model, turning a panic into a per-vessel error.
///
/// ### Argument
/// * 'model' - Model bound to the launch's chart.
/// * 'vessel' - Vessel to run.
/// * 'cancel' - Shared cancel flag.
/// * 'timeout' - Time budget of the task, counted from its start.
///
pub fn run_task<M: Model + ?Sized>(
    model: &M,
    vessel: Vessel,
    cancel: &CancelToken,
    timeout: Option<Duration>,
) -> Outcome {
    let id = vessel.id;
    let ctx = TaskContext::new(cancel.clone(), timeout);
    ctx.check(id)?;

    match panic::catch_unwind(AssertUnwindSafe(|| model.run(vessel, &ctx))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = panic_message(payload);
            warn!("Vessel {} panicked: {}", id, message);
            Err(ModelError::Panicked { id, message })
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Fixed size pool running the vessels of a single launch. A pool is built for
/// each launch and dropped once its results are gathered, so no worker outlives
/// the chart window it was given.
pub struct WorkerPool {
    pool: ThreadPool,
    cancel: CancelToken,
    task_timeout: Option<Duration>,
}

impl WorkerPool {
    /// ### Argument
    /// * 'threads' - Worker count, defaults to the number of logical CPUs.
    /// * 'cancel' - Shared cancel flag handed to every task.
    /// * 'task_timeout' - Per-task time budget.
    ///
    pub fn new(
        threads: Option<usize>,
        cancel: CancelToken,
        task_timeout: Option<Duration>,
    ) -> Result<Self, ThreadPoolBuildError> {
        let num_threads = threads.unwrap_or_else(num_cpus::get).max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("pdse-worker-{}", i))
            .build()?;
        debug!("Worker pool started with {} threads", num_threads);

        Ok(Self {
            pool,
            cancel,
            task_timeout,
        })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run every placed vessel as its own task. Results come back in input
    /// order; slots that already hold an error are passed through untouched.
    pub fn run_all<M: Model + ?Sized>(&self, model: &M, vessels: Vec<Outcome>) -> Vec<Outcome> {
        let cancel = &self.cancel;
        let timeout = self.task_timeout;

        self.pool.install(|| {
            vessels
                .into_par_iter()
                .map(|vessel| vessel.and_then(|v| run_task(model, v, cancel, timeout)))
                .collect()
        })
    }
}
