//! Barrier-synchronized time stepping over a fixed worker pool.
//!
//! Every phase (init, one rank of one step, the finalizers of a step, stop)
//! fans its tasks out to the pool and waits on a [`CountdownLatch`]. A task
//! that fails or panics marks the run as failed; the scheduler notices after
//! the barrier and aborts.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{error, info, warn};

use super::clock::Clock;
use super::latch::CountdownLatch;
use super::status::{RunState, SimulationStatus};
use super::types::{Horizon, Simulatable, SimulationSettings};
use crate::error::{SimError, SimResult};
use crate::observation::Publisher;

/// A simulatable shared between the scheduler and whoever built it.
pub type SharedSimulatable = Arc<Mutex<dyn Simulatable>>;

#[derive(Debug, Clone, Copy)]
enum Phase {
    Init(Horizon),
    Step(DateTime<Utc>),
    Stop,
}

/// Drives ranked simulatables through Init → Step* → Stop.
pub struct Scheduler {
    pool: ThreadPool,
    status: Arc<SimulationStatus>,
}

impl Scheduler {
    /// # Arguments
    ///
    /// * `workers` - Pool size; `0` uses the available parallelism
    /// * `status` - Status surface updated while running
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Pool`] if the worker threads cannot be spawned.
    pub fn new(workers: usize, status: Arc<SimulationStatus>) -> SimResult<Self> {
        let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("flownet-worker-{i}"));
        if workers > 0 {
            builder = builder.num_threads(workers);
        }
        let pool = builder.build().map_err(|e| SimError::Pool(e.to_string()))?;
        Ok(Self { pool, status })
    }

    pub fn status(&self) -> &Arc<SimulationStatus> {
        &self.status
    }

    /// Runs the whole simulation.
    ///
    /// Each step clears `ranks` in ascending order, every rank waiting for
    /// the previous one, then steps the `finalizers`. The publisher is
    /// flushed once everything has stopped; a failed flush is only logged.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Aborted`] with the first failure's description
    /// once a task has failed.
    pub fn run(
        &self,
        settings: &SimulationSettings,
        ranks: &[Vec<SharedSimulatable>],
        finalizers: &[SharedSimulatable],
        publisher: &dyn Publisher,
    ) -> SimResult<()> {
        let everything: Vec<SharedSimulatable> = ranks
            .iter()
            .flatten()
            .chain(finalizers)
            .cloned()
            .collect();
        let mut clock = Clock::new(settings.start, settings.end, settings.step);

        self.status.set_state(RunState::Initializing);
        self.status.set_progress(0.0);
        info!(
            tasks = everything.len(),
            ranks = ranks.len(),
            steps = clock.total_steps(),
            threads = self.pool.current_num_threads(),
            "simulation starting"
        );
        self.phase(&everything, Phase::Init(settings.horizon(settings.start)))?;

        let mut step = 0;
        while let Some(at) = clock.tick() {
            self.status.set_state(RunState::Running { step });
            for tasks in ranks {
                self.phase(tasks, Phase::Step(at))?;
            }
            self.phase(finalizers, Phase::Step(at))?;
            self.status.set_progress(clock.progress(at + settings.step));
            step += 1;
        }

        self.status.set_state(RunState::Stopping);
        self.phase(&everything, Phase::Stop)?;
        if let Err(e) = publisher.flush() {
            warn!(error = %e, "publisher flush failed");
        }
        self.status.set_progress(1.0);
        self.status.set_state(RunState::Finished);
        info!(steps = step, "simulation finished");
        Ok(())
    }

    /// Runs `phase` on every task concurrently and waits for all of them.
    fn phase(&self, tasks: &[SharedSimulatable], phase: Phase) -> SimResult<()> {
        let latch = CountdownLatch::new(tasks.len());
        for task in tasks {
            let task = Arc::clone(task);
            let guard = latch.guard();
            let status = Arc::clone(&self.status);
            self.pool.spawn(move || {
                let _guard = guard;
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    let mut task = task.lock();
                    let result = match phase {
                        Phase::Init(horizon) => task.init(&horizon),
                        Phase::Step(at) => task.step(at),
                        Phase::Stop => task.stop(),
                    };
                    result.map_err(|e| format!("{} failed: {e}", task.name()))
                }));
                let description = match outcome {
                    Ok(Ok(())) => return,
                    Ok(Err(description)) => description,
                    Err(payload) => format!("task panicked: {}", panic_message(&*payload)),
                };
                error!(%description, ?phase, "simulation task failed");
                status.fail(description);
            });
        }
        latch.wait();

        if self.status.is_failed() {
            return Err(SimError::Aborted(self.status.description()));
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
