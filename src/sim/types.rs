//! Core simulation types: time windows, run settings and the lifecycle contract.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::error::SimResult;

/// Lower end of the default price domain.
pub const DEFAULT_PRICE_MIN: f64 = 0.0;
/// Upper end of the default price domain.
pub const DEFAULT_PRICE_MAX: f64 = 1.0;

/// The window of one step: "now" plus the step duration.
///
/// # Examples
///
/// ```
/// use chrono::{TimeDelta, TimeZone, Utc};
/// use flownet_sim::sim::types::Horizon;
///
/// let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
/// let h = Horizon::new(start, TimeDelta::hours(1));
/// assert_eq!(h.seconds(), 3600.0);
/// assert_eq!(h.end(), start + TimeDelta::hours(1));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Horizon {
    pub start: DateTime<Utc>,
    pub duration: TimeDelta,
}

impl Horizon {
    pub fn new(start: DateTime<Utc>, duration: TimeDelta) -> Self {
        Self { start, duration }
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + self.duration
    }

    /// Step length in seconds, used to turn watt into joule per step.
    pub fn seconds(&self) -> f64 {
        self.duration.num_milliseconds() as f64 / 1000.0
    }
}

/// Run-wide parameters every network and node sees.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationSettings {
    pub start: DateTime<Utc>,
    /// Last step timestamp, inclusive.
    pub end: DateTime<Utc>,
    pub step: TimeDelta,
    pub price_min: f64,
    pub price_max: f64,
    /// Worker threads; `0` sizes the pool to the available parallelism.
    pub workers: usize,
    /// Bound on the wait for a remotely governed asset's reply.
    pub remote_timeout: Duration,
}

impl SimulationSettings {
    /// Settings with the default price domain, an automatic pool size and a
    /// five second remote timeout.
    ///
    /// # Arguments
    ///
    /// * `start` - Timestamp of the first step
    /// * `end` - Timestamp of the last step (inclusive)
    /// * `step` - Step duration
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, step: TimeDelta) -> Self {
        Self {
            start,
            end,
            step,
            price_min: DEFAULT_PRICE_MIN,
            price_max: DEFAULT_PRICE_MAX,
            workers: 0,
            remote_timeout: Duration::from_secs(5),
        }
    }

    /// Horizon of the step starting at `at`.
    pub fn horizon(&self, at: DateTime<Utc>) -> Horizon {
        Horizon::new(at, self.step)
    }
}

/// Coarse lifecycle of a [`Simulatable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Created,
    Initialized,
    Running,
    Stopped,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Lifecycle::Created => "created",
            Lifecycle::Initialized => "initialized",
            Lifecycle::Running => "running",
            Lifecycle::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Anything the scheduler drives through Init → Step* → Stop.
///
/// Networks and the emission attributor implement this. Calls for one
/// instance never overlap; calls for different instances may run on
/// different worker threads at the same time.
pub trait Simulatable: Send {
    /// Prepares for a run over the horizon starting at the first step.
    fn init(&mut self, horizon: &Horizon) -> SimResult<()>;

    /// Executes the step starting at `at`.
    fn step(&mut self, at: DateTime<Utc>) -> SimResult<()>;

    fn stop(&mut self) -> SimResult<()>;

    fn lifecycle(&self) -> Lifecycle;

    /// Identity used in logs and failure descriptions.
    fn name(&self) -> &str;
}
