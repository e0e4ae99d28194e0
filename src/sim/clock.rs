use chrono::{DateTime, TimeDelta, Utc};

/// A simulation clock that walks wall-clock timestamps from start to end.
///
/// The end timestamp is inclusive: a clock from 00:00 to 02:00 with an hourly
/// step yields three steps.
///
/// # Examples
///
/// ```
/// use chrono::{TimeDelta, TimeZone, Utc};
/// use flownet_sim::sim::clock::Clock;
///
/// let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
/// let mut clock = Clock::new(start, start + TimeDelta::hours(2), TimeDelta::hours(1));
/// let mut steps = Vec::new();
///
/// clock.run(|at| steps.push(at));
/// assert_eq!(steps.len(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct Clock {
    start: DateTime<Utc>,
    /// Timestamp of the next step
    current: DateTime<Utc>,
    end: DateTime<Utc>,
    step: TimeDelta,
}

impl Clock {
    /// Creates a clock positioned at `start`.
    ///
    /// # Arguments
    ///
    /// * `start` - Timestamp of the first step
    /// * `end` - Timestamp of the last step (inclusive)
    /// * `step` - Distance between two steps; a non-positive step yields no steps
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, step: TimeDelta) -> Self {
        Self {
            start,
            current: start,
            end,
            step,
        }
    }

    /// Advances the clock by one step.
    ///
    /// # Returns
    ///
    /// * `Some(at)` - The timestamp of the step before advancing
    /// * `None` - If the clock has passed its end
    pub fn tick(&mut self) -> Option<DateTime<Utc>> {
        if self.step <= TimeDelta::zero() || self.current > self.end {
            return None;
        }
        let at = self.current;
        self.current += self.step;
        Some(at)
    }

    /// Runs a function for each remaining step.
    ///
    /// # Arguments
    ///
    /// * `f` - Called with the timestamp of every step
    pub fn run(&mut self, mut f: impl FnMut(DateTime<Utc>)) {
        while let Some(at) = self.tick() {
            f(at);
        }
    }

    /// Number of steps between start and end, inclusive.
    pub fn total_steps(&self) -> u64 {
        if self.step <= TimeDelta::zero() || self.end < self.start {
            return 0;
        }
        let span = nanos(self.end - self.start);
        (span / nanos(self.step)) as u64 + 1
    }

    /// Fraction of the simulated period covered at `at`, clamped to `[0, 1]`.
    pub fn progress(&self, at: DateTime<Utc>) -> f64 {
        let total = (self.end - self.start).num_milliseconds() as f64;
        if total <= 0.0 {
            return 1.0;
        }
        let elapsed = (at - self.start).num_milliseconds() as f64;
        (elapsed / total).clamp(0.0, 1.0)
    }
}

/// Whole nanoseconds of a non-negative delta, without overflow.
fn nanos(delta: TimeDelta) -> i128 {
    i128::from(delta.num_seconds()) * 1_000_000_000 + i128::from(delta.subsec_nanos())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn tick_includes_end() {
        let mut clock = Clock::new(t0(), t0() + TimeDelta::hours(1), TimeDelta::minutes(30));
        assert_eq!(clock.tick(), Some(t0()));
        assert_eq!(clock.tick(), Some(t0() + TimeDelta::minutes(30)));
        assert_eq!(clock.tick(), Some(t0() + TimeDelta::hours(1)));
        assert_eq!(clock.tick(), None);
        assert_eq!(clock.total_steps(), 3);
    }

    #[test]
    fn end_before_start_never_ticks() {
        let mut clock = Clock::new(t0(), t0() - TimeDelta::hours(1), TimeDelta::hours(1));
        let mut was_called = false;
        clock.run(|_| was_called = true);
        assert!(!was_called);
        assert_eq!(clock.total_steps(), 0);
    }

    #[test]
    fn zero_step_never_ticks() {
        let mut clock = Clock::new(t0(), t0() + TimeDelta::hours(1), TimeDelta::zero());
        assert_eq!(clock.tick(), None);
    }

    #[test]
    fn sub_millisecond_step_counts_steps() {
        let clock = Clock::new(
            t0(),
            t0() + TimeDelta::milliseconds(2),
            TimeDelta::microseconds(500),
        );
        assert_eq!(clock.total_steps(), 5);
    }

    #[test]
    fn progress_is_elapsed_over_total() {
        let clock = Clock::new(t0(), t0() + TimeDelta::hours(4), TimeDelta::hours(1));
        assert_eq!(clock.progress(t0()), 0.0);
        assert_eq!(clock.progress(t0() + TimeDelta::hours(1)), 0.25);
        assert_eq!(clock.progress(t0() + TimeDelta::hours(9)), 1.0);
    }
}
