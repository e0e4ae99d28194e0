//! Run state and progress, shared between the scheduler and observers.

use std::fmt;

use parking_lot::RwLock;
use serde::Serialize;

/// Status code of a failed run.
pub const STATUS_FAILED: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Created,
    Initializing,
    Running { step: u64 },
    Stopping,
    Finished,
    Error,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Created => f.write_str("created"),
            RunState::Initializing => f.write_str("initializing"),
            RunState::Running { .. } => f.write_str("running"),
            RunState::Stopping => f.write_str("stopping"),
            RunState::Finished => f.write_str("finished"),
            RunState::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: RunState,
    progress: f64,
    code: i32,
    description: String,
}

/// Serializable copy of the run status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub state: String,
    pub step: Option<u64>,
    pub progress: f64,
    pub code: i32,
    pub description: String,
}

/// Thread-safe run status. Once in [`RunState::Error`] it stays there.
#[derive(Debug)]
pub struct SimulationStatus {
    inner: RwLock<Inner>,
}

impl Default for SimulationStatus {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner {
                state: RunState::Created,
                progress: 0.0,
                code: 0,
                description: String::new(),
            }),
        }
    }
}

impl SimulationStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RunState {
        self.inner.read().state
    }

    pub fn is_failed(&self) -> bool {
        self.inner.read().state == RunState::Error
    }

    pub fn progress(&self) -> f64 {
        self.inner.read().progress
    }

    pub fn description(&self) -> String {
        self.inner.read().description.clone()
    }

    /// Moves to `state` unless the run already failed.
    pub fn set_state(&self, state: RunState) {
        let mut inner = self.inner.write();
        if inner.state != RunState::Error {
            inner.state = state;
        }
    }

    pub fn set_progress(&self, progress: f64) {
        self.inner.write().progress = progress.clamp(0.0, 1.0);
    }

    /// Records a failure. The first description wins.
    pub fn fail(&self, description: impl Into<String>) {
        let mut inner = self.inner.write();
        if inner.state == RunState::Error {
            return;
        }
        inner.state = RunState::Error;
        inner.code = STATUS_FAILED;
        inner.description = description.into();
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.read();
        StatusSnapshot {
            state: inner.state.to_string(),
            step: match inner.state {
                RunState::Running { step } => Some(step),
                _ => None,
            },
            progress: inner.progress,
            code: inner.code,
            description: inner.description.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_is_sticky_and_keeps_first_description() {
        let status = SimulationStatus::new();
        status.set_state(RunState::Running { step: 3 });
        status.fail("network heat-0 failed");
        status.fail("later failure");
        status.set_state(RunState::Finished);

        let snap = status.snapshot();
        assert_eq!(snap.state, "error");
        assert_eq!(snap.code, STATUS_FAILED);
        assert_eq!(snap.description, "network heat-0 failed");
    }

    #[test]
    fn running_snapshot_reports_step_and_clamped_progress() {
        let status = SimulationStatus::new();
        status.set_state(RunState::Running { step: 7 });
        status.set_progress(1.5);
        let snap = status.snapshot();
        assert_eq!(snap.step, Some(7));
        assert_eq!(snap.progress, 1.0);
        assert_eq!(snap.code, 0);
    }
}
