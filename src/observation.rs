//! Observations and the sinks they are published to.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use crate::error::SimResult;

/// One measurement: a timestamp, identifying tags and numeric values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub tags: BTreeMap<String, String>,
    pub values: BTreeMap<String, f64>,
}

impl Observation {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            tags: BTreeMap::new(),
            values: BTreeMap::new(),
        }
    }

    pub fn tag(mut self, key: &str, value: impl Into<String>) -> Self {
        self.tags.insert(key.to_string(), value.into());
        self
    }

    pub fn value(mut self, key: &str, value: f64) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }

    pub fn set_value(&mut self, key: &str, value: f64) {
        self.values.insert(key.to_string(), value);
    }

    pub fn get_tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn get_value(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }
}

/// Downstream consumer of observations.
///
/// `publish` hands the observation off and must not block on delivery.
pub trait Publisher: Send + Sync {
    fn publish(&self, provider: &str, observation: Observation);

    /// Delivers everything published so far.
    fn flush(&self) -> SimResult<()> {
        Ok(())
    }
}

/// Keeps every observation in memory, mostly for tests and summaries.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    records: Mutex<Vec<(String, Observation)>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far, in publish order.
    pub fn records(&self) -> Vec<(String, Observation)> {
        self.records.lock().clone()
    }

    /// Observations whose tag `key` equals `value`.
    pub fn tagged(&self, key: &str, value: &str) -> Vec<Observation> {
        self.records
            .lock()
            .iter()
            .filter(|(_, o)| o.get_tag(key) == Some(value))
            .map(|(_, o)| o.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl Publisher for MemoryPublisher {
    fn publish(&self, provider: &str, observation: Observation) {
        self.records.lock().push((provider.to_string(), observation));
    }
}

/// Forwards every observation to several sinks.
#[derive(Default)]
pub struct FanOut {
    sinks: Vec<Arc<dyn Publisher>>,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn Publisher>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl Publisher for FanOut {
    fn publish(&self, provider: &str, observation: Observation) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.publish(provider, observation.clone());
            }
            last.publish(provider, observation);
        }
    }

    /// Flushes every sink; the first failure is returned after all were tried.
    fn flush(&self) -> SimResult<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.flush() {
                warn!(error = %e, "publisher flush failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
