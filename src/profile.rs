//! Time-series profiles and the per-port flow ledger.
//!
//! Nodes read input profiles through [`ProfileService`] and record the energy
//! crossing each port with [`ProfileService::write_flow`]. Read-through nodes
//! on a conversion's secondary networks read those flows back.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::sim::types::Horizon;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProfileError {
    #[error("unknown profile `{0}`")]
    Unknown(String),
    #[error("profile `{profile}` has no samples covering {at}")]
    OutOfRange { profile: String, at: DateTime<Utc> },
}

/// What the samples of a profile measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    /// Watt, averaged over a step.
    #[default]
    Power,
    /// Joule per sample, summed over a step.
    Energy,
    /// Fraction of a storage capacity.
    StateOfCharge,
    /// Price units, averaged over a step.
    Cost,
}

/// Profile access consumed by the nodes.
pub trait ProfileService: Send + Sync {
    fn has_profile(&self, id: &str) -> bool;

    fn profile_kind(&self, id: &str) -> Option<ProfileKind>;

    fn is_power_profile(&self, id: &str) -> bool {
        self.profile_kind(id) == Some(ProfileKind::Power)
    }

    fn is_energy_profile(&self, id: &str) -> bool {
        self.profile_kind(id) == Some(ProfileKind::Energy)
    }

    fn is_soc_profile(&self, id: &str) -> bool {
        self.profile_kind(id) == Some(ProfileKind::StateOfCharge)
    }

    /// Samples of `id` that fall inside the horizon, in standardized units.
    ///
    /// # Errors
    ///
    /// Returns a [`ProfileError`] if the profile is unknown or does not cover
    /// the horizon.
    fn read_profile(&self, id: &str, horizon: &Horizon) -> Result<Vec<f64>, ProfileError>;

    /// Records the energy entering the asset through `port` (negative when leaving).
    fn write_flow(&self, port: &str, at: DateTime<Utc>, energy: f64);

    fn read_flow(&self, port: &str, at: DateTime<Utc>) -> Option<f64>;
}

/// Energy in joule that profile `id` prescribes for the horizon.
///
/// Power profiles are averaged and multiplied by the step length, energy
/// profiles are summed. A failed read is logged and counts as zero.
pub fn step_energy(profiles: &dyn ProfileService, id: &str, horizon: &Horizon) -> f64 {
    match profiles.read_profile(id, horizon) {
        Ok(values) if profiles.is_energy_profile(id) => values.iter().sum(),
        Ok(values) => mean(&values) * horizon.seconds(),
        Err(e) => {
            warn!(profile = id, error = %e, "profile read failed, using zero");
            0.0
        }
    }
}

/// Mean sample value of `id` over the horizon, zero on a failed read.
pub fn step_mean(profiles: &dyn ProfileService, id: &str, horizon: &Horizon) -> f64 {
    match profiles.read_profile(id, horizon) {
        Ok(values) => mean(&values),
        Err(e) => {
            warn!(profile = id, error = %e, "profile read failed, using zero");
            0.0
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// A regularly sampled time series.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub kind: ProfileKind,
    pub start: DateTime<Utc>,
    pub resolution: TimeDelta,
    pub values: Vec<f64>,
    /// Factor turning stored values into standardized units (W, J, fraction).
    pub multiplier: f64,
}

impl Series {
    pub fn new(
        kind: ProfileKind,
        start: DateTime<Utc>,
        resolution: TimeDelta,
        values: Vec<f64>,
    ) -> Self {
        Self {
            kind,
            start,
            resolution,
            values,
            multiplier: 1.0,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Daily sinusoid with Gaussian noise, reproducible for a given seed.
    ///
    /// # Arguments
    ///
    /// * `kind` - What the generated samples measure
    /// * `start` - Timestamp of the first sample
    /// * `resolution` - Distance between samples
    /// * `len` - Number of samples
    /// * `shape` - Base level, amplitude, phase and noise of the curve
    /// * `seed` - Random seed for reproducible noise generation
    pub fn synthetic_daily(
        kind: ProfileKind,
        start: DateTime<Utc>,
        resolution: TimeDelta,
        len: usize,
        shape: &DailyShape,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let step_s = resolution.num_seconds() as f64;
        let values = (0..len)
            .map(|i| {
                let hour = (i as f64 * step_s / 3600.0) % 24.0;
                let angle = 2.0 * std::f64::consts::PI * hour / 24.0 - shape.phase_rad;
                let v = shape.base + shape.amplitude * angle.sin()
                    + gaussian_noise(&mut rng, shape.noise_std);
                v.max(0.0)
            })
            .collect();
        Self::new(kind, start, resolution, values)
    }

    /// Samples whose timestamps lie in `[horizon.start, horizon.end)`.
    ///
    /// When the series is coarser than the step, the sample covering
    /// `horizon.start` is returned instead.
    fn window(&self, horizon: &Horizon) -> Option<Vec<f64>> {
        let res = self.resolution.num_milliseconds();
        if res <= 0 || horizon.start < self.start {
            return None;
        }
        let offset = (horizon.start - self.start).num_milliseconds();
        let first = usize::try_from((offset + res - 1) / res).ok()?;
        let window: Vec<f64> = self
            .values
            .iter()
            .enumerate()
            .skip(first)
            .take_while(|(i, _)| self.start + self.resolution * (*i as i32) < horizon.end())
            .map(|(_, v)| v * self.multiplier)
            .collect();
        if !window.is_empty() {
            return Some(window);
        }
        let covering = usize::try_from(offset / res).ok()?;
        self.values.get(covering).map(|v| vec![v * self.multiplier])
    }
}

/// Shape parameters of a synthetic daily profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DailyShape {
    pub base: f64,
    pub amplitude: f64,
    /// Phase offset in radians (0 = crossing the base level upwards at midnight).
    pub phase_rad: f64,
    pub noise_std: f64,
}

impl Default for DailyShape {
    fn default() -> Self {
        Self {
            base: 1.0,
            amplitude: 0.5,
            phase_rad: 0.0,
            noise_std: 0.0,
        }
    }
}

/// Gaussian noise using the Box-Muller transform.
///
/// # Arguments
///
/// * `rng` - Random number generator
/// * `std_dev` - Standard deviation of the noise
///
/// # Returns
///
/// Random value from a Gaussian distribution with mean 0 and the given
/// standard deviation
pub fn gaussian_noise(rng: &mut StdRng, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return 0.0;
    }

    let u1: f64 = rng.random::<f64>().clamp(1e-12, 1.0);
    let u2: f64 = rng.random::<f64>();
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    z0 * std_dev
}

/// In-memory [`ProfileService`].
#[derive(Debug, Default)]
pub struct ProfileStore {
    series: HashMap<String, Series>,
    flows: RwLock<HashMap<String, BTreeMap<DateTime<Utc>, f64>>>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a series, replacing any previous one with the same id.
    pub fn insert(&mut self, id: impl Into<String>, series: Series) {
        self.series.insert(id.into(), series);
    }

    pub fn with_series(mut self, id: impl Into<String>, series: Series) -> Self {
        self.insert(id, series);
        self
    }

    /// Every flow recorded on `port`, ordered by timestamp.
    pub fn flows(&self, port: &str) -> Vec<(DateTime<Utc>, f64)> {
        self.flows
            .read()
            .get(port)
            .map(|m| m.iter().map(|(t, v)| (*t, *v)).collect())
            .unwrap_or_default()
    }
}

impl ProfileService for ProfileStore {
    fn has_profile(&self, id: &str) -> bool {
        self.series.contains_key(id)
    }

    fn profile_kind(&self, id: &str) -> Option<ProfileKind> {
        self.series.get(id).map(|s| s.kind)
    }

    fn read_profile(&self, id: &str, horizon: &Horizon) -> Result<Vec<f64>, ProfileError> {
        let series = self
            .series
            .get(id)
            .ok_or_else(|| ProfileError::Unknown(id.to_string()))?;
        series.window(horizon).ok_or_else(|| ProfileError::OutOfRange {
            profile: id.to_string(),
            at: horizon.start,
        })
    }

    fn write_flow(&self, port: &str, at: DateTime<Utc>, energy: f64) {
        self.flows
            .write()
            .entry(port.to_string())
            .or_default()
            .insert(at, energy);
    }

    fn read_flow(&self, port: &str, at: DateTime<Utc>) -> Option<f64> {
        self.flows.read().get(port).and_then(|m| m.get(&at).copied())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use chrono::TimeZone;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn quarter_hourly(kind: ProfileKind) -> Series {
        Series::new(
            kind,
            t0(),
            TimeDelta::minutes(15),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
        )
    }

    #[test]
    fn power_profile_is_averaged_over_the_step() {
        let store = ProfileStore::new().with_series("p", quarter_hourly(ProfileKind::Power));
        let h = Horizon::new(t0() + TimeDelta::hours(1), TimeDelta::hours(1));
        assert_eq!(store.read_profile("p", &h).unwrap(), vec![5.0, 6.0, 7.0, 8.0]);
        assert_abs_diff_eq!(step_energy(&store, "p", &h), 6.5 * 3600.0);
    }

    #[test]
    fn energy_profile_is_summed() {
        let store = ProfileStore::new().with_series("e", quarter_hourly(ProfileKind::Energy));
        let h = Horizon::new(t0(), TimeDelta::hours(1));
        assert_abs_diff_eq!(step_energy(&store, "e", &h), 10.0);
        assert!(store.is_energy_profile("e"));
        assert!(!store.is_power_profile("e"));
    }

    #[test]
    fn coarse_series_returns_covering_sample() {
        let hourly = Series::new(ProfileKind::Power, t0(), TimeDelta::hours(1), vec![10.0, 20.0]);
        let store = ProfileStore::new().with_series("h", hourly);
        let h = Horizon::new(t0() + TimeDelta::minutes(30), TimeDelta::minutes(15));
        assert_eq!(store.read_profile("h", &h).unwrap(), vec![10.0]);
    }

    #[test]
    fn multiplier_standardizes_units() {
        let kw = quarter_hourly(ProfileKind::Power).with_multiplier(1000.0);
        let store = ProfileStore::new().with_series("kw", kw);
        let h = Horizon::new(t0(), TimeDelta::minutes(15));
        assert_eq!(store.read_profile("kw", &h).unwrap(), vec![1000.0]);
    }

    #[test]
    fn failed_reads_fall_back_to_zero() {
        let store = ProfileStore::new().with_series("p", quarter_hourly(ProfileKind::Power));
        let late = Horizon::new(t0() + TimeDelta::days(3), TimeDelta::hours(1));
        assert!(matches!(
            store.read_profile("p", &late),
            Err(ProfileError::OutOfRange { .. })
        ));
        assert_eq!(step_energy(&store, "p", &late), 0.0);
        assert_eq!(step_mean(&store, "missing", &late), 0.0);
    }

    #[test]
    fn flows_are_keyed_by_port_and_timestamp() {
        let store = ProfileStore::new();
        store.write_flow("a", t0(), 5.0);
        store.write_flow("a", t0() + TimeDelta::hours(1), -2.0);
        store.write_flow("a", t0(), 7.0);
        assert_eq!(store.read_flow("a", t0()), Some(7.0));
        assert_eq!(store.read_flow("b", t0()), None);
        assert_eq!(store.flows("a").len(), 2);
    }

    #[test]
    fn synthetic_profile_is_reproducible_and_non_negative() {
        let shape = DailyShape {
            base: 1.0,
            amplitude: 1.5,
            phase_rad: 0.0,
            noise_std: 0.2,
        };
        let a = Series::synthetic_daily(ProfileKind::Power, t0(), TimeDelta::hours(1), 48, &shape, 7);
        let b = Series::synthetic_daily(ProfileKind::Power, t0(), TimeDelta::hours(1), 48, &shape, 7);
        assert_eq!(a.values, b.values);
        assert_eq!(a.values.len(), 48);
        assert!(a.values.iter().all(|v| *v >= 0.0));
    }
}
