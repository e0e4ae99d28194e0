//! TOML-based scenario configuration and preset definitions.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;

use crate::error::SimResult;
use crate::model::{
    Asset, AssetGraph, AssetKind, Carrier, CarrierKind, ControlStrategy, Port, PortDirection,
};
use crate::profile::{DailyShape, ProfileKind, ProfileStore, Series};
use crate::sim::types::{DEFAULT_PRICE_MAX, DEFAULT_PRICE_MIN, SimulationSettings};

/// Top-level scenario configuration parsed from TOML.
///
/// Carriers and assets use the model types directly; see
/// [`crate::model`] for their fields. Load from TOML with
/// [`ScenarioConfig::from_toml_file`] or pick a built-in preset with
/// [`ScenarioConfig::from_preset`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Run timing and global parameters.
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub carriers: Vec<Carrier>,
    #[serde(default)]
    pub assets: Vec<Asset>,
    /// Time series referenced by ports and control strategies.
    #[serde(default)]
    pub profiles: Vec<ProfileConfig>,
}

/// Run timing and global parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Simulation id, prefixed to every network's provider name.
    pub id: String,
    /// Timestamp of the first step.
    pub start: DateTime<Utc>,
    /// Timestamp of the last step (inclusive).
    pub end: DateTime<Utc>,
    /// Step duration in seconds (must be > 0).
    pub step_seconds: i64,
    pub price_min: f64,
    pub price_max: f64,
    /// Worker threads, `0` for one per available core.
    pub workers: usize,
    /// Bound on a remotely governed asset's reply, in milliseconds.
    pub remote_timeout_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        // 2024-01-15T00:00:00Z
        let start = DateTime::from_timestamp(1_705_276_800, 0).unwrap_or_default();
        Self {
            id: "flownet".to_string(),
            start,
            end: start + TimeDelta::hours(23),
            step_seconds: 3600,
            price_min: DEFAULT_PRICE_MIN,
            price_max: DEFAULT_PRICE_MAX,
            workers: 0,
            remote_timeout_ms: 5000,
        }
    }
}

/// One time series, either listed explicitly or generated.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfileConfig {
    pub id: String,
    pub kind: ProfileKind,
    /// Timestamp of the first sample; defaults to the simulation start.
    pub start: Option<DateTime<Utc>>,
    /// Distance between samples in seconds.
    pub resolution_seconds: i64,
    /// Factor converting the listed values to W, J or a fraction.
    pub multiplier: f64,
    pub values: Vec<f64>,
    /// Daily sinusoid generated instead of `values`.
    pub synthetic: Option<DailyShape>,
    /// Random seed for the synthetic noise.
    pub seed: u64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            kind: ProfileKind::Power,
            start: None,
            resolution_seconds: 3600,
            multiplier: 1.0,
            values: Vec::new(),
            synthetic: None,
            seed: 42,
        }
    }
}

impl ProfileConfig {
    fn synthetic(id: &str, shape: DailyShape, seed: u64) -> Self {
        Self {
            id: id.to_string(),
            synthetic: Some(shape),
            seed,
            ..Self::default()
        }
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"simulation.step_seconds"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}: {}", self.field, self.message)
    }
}

impl ConfigError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl ScenarioConfig {
    /// Gas-fired district heating: a boiler and a solar collector feed two
    /// houses through a main pipe; the gas network clears after heat.
    pub fn district_heating() -> Self {
        let gas = Carrier {
            emission_factor: 5.6e-8,
            energy_content: 3.17e7,
            ..Carrier::new("gas", CarrierKind::Gas)
        };
        let assets = vec![
            Asset::new("gas_grid", AssetKind::Producer { renewable: false })
                .with_power(2.0e6)
                .with_cost(0.05)
                .with_port(Port::new("gas_grid.out", PortDirection::Out, "gas").connect("boiler.gas")),
            Asset::new("boiler", AssetKind::Conversion { efficiency: 0.9 })
                .with_power(1.0e6)
                .with_cost(0.3)
                .with_port(Port::new("boiler.gas", PortDirection::In, "gas"))
                .with_port(Port::new("boiler.heat", PortDirection::Out, "heat").connect("main.in"))
                .with_control(ControlStrategy::DrivenByDemand {
                    port: "boiler.heat".into(),
                }),
            Asset::new("solar_collector", AssetKind::Producer { renewable: true })
                .with_power(1.5e5)
                .with_port(
                    Port::new("solar_collector.out", PortDirection::Out, "heat")
                        .connect("main.in")
                        .with_profile("solar-heat"),
                ),
            Asset::new("main", AssetKind::Transport)
                .with_power(1.5e6)
                .with_port(Port::new("main.in", PortDirection::In, "heat"))
                .with_port(Port::new("main.out", PortDirection::Out, "heat")),
            Asset::new("house_a", AssetKind::Consumer).with_port(
                Port::new("house_a.in", PortDirection::In, "heat")
                    .connect("main.out")
                    .with_profile("heat-demand"),
            ),
            Asset::new("house_b", AssetKind::Consumer)
                .with_power(2.0e5)
                .with_cost(0.9)
                .with_port(Port::new("house_b.in", PortDirection::In, "heat").connect("main.out")),
        ];
        let profiles = vec![
            ProfileConfig::synthetic(
                "solar-heat",
                DailyShape {
                    base: 4.0e4,
                    amplitude: 6.0e4,
                    phase_rad: std::f64::consts::FRAC_PI_2,
                    noise_std: 5.0e3,
                },
                7,
            ),
            ProfileConfig::synthetic(
                "heat-demand",
                DailyShape {
                    base: 3.0e5,
                    amplitude: 1.0e5,
                    phase_rad: 4.7,
                    noise_std: 1.0e4,
                },
                3,
            ),
        ];

        Self {
            simulation: SimulationConfig {
                id: "district_heating".to_string(),
                ..SimulationConfig::default()
            },
            carriers: vec![gas, Carrier::new("heat", CarrierKind::Heat)],
            assets,
            profiles,
        }
    }

    /// All-electric heating: a heat pump with a buffer tank, fed by a power
    /// plant and a wind farm that also supply an office.
    pub fn heat_pump_chain() -> Self {
        let assets = vec![
            Asset::new("power_plant", AssetKind::Producer { renewable: false })
                .with_power(5.0e5)
                .with_cost(0.2)
                .with_port(Port::new("power_plant.out", PortDirection::Out, "elec").connect("cable.in")),
            Asset::new("wind_farm", AssetKind::Producer { renewable: true })
                .with_power(3.0e5)
                .with_port(
                    Port::new("wind_farm.out", PortDirection::Out, "elec")
                        .connect("cable.in")
                        .with_profile("wind"),
                ),
            Asset::new("cable", AssetKind::Transport)
                .with_power(1.0e6)
                .with_port(Port::new("cable.in", PortDirection::In, "elec"))
                .with_port(Port::new("cable.out", PortDirection::Out, "elec")),
            Asset::new("office", AssetKind::Consumer)
                .with_power(1.0e5)
                .with_cost(0.7)
                .with_port(Port::new("office.in", PortDirection::In, "elec").connect("cable.out")),
            Asset::new("heat_pump", AssetKind::HeatPump { cop: 3.5 })
                .with_power(2.0e5)
                .with_cost(0.1)
                .with_port(Port::new("heat_pump.elec", PortDirection::In, "elec").connect("cable.out"))
                .with_port(Port::new("heat_pump.heat", PortDirection::Out, "heat"))
                .with_control(ControlStrategy::DrivenByDemand {
                    port: "heat_pump.heat".into(),
                }),
            Asset::new(
                "buffer_tank",
                AssetKind::Storage {
                    capacity: 3.6e8,
                    max_charge_rate: 5.0e4,
                    max_discharge_rate: 5.0e4,
                    fill_level: 0.5,
                    charge_efficiency: 0.95,
                    discharge_efficiency: 0.95,
                },
            )
            .with_cost(0.15)
            .with_port(Port::new("buffer_tank.port", PortDirection::In, "heat").connect("heat_pump.heat")),
            Asset::new("flat", AssetKind::Consumer).with_port(
                Port::new("flat.in", PortDirection::In, "heat")
                    .connect("heat_pump.heat")
                    .with_profile("space-heating"),
            ),
        ];
        let profiles = vec![
            ProfileConfig::synthetic(
                "wind",
                DailyShape {
                    base: 1.5e5,
                    amplitude: 1.0e5,
                    phase_rad: 0.0,
                    noise_std: 2.0e4,
                },
                11,
            ),
            ProfileConfig::synthetic(
                "space-heating",
                DailyShape {
                    base: 1.0e5,
                    amplitude: 5.0e4,
                    phase_rad: 1.2,
                    noise_std: 5.0e3,
                },
                5,
            ),
        ];

        Self {
            simulation: SimulationConfig {
                id: "heat_pump_chain".to_string(),
                ..SimulationConfig::default()
            },
            carriers: vec![
                Carrier::new("elec", CarrierKind::Electricity).with_emission_factor(1.0e-7),
                Carrier::new("heat", CarrierKind::Heat),
            ],
            assets,
            profiles,
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["district_heating", "heat_pump_chain"];

    /// Loads a scenario from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "district_heating" => Ok(Self::district_heating()),
            "heat_pump_chain" => Ok(Self::heat_pump_chain()),
            _ => Err(ConfigError::new(
                "preset",
                format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            )),
        }
    }

    /// Parses a scenario from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::new("scenario", format!("cannot read \"{}\": {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a scenario from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid. References
    /// between carriers, ports and assets are checked later, when the
    /// [`AssetGraph`] is built.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let s = &self.simulation;

        if s.id.trim().is_empty() {
            errors.push(ConfigError::new("simulation.id", "must not be empty"));
        }
        if s.step_seconds <= 0 {
            errors.push(ConfigError::new("simulation.step_seconds", "must be > 0"));
        }
        if s.end < s.start {
            errors.push(ConfigError::new("simulation.end", "must be >= simulation.start"));
        }
        if s.price_min >= s.price_max {
            errors.push(ConfigError::new(
                "simulation.price_min",
                "must be < simulation.price_max",
            ));
        }
        if s.remote_timeout_ms == 0 {
            errors.push(ConfigError::new("simulation.remote_timeout_ms", "must be > 0"));
        }

        if self.carriers.is_empty() {
            errors.push(ConfigError::new("carriers", "at least one carrier is required"));
        }
        for (i, carrier) in self.carriers.iter().enumerate() {
            if carrier.emission_factor < 0.0 {
                errors.push(ConfigError::new(
                    format!("carriers[{i}].emission_factor"),
                    "must be >= 0",
                ));
            }
            if carrier.energy_content <= 0.0 {
                errors.push(ConfigError::new(
                    format!("carriers[{i}].energy_content"),
                    "must be > 0",
                ));
            }
        }

        if self.assets.is_empty() {
            errors.push(ConfigError::new("assets", "at least one asset is required"));
        }
        for (i, asset) in self.assets.iter().enumerate() {
            if asset.kind == AssetKind::Unsupported {
                errors.push(ConfigError::new(
                    format!("assets[{i}].kind"),
                    format!("asset \"{}\" has an unsupported kind", asset.id),
                ));
            }
            if asset.power.is_some_and(|p| p < 0.0) {
                errors.push(ConfigError::new(format!("assets[{i}].power"), "must be >= 0"));
            }
            if asset.cost.is_some_and(|c| !c.is_finite()) {
                errors.push(ConfigError::new(format!("assets[{i}].cost"), "must be finite"));
            }
        }

        let mut seen = HashSet::new();
        for (i, profile) in self.profiles.iter().enumerate() {
            if profile.id.is_empty() {
                errors.push(ConfigError::new(format!("profiles[{i}].id"), "must not be empty"));
            } else if !seen.insert(profile.id.as_str()) {
                errors.push(ConfigError::new(
                    format!("profiles[{i}].id"),
                    format!("profile \"{}\" declared twice", profile.id),
                ));
            }
            if profile.resolution_seconds <= 0 {
                errors.push(ConfigError::new(
                    format!("profiles[{i}].resolution_seconds"),
                    "must be > 0",
                ));
            }
            match (&profile.synthetic, profile.values.is_empty()) {
                (Some(_), false) => errors.push(ConfigError::new(
                    format!("profiles[{i}].values"),
                    "must be empty when synthetic is set",
                )),
                (None, true) => errors.push(ConfigError::new(
                    format!("profiles[{i}].values"),
                    "must not be empty unless synthetic is set",
                )),
                _ => {}
            }
        }

        errors
    }

    /// Run settings derived from the `[simulation]` section.
    pub fn settings(&self) -> SimulationSettings {
        let s = &self.simulation;
        SimulationSettings {
            price_min: s.price_min,
            price_max: s.price_max,
            workers: s.workers,
            remote_timeout: Duration::from_millis(s.remote_timeout_ms),
            ..SimulationSettings::new(s.start, s.end, TimeDelta::seconds(s.step_seconds))
        }
    }

    /// Profile store holding every configured series.
    ///
    /// Synthetic profiles are generated from their start up to the end of
    /// the last step.
    pub fn profile_store(&self) -> ProfileStore {
        let sim = &self.simulation;
        let until = sim.end + TimeDelta::seconds(sim.step_seconds.max(0));
        let mut store = ProfileStore::new();
        for profile in &self.profiles {
            let start = profile.start.unwrap_or(sim.start);
            let resolution = TimeDelta::seconds(profile.resolution_seconds.max(1));
            let series = match &profile.synthetic {
                Some(shape) => {
                    let span = (until - start).num_seconds().max(0);
                    let len = (span / resolution.num_seconds()) as usize + 1;
                    Series::synthetic_daily(profile.kind, start, resolution, len, shape, profile.seed)
                }
                None => Series::new(profile.kind, start, resolution, profile.values.clone()),
            };
            store.insert(profile.id.clone(), series.with_multiplier(profile.multiplier));
        }
        store
    }

    /// Builds the validated asset graph.
    ///
    /// # Errors
    ///
    /// Returns a structural error for duplicate ids, dangling references or
    /// ambiguous control strategies.
    pub fn asset_graph(&self) -> SimResult<AssetGraph> {
        AssetGraph::new(self.carriers.clone(), self.assets.clone())
    }
}
