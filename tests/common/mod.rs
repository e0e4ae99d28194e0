//! Shared test fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use flownet_sim::model::{
    Asset, AssetGraph, AssetKind, Carrier, CarrierKind, ControlStrategy, Port, PortDirection,
};
use flownet_sim::observation::{MemoryPublisher, Publisher};
use flownet_sim::profile::{ProfileKind, ProfileService, ProfileStore, Series};
use flownet_sim::sim::context::SimulationContext;
use flownet_sim::sim::types::SimulationSettings;

/// Joule per hourly step of the house's 500 W demand.
pub const HOUSE_DEMAND_J: f64 = 500.0 * 3600.0;

/// Gas emitted per joule.
pub const GAS_EMISSION_FACTOR: f64 = 0.2;

pub const BOILER_EFFICIENCY: f64 = 0.8;

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Hourly settings covering `steps` steps (the end is inclusive).
pub fn settings(steps: i32, workers: usize) -> SimulationSettings {
    let mut settings = SimulationSettings::new(
        start(),
        start() + TimeDelta::hours(i64::from(steps) - 1),
        TimeDelta::hours(1),
    );
    settings.workers = workers;
    settings
}

/// Profile store with a flat 500 W `demand` series over two days.
pub fn demand_store() -> Arc<ProfileStore> {
    Arc::new(ProfileStore::new().with_series(
        "demand",
        Series::new(ProfileKind::Power, start(), TimeDelta::hours(1), vec![500.0; 48]),
    ))
}

pub fn context(
    settings: SimulationSettings,
    profiles: &Arc<ProfileStore>,
    publisher: &Arc<MemoryPublisher>,
) -> SimulationContext {
    let profiles: Arc<dyn ProfileService> = profiles.clone();
    let publisher: Arc<dyn Publisher> = publisher.clone();
    SimulationContext::new("it", settings, profiles, publisher)
}

pub fn carriers() -> Vec<Carrier> {
    vec![
        Carrier::new("gas", CarrierKind::Gas).with_emission_factor(GAS_EMISSION_FACTOR),
        Carrier::new("heat", CarrierKind::Heat),
    ]
}

/// Gas grid → boiler → house, the boiler driven by heat demand.
pub fn boiler_chain_assets(boiler_strategy: ControlStrategy) -> Vec<Asset> {
    vec![
        Asset::new("gas_grid", AssetKind::Producer { renewable: false })
            .with_power(10_000.0)
            .with_cost(0.1)
            .with_port(Port::new("gas_grid.out", PortDirection::Out, "gas").connect("boiler.in")),
        Asset::new(
            "boiler",
            AssetKind::Conversion {
                efficiency: BOILER_EFFICIENCY,
            },
        )
        .with_power(1000.0)
        .with_cost(0.3)
        .with_port(Port::new("boiler.in", PortDirection::In, "gas"))
        .with_port(Port::new("boiler.out", PortDirection::Out, "heat").connect("house.in"))
        .with_control(boiler_strategy),
        Asset::new("house", AssetKind::Consumer).with_port(
            Port::new("house.in", PortDirection::In, "heat").with_profile("demand"),
        ),
    ]
}

pub fn boiler_chain() -> AssetGraph {
    AssetGraph::new(
        carriers(),
        boiler_chain_assets(ControlStrategy::DrivenByDemand {
            port: "boiler.out".into(),
        }),
    )
    .unwrap()
}
