//! Asset model: carriers, assets, ports, control strategies and the graph
//! connecting them.
//!
//! The model is externally supplied and read-only once the simulation is
//! built. The only mutation the simulator performs is defaulting a missing
//! control strategy while constructing the [`AssetGraph`].

mod asset;
mod graph;

pub use asset::{Asset, AssetKind, ControlStrategy, Port, PortDirection};
pub use graph::AssetGraph;

use std::fmt;

use serde::{Deserialize, Serialize};

pub type CarrierId = String;
pub type AssetId = String;
pub type PortId = String;
pub type ProfileId = String;

/// Physical nature of a carrier; conversions use it to tell their ports apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarrierKind {
    Heat,
    Electricity,
    Gas,
    #[default]
    Other,
}

/// A commodity distributed by one or more networks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Carrier {
    pub id: CarrierId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: CarrierKind,
    /// Emission caused per joule of this carrier.
    #[serde(default)]
    pub emission_factor: f64,
    /// Joule per unit of fuel, used to report fuel quantities.
    #[serde(default = "default_energy_content")]
    pub energy_content: f64,
}

fn default_energy_content() -> f64 {
    1.0
}

impl Carrier {
    pub fn new(id: impl Into<String>, kind: CarrierKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            emission_factor: 0.0,
            energy_content: 1.0,
        }
    }

    pub fn with_emission_factor(mut self, factor: f64) -> Self {
        self.emission_factor = factor;
        self
    }
}

/// Functional position of an asset within one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Producer,
    Consumer,
    Transport,
    Both,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Producer => "PRODUCER",
            Role::Consumer => "CONSUMER",
            Role::Transport => "TRANSPORT",
            Role::Both => "BOTH",
        };
        f.write_str(s)
    }
}
