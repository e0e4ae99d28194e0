use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AssetId, CarrierId, PortId, ProfileId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    In,
    Out,
}

/// A typed connection point of an asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Port {
    pub id: PortId,
    pub direction: PortDirection,
    pub carrier: CarrierId,
    /// Peer ports; connections are symmetric, listing them on one side is enough.
    #[serde(default)]
    pub connected_to: Vec<PortId>,
    #[serde(default)]
    pub profile: Option<ProfileId>,
}

impl Port {
    pub fn new(id: impl Into<String>, direction: PortDirection, carrier: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            direction,
            carrier: carrier.into(),
            connected_to: Vec::new(),
            profile: None,
        }
    }

    pub fn connect(mut self, peer: impl Into<String>) -> Self {
        self.connected_to.push(peer.into());
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }
}

/// How an asset decides its operating point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case", deny_unknown_fields)]
pub enum ControlStrategy {
    /// Flexible on the network of the designated output port.
    DrivenByDemand { port: PortId },
    /// Flexible on the network of the designated input port.
    DrivenBySupply { port: PortId },
    /// Flat, read from a profile, on the network of the designated port.
    DrivenByProfile { port: PortId, profile: ProfileId },
    /// Storage bidding; optional cost profiles replace the derived breakpoints.
    Storage {
        #[serde(default)]
        charge_cost_profile: Option<ProfileId>,
        #[serde(default)]
        discharge_cost_profile: Option<ProfileId>,
    },
}

impl ControlStrategy {
    /// The designated port, for strategies that have one.
    pub fn port(&self) -> Option<&PortId> {
        match self {
            ControlStrategy::DrivenByDemand { port }
            | ControlStrategy::DrivenBySupply { port }
            | ControlStrategy::DrivenByProfile { port, .. } => Some(port),
            ControlStrategy::Storage { .. } => None,
        }
    }
}

/// Closed set of asset kinds with their kind-specific parameters.
///
/// Anything not listed deserializes to [`AssetKind::Unsupported`], which
/// fails loudly when a node is created for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssetKind {
    Producer {
        #[serde(default)]
        renewable: bool,
    },
    Consumer,
    /// Pipe, cable or any other link; `power` is its capacity.
    Transport,
    /// Single input, single output; `power` is the output capacity.
    Conversion { efficiency: f64 },
    /// `power` is the heat output capacity.
    HeatPump { cop: f64 },
    /// `power` is the fuel input capacity.
    CoGeneration {
        heat_efficiency: f64,
        electrical_efficiency: f64,
    },
    /// Electric heat pump backed by a gas boiler for the remaining demand.
    HybridHeatPump {
        cop: f64,
        gas_efficiency: f64,
        heat_pump_power: f64,
        boiler_power: f64,
        boiler_cost: f64,
    },
    Storage {
        /// Joule.
        capacity: f64,
        /// Watt.
        max_charge_rate: f64,
        /// Watt.
        max_discharge_rate: f64,
        /// Initial fill as a fraction of capacity.
        #[serde(default)]
        fill_level: f64,
        #[serde(default = "unit_efficiency")]
        charge_efficiency: f64,
        #[serde(default = "unit_efficiency")]
        discharge_efficiency: f64,
    },
    #[serde(other)]
    Unsupported,
}

fn unit_efficiency() -> f64 {
    1.0
}

impl AssetKind {
    /// Class name reported in observations.
    pub fn class_name(&self) -> &'static str {
        match self {
            AssetKind::Producer { .. } => "Producer",
            AssetKind::Consumer => "Consumer",
            AssetKind::Transport => "Transport",
            AssetKind::Conversion { .. } => "Conversion",
            AssetKind::HeatPump { .. } => "HeatPump",
            AssetKind::CoGeneration { .. } => "CoGeneration",
            AssetKind::HybridHeatPump { .. } => "HybridHeatPump",
            AssetKind::Storage { .. } => "Storage",
            AssetKind::Unsupported => "Unsupported",
        }
    }

    /// Kinds that sit on the boundary between networks.
    pub fn is_conversion(&self) -> bool {
        matches!(
            self,
            AssetKind::Conversion { .. }
                | AssetKind::HeatPump { .. }
                | AssetKind::CoGeneration { .. }
                | AssetKind::HybridHeatPump { .. }
        )
    }
}

/// An externally supplied asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(flatten)]
    pub kind: AssetKind,
    #[serde(default)]
    pub ports: Vec<Port>,
    #[serde(default)]
    pub control: Option<ControlStrategy>,
    /// Marginal cost in price units.
    #[serde(default)]
    pub cost: Option<f64>,
    /// Capacity in watt.
    #[serde(default)]
    pub power: Option<f64>,
    #[serde(default)]
    pub commissioned: Option<DateTime<Utc>>,
    #[serde(default)]
    pub decommissioned: Option<DateTime<Utc>>,
    /// Identity of the external party governing this asset.
    #[serde(default)]
    pub remote: Option<String>,
}

impl Asset {
    pub fn new(id: impl Into<String>, kind: AssetKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            sector: None,
            kind,
            ports: Vec::new(),
            control: None,
            cost: None,
            power: None,
            commissioned: None,
            decommissioned: None,
            remote: None,
        }
    }

    pub fn with_port(mut self, port: Port) -> Self {
        self.ports.push(port);
        self
    }

    pub fn with_power(mut self, watt: f64) -> Self {
        self.power = Some(watt);
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn with_control(mut self, control: ControlStrategy) -> Self {
        self.control = Some(control);
        self
    }

    pub fn port(&self, id: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.id == id)
    }

    pub fn inputs(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter().filter(|p| p.direction == PortDirection::In)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter().filter(|p| p.direction == PortDirection::Out)
    }

    pub fn capacity(&self) -> f64 {
        self.power.unwrap_or(0.0)
    }

    /// Whether the commissioning window includes `at`.
    pub fn is_operational(&self, at: DateTime<Utc>) -> bool {
        self.commissioned.is_none_or(|c| c <= at) && self.decommissioned.is_none_or(|d| at < d)
    }
}
