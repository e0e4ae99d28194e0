//! Node engine: one behavior per asset kind behind a single generic [`Node`].
//!
//! Every step a node first builds a bid [`Curve`] and later, once its network
//! has cleared, turns the cleared price into an allocation. Quantities are
//! joule per step in network convention: positive is consumption, negative
//! is production.

mod cogeneration;
mod consumer;
mod conversion;
mod heat_pump;
mod hybrid_heat_pump;
mod producer;
mod remote;
mod storage;
mod transport;

pub use consumer::ConsumerNode;
pub use conversion::ConversionNode;
pub use producer::ProducerNode;
pub use remote::{AllocationNotice, BidRequest, BidResponse, RemoteLogic, RemoteNode};
pub use storage::StorageNode;
pub use transport::TransportNode;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::curve::{Curve, PRICE_STEP};
use crate::error::{SimError, SimResult};
use crate::model::{Asset, AssetGraph, AssetKind, Carrier, PortId, Role};
use crate::observation::Observation;
use crate::profile::ProfileService;
use crate::sim::types::{Horizon, SimulationSettings};

/// Index of a node inside its network's arena.
pub type NodeId = usize;

/// Static placement of an asset inside one network.
#[derive(Debug, Clone)]
pub struct NodeSite {
    pub asset: Arc<Asset>,
    /// Carrier of the network the node lives in.
    pub carrier: Carrier,
    pub network_id: String,
    pub role: Role,
    /// Ports of the asset that belong to this network.
    pub ports: Vec<PortId>,
    /// Marginal cost seeding adjustable curves, normalized at init.
    pub cost: f64,
    /// `+1` unless a transport was reached through its OUT port.
    pub direction: f64,
    /// Port facing the parent node; `None` for the root.
    pub connecting_port: Option<PortId>,
}

impl NodeSite {
    /// Site with the asset's own cost (or its kind default) and a forward direction.
    pub fn new(asset: Arc<Asset>, carrier: Carrier, network_id: &str, role: Role) -> Self {
        let cost = asset.cost.unwrap_or(match asset.kind {
            AssetKind::Storage { .. } => storage::DEFAULT_STORAGE_COST,
            _ => 0.0,
        });
        let ports = asset
            .ports
            .iter()
            .filter(|p| p.carrier == carrier.id)
            .map(|p| p.id.clone())
            .collect();
        Self {
            asset,
            carrier,
            network_id: network_id.to_string(),
            role,
            ports,
            cost,
            direction: 1.0,
            connecting_port: None,
        }
    }

    pub fn with_ports(mut self, ports: Vec<PortId>) -> Self {
        self.ports = ports;
        self
    }

    pub fn asset_id(&self) -> &str {
        &self.asset.id
    }

    pub fn is_transport(&self) -> bool {
        self.role == Role::Transport
    }
}

/// Per-step inputs shared by all nodes of a network.
pub struct StepFrame<'a> {
    pub horizon: Horizon,
    pub price_min: f64,
    pub price_max: f64,
    pub profiles: &'a dyn ProfileService,
}

impl<'a> StepFrame<'a> {
    pub fn new(
        horizon: Horizon,
        settings: &SimulationSettings,
        profiles: &'a dyn ProfileService,
    ) -> Self {
        Self {
            horizon,
            price_min: settings.price_min,
            price_max: settings.price_max,
            profiles,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        self.horizon.start
    }

    pub fn seconds(&self) -> f64 {
        self.horizon.seconds()
    }

    pub fn inflexible(&self, quantity: f64) -> Curve {
        Curve::inflexible(quantity, self.price_min, self.price_max)
    }
}

/// Reporting fields a node derives from its allocation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Allocation {
    /// Emission caused by this node's operating point.
    pub emission: f64,
    pub cost: f64,
    pub fuel: Option<f64>,
    /// Transport utilisation, `|energy| / (step * capacity)`.
    pub load: Option<f64>,
    /// Transport flow along the IN → OUT orientation.
    pub flow: Option<f64>,
    pub fill_level: Option<f64>,
}

impl Allocation {
    pub fn write_to(&self, obs: &mut Observation) {
        obs.set_value("emission", self.emission);
        obs.set_value("cost", self.cost);
        let optional = [
            ("fuel", self.fuel),
            ("load", self.load),
            ("flow", self.flow),
            ("fill_level", self.fill_level),
        ];
        for (key, value) in optional {
            if let Some(v) = value {
                obs.set_value(key, v);
            }
        }
    }
}

/// What varies between asset kinds: how to bid and how to settle.
pub trait NodeBehavior {
    /// Bid curve for the step described by `frame`.
    fn build_curve(&mut self, site: &NodeSite, frame: &StepFrame<'_>) -> SimResult<Curve>;

    /// Settles the allocation `energy` at the cleared `price`.
    ///
    /// Writes port flows through the profile service and returns the
    /// reporting fields.
    fn allocate(
        &mut self,
        site: &NodeSite,
        frame: &StepFrame<'_>,
        energy: f64,
        price: f64,
    ) -> SimResult<Allocation>;

    /// Restores the state a fresh run starts from.
    fn reset(&mut self) {}

    /// Multiplies any cost the behavior keeps besides the site cost.
    fn scale_costs(&mut self, _factor: f64) {}

    /// Ports whose flows this node writes every step.
    fn written_ports(&self, site: &NodeSite) -> Vec<PortId> {
        site.ports.clone()
    }
}

/// Closed dispatch from asset kind to node behavior.
#[derive(Debug)]
pub enum Behavior {
    Producer(ProducerNode),
    Consumer(ConsumerNode),
    Transport(TransportNode),
    Conversion(ConversionNode),
    Storage(StorageNode),
    Remote(RemoteNode),
}

impl Behavior {
    /// Picks the behavior for a placed asset.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::UnsupportedAsset`] for kinds without a behavior,
    /// [`SimError::RemoteUnavailable`] for remotely governed assets without
    /// attached logic, and [`SimError::InvalidAsset`] when the asset lacks
    /// the ports or parameters its kind needs.
    pub fn for_site(
        graph: &AssetGraph,
        site: &NodeSite,
        settings: &SimulationSettings,
        remote: Option<&Arc<dyn RemoteLogic>>,
    ) -> SimResult<Self> {
        let asset = &site.asset;
        if matches!(asset.kind, AssetKind::Unsupported) {
            return Err(SimError::UnsupportedAsset {
                asset: asset.id.clone(),
            });
        }
        if site.is_transport() {
            return Ok(Behavior::Transport(TransportNode::new(asset)));
        }
        if asset.remote.is_some() {
            let logic = remote.ok_or_else(|| SimError::RemoteUnavailable {
                asset: asset.id.clone(),
            })?;
            return Ok(Behavior::Remote(RemoteNode::new(
                Arc::clone(logic),
                settings.remote_timeout,
            )));
        }
        match &asset.kind {
            AssetKind::Producer { renewable } => {
                Ok(Behavior::Producer(ProducerNode::new(site, *renewable)))
            }
            AssetKind::Consumer => Ok(Behavior::Consumer(ConsumerNode::new(site))),
            AssetKind::Storage { .. } => Ok(Behavior::Storage(StorageNode::new(site)?)),
            AssetKind::Conversion { .. }
            | AssetKind::HeatPump { .. }
            | AssetKind::CoGeneration { .. }
            | AssetKind::HybridHeatPump { .. } => {
                Ok(Behavior::Conversion(ConversionNode::new(graph, site)?))
            }
            AssetKind::Transport => Ok(Behavior::Transport(TransportNode::new(asset))),
            AssetKind::Unsupported => Err(SimError::UnsupportedAsset {
                asset: asset.id.clone(),
            }),
        }
    }

    fn as_dyn(&mut self) -> &mut dyn NodeBehavior {
        match self {
            Behavior::Producer(b) => b,
            Behavior::Consumer(b) => b,
            Behavior::Transport(b) => b,
            Behavior::Conversion(b) => b,
            Behavior::Storage(b) => b,
            Behavior::Remote(b) => b,
        }
    }

    fn as_ref_dyn(&self) -> &dyn NodeBehavior {
        match self {
            Behavior::Producer(b) => b,
            Behavior::Consumer(b) => b,
            Behavior::Transport(b) => b,
            Behavior::Conversion(b) => b,
            Behavior::Storage(b) => b,
            Behavior::Remote(b) => b,
        }
    }
}

/// Tree element wrapping one asset placed in one network.
///
/// Nodes live in an arena owned by their network; `parent` and `children`
/// are indices into that arena.
#[derive(Debug)]
pub struct Node {
    pub site: NodeSite,
    behavior: Behavior,
    /// Bid of the current step; for transports, the aggregate below them.
    pub curve: Curve,
    /// Allocation of the current step.
    pub energy: f64,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    active: bool,
}

impl Node {
    pub fn new(site: NodeSite, behavior: Behavior) -> Self {
        Self {
            site,
            behavior,
            curve: Curve::zero(),
            energy: 0.0,
            parent: None,
            children: Vec::new(),
            active: true,
        }
    }

    pub fn is_transport(&self) -> bool {
        self.site.is_transport()
    }

    pub fn behavior(&self) -> &Behavior {
        &self.behavior
    }

    /// Whether this node holds the designated port of a conversion strategy.
    ///
    /// `None` for nodes that are not conversions.
    pub fn conversion_primary(&self) -> Option<bool> {
        match &self.behavior {
            Behavior::Conversion(c) => Some(c.is_primary()),
            _ => None,
        }
    }

    pub fn written_ports(&self) -> Vec<PortId> {
        self.behavior.as_ref_dyn().written_ports(&self.site)
    }

    /// Builds and stores this step's curve.
    ///
    /// Assets outside their commissioning window bid a flat zero.
    pub fn build_curve(&mut self, frame: &StepFrame<'_>) -> SimResult<()> {
        self.active = self.site.asset.is_operational(frame.horizon.start);
        self.curve = if self.active {
            self.behavior.as_dyn().build_curve(&self.site, frame)?
        } else {
            frame.inflexible(0.0)
        };
        Ok(())
    }

    /// Sets `energy` from the cleared price and settles it.
    pub fn allocate(&mut self, frame: &StepFrame<'_>, price: f64) -> SimResult<Allocation> {
        self.energy = self.curve.value_at(price);
        if !self.active {
            return Ok(Allocation::default());
        }
        self.behavior
            .as_dyn()
            .allocate(&self.site, frame, self.energy, price)
    }

    pub fn reset(&mut self) {
        self.curve = Curve::zero();
        self.energy = 0.0;
        self.behavior.as_dyn().reset();
    }

    pub fn scale_costs(&mut self, factor: f64) {
        self.site.cost *= factor;
        self.behavior.as_dyn().scale_costs(factor);
    }

    /// Observation describing this node's allocation.
    pub fn observation(&self, at: DateTime<Utc>, seconds: f64, allocation: &Allocation) -> Observation {
        let asset = &self.site.asset;
        let mut obs = Observation::new(at)
            .tag("measurement", "allocation")
            .tag("asset_id", asset.id.as_str())
            .tag("asset_name", asset.name.as_str())
            .tag("asset_class", asset.kind.class_name())
            .tag("carrier_id", self.site.carrier.id.as_str())
            .tag("carrier_name", self.site.carrier.name.as_str())
            .tag("network_id", self.site.network_id.as_str())
            .tag("role", self.site.role.to_string())
            .value("energy", self.energy)
            .value("power", if seconds > 0.0 { self.energy / seconds } else { 0.0 });
        if let Some(sector) = &asset.sector {
            obs = obs.tag("sector", sector.as_str());
        }
        allocation.write_to(&mut obs);
        obs
    }
}

/// `{price_min: 0, cost: 0, cost+δ: -qmax, price_max: -qmax}`.
///
/// The knee is kept inside the price domain so that full output is always
/// reachable.
pub fn adjustable_production(qmax: f64, cost: f64, price_min: f64, price_max: f64) -> Curve {
    let knee = cost.clamp(price_min, (price_max - PRICE_STEP).max(price_min));
    Curve::builder()
        .set(price_min, 0.0)
        .set(knee, 0.0)
        .set(knee + PRICE_STEP, -qmax)
        .set(price_max, -qmax)
        .build()
}

/// `{price_min: qmax, cost: 0, price_max: 0}`.
///
/// A cost at the bottom of the domain is lifted by one price step so the
/// full-consumption point keeps its own key.
pub fn adjustable_consumption(qmax: f64, cost: f64, price_min: f64, price_max: f64) -> Curve {
    let knee = cost.clamp((price_min + PRICE_STEP).min(price_max), price_max);
    Curve::builder()
        .set(price_min, qmax)
        .set(knee, 0.0)
        .set(price_max, 0.0)
        .build()
}

/// Splits `energy` evenly over the site's ports and records it as their flow.
pub(crate) fn write_side_flows(site: &NodeSite, frame: &StepFrame<'_>, energy: f64) {
    if site.ports.is_empty() {
        return;
    }
    let share = energy / site.ports.len() as f64;
    for port in &site.ports {
        frame.profiles.write_flow(port, frame.at(), share);
    }
}

/// The profile prescribing this asset's flow on the site, if any.
///
/// A profile-driven strategy wins over a profile attached to a port.
pub(crate) fn site_profile(site: &NodeSite) -> Option<String> {
    use crate::model::ControlStrategy;

    if let Some(ControlStrategy::DrivenByProfile { port, profile }) = &site.asset.control {
        if site.ports.contains(port) {
            return Some(profile.clone());
        }
    }
    site.ports
        .iter()
        .filter_map(|id| site.asset.port(id))
        .find_map(|p| p.profile.clone())
}


#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use chrono::TimeDelta;

    use super::test_support::*;
    use super::*;
    use crate::profile::ProfileStore;

    #[test]
    fn production_curve_offers_nothing_below_cost() {
        let c = adjustable_production(50.0, 0.3, 0.0, 1.0);
        assert_eq!(c.value_at(0.0), 0.0);
        assert_eq!(c.value_at(0.3), 0.0);
        assert_abs_diff_eq!(c.value_at(0.31), -50.0, epsilon = 1e-9);
        assert_eq!(c.value_at(1.0), -50.0);
    }

    #[test]
    fn consumption_curve_falls_to_zero_at_cost() {
        let c = adjustable_consumption(40.0, 0.5, 0.0, 1.0);
        assert_eq!(c.value_at(0.0), 40.0);
        assert_abs_diff_eq!(c.value_at(0.25), 20.0, epsilon = 1e-9);
        assert_eq!(c.value_at(0.5), 0.0);
        assert_eq!(c.value_at(0.9), 0.0);

        let free = adjustable_consumption(40.0, 0.0, 0.0, 1.0);
        assert_eq!(free.value_at(0.0), 40.0);
        assert_eq!(free.value_at(0.5), 0.0);
    }

    #[test]
    fn decommissioned_asset_bids_zero_and_allocates_nothing() {
        let store = ProfileStore::new();
        let mut asset = Asset::new("p", AssetKind::Producer { renewable: false })
            .with_port(out_port("p.out", "heat"))
            .with_power(1000.0)
            .with_cost(0.2);
        asset.decommissioned = Some(horizon().start - TimeDelta::days(1));
        let site = site(asset, "heat", Role::Producer);
        let behavior = Behavior::Producer(ProducerNode::new(&site, false));
        let mut node = Node::new(site, behavior);

        let frame = frame(&store);
        node.build_curve(&frame).unwrap();
        assert_eq!(node.curve.value_at(0.9), 0.0);
        assert_eq!(node.allocate(&frame, 0.9).unwrap(), Allocation::default());
        assert_eq!(store.read_flow("p.out", frame.at()), None);
    }

    #[test]
    fn unsupported_kind_fails_loudly() {
        let graph = AssetGraph::new(
            vec![Carrier::new("heat", crate::model::CarrierKind::Heat)],
            Vec::new(),
        )
        .unwrap();
        let site = site(Asset::new("x", AssetKind::Unsupported), "heat", Role::Consumer);
        let settings = SimulationSettings::new(horizon().start, horizon().end(), TimeDelta::hours(1));
        let err = Behavior::for_site(&graph, &site, &settings, None).unwrap_err();
        assert!(matches!(err, SimError::UnsupportedAsset { .. }));
    }

    #[test]
    fn remote_asset_without_logic_is_rejected() {
        let graph = AssetGraph::new(
            vec![Carrier::new("heat", crate::model::CarrierKind::Heat)],
            Vec::new(),
        )
        .unwrap();
        let mut asset = Asset::new("r", AssetKind::Consumer).with_port(in_port("r.in", "heat"));
        asset.remote = Some("aggregator".into());
        let site = site(asset, "heat", Role::Consumer);
        let settings = SimulationSettings::new(horizon().start, horizon().end(), TimeDelta::hours(1));
        let err = Behavior::for_site(&graph, &site, &settings, None).unwrap_err();
        assert!(matches!(err, SimError::RemoteUnavailable { .. }));
    }
}
