//! Per-carrier networks: tree construction, clearing and ordering.
//!
//! A [`Network`] owns the node arena of one tree and runs the per-step
//! bid, clear and allocate cycle for it.

pub mod allocation;
pub mod order;
pub mod tree;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::SimResult;
use crate::model::{AssetGraph, AssetId, Carrier, PortId, Role};
use crate::nodes::{Behavior, Node, NodeId, NodeSite, StepFrame};
use crate::observation::Observation;
use crate::sim::context::SimulationContext;
use crate::sim::types::{Horizon, Lifecycle, Simulatable};

use self::allocation::Clearing;
use self::order::Boundary;
use self::tree::BuiltTree;

const ROOT: NodeId = 0;

/// Residual energy above which a clearing is reported as imbalanced.
pub const IMBALANCE_TOLERANCE: f64 = 1e-3;

/// One connected tree of assets sharing a carrier.
pub struct Network {
    id: String,
    /// Provider name of this network's observations.
    solver_id: String,
    carrier: Carrier,
    nodes: Vec<Node>,
    roles: BTreeMap<AssetId, Role>,
    devices: Vec<NodeId>,
    has_transport: bool,
    ctx: SimulationContext,
    lifecycle: Lifecycle,
    last_clearing: Option<Clearing>,
}

impl Network {
    /// Instantiates the nodes of a built tree.
    ///
    /// # Errors
    ///
    /// Propagates node construction failures, see [`Behavior::for_site`].
    pub fn new(graph: &AssetGraph, tree: BuiltTree, ctx: &SimulationContext) -> SimResult<Self> {
        let mut nodes = Vec::with_capacity(tree.layout.slots.len());
        for slot in tree.layout.slots {
            let mut site = NodeSite::new(slot.asset, tree.carrier.clone(), &tree.id, slot.role)
                .with_ports(slot.ports);
            site.direction = slot.direction;
            site.connecting_port = slot.connecting_port;

            let behavior = Behavior::for_site(graph, &site, &ctx.settings, ctx.remote.as_ref())?;
            let mut node = Node::new(site, behavior);
            node.parent = slot.parent;
            node.children = slot.children;
            nodes.push(node);
        }

        let devices: Vec<NodeId> = (0..nodes.len())
            .filter(|&i| !nodes[i].is_transport())
            .collect();
        let has_transport = devices.len() < nodes.len();

        Ok(Self {
            solver_id: format!("{}/{}", ctx.id, tree.id),
            id: tree.id,
            carrier: tree.carrier,
            nodes,
            roles: tree.roles,
            devices,
            has_transport,
            ctx: ctx.clone(),
            lifecycle: Lifecycle::Created,
            last_clearing: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn solver_id(&self) -> &str {
        &self.solver_id
    }

    pub fn carrier(&self) -> &Carrier {
        &self.carrier
    }

    pub fn has_transport(&self) -> bool {
        self.has_transport
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn roles(&self) -> &BTreeMap<AssetId, Role> {
        &self.roles
    }

    pub fn last_clearing(&self) -> Option<Clearing> {
        self.last_clearing
    }

    /// Conversion assets of this network, for cross-network ordering.
    pub fn boundaries(&self, index: usize) -> Vec<Boundary> {
        self.nodes
            .iter()
            .filter_map(|n| {
                n.conversion_primary().map(|primary| Boundary {
                    network: index,
                    asset: n.site.asset.id.clone(),
                    primary,
                })
            })
            .collect()
    }

    /// Every port a node of this network writes during a step.
    pub fn written_ports(&self) -> Vec<PortId> {
        self.nodes.iter().flat_map(Node::written_ports).collect()
    }

    fn clearing_observation(&self, at: DateTime<Utc>, clearing: &Clearing) -> Observation {
        Observation::new(at)
            .tag("measurement", "clearing")
            .tag("network_id", self.id.as_str())
            .tag("carrier_id", self.carrier.id.as_str())
            .value("price", clearing.price)
            .value("imbalance", clearing.imbalance)
    }
}

impl Simulatable for Network {
    fn init(&mut self, horizon: &Horizon) -> SimResult<()> {
        for node in &mut self.nodes {
            node.reset();
        }
        if let Some(factor) = allocation::normalize_costs(&mut self.nodes) {
            info!(network = %self.id, factor, "device costs normalized");
        }
        self.last_clearing = None;
        self.lifecycle = Lifecycle::Initialized;
        info!(
            network = %self.id,
            start = %horizon.start,
            nodes = self.nodes.len(),
            devices = self.devices.len(),
            "network initialized"
        );
        Ok(())
    }

    fn step(&mut self, at: DateTime<Utc>) -> SimResult<()> {
        self.lifecycle = Lifecycle::Running;
        let horizon = self.ctx.settings.horizon(at);
        let frame = StepFrame::new(horizon, &self.ctx.settings, self.ctx.profiles.as_ref());

        for node in &mut self.nodes {
            node.build_curve(&frame)?;
        }
        let total = allocation::aggregate(&mut self.nodes, ROOT);
        let clearing = allocation::clear(&total);
        debug!(
            network = %self.id,
            %at,
            price = clearing.price,
            imbalance = clearing.imbalance,
            "network cleared"
        );
        if clearing.imbalance.abs() > IMBALANCE_TOLERANCE {
            warn!(
                network = %self.id,
                %at,
                imbalance = clearing.imbalance,
                "supply and demand do not balance"
            );
        }

        let allocations = allocation::propagate(&mut self.nodes, ROOT, clearing.price, &frame)?;
        let seconds = frame.seconds();
        for (id, alloc) in allocations {
            let node = &self.nodes[id];
            self.ctx
                .publisher
                .publish(&self.solver_id, node.observation(at, seconds, &alloc));
            if node.is_transport() {
                continue;
            }
            let asset = node.site.asset_id();
            if node.energy < 0.0 {
                self.ctx.emissions.record_producer(
                    &self.id,
                    &self.carrier.id,
                    asset,
                    node.energy,
                    alloc.emission,
                );
            } else if node.energy > 0.0 {
                self.ctx
                    .emissions
                    .record_consumer(&self.id, &self.carrier.id, asset, node.energy);
            }
        }

        self.ctx
            .publisher
            .publish(&self.solver_id, self.clearing_observation(at, &clearing));
        self.last_clearing = Some(clearing);
        Ok(())
    }

    fn stop(&mut self) -> SimResult<()> {
        self.lifecycle = Lifecycle::Stopped;
        info!(network = %self.id, "network stopped");
        Ok(())
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn name(&self) -> &str {
        &self.id
    }
}
