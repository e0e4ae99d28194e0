//! Partitioning of the asset graph into per-carrier trees.
//!
//! A tree is grown breadth-first from a root device over the port links of
//! one carrier. Transports and storage expand all their ports on the
//! carrier; conversion assets are boundaries and only expand the side they
//! were reached through.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{SimError, SimResult};
use crate::model::{Asset, AssetGraph, AssetId, AssetKind, Carrier, PortDirection, PortId, Role};

/// Which ports of an asset an entry covers on one carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Side {
    Whole,
    Inputs,
    Outputs,
}

impl Side {
    fn opposite(self) -> Side {
        match self {
            Side::Whole => Side::Whole,
            Side::Inputs => Side::Outputs,
            Side::Outputs => Side::Inputs,
        }
    }
}

/// One asset side that may be placed in a tree of a carrier.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub asset: Arc<Asset>,
    pub side: Side,
    pub role: Role,
    pub ports: Vec<PortId>,
}

impl Candidate {
    fn key(&self) -> (AssetId, Side) {
        (self.asset.id.clone(), self.side)
    }

    fn is_device(&self) -> bool {
        self.role != Role::Transport
    }
}

/// A placed candidate with its tree links.
#[derive(Debug, Clone)]
pub struct Slot {
    pub asset: Arc<Asset>,
    pub side: Side,
    pub role: Role,
    pub ports: Vec<PortId>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// `+1` unless a transport was reached through its OUT port.
    pub direction: f64,
    /// Port facing the parent; `None` for the root.
    pub connecting_port: Option<PortId>,
}

/// Slots of one tree, root first, in breadth-first order.
#[derive(Debug, Clone, Default)]
pub struct TreeLayout {
    pub slots: Vec<Slot>,
}

impl TreeLayout {
    pub fn device_count(&self) -> usize {
        self.slots.iter().filter(|s| s.role != Role::Transport).count()
    }

    pub fn transport_count(&self) -> usize {
        self.slots.iter().filter(|s| s.role == Role::Transport).count()
    }
}

/// A finished tree plus the role of every asset it holds.
#[derive(Debug, Clone)]
pub struct BuiltTree {
    pub id: String,
    pub carrier: Carrier,
    pub layout: TreeLayout,
    pub roles: BTreeMap<AssetId, Role>,
}

/// Every asset side that touches `carrier`, in declaration order.
pub fn candidates(graph: &AssetGraph, carrier: &Carrier) -> Vec<Candidate> {
    let mut out = Vec::new();
    for asset in graph.assets() {
        let on_carrier = |dir: Option<PortDirection>| -> Vec<PortId> {
            asset
                .ports
                .iter()
                .filter(|p| p.carrier == carrier.id && dir.is_none_or(|d| p.direction == d))
                .map(|p| p.id.clone())
                .collect()
        };

        if asset.kind.is_conversion() {
            let inputs = on_carrier(Some(PortDirection::In));
            if !inputs.is_empty() {
                out.push(Candidate {
                    asset: Arc::clone(asset),
                    side: Side::Inputs,
                    role: Role::Consumer,
                    ports: inputs,
                });
            }
            let outputs = on_carrier(Some(PortDirection::Out));
            if !outputs.is_empty() {
                out.push(Candidate {
                    asset: Arc::clone(asset),
                    side: Side::Outputs,
                    role: Role::Producer,
                    ports: outputs,
                });
            }
            continue;
        }

        let ports = on_carrier(None);
        if ports.is_empty() {
            continue;
        }
        out.push(Candidate {
            role: whole_role(asset),
            asset: Arc::clone(asset),
            side: Side::Whole,
            ports,
        });
    }
    out
}

fn whole_role(asset: &Asset) -> Role {
    match asset.kind {
        AssetKind::Producer { .. } => Role::Producer,
        AssetKind::Consumer => Role::Consumer,
        AssetKind::Transport => Role::Transport,
        AssetKind::Storage { .. } => Role::Both,
        _ => {
            if asset.inputs().next().is_none() {
                Role::Producer
            } else {
                Role::Consumer
            }
        }
    }
}

/// Root of the next tree: the largest producer, else a consumer, else a
/// storage.
fn pick_root(remaining: &[Candidate]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, c) in remaining.iter().enumerate() {
        if c.role != Role::Producer {
            continue;
        }
        match best {
            Some(b) if remaining[b].asset.capacity() >= c.asset.capacity() => {}
            _ => best = Some(i),
        }
    }
    best.or_else(|| remaining.iter().position(|c| c.role == Role::Consumer))
        .or_else(|| remaining.iter().position(|c| c.role == Role::Both))
}

/// Grows one tree from the best root among `remaining`.
///
/// Placed candidates are removed from `remaining`. Returns `None` when no
/// device is left to root a tree.
///
/// # Errors
///
/// Returns [`SimError::SelfLoop`] when both sides of a conversion asset
/// end up in the same tree.
pub fn build_tree(
    graph: &AssetGraph,
    carrier: &Carrier,
    remaining: &mut Vec<Candidate>,
) -> SimResult<Option<TreeLayout>> {
    let Some(root) = pick_root(remaining) else {
        return Ok(None);
    };
    let root = remaining.remove(root);

    let mut placed: HashSet<(AssetId, Side)> = HashSet::new();
    placed.insert(root.key());
    let mut layout = TreeLayout {
        slots: vec![slot(root, None, None, 1.0)],
    };
    let mut queue = VecDeque::from([0usize]);

    while let Some(current) = queue.pop_front() {
        let ports = layout.slots[current].ports.clone();
        for port in &ports {
            for peer in graph.peers(port) {
                let Some(owner) = graph.owner(peer) else {
                    continue;
                };
                let Some(peer_port) = owner.port(peer) else {
                    continue;
                };
                let side = if owner.kind.is_conversion() {
                    match peer_port.direction {
                        PortDirection::In => Side::Inputs,
                        PortDirection::Out => Side::Outputs,
                    }
                } else {
                    Side::Whole
                };
                let key = (owner.id.clone(), side);
                if placed.contains(&key) {
                    continue;
                }
                if side != Side::Whole && placed.contains(&(owner.id.clone(), side.opposite())) {
                    return Err(SimError::SelfLoop {
                        asset: owner.id.clone(),
                        carrier: carrier.id.clone(),
                    });
                }
                let Some(index) = remaining.iter().position(|c| c.key() == key) else {
                    continue;
                };
                let candidate = remaining.remove(index);
                let direction = if candidate.role == Role::Transport
                    && peer_port.direction == PortDirection::Out
                {
                    -1.0
                } else {
                    1.0
                };

                placed.insert(key);
                let child = layout.slots.len();
                layout
                    .slots
                    .push(slot(candidate, Some(current), Some(peer.clone()), direction));
                layout.slots[current].children.push(child);
                queue.push_back(child);
            }
        }
    }

    debug!(
        carrier = %carrier.id,
        root = %layout.slots[0].asset.id,
        nodes = layout.slots.len(),
        transports = layout.transport_count(),
        "tree built"
    );
    Ok(Some(layout))
}

fn slot(
    candidate: Candidate,
    parent: Option<usize>,
    connecting_port: Option<PortId>,
    direction: f64,
) -> Slot {
    Slot {
        asset: candidate.asset,
        side: candidate.side,
        role: candidate.role,
        ports: candidate.ports,
        parent,
        children: Vec::new(),
        direction,
        connecting_port,
    }
}

/// All trees of one carrier, named `{carrier}-{n}` from zero.
///
/// Components with at most one device cannot trade and are discarded with
/// a warning; transports left without devices are reported the same way.
///
/// # Errors
///
/// Returns [`SimError::NoRoot`] if the carrier has ports but no device at
/// all, and [`SimError::SelfLoop`] from [`build_tree`].
pub fn build_forest(graph: &AssetGraph, carrier: &Carrier) -> SimResult<Vec<BuiltTree>> {
    let mut remaining = candidates(graph, carrier);
    if remaining.is_empty() {
        return Ok(Vec::new());
    }
    if !remaining.iter().any(Candidate::is_device) {
        return Err(SimError::NoRoot {
            carrier: carrier.id.clone(),
        });
    }

    let mut trees = Vec::new();
    while let Some(layout) = build_tree(graph, carrier, &mut remaining)? {
        if layout.device_count() <= 1 {
            warn!(
                carrier = %carrier.id,
                root = %layout.slots[0].asset.id,
                "discarding network with a single device"
            );
            continue;
        }
        let roles = layout
            .slots
            .iter()
            .map(|s| (s.asset.id.clone(), s.role))
            .collect();
        trees.push(BuiltTree {
            id: format!("{}-{}", carrier.id, trees.len()),
            carrier: carrier.clone(),
            layout,
            roles,
        });
    }

    if !remaining.is_empty() {
        let left: Vec<&str> = remaining.iter().map(|c| c.asset.id.as_str()).collect();
        warn!(carrier = %carrier.id, assets = ?left, "transports not connected to any device");
    }
    Ok(trees)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CarrierKind, ControlStrategy, Port};

    fn port(id: &str, dir: PortDirection, carrier: &str) -> Port {
        Port::new(id, dir, carrier)
    }

    /// producer -> pipe -> consumer, plus a second pipe hanging off the first.
    fn district() -> AssetGraph {
        let plant = Asset::new("plant", AssetKind::Producer { renewable: false })
            .with_power(5.0)
            .with_port(port("plant.out", PortDirection::Out, "heat").connect("pipe.in"));
        let pipe = Asset::new("pipe", AssetKind::Transport)
            .with_port(port("pipe.in", PortDirection::In, "heat"))
            .with_port(port("pipe.out", PortDirection::Out, "heat").connect("spur.out"));
        let spur = Asset::new("spur", AssetKind::Transport)
            .with_port(port("spur.out", PortDirection::Out, "heat"))
            .with_port(port("spur.in", PortDirection::In, "heat").connect("house.in"));
        let house = Asset::new("house", AssetKind::Consumer)
            .with_port(port("house.in", PortDirection::In, "heat"));
        AssetGraph::new(
            vec![Carrier::new("heat", CarrierKind::Heat)],
            vec![plant, pipe, spur, house],
        )
        .unwrap()
    }

    #[test]
    fn four_node_tree_has_two_devices_and_transport_directions() {
        let graph = district();
        let heat = graph.carrier("heat").unwrap().clone();
        let trees = build_forest(&graph, &heat).unwrap();
        assert_eq!(trees.len(), 1);

        let tree = &trees[0];
        assert_eq!(tree.id, "heat-0");
        assert_eq!(tree.layout.slots.len(), 4);
        assert_eq!(tree.layout.device_count(), 2);
        assert_eq!(tree.layout.transport_count(), 2);
        assert_eq!(tree.layout.slots[0].asset.id, "plant");

        let pipe = tree.layout.slots.iter().find(|s| s.asset.id == "pipe").unwrap();
        assert_eq!(pipe.direction, 1.0);
        assert_eq!(pipe.connecting_port.as_deref(), Some("pipe.in"));
        let spur = tree.layout.slots.iter().find(|s| s.asset.id == "spur").unwrap();
        assert_eq!(spur.direction, -1.0);
        assert_eq!(tree.roles.get("house"), Some(&Role::Consumer));
    }

    #[test]
    fn largest_producer_roots_the_tree() {
        let small = Asset::new("small", AssetKind::Producer { renewable: true })
            .with_power(1.0)
            .with_port(port("small.out", PortDirection::Out, "heat").connect("house.in"));
        let big = Asset::new("big", AssetKind::Producer { renewable: false })
            .with_power(9.0)
            .with_port(port("big.out", PortDirection::Out, "heat").connect("house.in"));
        let house = Asset::new("house", AssetKind::Consumer)
            .with_port(port("house.in", PortDirection::In, "heat"));
        let graph = AssetGraph::new(
            vec![Carrier::new("heat", CarrierKind::Heat)],
            vec![small, big, house],
        )
        .unwrap();
        let trees = build_forest(&graph, graph.carrier("heat").unwrap()).unwrap();
        assert_eq!(trees[0].layout.slots[0].asset.id, "big");
        assert_eq!(trees[0].layout.slots.len(), 3);
    }

    #[test]
    fn lone_device_component_is_discarded() {
        let lone = Asset::new("lone", AssetKind::Consumer)
            .with_port(port("lone.in", PortDirection::In, "heat"));
        let graph =
            AssetGraph::new(vec![Carrier::new("heat", CarrierKind::Heat)], vec![lone]).unwrap();
        let trees = build_forest(&graph, graph.carrier("heat").unwrap()).unwrap();
        assert!(trees.is_empty());
    }

    #[test]
    fn transport_only_carrier_has_no_root() {
        let pipe = Asset::new("pipe", AssetKind::Transport)
            .with_port(port("pipe.in", PortDirection::In, "heat"));
        let graph =
            AssetGraph::new(vec![Carrier::new("heat", CarrierKind::Heat)], vec![pipe]).unwrap();
        let err = build_forest(&graph, graph.carrier("heat").unwrap()).unwrap_err();
        assert!(matches!(err, SimError::NoRoot { .. }));
    }

    #[test]
    fn conversion_splits_into_consumer_and_producer_trees() {
        let well = Asset::new("well", AssetKind::Producer { renewable: false })
            .with_port(port("well.out", PortDirection::Out, "gas").connect("boiler.in"));
        let boiler = Asset::new("boiler", AssetKind::Conversion { efficiency: 0.9 })
            .with_port(port("boiler.in", PortDirection::In, "gas"))
            .with_port(port("boiler.out", PortDirection::Out, "heat").connect("house.in"));
        let house = Asset::new("house", AssetKind::Consumer)
            .with_port(port("house.in", PortDirection::In, "heat"));
        let graph = AssetGraph::new(
            vec![
                Carrier::new("gas", CarrierKind::Gas),
                Carrier::new("heat", CarrierKind::Heat),
            ],
            vec![well, boiler, house],
        )
        .unwrap();

        let gas = build_forest(&graph, graph.carrier("gas").unwrap()).unwrap();
        let heat = build_forest(&graph, graph.carrier("heat").unwrap()).unwrap();
        assert_eq!(gas[0].roles.get("boiler"), Some(&Role::Consumer));
        assert_eq!(heat[0].roles.get("boiler"), Some(&Role::Producer));
        assert_eq!(heat[0].layout.slots[0].asset.id, "boiler");
    }

    #[test]
    fn both_sides_of_a_conversion_in_one_tree_is_a_self_loop() {
        let src = Asset::new("src", AssetKind::Producer { renewable: false })
            .with_port(port("src.out", PortDirection::Out, "heat").connect("booster.in"));
        let booster = Asset::new("booster", AssetKind::Conversion { efficiency: 0.9 })
            .with_port(port("booster.in", PortDirection::In, "heat"))
            .with_port(port("booster.out", PortDirection::Out, "heat").connect("src.out"))
            .with_control(ControlStrategy::DrivenByDemand {
                port: "booster.out".into(),
            });
        let graph = AssetGraph::new(
            vec![Carrier::new("heat", CarrierKind::Heat)],
            vec![src, booster],
        )
        .unwrap();
        let err = build_forest(&graph, graph.carrier("heat").unwrap()).unwrap_err();
        assert!(matches!(err, SimError::SelfLoop { .. }));
    }
}
