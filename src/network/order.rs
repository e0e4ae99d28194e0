//! Execution ranks for networks that depend on each other's flows.

use std::collections::{BTreeMap, HashMap};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::{SimError, SimResult};

/// Rank to the indices of the networks cleared at that rank.
pub type RankMap = BTreeMap<usize, Vec<usize>>;

/// A conversion asset as seen from one network.
#[derive(Debug, Clone)]
pub struct Boundary {
    pub network: usize,
    pub asset: String,
    /// Whether the network holds the asset's designated strategy port.
    pub primary: bool,
}

/// `(before, after)` pairs: the network holding a conversion's designated
/// port clears before every other network holding that conversion.
///
/// # Errors
///
/// Returns [`SimError::OrphanStrategy`] when no network holds a
/// conversion's designated port, for instance because that side was
/// discarded as a single-device network. The remaining sides would have no
/// flow to read.
pub fn derive_constraints(boundaries: &[Boundary]) -> SimResult<Vec<(usize, usize)>> {
    let mut by_asset: BTreeMap<&str, Vec<&Boundary>> = BTreeMap::new();
    for b in boundaries {
        by_asset.entry(b.asset.as_str()).or_default().push(b);
    }

    let mut constraints = Vec::new();
    for (asset, seen) in by_asset {
        let Some(primary) = seen.iter().find(|b| b.primary) else {
            return Err(SimError::OrphanStrategy {
                asset: asset.to_string(),
            });
        };
        for other in seen.iter().filter(|b| b.network != primary.network) {
            let pair = (primary.network, other.network);
            if !constraints.contains(&pair) {
                constraints.push(pair);
            }
        }
    }
    Ok(constraints)
}

/// Assigns every network the length of the longest constraint path reaching
/// it, so each `before` lands on a strictly lower rank than its `after`.
///
/// # Arguments
///
/// * `ids` - Network identities, indexed like the constraint pairs
/// * `constraints` - `(before, after)` index pairs
///
/// # Errors
///
/// Returns [`SimError::CyclicOrder`] naming a network on a cycle.
pub fn order_networks(ids: &[String], constraints: &[(usize, usize)]) -> SimResult<RankMap> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..ids.len()).map(|i| graph.add_node(i)).collect();
    for &(before, after) in constraints {
        graph.add_edge(nodes[before], nodes[after], ());
    }

    let order = toposort(&graph, None).map_err(|cycle| SimError::CyclicOrder {
        network: ids
            .get(graph[cycle.node_id()])
            .cloned()
            .unwrap_or_default(),
    })?;

    let mut ranks: HashMap<NodeIndex, usize> = graph.node_indices().map(|n| (n, 0)).collect();
    for &u in &order {
        let current = ranks[&u];
        for v in graph.neighbors_directed(u, Direction::Outgoing) {
            if let Some(r) = ranks.get_mut(&v) {
                *r = (*r).max(current + 1);
            }
        }
    }

    let mut out = RankMap::new();
    for (i, node) in nodes.iter().enumerate() {
        out.entry(ranks[node]).or_default().push(i);
    }
    Ok(out)
}
