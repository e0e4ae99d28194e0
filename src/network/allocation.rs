//! Bottom-up aggregation, equilibrium clearing and top-down propagation.

use serde::Serialize;

use crate::curve::Curve;
use crate::error::SimResult;
use crate::nodes::{Allocation, Node, NodeId, StepFrame};

/// Outcome of clearing one network for one step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Clearing {
    pub price: f64,
    /// Residual of the aggregate at the cleared price; reported only.
    pub imbalance: f64,
}

/// Sum of the curves in the subtree rooted at `id`.
///
/// Transports store the aggregate below them as their own curve and pass it
/// up unchanged; devices add their own bid.
pub fn aggregate(nodes: &mut [Node], id: NodeId) -> Curve {
    let children = nodes[id].children.clone();
    let mut total = children
        .iter()
        .fold(Curve::zero(), |acc, &child| acc.sum(&aggregate(nodes, child)));

    let node = &mut nodes[id];
    if node.is_transport() {
        node.curve = total.clone();
    } else {
        total = total.sum(&node.curve);
    }
    total
}

/// Price at which the aggregate crosses zero.
pub fn clear(aggregate: &Curve) -> Clearing {
    let price = aggregate.price_at(0.0);
    Clearing {
        price,
        imbalance: aggregate.value_at(price),
    }
}

/// Allocates every node from the cleared price, parents before children.
///
/// # Errors
///
/// Stops at the first node whose allocation fails.
pub fn propagate(
    nodes: &mut [Node],
    root: NodeId,
    price: f64,
    frame: &StepFrame<'_>,
) -> SimResult<Vec<(NodeId, Allocation)>> {
    let mut out = Vec::with_capacity(nodes.len());
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let allocation = nodes[id].allocate(frame, price)?;
        out.push((id, allocation));
        stack.extend(nodes[id].children.iter().rev());
    }
    Ok(out)
}

/// Divides every device cost by the cost sum when that sum exceeds one.
///
/// Returns the applied factor, or `None` if costs were left alone.
pub fn normalize_costs(nodes: &mut [Node]) -> Option<f64> {
    let sum: f64 = nodes
        .iter()
        .filter(|n| !n.is_transport())
        .map(|n| n.site.cost)
        .sum();
    if sum <= 1.0 {
        return None;
    }
    let factor = 1.0 / sum;
    for node in nodes.iter_mut().filter(|n| !n.is_transport()) {
        node.scale_costs(factor);
    }
    Some(factor)
}
