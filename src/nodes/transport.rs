use super::{Allocation, NodeBehavior, NodeSite, StepFrame};
use crate::curve::Curve;
use crate::error::SimResult;
use crate::model::{Asset, PortId};

/// Pipe or cable. Never bids; the network stores the aggregate below it as
/// its curve so its allocation is the net flow through it.
#[derive(Debug, Clone)]
pub struct TransportNode {
    /// Watt.
    capacity: f64,
}

impl TransportNode {
    pub fn new(asset: &Asset) -> Self {
        Self {
            capacity: asset.capacity(),
        }
    }
}

impl NodeBehavior for TransportNode {
    fn build_curve(&mut self, _site: &NodeSite, _frame: &StepFrame<'_>) -> SimResult<Curve> {
        Ok(Curve::zero())
    }

    fn allocate(
        &mut self,
        site: &NodeSite,
        frame: &StepFrame<'_>,
        energy: f64,
        _price: f64,
    ) -> SimResult<Allocation> {
        let span = frame.seconds() * self.capacity;
        let load = (span > 0.0).then(|| energy.abs() / span);
        Ok(Allocation {
            load,
            flow: Some(site.direction * energy),
            ..Allocation::default()
        })
    }

    fn written_ports(&self, _site: &NodeSite) -> Vec<PortId> {
        Vec::new()
    }
}
