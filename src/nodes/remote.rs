use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{Allocation, NodeBehavior, NodeSite, StepFrame, write_side_flows};
use crate::curve::{Curve, Point};
use crate::error::{SimError, SimResult};
use crate::model::Role;

/// What a remotely governed asset is asked to bid for.
#[derive(Debug, Clone, PartialEq)]
pub struct BidRequest {
    pub asset_id: String,
    pub network_id: String,
    pub role: Role,
    pub at: DateTime<Utc>,
    /// Step length in seconds.
    pub seconds: f64,
    pub price_min: f64,
    pub price_max: f64,
}

/// Breakpoints of the remote bid, or the remote party's failure message.
pub type BidResponse = Result<Vec<Point>, String>;

/// The cleared outcome reported back to the remote party.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationNotice {
    pub asset_id: String,
    pub network_id: String,
    pub at: DateTime<Utc>,
    pub energy: f64,
    pub price: f64,
}

/// Bridge to whoever governs remote assets.
///
/// `request_bid` returns immediately with the receiving end of a one-shot
/// reply channel; the node bounds its wait on that channel.
pub trait RemoteLogic: Send + Sync {
    fn request_bid(&self, request: BidRequest) -> Receiver<BidResponse>;

    fn notify_allocation(&self, notice: AllocationNotice);
}

/// Asset whose bid and allocation are delegated to a [`RemoteLogic`].
pub struct RemoteNode {
    logic: Arc<dyn RemoteLogic>,
    timeout: Duration,
}

impl fmt::Debug for RemoteNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteNode")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RemoteNode {
    pub fn new(logic: Arc<dyn RemoteLogic>, timeout: Duration) -> Self {
        Self { logic, timeout }
    }
}

impl NodeBehavior for RemoteNode {
    fn build_curve(&mut self, site: &NodeSite, frame: &StepFrame<'_>) -> SimResult<Curve> {
        let request = BidRequest {
            asset_id: site.asset.id.clone(),
            network_id: site.network_id.clone(),
            role: site.role,
            at: frame.at(),
            seconds: frame.seconds(),
            price_min: frame.price_min,
            price_max: frame.price_max,
        };
        let reply = self.logic.request_bid(request);

        match reply.recv_timeout(self.timeout) {
            Ok(Ok(points)) => {
                debug!(asset = %site.asset.id, points = points.len(), "remote bid received");
                Ok(Curve::from_points(points))
            }
            Ok(Err(message)) => Err(SimError::Remote {
                asset: site.asset.id.clone(),
                message,
            }),
            Err(RecvTimeoutError::Timeout) => Err(SimError::RemoteTimeout {
                asset: site.asset.id.clone(),
                timeout: self.timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(SimError::Remote {
                asset: site.asset.id.clone(),
                message: "reply channel closed without an answer".into(),
            }),
        }
    }

    fn allocate(
        &mut self,
        site: &NodeSite,
        frame: &StepFrame<'_>,
        energy: f64,
        price: f64,
    ) -> SimResult<Allocation> {
        self.logic.notify_allocation(AllocationNotice {
            asset_id: site.asset.id.clone(),
            network_id: site.network_id.clone(),
            at: frame.at(),
            energy,
            price,
        });
        write_side_flows(site, frame, energy);

        let emission = if energy < 0.0 {
            energy.abs() * site.carrier.emission_factor
        } else {
            0.0
        };
        Ok(Allocation {
            emission,
            cost: energy.abs() * price,
            ..Allocation::default()
        })
    }
}
