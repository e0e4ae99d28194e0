use super::{
    Allocation, NodeBehavior, NodeSite, StepFrame, adjustable_production, site_profile,
    write_side_flows,
};
use crate::curve::Curve;
use crate::error::SimResult;
use crate::profile::step_energy;

/// Source of a carrier: a profile-driven feed-in or a dispatchable plant.
///
/// With a profile the producer bids its profile energy at any price,
/// otherwise it offers its full capacity above its marginal cost.
#[derive(Debug, Clone)]
pub struct ProducerNode {
    renewable: bool,
    profile: Option<String>,
}

impl ProducerNode {
    pub fn new(site: &NodeSite, renewable: bool) -> Self {
        Self {
            renewable,
            profile: site_profile(site),
        }
    }
}

impl NodeBehavior for ProducerNode {
    fn build_curve(&mut self, site: &NodeSite, frame: &StepFrame<'_>) -> SimResult<Curve> {
        if let Some(profile) = &self.profile {
            let energy = step_energy(frame.profiles, profile, &frame.horizon);
            return Ok(frame.inflexible(-energy.abs()));
        }
        let qmax = site.asset.capacity() * frame.seconds();
        Ok(adjustable_production(
            qmax,
            site.cost,
            frame.price_min,
            frame.price_max,
        ))
    }

    fn allocate(
        &mut self,
        site: &NodeSite,
        frame: &StepFrame<'_>,
        energy: f64,
        _price: f64,
    ) -> SimResult<Allocation> {
        write_side_flows(site, frame, energy);
        let emission = if self.renewable {
            0.0
        } else {
            energy.abs() * site.carrier.emission_factor
        };
        Ok(Allocation {
            emission,
            cost: energy.abs() * site.cost,
            ..Allocation::default()
        })
    }
}
