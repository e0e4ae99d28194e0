use super::{
    Allocation, NodeBehavior, NodeSite, StepFrame, adjustable_consumption, site_profile,
    write_side_flows,
};
use crate::curve::Curve;
use crate::error::SimResult;
use crate::profile::step_energy;

/// Demand for a carrier: a profile-driven load or a price-sensitive one.
#[derive(Debug, Clone)]
pub struct ConsumerNode {
    profile: Option<String>,
}

impl ConsumerNode {
    pub fn new(site: &NodeSite) -> Self {
        Self {
            profile: site_profile(site),
        }
    }
}

impl NodeBehavior for ConsumerNode {
    fn build_curve(&mut self, site: &NodeSite, frame: &StepFrame<'_>) -> SimResult<Curve> {
        if let Some(profile) = &self.profile {
            let energy = step_energy(frame.profiles, profile, &frame.horizon);
            return Ok(frame.inflexible(energy.abs()));
        }
        let qmax = site.asset.capacity() * frame.seconds();
        Ok(adjustable_consumption(
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
        price: f64,
    ) -> SimResult<Allocation> {
        write_side_flows(site, frame, energy);
        Ok(Allocation {
            cost: energy.abs() * price,
            ..Allocation::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::model::{Asset, AssetKind, ControlStrategy, Role};
    use crate::nodes::test_support::*;
    use crate::profile::{ProfileKind, ProfileService, ProfileStore, Series};

    #[test]
    fn profile_strategy_wins_over_port_profile() {
        let h = horizon();
        let store = ProfileStore::new()
            .with_series(
                "port",
                Series::new(ProfileKind::Energy, h.start, TimeDelta::hours(1), vec![1.0]),
            )
            .with_series(
                "strategy",
                Series::new(ProfileKind::Energy, h.start, TimeDelta::hours(1), vec![9.0]),
            );
        let asset = Asset::new("house", AssetKind::Consumer)
            .with_port(in_port("house.in", "heat").with_profile("port"))
            .with_control(ControlStrategy::DrivenByProfile {
                port: "house.in".into(),
                profile: "strategy".into(),
            });
        let site = site(asset, "heat", Role::Consumer);
        let mut node = ConsumerNode::new(&site);
        let curve = node.build_curve(&site, &frame(&store)).unwrap();
        assert_eq!(curve.value_at(0.5), 9.0);
    }

    #[test]
    fn consumer_records_flow_and_cost() {
        let store = ProfileStore::new();
        let asset = Asset::new("house", AssetKind::Consumer).with_port(in_port("house.in", "heat"));
        let site = site(asset, "heat", Role::Consumer);
        let mut node = ConsumerNode::new(&site);
        let frame = frame(&store);
        let alloc = node.allocate(&site, &frame, 30.0, 0.5).unwrap();
        assert_eq!(alloc.cost, 15.0);
        assert_eq!(store.read_flow("house.in", frame.at()), Some(30.0));
    }

    #[test]
    fn consumer_without_profile_or_power_bids_nothing() {
        let store = ProfileStore::new();
        let asset = Asset::new("idle", AssetKind::Consumer).with_port(in_port("idle.in", "heat"));
        let site = site(asset, "heat", Role::Consumer);
        let mut node = ConsumerNode::new(&site);
        let curve = node.build_curve(&site, &frame(&store)).unwrap();
        assert_eq!(curve.value_at(0.0), 0.0);
        assert_eq!(curve.value_at(1.0), 0.0);
    }
}
