use super::{Allocation, NodeBehavior, NodeSite, StepFrame, write_side_flows};
use crate::curve::{Curve, PRICE_STEP};
use crate::error::{SimError, SimResult};
use crate::model::{AssetKind, ControlStrategy};
use crate::profile::step_mean;

/// Marginal cost of a storage asset without an explicit cost.
pub const DEFAULT_STORAGE_COST: f64 = 0.15;

/// Distance of the charge and discharge breakpoints from the marginal cost.
pub const STORAGE_COST_BAND: f64 = 0.05;

/// A storage that charges below one price band and discharges above another.
///
/// Positive energy charges the store, negative energy discharges it; the fill
/// level is carried from step to step.
#[derive(Debug, Clone)]
pub struct StorageNode {
    /// Joule.
    capacity: f64,
    /// Watt.
    max_charge_rate: f64,
    /// Watt.
    max_discharge_rate: f64,
    eta_c: f64,
    eta_d: f64,
    /// Initial fill as a fraction of capacity.
    initial_fill: f64,
    /// Current fill in joule.
    fill: f64,
    charge_cost_profile: Option<String>,
    discharge_cost_profile: Option<String>,
}

impl StorageNode {
    /// # Errors
    ///
    /// Returns [`SimError::InvalidAsset`] if the capacity is not positive, the
    /// initial fill is outside `[0, 1]` or an efficiency is outside `(0, 1]`.
    pub fn new(site: &NodeSite) -> SimResult<Self> {
        let asset = &site.asset;
        let AssetKind::Storage {
            capacity,
            max_charge_rate,
            max_discharge_rate,
            fill_level,
            charge_efficiency,
            discharge_efficiency,
        } = asset.kind
        else {
            return Err(SimError::InvalidAsset {
                asset: asset.id.clone(),
                reason: "not a storage".into(),
            });
        };

        let invalid = |reason: &str| SimError::InvalidAsset {
            asset: asset.id.clone(),
            reason: reason.to_string(),
        };
        if capacity <= 0.0 {
            return Err(invalid("capacity must be > 0"));
        }
        if !(0.0..=1.0).contains(&fill_level) {
            return Err(invalid("fill level must be in [0, 1]"));
        }
        if !(charge_efficiency > 0.0 && charge_efficiency <= 1.0)
            || !(discharge_efficiency > 0.0 && discharge_efficiency <= 1.0)
        {
            return Err(invalid("efficiencies must be in (0, 1]"));
        }

        let (charge_cost_profile, discharge_cost_profile) = match &asset.control {
            Some(ControlStrategy::Storage {
                charge_cost_profile,
                discharge_cost_profile,
            }) => (charge_cost_profile.clone(), discharge_cost_profile.clone()),
            _ => (None, None),
        };

        Ok(Self {
            capacity,
            max_charge_rate: max_charge_rate.max(0.0),
            max_discharge_rate: max_discharge_rate.max(0.0),
            eta_c: charge_efficiency,
            eta_d: discharge_efficiency,
            initial_fill: fill_level,
            fill: fill_level * capacity,
            charge_cost_profile,
            discharge_cost_profile,
        })
    }

    pub fn fill_level(&self) -> f64 {
        self.fill / self.capacity
    }

    /// Largest charge the network may deliver this step.
    fn max_charge(&self, seconds: f64) -> f64 {
        let room = (self.capacity - self.fill).max(0.0) / self.eta_c;
        (self.max_charge_rate * seconds).min(room)
    }

    /// Largest discharge the network may receive this step.
    fn max_discharge(&self, seconds: f64) -> f64 {
        (self.max_discharge_rate * seconds).min(self.fill.max(0.0) * self.eta_d)
    }

    /// Charge and discharge breakpoints for the step.
    fn breakpoints(&self, site: &NodeSite, frame: &StepFrame<'_>) -> (f64, f64) {
        let charge = match &self.charge_cost_profile {
            Some(id) => step_mean(frame.profiles, id, &frame.horizon),
            None => site.cost - STORAGE_COST_BAND,
        };
        let discharge = match &self.discharge_cost_profile {
            Some(id) => step_mean(frame.profiles, id, &frame.horizon),
            None => site.cost + STORAGE_COST_BAND,
        };

        let low = frame.price_min + PRICE_STEP;
        let high = frame.price_max - PRICE_STEP;
        let charge = charge.clamp(low, high.max(low));
        let discharge = discharge.clamp(charge, high.max(charge));
        (charge, discharge)
    }
}

impl NodeBehavior for StorageNode {
    /// Five points: charge up to `ecmax` below the charge breakpoint, hold
    /// between the breakpoints, discharge up to `edmax` above the discharge
    /// breakpoint.
    fn build_curve(&mut self, site: &NodeSite, frame: &StepFrame<'_>) -> SimResult<Curve> {
        let ecmax = self.max_charge(frame.seconds());
        let edmax = self.max_discharge(frame.seconds());
        let (charge, discharge) = self.breakpoints(site, frame);

        Ok(Curve::builder()
            .set(frame.price_min, ecmax)
            .set(charge, 0.0)
            .set(discharge, 0.0)
            .set(discharge + PRICE_STEP, -edmax)
            .set(frame.price_max, -edmax)
            .build())
    }

    fn allocate(
        &mut self,
        site: &NodeSite,
        frame: &StepFrame<'_>,
        energy: f64,
        _price: f64,
    ) -> SimResult<Allocation> {
        if energy > 0.0 {
            self.fill += energy * self.eta_c;
        } else if energy < 0.0 {
            self.fill -= energy.abs() / self.eta_d;
        }
        self.fill = self.fill.clamp(0.0, self.capacity);
        write_side_flows(site, frame, energy);

        Ok(Allocation {
            cost: energy.abs() * site.cost,
            fill_level: Some(self.fill_level()),
            ..Allocation::default()
        })
    }

    fn reset(&mut self) {
        self.fill = self.initial_fill * self.capacity;
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use chrono::TimeDelta;

    use super::*;
    use crate::model::{Asset, Role};
    use crate::nodes::test_support::*;
    use crate::profile::{ProfileKind, ProfileStore, Series};

    fn battery(fill_level: f64) -> NodeSite {
        let asset = Asset::new(
            "battery",
            AssetKind::Storage {
                capacity: 10_000.0,
                max_charge_rate: 1.0,
                max_discharge_rate: 1.0,
                fill_level,
                charge_efficiency: 0.9,
                discharge_efficiency: 0.8,
            },
        )
        .with_port(in_port("battery.port", "elec"));
        site(asset, "elec", Role::Both)
    }

    #[test]
    fn default_breakpoints_band_the_marginal_cost() {
        let store = ProfileStore::new();
        let site = battery(0.5);
        let mut node = StorageNode::new(&site).unwrap();
        let curve = node.build_curve(&site, &frame(&store)).unwrap();

        let prices: Vec<f64> = curve.points().iter().map(|p| p.price).collect();
        assert_eq!(prices.len(), 5);
        assert_abs_diff_eq!(prices[1], 0.10, epsilon = 1e-12);
        assert_abs_diff_eq!(prices[2], 0.20, epsilon = 1e-12);
        assert_eq!(curve.value_at(0.0), 3600.0);
        assert_eq!(curve.value_at(0.15), 0.0);
        assert_eq!(curve.value_at(1.0), -3600.0);
    }

    #[test]
    fn limits_follow_fill_and_efficiency() {
        let store = ProfileStore::new();
        let site = battery(0.99);
        let mut node = StorageNode::new(&site).unwrap();
        let curve = node.build_curve(&site, &frame(&store)).unwrap();
        // 100 J of room at 90 % charge efficiency
        assert_abs_diff_eq!(curve.value_at(0.0), 100.0 / 0.9, epsilon = 1e-9);

        let empty = battery(0.0);
        let mut node = StorageNode::new(&empty).unwrap();
        let curve = node.build_curve(&empty, &frame(&store)).unwrap();
        assert_eq!(curve.value_at(1.0), 0.0);
    }

    #[test]
    fn allocation_moves_fill_level_and_reset_restores_it() {
        let store = ProfileStore::new();
        let site = battery(0.5);
        let mut node = StorageNode::new(&site).unwrap();
        let frame = frame(&store);

        let alloc = node.allocate(&site, &frame, 1000.0, 0.05).unwrap();
        assert_abs_diff_eq!(alloc.fill_level.unwrap(), 0.59, epsilon = 1e-12);

        node.allocate(&site, &frame, -800.0, 0.9).unwrap();
        assert_abs_diff_eq!(node.fill_level(), 0.49, epsilon = 1e-12);

        node.reset();
        assert_eq!(node.fill_level(), 0.5);
    }

    #[test]
    fn cost_profiles_replace_derived_breakpoints() {
        let h = horizon();
        let store = ProfileStore::new()
            .with_series(
                "buy",
                Series::new(ProfileKind::Cost, h.start, TimeDelta::hours(1), vec![0.3]),
            )
            .with_series(
                "sell",
                Series::new(ProfileKind::Cost, h.start, TimeDelta::hours(1), vec![0.7]),
            );
        let asset = Asset::new(
            "tank",
            AssetKind::Storage {
                capacity: 1000.0,
                max_charge_rate: 1.0,
                max_discharge_rate: 1.0,
                fill_level: 0.5,
                charge_efficiency: 1.0,
                discharge_efficiency: 1.0,
            },
        )
        .with_control(ControlStrategy::Storage {
            charge_cost_profile: Some("buy".into()),
            discharge_cost_profile: Some("sell".into()),
        });
        let site = site(asset, "heat", Role::Both);
        let mut node = StorageNode::new(&site).unwrap();
        let curve = node.build_curve(&site, &frame(&store)).unwrap();
        assert_eq!(curve.value_at(0.3), 0.0);
        assert_eq!(curve.value_at(0.5), 0.0);
        assert_eq!(curve.value_at(0.71), -500.0);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let asset = Asset::new(
            "bad",
            AssetKind::Storage {
                capacity: 0.0,
                max_charge_rate: 1.0,
                max_discharge_rate: 1.0,
                fill_level: 0.0,
                charge_efficiency: 1.0,
                discharge_efficiency: 1.0,
            },
        );
        let site = site(asset, "heat", Role::Both);
        assert!(matches!(
            StorageNode::new(&site),
            Err(SimError::InvalidAsset { .. })
        ));
    }
}
