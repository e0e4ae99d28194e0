use super::conversion::{EnergyBalance, carrier_kind, invalid, ports};
use crate::error::SimResult;
use crate::model::{Asset, AssetGraph, CarrierKind, PortId};

/// Combined heat and power plant: one fuel input, a heat and an electricity
/// output with their own efficiencies. `power` bounds the fuel input.
#[derive(Debug, Clone)]
pub(super) struct CoGeneration {
    heat_efficiency: f64,
    electrical_efficiency: f64,
    fuel: PortId,
    heat: PortId,
    electricity: PortId,
}

impl CoGeneration {
    pub(super) fn resolve(
        graph: &AssetGraph,
        asset: &Asset,
        heat_efficiency: f64,
        electrical_efficiency: f64,
    ) -> SimResult<Self> {
        if heat_efficiency <= 0.0 || electrical_efficiency <= 0.0 {
            return Err(invalid(asset, "efficiencies must be > 0"));
        }
        let inputs = ports(asset.inputs());
        let [fuel] = inputs.as_slice() else {
            return Err(invalid(asset, "a co-generation plant needs exactly one input port"));
        };

        let outputs = ports(asset.outputs());
        let heat = outputs
            .iter()
            .find(|p| carrier_kind(graph, p) == CarrierKind::Heat);
        let electricity = outputs
            .iter()
            .find(|p| carrier_kind(graph, p) == CarrierKind::Electricity);
        let (Some(heat), Some(electricity), 2) = (heat, electricity, outputs.len()) else {
            return Err(invalid(
                asset,
                "a co-generation plant needs one heat and one electricity output",
            ));
        };

        Ok(Self {
            heat_efficiency,
            electrical_efficiency,
            fuel: fuel.id.clone(),
            heat: heat.id.clone(),
            electricity: electricity.id.clone(),
        })
    }

    /// Fuel energy needed for `magnitude` on `port`.
    fn fuel_for(&self, port: &str, magnitude: f64) -> Option<f64> {
        if port == self.fuel {
            Some(magnitude)
        } else if port == self.heat {
            Some(magnitude / self.heat_efficiency)
        } else if port == self.electricity {
            Some(magnitude / self.electrical_efficiency)
        } else {
            None
        }
    }
}

impl EnergyBalance for CoGeneration {
    fn max_energy(&self, port: &str, capacity: f64, seconds: f64) -> Option<f64> {
        let fuel = capacity * seconds;
        if port == self.fuel {
            Some(fuel)
        } else if port == self.heat {
            Some(fuel * self.heat_efficiency)
        } else if port == self.electricity {
            Some(fuel * self.electrical_efficiency)
        } else {
            None
        }
    }

    fn port_flows(&self, port: &str, magnitude: f64, _seconds: f64) -> Option<Vec<(PortId, f64)>> {
        let fuel = self.fuel_for(port, magnitude)?;
        Some(vec![
            (self.fuel.clone(), fuel),
            (self.heat.clone(), -fuel * self.heat_efficiency),
            (self.electricity.clone(), -fuel * self.electrical_efficiency),
        ])
    }

    fn fuel_port(&self) -> Option<&str> {
        Some(&self.fuel)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::model::{AssetKind, Carrier};
    use crate::nodes::test_support::{in_port, out_port};

    fn chp() -> (AssetGraph, Asset) {
        let asset = Asset::new(
            "chp",
            AssetKind::CoGeneration {
                heat_efficiency: 0.5,
                electrical_efficiency: 0.4,
            },
        )
        .with_port(in_port("chp.gas", "gas"))
        .with_port(out_port("chp.heat", "heat"))
        .with_port(out_port("chp.elec", "elec"));
        let graph = AssetGraph::new(
            vec![
                Carrier::new("gas", CarrierKind::Gas),
                Carrier::new("heat", CarrierKind::Heat),
                Carrier::new("elec", CarrierKind::Electricity),
            ],
            vec![asset.clone().with_control(crate::model::ControlStrategy::DrivenByDemand {
                port: "chp.heat".into(),
            })],
        )
        .unwrap();
        (graph, asset)
    }

    #[test]
    fn heat_demand_sets_fuel_and_electricity() {
        let (graph, asset) = chp();
        let model = CoGeneration::resolve(&graph, &asset, 0.5, 0.4).unwrap();
        let flows = model.port_flows("chp.heat", 500.0, 3600.0).unwrap();
        assert_abs_diff_eq!(flows[0].1, 1000.0, epsilon = 1e-9);
        assert_abs_diff_eq!(flows[1].1, -500.0, epsilon = 1e-9);
        assert_abs_diff_eq!(flows[2].1, -400.0, epsilon = 1e-9);
        assert_eq!(model.fuel_port(), Some("chp.gas"));
    }

    #[test]
    fn capacity_bounds_fuel_input() {
        let (graph, asset) = chp();
        let model = CoGeneration::resolve(&graph, &asset, 0.5, 0.4).unwrap();
        assert_eq!(model.max_energy("chp.gas", 2.0, 10.0), Some(20.0));
        assert_eq!(model.max_energy("chp.elec", 2.0, 10.0), Some(8.0));
        assert_eq!(model.max_energy("elsewhere", 2.0, 10.0), None);
    }
}
