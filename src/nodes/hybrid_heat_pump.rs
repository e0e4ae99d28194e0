use super::StepFrame;
use super::conversion::{EnergyBalance, carrier_kind, invalid, ports};
use crate::curve::{Curve, PRICE_STEP};
use crate::error::SimResult;
use crate::model::{Asset, AssetGraph, CarrierKind, PortId};

/// Heat pump covering demand up to its own capacity, with a gas boiler
/// picking up the remainder at a second, higher cost level.
#[derive(Debug, Clone)]
pub(super) struct HybridHeatPump {
    cop: f64,
    gas_efficiency: f64,
    /// Watt of heat.
    heat_pump_power: f64,
    /// Watt of heat.
    boiler_power: f64,
    boiler_cost: f64,
    electricity: PortId,
    gas: PortId,
    heat: PortId,
}

impl HybridHeatPump {
    pub(super) fn resolve(
        graph: &AssetGraph,
        asset: &Asset,
        cop: f64,
        gas_efficiency: f64,
        heat_pump_power: f64,
        boiler_power: f64,
        boiler_cost: f64,
    ) -> SimResult<Self> {
        if cop <= 0.0 || gas_efficiency <= 0.0 {
            return Err(invalid(asset, "cop and gas efficiency must be > 0"));
        }
        if heat_pump_power < 0.0 || boiler_power < 0.0 {
            return Err(invalid(asset, "powers must be >= 0"));
        }
        let outputs = ports(asset.outputs());
        let [heat] = outputs.as_slice() else {
            return Err(invalid(asset, "a hybrid heat pump needs exactly one output port"));
        };
        let inputs = ports(asset.inputs());
        let [a, b] = inputs.as_slice() else {
            return Err(invalid(asset, "a hybrid heat pump needs two input ports"));
        };
        let (electricity, gas) = match (
            carrier_kind(graph, a) == CarrierKind::Electricity,
            carrier_kind(graph, b) == CarrierKind::Electricity,
        ) {
            (true, false) => (a, b),
            (false, true) => (b, a),
            _ => {
                return Err(invalid(
                    asset,
                    "exactly one input of a hybrid heat pump must carry electricity",
                ));
            }
        };

        Ok(Self {
            cop,
            gas_efficiency,
            heat_pump_power,
            boiler_power,
            boiler_cost,
            electricity: electricity.id.clone(),
            gas: gas.id.clone(),
            heat: heat.id.clone(),
        })
    }

    /// Heat from the heat pump and the boiler for `magnitude` on `port`.
    fn split(&self, port: &str, magnitude: f64, seconds: f64) -> Option<(f64, f64)> {
        if port == self.heat {
            let pumped = magnitude.min(self.heat_pump_power * seconds);
            Some((pumped, magnitude - pumped))
        } else if port == self.electricity {
            Some((magnitude * self.cop, 0.0))
        } else if port == self.gas {
            Some((0.0, magnitude * self.gas_efficiency))
        } else {
            None
        }
    }
}

impl EnergyBalance for HybridHeatPump {
    fn max_energy(&self, port: &str, _capacity: f64, seconds: f64) -> Option<f64> {
        let pumped = self.heat_pump_power * seconds;
        let boiled = self.boiler_power * seconds;
        if port == self.heat {
            Some(pumped + boiled)
        } else if port == self.electricity {
            Some(pumped / self.cop)
        } else if port == self.gas {
            Some(boiled / self.gas_efficiency)
        } else {
            None
        }
    }

    fn port_flows(&self, port: &str, magnitude: f64, seconds: f64) -> Option<Vec<(PortId, f64)>> {
        let (pumped, boiled) = self.split(port, magnitude, seconds)?;
        Some(vec![
            (self.electricity.clone(), pumped / self.cop),
            (self.gas.clone(), boiled / self.gas_efficiency),
            (self.heat.clone(), -(pumped + boiled)),
        ])
    }

    fn fuel_port(&self) -> Option<&str> {
        Some(&self.gas)
    }

    /// Heat pump output from the asset cost upward, boiler output from the
    /// boiler cost upward.
    fn production_curve(&self, port: &str, cost: f64, frame: &StepFrame<'_>) -> Option<Curve> {
        if port != self.heat {
            return None;
        }
        let seconds = frame.seconds();
        let pumped = self.heat_pump_power * seconds;
        let total = pumped + self.boiler_power * seconds;
        let top = (frame.price_max - PRICE_STEP).max(frame.price_min);

        let hp_knee = cost.clamp(frame.price_min, top);
        let boiler_knee = self.boiler_cost.max(hp_knee + PRICE_STEP).min(top);
        let mut builder = Curve::builder()
            .set(frame.price_min, 0.0)
            .set(hp_knee, 0.0)
            .set(hp_knee + PRICE_STEP, -pumped);
        if boiler_knee > hp_knee + PRICE_STEP {
            builder = builder.set(boiler_knee, -pumped);
        }
        Some(
            builder
                .set(boiler_knee + PRICE_STEP, -total)
                .set(frame.price_max, -total)
                .build(),
        )
    }

    fn scale_costs(&mut self, factor: f64) {
        self.boiler_cost *= factor;
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::model::{AssetKind, Carrier, ControlStrategy};
    use crate::nodes::test_support::{frame, in_port, out_port};
    use crate::profile::ProfileStore;

    fn hybrid() -> HybridHeatPump {
        let kind = AssetKind::HybridHeatPump {
            cop: 3.0,
            gas_efficiency: 0.9,
            heat_pump_power: 1.0,
            boiler_power: 2.0,
            boiler_cost: 0.6,
        };
        let asset = Asset::new("hhp", kind)
            .with_port(in_port("hhp.gas", "gas"))
            .with_port(in_port("hhp.elec", "elec"))
            .with_port(out_port("hhp.heat", "heat"))
            .with_control(ControlStrategy::DrivenByDemand {
                port: "hhp.heat".into(),
            });
        let graph = AssetGraph::new(
            vec![
                Carrier::new("gas", CarrierKind::Gas),
                Carrier::new("elec", CarrierKind::Electricity),
                Carrier::new("heat", CarrierKind::Heat),
            ],
            vec![asset.clone()],
        )
        .unwrap();
        HybridHeatPump::resolve(&graph, &asset, 3.0, 0.9, 1.0, 2.0, 0.6).unwrap()
    }

    #[test]
    fn boiler_covers_demand_beyond_heat_pump_capacity() {
        let model = hybrid();
        let flows = model.port_flows("hhp.heat", 5400.0, 3600.0).unwrap();
        assert_abs_diff_eq!(flows[0].1, 1200.0, epsilon = 1e-9);
        assert_abs_diff_eq!(flows[1].1, 2000.0, epsilon = 1e-9);
        assert_abs_diff_eq!(flows[2].1, -5400.0, epsilon = 1e-9);

        let small = model.port_flows("hhp.heat", 300.0, 3600.0).unwrap();
        assert_eq!(small[1].1, 0.0);
    }

    #[test]
    fn curve_has_two_cost_levels() {
        let store = ProfileStore::new();
        let frame = frame(&store);
        let curve = hybrid().production_curve("hhp.heat", 0.2, &frame).unwrap();
        assert_eq!(curve.value_at(0.1), 0.0);
        assert_eq!(curve.value_at(0.4), -3600.0);
        assert_eq!(curve.value_at(0.8), -3.0 * 3600.0);
    }

    #[test]
    fn cost_normalization_scales_boiler_cost() {
        let mut model = hybrid();
        model.scale_costs(0.5);
        assert_eq!(model.boiler_cost, 0.3);
    }
}
